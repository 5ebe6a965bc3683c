use crate::address::{
    overlaps_reserved_range, Address, AddressConfiguration, AddressError, AddressType,
    AddressingMode,
};
use crate::frame::CanFrame;
use embedded_can::{ExtendedId, Id, StandardId};

fn normal(tx_id: u32, rx_id: u32) -> Address {
    Address::new(AddressConfiguration {
        addressing_mode: AddressingMode::Normal11Bits,
        tx_id: Some(tx_id),
        rx_id: Some(rx_id),
        ..AddressConfiguration::default()
    })
    .unwrap()
}

fn standard_frame(id: u16, data: &[u8]) -> CanFrame {
    CanFrame::new(StandardId::new(id).unwrap(), data)
}

fn extended_frame(id: u32, data: &[u8]) -> CanFrame {
    CanFrame::new(ExtendedId::new(id).unwrap(), data)
}

#[test]
fn test_normal_addressing_requires_distinct_ids() {
    let error = Address::new(AddressConfiguration {
        addressing_mode: AddressingMode::Normal11Bits,
        tx_id: Some(0x7E0),
        rx_id: Some(0x7E0),
        ..AddressConfiguration::default()
    })
    .unwrap_err();

    assert_eq!(error, AddressError::SameTxAndRxId);
}

#[test]
fn test_normal_addressing_requires_both_ids() {
    let error = Address::new(AddressConfiguration {
        addressing_mode: AddressingMode::Normal29Bits,
        tx_id: Some(0x18DA00F1),
        ..AddressConfiguration::default()
    })
    .unwrap_err();

    assert!(matches!(error, AddressError::MissingParameter(_)));
}

#[test]
fn test_11bit_ids_must_fit_11_bits() {
    let error = Address::new(AddressConfiguration {
        addressing_mode: AddressingMode::Normal11Bits,
        tx_id: Some(0x800),
        rx_id: Some(0x7E8),
        ..AddressConfiguration::default()
    })
    .unwrap_err();

    assert_eq!(error, AddressError::IdOutOfRange(0x800));
}

#[test]
fn test_mixed_29_requires_all_three_addresses() {
    let error = Address::new(AddressConfiguration {
        addressing_mode: AddressingMode::Mixed29Bits,
        target_address: Some(0x11),
        source_address: Some(0x22),
        ..AddressConfiguration::default()
    })
    .unwrap_err();

    assert!(matches!(error, AddressError::MissingParameter(_)));
}

#[test]
fn test_normal_acceptance_matches_rx_id_and_width() {
    let address = normal(0x7E0, 0x7E8);

    assert!(address.accepts(&standard_frame(0x7E8, &[0x02, 0, 0])));
    assert!(!address.accepts(&standard_frame(0x7E0, &[0x02, 0, 0])));
    // Identifier width must match the variant
    assert!(!address.accepts(&extended_frame(0x7E8, &[0x02, 0, 0])));
}

#[test]
fn test_normal_fixed_arbitration_ids() {
    let address = Address::new(AddressConfiguration {
        addressing_mode: AddressingMode::NormalFixed29Bits,
        target_address: Some(0x55),
        source_address: Some(0xAA),
        ..AddressConfiguration::default()
    })
    .unwrap();

    assert!(address.is_29bits());
    assert_eq!(
        address.tx_arbitration_id(AddressType::Physical),
        Id::Extended(ExtendedId::new(0x18DA55AA).unwrap())
    );
    assert_eq!(
        address.tx_arbitration_id(AddressType::Functional),
        Id::Extended(ExtendedId::new(0x18DB55AA).unwrap())
    );
    assert_eq!(
        address.rx_arbitration_id(AddressType::Physical),
        Id::Extended(ExtendedId::new(0x18DAAA55).unwrap())
    );
    assert_eq!(address.tx_payload_prefix(), None);
    assert_eq!(address.rx_prefix_size(), 0);
    assert!(!address.requires_extension_byte());
}

#[test]
fn test_normal_fixed_acceptance() {
    let address = Address::new(AddressConfiguration {
        addressing_mode: AddressingMode::NormalFixed29Bits,
        target_address: Some(0x55),
        source_address: Some(0xAA),
        ..AddressConfiguration::default()
    })
    .unwrap();

    assert!(address.accepts(&extended_frame(0x18DA_AA55, &[0x10, 0x14, 1, 2, 3, 4, 5, 6])));
    // Functional variant of the same pair is accepted too
    assert!(address.accepts(&extended_frame(0x18DB_AA55, &[0x02, 1, 2])));
    // Our own transmit ID carries swapped addresses and is not for us
    assert!(!address.accepts(&extended_frame(0x18DA_55AA, &[0x02, 1, 2])));
}

#[test]
fn test_extended_addressing_prefix_and_source_filter() {
    let address = Address::new(AddressConfiguration {
        addressing_mode: AddressingMode::Extended11Bits,
        tx_id: Some(0x7E0),
        rx_id: Some(0x7E8),
        target_address: Some(0xA5),
        source_address: Some(0x5A),
        ..AddressConfiguration::default()
    })
    .unwrap();

    assert_eq!(address.tx_payload_prefix(), Some(0xA5));
    assert_eq!(address.rx_prefix_size(), 1);
    assert!(address.requires_extension_byte());

    assert!(address.accepts(&standard_frame(0x7E8, &[0x5A, 0x02, 1, 2])));
    assert!(!address.accepts(&standard_frame(0x7E8, &[0x99, 0x02, 1, 2])));
    assert!(!address.accepts(&standard_frame(0x7E8, &[])));
}

#[test]
fn test_mixed_11bit_filters_on_the_address_extension() {
    let address = Address::new(AddressConfiguration {
        addressing_mode: AddressingMode::Mixed11Bits,
        tx_id: Some(0x123),
        rx_id: Some(0x456),
        address_extension: Some(0x33),
        ..AddressConfiguration::default()
    })
    .unwrap();

    assert_eq!(address.tx_payload_prefix(), Some(0x33));
    assert!(address.accepts(&standard_frame(0x456, &[0x33, 0x02, 1, 2])));
    assert!(!address.accepts(&standard_frame(0x456, &[0x44, 0x02, 1, 2])));
    assert!(!address.accepts(&standard_frame(0x123, &[0x33, 0x02, 1, 2])));
}

#[test]
fn test_mixed_29bit_arbitration_ids_follow_iso_polarity() {
    let address = Address::new(AddressConfiguration {
        addressing_mode: AddressingMode::Mixed29Bits,
        target_address: Some(0x11),
        source_address: Some(0x22),
        address_extension: Some(0x99),
        ..AddressConfiguration::default()
    })
    .unwrap();

    assert_eq!(
        address.tx_arbitration_id(AddressType::Physical),
        Id::Extended(ExtendedId::new(0x18CE1122).unwrap())
    );
    assert_eq!(
        address.tx_arbitration_id(AddressType::Functional),
        Id::Extended(ExtendedId::new(0x18CD1122).unwrap())
    );
    assert_eq!(address.tx_payload_prefix(), Some(0x99));
}

#[test]
fn test_mixed_29bit_acceptance() {
    let address = Address::new(AddressConfiguration {
        addressing_mode: AddressingMode::Mixed29Bits,
        target_address: Some(0x11),
        source_address: Some(0x22),
        address_extension: Some(0x99),
        ..AddressConfiguration::default()
    })
    .unwrap();

    // Both target address types are recognized, filtered by the extension byte
    assert!(address.accepts(&extended_frame(0x18CE_2211, &[0x99, 0x02, 1, 2])));
    assert!(address.accepts(&extended_frame(0x18CD_2211, &[0x99, 0x02, 1, 2])));
    assert!(!address.accepts(&extended_frame(0x18CE_2211, &[0x98, 0x02, 1, 2])));
    assert!(!address.accepts(&extended_frame(0x18CE_1122, &[0x99, 0x02, 1, 2])));
}

#[test]
fn test_reserved_ranges() {
    assert!(overlaps_reserved_range(0x7F5));
    assert!(!overlaps_reserved_range(0x7F4));
    assert!(!overlaps_reserved_range(0x7F6));
    assert!(!overlaps_reserved_range(0x7E0));
}

#[test]
fn test_display_widths_follow_the_identifier_width() {
    let narrow = normal(0x7E0, 0x7E8);
    assert_eq!(format!("{narrow}"), "[Normal11Bits - tx_id:0x7E0 rx_id:0x7E8]");

    let wide = Address::new(AddressConfiguration {
        addressing_mode: AddressingMode::Normal29Bits,
        tx_id: Some(0x18DA00F1),
        rx_id: Some(0x18DAF100),
        ..AddressConfiguration::default()
    })
    .unwrap();
    assert_eq!(format!("{wide}"), "[Normal29Bits - tx_id:0x18DA00F1 rx_id:0x18DAF100]");
}
