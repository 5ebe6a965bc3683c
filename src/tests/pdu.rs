use crate::pdu::{
    decode_separation_time, encode_separation_time, ConsecutiveFrame, DecodeError, FirstFrame,
    FlowControl, FlowStatus, Pdu, SingleFrame,
};
use bytes::Bytes;
use embedded_time::duration::Microseconds;

#[test]
fn test_decode_small_single_frame() {
    let data = Bytes::from_static(&[0x02, 0x10, 0x01, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC]);

    match Pdu::decode(&data, 0).unwrap() {
        Pdu::Single(single) => {
            assert_eq!(single.length, 2);
            assert_eq!(&single.data[..], &[0x10, 0x01]);
            assert!(!single.escape_sequence);
        }
        other => panic!("expected single frame, got {other:?}"),
    }
}

#[test]
fn test_decode_single_frame_behind_prefix() {
    let data = Bytes::from_static(&[0xA5, 0x02, 0xDE, 0xAD]);

    match Pdu::decode(&data, 1).unwrap() {
        Pdu::Single(single) => assert_eq!(&single.data[..], &[0xDE, 0xAD]),
        other => panic!("expected single frame, got {other:?}"),
    }
}

#[test]
fn test_decode_escape_single_frame() {
    let mut raw = vec![0x00, 0x0A];
    raw.extend_from_slice(&[0x55; 10]);

    match Pdu::decode(&Bytes::from(raw), 0).unwrap() {
        Pdu::Single(single) => {
            assert_eq!(single.length, 10);
            assert_eq!(&single.data[..], &[0x55; 10]);
            assert!(single.escape_sequence);
        }
        other => panic!("expected single frame, got {other:?}"),
    }
}

#[test]
fn test_single_frame_length_must_fit_the_frame() {
    let data = Bytes::from_static(&[0x05, 0x01, 0x02]);

    assert_eq!(
        Pdu::decode(&data, 0),
        Err(DecodeError::SingleFrameLengthExceedsData { length: 5, room: 2 })
    );
}

#[test]
fn test_escape_single_frame_rejects_zero_length() {
    let data = Bytes::from_static(&[0x00, 0x00, 0x01]);

    assert_eq!(Pdu::decode(&data, 0), Err(DecodeError::ZeroLengthSingleFrame));
}

#[test]
fn test_escape_single_frame_needs_its_length_byte() {
    let data = Bytes::from_static(&[0x00]);

    assert_eq!(Pdu::decode(&data, 0), Err(DecodeError::TruncatedSingleFrame));
}

#[test]
fn test_empty_payload_regions_are_rejected() {
    assert_eq!(Pdu::decode(&Bytes::new(), 0), Err(DecodeError::EmptyFrame));
    assert_eq!(Pdu::decode(&Bytes::new(), 1), Err(DecodeError::EmptyFrame));
    assert_eq!(Pdu::decode(&Bytes::from_static(&[0xA5]), 1), Err(DecodeError::EmptyFrame));
}

#[test]
fn test_unknown_frame_types_are_rejected() {
    assert_eq!(
        Pdu::decode(&Bytes::from_static(&[0x40, 0x00]), 0),
        Err(DecodeError::UnknownFrameType(4))
    );
    assert_eq!(
        Pdu::decode(&Bytes::from_static(&[0xF0]), 0),
        Err(DecodeError::UnknownFrameType(15))
    );
}

#[test]
fn test_decode_first_frame() {
    let data = Bytes::from_static(&[0x10, 0x14, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);

    match Pdu::decode(&data, 0).unwrap() {
        Pdu::First(first) => {
            assert_eq!(first.length, 20);
            assert_eq!(&first.data[..], &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
            assert!(!first.escape_sequence);
        }
        other => panic!("expected first frame, got {other:?}"),
    }
}

#[test]
fn test_decode_escape_first_frame() {
    let mut raw = vec![0x10, 0x00, 0x00, 0x00, 0x10, 0x00];
    raw.extend_from_slice(&[0xAA; 58]);

    match Pdu::decode(&Bytes::from(raw), 0).unwrap() {
        Pdu::First(first) => {
            assert_eq!(first.length, 0x1000);
            assert_eq!(first.data.len(), 58);
            assert!(first.escape_sequence);
        }
        other => panic!("expected first frame, got {other:?}"),
    }
}

#[test]
fn test_truncated_first_frames_are_rejected() {
    assert_eq!(
        Pdu::decode(&Bytes::from_static(&[0x10]), 0),
        Err(DecodeError::TruncatedFirstFrame)
    );
    // Escape form announced but the 32 bit length is cut short
    assert_eq!(
        Pdu::decode(&Bytes::from_static(&[0x10, 0x00, 0x00, 0x01]), 0),
        Err(DecodeError::TruncatedFirstFrame)
    );
}

#[test]
fn test_decode_consecutive_frame() {
    let data = Bytes::from_static(&[0x27, 0x07, 0x08]);

    match Pdu::decode(&data, 0).unwrap() {
        Pdu::Consecutive(consecutive) => {
            assert_eq!(consecutive.seq_num, 7);
            assert_eq!(&consecutive.data[..], &[0x07, 0x08]);
        }
        other => panic!("expected consecutive frame, got {other:?}"),
    }
}

#[test]
fn test_decode_flow_control() {
    let expectations = [
        (0x30u8, FlowStatus::ContinueToSend),
        (0x31, FlowStatus::Wait),
        (0x32, FlowStatus::Overflow),
    ];

    for (pci, status) in expectations {
        let data = Bytes::copy_from_slice(&[pci, 0x04, 0x00]);

        match Pdu::decode(&data, 0).unwrap() {
            Pdu::FlowControl(flow_control) => {
                assert_eq!(flow_control.flow_status, status);
                assert_eq!(flow_control.block_size, 4);
                assert_eq!(flow_control.st_min, 0);
                assert_eq!(flow_control.separation_time, Microseconds(0u32));
            }
            other => panic!("expected flow control, got {other:?}"),
        }
    }
}

#[test]
fn test_flow_control_decode_errors() {
    assert_eq!(
        Pdu::decode(&Bytes::from_static(&[0x33, 0x00, 0x00]), 0),
        Err(DecodeError::UnknownFlowStatus(3))
    );
    assert_eq!(
        Pdu::decode(&Bytes::from_static(&[0x30, 0x00]), 0),
        Err(DecodeError::TruncatedFlowControl)
    );
    assert_eq!(
        Pdu::decode(&Bytes::from_static(&[0x30, 0x00, 0x80]), 0),
        Err(DecodeError::InvalidStMin(0x80))
    );
}

#[test]
fn test_separation_time_decoding() {
    assert_eq!(decode_separation_time(0x00).unwrap(), Microseconds(0u32));
    assert_eq!(decode_separation_time(0x7F).unwrap(), Microseconds(127_000u32));
    assert_eq!(decode_separation_time(0xF1).unwrap(), Microseconds(100u32));
    assert_eq!(decode_separation_time(0xF9).unwrap(), Microseconds(900u32));

    for raw in [0x80, 0xF0, 0xFA, 0xFF] {
        assert_eq!(decode_separation_time(raw), Err(DecodeError::InvalidStMin(raw)));
    }
}

#[test]
fn test_separation_time_round_trip() {
    for raw in (0x00..=0x7Fu8).chain(0xF1..=0xF9) {
        let decoded = decode_separation_time(raw).unwrap();
        assert_eq!(encode_separation_time(decoded), Some(raw));
    }
}

#[test]
fn test_encode_single_frames() {
    assert_eq!(&SingleFrame::encode(None, &[0x10, 0x01])[..], &[0x02, 0x10, 0x01]);
    assert_eq!(
        &SingleFrame::encode(Some(0xA5), &[0xDE, 0xAD])[..],
        &[0xA5, 0x02, 0xDE, 0xAD]
    );

    let escape = SingleFrame::encode(None, &[0x55; 20]);
    assert_eq!(&escape[..2], &[0x00, 0x14]);
    assert_eq!(escape.len(), 22);
}

#[test]
fn test_encode_first_frames() {
    let small = FirstFrame::encode(None, 20, &[1, 2, 3, 4, 5, 6]);
    assert_eq!(&small[..], &[0x10, 0x14, 1, 2, 3, 4, 5, 6]);

    let escape = FirstFrame::encode(None, 0x12345, &[0xAA, 0xBB]);
    assert_eq!(&escape[..], &[0x10, 0x00, 0x00, 0x01, 0x23, 0x45, 0xAA, 0xBB]);
}

#[test]
fn test_encode_consecutive_wraps_the_sequence_number() {
    assert_eq!(&ConsecutiveFrame::encode(None, 3, &[9])[..], &[0x23, 9]);
    assert_eq!(&ConsecutiveFrame::encode(None, 0x13, &[9])[..], &[0x23, 9]);
}

#[test]
fn test_encode_flow_control() {
    assert_eq!(
        &FlowControl::encode(None, FlowStatus::ContinueToSend, 4, 0)[..],
        &[0x30, 0x04, 0x00]
    );
    assert_eq!(
        &FlowControl::encode(Some(0x0B), FlowStatus::Overflow, 0, 0xF5)[..],
        &[0x0B, 0x32, 0x00, 0xF5]
    );
}

#[test]
fn test_single_frame_encode_decode_round_trip() {
    for length in 1..=62usize {
        let payload: Vec<u8> = (0..length as u8).collect();
        let encoded = SingleFrame::encode(None, &payload).freeze();

        match Pdu::decode(&encoded, 0).unwrap() {
            Pdu::Single(single) => {
                assert_eq!(single.length as usize, length);
                assert_eq!(&single.data[..], &payload[..]);
            }
            other => panic!("expected single frame, got {other:?}"),
        }
    }
}
