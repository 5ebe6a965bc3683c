mod address;
mod pdu;
mod timer;
