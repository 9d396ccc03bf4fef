//! Wire format: header bit layout, CRC32, and the Writer/Reader primitives
//! the send/receive pipelines build packets with.

pub mod datagram;
pub mod message;
pub mod packet;
pub mod reader;
pub mod serial;
pub mod writer;

pub use datagram::{decode_datagram, encode_datagram, DatagramHeader, DecodedDatagram};
pub use message::{for_each_message, message_encoded_len, read_message, write_message, DecodedMessage, MessageHeader};
pub use packet::{
    decode_packet_header, encode_packet_header, FragmentHeader, MessageFlags, MessageType,
    PacketFlags, PacketType,
};
pub use reader::Reader;
pub use serial::crc32;
pub use writer::Writer;
