//! Packet and message header bit layout (spec.md §4.2/§6).
//!
//! Packet header byte: bits 0..2 `PacketType`, bits 3..7 `PacketFlags` — five
//! named flags fit the five available bits exactly.
//!
//! Message header: spec.md §6 lists *six* `MessageFlags` (TIMED, RELIABLE,
//! ORDERED, UNIQUE, CHANNELED, SEQUENCED) for the five bits left over by a
//! 3-bit `MessageType` in a single byte — six flags do not fit five bits.
//! Resolved per DESIGN.md: the message header is two bytes, a type byte and
//! a dedicated flags byte, instead of packing both into one.

use crate::error::{Result, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Unused1 = 0,
    Request = 1,
    Accept = 2,
    Reject = 3,
    Connected = 4,
    Unconnected = 5,
    Broadcast = 6,
    Unused2 = 7,
}

impl PacketType {
    pub fn from_u8(v: u8) -> Result<Self> {
        Ok(match v & 0x07 {
            0 => Self::Unused1,
            1 => Self::Request,
            2 => Self::Accept,
            3 => Self::Reject,
            4 => Self::Connected,
            5 => Self::Unconnected,
            6 => Self::Broadcast,
            7 => Self::Unused2,
            _ => unreachable!(),
        })
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PacketFlags: u8 {
        const VERIFIED   = 1 << 3;
        const TIMED      = 1 << 4;
        const FRAGMENTED = 1 << 5;
        const COMPRESSED = 1 << 6;
        const COMBINED   = 1 << 7;
    }
}

/// Encodes `(type, flags)` into the single packet header byte.
pub fn encode_packet_header(ty: PacketType, flags: PacketFlags) -> u8 {
    (ty as u8 & 0x07) | flags.bits()
}

/// Decodes the packet header byte into `(type, flags)`.
pub fn decode_packet_header(byte: u8) -> Result<(PacketType, PacketFlags)> {
    let ty = PacketType::from_u8(byte)?;
    let flags = PacketFlags::from_bits_truncate(byte & 0xF8);
    Ok((ty, flags))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Custom = 0,
    Acknowledge = 1,
    Disconnect = 2,
    Ping = 3,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            0 => Self::Custom,
            1 => Self::Acknowledge,
            2 => Self::Disconnect,
            3 => Self::Ping,
            _ => return Err(TransportError::MalformedPacket("unknown message type")),
        })
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MessageFlags: u8 {
        const TIMED     = 1 << 0;
        const RELIABLE  = 1 << 1;
        const ORDERED   = 1 << 2;
        const UNIQUE    = 1 << 3;
        const CHANNELED = 1 << 4;
        const SEQUENCED = 1 << 5;
    }
}

/// Fragment header fields written/read immediately after the packet header
/// (and CRC, if present) when `PacketFlags::FRAGMENTED` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    pub fragment_id: u16,
    pub part: u16,
    pub last_part: u16,
}
