//! Whole-datagram framing: packet header byte, optional CRC32, optional
//! fragment header, optional tick slice, then the packet body (spec.md
//! §4.2/§6 "Wire protocol summary").

use crate::error::{Result, TransportError};

use super::{
    crc32, decode_packet_header, encode_packet_header, FragmentHeader, PacketFlags, PacketType,
    Reader, Writer,
};

#[derive(Debug, Clone, Copy)]
pub struct DatagramHeader {
    pub ty: PacketType,
    pub crc_enabled: bool,
    pub fragment: Option<FragmentHeader>,
    pub tick: Option<u16>,
    /// Only `COMPRESSED`/`COMBINED` are meaningful here; `VERIFIED`/`TIMED`/
    /// `FRAGMENTED` are derived from the other fields.
    pub extra_flags: PacketFlags,
}

pub fn encode_datagram(header: DatagramHeader, body: &[u8]) -> bytes::BytesMut {
    let mut flags = header.extra_flags
        & (PacketFlags::COMPRESSED | PacketFlags::COMBINED);
    if header.crc_enabled {
        flags |= PacketFlags::VERIFIED;
    }
    if header.tick.is_some() {
        flags |= PacketFlags::TIMED;
    }
    if header.fragment.is_some() {
        flags |= PacketFlags::FRAGMENTED;
    }

    let mut w = Writer::with_capacity(1 + 4 + 6 + 2 + body.len());
    w.u8(encode_packet_header(header.ty, flags));
    let crc_offset = w.len();
    if header.crc_enabled {
        w.u32(0);
    }
    if let Some(frag) = header.fragment {
        w.u16(frag.fragment_id);
        w.u16(frag.part);
        w.u16(frag.last_part);
    }
    if let Some(tick) = header.tick {
        w.u16(tick);
    }
    w.bytes(body);

    if header.crc_enabled {
        let crc = crc32(&w.as_slice()[crc_offset + 4..]);
        w.patch_u32(crc_offset, crc);
    }
    w.into_bytes_mut()
}

#[derive(Debug)]
pub struct DecodedDatagram<'a> {
    pub ty: PacketType,
    pub flags: PacketFlags,
    pub fragment: Option<FragmentHeader>,
    pub tick: Option<u16>,
    pub body: &'a [u8],
}

/// Decodes `data` and, if `VERIFIED` is set and `verify_crc` is `true` (the
/// host's `crc32` config), checks the CRC before returning.
pub fn decode_datagram<'a>(data: &'a [u8], verify_crc: bool) -> Result<DecodedDatagram<'a>> {
    let mut r = Reader::new(data);
    let (ty, flags) = decode_packet_header(r.u8()?)?;

    if flags.contains(PacketFlags::VERIFIED) {
        let claimed = r.u32()?;
        if verify_crc {
            let remaining = &data[r.position()..];
            if crc32(remaining) != claimed {
                return Err(TransportError::CrcMismatch);
            }
        }
    }

    let fragment = if flags.contains(PacketFlags::FRAGMENTED) {
        Some(FragmentHeader {
            fragment_id: r.u16()?,
            part: r.u16()?,
            last_part: r.u16()?,
        })
    } else {
        None
    };

    let tick = if flags.contains(PacketFlags::TIMED) {
        Some(r.u16()?)
    } else {
        None
    };

    let body = r.rest();

    Ok(DecodedDatagram {
        ty,
        flags,
        fragment,
        tick,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_with_crc_and_tick_no_fragment() {
        let header = DatagramHeader {
            ty: PacketType::Connected,
            crc_enabled: true,
            fragment: None,
            tick: Some(0xBEEF),
            extra_flags: PacketFlags::empty(),
        };
        let encoded = encode_datagram(header, b"hello world");
        let decoded = decode_datagram(&encoded, true).unwrap();
        assert_eq!(decoded.ty, PacketType::Connected);
        assert_eq!(decoded.tick, Some(0xBEEF));
        assert!(decoded.fragment.is_none());
        assert_eq!(decoded.body, b"hello world");
    }

    #[test]
    fn roundtrip_with_fragment_header() {
        let header = DatagramHeader {
            ty: PacketType::Connected,
            crc_enabled: false,
            fragment: Some(FragmentHeader {
                fragment_id: 5,
                part: 1,
                last_part: 3,
            }),
            tick: None,
            extra_flags: PacketFlags::empty(),
        };
        let encoded = encode_datagram(header, b"part-bytes");
        let decoded = decode_datagram(&encoded, true).unwrap();
        let frag = decoded.fragment.unwrap();
        assert_eq!((frag.fragment_id, frag.part, frag.last_part), (5, 1, 3));
        assert_eq!(decoded.body, b"part-bytes");
    }

    #[test]
    fn tampered_byte_fails_crc_check() {
        let header = DatagramHeader {
            ty: PacketType::Connected,
            crc_enabled: true,
            fragment: None,
            tick: None,
            extra_flags: PacketFlags::empty(),
        };
        let mut encoded = encode_datagram(header, b"payload");
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert!(matches!(
            decode_datagram(&encoded, true),
            Err(TransportError::CrcMismatch)
        ));
    }

    #[test]
    fn crc_not_checked_when_host_disables_it() {
        let header = DatagramHeader {
            ty: PacketType::Connected,
            crc_enabled: true,
            fragment: None,
            tick: None,
            extra_flags: PacketFlags::empty(),
        };
        let mut encoded = encode_datagram(header, b"payload");
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert!(decode_datagram(&encoded, false).is_ok());
    }
}
