//! CONNECTED-packet message framing (spec.md §4.2): the per-message header
//! plus its optional fields, as laid out in the outgoing flush buffer and
//! read back off an incoming (decrypted, decompressed) packet body.

use crate::error::Result;

use super::{MessageFlags, MessageType, Reader, Writer};

/// One decoded CONNECTED message, as it appears inside a flush buffer entry
/// or a received packet's message stream.
#[derive(Debug, Clone)]
pub struct DecodedMessage<'a> {
    pub ty: MessageType,
    pub flags: MessageFlags,
    pub created_ticks: Option<u16>,
    pub sequence: Option<u16>,
    pub attempt: u8,
    pub channel: u8,
    pub payload: &'a [u8],
}

/// Fields needed to encode one CONNECTED message (spec.md §4.2/§4.3 step 2).
#[derive(Debug, Clone, Copy)]
pub struct MessageHeader {
    pub ty: MessageType,
    pub flags: MessageFlags,
    pub created_ticks: Option<u16>,
    pub sequence: Option<u16>,
    pub attempt: u8,
    pub channel: u8,
}

/// Writes one message (header + optional fields + payload) into `w`.
/// `flags` must already reflect `RELIABLE` if `attempt` is meaningful and
/// `CHANNELED` if `channel != 0`.
pub fn write_message(w: &mut Writer, header: MessageHeader, payload: &[u8]) {
    w.u8(header.ty as u8);
    w.u8(header.flags.bits());
    if header.flags.contains(MessageFlags::TIMED) {
        w.u16(header.created_ticks.unwrap_or(0));
    }
    if header.flags.contains(MessageFlags::SEQUENCED) {
        w.u16(header.sequence.unwrap_or(0));
    }
    if header.flags.contains(MessageFlags::RELIABLE) {
        w.u8(header.attempt);
    }
    if header.flags.contains(MessageFlags::CHANNELED) {
        w.u8(header.channel);
    }
    w.bytes(payload);
}

/// Computes the encoded size of a message with the given header and payload
/// length, without allocating — used to decide whether a message fits in the
/// current flush buffer before an MTU-bound fragmentation pass.
pub fn message_encoded_len(header: &MessageHeader, payload_len: usize) -> usize {
    let mut len = 2; // type + flags byte
    if header.flags.contains(MessageFlags::TIMED) {
        len += 2;
    }
    if header.flags.contains(MessageFlags::SEQUENCED) {
        len += 2;
    }
    if header.flags.contains(MessageFlags::RELIABLE) {
        len += 1;
    }
    if header.flags.contains(MessageFlags::CHANNELED) {
        len += 1;
    }
    len + payload_len
}

/// Reads one message off `r`. `payload_len` is `None` when the message runs
/// to the end of the packet body (the single, non-COMBINED case); `Some(n)`
/// when a COMBINED record's length prefix already bounded it.
pub fn read_message<'a>(r: &mut Reader<'a>, payload_len: Option<usize>) -> Result<DecodedMessage<'a>> {
    let ty = MessageType::from_u8(r.u8()?)?;
    let flags = MessageFlags::from_bits_truncate(r.u8()?);
    let created_ticks = if flags.contains(MessageFlags::TIMED) {
        Some(r.u16()?)
    } else {
        None
    };
    let sequence = if flags.contains(MessageFlags::SEQUENCED) {
        Some(r.u16()?)
    } else {
        None
    };
    let attempt = if flags.contains(MessageFlags::RELIABLE) {
        r.u8()?
    } else {
        0
    };
    let channel = if flags.contains(MessageFlags::CHANNELED) {
        r.u8()?
    } else {
        0
    };
    let payload = match payload_len {
        Some(n) => r.bytes(n)?,
        None => r.rest(),
    };
    Ok(DecodedMessage {
        ty,
        flags,
        created_ticks,
        sequence,
        attempt,
        channel,
        payload,
    })
}

/// Iterates the messages in a CONNECTED packet body, honoring `COMBINED`
/// (a sequence of `u32 length, bytes` records) vs. the single-message case.
pub fn for_each_message<'a>(
    body: &'a [u8],
    combined: bool,
    mut f: impl FnMut(DecodedMessage<'a>) -> Result<()>,
) -> Result<()> {
    if !combined {
        let mut r = Reader::new(body);
        if r.is_empty() {
            return Ok(());
        }
        let msg = read_message(&mut r, None)?;
        return f(msg);
    }

    let mut r = Reader::new(body);
    while !r.is_empty() {
        let len = r.u32()? as usize;
        let record = r.bytes(len)?;
        let mut inner = Reader::new(record);
        let msg = read_message(&mut inner, None)?;
        f(msg)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_message_roundtrip_with_all_optional_fields() {
        let header = MessageHeader {
            ty: MessageType::Custom,
            flags: MessageFlags::TIMED
                | MessageFlags::SEQUENCED
                | MessageFlags::RELIABLE
                | MessageFlags::CHANNELED,
            created_ticks: Some(0x1234),
            sequence: Some(7),
            attempt: 2,
            channel: 9,
        };
        let mut w = Writer::new();
        write_message(&mut w, header, b"payload");
        let bytes = w.into_bytes_mut();

        let mut r = Reader::new(&bytes);
        let decoded = read_message(&mut r, None).unwrap();
        assert_eq!(decoded.ty, MessageType::Custom);
        assert_eq!(decoded.created_ticks, Some(0x1234));
        assert_eq!(decoded.sequence, Some(7));
        assert_eq!(decoded.attempt, 2);
        assert_eq!(decoded.channel, 9);
        assert_eq!(decoded.payload, b"payload");
    }

    #[test]
    fn message_without_optional_fields_omits_them() {
        let header = MessageHeader {
            ty: MessageType::Ping,
            flags: MessageFlags::empty(),
            created_ticks: None,
            sequence: None,
            attempt: 0,
            channel: 0,
        };
        let mut w = Writer::new();
        write_message(&mut w, header, &[]);
        assert_eq!(w.len(), 2);
    }

    #[test]
    fn combined_packet_iterates_every_message() {
        let mut outer = Writer::new();
        for i in 0..3u8 {
            let header = MessageHeader {
                ty: MessageType::Custom,
                flags: MessageFlags::empty(),
                created_ticks: None,
                sequence: None,
                attempt: 0,
                channel: 0,
            };
            let mut inner = Writer::new();
            write_message(&mut inner, header, &[i]);
            let bytes = inner.into_bytes_mut();
            outer.u32(bytes.len() as u32);
            outer.bytes(&bytes);
        }
        let body = outer.into_bytes_mut();

        let mut seen = Vec::new();
        for_each_message(&body, true, |m| {
            seen.push(m.payload[0]);
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn non_combined_packet_reads_single_message() {
        let header = MessageHeader {
            ty: MessageType::Custom,
            flags: MessageFlags::empty(),
            created_ticks: None,
            sequence: None,
            attempt: 0,
            channel: 0,
        };
        let mut w = Writer::new();
        write_message(&mut w, header, b"x");
        let body = w.into_bytes_mut();

        let mut seen = Vec::new();
        for_each_message(&body, false, |m| {
            seen.push(m.payload.to_vec());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![b"x".to_vec()]);
    }
}
