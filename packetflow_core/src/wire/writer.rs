//! Growable write buffer used to build outgoing packets and messages.

use bytes::{BufMut, BytesMut};

/// A thin wrapper over `BytesMut` with the little-endian primitives the wire
/// format needs. Kept separate from `BytesMut` itself so call sites read like
/// the protocol description (`writer.u16(seq)`) rather than raw buffer calls.
#[derive(Debug, Default)]
pub struct Writer {
    buf: BytesMut,
}

impl Writer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(cap),
        }
    }

    pub fn from_bytes_mut(buf: BytesMut) -> Self {
        Self { buf }
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.put_u8(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.put_u16_le(v);
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.put_u32_le(v);
        self
    }

    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.buf.put_slice(data);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Overwrites 4 bytes at `offset` with `v` (used to patch in the CRC once
    /// the rest of the packet has been written).
    pub fn patch_u32(&mut self, offset: usize, v: u32) {
        self.buf[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes_mut(self) -> BytesMut {
        self.buf
    }

    pub fn freeze(self) -> bytes::Bytes {
        self.buf.freeze()
    }
}
