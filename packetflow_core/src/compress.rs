//! Pluggable block compression for the outgoing pipeline's compress stage.

use crate::error::{Result, TransportError};

/// Block compressor used when `PacketFlags::COMPRESSED` is set. Concrete
/// algorithm choice is a Non-goal of the transport spec; this trait lets the
/// host swap in whatever the application needs.
pub trait Compressor: Send + Sync {
    fn compress(&self, data: &[u8]) -> Vec<u8>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Reference compressor backed by LZ4 block format.
#[derive(Debug, Default)]
pub struct Lz4Compressor;

impl Compressor for Lz4Compressor {
    fn compress(&self, data: &[u8]) -> Vec<u8> {
        lz4_flex::block::compress_prepend_size(data)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4_flex::block::decompress_size_prepended(data)
            .map_err(|_| TransportError::MalformedPacket("lz4 decompress failed"))
    }
}
