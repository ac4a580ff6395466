//! LZ4 frame compression for stored payloads.
//!
//! Every call builds its own encoder or decoder, so any number of callers
//! may compress and decompress concurrently. The frame format carries its
//! own end mark, which lets a payload be read back without knowing its
//! decompressed size up front.
use std::io::{self, Read, Write};

use lz4_flex::frame::{FrameDecoder, FrameEncoder};

use crate::CodecError;

/// Compress `input` into a single LZ4 frame.
pub fn compress(input: &[u8]) -> Result<Vec<u8>, CodecError> {
    compress_reader(input, input.len() / 2)
}

/// Stream `reader` through the encoder until EOF.
///
/// `size_hint` only pre-sizes the output buffer.
pub fn compress_reader<R: Read>(
    mut reader: R,
    size_hint: usize,
) -> Result<Vec<u8>, CodecError> {
    let mut encoder = FrameEncoder::new(Vec::with_capacity(size_hint));
    io::copy(&mut reader, &mut encoder)
        .map_err(|e| CodecError::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| CodecError::Compression(e.to_string()))
}

/// Decompress a complete LZ4 frame.
pub fn decompress(input: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(input.len().saturating_mul(2));
    decompress_into(input, &mut out)?;
    Ok(out)
}

/// Decompress `input` into `writer`, returning the number of bytes written.
pub fn decompress_into<W: Write>(
    input: &[u8],
    writer: &mut W,
) -> Result<u64, CodecError> {
    let mut decoder = FrameDecoder::new(input);
    io::copy(&mut decoder, writer)
        .map_err(|e| CodecError::Decompression(e.to_string()))
}
