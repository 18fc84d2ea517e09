//! Transparent gzip transcoding for the distributed tier.
//!
//! Values above the threshold are stored compressed. The gzip magic
//! (`1f 8b`) in the first two bytes decides on read. A raw value that
//! happens to start with the magic is compressed regardless of size so
//! the sniff can never misread it.

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

fn starts_with_magic(value: &[u8]) -> bool {
    value.len() >= 2 && value[..2] == GZIP_MAGIC
}

/// Encode a value for storage.
pub fn pack(value: &[u8], threshold: usize) -> Bytes {
    if value.len() <= threshold && !starts_with_magic(value) {
        return Bytes::copy_from_slice(value);
    }
    let mut encoder = GzEncoder::new(Vec::with_capacity(value.len() / 2), Compression::default());
    // Writing to a Vec cannot fail.
    let _ = encoder.write_all(value);
    match encoder.finish() {
        Ok(compressed) => Bytes::from(compressed),
        Err(_) => Bytes::copy_from_slice(value),
    }
}

/// Decode a stored value.
pub fn unpack(value: Bytes) -> Result<Bytes, std::io::Error> {
    if !starts_with_magic(&value) {
        return Ok(value);
    }
    let mut decoder = GzDecoder::new(&value[..]);
    let mut out = Vec::with_capacity(value.len() * 2);
    decoder.read_to_end(&mut out)?;
    Ok(Bytes::from(out))
}
