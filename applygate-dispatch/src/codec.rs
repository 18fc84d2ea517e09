//! Broker wire framing.
//!
//! Frames are length-prefixed and schema-versioned:
//!
//! ```text
//! [u32 BE payload length][u8 schema version][u8 flags][payload]
//! ```
//!
//! Flag bit 0 marks a gzip-compressed payload; payloads above the
//! threshold are compressed before framing.

use bytes::{BufMut, Bytes, BytesMut};
use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::DispatchError;

pub const SCHEMA_VERSION: u8 = 1;
const FLAG_GZIP: u8 = 0b0000_0001;
const HEADER_LEN: usize = 4 + 1 + 1;

/// Maximum accepted payload length; anything larger is a corrupt or
/// hostile frame.
const MAX_PAYLOAD: usize = 32 * 1024 * 1024;

pub fn encode_frame(payload: &[u8], compress_threshold: usize) -> Bytes {
    let (body, flags) = if payload.len() > compress_threshold {
        let mut encoder = GzEncoder::new(Vec::with_capacity(payload.len() / 2), Compression::default());
        let _ = encoder.write_all(payload);
        match encoder.finish() {
            Ok(compressed) => (compressed, FLAG_GZIP),
            Err(_) => (payload.to_vec(), 0),
        }
    } else {
        (payload.to_vec(), 0)
    };

    let mut frame = BytesMut::with_capacity(HEADER_LEN + body.len());
    frame.put_u32(body.len() as u32);
    frame.put_u8(SCHEMA_VERSION);
    frame.put_u8(flags);
    frame.put_slice(&body);
    frame.freeze()
}

pub fn decode_frame(frame: &[u8]) -> Result<Bytes, DispatchError> {
    if frame.len() < HEADER_LEN {
        return Err(DispatchError::Codec(format!("frame too short: {} bytes", frame.len())));
    }
    let declared = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
    if declared > MAX_PAYLOAD {
        return Err(DispatchError::Codec(format!("declared payload too large: {declared}")));
    }
    let version = frame[4];
    if version != SCHEMA_VERSION {
        return Err(DispatchError::Codec(format!("unsupported schema version {version}")));
    }
    let flags = frame[5];
    let body = &frame[HEADER_LEN..];
    if body.len() != declared {
        return Err(DispatchError::Codec(format!(
            "length mismatch: declared {declared}, got {}",
            body.len()
        )));
    }

    if flags & FLAG_GZIP != 0 {
        let mut decoder = GzDecoder::new(body);
        let mut out = Vec::with_capacity(body.len() * 2);
        decoder
            .read_to_end(&mut out)
            .map_err(|e| DispatchError::Codec(format!("gzip: {e}")))?;
        Ok(Bytes::from(out))
    } else {
        Ok(Bytes::copy_from_slice(body))
    }
}
