//! Frame codec for the controller channel.
//!
//! Every message is one self-delimiting frame:
//!
//! ```text
//! [version: 1 byte][length: 4 bytes LE][data: N bytes JSON][crc32: 4 bytes LE]
//! ```
//!
//! A clean end of stream is only legal *between* frames. Running out of
//! bytes anywhere inside a frame is a truncation and fails the session.

use std::io::{ErrorKind, Read, Write};

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{BridgeError, ConnectionError, ProtocolError};

/// Current frame version.
pub const FRAME_VERSION: u8 = 1;

/// Default maximum JSON payload per frame.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024; // 1 MiB

const HEADER_LEN: usize = 1 + 4;
const TRAILER_LEN: usize = 4;

fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Serializes a value into a complete frame.
///
/// # Errors
/// Returns `ProtocolError::SerializationFailed` if the value cannot be
/// encoded, or `FrameTooLarge` if it exceeds `max_frame_bytes`.
pub fn encode<T: Serialize>(value: &T, max_frame_bytes: usize) -> Result<Vec<u8>, ProtocolError> {
    let data = serde_json::to_vec(value).map_err(|e| ProtocolError::SerializationFailed {
        message: e.to_string(),
    })?;
    if data.len() > max_frame_bytes {
        return Err(ProtocolError::FrameTooLarge {
            len: data.len(),
            max: max_frame_bytes,
        });
    }
    let len = u32::try_from(data.len()).map_err(|_| ProtocolError::FrameTooLarge {
        len: data.len(),
        max: u32::MAX as usize,
    })?;

    let mut out = Vec::with_capacity(HEADER_LEN + data.len() + TRAILER_LEN);
    out.push(FRAME_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&data);
    out.extend_from_slice(&checksum(&data).to_le_bytes());
    Ok(out)
}

/// Parses the JSON payload of a frame.
///
/// # Errors
/// Returns `ProtocolError::Malformed` if the payload does not decode as `T`.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, ProtocolError> {
    serde_json::from_slice(payload).map_err(|e| ProtocolError::Malformed {
        message: e.to_string(),
    })
}

/// Writes one frame and flushes.
///
/// # Errors
/// Returns `ConnectionError::WriteFailed` on any I/O failure.
pub fn write_frame(writer: &mut impl Write, frame: &[u8]) -> Result<(), ConnectionError> {
    writer
        .write_all(frame)
        .and_then(|()| writer.flush())
        .map_err(|e| ConnectionError::WriteFailed {
            message: e.to_string(),
        })
}

/// Reads one frame and returns its verified JSON payload.
///
/// Returns `Ok(None)` if the stream ended cleanly before the first byte.
///
/// # Errors
/// - `ProtocolError` for a bad version, oversized length, checksum mismatch,
///   or a stream that ends mid-frame
/// - `ConnectionError::ReadFailed` for any other I/O failure
pub fn read_frame(reader: &mut impl Read, max_frame_bytes: usize) -> Result<Option<Vec<u8>>, BridgeError> {
    let mut version = [0u8; 1];
    loop {
        match reader.read(&mut version) {
            Ok(0) => return Ok(None),
            Ok(_) => break,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                return Err(ConnectionError::ReadFailed {
                    message: e.to_string(),
                }
                .into())
            }
        }
    }

    if version[0] != FRAME_VERSION {
        return Err(ProtocolError::UnsupportedVersion {
            found: version[0],
            expected: FRAME_VERSION,
        }
        .into());
    }

    let mut len_bytes = [0u8; 4];
    read_section(reader, &mut len_bytes, "length")?;
    let len = u32::from_le_bytes(len_bytes) as usize;

    // Reject before allocating.
    if len > max_frame_bytes {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: max_frame_bytes,
        }
        .into());
    }

    let mut data = vec![0u8; len];
    read_section(reader, &mut data, "payload")?;

    let mut crc_bytes = [0u8; 4];
    read_section(reader, &mut crc_bytes, "checksum")?;
    let stored = u32::from_le_bytes(crc_bytes);
    let computed = checksum(&data);
    if stored != computed {
        return Err(ProtocolError::ChecksumMismatch { stored, computed }.into());
    }

    Ok(Some(data))
}

fn read_section(reader: &mut impl Read, buf: &mut [u8], section: &'static str) -> Result<(), BridgeError> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            BridgeError::from(ProtocolError::Truncated { section })
        } else {
            BridgeError::from(ConnectionError::ReadFailed {
                message: e.to_string(),
            })
        }
    })
}
