//! CBOR encoding and checksummed framing shared by the log and the store.
//!
//! A frame is `| length (4) | crc32 (4) | payload (N) |`, little endian.
//! The document store is a plain sequence of frames; the log wraps its
//! own envelope around CBOR payloads produced here.

use crate::error::{CoreError, CoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Size of the frame prefix.
pub const FRAME_HEADER: usize = 8;

/// Encodes a value as CBOR.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> CoreResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| CoreError::codec(e.to_string()))?;
    Ok(buf)
}

/// Decodes a CBOR value.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CoreResult<T> {
    ciborium::from_reader(bytes).map_err(|e| CoreError::codec(e.to_string()))
}

/// Wraps `payload` in a length and checksum prefix.
pub fn frame(payload: &[u8]) -> CoreResult<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .map_err(|_| CoreError::codec("frame payload exceeds 4 GiB"))?;
    let mut buf = Vec::with_capacity(FRAME_HEADER + payload.len());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Result of scanning a buffer of frames.
#[derive(Debug, Default)]
pub struct Frames<'a> {
    /// Complete frames with the offset they start at.
    pub frames: Vec<(u64, &'a [u8])>,
    /// Offset just past the last complete frame.
    pub valid_len: u64,
}

impl Frames<'_> {
    /// True when bytes after the last complete frame were ignored.
    #[must_use]
    pub fn has_torn_tail(&self, total: usize) -> bool {
        self.valid_len < total as u64
    }
}

/// Splits `bytes` into frames.
///
/// A truncated prefix or payload at the end is a torn write and ends the
/// scan. A checksum mismatch on a complete frame is corruption.
pub fn read_frames(bytes: &[u8]) -> CoreResult<Frames<'_>> {
    let mut out = Frames::default();
    let mut pos = 0usize;
    while bytes.len() - pos >= FRAME_HEADER {
        let len = u32::from_le_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]])
            as usize;
        let expected =
            u32::from_le_bytes([bytes[pos + 4], bytes[pos + 5], bytes[pos + 6], bytes[pos + 7]]);
        let start = pos + FRAME_HEADER;
        let Some(end) = start.checked_add(len).filter(|end| *end <= bytes.len()) else {
            break;
        };
        let payload = &bytes[start..end];
        let actual = crc32fast::hash(payload);
        if actual != expected {
            return Err(CoreError::ChecksumMismatch { expected, actual });
        }
        out.frames.push((pos as u64, payload));
        pos = end;
        out.valid_len = pos as u64;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_stop_at_torn_tail() {
        let mut bytes = frame(b"first").unwrap();
        bytes.extend(frame(b"second").unwrap());
        let full = bytes.len();
        bytes.extend(&frame(b"third").unwrap()[..6]);

        let scan = read_frames(&bytes).unwrap();
        assert_eq!(scan.frames.len(), 2);
        assert_eq!(scan.frames[1].1, b"second");
        assert_eq!(scan.valid_len, full as u64);
        assert!(scan.has_torn_tail(bytes.len()));
    }

    #[test]
    fn flipped_bit_is_fatal() {
        let mut bytes = frame(b"payload").unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert!(matches!(
            read_frames(&bytes),
            Err(CoreError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn cbor_roundtrip_of_nested_value() {
        let value = vec![("a".to_string(), 1u64), ("b".to_string(), 2)];
        let bytes = encode(&value).unwrap();
        let back: Vec<(String, u64)> = decode(&bytes).unwrap();
        assert_eq!(back, value);
    }
}
