//! Record-at-a-time iteration over the log.

use crate::error::{CoreError, CoreResult};
use crate::wal::record::{WalRecord, WalRecordType, CRC_SIZE, HEADER_SIZE, WAL_MAGIC, WAL_VERSION};
use parking_lot::MutexGuard;
use revdb_storage::StorageBackend;

/// Iterates `(offset, record)` pairs from the start of the log.
///
/// A truncated envelope or payload at the tail is a torn write and ends
/// iteration cleanly; [`WalRecordIterator::valid_len`] then reports where
/// the intact prefix ends. Bad magic, an unknown type, a newer version or
/// a checksum mismatch is corruption and yields an error.
pub struct WalRecordIterator<'a> {
    backend: MutexGuard<'a, Box<dyn StorageBackend>>,
    total: u64,
    offset: u64,
    done: bool,
}

impl<'a> WalRecordIterator<'a> {
    /// Starts iterating at `offset`.
    ///
    /// # Errors
    ///
    /// Fails if the log size cannot be read.
    pub fn new(backend: MutexGuard<'a, Box<dyn StorageBackend>>, offset: u64) -> CoreResult<Self> {
        let total = backend.size()?;
        Ok(Self {
            backend,
            total,
            offset,
            done: false,
        })
    }

    /// Offset just past the last complete record read so far.
    #[must_use]
    pub fn valid_len(&self) -> u64 {
        self.offset
    }

    /// Total size of the log.
    #[must_use]
    pub fn total_len(&self) -> u64 {
        self.total
    }

    fn read_next(&mut self) -> CoreResult<Option<(u64, WalRecord)>> {
        let start = self.offset;
        if self.total - start < HEADER_SIZE as u64 {
            return Ok(None);
        }

        let header = self.backend.read_at(start, HEADER_SIZE)?;
        if header[0..4] != WAL_MAGIC {
            return Err(CoreError::wal_corruption(format!(
                "invalid magic at offset {start}"
            )));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > WAL_VERSION {
            return Err(CoreError::wal_corruption(format!(
                "unsupported version {version} at offset {start}"
            )));
        }
        let record_type = WalRecordType::from_byte(header[6]).ok_or_else(|| {
            CoreError::wal_corruption(format!(
                "unknown record type {} at offset {start}",
                header[6]
            ))
        })?;
        let len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;

        let body_len = len + CRC_SIZE;
        if self.total - start - (HEADER_SIZE as u64) < body_len as u64 {
            return Ok(None);
        }
        let body = self.backend.read_at(start + HEADER_SIZE as u64, body_len)?;
        let (payload, crc_bytes) = body.split_at(len);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header);
        hasher.update(payload);
        let actual = hasher.finalize();
        let expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        if actual != expected {
            return Err(CoreError::ChecksumMismatch { expected, actual });
        }

        let record = WalRecord::decode_payload(record_type, payload)?;
        self.offset = start + (HEADER_SIZE + body_len) as u64;
        Ok(Some((start, record)))
    }
}

impl Iterator for WalRecordIterator<'_> {
    type Item = CoreResult<(u64, WalRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_next() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
