//! Log records and their envelope.
//!
//! ```text
//! | magic (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! The CRC covers everything before it.

use crate::codec;
use crate::error::{CoreError, CoreResult};
use crate::types::Generation;
use crate::wal::WalOperation;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Magic bytes opening every record.
pub const WAL_MAGIC: [u8; 4] = *b"RVWL";

/// Current format version.
pub const WAL_VERSION: u16 = 1;

/// Envelope bytes before the payload.
pub const HEADER_SIZE: usize = 11;

/// Envelope bytes after the payload.
pub const CRC_SIZE: usize = 4;

/// Commit metadata the document index records on every backend commit.
///
/// The pair names the log and the generation the index has absorbed;
/// recovery replays only batches from this generation on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitPoint {
    /// Generation the log rolled to when the commit was prepared.
    pub generation: Generation,
    /// Identity of the log.
    pub log_uuid: Uuid,
}

/// Record type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WalRecordType {
    /// Log identity and starting generation.
    Header = 1,
    /// Start of a batch.
    Begin = 2,
    /// One operation inside a batch.
    Operation = 3,
    /// End of a batch.
    Commit = 4,
    /// Roll to a new generation.
    Generation = 5,
}

impl WalRecordType {
    /// Decodes a type byte.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Header),
            2 => Some(Self::Begin),
            3 => Some(Self::Operation),
            4 => Some(Self::Commit),
            5 => Some(Self::Generation),
            _ => None,
        }
    }

    /// Encodes the type byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// One log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// First record of every log file.
    Header {
        /// Log identity.
        log_uuid: Uuid,
        /// Generation of batches that follow.
        generation: Generation,
    },
    /// Opens batch `batch`.
    Begin {
        /// Batch number.
        batch: u64,
    },
    /// An operation of batch `batch`.
    Operation {
        /// Batch number.
        batch: u64,
        /// The operation.
        op: WalOperation,
    },
    /// Closes batch `batch`; only closed batches are replayed.
    Commit {
        /// Batch number.
        batch: u64,
    },
    /// Batches after this marker belong to `generation`.
    Generation {
        /// The new generation.
        generation: Generation,
    },
}

impl WalRecord {
    /// The type tag.
    #[must_use]
    pub fn record_type(&self) -> WalRecordType {
        match self {
            Self::Header { .. } => WalRecordType::Header,
            Self::Begin { .. } => WalRecordType::Begin,
            Self::Operation { .. } => WalRecordType::Operation,
            Self::Commit { .. } => WalRecordType::Commit,
            Self::Generation { .. } => WalRecordType::Generation,
        }
    }

    fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            Self::Header {
                log_uuid,
                generation,
            } => {
                buf.extend_from_slice(log_uuid.as_bytes());
                buf.extend_from_slice(&generation.as_u64().to_le_bytes());
            }
            Self::Begin { batch } | Self::Commit { batch } => {
                buf.extend_from_slice(&batch.to_le_bytes());
            }
            Self::Operation { batch, op } => {
                buf.extend_from_slice(&batch.to_le_bytes());
                buf.extend(codec::encode(op)?);
            }
            Self::Generation { generation } => {
                buf.extend_from_slice(&generation.as_u64().to_le_bytes());
            }
        }
        Ok(buf)
    }

    /// Decodes a payload of the given type.
    ///
    /// # Errors
    ///
    /// [`CoreError::WalCorruption`] for short or overlong payloads,
    /// [`CoreError::Codec`] for undecodable operations.
    pub fn decode_payload(record_type: WalRecordType, payload: &[u8]) -> CoreResult<Self> {
        let fixed = |len: usize| -> CoreResult<()> {
            if payload.len() == len {
                Ok(())
            } else {
                Err(CoreError::wal_corruption(format!(
                    "{record_type:?} payload is {} bytes, expected {len}",
                    payload.len()
                )))
            }
        };
        let u64_at = |at: usize| -> CoreResult<u64> {
            payload
                .get(at..at + 8)
                .and_then(|b| b.try_into().ok())
                .map(u64::from_le_bytes)
                .ok_or_else(|| CoreError::wal_corruption("unexpected end of payload"))
        };

        match record_type {
            WalRecordType::Header => {
                fixed(24)?;
                let uuid_bytes: [u8; 16] = payload[..16]
                    .try_into()
                    .map_err(|_| CoreError::wal_corruption("invalid log uuid"))?;
                Ok(Self::Header {
                    log_uuid: Uuid::from_bytes(uuid_bytes),
                    generation: Generation::new(u64_at(16)?),
                })
            }
            WalRecordType::Begin => {
                fixed(8)?;
                Ok(Self::Begin { batch: u64_at(0)? })
            }
            WalRecordType::Commit => {
                fixed(8)?;
                Ok(Self::Commit { batch: u64_at(0)? })
            }
            WalRecordType::Generation => {
                fixed(8)?;
                Ok(Self::Generation {
                    generation: Generation::new(u64_at(0)?),
                })
            }
            WalRecordType::Operation => {
                let batch = u64_at(0)?;
                let op = codec::decode(&payload[8..])?;
                Ok(Self::Operation { batch, op })
            }
        }
    }

    /// Encodes the record with its envelope.
    ///
    /// # Errors
    ///
    /// Fails if the payload cannot be encoded or exceeds 4 GiB.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::codec("WAL record payload too large"))?;

        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&WAL_MAGIC);
        data.extend_from_slice(&WAL_VERSION.to_le_bytes());
        data.push(self.record_type().as_byte());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);
        let crc = crc32fast::hash(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::{DeleteTarget, WalOperation};
    use crate::types::Timestamp;

    #[test]
    fn record_type_bytes() {
        for t in [
            WalRecordType::Header,
            WalRecordType::Begin,
            WalRecordType::Operation,
            WalRecordType::Commit,
            WalRecordType::Generation,
        ] {
            assert_eq!(WalRecordType::from_byte(t.as_byte()), Some(t));
        }
        assert_eq!(WalRecordType::from_byte(0), None);
    }

    #[test]
    fn operation_payload_decodes() {
        let record = WalRecord::Operation {
            batch: 9,
            op: WalOperation::Delete(DeleteTarget::Commit(Timestamp::new(44))),
        };
        let bytes = record.encode().unwrap();
        let len = u32::from_le_bytes(bytes[7..11].try_into().unwrap()) as usize;
        let payload = &bytes[HEADER_SIZE..HEADER_SIZE + len];
        let decoded = WalRecord::decode_payload(WalRecordType::Operation, payload).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn header_payload_rejects_trailing_bytes() {
        let mut payload = vec![0u8; 24];
        payload.push(1);
        let err = WalRecord::decode_payload(WalRecordType::Header, &payload).unwrap_err();
        assert!(matches!(err, CoreError::WalCorruption { .. }));
    }
}
