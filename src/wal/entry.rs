//! WAL entry kinds and framing

use crate::error::{HeadError, Result};
use crate::labels::LabelSet;
use crate::types::{SeriesRef, Timestamp};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// A sample as recorded in the log, referencing a declared series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WalSample {
    /// Series reference, matching the block's assignment order
    pub ref_id: SeriesRef,
    /// Timestamp
    pub t: Timestamp,
    /// Value
    pub v: f64,
}

const KIND_SERIES: u8 = 1;
const KIND_SAMPLES: u8 = 2;

/// A single WAL entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalEntry {
    /// Newly declared label sets; each receives the next series
    /// reference implicitly, in order
    Series(Vec<LabelSet>),
    /// A batch of samples referencing declared series
    Samples(Vec<WalSample>),
}

impl WalEntry {
    fn kind(&self) -> u8 {
        match self {
            WalEntry::Series(_) => KIND_SERIES,
            WalEntry::Samples(_) => KIND_SAMPLES,
        }
    }

    fn payload(&self) -> Result<Vec<u8>> {
        let res = match self {
            WalEntry::Series(lsets) => bincode::serialize(lsets),
            WalEntry::Samples(samples) => bincode::serialize(samples),
        };
        res.map_err(|e| HeadError::InvalidFormat(e.to_string()))
    }

    /// Serialize the entry with a length prefix and CRC checksum.
    ///
    /// Format:
    /// - 4 bytes: entry length (excluding this field)
    /// - 1 byte: entry kind
    /// - N bytes: bincode payload
    /// - 4 bytes: CRC32 checksum over kind and payload
    pub fn encode(&self) -> Result<Bytes> {
        let payload = self.payload()?;

        let mut buf = BytesMut::with_capacity(payload.len() + 9);
        buf.put_u32_le(0);
        buf.put_u8(self.kind());
        buf.put_slice(&payload);

        let checksum = crc32fast::hash(&buf[4..]);
        buf.put_u32_le(checksum);

        let len = (buf.len() - 4) as u32;
        buf[0..4].copy_from_slice(&len.to_le_bytes());

        Ok(buf.freeze())
    }

    /// Deserialize one entry from the front of `data`, validating the
    /// checksum. Returns the entry and the number of bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(WalEntry, usize)> {
        if data.len() < 4 {
            return Err(HeadError::TruncatedWalEntry);
        }

        let mut cursor = std::io::Cursor::new(data);
        let len = cursor.get_u32_le() as usize;
        if len < 5 {
            return Err(HeadError::InvalidFormat(format!(
                "WAL entry length {} too small",
                len
            )));
        }
        if data.len() < 4 + len {
            return Err(HeadError::TruncatedWalEntry);
        }

        let entry_data = &data[4..4 + len];
        let (body, crc_bytes) = entry_data.split_at(len - 4);

        let expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let actual = crc32fast::hash(body);
        if expected != actual {
            return Err(HeadError::ChecksumMismatch { expected, actual });
        }

        let entry = match body[0] {
            KIND_SERIES => WalEntry::Series(
                bincode::deserialize(&body[1..])
                    .map_err(|e| HeadError::InvalidFormat(e.to_string()))?,
            ),
            KIND_SAMPLES => WalEntry::Samples(
                bincode::deserialize(&body[1..])
                    .map_err(|e| HeadError::InvalidFormat(e.to_string()))?,
            ),
            kind => {
                return Err(HeadError::InvalidFormat(format!(
                    "invalid WAL entry kind: {}",
                    kind
                )))
            }
        };

        Ok((entry, 4 + len))
    }
}
