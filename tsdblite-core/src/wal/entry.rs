//! WAL record types and framing

use crate::{Point, Result, Tags, Timestamp, TsdbError};
use bytes::{Buf, BufMut, BytesMut};

/// Bytes of framing around a payload: length, type, payload length, crc
const FRAME_OVERHEAD: usize = 4 + 1 + 4 + 4;

/// Smallest legal value of the leading length field
const MIN_FRAME_LEN: usize = FRAME_OVERHEAD - 4;

/// WAL record type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum WalRecordType {
    /// Series creation
    CreateSeries = 1,
    /// Point append
    AppendPoint = 2,
}

impl TryFrom<u8> for WalRecordType {
    type Error = TsdbError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(WalRecordType::CreateSeries),
            2 => Ok(WalRecordType::AppendPoint),
            _ => Err(TsdbError::InvalidFormat(format!(
                "Invalid WAL record type: {}",
                value
            ))),
        }
    }
}

/// A single logged mutation
#[derive(Debug, Clone, PartialEq)]
pub enum WalRecord {
    /// A series was created
    CreateSeries { metric: String, tags: Tags },
    /// A point was appended to the series with this canonical key
    AppendPoint { key: String, point: Point },
}

impl WalRecord {
    pub fn create_series(metric: &str, tags: &Tags) -> Self {
        WalRecord::CreateSeries {
            metric: metric.to_string(),
            tags: tags.clone(),
        }
    }

    pub fn append_point(key: impl Into<String>, point: Point) -> Self {
        WalRecord::AppendPoint {
            key: key.into(),
            point,
        }
    }

    pub(crate) fn record_type(&self) -> WalRecordType {
        match self {
            WalRecord::CreateSeries { .. } => WalRecordType::CreateSeries,
            WalRecord::AppendPoint { .. } => WalRecordType::AppendPoint,
        }
    }

    /// Append the framed record to `buf`
    ///
    /// Format:
    /// - 4 bytes: frame length (excluding this field)
    /// - 1 byte: record type
    /// - 4 bytes: payload length
    /// - N bytes: payload (bincode)
    /// - 4 bytes: CRC32 of type, payload length and payload
    pub fn encode_into(&self, buf: &mut BytesMut) -> Result<()> {
        let payload = match self {
            WalRecord::CreateSeries { metric, tags } => bincode::serialize(&(metric, tags)),
            WalRecord::AppendPoint { key, point } => {
                bincode::serialize(&(key, point.timestamp, point.value))
            }
        }
        .map_err(|e| TsdbError::InvalidFormat(e.to_string()))?;

        let start = buf.len();
        buf.reserve(FRAME_OVERHEAD + payload.len());

        // Length, patched below
        buf.put_u32_le(0);
        buf.put_u8(self.record_type() as u8);
        buf.put_u32_le(payload.len() as u32);
        buf.put_slice(&payload);

        let checksum = crc32fast::hash(&buf[start + 4..]);
        buf.put_u32_le(checksum);

        let len = (buf.len() - start - 4) as u32;
        buf[start..start + 4].copy_from_slice(&len.to_le_bytes());

        Ok(())
    }

    /// Decode the record at the front of `data`.
    ///
    /// Returns `Ok(None)` when `data` holds only part of a frame, which is
    /// what a crash in the middle of a write leaves behind.
    pub fn decode(data: &[u8]) -> Result<Option<(Self, usize)>> {
        if data.len() < 4 {
            return Ok(None);
        }

        let len = (&data[..4]).get_u32_le() as usize;
        if len < MIN_FRAME_LEN {
            return Err(TsdbError::Corruption(format!("WAL frame length {} too small", len)));
        }
        if data.len() < 4 + len {
            return Ok(None);
        }

        let frame = &data[4..4 + len];
        let (body, mut crc) = frame.split_at(len - 4);
        let expected = crc.get_u32_le();
        let actual = crc32fast::hash(body);
        if expected != actual {
            return Err(TsdbError::ChecksumMismatch { expected, actual });
        }

        let mut cursor = body;
        let record_type = WalRecordType::try_from(cursor.get_u8())?;
        let payload_len = cursor.get_u32_le() as usize;
        if payload_len != cursor.remaining() {
            return Err(TsdbError::Corruption(format!(
                "WAL payload length {} does not match frame ({} bytes)",
                payload_len,
                cursor.remaining()
            )));
        }

        let record = match record_type {
            WalRecordType::CreateSeries => {
                let (metric, tags): (String, Tags) = bincode::deserialize(cursor)
                    .map_err(|e| TsdbError::InvalidFormat(e.to_string()))?;
                WalRecord::CreateSeries { metric, tags }
            }
            WalRecordType::AppendPoint => {
                let (key, timestamp, value): (String, Timestamp, f64) =
                    bincode::deserialize(cursor)
                        .map_err(|e| TsdbError::InvalidFormat(e.to_string()))?;
                WalRecord::AppendPoint {
                    key,
                    point: Point::new(timestamp, value),
                }
            }
        };

        Ok(Some((record, 4 + len)))
    }
}
