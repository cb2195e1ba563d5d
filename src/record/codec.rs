//! Binary frame codec for log entries.
//!
//! Frame layout (little-endian):
//!
//! ```text
//! +--------------+---------+-------+----------+----------+
//! | frame_length | version | flags | reserved | checksum |   12-byte header
//! |     i32      |   u8    |  u8   |   u16    |   u32    |
//! +--------------+---------+-------+----------+----------+
//! | position i64 | term i64 | key i64 | source i64 | timestamp i64 |
//! | partition_id i32 | producer_id i32                            |
//! | metadata_len u32 | metadata bytes | value_len u32 | value bytes |
//! +-------------------------------------------------------------+
//! | zero padding up to the next 8-byte boundary                  |
//! +-------------------------------------------------------------+
//! ```
//!
//! `frame_length` counts header plus body but not the padding. The header can
//! always be read without parsing the body, so a reader knows how far a frame
//! extends before validating it. The checksum is xxhash32 over the body.

use super::metadata::{Intent, RecordMetadata, RecordType, Rejection, RejectionType, ValueType};
use super::value::RecordValue;
use super::Record;
use crate::core::error::{BraidError, BraidResult};
use bytes::{Buf, BufMut};
use std::hash::Hasher;
use thiserror::Error;
use twox_hash::XxHash32;

/// Size of the fixed frame header.
pub const FRAME_HEADER_LENGTH: usize = 12;

/// Frames start on multiples of this.
pub const FRAME_ALIGNMENT: usize = 8;

/// Current frame version.
pub const FRAME_VERSION: u8 = 1;

const FIXED_BODY_LENGTH: usize = 5 * 8 + 2 * 4 + 2 * 4;

bitflags::bitflags! {
    /// Frame flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
    pub struct FrameFlags: u8 {
        /// First frame of an atomically appended batch.
        const BATCH_BEGIN = 0b0000_0001;
        /// Last frame of an atomically appended batch.
        const BATCH_END = 0b0000_0010;
    }
}

impl FrameFlags {
    /// Flags for a batch consisting of a single frame.
    pub fn single() -> Self {
        Self::BATCH_BEGIN | Self::BATCH_END
    }

    /// Flags for frame `index` of a batch of `len` frames.
    pub fn for_batch(index: usize, len: usize) -> Self {
        let mut flags = Self::empty();
        if index == 0 {
            flags |= Self::BATCH_BEGIN;
        }
        if index + 1 == len {
            flags |= Self::BATCH_END;
        }
        flags
    }
}

/// A record plus the term of the leader that appended it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub term: u64,
    pub record: Record,
}

impl LogEntry {
    pub fn position(&self) -> i64 {
        self.record.position
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub entry: LogEntry,
    pub flags: FrameFlags,
    /// Bytes the frame occupies including padding.
    pub aligned_length: usize,
}

/// Why a frame could not be decoded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes than the frame needs: a torn write at the tail.
    #[error("incomplete frame: need {needed} bytes, have {available}")]
    Incomplete { needed: usize, available: usize },

    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },

    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// Round up to the frame alignment.
pub fn align(length: usize) -> usize {
    (length + FRAME_ALIGNMENT - 1) & !(FRAME_ALIGNMENT - 1)
}

/// Read the frame length from a header without touching the body.
pub fn frame_length(buf: &[u8]) -> Option<usize> {
    if buf.len() < FRAME_HEADER_LENGTH {
        return None;
    }
    let mut header = &buf[..4];
    let length = header.get_i32_le();
    if length <= 0 {
        return None;
    }
    Some(length as usize)
}

/// Read the frame flags from a header.
pub fn frame_flags(buf: &[u8]) -> Option<FrameFlags> {
    if buf.len() < FRAME_HEADER_LENGTH {
        return None;
    }
    FrameFlags::from_bits(buf[5])
}

fn checksum(body: &[u8]) -> u32 {
    let mut hasher = XxHash32::with_seed(0);
    hasher.write(body);
    hasher.finish() as u32
}

/// Encode a log entry into an aligned frame.
pub fn encode_frame(entry: &LogEntry, flags: FrameFlags) -> BraidResult<Vec<u8>> {
    let record = &entry.record;
    record.metadata.validate()?;
    if record.metadata.value_type() != record.value.value_type() {
        return Err(BraidError::codec(format!(
            "intent {} does not match value type {}",
            record.metadata.intent,
            record.value.value_type()
        )));
    }

    let metadata = encode_metadata(&record.metadata);
    let value = record.value.encode()?;

    let mut body = Vec::with_capacity(FIXED_BODY_LENGTH + metadata.len() + value.len());
    body.put_i64_le(record.position);
    body.put_i64_le(entry.term as i64);
    body.put_i64_le(record.key);
    body.put_i64_le(record.source_record_position);
    body.put_i64_le(record.timestamp);
    body.put_i32_le(record.partition_id);
    body.put_i32_le(record.producer_id);
    body.put_u32_le(metadata.len() as u32);
    body.put_slice(&metadata);
    body.put_u32_le(value.len() as u32);
    body.put_slice(&value);

    let length = FRAME_HEADER_LENGTH + body.len();
    if length > i32::MAX as usize {
        return Err(BraidError::codec("frame exceeds maximum length"));
    }
    let mut frame = Vec::with_capacity(align(length));
    frame.put_i32_le(length as i32);
    frame.put_u8(FRAME_VERSION);
    frame.put_u8(flags.bits());
    frame.put_u16_le(0);
    frame.put_u32_le(checksum(&body));
    frame.put_slice(&body);
    frame.resize(align(length), 0);
    Ok(frame)
}

/// Decode the frame at the start of `buf`.
pub fn decode_frame(buf: &[u8]) -> Result<DecodedFrame, FrameError> {
    if buf.len() < FRAME_HEADER_LENGTH {
        return Err(FrameError::Incomplete {
            needed: FRAME_HEADER_LENGTH,
            available: buf.len(),
        });
    }
    let mut header = &buf[..FRAME_HEADER_LENGTH];
    let length = header.get_i32_le();
    let version = header.get_u8();
    let flags = header.get_u8();
    let _reserved = header.get_u16_le();
    let stored = header.get_u32_le();

    if length == 0 {
        // Zero-filled tail left behind by an interrupted write.
        return Err(FrameError::Incomplete {
            needed: FRAME_HEADER_LENGTH + FIXED_BODY_LENGTH,
            available: buf.len(),
        });
    }
    if length < 0 || (length as usize) < FRAME_HEADER_LENGTH + FIXED_BODY_LENGTH {
        return Err(FrameError::Malformed(format!("invalid frame length {}", length)));
    }
    let length = length as usize;
    let aligned_length = align(length);
    if buf.len() < aligned_length {
        return Err(FrameError::Incomplete {
            needed: aligned_length,
            available: buf.len(),
        });
    }
    if version != FRAME_VERSION {
        return Err(FrameError::Malformed(format!("unsupported version {}", version)));
    }
    let flags = FrameFlags::from_bits(flags)
        .ok_or_else(|| FrameError::Malformed(format!("unknown flags {:#04x}", flags)))?;

    let body = &buf[FRAME_HEADER_LENGTH..length];
    let computed = checksum(body);
    if computed != stored {
        return Err(FrameError::ChecksumMismatch { stored, computed });
    }

    let entry = decode_body(body).map_err(|e| FrameError::Malformed(e.to_string()))?;
    Ok(DecodedFrame {
        entry,
        flags,
        aligned_length,
    })
}

fn decode_body(mut body: &[u8]) -> BraidResult<LogEntry> {
    let position = body.get_i64_le();
    let term = body.get_i64_le() as u64;
    let key = body.get_i64_le();
    let source_record_position = body.get_i64_le();
    let timestamp = body.get_i64_le();
    let partition_id = body.get_i32_le();
    let producer_id = body.get_i32_le();

    let metadata_bytes = take_block(&mut body, "metadata")?;
    let metadata = decode_metadata(metadata_bytes)?;
    let value_bytes = take_block(&mut body, "value")?;
    let value = RecordValue::decode(metadata.value_type(), value_bytes)?;

    Ok(LogEntry {
        term,
        record: Record {
            key,
            position,
            timestamp,
            partition_id,
            producer_id,
            source_record_position,
            metadata,
            value,
        },
    })
}

fn take_block<'a>(buf: &mut &'a [u8], what: &str) -> BraidResult<&'a [u8]> {
    if buf.remaining() < 4 {
        return Err(BraidError::codec(format!("missing {} length", what)));
    }
    let len = buf.get_u32_le() as usize;
    if buf.remaining() < len {
        return Err(BraidError::codec(format!(
            "{} block of {} bytes exceeds frame",
            what, len
        )));
    }
    let (block, rest) = buf.split_at(len);
    *buf = rest;
    Ok(block)
}

fn encode_metadata(metadata: &RecordMetadata) -> Vec<u8> {
    let reason = metadata
        .rejection
        .as_ref()
        .map(|r| r.reason.as_bytes())
        .unwrap_or_default();
    let mut buf = Vec::with_capacity(20 + reason.len());
    buf.put_u8(metadata.record_type.code());
    buf.put_u8(metadata.value_type().code());
    buf.put_u8(metadata.intent.code());
    buf.put_u8(
        metadata
            .rejection
            .as_ref()
            .map(|r| r.rejection_type.code())
            .unwrap_or(0),
    );
    buf.put_i32_le(metadata.request_stream_id);
    buf.put_i64_le(metadata.request_id);
    buf.put_u32_le(reason.len() as u32);
    buf.put_slice(reason);
    buf
}

fn decode_metadata(mut buf: &[u8]) -> BraidResult<RecordMetadata> {
    if buf.remaining() < 20 {
        return Err(BraidError::codec("metadata block too short"));
    }
    let record_type = RecordType::from_code(buf.get_u8())?;
    let value_type = ValueType::from_code(buf.get_u8())?;
    let intent = Intent::from_code(value_type, buf.get_u8())?;
    let rejection_code = buf.get_u8();
    let request_stream_id = buf.get_i32_le();
    let request_id = buf.get_i64_le();
    let reason = take_block(&mut buf, "rejection reason")?;

    let rejection = if rejection_code == 0 {
        None
    } else {
        let reason = String::from_utf8(reason.to_vec())
            .map_err(|e| BraidError::codec(format!("rejection reason: {}", e)))?;
        Some(Rejection {
            rejection_type: RejectionType::from_code(rejection_code)?,
            reason,
        })
    };
    let metadata = RecordMetadata {
        record_type,
        intent,
        rejection,
        request_id,
        request_stream_id,
    };
    metadata.validate()?;
    Ok(metadata)
}

impl From<FrameError> for BraidError {
    fn from(err: FrameError) -> Self {
        BraidError::codec(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{DeploymentIntent, DeploymentRecord};

    fn entry(position: i64) -> LogEntry {
        LogEntry {
            term: 3,
            record: Record {
                key: 42,
                position,
                timestamp: 1_700_000_000_000,
                partition_id: 1,
                producer_id: 7,
                source_record_position: -1,
                metadata: RecordMetadata::command(Intent::Deployment(DeploymentIntent::Create)),
                value: RecordValue::Deployment(DeploymentRecord {
                    tenant_id: "default".into(),
                    resource_name: "order.bpmn".into(),
                    resource: vec![1, 2, 3],
                    version: 0,
                }),
            },
        }
    }

    #[test]
    fn frames_are_aligned() {
        let frame = encode_frame(&entry(1), FrameFlags::single()).unwrap();
        assert_eq!(frame.len() % FRAME_ALIGNMENT, 0);
        let length = frame_length(&frame).unwrap();
        assert!(length <= frame.len());
        assert!(frame.len() - length < FRAME_ALIGNMENT);
    }

    #[test]
    fn header_is_readable_from_a_truncated_frame() {
        let frame = encode_frame(&entry(9), FrameFlags::single()).unwrap();
        let truncated = &frame[..FRAME_HEADER_LENGTH + 4];
        assert_eq!(frame_length(truncated), frame_length(&frame));
        assert!(matches!(
            decode_frame(truncated),
            Err(FrameError::Incomplete { .. })
        ));
    }

    #[test]
    fn flipped_body_byte_is_detected() {
        let mut frame = encode_frame(&entry(2), FrameFlags::single()).unwrap();
        frame[FRAME_HEADER_LENGTH + 20] ^= 0xff;
        assert!(matches!(
            decode_frame(&frame),
            Err(FrameError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn rejection_without_reason_is_refused() {
        let mut e = entry(3);
        e.record.metadata.record_type = RecordType::CommandRejection;
        assert!(encode_frame(&e, FrameFlags::single()).is_err());
    }

    #[test]
    fn batch_flags_mark_first_and_last() {
        assert_eq!(FrameFlags::for_batch(0, 3), FrameFlags::BATCH_BEGIN);
        assert_eq!(FrameFlags::for_batch(1, 3), FrameFlags::empty());
        assert_eq!(FrameFlags::for_batch(2, 3), FrameFlags::BATCH_END);
        assert_eq!(FrameFlags::for_batch(0, 1), FrameFlags::single());
    }
}
