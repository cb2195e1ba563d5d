//! Records: the unit of the partition log.
//!
//! A [`Record`] is what processors and exporters see; an [`AppendEntry`] is a
//! record before the log has assigned its position; a [`LogEntry`] is a
//! record together with the term of the leader that appended it, which is
//! what the frame codec stores.

pub mod codec;
pub mod metadata;
pub mod value;

pub use codec::{decode_frame, encode_frame, DecodedFrame, FrameError, FrameFlags, LogEntry};
pub use metadata::{
    CommandDistributionIntent, DeploymentIntent, ErrorIntent, Intent, LeadershipIntent,
    MessageSubscriptionIntent, RecordMetadata, RecordType, Rejection, RejectionType, ValueType,
};
pub use value::{
    CommandDistributionRecord, DeploymentRecord, ErrorRecord, LeadershipRecord,
    MessageSubscriptionRecord, RecordValue,
};

/// Partition identifier; partitions are numbered from 1.
pub type PartitionId = i32;

/// Marker for "no position", e.g. a record without a source.
pub const NO_POSITION: i64 = -1;

/// Marker for "no key".
pub const NO_KEY: i64 = -1;

const KEY_PARTITION_SHIFT: u32 = 51;

/// Build a key that encodes the partition that generated it.
pub fn encode_key(partition_id: PartitionId, counter: i64) -> i64 {
    ((partition_id as i64) << KEY_PARTITION_SHIFT) + counter
}

/// Partition that generated a key.
pub fn decode_partition_id(key: i64) -> PartitionId {
    (key >> KEY_PARTITION_SHIFT) as PartitionId
}

/// Per-partition counter part of a key.
pub fn decode_key_counter(key: i64) -> i64 {
    key & ((1i64 << KEY_PARTITION_SHIFT) - 1)
}

/// A positioned record as read back from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: i64,
    pub position: i64,
    pub timestamp: i64,
    pub partition_id: PartitionId,
    pub producer_id: i32,
    /// Position of the command this record was produced from, or -1.
    pub source_record_position: i64,
    pub metadata: RecordMetadata,
    pub value: RecordValue,
}

impl Record {
    pub fn record_type(&self) -> RecordType {
        self.metadata.record_type
    }

    pub fn intent(&self) -> Intent {
        self.metadata.intent
    }

    pub fn value_type(&self) -> ValueType {
        self.metadata.value_type()
    }

    pub fn is_command(&self) -> bool {
        self.metadata.record_type == RecordType::Command
    }

    pub fn is_event(&self) -> bool {
        self.metadata.record_type == RecordType::Event
    }

    pub fn is_rejection(&self) -> bool {
        self.metadata.record_type == RecordType::CommandRejection
    }
}

/// A record waiting to be appended; the log assigns position and partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendEntry {
    pub key: i64,
    pub timestamp: i64,
    pub producer_id: i32,
    pub source_record_position: i64,
    pub metadata: RecordMetadata,
    pub value: RecordValue,
}

impl AppendEntry {
    /// A new command without key or source.
    pub fn command(intent: Intent, value: RecordValue) -> Self {
        Self {
            key: NO_KEY,
            timestamp: 0,
            producer_id: -1,
            source_record_position: NO_POSITION,
            metadata: RecordMetadata::command(intent),
            value,
        }
    }

    /// A new event without source.
    pub fn event(key: i64, intent: Intent, value: RecordValue) -> Self {
        Self {
            key,
            timestamp: 0,
            producer_id: -1,
            source_record_position: NO_POSITION,
            metadata: RecordMetadata::event(intent),
            value,
        }
    }

    pub fn with_key(mut self, key: i64) -> Self {
        self.key = key;
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_producer(mut self, producer_id: i32) -> Self {
        self.producer_id = producer_id;
        self
    }

    pub fn with_source(mut self, source_record_position: i64) -> Self {
        self.source_record_position = source_record_position;
        self
    }

    pub fn with_request(mut self, request_id: i64, request_stream_id: i32) -> Self {
        self.metadata = self.metadata.with_request(request_id, request_stream_id);
        self
    }

    /// Turn into a positioned record.
    pub fn into_record(self, partition_id: PartitionId, position: i64) -> Record {
        Record {
            key: self.key,
            position,
            timestamp: self.timestamp,
            partition_id,
            producer_id: self.producer_id,
            source_record_position: self.source_record_position,
            metadata: self.metadata,
            value: self.value,
        }
    }
}
