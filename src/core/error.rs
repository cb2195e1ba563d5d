//! Error types and their classification.
//!
//! Every library operation returns [`BraidResult`]. Errors are grouped into the
//! four outcome classes the partition reacts to differently (see
//! [`ErrorClass`]): rejections are surfaced to the caller, transient failures
//! are retried at the component boundary, fatal failures mark the partition as
//! failed and leadership loss is a state transition callers retry around.

use thiserror::Error;

/// Common braid error conditions.
#[derive(Debug, Error)]
pub enum BraidError {
    /// The caller is not (or no longer) the writer for this partition.
    #[error("not leader for partition {partition_id} (term {term})")]
    NotLeader { partition_id: i32, term: u64 },

    /// A request carried a term that no longer matches the current one.
    #[error("term mismatch on partition {partition_id}: expected {expected}, observed {observed}")]
    TermMismatch {
        partition_id: i32,
        expected: u64,
        observed: u64,
    },

    /// Disk failure while reading or writing partition data.
    #[error("I/O failure on partition {partition_id}: {message}")]
    IoFailure { partition_id: i32, message: String },

    /// Requested position lies below the lowest retained position.
    #[error("position {position} has been compacted; lowest retained position is {floor}")]
    Compacted { position: i64, floor: i64 },

    /// A log frame failed checksum or structural validation.
    #[error("corrupted frame at offset {offset} of {segment}: {reason}")]
    CorruptedFrame {
        segment: String,
        offset: u64,
        reason: String,
    },

    /// Exclusive insert into a column family whose key is already present.
    #[error("key already exists in column family {column_family}")]
    AlreadyExists { column_family: &'static str },

    /// Delete or update of a key that is absent.
    #[error("key not found in column family {column_family}")]
    NotFound { column_family: &'static str },

    /// Snapshot failed checksum validation or is structurally incomplete.
    #[error("invalid snapshot {snapshot_id}: {reason}")]
    InvalidSnapshot { snapshot_id: String, reason: String },

    /// Replay produced an outcome that differs from the recorded one.
    #[error("determinism violation at position {position}: {reason}")]
    DeterminismViolation { position: i64, reason: String },

    /// Partition has been marked failed and requires operator intervention.
    #[error("partition {partition_id} has failed: {reason}")]
    PartitionFailed { partition_id: i32, reason: String },

    /// Partition is not hosted here or its actor has stopped.
    #[error("partition {partition_id} is unavailable")]
    PartitionUnavailable { partition_id: i32 },

    /// Encoding or decoding of a record, key or value failed.
    #[error("codec error: {message}")]
    Codec { message: String },

    /// Internal error.
    #[error("internal error: {message}")]
    Internal { message: String },
}

/// Outcome class of an error, deciding how the partition reacts to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Business-rule failure, surfaced to the caller.
    Rejection,
    /// Infrastructure failure, retried with backoff.
    Transient,
    /// Corruption or invariant breach; the partition fails.
    Fatal,
    /// Leadership moved; the caller retries against the new leader.
    LeadershipLoss,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rejection => write!(f, "rejection"),
            Self::Transient => write!(f, "transient"),
            Self::Fatal => write!(f, "fatal"),
            Self::LeadershipLoss => write!(f, "leadership-loss"),
        }
    }
}

impl BraidError {
    /// Create a NotLeader error.
    pub fn not_leader(partition_id: i32, term: u64) -> Self {
        Self::NotLeader { partition_id, term }
    }

    /// Create an IoFailure error from an I/O error.
    pub fn io(partition_id: i32, err: std::io::Error) -> Self {
        Self::IoFailure {
            partition_id,
            message: err.to_string(),
        }
    }

    /// Create a Codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Create an InvalidSnapshot error.
    pub fn invalid_snapshot(snapshot_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSnapshot {
            snapshot_id: snapshot_id.into(),
            reason: reason.into(),
        }
    }

    /// Create an Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NotLeader { .. } | Self::TermMismatch { .. } => ErrorClass::LeadershipLoss,
            Self::AlreadyExists { .. } | Self::NotFound { .. } | Self::Compacted { .. } => {
                ErrorClass::Rejection
            }
            Self::IoFailure { .. } | Self::PartitionUnavailable { .. } => ErrorClass::Transient,
            Self::CorruptedFrame { .. }
            | Self::InvalidSnapshot { .. }
            | Self::DeterminismViolation { .. }
            | Self::PartitionFailed { .. }
            | Self::Codec { .. }
            | Self::Internal { .. } => ErrorClass::Fatal,
        }
    }

    /// Check if this error indicates the operation should be retried.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Transient | ErrorClass::LeadershipLoss
        )
    }

    /// Check if this error must fail the partition.
    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }
}

impl From<bincode::Error> for BraidError {
    fn from(err: bincode::Error) -> Self {
        Self::codec(err.to_string())
    }
}

impl From<serde_json::Error> for BraidError {
    fn from(err: serde_json::Error) -> Self {
        Self::codec(err.to_string())
    }
}

/// Result type using BraidError.
pub type BraidResult<T> = Result<T, BraidError>;
