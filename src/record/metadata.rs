//! Record metadata: record type, value type, intent and rejection info.
//!
//! Intents form a tagged union keyed by value type. Each value type owns a
//! small intent enum and [`Intent`] wraps exactly one of them, so an intent
//! always knows which value type it belongs to.

use crate::core::error::{BraidError, BraidResult};
use serde::{Deserialize, Serialize};

/// Kind of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
    /// A request to change state.
    Command,
    /// A fact: the state change that happened.
    Event,
    /// A command that failed its business rules.
    CommandRejection,
}

impl RecordType {
    pub fn code(self) -> u8 {
        match self {
            Self::Command => 0,
            Self::Event => 1,
            Self::CommandRejection => 2,
        }
    }

    pub fn from_code(code: u8) -> BraidResult<Self> {
        match code {
            0 => Ok(Self::Command),
            1 => Ok(Self::Event),
            2 => Ok(Self::CommandRejection),
            other => Err(BraidError::codec(format!("unknown record type {}", other))),
        }
    }
}

/// Domain of a record's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ValueType {
    Deployment,
    MessageSubscription,
    CommandDistribution,
    Error,
    Leadership,
}

impl ValueType {
    pub fn code(self) -> u8 {
        match self {
            Self::Deployment => 1,
            Self::MessageSubscription => 2,
            Self::CommandDistribution => 3,
            Self::Error => 4,
            Self::Leadership => 5,
        }
    }

    pub fn from_code(code: u8) -> BraidResult<Self> {
        match code {
            1 => Ok(Self::Deployment),
            2 => Ok(Self::MessageSubscription),
            3 => Ok(Self::CommandDistribution),
            4 => Ok(Self::Error),
            5 => Ok(Self::Leadership),
            other => Err(BraidError::codec(format!("unknown value type {}", other))),
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deployment => write!(f, "DEPLOYMENT"),
            Self::MessageSubscription => write!(f, "MESSAGE_SUBSCRIPTION"),
            Self::CommandDistribution => write!(f, "COMMAND_DISTRIBUTION"),
            Self::Error => write!(f, "ERROR"),
            Self::Leadership => write!(f, "LEADERSHIP"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeploymentIntent {
    Create,
    Created,
    FullyDistributed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageSubscriptionIntent {
    Create,
    Created,
    Delete,
    Deleted,
}

/// Lifecycle of a distributed command on its origin partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CommandDistributionIntent {
    Started,
    Distributing,
    Enqueued,
    Acknowledge,
    Acknowledged,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorIntent {
    Created,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LeadershipIntent {
    Elected,
}

/// The state-transition meaning of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Intent {
    Deployment(DeploymentIntent),
    MessageSubscription(MessageSubscriptionIntent),
    CommandDistribution(CommandDistributionIntent),
    Error(ErrorIntent),
    Leadership(LeadershipIntent),
}

impl Intent {
    /// Value type this intent belongs to.
    pub fn value_type(self) -> ValueType {
        match self {
            Self::Deployment(_) => ValueType::Deployment,
            Self::MessageSubscription(_) => ValueType::MessageSubscription,
            Self::CommandDistribution(_) => ValueType::CommandDistribution,
            Self::Error(_) => ValueType::Error,
            Self::Leadership(_) => ValueType::Leadership,
        }
    }

    /// Whether records with this intent are events (as opposed to commands).
    pub fn is_event(self) -> bool {
        !matches!(
            self,
            Self::Deployment(DeploymentIntent::Create)
                | Self::MessageSubscription(MessageSubscriptionIntent::Create)
                | Self::MessageSubscription(MessageSubscriptionIntent::Delete)
                | Self::CommandDistribution(CommandDistributionIntent::Acknowledge)
        )
    }

    /// Wire code, unique within the intent's value type.
    pub fn code(self) -> u8 {
        match self {
            Self::Deployment(i) => match i {
                DeploymentIntent::Create => 0,
                DeploymentIntent::Created => 1,
                DeploymentIntent::FullyDistributed => 2,
            },
            Self::MessageSubscription(i) => match i {
                MessageSubscriptionIntent::Create => 0,
                MessageSubscriptionIntent::Created => 1,
                MessageSubscriptionIntent::Delete => 2,
                MessageSubscriptionIntent::Deleted => 3,
            },
            Self::CommandDistribution(i) => match i {
                CommandDistributionIntent::Started => 0,
                CommandDistributionIntent::Distributing => 1,
                CommandDistributionIntent::Enqueued => 2,
                CommandDistributionIntent::Acknowledge => 3,
                CommandDistributionIntent::Acknowledged => 4,
                CommandDistributionIntent::Finished => 5,
            },
            Self::Error(ErrorIntent::Created) => 0,
            Self::Leadership(LeadershipIntent::Elected) => 0,
        }
    }

    pub fn from_code(value_type: ValueType, code: u8) -> BraidResult<Self> {
        let intent = match (value_type, code) {
            (ValueType::Deployment, 0) => Self::Deployment(DeploymentIntent::Create),
            (ValueType::Deployment, 1) => Self::Deployment(DeploymentIntent::Created),
            (ValueType::Deployment, 2) => Self::Deployment(DeploymentIntent::FullyDistributed),
            (ValueType::MessageSubscription, 0) => {
                Self::MessageSubscription(MessageSubscriptionIntent::Create)
            }
            (ValueType::MessageSubscription, 1) => {
                Self::MessageSubscription(MessageSubscriptionIntent::Created)
            }
            (ValueType::MessageSubscription, 2) => {
                Self::MessageSubscription(MessageSubscriptionIntent::Delete)
            }
            (ValueType::MessageSubscription, 3) => {
                Self::MessageSubscription(MessageSubscriptionIntent::Deleted)
            }
            (ValueType::CommandDistribution, 0) => {
                Self::CommandDistribution(CommandDistributionIntent::Started)
            }
            (ValueType::CommandDistribution, 1) => {
                Self::CommandDistribution(CommandDistributionIntent::Distributing)
            }
            (ValueType::CommandDistribution, 2) => {
                Self::CommandDistribution(CommandDistributionIntent::Enqueued)
            }
            (ValueType::CommandDistribution, 3) => {
                Self::CommandDistribution(CommandDistributionIntent::Acknowledge)
            }
            (ValueType::CommandDistribution, 4) => {
                Self::CommandDistribution(CommandDistributionIntent::Acknowledged)
            }
            (ValueType::CommandDistribution, 5) => {
                Self::CommandDistribution(CommandDistributionIntent::Finished)
            }
            (ValueType::Error, 0) => Self::Error(ErrorIntent::Created),
            (ValueType::Leadership, 0) => Self::Leadership(LeadershipIntent::Elected),
            (vt, c) => {
                return Err(BraidError::codec(format!(
                    "unknown intent {} for value type {}",
                    c, vt
                )))
            }
        };
        Ok(intent)
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deployment(i) => write!(f, "{:?}", i),
            Self::MessageSubscription(i) => write!(f, "{:?}", i),
            Self::CommandDistribution(i) => write!(f, "{:?}", i),
            Self::Error(i) => write!(f, "{:?}", i),
            Self::Leadership(i) => write!(f, "{:?}", i),
        }
    }
}

/// Why a command was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectionType {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    InvalidState,
    ProcessingError,
}

impl RejectionType {
    pub fn code(self) -> u8 {
        match self {
            Self::InvalidArgument => 1,
            Self::NotFound => 2,
            Self::AlreadyExists => 3,
            Self::InvalidState => 4,
            Self::ProcessingError => 5,
        }
    }

    pub fn from_code(code: u8) -> BraidResult<Self> {
        match code {
            1 => Ok(Self::InvalidArgument),
            2 => Ok(Self::NotFound),
            3 => Ok(Self::AlreadyExists),
            4 => Ok(Self::InvalidState),
            5 => Ok(Self::ProcessingError),
            other => Err(BraidError::codec(format!("unknown rejection type {}", other))),
        }
    }
}

/// Rejection details carried by a COMMAND_REJECTION record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub rejection_type: RejectionType,
    pub reason: String,
}

impl Rejection {
    pub fn new(rejection_type: RejectionType, reason: impl Into<String>) -> Self {
        Self {
            rejection_type,
            reason: reason.into(),
        }
    }
}

/// Metadata attached to every record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMetadata {
    pub record_type: RecordType,
    pub intent: Intent,
    /// Present if and only if `record_type` is `CommandRejection`.
    pub rejection: Option<Rejection>,
    /// Client request id, or -1.
    pub request_id: i64,
    /// Client request stream, or -1.
    pub request_stream_id: i32,
}

impl RecordMetadata {
    /// Metadata for a command.
    pub fn command(intent: Intent) -> Self {
        Self {
            record_type: RecordType::Command,
            intent,
            rejection: None,
            request_id: -1,
            request_stream_id: -1,
        }
    }

    /// Metadata for an event.
    pub fn event(intent: Intent) -> Self {
        Self {
            record_type: RecordType::Event,
            intent,
            rejection: None,
            request_id: -1,
            request_stream_id: -1,
        }
    }

    /// Metadata for the rejection of a command with the given intent.
    pub fn rejection(intent: Intent, rejection: Rejection) -> Self {
        Self {
            record_type: RecordType::CommandRejection,
            intent,
            rejection: Some(rejection),
            request_id: -1,
            request_stream_id: -1,
        }
    }

    /// Attach the client request this record answers or originates from.
    pub fn with_request(mut self, request_id: i64, request_stream_id: i32) -> Self {
        self.request_id = request_id;
        self.request_stream_id = request_stream_id;
        self
    }

    pub fn value_type(&self) -> ValueType {
        self.intent.value_type()
    }

    /// Check the record type / rejection pairing.
    pub fn validate(&self) -> BraidResult<()> {
        match (self.record_type, &self.rejection) {
            (RecordType::CommandRejection, None) => {
                Err(BraidError::codec("rejection record without rejection reason"))
            }
            (RecordType::CommandRejection, Some(r)) if r.reason.is_empty() => {
                Err(BraidError::codec("rejection record with empty reason"))
            }
            (RecordType::Command | RecordType::Event, Some(_)) => Err(BraidError::codec(
                "rejection info on a non-rejection record",
            )),
            _ => Ok(()),
        }
    }
}
