//! Typed record payloads.
//!
//! The value type in the metadata selects the variant; on the wire only the
//! variant's payload is stored (bincode), the tag lives in the metadata block.

use super::metadata::{Intent, ValueType};
use crate::core::error::{BraidError, BraidResult};
use serde::{Deserialize, Serialize};

/// A deployed resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub tenant_id: String,
    pub resource_name: String,
    pub resource: Vec<u8>,
    /// Assigned on creation: one more than the previous version of the same
    /// resource name within the tenant.
    pub version: i32,
}

/// A subscription of an element instance to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSubscriptionRecord {
    pub tenant_id: String,
    pub message_name: String,
    pub correlation_key: String,
    pub element_instance_key: i64,
}

/// Bookkeeping for a command forwarded to other partitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDistributionRecord {
    /// Target partition (or, on acknowledgements, the acknowledging one).
    pub partition_id: i32,
    /// Distributions sharing a queue id reach each partition in order.
    pub queue_id: Option<String>,
    pub value_type: ValueType,
    pub intent: Intent,
    pub command_value: Option<Box<RecordValue>>,
}

/// Written when a command failed with an unexpected error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub error_message: String,
    pub failed_position: i64,
}

/// Appended by a newly elected leader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadershipRecord {
    pub term: u64,
    pub leader: u32,
}

/// Payload of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordValue {
    Deployment(DeploymentRecord),
    MessageSubscription(MessageSubscriptionRecord),
    CommandDistribution(CommandDistributionRecord),
    Error(ErrorRecord),
    Leadership(LeadershipRecord),
}

impl RecordValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Deployment(_) => ValueType::Deployment,
            Self::MessageSubscription(_) => ValueType::MessageSubscription,
            Self::CommandDistribution(_) => ValueType::CommandDistribution,
            Self::Error(_) => ValueType::Error,
            Self::Leadership(_) => ValueType::Leadership,
        }
    }

    /// Encode the payload without its tag.
    pub fn encode(&self) -> BraidResult<Vec<u8>> {
        let bytes = match self {
            Self::Deployment(v) => bincode::serialize(v)?,
            Self::MessageSubscription(v) => bincode::serialize(v)?,
            Self::CommandDistribution(v) => bincode::serialize(v)?,
            Self::Error(v) => bincode::serialize(v)?,
            Self::Leadership(v) => bincode::serialize(v)?,
        };
        Ok(bytes)
    }

    /// Decode a payload of the given value type.
    pub fn decode(value_type: ValueType, bytes: &[u8]) -> BraidResult<Self> {
        let value = match value_type {
            ValueType::Deployment => Self::Deployment(bincode::deserialize(bytes)?),
            ValueType::MessageSubscription => {
                Self::MessageSubscription(bincode::deserialize(bytes)?)
            }
            ValueType::CommandDistribution => {
                Self::CommandDistribution(bincode::deserialize(bytes)?)
            }
            ValueType::Error => Self::Error(bincode::deserialize(bytes)?),
            ValueType::Leadership => Self::Leadership(bincode::deserialize(bytes)?),
        };
        Ok(value)
    }

    pub fn as_deployment(&self) -> BraidResult<&DeploymentRecord> {
        match self {
            Self::Deployment(v) => Ok(v),
            other => Err(unexpected(ValueType::Deployment, other)),
        }
    }

    pub fn as_message_subscription(&self) -> BraidResult<&MessageSubscriptionRecord> {
        match self {
            Self::MessageSubscription(v) => Ok(v),
            other => Err(unexpected(ValueType::MessageSubscription, other)),
        }
    }

    pub fn as_command_distribution(&self) -> BraidResult<&CommandDistributionRecord> {
        match self {
            Self::CommandDistribution(v) => Ok(v),
            other => Err(unexpected(ValueType::CommandDistribution, other)),
        }
    }
}

fn unexpected(expected: ValueType, actual: &RecordValue) -> BraidError {
    BraidError::codec(format!(
        "expected {} value, found {}",
        expected,
        actual.value_type()
    ))
}
