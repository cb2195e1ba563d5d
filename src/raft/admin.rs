//! Admin control protocol.
//!
//! External tooling sends [`AdminRequest`]s as JSON; the partition answers
//! with an [`AdminResponse`] that either succeeds or names the failed
//! operation and partition.

use crate::record::PartitionId;
use serde::{Deserialize, Serialize};

/// Admin request kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdminRequestType {
    /// Step down unless this replica is the partition's designated primary.
    StepDownIfNotPrimary,
    PauseExporting,
    ResumeExporting,
    PauseProcessing,
    ResumeProcessing,
}

impl AdminRequestType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StepDownIfNotPrimary => "STEP_DOWN_IF_NOT_PRIMARY",
            Self::PauseExporting => "PAUSE_EXPORTING",
            Self::ResumeExporting => "RESUME_EXPORTING",
            Self::PauseProcessing => "PAUSE_PROCESSING",
            Self::ResumeProcessing => "RESUME_PROCESSING",
        }
    }
}

impl std::fmt::Display for AdminRequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminRequest {
    pub partition_id: PartitionId,
    pub request_type: AdminRequestType,
}

impl AdminRequest {
    pub fn new(partition_id: PartitionId, request_type: AdminRequestType) -> Self {
        Self {
            partition_id,
            request_type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdminErrorCode {
    /// The receiving replica does not lead the partition.
    PartitionLeaderMismatch,
    /// The partition is failed or shutting down.
    PartitionUnavailable,
    OperationFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminError {
    pub code: AdminErrorCode,
    pub partition_id: PartitionId,
    pub operation: AdminRequestType,
    pub message: String,
}

impl AdminError {
    pub fn new(
        code: AdminErrorCode,
        request: &AdminRequest,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            partition_id: request.partition_id,
            operation: request.request_type,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for AdminError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} failed on partition {}: {:?}: {}",
            self.operation, self.partition_id, self.code, self.message
        )
    }
}

impl std::error::Error for AdminError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdminResponse {
    Ok {
        partition_id: PartitionId,
        operation: AdminRequestType,
    },
    Error(AdminError),
}

impl AdminResponse {
    pub fn ok(request: &AdminRequest) -> Self {
        Self::Ok {
            partition_id: request.partition_id,
            operation: request.request_type,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    pub fn error(&self) -> Option<&AdminError> {
        match self {
            Self::Ok { .. } => None,
            Self::Error(err) => Some(err),
        }
    }
}

impl From<AdminError> for AdminResponse {
    fn from(err: AdminError) -> Self {
        Self::Error(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uses_screaming_snake_case() {
        let request = AdminRequest::new(3, AdminRequestType::StepDownIfNotPrimary);
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(
            json,
            r#"{"partition_id":3,"request_type":"STEP_DOWN_IF_NOT_PRIMARY"}"#
        );
        let parsed: AdminRequest =
            serde_json::from_str(r#"{"partition_id":1,"request_type":"PAUSE_EXPORTING"}"#)
                .unwrap();
        assert_eq!(parsed.request_type, AdminRequestType::PauseExporting);
    }

    #[test]
    fn error_names_operation_and_partition() {
        let request = AdminRequest::new(2, AdminRequestType::StepDownIfNotPrimary);
        let response: AdminResponse = AdminError::new(
            AdminErrorCode::PartitionLeaderMismatch,
            &request,
            "not leader",
        )
        .into();
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "ERROR");
        assert_eq!(json["code"], "PARTITION_LEADER_MISMATCH");
        assert_eq!(json["partition_id"], 2);
        assert_eq!(json["operation"], "STEP_DOWN_IF_NOT_PRIMARY");
    }
}
