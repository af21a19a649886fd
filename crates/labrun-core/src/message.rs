//! Frames exchanged over the session connection.
//!
//! The canonical inbound shape is a single [`TaskRequest`] object. Older
//! control planes send a bare array of artifact names instead; both decode
//! into an [`Assignment`], and the matching [`Report`] mirrors the shape that
//! was received.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::task::{TaskRequest, TaskResult};

/// An inbound assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Assignment {
    /// `["alpha", "beta"]`: run each artifact in order, no task identifier.
    Batch(Vec<String>),
    /// `{"task_id": "T1", "test": "alpha"}`.
    Single(TaskRequest),
}

impl Assignment {
    /// Decode an assignment from a text or binary frame payload.
    pub fn decode(payload: &[u8]) -> Result<Self, CoreError> {
        serde_json::from_slice(payload).map_err(CoreError::MalformedAssignment)
    }
}

/// An outbound report answering one assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Report {
    Batch(Vec<TaskResult>),
    Single(TaskResult),
}

impl Report {
    /// Encode the report as a JSON text payload.
    pub fn encode(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string(self)?)
    }
}
