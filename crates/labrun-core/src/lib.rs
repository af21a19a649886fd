//! labrun Core Types
//!
//! This crate contains the messages exchanged between the control plane and
//! an agent, with no dependencies on:
//! - Network/WebSocket
//! - Processes or the filesystem
//! - Runtime specifics
//!
//! Everything that crosses the wire is defined here so that both sides of the
//! protocol agree on one shape.

pub mod error;
pub mod ids;
pub mod message;
pub mod task;

// Re-export commonly used types
pub use error::CoreError;
pub use ids::{TaskId, WorkerId};
pub use message::{Assignment, Report};
pub use task::{TaskOutcome, TaskRequest, TaskResult, TaskStatus};
