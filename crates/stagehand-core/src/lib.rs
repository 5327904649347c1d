//! Core types and collaborator interfaces for the Stagehand orchestration core.
//!
//! This crate holds everything the other Stagehand crates agree on: the
//! immutable [`Event`] that flows through the system, the unified error
//! taxonomy, conversation messages and tool call types, and the narrow
//! traits behind which the external collaborators live.
//!
//! # Main types
//!
//! - [`StagehandError`] - Unified error enum for all Stagehand subsystems.
//! - [`StagehandResult`] - Convenience alias for `Result<T, StagehandError>`.
//! - [`Event`] - Normalized unit of work submitted by the ingestion layer.
//! - [`Priority`] - Ordered event priority (`low < medium < high < critical`).
//! - [`Message`] - A single message handed to a generation backend.
//! - [`ToolCall`] / [`ToolResult`] - Backend-initiated tool invocations.
//! - [`EventStore`] - Persistent audit trail collaborator.
//! - [`MemoryService`] - Partitioned context recall / write-back collaborator.
//! - [`ToolInvoker`] - Auxiliary tool services (speech, avatar, replies).

/// Error taxonomy shared by every crate.
pub mod error;
/// Event, priority and payload model.
pub mod event;
/// Partitioned memory/context collaborator.
pub mod memory;
/// Conversation messages exchanged with generation backends.
pub mod message;
/// Persistent event store collaborator.
pub mod store;
/// Tool call, result and invoker types.
pub mod tool;

pub use error::{StagehandError, StagehandResult};
pub use event::{Event, EventPayload, Priority};
pub use memory::{InMemoryMemory, MemoryService, MemorySnippet};
pub use message::{Message, Role};
pub use store::{EventRecord, EventStatus, EventStore, EventUpdate, InMemoryEventStore};
pub use tool::{ToolCall, ToolDescriptor, ToolInvoker, ToolResult};
