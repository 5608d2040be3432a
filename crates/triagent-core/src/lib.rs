//! Core types and error definitions for the Triagent framework.
//!
//! This crate provides the foundational types shared across all Triagent
//! crates: the task data model, medical case context, agent capability
//! cards, lifecycle audit events, and the unified error enum.
//!
//! # Main types
//!
//! - [`TriagentError`] — Unified error enum for all Triagent subsystems.
//! - [`TriagentResult`] — Convenience alias for `Result<T, TriagentError>`.
//! - [`Task`] — A unit of work exchanged between agents.
//! - [`TaskPriority`] / [`TaskStatus`] / [`TaskStage`] — Closed lifecycle enums.
//! - [`TaskOutcome`] — Success-xor-failure result of a finished task.
//! - [`MedicalContext`] — Pseudonymized per-case medical metadata.
//! - [`AgentCard`] — Capability descriptor published by each agent.
//! - [`LifecycleEvent`] — Immutable audit record of a lifecycle transition.

/// Agent capability cards and authentication descriptors.
pub mod card;
/// Medical case context shared by all tasks of a case.
pub mod context;
/// The unified error enum and result alias.
pub mod error;
/// Immutable lifecycle audit events.
pub mod event;
/// The task data model and its lifecycle enums.
pub mod task;

pub use card::{AgentAuth, AgentCard};
pub use context::{MedicalContext, MedicalUrgency};
pub use error::{TriagentError, TriagentResult};
pub use event::{EventType, LifecycleEvent};
pub use task::{
    DispatchPath, Payload, Task, TaskOutcome, TaskPriority, TaskStage, TaskStatus,
};
