//! Distributed task lifecycle and scheduling core of the Triagent framework.
//!
//! Coordinates work between independent medical agents: creates tasks,
//! queues and dispatches them by priority tier, tracks the multi-stage
//! lifecycle, enforces per-priority deadlines, resolves dependencies,
//! escalates abnormal outcomes, and audits every transition.
//!
//! # Main types
//!
//! - [`Orchestrator`] — Client-facing facade owning all lifecycle state.
//! - [`TaskStore`] — In-memory task registry with per-entry locking.
//! - [`PriorityScheduler`] — Four concurrent per-tier consumer loops.
//! - [`TimeoutMonitor`] — Cancellable per-task deadline timers.
//! - [`EscalationEngine`] — Maps abnormal conditions to remediation actions.
//! - [`HandlerRegistry`] — Local fallback handlers keyed by task type.

/// Dependency resolution over the task store.
pub mod deps;
/// Remote RPC dispatch with local-handler fallback.
pub mod dispatch;
/// The orchestrator facade and case consolidation.
pub mod engine;
/// Escalation triggers, review queue, and the escalation worker.
pub mod escalation;
/// The local task handler trait and registry.
pub mod handler;
/// Agent card registry.
pub mod registry;
/// Per-tier priority queues and worker loops.
pub mod scheduler;
/// The in-memory task store.
pub mod store;
/// Per-task deadline timers.
pub mod timeout;

pub use deps::{DepState, DependencyResolver};
pub use dispatch::{AgentDispatcher, DispatchOptions, CONFIDENCE_THRESHOLD};
pub use engine::{
    CaseReport, ConsolidatedResult, Orchestrator, OrchestratorConfig, StatusSnapshot, TaskSpec,
};
pub use escalation::{
    EscalationEngine, EscalationEvent, EscalationTrigger, Notifier, ReviewEntry, ReviewQueue,
    TracingNotifier,
};
pub use handler::{HandlerRegistry, TaskHandler};
pub use registry::AgentRegistry;
pub use scheduler::{Dispatcher, PriorityScheduler};
pub use store::TaskStore;
pub use timeout::TimeoutMonitor;
