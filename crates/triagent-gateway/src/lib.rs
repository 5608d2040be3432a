//! HTTP/JSON surface of a Triagent-hosting process.
//!
//! Exposes the task lifecycle (create, inspect, report status), agent
//! registration and discovery, token issuance, and health/status probes,
//! all backed by a shared [`triagent_orchestrator::Orchestrator`].

/// Error-to-response mapping.
pub mod error;
/// Request authentication.
pub mod middleware;
/// Route table and handlers.
pub mod server;

pub use error::ApiError;
pub use middleware::AuthIdentity;
pub use server::GatewayServer;
