//! Security primitives for the Triagent framework.
//!
//! Provides the secure channel between agents — API-key provisioning,
//! capability-scoped signed tokens, field-level payload encryption — and
//! the append-only lifecycle audit log.
//!
//! # Main types
//!
//! - [`AgentKeyring`] — Per-agent API key provisioning and verification.
//! - [`TokenIssuer`] — HMAC-signed, capability-scoped, time-limited tokens.
//! - [`FieldCipher`] — Transparent encryption of sensitive payload fields.
//! - [`AuditLog`] — Append-only lifecycle audit trail.

/// Append-only audit logging.
pub mod audit;
/// API keys and signed capability tokens.
pub mod auth;
/// Field-level payload encryption.
pub mod crypto;

pub use audit::AuditLog;
pub use auth::{AgentKeyring, SignedToken, TokenClaims, TokenIssuer};
pub use crypto::{FieldCipher, CIPHERTEXT_TAG, DECRYPT_FAILED_MARKER};
