//! `tw-agent` — the orchestration layer.
//!
//! Defines the opaque [`Agent`] collaborator (an LLM-backed step that may
//! invoke tools through the dispatcher before returning), the
//! [`RetryPolicy`] that guards each step against transient
//! resource-exhaustion failures, and the sequential [`Runner`] that paces
//! and sequences guarded steps.

pub mod retry;
pub mod runner;

pub use retry::RetryPolicy;
pub use runner::{Agent, AgentError, Runner};
