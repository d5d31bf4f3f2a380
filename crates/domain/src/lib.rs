//! `tw-domain` — shared types for the toolwire crates.
//!
//! Holds the cross-crate error type, the conversation/tool value types
//! exchanged between the agent runner and the MCP client, and the config
//! structs used to spawn and pace sessions. No I/O lives here.

pub mod config;
pub mod error;
pub mod turn;

pub use error::{Error, Result};
pub use turn::{ConversationTurn, ToolCall, ToolOutcome};
