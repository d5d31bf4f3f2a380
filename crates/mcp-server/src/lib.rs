//! `tw-mcp-server` — the toolwire tool server.
//!
//! Provides a typed [`ToolRegistry`] (name -> schema + handler, validated
//! at startup), the built-in utility tool set, and a serve loop that
//! answers `initialize`, `tools/list`, and `tools/call` over a
//! newline-delimited JSON-RPC byte stream.
//!
//! The `toolwire-server` binary serves the default registry over
//! stdin/stdout, logging to stderr so stdout stays a clean protocol
//! channel.

pub mod registry;
pub mod serve;
pub mod store;
pub mod tools;

pub use registry::{RegistryError, ServerTool, ToolError, ToolRegistry, ToolSpec};
pub use serve::serve;
pub use store::TableStore;
pub use tools::default_registry;
