//! `tw-mcp-client` — MCP (Model Context Protocol) client for toolwire.
//!
//! This crate provides:
//! - JSON-RPC 2.0 protocol types for communicating with MCP tool servers.
//! - A frame-level transport layer: a stdio transport that spawns child
//!   processes and communicates over stdin/stdout, and an in-memory duplex
//!   transport for in-process wiring.
//! - A [`Session`] state machine that performs the handshake, discovers
//!   tools, and matches responses to requests by correlation id.
//! - An [`InvocationDispatcher`] that turns logical tool calls into
//!   protocol requests and folds results back into conversation turns.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tw_domain::config::McpServerConfig;
//! use tw_mcp_client::{Session, StdioTransport};
//!
//! let config = McpServerConfig::new("toolwire-server", vec![]);
//! let transport = StdioTransport::spawn(&config)?;
//! let session = Session::connect(Arc::new(transport), &config);
//!
//! session.initialize().await?;
//! for tool in session.list_tools().await? {
//!     println!("{}: {}", tool.name, tool.description);
//! }
//! let outcome = session.call_tool("add", json!({"a": 3, "b": 4})).await?;
//! session.close().await;
//! ```

pub mod dispatcher;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-exports for convenience.
pub use dispatcher::InvocationDispatcher;
pub use protocol::ToolDescriptor;
pub use session::{Session, SessionError, SessionState};
pub use transport::{DuplexTransport, StdioTransport, Transport, TransportError};
