//! Tool registry — maps tool names to typed handlers.
//!
//! Registration validates the input schema and rejects duplicate names up
//! front, so a misconfigured server fails at startup rather than at call
//! time. Dispatch serializes handler execution: the table-store lock is
//! held across the handler call, which is what keeps the non-thread-safe
//! reference handlers correct without pushing locking into the storage
//! layer.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::store::TableStore;

/// Implement this trait to handle tool calls.
///
/// Handlers are synchronous and run one at a time; `store` is the shared
/// table store, exclusively held for the duration of the call.
pub trait ServerTool: Send + Sync + 'static {
    fn call(&self, store: &mut TableStore, args: Value) -> Result<Value, String>;
}

/// Blanket impl so plain functions and closures register directly.
impl<F> ServerTool for F
where
    F: Fn(&mut TableStore, Value) -> Result<Value, String> + Send + Sync + 'static,
{
    fn call(&self, store: &mut TableStore, args: Value) -> Result<Value, String> {
        self(store, args)
    }
}

/// The published description of one tool: name, doc string, and the
/// JSON Schema of its arguments. Serializes into the `tools/list` shape.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// Configuration errors raised at registration time.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate tool name: {0}")]
    DuplicateTool(String),

    #[error("invalid schema for tool {tool}: {reason}")]
    InvalidSchema { tool: String, reason: String },
}

/// Call-time errors. These surface to the client as failed-result values;
/// they never crash the server.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("tool {tool} failed: {message}")]
    HandlerFailed { tool: String, message: String },
}

struct RegisteredTool {
    spec: ToolSpec,
    handler: Arc<dyn ServerTool>,
}

/// Registry of tool specs and handlers, owning the table store.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    store: Mutex<TableStore>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Rejects duplicate names and malformed schemas —
    /// the schema must be a JSON object describing an `object` type.
    pub fn register<T: ServerTool>(&mut self, spec: ToolSpec, handler: T) -> Result<&mut Self, RegistryError> {
        validate_schema(&spec)?;
        if self.tools.contains_key(&spec.name) {
            return Err(RegistryError::DuplicateTool(spec.name));
        }
        let name = spec.name.clone();
        self.tools.insert(
            name,
            RegisteredTool {
                spec,
                handler: Arc::new(handler),
            },
        );
        Ok(self)
    }

    /// The published tool set, sorted by name for a stable wire order.
    pub fn descriptors(&self) -> Vec<&ToolSpec> {
        let mut specs: Vec<_> = self.tools.values().map(|t| &t.spec).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool by name.
    ///
    /// Unknown names and handler failures (including panics, caught at
    /// this edge) come back as [`ToolError`]; nothing escapes past the
    /// registry boundary. The store lock is held across the handler call,
    /// so dispatch is serialized.
    pub fn dispatch(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        let mut store = self.store.lock();
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
            tool.handler.call(&mut store, args)
        }));

        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => {
                tracing::debug!(tool = name, %message, "handler returned a domain error");
                Err(ToolError::HandlerFailed {
                    tool: name.to_string(),
                    message,
                })
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".to_string());
                tracing::error!(tool = name, %message, "handler panicked");
                Err(ToolError::HandlerFailed {
                    tool: name.to_string(),
                    message,
                })
            }
        }
    }
}

fn validate_schema(spec: &ToolSpec) -> Result<(), RegistryError> {
    let Some(obj) = spec.input_schema.as_object() else {
        return Err(RegistryError::InvalidSchema {
            tool: spec.name.clone(),
            reason: "schema must be a JSON object".into(),
        });
    };
    match obj.get("type").and_then(Value::as_str) {
        Some("object") => Ok(()),
        Some(other) => Err(RegistryError::InvalidSchema {
            tool: spec.name.clone(),
            reason: format!("schema type must be \"object\", got \"{other}\""),
        }),
        None => Err(RegistryError::InvalidSchema {
            tool: spec.name.clone(),
            reason: "schema is missing \"type\"".into(),
        }),
    }
}
