//! Config structs for sessions and the agent runner.
//!
//! These are lightweight serde types; defaults match the reference
//! behavior so an empty config section yields a working setup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MCP server connection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Configuration for spawning one MCP tool server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// The command to spawn (e.g. `"toolwire-server"`).
    pub command: String,

    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,

    /// Optional environment variables to set on the spawned process.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Bounded wait for the `initialize` handshake, in milliseconds.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Bounded wait for any single request/response cycle, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl McpServerConfig {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: HashMap::new(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retry policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Exponential backoff parameters for the guarded agent step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Cap on the backoff curve, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Total attempt budget (first try included).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_delay_ms() -> u64 {
    2_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runner pacing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Pacing for the sequential runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Unconditional sleep before every guarded step, in milliseconds.
    /// Respects an external rate limit; independent of the backoff curve.
    #[serde(default = "default_pace_delay_ms")]
    pub pace_delay_ms: u64,

    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_pace_delay_ms() -> u64 {
    2_000
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            pace_delay_ms: default_pace_delay_ms(),
            retry: RetryConfig::default(),
        }
    }
}

impl RunnerConfig {
    pub fn pace_delay(&self) -> Duration {
        Duration::from_millis(self.pace_delay_ms)
    }
}
