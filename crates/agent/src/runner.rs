//! Sequential runner for guarded agent steps.
//!
//! The runner owns pacing and retry: an unconditional sleep before every
//! top-level step (respecting an external rate limit, independent of the
//! backoff curve), then the step wrapped in the [`RetryPolicy`] with
//! [`AgentError::ResourceExhausted`] as the only retryable class.

use std::time::Duration;

use async_trait::async_trait;

use tw_domain::config::RunnerConfig;
use tw_domain::ConversationTurn;

use crate::retry::RetryPolicy;

/// Errors an agent step can produce.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// A rate/quota limit was hit; expected to succeed after waiting.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The tool session failed underneath the agent.
    #[error("tool session: {0}")]
    Session(String),

    /// Any other failure of the agent backend.
    #[error("agent failed: {0}")]
    Failed(String),
}

impl AgentError {
    /// The only error class eligible for retry.
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, Self::ResourceExhausted(_))
    }
}

/// Opaque agent collaborator.
///
/// One step takes the user's query and returns the classified turns it
/// produced; internally it may issue any number of tool calls through an
/// invocation dispatcher before returning.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn step(&self, query: &str) -> Result<Vec<ConversationTurn>, AgentError>;
}

/// Paces and retries agent steps, one at a time.
pub struct Runner {
    policy: RetryPolicy,
    pace_delay: Duration,
}

impl Runner {
    pub fn new(config: &RunnerConfig) -> Self {
        Self {
            policy: RetryPolicy::from_config(&config.retry),
            pace_delay: config.pace_delay(),
        }
    }

    /// Run one guarded step for `query`.
    ///
    /// The user's query leads the returned turns so the sequence reads as
    /// a complete exchange.
    pub async fn run_query(
        &self,
        agent: &dyn Agent,
        query: &str,
    ) -> Result<Vec<ConversationTurn>, AgentError> {
        tokio::time::sleep(self.pace_delay).await;

        tracing::info!(query, "running agent step");
        let turns = self
            .policy
            .run(AgentError::is_resource_exhausted, || agent.step(query))
            .await?;

        let mut out = Vec::with_capacity(turns.len() + 1);
        out.push(ConversationTurn::user(query));
        out.extend(turns);
        Ok(out)
    }

    /// Run a batch of queries strictly in order, stopping at the first
    /// step that fails past its retry budget.
    pub async fn run_all(
        &self,
        agent: &dyn Agent,
        queries: &[&str],
    ) -> Result<Vec<Vec<ConversationTurn>>, AgentError> {
        let mut exchanges = Vec::with_capacity(queries.len());
        for query in queries {
            exchanges.push(self.run_query(agent, query).await?);
        }
        Ok(exchanges)
    }
}
