//! Invocation dispatcher — bridges the orchestration layer's logical tool
//! calls and the session's protocol-level `tools/call`.
//!
//! The orchestration layer is sequential: one call in flight at a time,
//! results reported back in the order the calls were issued. Handler
//! failures are folded into the resulting turn as error-tagged output,
//! never raised as session errors.

use std::sync::Arc;

use tw_domain::{ConversationTurn, ToolCall};

use crate::session::{Session, SessionError};

/// Turns logical [`ToolCall`]s into session invocations.
pub struct InvocationDispatcher {
    session: Arc<Session>,
}

impl InvocationDispatcher {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// The underlying session.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Invoke one tool and fold the outcome into a conversation turn.
    ///
    /// Only session-level failures (closed, timeout, state errors) surface
    /// as `Err`; a failing handler is a normal `ToolOutput` with
    /// `is_error` set.
    pub async fn invoke(&self, call: &ToolCall) -> Result<ConversationTurn, SessionError> {
        tracing::debug!(call_id = %call.call_id, tool = %call.tool_name, "dispatching tool call");
        let outcome = self
            .session
            .call_tool(&call.tool_name, call.arguments.clone())
            .await?;
        Ok(ConversationTurn::tool_output(&call.tool_name, &outcome))
    }

    /// Invoke a batch sequentially, preserving issue order in the output.
    pub async fn invoke_all(&self, calls: &[ToolCall]) -> Result<Vec<ConversationTurn>, SessionError> {
        let mut turns = Vec::with_capacity(calls.len());
        for call in calls {
            turns.push(self.invoke(call).await?);
        }
        Ok(turns)
    }
}
