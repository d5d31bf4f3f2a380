use serde::{Deserialize, Serialize};

/// A logical tool invocation requested by the agent.
/// The dispatcher turns this into a protocol-level `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// The decoded outcome of a tool invocation.
///
/// Handler failures travel as ordinary values, never as session errors:
/// a failing tool is a normal result for the orchestration layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "text")]
pub enum ToolOutcome {
    Ok(String),
    Err(String),
}

impl ToolOutcome {
    pub fn is_err(&self) -> bool {
        matches!(self, Self::Err(_))
    }

    /// The carried text, success or failure.
    pub fn text(&self) -> &str {
        match self {
            Self::Ok(t) | Self::Err(t) => t.as_str(),
        }
    }
}

/// One displayable element of an agent step, classified by role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ConversationTurn {
    /// Text produced by the model.
    #[serde(rename = "assistant")]
    AssistantText { content: String },

    /// Text originating from the user.
    #[serde(rename = "user")]
    UserText { content: String },

    /// Output of a tool the agent invoked during the step.
    #[serde(rename = "tool")]
    ToolOutput {
        tool_name: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

// ── Convenience constructors ───────────────────────────────────────

impl ConversationTurn {
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::AssistantText { content: text.into() }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::UserText { content: text.into() }
    }

    pub fn tool_output(tool_name: impl Into<String>, outcome: &ToolOutcome) -> Self {
        Self::ToolOutput {
            tool_name: tool_name.into(),
            content: outcome.text().to_string(),
            is_error: outcome.is_err(),
        }
    }
}
