use crate::generator::{GenerationMetrics, TokenStopReason};

/// One atomic increment of a remote generation stream.
///
/// Particles are tagged on the wire so a transport can decode them straight
/// from JSON lines or SSE `data:` payloads.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "p", rename_all = "kebab-case")]
pub enum Particle {
    /// Visible text appended to the answer.
    TextDelta { text: String },
    /// Reasoning text appended to the current reasoning block.
    ReasoningDelta { text: String },
    /// A new tool invocation begins.
    ToolCallStart { id: String, name: String },
    /// More argument text for the tool invocation in progress.
    ToolCallArgsDelta { args: String },
    /// The vendor reported the canonical model name.
    SetModel { name: String },
    /// Partial metrics; present fields replace earlier values.
    SetMetrics { metrics: GenerationMetrics },
    /// The vendor signalled the end of generation.
    End {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<TokenStopReason>,
    },
    /// The vendor reported an error inside the stream.
    Issue { message: String },
}

impl Particle {
    pub fn text(text: impl Into<String>) -> Self {
        Self::TextDelta { text: text.into() }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self::ReasoningDelta { text: text.into() }
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ToolCallStart {
            id: id.into(),
            name: name.into(),
        }
    }

    pub fn tool_args(args: impl Into<String>) -> Self {
        Self::ToolCallArgsDelta { args: args.into() }
    }

    pub fn end(reason: TokenStopReason) -> Self {
        Self::End {
            reason: Some(reason),
        }
    }

    /// Short label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::TextDelta { .. } => "text-delta",
            Self::ReasoningDelta { .. } => "reasoning-delta",
            Self::ToolCallStart { .. } => "tool-call-start",
            Self::ToolCallArgsDelta { .. } => "tool-call-args-delta",
            Self::SetModel { .. } => "set-model",
            Self::SetMetrics { .. } => "set-metrics",
            Self::End { .. } => "end",
            Self::Issue { .. } => "issue",
        }
    }
}
