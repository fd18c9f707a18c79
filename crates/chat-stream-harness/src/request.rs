use crate::content::{ChatMessage, ChatRole, FragmentPart};
use crate::errors::HarnessError;

/// Outbound generate-request payload, handed to the transport as is.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GenerateRequest {
    /// System instruction, when the history carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,
    /// User and assistant turns in order.
    pub chat_sequence: Vec<ChatMessage>,
}

/// Builds the generate request from a chat history.
pub trait RequestBuilder: Send + Sync {
    fn build(&self, history: &[ChatMessage]) -> Result<GenerateRequest, HarnessError>;
}

/// Request builder that folds system messages into the system instruction and
/// forwards the remaining turns without error fragments.
#[derive(Clone, Copy, Debug, Default)]
pub struct HistoryRequestBuilder;

impl RequestBuilder for HistoryRequestBuilder {
    fn build(&self, history: &[ChatMessage]) -> Result<GenerateRequest, HarnessError> {
        let mut system_parts = Vec::new();
        let mut chat_sequence = Vec::new();

        for message in history {
            if message.role == ChatRole::System {
                for fragment in &message.fragments {
                    if let FragmentPart::Text { text } = &fragment.part
                        && !text.trim().is_empty()
                    {
                        system_parts.push(text.trim().to_string());
                    }
                }
                continue;
            }
            let fragments: Vec<_> = message
                .fragments
                .iter()
                .filter(|f| !f.is_error())
                .cloned()
                .collect();
            if fragments.is_empty() {
                continue;
            }
            chat_sequence.push(ChatMessage {
                role: message.role,
                fragments,
            });
        }

        if chat_sequence.is_empty() {
            return Err(HarnessError::Request(
                "chat history has no user or assistant content".into(),
            ));
        }

        Ok(GenerateRequest {
            system_message: (!system_parts.is_empty()).then(|| system_parts.join("\n\n")),
            chat_sequence,
        })
    }
}
