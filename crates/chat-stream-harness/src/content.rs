use std::fmt;

/// Unique id of a content fragment within a message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct FragmentId(pub uuid::Uuid);

impl FragmentId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for FragmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Payload of a content fragment.
///
/// The enum is non-exhaustive so new content kinds can be added without
/// breaking callers.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "pt", rename_all = "kebab-case")]
#[non_exhaustive]
pub enum FragmentPart {
    /// Visible model output.
    Text { text: String },
    /// Model reasoning shown separately from the answer.
    Reasoning { text: String },
    /// A function/tool invocation requested by the model.
    ToolCall {
        id: String,
        name: String,
        /// Raw argument text as streamed.
        args: String,
        /// Arguments parsed as JSON once the fragment settles.
        #[serde(skip_serializing_if = "Option::is_none")]
        parsed_args: Option<serde_json::Value>,
    },
    /// An error notice placed in the message body.
    Error { message: String },
}

impl FragmentPart {
    fn same_kind(&self, other: &FragmentPart) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// One ordered unit of generated message content.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ContentFragment {
    pub id: FragmentId,
    pub part: FragmentPart,
    /// True while later particles may still extend this fragment.
    pub in_progress: bool,
}

impl ContentFragment {
    /// Creates a settled fragment.
    pub fn new(part: FragmentPart) -> Self {
        Self {
            id: FragmentId::new(),
            part,
            in_progress: false,
        }
    }

    /// Creates a fragment that later particles may extend.
    pub fn streaming(part: FragmentPart) -> Self {
        Self {
            in_progress: true,
            ..Self::new(part)
        }
    }

    /// Creates a settled text fragment.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(FragmentPart::Text { text: text.into() })
    }

    /// Creates a settled error fragment.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(FragmentPart::Error {
            message: message.into(),
        })
    }

    /// Returns true for error fragments.
    pub fn is_error(&self) -> bool {
        matches!(self.part, FragmentPart::Error { .. })
    }

    /// Returns the error message of an error fragment.
    pub fn error_message(&self) -> Option<&str> {
        match &self.part {
            FragmentPart::Error { message } => Some(message),
            _ => None,
        }
    }

    /// Returns true when this fragment is in progress and of the same kind as `part`.
    pub(crate) fn accepts(&self, part: &FragmentPart) -> bool {
        self.in_progress && self.part.same_kind(part)
    }

    /// Brings this fragment up to date with a later state of the same fragment.
    ///
    /// Streamed text only grows, so only the new tail is copied. Falls back to
    /// a full copy when `later` is not an extension of `self`.
    fn catch_up(&mut self, later: &ContentFragment) {
        let extended = match (&mut self.part, &later.part) {
            (FragmentPart::Text { text }, FragmentPart::Text { text: more })
            | (FragmentPart::Reasoning { text }, FragmentPart::Reasoning { text: more }) => {
                append_tail(text, more)
            }
            (
                FragmentPart::ToolCall {
                    id,
                    name,
                    args,
                    parsed_args,
                },
                FragmentPart::ToolCall {
                    id: later_id,
                    name: later_name,
                    args: more,
                    parsed_args: later_parsed,
                },
            ) if id == later_id && name == later_name => {
                parsed_args.clone_from(later_parsed);
                append_tail(args, more)
            }
            _ => false,
        };
        if extended {
            self.in_progress = later.in_progress;
        } else {
            self.clone_from(later);
        }
    }
}

fn append_tail(text: &mut String, later: &str) -> bool {
    match later.get(text.len()..) {
        Some(tail) => {
            text.push_str(tail);
            true
        }
        None => false,
    }
}

/// Makes `dst` equal to `src`, a later state of the same fragment list.
///
/// Settled fragments already present in `dst` are left alone and in-progress
/// ones only receive their new tail, so keeping a copy of a growing message
/// costs time proportional to what changed.
pub(crate) fn sync_fragments(dst: &mut Vec<ContentFragment>, src: &[ContentFragment]) {
    dst.truncate(src.len());
    for (have, want) in dst.iter_mut().zip(src) {
        if have.id != want.id {
            have.clone_from(want);
        } else if have.in_progress {
            have.catch_up(want);
        }
    }
    let known = dst.len();
    dst.extend_from_slice(&src[known..]);
}

/// Concatenates the visible text fragments in order.
pub fn fragments_text(fragments: &[ContentFragment]) -> String {
    let mut out = String::new();
    for fragment in fragments {
        if let FragmentPart::Text { text } = &fragment.part {
            out.push_str(text);
        }
    }
    out
}

/// Author of a chat message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One entry of the chat history a generation is built from.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub fragments: Vec<ContentFragment>,
}

impl ChatMessage {
    /// Creates a message holding one text fragment.
    pub fn text(role: ChatRole, text: impl Into<String>) -> Self {
        Self {
            role,
            fragments: vec![ContentFragment::text(text)],
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::text(ChatRole::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(ChatRole::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(ChatRole::Assistant, text)
    }
}
