use crate::model::VendorId;

/// Errors yielded by a `StreamTransport` while opening or consuming a
/// particle stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The stream was cancelled through the run's abort signal.
    #[error("stream cancelled")]
    Cancelled,
    /// Network or remote failure (connection reset, HTTP status, etc.).
    #[error("transport error ({vendor}): {message}")]
    Transport {
        vendor: VendorId,
        message: String,
        status_code: Option<u16>,
    },
    /// Anything else the transport could not classify.
    #[error("{message}")]
    Other { message: String },
}

impl TransportError {
    /// Creates a transport-level failure.
    pub fn transport(
        vendor: impl Into<VendorId>,
        message: impl Into<String>,
        status_code: Option<u16>,
    ) -> Self {
        Self::Transport {
            vendor: vendor.into(),
            message: message.into(),
            status_code,
        }
    }

    /// Creates an unclassified failure.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Returns true when the error reports a cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Top-level error type for the public harness API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HarnessError {
    /// Invalid harness or model configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid caller input to the builder API.
    #[error("validation error: {0}")]
    Validation(String),
    /// The access resolver could not resolve the model.
    #[error("access error: {0}")]
    Access(String),
    /// The request builder rejected the chat history.
    #[error("request error: {0}")]
    Request(String),
    /// Transport error surfaced outside the particle stream.
    #[error(transparent)]
    Transport(TransportError),
    /// Internal protocol misuse or invariant violation.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl HarnessError {
    pub(crate) fn protocol_msg(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}

impl From<TransportError> for HarnessError {
    fn from(value: TransportError) -> Self {
        HarnessError::Transport(value)
    }
}

/// Turns a transport error into the text placed in an error fragment.
pub trait ErrorPresenter: Send + Sync {
    /// Returns a human-presentable message for `error`.
    fn present(&self, error: &TransportError) -> String;
}

/// Presenter that uses the error's `Display` output, with a friendlier
/// wording for well-known HTTP statuses.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlainErrorPresenter;

impl ErrorPresenter for PlainErrorPresenter {
    fn present(&self, error: &TransportError) -> String {
        match error {
            TransportError::Transport {
                vendor,
                message,
                status_code: Some(status),
            } => {
                let hint = match status {
                    401 | 403 => "access was denied",
                    404 => "the model or endpoint was not found",
                    429 => "the service is rate limiting requests",
                    500..=599 => "the service had an internal error",
                    _ => "the request failed",
                };
                format!("{vendor}: {hint} (status {status}): {message}")
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_cancelled_is_reported_as_cancelled() {
        assert!(TransportError::Cancelled.is_cancelled());
        assert!(!TransportError::transport("openai", "reset", None).is_cancelled());
        assert!(!TransportError::other("aborted").is_cancelled());
    }

    #[test]
    fn plain_presenter_adds_status_hint() {
        let message = PlainErrorPresenter.present(&TransportError::transport(
            "anthropic",
            "slow down",
            Some(429),
        ));
        assert_eq!(
            message,
            "anthropic: the service is rate limiting requests (status 429): slow down"
        );
    }

    #[test]
    fn plain_presenter_falls_back_to_display() {
        let err = TransportError::transport("openai", "connection reset", None);
        assert_eq!(
            PlainErrorPresenter.present(&err),
            "transport error (openai): connection reset"
        );
    }
}
