use crate::errors::HarnessError;

/// Defaults applied to every run started from a `Harness`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Throttle level for update delivery (0 disables throttling).
    pub default_throttle_level: u32,
    /// Whether runs ask the transport for incremental streaming.
    pub default_streaming: bool,
    /// Streaming context name used when a run does not set one.
    pub default_context_name: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            default_throttle_level: 1,
            default_streaming: true,
            default_context_name: "conversation".to_string(),
        }
    }
}

impl HarnessConfig {
    /// Builds a config from the environment, falling back to defaults.
    ///
    /// - `CHAT_STREAM_THROTTLE_LEVEL`: non-negative integer.
    /// - `CHAT_STREAM_STREAMING`: boolean (`true`/`false`, `1`/`0`, ...).
    /// - `CHAT_STREAM_CONTEXT_NAME`: non-empty string.
    pub fn from_env() -> Result<Self, HarnessError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, HarnessError> {
        let mut config = Self::default();
        if let Some(raw) = lookup("CHAT_STREAM_THROTTLE_LEVEL") {
            config.default_throttle_level = raw.trim().parse().map_err(|_| {
                HarnessError::Config(format!("invalid CHAT_STREAM_THROTTLE_LEVEL: {raw}"))
            })?;
        }
        if let Some(raw) = lookup("CHAT_STREAM_STREAMING") {
            config.default_streaming = parse_bool(&raw).ok_or_else(|| {
                HarnessError::Config(format!("invalid CHAT_STREAM_STREAMING: {raw}"))
            })?;
        }
        if let Some(raw) = lookup("CHAT_STREAM_CONTEXT_NAME") {
            if raw.trim().is_empty() {
                return Err(HarnessError::Config(
                    "CHAT_STREAM_CONTEXT_NAME must not be empty".into(),
                ));
            }
            config.default_context_name = raw.trim().to_string();
        }
        Ok(config)
    }

    /// Overrides the default throttle level.
    pub fn throttle_level(mut self, level: u32) -> Self {
        self.default_throttle_level = level;
        self
    }

    /// Overrides the default streaming flag.
    pub fn streaming(mut self, streaming: bool) -> Self {
        self.default_streaming = streaming;
        self
    }

    /// Overrides the default context name.
    pub fn context_name(mut self, name: impl Into<String>) -> Self {
        self.default_context_name = name.into();
        self
    }
}

pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}
