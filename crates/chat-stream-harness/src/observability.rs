//! Process-wide tracing setup for hosts embedding the harness.
//!
//! Runs and generations open `chat_run` and `generate` spans; every event
//! inside them carries the model, context name and run id.

use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use crate::config::parse_bool;

/// Harness events at `info`, everything else at `warn`.
pub const DEFAULT_LOG_FILTER: &str = "warn,chat_stream_harness=info";

const DEFAULT_JSON_FILE_NAME: &str = "chat-stream.logs.jsonl";

static INIT: OnceCell<()> = OnceCell::new();

/// Where and how much the harness logs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogSettings {
    pub enabled: bool,
    /// `EnvFilter` directives.
    pub filter: String,
    /// JSONL output file; stderr when unset.
    pub json_path: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            filter: DEFAULT_LOG_FILTER.to_string(),
            json_path: None,
        }
    }
}

impl LogSettings {
    /// Reads the settings from the process environment.
    ///
    /// - `CHAT_STREAM_OBSERVABILITY_ENABLED`: on/off flag, unparseable values keep logging on.
    /// - `CHAT_STREAM_LOG_LEVEL`, then `RUST_LOG`: filter directives.
    /// - `CHAT_STREAM_JSON_LOG_PATH`: write JSONL to this file instead of stderr.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = lookup("CHAT_STREAM_OBSERVABILITY_ENABLED")
            .and_then(|raw| parse_bool(&raw))
            .unwrap_or(true);
        let filter = ["CHAT_STREAM_LOG_LEVEL", "RUST_LOG"]
            .into_iter()
            .filter_map(|key| lookup(key))
            .map(|raw| raw.trim().to_string())
            .find(|raw| !raw.is_empty() && EnvFilter::try_new(raw).is_ok())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
        let json_path = lookup("CHAT_STREAM_JSON_LOG_PATH")
            .filter(|raw| !raw.trim().is_empty())
            .map(PathBuf::from);
        Self {
            enabled,
            filter,
            json_path,
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    }
}

/// Splits a log path into the directory and file name the appender expects.
fn split_log_path(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_JSON_FILE_NAME)
        .to_string();
    (dir, file_name)
}

/// Installs the global subscriber from [`LogSettings::from_env`].
///
/// Only the first call in a process has any effect.
pub fn init_observability() {
    init_observability_with(LogSettings::from_env());
}

/// Installs the global subscriber from explicit settings; first call wins.
pub fn init_observability_with(settings: LogSettings) {
    INIT.get_or_init(|| {
        if !settings.enabled {
            return;
        }
        let filter = settings.env_filter();
        match &settings.json_path {
            Some(path) => {
                let (dir, file_name) = split_log_path(path);
                let _ = std::fs::create_dir_all(&dir);
                let json_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_writer(tracing_appender::rolling::never(dir, file_name));
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(json_layer)
                    .try_init();
            }
            None => {
                let console_layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr);
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(console_layer)
                    .try_init();
            }
        }
    });
}
