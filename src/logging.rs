//! Tracing setup and the bridge between the protocol library's log lines and
//! `tracing`.
//!
//! The service logs under its own crate target. Lines produced by the
//! protocol bridge are re-emitted under [`PROTOCOL_TARGET`] so they can be
//! filtered separately through `logging.protocol_level`.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Target for log lines that originate in the protocol bridge.
pub const PROTOCOL_TARGET: &str = "wa_bridge::protocol";

/// Level names understood in configuration and in bridge log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Silent,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Parse a level name. `fatal` folds into `error`, `off` into `silent`.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "silent" | "off" => Some(Self::Silent),
            "fatal" | "error" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" => Some(Self::Trace),
            _ => None,
        }
    }

    /// The `EnvFilter` directive for this level.
    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Silent => "off",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// Build the filter string for the given service and protocol levels.
///
/// A service level that is not a plain level name is passed through as a raw
/// directive, so `level = "wa_bridge=debug,tower_http=info"` keeps working.
pub fn filter_directives(level: &str, protocol_level: &str) -> String {
    let base = LogLevel::parse(level).map_or_else(|| level.trim().to_string(), |l| {
        l.as_directive().to_string()
    });
    let protocol = LogLevel::parse(protocol_level).unwrap_or(LogLevel::Warn);
    format!("{base},{PROTOCOL_TARGET}={}", protocol.as_directive())
}

/// Install the global subscriber. `RUST_LOG` wins over the config file.
pub fn init(config: &LoggingConfig) {
    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| filter_directives(&config.level, &config.protocol_level));
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();
}

/// Re-emit one log line produced by the protocol bridge.
pub fn protocol_log(level: LogLevel, session_id: &str, message: &str) {
    match level {
        LogLevel::Silent => {}
        LogLevel::Error => tracing::error!(target: PROTOCOL_TARGET, session = session_id, "{message}"),
        LogLevel::Warn => tracing::warn!(target: PROTOCOL_TARGET, session = session_id, "{message}"),
        LogLevel::Info => tracing::info!(target: PROTOCOL_TARGET, session = session_id, "{message}"),
        LogLevel::Debug => tracing::debug!(target: PROTOCOL_TARGET, session = session_id, "{message}"),
        LogLevel::Trace => tracing::trace!(target: PROTOCOL_TARGET, session = session_id, "{message}"),
    }
}
