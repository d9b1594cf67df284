//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables**: `WA_BRIDGE_API_TOKEN`, `WA_BRIDGE_LISTEN`,
//!    `WA_BRIDGE_SESSION_ID`, `WA_BRIDGE_SESSIONS_DIR`
//! 2. **Config file**: path via `--config <path>`, or `wa-bridge.toml` in CWD
//! 3. **Compiled defaults**: see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:3000"
//! qr_timeout_ms = 20000
//! auth_timeout_ms = 60000
//! max_upload_bytes = 5242880   # 5 MB
//! static_dir = "public"         # optional
//! cors = true
//!
//! [auth]
//! api_token = "your-secret-token"
//!
//! [session]
//! id = "default"
//! sessions_dir = "sessions"
//!
//! [connection]
//! bridge_command = ["node", "bridge/baileys.mjs"]
//! version_url = "https://raw.githubusercontent.com/WhiskeySockets/Baileys/master/src/Defaults/baileys-version.json"
//! fallback_version = "2.3000.1015901307"
//! browser = ["WhatsApp API", "Chrome", "4.0.0"]
//! sync_full_history = true
//! send_timeout_ms = 30000
//! close_timeout_ms = 5000
//!
//! [connection.reconnect]
//! initial_delay_ms = 1000
//! max_delay_ms = 30000
//! max_attempts = 10
//!
//! [bulk]
//! max_recipients = 1000
//! concurrency = 1
//! delay_ms = 0
//!
//! [messages]
//! auto_reply_ping = true
//! auto_reply_echo = false
//!
//! [logging]
//! level = "info"
//! protocol_level = "warn"
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

const DEFAULT_CONFIG_FILE: &str = "wa-bridge.toml";

/// Fatal configuration problems, reported once at startup.
#[derive(Debug)]
pub enum ConfigError {
    Read { path: PathBuf, source: std::io::Error },
    Parse { path: PathBuf, source: toml::de::Error },
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read { path, source } => {
                write!(f, "failed to read config file {}: {source}", path.display())
            }
            Self::Parse { path, source } => {
                write!(f, "failed to parse config file {}: {source}", path.display())
            }
            Self::Invalid(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub bulk: BulkConfig,
    #[serde(default)]
    pub messages: MessagesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `0.0.0.0:3000`).
    #[serde(default = "default_listen")]
    pub listen: String,
    /// How long `GET /qr` waits for a pairing code (default 20 000).
    #[serde(default = "default_qr_timeout_ms")]
    pub qr_timeout_ms: u64,
    /// How long `POST /auth` waits for the session to open (default 60 000).
    #[serde(default = "default_auth_timeout_ms")]
    pub auth_timeout_ms: u64,
    /// Request body limit for the API routes, spreadsheet uploads included.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Directory served for unmatched paths. Disabled when unset.
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
    /// Attach a permissive CORS layer (default true).
    #[serde(default = "default_true")]
    pub cors: bool,
}

/// Authentication settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Static API token. Override with `WA_BRIDGE_API_TOKEN`.
    /// Defaults to `"change-me"` which triggers a startup warning.
    #[serde(default = "default_api_token")]
    pub api_token: String,
}

/// Which session to run and where its credentials live.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_id")]
    pub id: String,
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: PathBuf,
}

/// Protocol bridge and connection lifecycle settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// Program and arguments of the protocol bridge process.
    #[serde(default = "default_bridge_command")]
    pub bridge_command: Vec<String>,
    /// Where the latest protocol version is published.
    #[serde(default = "default_version_url")]
    pub version_url: String,
    /// Dotted version used when the lookup fails. No fallback when unset.
    #[serde(default = "default_fallback_version")]
    pub fallback_version: Option<String>,
    /// Browser identity `[name, client, version]` presented at pairing.
    #[serde(default = "default_browser")]
    pub browser: [String; 3],
    #[serde(default = "default_true")]
    pub sync_full_history: bool,
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// Backoff after a non-terminal close.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_reconnect_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Consecutive failures tolerated before the session is marked failed.
    #[serde(default = "default_reconnect_max_attempts")]
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkConfig {
    #[serde(default = "default_bulk_max_recipients")]
    pub max_recipients: usize,
    /// Sends in flight at once. `1` sends strictly one after another.
    #[serde(default = "default_bulk_concurrency")]
    pub concurrency: usize,
    /// Pause between sequential sends.
    #[serde(default)]
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagesConfig {
    /// Answer an incoming "ping" with "Pong!".
    #[serde(default = "default_true")]
    pub auto_reply_ping: bool,
    /// Answer any other text with "You said: <text>".
    #[serde(default)]
    pub auto_reply_echo: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Service log level or filter directive (default `info`).
    /// Accepts `silent`. Overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Level for lines re-emitted from the protocol bridge (default `warn`).
    #[serde(default = "default_protocol_log_level")]
    pub protocol_level: String,
}

fn default_listen() -> String {
    "0.0.0.0:3000".to_string()
}
fn default_qr_timeout_ms() -> u64 {
    20_000
}
fn default_auth_timeout_ms() -> u64 {
    60_000
}
fn default_max_upload_bytes() -> usize {
    5 * 1024 * 1024 // 5 MB
}
fn default_true() -> bool {
    true
}
fn default_api_token() -> String {
    "change-me".to_string()
}
fn default_session_id() -> String {
    "default".to_string()
}
fn default_sessions_dir() -> PathBuf {
    PathBuf::from("sessions")
}
fn default_bridge_command() -> Vec<String> {
    vec!["node".to_string(), "bridge/baileys.mjs".to_string()]
}
fn default_version_url() -> String {
    "https://raw.githubusercontent.com/WhiskeySockets/Baileys/master/src/Defaults/baileys-version.json"
        .to_string()
}
fn default_fallback_version() -> Option<String> {
    Some("2.3000.1015901307".to_string())
}
fn default_browser() -> [String; 3] {
    [
        "WhatsApp API".to_string(),
        "Chrome".to_string(),
        "4.0.0".to_string(),
    ]
}
fn default_send_timeout_ms() -> u64 {
    30_000
}
fn default_close_timeout_ms() -> u64 {
    5_000
}
fn default_reconnect_initial_delay_ms() -> u64 {
    1_000
}
fn default_reconnect_max_delay_ms() -> u64 {
    30_000
}
fn default_reconnect_max_attempts() -> u32 {
    10
}
fn default_bulk_max_recipients() -> usize {
    1_000
}
fn default_bulk_concurrency() -> usize {
    1
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_protocol_log_level() -> String {
    "warn".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            qr_timeout_ms: default_qr_timeout_ms(),
            auth_timeout_ms: default_auth_timeout_ms(),
            max_upload_bytes: default_max_upload_bytes(),
            static_dir: None,
            cors: true,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_token: default_api_token(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            id: default_session_id(),
            sessions_dir: default_sessions_dir(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            bridge_command: default_bridge_command(),
            version_url: default_version_url(),
            fallback_version: default_fallback_version(),
            browser: default_browser(),
            sync_full_history: true,
            send_timeout_ms: default_send_timeout_ms(),
            close_timeout_ms: default_close_timeout_ms(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_reconnect_initial_delay_ms(),
            max_delay_ms: default_reconnect_max_delay_ms(),
            max_attempts: default_reconnect_max_attempts(),
        }
    }
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            max_recipients: default_bulk_max_recipients(),
            concurrency: default_bulk_concurrency(),
            delay_ms: 0,
        }
    }
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            auto_reply_ping: true,
            auto_reply_echo: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            protocol_level: default_protocol_log_level(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file. Otherwise looks for
    /// `wa-bridge.toml` in the current directory, falling back to compiled
    /// defaults.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(Path::new(p))?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };

        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(token) = var("WA_BRIDGE_API_TOKEN") {
            self.auth.api_token = token;
        }
        if let Some(listen) = var("WA_BRIDGE_LISTEN") {
            self.server.listen = listen;
        }
        if let Some(id) = var("WA_BRIDGE_SESSION_ID") {
            self.session.id = id;
        }
        if let Some(dir) = var("WA_BRIDGE_SESSIONS_DIR") {
            self.session.sessions_dir = PathBuf::from(dir);
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.bridge_command.is_empty() {
            return Err(ConfigError::Invalid(
                "connection.bridge_command must name a program".into(),
            ));
        }
        if self.bulk.max_recipients == 0 {
            return Err(ConfigError::Invalid(
                "bulk.max_recipients must be at least 1".into(),
            ));
        }
        if self.connection.reconnect.max_delay_ms < self.connection.reconnect.initial_delay_ms {
            return Err(ConfigError::Invalid(
                "connection.reconnect.max_delay_ms is below initial_delay_ms".into(),
            ));
        }
        Ok(())
    }

    /// True when the API token was never changed from the shipped default.
    pub fn uses_default_token(&self) -> bool {
        self.auth.api_token == default_api_token()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:3000");
        assert_eq!(config.server.qr_timeout_ms, 20_000);
        assert_eq!(config.session.id, "default");
        assert_eq!(config.connection.browser[0], "WhatsApp API");
        assert_eq!(config.connection.reconnect.max_attempts, 10);
        assert!(config.uses_default_token());
    }

    #[test]
    fn nested_sections_override_defaults() {
        let config: Config = toml::from_str(
            r#"
            [session]
            id = "shop"

            [connection]
            bridge_command = ["bun", "bridge.ts"]
            fallback_version = "2.3000.1"

            [connection.reconnect]
            initial_delay_ms = 250
            max_attempts = 3

            [bulk]
            concurrency = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.session.id, "shop");
        assert_eq!(config.connection.bridge_command, ["bun", "bridge.ts"]);
        assert_eq!(config.connection.reconnect.initial_delay_ms, 250);
        assert_eq!(config.connection.reconnect.max_delay_ms, 30_000);
        assert_eq!(config.connection.reconnect.max_attempts, 3);
        assert_eq!(config.bulk.concurrency, 4);
        assert_eq!(config.bulk.max_recipients, 1_000);
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = Config::default();
        config.apply_env(|name| match name {
            "WA_BRIDGE_API_TOKEN" => Some("secret".into()),
            "WA_BRIDGE_SESSIONS_DIR" => Some("/var/lib/wa".into()),
            _ => None,
        });
        assert_eq!(config.auth.api_token, "secret");
        assert_eq!(config.session.sessions_dir, PathBuf::from("/var/lib/wa"));
        assert_eq!(config.server.listen, "0.0.0.0:3000");
        assert!(!config.uses_default_token());
    }

    #[test]
    fn rejects_empty_bridge_command() {
        let config: Config = toml::from_str("[connection]\nbridge_command = []").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
