//! Seam between the connection manager and the WhatsApp protocol library.
//!
//! A [`Backend`] opens sockets for a session. Each socket comes with an event
//! stream ([`SocketEvent`]) that the connection manager drains in order.
//! Sending goes through the [`Socket`] handle.
//!
//! - `bridge`: drives the protocol library as a child process speaking
//!   JSON lines over stdio. Used in production.
//! - `mock`: in-memory backend for tests.

pub mod bridge;
#[cfg(test)]
pub mod mock;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::dispatch::MessageContent;
use crate::jid::Jid;

/// Events a socket delivers, in emission order.
pub type EventStream = mpsc::Receiver<SocketEvent>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("failed to start protocol bridge: {0}")]
    Spawn(String),
    #[error("protocol bridge is closed")]
    Closed,
    #[error("protocol bridge rejected the request: {0}")]
    Rejected(String),
    #[error("timed out waiting for the protocol bridge")]
    Timeout,
    #[error("protocol version lookup failed: {0}")]
    Version(String),
    #[error("protocol bridge I/O: {0}")]
    Io(String),
}

/// Protocol version triple, e.g. `2.3000.1015901307`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion(pub [u32; 3]);

impl FromStr for ProtocolVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('.');
        let mut version = [0u32; 3];
        for slot in &mut version {
            *slot = parts
                .next()
                .and_then(|p| p.parse().ok())
                .ok_or_else(|| format!("invalid protocol version {s:?}"))?;
        }
        if parts.next().is_some() {
            return Err(format!("invalid protocol version {s:?}"));
        }
        Ok(Self(version))
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.0;
        write!(f, "{a}.{b}.{c}")
    }
}

/// Why a socket closed. Only [`DisconnectReason::LoggedOut`] is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    LoggedOut,
    ConnectionLost(String),
    /// Another client took over the session.
    Replaced,
    /// The server asked for a fresh socket (normal right after pairing).
    RestartRequired,
    Other { code: Option<u16>, message: String },
}

impl DisconnectReason {
    /// Classify a WhatsApp disconnect status code.
    pub fn from_status(code: Option<u16>, message: Option<String>) -> Self {
        let message = message.unwrap_or_default();
        match code {
            Some(401) => Self::LoggedOut,
            Some(408 | 428) => Self::ConnectionLost(message),
            Some(440) => Self::Replaced,
            Some(515) => Self::RestartRequired,
            code => Self::Other { code, message },
        }
    }

    pub fn is_logged_out(&self) -> bool {
        matches!(self, Self::LoggedOut)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoggedOut => write!(f, "logged out"),
            Self::ConnectionLost(msg) if msg.is_empty() => write!(f, "connection lost"),
            Self::ConnectionLost(msg) => write!(f, "connection lost: {msg}"),
            Self::Replaced => write!(f, "replaced by another client"),
            Self::RestartRequired => write!(f, "restart required"),
            Self::Other {
                code: Some(code),
                message,
            } => write!(f, "closed with status {code}: {message}"),
            Self::Other { code: None, message } => write!(f, "closed: {message}"),
        }
    }
}

/// A message received on the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub from: String,
    pub id: Option<String>,
    /// Plain text body. `None` for media and other non-text messages.
    pub text: Option<String>,
    pub from_me: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Qr(String),
    Open { me: Option<String> },
    Close(DisconnectReason),
    /// Replacement credential bundle to persist before the next event.
    CredsUpdate(Vec<u8>),
    Message(IncomingMessage),
}

/// Everything the protocol library needs to open a socket.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    pub session_id: String,
    pub session_dir: PathBuf,
    pub version: ProtocolVersion,
    pub browser: [String; 3],
    pub sync_full_history: bool,
    /// Stored credentials. `None` starts a fresh pairing.
    pub credentials: Option<Vec<u8>>,
}

#[async_trait]
pub trait Socket: Send + Sync {
    /// Send one message, returning the protocol message id.
    async fn send(&self, to: &Jid, content: &MessageContent) -> Result<String, BackendError>;

    async fn close(&self) -> Result<(), BackendError>;
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Fetch the newest published protocol version.
    async fn latest_version(&self) -> Result<ProtocolVersion, BackendError>;

    async fn open(
        &self,
        options: OpenOptions,
    ) -> Result<(Arc<dyn Socket>, EventStream), BackendError>;
}
