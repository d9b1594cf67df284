//! Protocol bridge: the WhatsApp library running as a child process.
//!
//! The bridge is spawned once per socket and talks newline-delimited JSON.
//!
//! ```text
//! stdin  -> {"op":"open","session_id":..,"session_dir":..,"version":[a,b,c],
//!            "browser":[..],"sync_full_history":..,"credentials":<base64|null>}
//!           {"op":"send","id":7,"to":"1555..@s.whatsapp.net","content":{"type":"text",..}}
//!           {"op":"close"}
//! stdout <- {"event":"qr","qr":".."}            {"event":"open","me":".."}
//!           {"event":"close","status_code":401,"reason":".."}
//!           {"event":"creds","data":<base64>}    {"event":"ack","id":7,"ok":true,"message_id":".."}
//!           {"event":"message","from":..,"id":..,"text":..,"from_me":false}
//!           {"event":"log","level":"warn","msg":".."}
//! ```
//!
//! Sends are correlated with acks by id. Anything the bridge writes to stderr
//! is forwarded to the protocol log target.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

use super::{
    Backend, BackendError, DisconnectReason, EventStream, IncomingMessage, OpenOptions,
    ProtocolVersion, Socket, SocketEvent,
};
use crate::config::ConnectionConfig;
use crate::dispatch::MessageContent;
use crate::jid::Jid;
use crate::logging::{self, LogLevel};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const VERSION_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);
/// How long `close` waits for the bridge to exit before killing it.
const EXIT_GRACE: Duration = Duration::from_secs(3);

type AckResult = Result<String, BackendError>;
type PendingAcks = Arc<StdMutex<HashMap<u64, oneshot::Sender<AckResult>>>>;

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum BridgeCommand<'a> {
    Open {
        session_id: &'a str,
        session_dir: &'a Path,
        version: ProtocolVersion,
        browser: &'a [String; 3],
        sync_full_history: bool,
        credentials: Option<String>,
    },
    Send {
        id: u64,
        to: String,
        content: &'a MessageContent,
        #[serde(skip_serializing_if = "Option::is_none")]
        mimetype: Option<&'static str>,
    },
    Close,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum BridgeEvent {
    Qr {
        qr: String,
    },
    Open {
        #[serde(default)]
        me: Option<String>,
    },
    Close {
        #[serde(default)]
        status_code: Option<u16>,
        #[serde(default)]
        reason: Option<String>,
    },
    Creds {
        data: String,
    },
    Message {
        from: String,
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        from_me: bool,
    },
    Ack {
        id: u64,
        ok: bool,
        #[serde(default)]
        message_id: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
    Log {
        level: String,
        msg: String,
    },
}

#[derive(Deserialize)]
struct VersionResponse {
    version: ProtocolVersion,
}

/// Spawns one bridge process per socket.
pub struct BridgeBackend {
    command: Vec<String>,
    version_url: String,
    send_timeout: Duration,
    http: reqwest::Client,
}

impl BridgeBackend {
    pub fn from_config(config: &ConnectionConfig) -> Result<Self, BackendError> {
        if config.bridge_command.is_empty() {
            return Err(BackendError::Spawn("no bridge command configured".into()));
        }
        let http = reqwest::Client::builder()
            .timeout(VERSION_LOOKUP_TIMEOUT)
            .user_agent(concat!("wa-bridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BackendError::Version(e.to_string()))?;
        Ok(Self {
            command: config.bridge_command.clone(),
            version_url: config.version_url.clone(),
            send_timeout: Duration::from_millis(config.send_timeout_ms),
            http,
        })
    }
}

#[async_trait]
impl Backend for BridgeBackend {
    async fn latest_version(&self) -> Result<ProtocolVersion, BackendError> {
        let response = self
            .http
            .get(&self.version_url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| BackendError::Version(e.to_string()))?;
        let body: VersionResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Version(e.to_string()))?;
        Ok(body.version)
    }

    async fn open(
        &self,
        options: OpenOptions,
    ) -> Result<(Arc<dyn Socket>, EventStream), BackendError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| BackendError::Spawn("no bridge command configured".into()))?;

        let mut child = Command::new(program)
            .args(args)
            .env("WA_BRIDGE_SESSION_DIR", &options.session_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BackendError::Spawn(format!("{program}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BackendError::Spawn("bridge stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackendError::Spawn("bridge stdout unavailable".into()))?;
        let stderr = child.stderr.take();

        debug!(
            session = %options.session_id,
            pid = child.id().unwrap_or(0),
            "Protocol bridge started"
        );

        let pending: PendingAcks = Arc::default();
        let socket = Arc::new(BridgeSocket {
            stdin: Mutex::new(Some(stdin)),
            child: Mutex::new(Some(child)),
            pending: pending.clone(),
            next_id: AtomicU64::new(1),
            send_timeout: self.send_timeout,
        });

        socket
            .write_command(&BridgeCommand::Open {
                session_id: &options.session_id,
                session_dir: &options.session_dir,
                version: options.version,
                browser: &options.browser,
                sync_full_history: options.sync_full_history,
                credentials: options.credentials.as_deref().map(|c| BASE64.encode(c)),
            })
            .await?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(pump_events(
            stdout,
            events_tx,
            pending,
            options.session_id.clone(),
        ));
        if let Some(stderr) = stderr {
            tokio::spawn(forward_stderr(stderr, options.session_id));
        }

        Ok((socket as Arc<dyn Socket>, events_rx))
    }
}

struct BridgeSocket {
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
    pending: PendingAcks,
    next_id: AtomicU64,
    send_timeout: Duration,
}

impl BridgeSocket {
    async fn write_command(&self, command: &BridgeCommand<'_>) -> Result<(), BackendError> {
        let mut line =
            serde_json::to_string(command).map_err(|e| BackendError::Io(e.to_string()))?;
        line.push('\n');

        let mut stdin = self.stdin.lock().await;
        let pipe = stdin.as_mut().ok_or(BackendError::Closed)?;
        pipe.write_all(line.as_bytes())
            .await
            .map_err(|_| BackendError::Closed)?;
        pipe.flush().await.map_err(|_| BackendError::Closed)
    }

    fn forget(&self, id: u64) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}

#[async_trait]
impl Socket for BridgeSocket {
    async fn send(&self, to: &Jid, content: &MessageContent) -> Result<String, BackendError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);

        let command = BridgeCommand::Send {
            id,
            to: to.to_string(),
            content,
            mimetype: content.mimetype(),
        };
        if let Err(e) = self.write_command(&command).await {
            self.forget(id);
            return Err(e);
        }

        match tokio::time::timeout(self.send_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BackendError::Closed),
            Err(_) => {
                self.forget(id);
                Err(BackendError::Timeout)
            }
        }
    }

    async fn close(&self) -> Result<(), BackendError> {
        // Best effort: the bridge may already be gone.
        let _ = self.write_command(&BridgeCommand::Close).await;
        self.stdin.lock().await.take();

        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };
        if tokio::time::timeout(EXIT_GRACE, child.wait()).await.is_err() {
            warn!("Protocol bridge did not exit, killing it");
            child
                .kill()
                .await
                .map_err(|e| BackendError::Io(e.to_string()))?;
        }
        Ok(())
    }
}

/// Read bridge stdout until EOF, translating lines into socket events.
async fn pump_events(
    stdout: ChildStdout,
    events: mpsc::Sender<SocketEvent>,
    pending: PendingAcks,
    session_id: String,
) {
    let mut lines = BufReader::new(stdout).lines();
    let mut closed = false;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(session = %session_id, error = %e, "Failed to read protocol bridge output");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event = match serde_json::from_str::<BridgeEvent>(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(session = %session_id, error = %e, "Ignoring malformed bridge line");
                continue;
            }
        };
        if let Some(event) = translate(event, &pending, &session_id) {
            closed |= matches!(event, SocketEvent::Close(_));
            if events.send(event).await.is_err() {
                break;
            }
        }
    }

    // Senders still waiting get `Closed` when their oneshot is dropped.
    pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();
    if !closed {
        let _ = events
            .send(SocketEvent::Close(DisconnectReason::ConnectionLost(
                "protocol bridge exited".into(),
            )))
            .await;
    }
}

/// Map one bridge event to a socket event. Acks and log lines are consumed
/// here and produce nothing.
fn translate(event: BridgeEvent, pending: &PendingAcks, session_id: &str) -> Option<SocketEvent> {
    match event {
        BridgeEvent::Qr { qr } => Some(SocketEvent::Qr(qr)),
        BridgeEvent::Open { me } => Some(SocketEvent::Open { me }),
        BridgeEvent::Close {
            status_code,
            reason,
        } => Some(SocketEvent::Close(DisconnectReason::from_status(
            status_code,
            reason,
        ))),
        BridgeEvent::Creds { data } => match BASE64.decode(data.as_bytes()) {
            Ok(bytes) => Some(SocketEvent::CredsUpdate(bytes)),
            Err(e) => {
                warn!(session = %session_id, error = %e, "Dropping undecodable credential update");
                None
            }
        },
        BridgeEvent::Message {
            from,
            id,
            text,
            from_me,
        } => Some(SocketEvent::Message(IncomingMessage {
            from,
            id,
            text,
            from_me,
        })),
        BridgeEvent::Ack {
            id,
            ok,
            message_id,
            error,
        } => {
            let waiter = pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
            let result = if ok {
                Ok(message_id.unwrap_or_default())
            } else {
                Err(BackendError::Rejected(
                    error.unwrap_or_else(|| "send failed".into()),
                ))
            };
            match waiter {
                Some(tx) => {
                    let _ = tx.send(result);
                }
                None => debug!(session = %session_id, id, "Ack for unknown or expired send"),
            }
            None
        }
        BridgeEvent::Log { level, msg } => {
            logging::protocol_log(
                LogLevel::parse(&level).unwrap_or(LogLevel::Info),
                session_id,
                &msg,
            );
            None
        }
    }
}

async fn forward_stderr(stderr: ChildStderr, session_id: String) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if !line.trim().is_empty() {
            logging::protocol_log(LogLevel::Warn, &session_id, &line);
        }
    }
}
