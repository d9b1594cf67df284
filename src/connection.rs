//! Connection lifecycle for one WhatsApp session.
//!
//! [`ConnectionManager`] owns at most one socket at a time. Every socket gets
//! a generation number and one event task that handles that socket's events
//! strictly in order. Bumping the generation (reconnect, manual connect,
//! disconnect) turns any later event from an older socket into a no-op.
//!
//! ```text
//! Disconnected --connect--> Connecting --Open--> Connected
//!      ^                      |   ^                  |
//!      |                      |   +--transient close-+
//!  disconnect                 |   (backoff, bounded attempts)
//!                             +--attempts exhausted--> Failed
//!                  any state --logged-out close-----> LoggedOut
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::{
    Backend, DisconnectReason, EventStream, IncomingMessage, OpenOptions, ProtocolVersion,
    Socket, SocketEvent,
};
use crate::config::{ConfigError, ConnectionConfig, ReconnectConfig};
use crate::error::{Error, Result};
use crate::pairing::PairingCodes;
use crate::session::SessionStore;

/// Returned by a successful [`ConnectionManager::authenticate`].
pub const AUTH_SUCCESS: &str = "Authentication successful";

const INCOMING_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    LoggedOut,
    /// Reconnect attempts exhausted. Only a manual connect leaves this state.
    Failed,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::LoggedOut => "logged_out",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exponential backoff with a cap and a bounded number of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Delay before the given 1-based attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_attempts: config.max_attempts,
        }
    }
}

/// Per-socket options that do not change between reconnects.
#[derive(Debug, Clone)]
pub struct ConnectSettings {
    pub fallback_version: Option<ProtocolVersion>,
    pub browser: [String; 3],
    pub sync_full_history: bool,
    pub close_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl ConnectSettings {
    pub fn from_config(config: &ConnectionConfig) -> Result<Self, ConfigError> {
        let fallback_version = config
            .fallback_version
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(|e| ConfigError::Invalid(format!("connection.fallback_version: {e}")))?;
        Ok(Self {
            fallback_version,
            browser: config.browser.clone(),
            sync_full_history: config.sync_full_history,
            close_timeout: Duration::from_millis(config.close_timeout_ms),
            reconnect: ReconnectPolicy::from(&config.reconnect),
        })
    }
}

/// Point-in-time view for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    pub session_id: String,
    pub state: ConnectionState,
    pub connected: bool,
    pub has_qr: bool,
    pub reconnect_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_since_ms: Option<u64>,
}

/// Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    session_id: String,
    backend: Arc<dyn Backend>,
    store: SessionStore,
    settings: ConnectSettings,
    state: watch::Sender<ConnectionState>,
    socket: RwLock<Option<Arc<dyn Socket>>>,
    generation: AtomicU64,
    initialized: AtomicBool,
    /// Consecutive failed reconnects since the last `Open`.
    failures: AtomicU32,
    /// Unix millis of the last `Open`, 0 while not connected.
    connected_since: AtomicU64,
    event_task: Mutex<Option<JoinHandle<()>>>,
    auth_waiter: Mutex<Option<oneshot::Sender<Result<()>>>>,
    /// Serializes socket replacement (connect, reconnect, disconnect).
    connect_lock: Mutex<()>,
    pairing: PairingCodes,
    incoming: broadcast::Sender<IncomingMessage>,
}

impl ConnectionManager {
    pub fn new(
        session_id: impl Into<String>,
        backend: Arc<dyn Backend>,
        store: SessionStore,
        settings: ConnectSettings,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (incoming, _) = broadcast::channel(INCOMING_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                session_id: session_id.into(),
                backend,
                store,
                settings,
                state,
                socket: RwLock::new(None),
                generation: AtomicU64::new(0),
                initialized: AtomicBool::new(false),
                failures: AtomicU32::new(0),
                connected_since: AtomicU64::new(0),
                event_task: Mutex::new(None),
                auth_waiter: Mutex::new(None),
                connect_lock: Mutex::new(()),
                pairing: PairingCodes::new(),
                incoming,
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// True once a socket has been opened at least once.
    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn pairing(&self) -> &PairingCodes {
        &self.inner.pairing
    }

    pub fn subscribe_messages(&self) -> broadcast::Receiver<IncomingMessage> {
        self.inner.incoming.subscribe()
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        let state = self.state();
        let since = self.inner.connected_since.load(Ordering::SeqCst);
        ConnectionSnapshot {
            session_id: self.inner.session_id.clone(),
            state,
            connected: state == ConnectionState::Connected,
            has_qr: self.inner.pairing.latest().is_some(),
            reconnect_failures: self.inner.failures.load(Ordering::SeqCst),
            connected_since_ms: (since > 0).then_some(since),
        }
    }

    /// Whether a caller is currently blocked in [`Self::authenticate`].
    pub async fn is_authenticating(&self) -> bool {
        self.inner
            .auth_waiter
            .lock()
            .await
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// The open socket, if the session is connected.
    pub(crate) async fn active_socket(&self) -> Result<Arc<dyn Socket>> {
        if !self.is_initialized() {
            return Err(Error::NotInitialized);
        }
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.inner
            .socket
            .read()
            .await
            .clone()
            .ok_or(Error::NotConnected)
    }

    /// Open a socket for the session. Returns once the socket exists; the
    /// session reaches `Connected` later, when the protocol reports it open.
    ///
    /// Connecting from `LoggedOut` discards the stored credentials so the
    /// next socket starts a fresh pairing.
    pub async fn connect(&self) -> Result<()> {
        let _guard = self.inner.connect_lock.lock().await;
        match self.state() {
            ConnectionState::Connected => return Err(Error::AlreadyConnected),
            ConnectionState::LoggedOut => {
                info!(session = %self.inner.session_id, "Discarding logged-out credentials");
                self.inner.store.clear(&self.inner.session_id).await?;
            }
            _ => {}
        }
        self.inner.failures.store(0, Ordering::SeqCst);

        if let Err(e) = self.open_socket().await {
            error!(session = %self.inner.session_id, error = %e, "Failed to connect");
            self.set_state(ConnectionState::Disconnected);
            self.resolve_auth(Err(Error::Upstream(format!("connect failed: {e}"))))
                .await;
            return Err(e);
        }
        Ok(())
    }

    /// Close the socket and stop reconnecting. Safe to call in any state.
    pub async fn disconnect(&self) {
        let _guard = self.inner.connect_lock.lock().await;
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.stop_event_task().await;

        let socket = self.inner.socket.write().await.take();
        if let Some(socket) = socket {
            self.close_socket(socket).await;
            info!(session = %self.inner.session_id, "Disconnected from WhatsApp");
        }
        self.inner.failures.store(0, Ordering::SeqCst);
        self.inner.connected_since.store(0, Ordering::SeqCst);
        self.inner.pairing.clear();
        self.set_state(ConnectionState::Disconnected);
        self.resolve_auth(Err(Error::NotConnected)).await;
    }

    /// Wait until the session is connected.
    ///
    /// Resolves immediately when already connected and fails fast in terminal
    /// states. Only one caller may wait at a time. There is no built-in
    /// timeout; callers that need one wrap this future.
    pub async fn authenticate(&self) -> Result<&'static str> {
        let rx = {
            let mut waiter = self.inner.auth_waiter.lock().await;
            match self.state() {
                ConnectionState::Connected => return Ok(AUTH_SUCCESS),
                ConnectionState::LoggedOut | ConnectionState::Failed => {
                    return Err(Error::AuthenticationFailed)
                }
                ConnectionState::Disconnected if self.is_initialized() => {
                    return Err(Error::NotConnected)
                }
                ConnectionState::Disconnected => return Err(Error::NotInitialized),
                ConnectionState::Connecting => {}
            }
            if waiter.as_ref().is_some_and(|tx| !tx.is_closed()) {
                return Err(Error::AuthenticationPending);
            }
            let (tx, rx) = oneshot::channel();
            *waiter = Some(tx);
            rx
        };

        match rx.await {
            Ok(Ok(())) => Ok(AUTH_SUCCESS),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::AuthenticationFailed),
        }
    }

    // Caller holds `connect_lock`.
    async fn open_socket(&self) -> Result<()> {
        let inner = &self.inner;
        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.stop_event_task().await;
        let previous = inner.socket.write().await.take();
        if let Some(previous) = previous {
            self.close_socket(previous).await;
        }
        self.set_state(ConnectionState::Connecting);

        let session_dir = inner.store.ensure(&inner.session_id).await?;
        let credentials = inner.store.load_credentials(&inner.session_id).await?;
        let version = self.negotiate_version().await?;
        info!(
            session = %inner.session_id,
            %version,
            resume = credentials.is_some(),
            "Opening WhatsApp socket"
        );

        let (socket, events) = inner
            .backend
            .open(OpenOptions {
                session_id: inner.session_id.clone(),
                session_dir,
                version,
                browser: inner.settings.browser.clone(),
                sync_full_history: inner.settings.sync_full_history,
                credentials,
            })
            .await?;

        *inner.socket.write().await = Some(socket);
        inner.initialized.store(true, Ordering::SeqCst);

        let manager = self.clone();
        let task = tokio::spawn(async move { manager.run_events(generation, events).await });
        *inner.event_task.lock().await = Some(task);
        Ok(())
    }

    async fn negotiate_version(&self) -> Result<ProtocolVersion> {
        match self.inner.backend.latest_version().await {
            Ok(version) => Ok(version),
            Err(e) => match self.inner.settings.fallback_version {
                Some(fallback) => {
                    warn!(error = %e, %fallback, "Protocol version lookup failed, using fallback");
                    Ok(fallback)
                }
                None => Err(Error::Upstream(format!("no usable protocol version: {e}"))),
            },
        }
    }

    async fn run_events(self, generation: u64, mut events: EventStream) {
        while let Some(event) = events.recv().await {
            if !self.is_current(generation) {
                debug!(session = %self.inner.session_id, generation, "Ignoring event from replaced socket");
                return;
            }
            if let SocketEvent::Close(reason) = event {
                self.handle_close(generation, reason).await;
                return;
            }
            self.handle_event(event).await;
        }

        if self.is_current(generation) {
            self.handle_close(
                generation,
                DisconnectReason::ConnectionLost("event stream ended".into()),
            )
            .await;
        }
    }

    async fn handle_event(&self, event: SocketEvent) {
        let session = &self.inner.session_id;
        match event {
            SocketEvent::Qr(code) => {
                info!(session = %session, "New pairing QR code available");
                self.inner.pairing.publish(code);
            }
            SocketEvent::Open { me } => {
                self.inner.failures.store(0, Ordering::SeqCst);
                self.inner
                    .connected_since
                    .store(crate::util::now_ms(), Ordering::SeqCst);
                self.inner.pairing.clear();
                info!(
                    session = %session,
                    account = me.as_deref().unwrap_or("unknown"),
                    "WhatsApp connection opened"
                );
                // State first: `authenticate` reads it under the waiter lock.
                self.set_state(ConnectionState::Connected);
                self.resolve_auth(Ok(())).await;
            }
            SocketEvent::CredsUpdate(bundle) => {
                match self.inner.store.save_credentials(session, &bundle).await {
                    Ok(()) => debug!(session = %session, bytes = bundle.len(), "Credentials saved"),
                    Err(e) => error!(session = %session, error = %e, "Failed to save credentials"),
                }
            }
            SocketEvent::Message(message) => {
                let _ = self.inner.incoming.send(message);
            }
            SocketEvent::Close(reason) => {
                warn!(session = %session, %reason, "Unexpected close routed as a regular event");
            }
        }
    }

    async fn handle_close(&self, generation: u64, reason: DisconnectReason) {
        let session = &self.inner.session_id;
        self.inner.socket.write().await.take();
        self.inner.connected_since.store(0, Ordering::SeqCst);
        self.inner.pairing.clear();

        if reason.is_logged_out() {
            warn!(session = %session, "Session logged out, not reconnecting");
            self.set_state(ConnectionState::LoggedOut);
            self.resolve_auth(Err(Error::AuthenticationFailed)).await;
            return;
        }

        warn!(session = %session, %reason, "Connection closed, reconnecting");
        self.set_state(ConnectionState::Connecting);
        let manager = self.clone();
        tokio::spawn(async move { manager.reconnect(generation).await });
    }

    // Boxed to break the open_socket -> run_events -> handle_close ->
    // reconnect cycle of opaque future types.
    fn reconnect(&self, generation: u64) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(self.reconnect_loop(generation))
    }

    async fn reconnect_loop(&self, mut generation: u64) {
        let policy = self.inner.settings.reconnect;
        let session = &self.inner.session_id;
        loop {
            let attempt = self.inner.failures.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt > policy.max_attempts {
                error!(
                    session = %session,
                    attempts = policy.max_attempts,
                    "Reconnect attempts exhausted, giving up"
                );
                self.set_state(ConnectionState::Failed);
                self.resolve_auth(Err(Error::AuthenticationFailed)).await;
                return;
            }

            let delay = policy.delay_for(attempt);
            info!(
                session = %session,
                attempt,
                max_attempts = policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Scheduling reconnect"
            );
            tokio::time::sleep(delay).await;

            let _guard = self.inner.connect_lock.lock().await;
            if !self.is_current(generation) {
                debug!(session = %session, "Reconnect superseded");
                return;
            }
            match self.open_socket().await {
                Ok(()) => return,
                Err(e) => {
                    warn!(session = %session, attempt, error = %e, "Reconnect attempt failed");
                    self.set_state(ConnectionState::Connecting);
                    generation = self.inner.generation.load(Ordering::SeqCst);
                }
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.generation.load(Ordering::SeqCst) == generation
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = self.inner.state.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
        if changed {
            debug!(session = %self.inner.session_id, state = %next, "Connection state changed");
        }
    }

    async fn resolve_auth(&self, result: Result<()>) {
        if let Some(tx) = self.inner.auth_waiter.lock().await.take() {
            let _ = tx.send(result);
        }
    }

    async fn stop_event_task(&self) {
        if let Some(task) = self.inner.event_task.lock().await.take() {
            task.abort();
        }
    }

    async fn close_socket(&self, socket: Arc<dyn Socket>) {
        let session = &self.inner.session_id;
        match tokio::time::timeout(self.inner.settings.close_timeout, socket.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(session = %session, error = %e, "Socket close failed"),
            Err(_) => warn!(session = %session, "Socket close timed out"),
        }
    }
}
