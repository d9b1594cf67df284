//! In-memory backend for tests.
//!
//! Each `open` creates a fresh event channel; [`MockBackend::emit`] feeds the
//! most recently opened socket. Sends are recorded instead of delivered.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Backend, BackendError, EventStream, OpenOptions, ProtocolVersion, Socket, SocketEvent};
use crate::connection::{
    ConnectSettings, ConnectionManager, ConnectionState, ReconnectPolicy,
};
use crate::dispatch::MessageContent;
use crate::jid::Jid;
use crate::session::SessionStore;

pub const SESSION_ID: &str = "test-session";
pub const LATEST_VERSION: ProtocolVersion = ProtocolVersion([2, 3000, 42]);

#[derive(Default)]
struct MockState {
    opens: AtomicU32,
    closes: AtomicU32,
    sends: AtomicU32,
    fail_open: AtomicBool,
    fail_version: AtomicBool,
    version_delay_ms: AtomicU64,
    last_options: Mutex<Option<OpenOptions>>,
    events: Mutex<Option<mpsc::Sender<SocketEvent>>>,
    sent: Mutex<Vec<(Jid, MessageContent)>>,
    rejected_users: Mutex<HashSet<String>>,
}

#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<MockState>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_count(&self) -> u32 {
        self.state.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> u32 {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn fail_opens(&self, fail: bool) {
        self.state.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn fail_version_lookup(&self, fail: bool) {
        self.state.fail_version.store(fail, Ordering::SeqCst);
    }

    /// Make sends to this phone number fail as if it were not on WhatsApp.
    /// Make `latest_version` take this long before answering.
    pub fn delay_version_lookup(&self, delay: Duration) {
        self.state
            .version_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn reject_sends_to(&self, user: &str) {
        self.state
            .rejected_users
            .lock()
            .unwrap()
            .insert(user.to_string());
    }

    pub fn last_options(&self) -> Option<OpenOptions> {
        self.state.last_options.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<(Jid, MessageContent)> {
        self.state.sent.lock().unwrap().clone()
    }

    /// Deliver an event on the newest socket. Dropped if its reader is gone.
    pub async fn emit(&self, event: SocketEvent) {
        let tx = self.state.events.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn latest_version(&self) -> Result<ProtocolVersion, BackendError> {
        let delay = self.state.version_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.state.fail_version.load(Ordering::SeqCst) {
            Err(BackendError::Version("network unreachable".into()))
        } else {
            Ok(LATEST_VERSION)
        }
    }

    async fn open(
        &self,
        options: OpenOptions,
    ) -> Result<(Arc<dyn Socket>, EventStream), BackendError> {
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        *self.state.last_options.lock().unwrap() = Some(options);
        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(BackendError::Spawn("mock refused to open".into()));
        }
        let (tx, rx) = mpsc::channel(64);
        *self.state.events.lock().unwrap() = Some(tx);
        let socket: Arc<dyn Socket> = Arc::new(MockSocket {
            state: self.state.clone(),
        });
        Ok((socket, rx))
    }
}

struct MockSocket {
    state: Arc<MockState>,
}

#[async_trait]
impl Socket for MockSocket {
    async fn send(&self, to: &Jid, content: &MessageContent) -> Result<String, BackendError> {
        if self.state.rejected_users.lock().unwrap().contains(&to.user) {
            return Err(BackendError::Rejected(format!("{to} is not on WhatsApp")));
        }
        let n = self.state.sends.fetch_add(1, Ordering::SeqCst) + 1;
        self.state
            .sent
            .lock()
            .unwrap()
            .push((to.clone(), content.clone()));
        Ok(format!("MOCK{n:04}"))
    }

    async fn close(&self) -> Result<(), BackendError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Zero-delay reconnects with three attempts.
pub fn settings() -> ConnectSettings {
    ConnectSettings {
        fallback_version: Some(ProtocolVersion([2, 3000, 1])),
        browser: [
            "WhatsApp API".to_string(),
            "Chrome".to_string(),
            "4.0.0".to_string(),
        ],
        sync_full_history: false,
        close_timeout: Duration::from_millis(200),
        reconnect: ReconnectPolicy {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_attempts: 3,
        },
    }
}

pub fn manager(backend: &MockBackend, sessions_dir: &Path, settings: ConnectSettings) -> ConnectionManager {
    ConnectionManager::new(
        SESSION_ID,
        Arc::new(backend.clone()),
        SessionStore::new(sessions_dir),
        settings,
    )
}

/// A manager whose socket has reported `Open`.
pub async fn connected_manager(sessions_dir: &Path) -> (ConnectionManager, MockBackend) {
    let backend = MockBackend::new();
    let manager = manager(&backend, sessions_dir, settings());
    manager.connect().await.unwrap();
    backend.emit(SocketEvent::Open { me: None }).await;
    wait_for_state(&manager, ConnectionState::Connected).await;
    (manager, backend)
}

pub async fn wait_for_state(manager: &ConnectionManager, want: ConnectionState) {
    let mut rx = manager.subscribe_state();
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == want))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {want}, still {}", manager.state()))
        .unwrap();
}

pub async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

pub async fn wait_for_waiter(manager: &ConnectionManager) {
    for _ in 0..200 {
        if manager.is_authenticating().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no authenticate call started waiting within 2s");
}
