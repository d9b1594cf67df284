//! Single-slot broadcast of pairing (QR) codes.
//!
//! The protocol library emits a fresh code every ~20 seconds until the phone
//! scans one. Only the newest code matters, so the slot is a `watch` channel:
//! a publish replaces the previous code and wakes every waiting subscriber
//! once; late readers use [`PairingCodes::latest`].

use std::time::Duration;

use tokio::sync::watch;

#[derive(Debug)]
pub struct PairingCodes {
    tx: watch::Sender<Option<String>>,
}

impl Default for PairingCodes {
    fn default() -> Self {
        Self::new()
    }
}

impl PairingCodes {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn publish(&self, code: String) {
        self.tx.send_replace(Some(code));
    }

    /// Drop the cached code (the connection opened).
    pub fn clear(&self) {
        self.tx.send_if_modified(|slot| slot.take().is_some());
    }

    pub fn latest(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> PairingSubscriber {
        PairingSubscriber {
            rx: self.tx.subscribe(),
        }
    }

    /// The cached code if there is one, otherwise the next code published
    /// within `timeout`.
    pub async fn latest_or_next(&self, timeout: Duration) -> Option<String> {
        // Subscribe before reading the slot so a publish in between is not lost.
        let mut sub = self.subscribe();
        if let Some(code) = self.latest() {
            return Some(code);
        }
        tokio::time::timeout(timeout, sub.next()).await.ok().flatten()
    }
}

/// Receives each code published after it was created.
pub struct PairingSubscriber {
    rx: watch::Receiver<Option<String>>,
}

impl PairingSubscriber {
    /// Wait for the next published code. Clears are skipped.
    pub async fn next(&mut self) -> Option<String> {
        loop {
            if self.rx.changed().await.is_err() {
                return None;
            }
            if let Some(code) = self.rx.borrow_and_update().clone() {
                return Some(code);
            }
        }
    }
}
