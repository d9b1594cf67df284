//! On-disk credential storage, one directory per session.
//!
//! Layout: `<root>/<session_id>/creds.json`. The credential bundle itself is
//! opaque bytes owned by the protocol bridge; the store wraps it in a small
//! versioned JSON envelope and replaces it atomically on every update.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const CREDS_FILE: &str = "creds.json";
const CREDS_FORMAT_VERSION: u32 = 1;
const MAX_SESSION_ID_LEN: usize = 64;

/// Monotonic counter to uniquify temp file names across concurrent writes.
static WRITE_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid session id {0:?} (allowed: A-Z a-z 0-9 _ -, at most 64 characters)")]
    InvalidId(String),
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt credentials in {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
}

#[derive(Serialize, Deserialize)]
struct CredsEnvelope {
    version: u32,
    updated_at: u64,
    data: String,
}

/// Filesystem-backed store rooted at the configured sessions directory.
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reject ids that could escape the sessions directory.
    pub fn validate_id(id: &str) -> Result<(), SessionError> {
        let ok = !id.is_empty()
            && id.len() <= MAX_SESSION_ID_LEN
            && id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if ok {
            Ok(())
        } else {
            Err(SessionError::InvalidId(id.to_string()))
        }
    }

    pub fn session_dir(&self, id: &str) -> Result<PathBuf, SessionError> {
        Self::validate_id(id)?;
        Ok(self.root.join(id))
    }

    /// Create the session directory if needed and return its path.
    pub async fn ensure(&self, id: &str) -> Result<PathBuf, SessionError> {
        let dir = self.session_dir(id)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| SessionError::Io {
                path: dir.clone(),
                source,
            })?;
        Ok(dir)
    }

    /// Stored credentials, or `None` for a session that has never paired.
    pub async fn load_credentials(&self, id: &str) -> Result<Option<Vec<u8>>, SessionError> {
        let path = self.session_dir(id)?.join(CREDS_FILE);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(SessionError::Io { path, source }),
        };

        let envelope: CredsEnvelope =
            serde_json::from_slice(&raw).map_err(|e| SessionError::Corrupt {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        if envelope.version != CREDS_FORMAT_VERSION {
            return Err(SessionError::Corrupt {
                path,
                reason: format!("unsupported format version {}", envelope.version),
            });
        }
        let data = BASE64
            .decode(envelope.data.as_bytes())
            .map_err(|e| SessionError::Corrupt {
                path,
                reason: e.to_string(),
            })?;
        Ok(Some(data))
    }

    /// Replace the stored credentials. Readers see either the old or the new
    /// bundle, never a partial write.
    pub async fn save_credentials(&self, id: &str, data: &[u8]) -> Result<(), SessionError> {
        let dir = self.ensure(id).await?;
        let path = dir.join(CREDS_FILE);
        let envelope = CredsEnvelope {
            version: CREDS_FORMAT_VERSION,
            updated_at: crate::util::now_ms(),
            data: BASE64.encode(data),
        };
        let body = serde_json::to_vec_pretty(&envelope).map_err(|e| SessionError::Corrupt {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        let seq = WRITE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_path = dir.join(format!(".creds_tmp_{}_{}", std::process::id(), seq));
        if let Err(source) = tokio::fs::write(&temp_path, &body).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(SessionError::Io {
                path: temp_path,
                source,
            });
        }
        if let Err(source) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(SessionError::Io { path, source });
        }
        Ok(())
    }

    /// Delete everything stored for a session. Missing sessions are fine.
    pub async fn clear(&self, id: &str) -> Result<(), SessionError> {
        let dir = self.session_dir(id)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SessionError::Io { path: dir, source }),
        }
    }
}
