//! Durable store of in-progress upload sessions.
//!
//! One JSON document per fingerprint inside a store directory, written with
//! a temp-file-plus-rename so a crash never leaves a half-written record.
//! Records here are advisory: the remote store stays authoritative for which
//! chunks were actually received.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Sessions older than this are swept regardless of status: 24 hours.
pub const SESSION_MAX_AGE: Duration = Duration::hours(24);

/// Errors produced by the session store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid fingerprint key: {0}")]
    InvalidKey(String),
}

/// Persisted record of one in-flight upload, keyed by fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub fingerprint: String,
    pub remote_file_id: String,
    pub transfer_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    /// SHA-256 of the full file content.
    pub content_hash: String,
    pub total_chunks: u32,
    pub chunk_size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Directory-backed session store.
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Opens (and creates if needed) a store rooted at `dir`.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn record_path(&self, fingerprint: &str) -> Result<PathBuf, StoreError> {
        // Fingerprints are hex digests; anything else must not escape the dir.
        if fingerprint.is_empty()
            || !fingerprint.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(StoreError::InvalidKey(fingerprint.to_string()));
        }
        Ok(self.dir.join(format!("{fingerprint}.json")))
    }

    /// Saves a session, overwriting any existing record with the same
    /// fingerprint (upsert).
    pub fn save(&self, session: &UploadSession) -> Result<(), StoreError> {
        let path = self.record_path(&session.fingerprint)?;
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(session)?;
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Looks up a session by fingerprint.
    pub fn get(&self, fingerprint: &str) -> Result<Option<UploadSession>, StoreError> {
        let path = self.record_path(fingerprint)?;
        match std::fs::read(&path) {
            Ok(body) => Ok(Some(serde_json::from_slice(&body)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Looks up a session by its remote file identifier.
    pub fn get_by_remote_id(&self, remote_id: &str) -> Result<Option<UploadSession>, StoreError> {
        Ok(self
            .load_all()?
            .into_iter()
            .find(|s| s.remote_file_id == remote_id))
    }

    /// Returns all sessions belonging to one transfer.
    pub fn list_by_transfer(&self, transfer_id: &str) -> Result<Vec<UploadSession>, StoreError> {
        let mut sessions: Vec<UploadSession> = self
            .load_all()?
            .into_iter()
            .filter(|s| s.transfer_id == transfer_id)
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }

    /// Removes a session. Removing a missing record is not an error.
    pub fn remove(&self, fingerprint: &str) -> Result<(), StoreError> {
        let path = self.record_path(fingerprint)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Refreshes a session's `updated_at` to now.
    pub fn touch(&self, fingerprint: &str) -> Result<(), StoreError> {
        if let Some(mut session) = self.get(fingerprint)? {
            session.updated_at = Utc::now();
            self.save(&session)?;
        }
        Ok(())
    }

    /// Deletes sessions created more than `max_age` ago, plus any record
    /// that no longer parses. Returns the number of records deleted.
    pub fn sweep_older_than(&self, max_age: Duration) -> Result<usize, StoreError> {
        let cutoff = Utc::now() - max_age;
        let mut deleted = 0;
        for path in self.record_files()? {
            let stale = match std::fs::read(&path).map(|b| serde_json::from_slice(&b)) {
                Ok(Ok(session)) => {
                    let session: UploadSession = session;
                    session.created_at < cutoff
                }
                // Unreadable or unparseable records are dead weight.
                Ok(Err(e)) => {
                    warn!(path = %path.display(), error = %e, "sweeping corrupt session record");
                    true
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable session record");
                    false
                }
            };
            if stale && std::fs::remove_file(&path).is_ok() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Removes every session record.
    pub fn clear_all(&self) -> Result<(), StoreError> {
        for path in self.record_files()? {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    fn record_files(&self) -> Result<Vec<PathBuf>, StoreError> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "json") {
                files.push(path);
            }
        }
        Ok(files)
    }

    fn load_all(&self) -> Result<Vec<UploadSession>, StoreError> {
        let mut sessions = Vec::new();
        for path in self.record_files()? {
            match std::fs::read(&path) {
                Ok(body) => match serde_json::from_slice(&body) {
                    Ok(session) => sessions.push(session),
                    // One corrupt record must not poison the rest.
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping corrupt session record")
                    }
                },
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable session record")
                }
            }
        }
        Ok(sessions)
    }
}
