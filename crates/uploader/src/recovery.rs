//! Recovery reconciliation: which locally remembered uploads can resume.
//!
//! Local session records are advisory. The remote's pending-upload listing
//! is the authority on what it still holds, so every classification here
//! starts from the remote snapshot and never from a local "chunks sent"
//! counter.

use std::collections::HashMap;
use std::sync::Arc;

use ferry_protocol::PendingUpload;
use ferry_session_store::{SESSION_MAX_AGE, SessionStore, UploadSession};
use tracing::{info, warn};

use crate::error::UploadError;
use crate::remote::RemoteStore;

/// A locally remembered upload the remote still knows about.
#[derive(Debug, Clone)]
pub struct ResumableUpload {
    /// The durable local record.
    pub session: UploadSession,
    /// The remote's snapshot, authoritative for received chunks.
    pub remote: PendingUpload,
    pub chunks_missing: u32,
    pub progress_percent: f64,
}

/// Cross-references the session store with the remote's pending uploads.
pub struct Reconciler {
    store: Arc<SessionStore>,
    remote: Arc<dyn RemoteStore>,
}

impl Reconciler {
    pub fn new(store: Arc<SessionStore>, remote: Arc<dyn RemoteStore>) -> Self {
        Self { store, remote }
    }

    /// Classifies every local session for `transfer_id` as resumable or
    /// stale. Stale records (unknown to the remote) are deleted on the spot.
    ///
    /// If the pending-uploads query fails outright, no session can be
    /// confirmed valid, so an empty set is returned and nothing is purged:
    /// a transient network error must not destroy local resume state.
    pub async fn find_resumable(
        &self,
        transfer_id: &str,
    ) -> Result<Vec<ResumableUpload>, UploadError> {
        // Unconditional hygiene before anything else.
        if let Err(e) = self.store.sweep_older_than(SESSION_MAX_AGE) {
            warn!(error = %e, "session sweep failed");
        }

        let local = self.store.list_by_transfer(transfer_id)?;
        if local.is_empty() {
            return Ok(Vec::new());
        }

        let pending = match self.remote.pending_uploads(transfer_id.to_string()).await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(
                    transfer = transfer_id,
                    error = %e,
                    "pending-uploads query failed; keeping local records unclassified"
                );
                return Ok(Vec::new());
            }
        };
        let by_file_id: HashMap<&str, &PendingUpload> =
            pending.iter().map(|p| (p.file_id.as_str(), p)).collect();

        let mut resumable = Vec::new();
        for session in local {
            match by_file_id.get(session.remote_file_id.as_str()) {
                Some(&remote) => {
                    resumable.push(ResumableUpload {
                        chunks_missing: remote.missing_chunks(),
                        progress_percent: remote.percent,
                        remote: remote.clone(),
                        session,
                    });
                }
                None => {
                    // The remote no longer knows this upload: no dangling
                    // local bookkeeping for it either.
                    info!(
                        file_id = %session.remote_file_id,
                        "removing stale session unknown to remote"
                    );
                    if let Err(e) = self.store.remove(&session.fingerprint) {
                        warn!(fingerprint = %session.fingerprint, error = %e, "stale session removal failed");
                    }
                }
            }
        }
        Ok(resumable)
    }

    /// Drops one local record. Best effort: failures are logged, not raised.
    pub fn discard(&self, fingerprint: &str) {
        if let Err(e) = self.store.remove(fingerprint) {
            warn!(fingerprint, error = %e, "discard failed");
        }
    }

    /// Drops every local record for a transfer. Best effort.
    pub fn discard_all(&self, transfer_id: &str) {
        match self.store.list_by_transfer(transfer_id) {
            Ok(sessions) => {
                for session in sessions {
                    self.discard(&session.fingerprint);
                }
            }
            Err(e) => warn!(transfer = transfer_id, error = %e, "discard-all listing failed"),
        }
    }
}
