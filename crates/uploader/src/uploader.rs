//! The upload state machine.
//!
//! One `Uploader` serves many concurrent files; each upload is an
//! independent run of `start`/`resume` sharing only the session store
//! (fingerprint-keyed, so no cross-upload locking) and the observable
//! registry.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use ferry_protocol::{InitiateUploadRequest, RemoteEvent, UploadProgressResponse};
use ferry_session_store::{SessionStore, UploadSession};
use ferry_transfer::{CHUNK_FAN_OUT, ChunkSender, ChunkSink, DEFAULT_CHUNK_SIZE};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::UploadError;
use crate::items::{UploadItem, UploadRegistry, UploadStatus};
use crate::mime::mime_for;
use crate::recovery::Reconciler;
use crate::remote::{RemoteChunkSink, RemoteStore};

/// Tunables for the orchestrator.
#[derive(Debug, Clone)]
pub struct UploaderConfig {
    /// Simultaneously in-flight chunk sends per upload. A fan-out of 1
    /// makes chunk ordering deterministic for tests.
    pub fan_out: usize,
    /// Chunk size used when the remote does not negotiate one.
    pub default_chunk_size: u64,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            fan_out: CHUNK_FAN_OUT,
            default_chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Orchestrates resumable uploads against one remote store.
pub struct Uploader {
    remote: Arc<dyn RemoteStore>,
    store: Arc<SessionStore>,
    registry: Arc<UploadRegistry>,
    cancels: Mutex<HashMap<String, CancellationToken>>,
    config: UploaderConfig,
}

impl Uploader {
    pub fn new(remote: Arc<dyn RemoteStore>, store: Arc<SessionStore>) -> Self {
        Self::with_config(remote, store, UploaderConfig::default())
    }

    pub fn with_config(
        remote: Arc<dyn RemoteStore>,
        store: Arc<SessionStore>,
        config: UploaderConfig,
    ) -> Self {
        Self {
            remote,
            store,
            registry: Arc::new(UploadRegistry::new()),
            cancels: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// A reconciler sharing this uploader's store and remote.
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(Arc::clone(&self.store), Arc::clone(&self.remote))
    }

    /// Snapshot of every tracked upload.
    pub fn uploads(&self) -> Vec<UploadItem> {
        self.registry.snapshot()
    }

    /// Clones one tracked upload.
    pub fn get_upload(&self, id: &str) -> Option<UploadItem> {
        self.registry.get(id)
    }

    /// Uploads a file, resuming a prior attempt when a durable session for
    /// the same fingerprint and transfer still exists and the remote still
    /// recognizes it. Returns the item id.
    pub async fn start(&self, path: &Path, transfer_id: &str) -> Result<String, UploadError> {
        let fingerprint = {
            let path = path.to_path_buf();
            blocking(move || ferry_fingerprint::fingerprint(&path)).await??
        };

        let prior = match self.store.get(&fingerprint) {
            Ok(prior) => prior,
            Err(e) => {
                warn!(error = %e, "session lookup failed; starting fresh");
                None
            }
        };
        if let Some(session) = prior
            && session.transfer_id == transfer_id
        {
            match self
                .remote
                .upload_progress(session.remote_file_id.clone())
                .await
            {
                Ok(progress) if progress.valid => {
                    info!(file_id = %session.remote_file_id, "prior session still valid; resuming");
                    return self.resume_validated(path, &session, progress).await;
                }
                Ok(_) => {
                    debug!(file_id = %session.remote_file_id, "prior session expired on remote");
                    self.remove_session_best_effort(&fingerprint);
                }
                Err(e) => {
                    warn!(file_id = %session.remote_file_id, error = %e, "progress probe failed; starting fresh");
                    self.remove_session_best_effort(&fingerprint);
                }
            }
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file_size = std::fs::metadata(path)?.len();

        let temp_id = format!("temp_{fingerprint}");
        self.registry.insert(UploadItem::pending(
            temp_id.clone(),
            fingerprint.clone(),
            file_name.clone(),
            file_size,
        ));

        let mut item_id = temp_id;
        match self
            .start_fresh(path, transfer_id, &fingerprint, &file_name, file_size, &mut item_id)
            .await
        {
            Ok(()) => Ok(item_id),
            Err(e) => {
                self.fail_item(&item_id, &e);
                Err(e)
            }
        }
    }

    /// Resumes an upload from a durable session. The supplied file must
    /// fingerprint to exactly `session.fingerprint`; picking a different
    /// file is refused outright.
    pub async fn resume(
        &self,
        path: &Path,
        session: &UploadSession,
    ) -> Result<String, UploadError> {
        let fingerprint = {
            let path = path.to_path_buf();
            blocking(move || ferry_fingerprint::fingerprint(&path)).await??
        };
        if fingerprint != session.fingerprint {
            let e = UploadError::FingerprintMismatch;
            self.insert_error_item(session, &e);
            return Err(e);
        }

        let progress = match self
            .remote
            .upload_progress(session.remote_file_id.clone())
            .await
        {
            Ok(progress) => progress,
            Err(e) => {
                self.insert_error_item(session, &e);
                return Err(e);
            }
        };
        self.resume_validated(path, session, progress).await
    }

    /// Cancels an upload: no further chunks are dispatched, but chunks
    /// already in flight finish. The durable session stays until the caller
    /// discards it.
    pub fn cancel(&self, id: &str) {
        if let Some(token) = self.cancels.lock().unwrap().get(id) {
            token.cancel();
        }
        self.registry.update(id, |item| {
            if matches!(item.status, UploadStatus::Pending | UploadStatus::Sending) {
                item.status = UploadStatus::Error;
                item.error = Some("upload cancelled".into());
            }
        });
    }

    /// Drops an upload from the observable registry.
    pub fn clear(&self, id: &str) {
        self.registry.remove(id);
        self.cancels.lock().unwrap().remove(id);
    }

    /// Applies one event from the remote's notification channel.
    pub fn apply_remote_event(&self, event: &RemoteEvent) {
        match event {
            RemoteEvent::ArtifactAvailable { file_id } => {
                self.registry.update(file_id, |item| {
                    if item.status == UploadStatus::Processing {
                        item.status = UploadStatus::Complete;
                        item.progress = 100.0;
                    }
                });
            }
            RemoteEvent::ArtifactError { file_id, message } => {
                self.registry.update(file_id, |item| {
                    if item.status != UploadStatus::Complete {
                        item.status = UploadStatus::Error;
                        item.error = Some(message.clone());
                    }
                });
            }
        }
    }

    /// Consumes notification events from a channel until it closes.
    pub fn spawn_event_loop(
        self: &Arc<Self>,
        mut events: tokio::sync::mpsc::Receiver<RemoteEvent>,
    ) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                this.apply_remote_event(&event);
            }
        })
    }

    async fn start_fresh(
        &self,
        path: &Path,
        transfer_id: &str,
        fingerprint: &str,
        file_name: &str,
        file_size: u64,
        item_id: &mut String,
    ) -> Result<(), UploadError> {
        let content_hash = {
            let path = path.to_path_buf();
            blocking(move || ferry_fingerprint::full_hash(&path)).await??
        };

        let init = self
            .remote
            .initiate_upload(InitiateUploadRequest {
                file_name: file_name.to_string(),
                size_bytes: file_size,
                mime_type: mime_for(path).to_string(),
                content_hash: content_hash.clone(),
                transfer_id: transfer_id.to_string(),
            })
            .await?;

        let file_id = init.file_id.clone();
        self.registry.rekey(item_id, &file_id);
        *item_id = file_id.clone();
        self.registry.update(&file_id, |item| {
            item.chunks_total = init.total_chunks;
            item.status = UploadStatus::Sending;
        });

        if init.duplicate {
            self.registry.update(&file_id, |item| {
                item.progress = 100.0;
                item.chunks_sent = init.total_chunks;
                item.status = UploadStatus::Complete;
            });
            info!(file_id = %file_id, "content already stored remotely; no chunk traffic");
            return Ok(());
        }

        let chunk_size = if init.chunk_size_bytes > 0 {
            init.chunk_size_bytes
        } else {
            self.config.default_chunk_size
        };

        let now = Utc::now();
        let session = UploadSession {
            fingerprint: fingerprint.to_string(),
            remote_file_id: file_id.clone(),
            transfer_id: transfer_id.to_string(),
            file_name: file_name.to_string(),
            file_size,
            mime_type: mime_for(path).to_string(),
            content_hash,
            total_chunks: init.total_chunks,
            chunk_size_bytes: chunk_size,
            created_at: now,
            updated_at: now,
        };
        if let Err(e) = self.store.save(&session) {
            // Memory-only for this run: the upload proceeds, a restart
            // will not be able to resume it.
            warn!(file_id = %file_id, error = %e, "session not persisted; resumability degraded");
        }

        let indices: Vec<u32> = (0..init.total_chunks).collect();
        self.run_transfer(
            path,
            &file_id,
            transfer_id,
            fingerprint,
            chunk_size,
            init.total_chunks,
            indices,
            0,
        )
        .await
    }

    async fn resume_validated(
        &self,
        path: &Path,
        session: &UploadSession,
        progress: UploadProgressResponse,
    ) -> Result<String, UploadError> {
        let item_id = session.remote_file_id.clone();

        if !progress.valid {
            self.remove_session_best_effort(&session.fingerprint);
            let e = UploadError::RemoteInvalid(item_id.clone());
            self.insert_error_item(session, &e);
            return Err(e);
        }

        let total = progress.total_chunks;
        let received: HashSet<u32> = progress.received_chunks.iter().copied().collect();
        let missing: Vec<u32> = (0..total).filter(|i| !received.contains(i)).collect();
        let already_received = total - missing.len() as u32;

        let mut item = UploadItem::pending(
            item_id.clone(),
            session.fingerprint.clone(),
            session.file_name.clone(),
            session.file_size,
        );
        item.status = UploadStatus::Sending;
        item.progress = percent(already_received, total);
        item.chunks_total = total;
        item.chunks_sent = already_received;
        item.resuming = true;
        self.registry.insert(item);

        if missing.is_empty() {
            self.registry.update(&item_id, |item| {
                item.progress = 100.0;
                item.chunks_sent = total;
                item.status = UploadStatus::Processing;
            });
            self.remove_session_best_effort(&session.fingerprint);
            info!(file_id = %item_id, "remote already holds every chunk");
            return Ok(item_id);
        }

        if let Err(e) = self.store.touch(&session.fingerprint) {
            warn!(fingerprint = %session.fingerprint, error = %e, "session touch failed");
        }

        let chunk_size = if progress.chunk_size_bytes > 0 {
            progress.chunk_size_bytes
        } else {
            session.chunk_size_bytes
        };

        debug!(
            file_id = %item_id,
            missing = missing.len(),
            total,
            "resuming with missing chunks only"
        );
        match self
            .run_transfer(
                path,
                &item_id,
                &session.transfer_id,
                &session.fingerprint,
                chunk_size,
                total,
                missing,
                already_received,
            )
            .await
        {
            Ok(()) => Ok(item_id),
            Err(e) => {
                self.fail_item(&item_id, &e);
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_transfer(
        &self,
        path: &Path,
        file_id: &str,
        transfer_id: &str,
        fingerprint: &str,
        chunk_size: u64,
        total_chunks: u32,
        indices: Vec<u32>,
        already_received: u32,
    ) -> Result<(), UploadError> {
        // Whole file in memory per attempt: a deliberate simplicity and
        // throughput trade-off that bounds file size to available memory.
        let bytes = {
            let path = path.to_path_buf();
            Arc::new(blocking(move || std::fs::read(&path)).await??)
        };

        let cancel = CancellationToken::new();
        self.cancels
            .lock()
            .unwrap()
            .insert(file_id.to_string(), cancel.clone());

        let sink: Arc<dyn ChunkSink> = Arc::new(RemoteChunkSink {
            remote: Arc::clone(&self.remote),
            file_id: file_id.to_string(),
            transfer_id: transfer_id.to_string(),
        });
        let sender = ChunkSender::with_fan_out(self.config.fan_out, cancel);

        let registry = Arc::clone(&self.registry);
        let progress_id = file_id.to_string();
        let on_progress = move |sent: u32| {
            let done = already_received + sent;
            let value = percent(done, total_chunks);
            registry.update(&progress_id, |item| {
                item.chunks_sent = done;
                if value > item.progress {
                    item.progress = value;
                }
                item.status = if done >= total_chunks {
                    UploadStatus::Processing
                } else {
                    UploadStatus::Sending
                };
            });
        };

        let result = sender
            .send_all(sink, bytes, chunk_size, total_chunks, &indices, on_progress)
            .await;
        self.cancels.lock().unwrap().remove(file_id);
        result?;

        self.registry.update(file_id, |item| {
            item.progress = 100.0;
            item.chunks_sent = total_chunks;
            item.status = UploadStatus::Processing;
        });
        // Completion arrives later over the notification channel; the
        // durable record has served its purpose.
        self.remove_session_best_effort(fingerprint);
        info!(file_id, "all chunks sent; awaiting remote processing");
        Ok(())
    }

    fn fail_item(&self, id: &str, e: &UploadError) {
        error!(item = %id, error = %e, "upload failed");
        self.registry.update(id, |item| {
            item.status = UploadStatus::Error;
            item.error = Some(e.to_string());
        });
    }

    fn insert_error_item(&self, session: &UploadSession, e: &UploadError) {
        let mut item = UploadItem::pending(
            session.remote_file_id.clone(),
            session.fingerprint.clone(),
            session.file_name.clone(),
            session.file_size,
        );
        item.resuming = true;
        item.status = UploadStatus::Error;
        item.error = Some(e.to_string());
        self.registry.insert(item);
    }

    fn remove_session_best_effort(&self, fingerprint: &str) {
        if let Err(e) = self.store.remove(fingerprint) {
            warn!(fingerprint, error = %e, "session removal failed");
        }
    }
}

fn percent(done: u32, total: u32) -> f64 {
    if total == 0 {
        return 100.0;
    }
    f64::from(done) / f64::from(total) * 100.0
}

async fn blocking<T, F>(f: F) -> Result<T, UploadError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| UploadError::Internal(format!("task join error: {e}")))
}
