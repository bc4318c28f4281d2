use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// Lifecycle state of one upload.
///
/// `Pending -> Sending -> Processing -> Complete`, with `Error` reachable
/// from `Sending`/`Processing`. Cancellation is a terminal `Error` with a
/// distinguishing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "sending")]
    Sending,
    #[serde(rename = "processing")]
    Processing,
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "error")]
    Error,
}

/// Live, observable state of one upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadItem {
    /// Remote file id once known; `temp_{fingerprint}` before that.
    pub id: String,
    pub fingerprint: String,
    pub file_name: String,
    pub file_size: u64,
    /// 0 to 100, monotonically non-decreasing.
    pub progress: f64,
    pub status: UploadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub chunks_total: u32,
    pub chunks_sent: u32,
    #[serde(default)]
    pub resuming: bool,
}

impl UploadItem {
    /// A freshly registered upload awaiting its remote handle.
    pub fn pending(id: String, fingerprint: String, file_name: String, file_size: u64) -> Self {
        Self {
            id,
            fingerprint,
            file_name,
            file_size,
            progress: 0.0,
            status: UploadStatus::Pending,
            error: None,
            chunks_total: 0,
            chunks_sent: 0,
            resuming: false,
        }
    }

    /// `true` once the upload can no longer make progress.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, UploadStatus::Complete | UploadStatus::Error)
    }
}

/// Thread-safe map of uploads keyed by item id.
///
/// The orchestrator is the only writer; UI layers take snapshots.
#[derive(Default)]
pub struct UploadRegistry {
    inner: RwLock<HashMap<String, UploadItem>>,
}

impl UploadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an item.
    pub fn insert(&self, item: UploadItem) {
        let mut map = self.inner.write().unwrap();
        map.insert(item.id.clone(), item);
    }

    /// Applies `f` to the item with the given id. Returns `false` if absent.
    pub fn update(&self, id: &str, f: impl FnOnce(&mut UploadItem)) -> bool {
        let mut map = self.inner.write().unwrap();
        match map.get_mut(id) {
            Some(item) => {
                f(item);
                true
            }
            None => false,
        }
    }

    /// Moves an item to a new key, updating its id. Used when the remote
    /// assigns the real file id to a `temp_` placeholder.
    pub fn rekey(&self, old_id: &str, new_id: &str) -> bool {
        let mut map = self.inner.write().unwrap();
        match map.remove(old_id) {
            Some(mut item) => {
                item.id = new_id.to_string();
                map.insert(new_id.to_string(), item);
                true
            }
            None => false,
        }
    }

    /// Removes an item; returns it if present.
    pub fn remove(&self, id: &str) -> Option<UploadItem> {
        self.inner.write().unwrap().remove(id)
    }

    /// Clones the item with the given id.
    pub fn get(&self, id: &str) -> Option<UploadItem> {
        self.inner.read().unwrap().get(id).cloned()
    }

    /// Snapshot of every tracked upload.
    pub fn snapshot(&self) -> Vec<UploadItem> {
        let mut items: Vec<UploadItem> = self.inner.read().unwrap().values().cloned().collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        items
    }
}
