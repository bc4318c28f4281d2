use serde::{Deserialize, Serialize};

/// Event delivered over the remote store's notification channel.
///
/// The remote finishes post-processing asynchronously after the last chunk
/// arrives; these events announce the outcome, keyed by remote file id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RemoteEvent {
    /// The uploaded artifact is fully processed and available.
    #[serde(rename_all = "camelCase")]
    ArtifactAvailable { file_id: String },
    /// Post-processing failed.
    #[serde(rename_all = "camelCase")]
    ArtifactError { file_id: String, message: String },
}

impl RemoteEvent {
    /// Remote file id this event refers to.
    pub fn file_id(&self) -> &str {
        match self {
            RemoteEvent::ArtifactAvailable { file_id } => file_id,
            RemoteEvent::ArtifactError { file_id, .. } => file_id,
        }
    }
}
