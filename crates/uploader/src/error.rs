//! Upload error taxonomy.

use ferry_fingerprint::FingerprintError;
use ferry_session_store::StoreError;
use ferry_transfer::TransferError;

/// Errors produced while orchestrating an upload.
///
/// Every variant's `Display` text is what lands in `UploadItem.error`, so
/// messages are written for the person staring at a failed upload.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("this is not the same file: fingerprint mismatch")]
    FingerprintMismatch,

    #[error("upload {0} is no longer valid on the remote store")]
    RemoteInvalid(String),

    #[error("remote error: {0}")]
    Remote(String),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("session store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl UploadError {
    /// `true` for a user-initiated cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, UploadError::Transfer(TransferError::Cancelled))
    }
}
