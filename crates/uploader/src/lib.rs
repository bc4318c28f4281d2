//! Upload orchestration.
//!
//! The [`Uploader`] is the state machine exposed to callers: it decides
//! fresh-start versus resume, drives the chunk transport, and maintains the
//! observable [`UploadItem`] registry. The [`Reconciler`] cross-references
//! locally persisted sessions with the remote's pending-upload listing to
//! find what can still be resumed after a restart.

mod error;
mod items;
mod mime;
mod recovery;
mod remote;
mod uploader;

pub use error::UploadError;
pub use items::{UploadItem, UploadRegistry, UploadStatus};
pub use mime::mime_for;
pub use recovery::{Reconciler, ResumableUpload};
pub use remote::RemoteStore;
pub use uploader::{Uploader, UploaderConfig};
