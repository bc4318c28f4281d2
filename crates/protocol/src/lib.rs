//! Wire types for the Ferry upload API.
//!
//! Request/response payloads exchanged with the remote store, plus the
//! events delivered over its notification channel. Pure data: the HTTP
//! plumbing lives in the host application.

pub mod messages;
pub mod types;

pub use messages::{
    InitiateUploadRequest, InitiateUploadResponse, PendingUpload, SendChunkRequest,
    SendChunkResponse, UploadProgressResponse,
};
pub use types::RemoteEvent;
