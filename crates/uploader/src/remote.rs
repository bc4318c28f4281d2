//! Remote store trait and its chunk-sink adapter.
//!
//! `RemoteStore` is implemented by the host app over its HTTP client. Using
//! a trait keeps orchestration decoupled from transport and testable with
//! mocks.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use ferry_protocol::{
    InitiateUploadRequest, InitiateUploadResponse, PendingUpload, SendChunkRequest,
    SendChunkResponse, UploadProgressResponse,
};
use ferry_transfer::{ChunkPayload, ChunkSink, TransferError};

use crate::error::UploadError;

type RemoteFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, UploadError>> + Send + 'a>>;

/// Abstract connection to the remote storage/processing service.
pub trait RemoteStore: Send + Sync {
    /// Registers a new upload and returns its remote handle.
    fn initiate_upload(&self, req: InitiateUploadRequest)
    -> RemoteFuture<'_, InitiateUploadResponse>;

    /// Transmits one chunk. Retry/backoff happens behind this call; an error
    /// is permanent.
    fn send_chunk(&self, req: SendChunkRequest) -> RemoteFuture<'_, SendChunkResponse>;

    /// Queries the authoritative chunk-receipt state of one upload.
    fn upload_progress(&self, file_id: String) -> RemoteFuture<'_, UploadProgressResponse>;

    /// Lists incomplete uploads belonging to a transfer.
    fn pending_uploads(&self, transfer_id: String) -> RemoteFuture<'_, Vec<PendingUpload>>;
}

/// Bridges the chunk transport onto a [`RemoteStore`], pinning the chunks to
/// one remote file id and transfer.
pub(crate) struct RemoteChunkSink {
    pub remote: Arc<dyn RemoteStore>,
    pub file_id: String,
    pub transfer_id: String,
}

impl ChunkSink for RemoteChunkSink {
    fn send_chunk(
        &self,
        payload: ChunkPayload,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransferError>> + Send + '_>> {
        Box::pin(async move {
            let index = payload.index;
            let req = SendChunkRequest {
                file_id: self.file_id.clone(),
                chunk_index: payload.index,
                chunk_hash: payload.hash,
                data: payload.data,
                transfer_id: self.transfer_id.clone(),
            };
            self.remote
                .send_chunk(req)
                .await
                .map(|_| ())
                .map_err(|e| TransferError::Chunk {
                    index,
                    message: e.to_string(),
                })
        })
    }
}
