//! Chunk transport: splits a file buffer into fixed-size pieces and sends a
//! chosen subset under a bounded concurrency budget.
//!
//! Only the requested chunk indices are transmitted, which is what makes
//! partial sends (resume) possible. The remote endpoint is abstracted behind
//! [`ChunkSink`] so the engine stays testable without a network.

mod chunked;
mod sender;

pub use chunked::{ChunkDescriptor, chunk_count, chunk_descriptor};
pub use sender::{ChunkPayload, ChunkSender, ChunkSink};

/// Default chunk size: 5 MiB.
///
/// The remote negotiates the actual size via `InitiateUploadResponse`;
/// this value is the fallback when it reports none.
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Default bound on simultaneously in-flight chunk sends.
pub const CHUNK_FAN_OUT: usize = 4;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("chunk {index} failed: {message}")]
    Chunk { index: u32, message: String },

    #[error("chunk index {index} out of range for {total} chunks")]
    IndexOutOfRange { index: u32, total: u32 },

    #[error("upload cancelled")]
    Cancelled,
}
