use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::chunked::chunk_descriptor;
use crate::{CHUNK_FAN_OUT, TransferError};

/// One chunk ready for transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPayload {
    pub index: u32,
    /// SHA-256 hex digest of `data`.
    pub hash: String,
    pub data: Vec<u8>,
}

/// Receiving end of the chunk transport.
///
/// The host app implements this over its HTTP client; retry/backoff and
/// per-request timeouts live behind this boundary. Using a trait keeps the
/// send loop decoupled from transport and testable with mocks.
pub trait ChunkSink: Send + Sync {
    /// Transmits one chunk. An error here is treated as permanent.
    fn send_chunk(
        &self,
        payload: ChunkPayload,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransferError>> + Send + '_>>;
}

/// Sends a selected set of chunks with bounded fan-out.
pub struct ChunkSender {
    fan_out: usize,
    cancel: CancellationToken,
}

impl ChunkSender {
    /// Creates a sender with the default fan-out of [`CHUNK_FAN_OUT`].
    pub fn new(cancel: CancellationToken) -> Self {
        Self::with_fan_out(CHUNK_FAN_OUT, cancel)
    }

    /// Creates a sender with an explicit fan-out. A fan-out of 1 makes
    /// completion order deterministic, which the tests rely on.
    pub fn with_fan_out(fan_out: usize, cancel: CancellationToken) -> Self {
        Self {
            fan_out: fan_out.max(1),
            cancel,
        }
    }

    /// Sends every chunk listed in `indices`, at most `fan_out` in flight.
    ///
    /// Chunks may complete in any order. `on_progress` is invoked once per
    /// successful chunk with the cumulative sent count, serialized so the
    /// count is monotonically non-decreasing. The first permanent failure
    /// stops new dispatch: in-flight siblings finish, queued chunks are
    /// skipped, and the aggregate result is that first error. Cancellation
    /// preempts any chunk not yet dispatched.
    pub async fn send_all<F>(
        &self,
        sink: Arc<dyn ChunkSink>,
        file_bytes: Arc<Vec<u8>>,
        chunk_size: u64,
        total_chunks: u32,
        indices: &[u32],
        on_progress: F,
    ) -> Result<(), TransferError>
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        let file_len = file_bytes.len() as u64;
        let mut descriptors = Vec::with_capacity(indices.len());
        for &index in indices {
            if index >= total_chunks {
                return Err(TransferError::IndexOutOfRange {
                    index,
                    total: total_chunks,
                });
            }
            descriptors.push(chunk_descriptor(index, file_len, chunk_size)?);
        }

        let semaphore = Arc::new(Semaphore::new(self.fan_out));
        let failed = Arc::new(AtomicBool::new(false));
        // Mutex held across the callback so progress updates serialize.
        let progress = Arc::new((std::sync::Mutex::new(0u32), on_progress));

        let mut tasks = JoinSet::new();
        for descriptor in descriptors {
            let semaphore = Arc::clone(&semaphore);
            let failed = Arc::clone(&failed);
            let progress = Arc::clone(&progress);
            let sink = Arc::clone(&sink);
            let file_bytes = Arc::clone(&file_bytes);
            let cancel = self.cancel.clone();

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| TransferError::Cancelled)?;
                if cancel.is_cancelled() {
                    return Err(TransferError::Cancelled);
                }
                if failed.load(Ordering::SeqCst) {
                    // A sibling already failed permanently; dispatch nothing new.
                    return Ok(());
                }

                let data = file_bytes[descriptor.range()].to_vec();
                let hash = ferry_fingerprint::chunk_hash(&data);
                let payload = ChunkPayload {
                    index: descriptor.index,
                    hash,
                    data,
                };

                match sink.send_chunk(payload).await {
                    Ok(()) => {
                        let (sent, callback) = &*progress;
                        let mut sent = sent.lock().unwrap();
                        *sent += 1;
                        callback(*sent);
                        Ok(())
                    }
                    Err(e) => {
                        debug!(index = descriptor.index, error = %e, "chunk send failed");
                        failed.store(true, Ordering::SeqCst);
                        Err(e)
                    }
                }
            });
        }

        let mut first_err: Option<TransferError> = None;
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.unwrap_or_else(|e| {
                Err(TransferError::Chunk {
                    index: 0,
                    message: format!("task join error: {e}"),
                })
            });
            if let Err(e) = outcome {
                // A real chunk failure is more informative than the
                // cancellations it fans out into.
                match &first_err {
                    None => first_err = Some(e),
                    Some(TransferError::Cancelled)
                        if !matches!(e, TransferError::Cancelled) =>
                    {
                        first_err = Some(e)
                    }
                    Some(_) => {}
                }
            }
        }

        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every payload it accepts; fails permanently on `fail_index`.
    struct RecordingSink {
        accepted: Mutex<Vec<ChunkPayload>>,
        fail_index: Option<u32>,
        cancel_on_send: Option<CancellationToken>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                accepted: Mutex::new(Vec::new()),
                fail_index: None,
                cancel_on_send: None,
            }
        }

        fn failing_at(index: u32) -> Self {
            Self {
                fail_index: Some(index),
                ..Self::new()
            }
        }

        fn accepted_indices(&self) -> Vec<u32> {
            let mut v: Vec<u32> = self.accepted.lock().unwrap().iter().map(|p| p.index).collect();
            v.sort_unstable();
            v
        }
    }

    impl ChunkSink for RecordingSink {
        fn send_chunk(
            &self,
            payload: ChunkPayload,
        ) -> Pin<Box<dyn Future<Output = Result<(), TransferError>> + Send + '_>> {
            Box::pin(async move {
                if let Some(token) = &self.cancel_on_send {
                    token.cancel();
                }
                if self.fail_index == Some(payload.index) {
                    return Err(TransferError::Chunk {
                        index: payload.index,
                        message: "simulated endpoint failure".into(),
                    });
                }
                self.accepted.lock().unwrap().push(payload);
                Ok(())
            })
        }
    }

    fn file_of(len: usize) -> Arc<Vec<u8>> {
        Arc::new((0..len).map(|i| (i % 251) as u8).collect())
    }

    #[tokio::test]
    async fn sends_exactly_requested_indices() {
        let sink = Arc::new(RecordingSink::new());
        let sender = ChunkSender::with_fan_out(1, CancellationToken::new());
        let file = file_of(11);

        sender
            .send_all(Arc::clone(&sink) as Arc<dyn ChunkSink>, file, 4, 3, &[0, 2], |_| {})
            .await
            .unwrap();

        assert_eq!(sink.accepted_indices(), vec![0, 2]);
    }

    #[tokio::test]
    async fn chunk_bytes_and_hashes_are_correct() {
        let sink = Arc::new(RecordingSink::new());
        let sender = ChunkSender::with_fan_out(1, CancellationToken::new());
        let file = file_of(11);

        sender
            .send_all(
                Arc::clone(&sink) as Arc<dyn ChunkSink>,
                Arc::clone(&file),
                4,
                3,
                &[1, 2],
                |_| {},
            )
            .await
            .unwrap();

        let accepted = sink.accepted.lock().unwrap();
        let chunk1 = accepted.iter().find(|p| p.index == 1).unwrap();
        assert_eq!(chunk1.data, file[4..8].to_vec());
        assert_eq!(chunk1.hash, ferry_fingerprint::chunk_hash(&file[4..8]));
        // Last chunk is short.
        let chunk2 = accepted.iter().find(|p| p.index == 2).unwrap();
        assert_eq!(chunk2.data, file[8..11].to_vec());
    }

    #[tokio::test]
    async fn progress_is_cumulative_and_monotonic() {
        let sink = Arc::new(RecordingSink::new());
        let sender = ChunkSender::with_fan_out(4, CancellationToken::new());
        let seen = Arc::new(Mutex::new(Vec::<u32>::new()));
        let seen2 = Arc::clone(&seen);

        sender
            .send_all(
                Arc::clone(&sink) as Arc<dyn ChunkSink>,
                file_of(20),
                4,
                5,
                &[0, 1, 2, 3, 4],
                move |count| seen2.lock().unwrap().push(count),
            )
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn failure_stops_new_dispatch() {
        let sink = Arc::new(RecordingSink::failing_at(2));
        let sender = ChunkSender::with_fan_out(1, CancellationToken::new());

        let result = sender
            .send_all(
                Arc::clone(&sink) as Arc<dyn ChunkSink>,
                file_of(16),
                4,
                4,
                &[0, 1, 2, 3],
                |_| {},
            )
            .await;

        assert!(matches!(
            result.unwrap_err(),
            TransferError::Chunk { index: 2, .. }
        ));
        // Chunks before the failure landed; chunk 3 was never dispatched.
        assert_eq!(sink.accepted_indices(), vec![0, 1]);
    }

    #[tokio::test]
    async fn cancelled_before_start_sends_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let sink = Arc::new(RecordingSink::new());
        let sender = ChunkSender::with_fan_out(2, cancel);

        let result = sender
            .send_all(Arc::clone(&sink) as Arc<dyn ChunkSink>, file_of(8), 4, 2, &[0, 1], |_| {})
            .await;

        assert!(matches!(result.unwrap_err(), TransferError::Cancelled));
        assert!(sink.accepted_indices().is_empty());
    }

    #[tokio::test]
    async fn cancel_mid_flight_lets_dispatched_chunk_finish() {
        let cancel = CancellationToken::new();
        let sink = Arc::new(RecordingSink {
            cancel_on_send: Some(cancel.clone()),
            ..RecordingSink::new()
        });
        let sender = ChunkSender::with_fan_out(1, cancel);

        let result = sender
            .send_all(
                Arc::clone(&sink) as Arc<dyn ChunkSink>,
                file_of(12),
                4,
                3,
                &[0, 1, 2],
                |_| {},
            )
            .await;

        assert!(matches!(result.unwrap_err(), TransferError::Cancelled));
        // The chunk already in flight completed; the rest never started.
        assert_eq!(sink.accepted_indices(), vec![0]);
    }

    #[tokio::test]
    async fn rejects_index_beyond_total() {
        let sink = Arc::new(RecordingSink::new());
        let sender = ChunkSender::new(CancellationToken::new());

        let result = sender
            .send_all(Arc::clone(&sink) as Arc<dyn ChunkSink>, file_of(8), 4, 2, &[5], |_| {})
            .await;

        assert!(matches!(
            result.unwrap_err(),
            TransferError::IndexOutOfRange { index: 5, total: 2 }
        ));
    }
}
