use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Registers a new upload with the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateUploadRequest {
    pub file_name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    /// SHA-256 of the full file content, used for server-side deduplication.
    pub content_hash: String,
    pub transfer_id: String,
}

/// Sends one chunk of upload data.
///
/// The `data` field is base64-encoded in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendChunkRequest {
    pub file_id: String,
    pub chunk_index: u32,
    /// SHA-256 of `data`, verified server-side.
    pub chunk_hash: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub transfer_id: String,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Remote handle for a newly registered upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateUploadResponse {
    pub file_id: String,
    pub transfer_id: String,
    pub file_name: String,
    pub size_bytes: u64,
    pub total_chunks: u32,
    pub chunk_size_bytes: u64,
    /// The content hash matched an already stored artifact; no chunks needed.
    pub duplicate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_file_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Receipt for a single chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendChunkResponse {
    pub file_id: String,
    pub received_count: u32,
    pub total_chunks: u32,
    pub percent: f64,
    pub complete: bool,
}

/// Authoritative chunk-receipt state for one upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgressResponse {
    pub file_id: String,
    pub total_chunks: u32,
    pub chunk_size_bytes: u64,
    pub received_chunks: Vec<u32>,
    pub percent: f64,
    /// `false` once the remote has expired or garbage-collected the upload.
    pub valid: bool,
}

/// One entry of the remote's pending (incomplete) upload listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingUpload {
    pub file_id: String,
    pub transfer_id: String,
    pub file_name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub content_hash: String,
    pub total_chunks: u32,
    pub chunk_size_bytes: u64,
    pub received_chunks: Vec<u32>,
    pub percent: f64,
    pub created_at: DateTime<Utc>,
}

impl PendingUpload {
    /// Chunks the remote has not yet received.
    pub fn missing_chunks(&self) -> u32 {
        self.total_chunks.saturating_sub(self.received_chunks.len() as u32)
    }
}

mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_chunk_data_is_base64_in_json() {
        let req = SendChunkRequest {
            file_id: "f1".into(),
            chunk_index: 2,
            chunk_hash: "abc".into(),
            data: vec![0xde, 0xad, 0xbe, 0xef],
            transfer_id: "t1".into(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["data"], "3q2+7w==");
        assert_eq!(json["chunkIndex"], 2);

        let back: SendChunkRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn initiate_response_camel_case_fields() {
        let json = serde_json::json!({
            "fileId": "f1",
            "transferId": "t1",
            "fileName": "video.mp4",
            "sizeBytes": 12_582_912u64,
            "totalChunks": 3,
            "chunkSizeBytes": 5_242_880u64,
            "duplicate": false,
            "createdAt": "2026-01-10T12:00:00Z",
        });
        let resp: InitiateUploadResponse = serde_json::from_value(json).unwrap();
        assert_eq!(resp.total_chunks, 3);
        assert!(!resp.duplicate);
        assert!(resp.existing_file_id.is_none());
    }

    #[test]
    fn pending_upload_missing_chunks() {
        let json = serde_json::json!({
            "fileId": "f1",
            "transferId": "t1",
            "fileName": "a.bin",
            "sizeBytes": 100u64,
            "mimeType": "application/octet-stream",
            "contentHash": "h",
            "totalChunks": 4,
            "chunkSizeBytes": 25u64,
            "receivedChunks": [0, 3],
            "percent": 50.0,
            "createdAt": "2026-01-10T12:00:00Z",
        });
        let pending: PendingUpload = serde_json::from_value(json).unwrap();
        assert_eq!(pending.missing_chunks(), 2);
    }
}
