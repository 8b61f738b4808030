use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::id::{StreamKey, UploadId};

/// Transient per-upload metadata, written before any transcode work so
/// out-of-band consumers of blob-store events can read it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Decimal string as received from the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
}

impl UploadMetadata {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.price.is_none()
    }
}

/// One ingestion job, flowing through every pipeline step as a value.
///
/// Fields are filled in as they are computed; nothing about an upload lives
/// in process-global state.
#[derive(Debug, Clone)]
pub struct Upload {
    pub stream_key: StreamKey,
    pub upload_id: UploadId,
    /// Requester identity from the HTTP request. Advisory only; ownership
    /// comes from the stream-key mapping.
    pub user_email: Option<String>,
    /// Channel name asserted by the request. Advisory only.
    pub channel_name: Option<String>,
    pub metadata: UploadMetadata,
    /// Raw bytes on local disk. Starts as the multipart spool location,
    /// replaced with the final recording-dir path during pre-flight.
    pub source_path: PathBuf,
    /// Verified thumbnail URL, set once the early thumbnail task succeeds.
    pub thumbnail_url: Option<String>,
}

impl Upload {
    #[must_use]
    pub fn new(stream_key: StreamKey, upload_id: UploadId, source_path: PathBuf) -> Self {
        Self {
            stream_key,
            upload_id,
            user_email: None,
            channel_name: None,
            metadata: UploadMetadata::default(),
            source_path,
            thumbnail_url: None,
        }
    }

    /// Shared file-name prefix for everything this upload produces:
    /// `<streamKey>_<uploadId>`.
    #[must_use]
    pub fn prefix(&self) -> String {
        format!("{}_{}", self.stream_key, self.upload_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_combines_key_and_id() {
        let upload = Upload::new(
            StreamKey::from_string("sk_A".to_string()),
            UploadId::from_string("u1".to_string()),
            PathBuf::from("/tmp/u1.mp4"),
        );
        assert_eq!(upload.prefix(), "sk_A_u1");
    }

    #[test]
    fn test_metadata_is_empty() {
        assert!(UploadMetadata::default().is_empty());
        let meta = UploadMetadata {
            title: Some("t".to_string()),
            ..Default::default()
        };
        assert!(!meta.is_empty());
    }
}
