use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::id::{StreamKey, UploadId, UserId};
use super::upload::UploadMetadata;

/// Authoritative record for a stream key: who really owns the channel and
/// who is streaming on it. Pre-existing platform data; read-only here.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct StreamKeyMapping {
    pub stream_key: StreamKey,
    pub owner_email: Option<String>,
    pub collaborator_email: Option<String>,
    pub is_collaborator_key: bool,
    pub channel_name: Option<String>,
    pub creator_id: Option<UserId>,
}

impl StreamKeyMapping {
    /// The email the asset should be attributed to: the collaborator when
    /// this is a collaborator key, otherwise the owner.
    #[must_use]
    pub fn attributed_email(&self) -> Option<&str> {
        if self.is_collaborator_key {
            self.collaborator_email.as_deref().or(self.owner_email.as_deref())
        } else {
            self.owner_email.as_deref()
        }
    }
}

/// The record a viewer app reads, keyed by `(owner_id, file_id)`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub owner_id: UserId,
    pub file_id: String,
    pub upload_id: UploadId,
    pub hls_url: Option<String>,
    /// Never null or empty; the default placeholder when no real thumbnail
    /// could be produced.
    pub thumbnail_url: String,
    pub folder_name: Option<String>,
    /// The true streamer, shown to viewers even though the entry is filed
    /// under the master account.
    pub creator_id: Option<UserId>,
    pub is_collaborator_video: bool,
    pub is_visible: bool,
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to register (or re-register) a finished asset.
#[derive(Debug, Clone)]
pub struct RegisterAsset {
    pub stream_key: StreamKey,
    pub upload_id: UploadId,
    /// Shared artifact prefix, `<streamKey>_<uploadId>`.
    pub rendition_prefix: String,
    /// Advisory requester identity; used only when the mapping resolves no
    /// owner.
    pub requester_email: Option<String>,
    /// Advisory channel name; ignored when the mapping supplies one.
    pub channel_name: Option<String>,
    /// Thumbnail URL produced by the pipeline, if any. HEAD-validated before
    /// the entry records it.
    pub thumbnail_url: Option<String>,
    /// Master playlist URL once the primary rendition is playable.
    pub hls_url: Option<String>,
    /// Metadata already read by the caller, if it has it; otherwise the
    /// writer consults the metadata store itself.
    pub metadata: Option<UploadMetadata>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping() -> StreamKeyMapping {
        StreamKeyMapping {
            stream_key: StreamKey::from_string("sk".to_string()),
            owner_email: Some("owner@example.com".to_string()),
            collaborator_email: Some("collab@example.com".to_string()),
            is_collaborator_key: false,
            channel_name: Some("Chan".to_string()),
            creator_id: Some(UserId::from_string("creator".to_string())),
        }
    }

    #[test]
    fn test_attributed_email_prefers_owner() {
        assert_eq!(mapping().attributed_email(), Some("owner@example.com"));
    }

    #[test]
    fn test_attributed_email_prefers_collaborator_for_collab_keys() {
        let mut m = mapping();
        m.is_collaborator_key = true;
        assert_eq!(m.attributed_email(), Some("collab@example.com"));
    }

    #[test]
    fn test_attributed_email_falls_back_to_owner_when_collaborator_missing() {
        let mut m = mapping();
        m.is_collaborator_key = true;
        m.collaborator_email = None;
        assert_eq!(m.attributed_email(), Some("owner@example.com"));
    }
}
