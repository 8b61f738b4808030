//! Idempotent catalog registration.
//!
//! Callers invoke [`CatalogWriter::register_asset`] as many times as they
//! like for one upload (thumbnail ready, HLS ready, retries); the repository
//! upsert guarantees a later call never weakens fields an earlier call set.

use chrono::Utc;
use tracing::{info, warn};

use crate::{
    config::CatalogConfig,
    models::{CatalogEntry, RegisterAsset, StreamKeyMapping, UserId},
    repository::{CatalogRepository, StreamKeyRepository},
    storage::BlobStore,
    Error, Result,
};

use super::upload_metadata::MetadataStore;

/// Pick the email the asset is attributed to, in priority order: the
/// mapping's collaborator/owner, then the requester, then the channel
/// table's owner.
#[must_use]
pub fn resolve_owner_email(
    mapping: &StreamKeyMapping,
    requester_email: Option<&str>,
    channel_owner: Option<&str>,
) -> Option<String> {
    mapping
        .attributed_email()
        .or(requester_email)
        .or(channel_owner)
        .map(str::to_string)
}

#[derive(Clone)]
pub struct CatalogWriter {
    catalog: CatalogRepository,
    stream_keys: StreamKeyRepository,
    metadata: MetadataStore,
    blob: BlobStore,
    master_account: UserId,
    default_thumbnail_url: String,
}

impl CatalogWriter {
    #[must_use]
    pub fn new(
        catalog: CatalogRepository,
        stream_keys: StreamKeyRepository,
        metadata: MetadataStore,
        blob: BlobStore,
        config: &CatalogConfig,
    ) -> Self {
        Self {
            catalog,
            stream_keys,
            metadata,
            blob,
            master_account: UserId::from_string(config.master_account.clone()),
            default_thumbnail_url: config.default_thumbnail_url.clone(),
        }
    }

    /// The account all entries are filed under.
    #[must_use]
    pub fn master_account(&self) -> &UserId {
        &self.master_account
    }

    /// Register (or re-register) a finished asset.
    ///
    /// Ownership failures are fatal; metadata-store reads are best-effort;
    /// an unverifiable thumbnail URL degrades to the default placeholder.
    pub async fn register_asset(&self, req: &RegisterAsset) -> Result<CatalogEntry> {
        let file_id = req.upload_id.file_id();

        let mapping = self
            .stream_keys
            .find(&req.stream_key)
            .await?
            .ok_or_else(|| {
                Error::OwnershipUnresolved(format!("no mapping for stream key {}", req.stream_key))
            })?;

        let channel_owner = match (mapping.attributed_email(), req.requester_email.as_deref()) {
            // Only hit the channel table when nothing else can resolve.
            (None, None) => match req.channel_name.as_deref() {
                Some(name) => self.stream_keys.find_owner_by_channel(name).await?,
                None => None,
            },
            _ => None,
        };

        let owner_email = resolve_owner_email(
            &mapping,
            req.requester_email.as_deref(),
            channel_owner.as_deref(),
        )
        .ok_or_else(|| {
            Error::OwnershipUnresolved(format!(
                "no owner for stream key {} (upload {})",
                req.stream_key, req.upload_id
            ))
        })?;

        let folder_name = mapping.channel_name.clone().or_else(|| req.channel_name.clone());

        let metadata = match &req.metadata {
            Some(meta) => meta.clone(),
            None => self.metadata.get(&req.upload_id).await.unwrap_or_default(),
        };

        let thumbnail_url = self.resolve_thumbnail_url(req).await;

        let post_automatically = self.stream_keys.post_automatically(&owner_email).await?;
        // The placeholder counts as "set", so this reduces to the flag.
        let is_visible = post_automatically && !thumbnail_url.is_empty();

        let entry = CatalogEntry {
            owner_id: self.master_account.clone(),
            file_id,
            upload_id: req.upload_id.clone(),
            hls_url: req.hls_url.clone(),
            thumbnail_url,
            folder_name,
            creator_id: mapping.creator_id.clone(),
            is_collaborator_video: mapping.is_collaborator_key,
            is_visible,
            title: metadata.title,
            description: metadata.description,
            price: metadata.price,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let written = self
            .catalog
            .upsert(&entry, &self.default_thumbnail_url)
            .await
            .map_err(|e| Error::CatalogWriteFailed(e.to_string()))?;

        info!(
            upload_id = %req.upload_id,
            file_id = %written.file_id,
            prefix = %req.rendition_prefix,
            owner = %owner_email,
            visible = written.is_visible,
            "Catalog entry registered"
        );

        Ok(written)
    }

    /// The entry's thumbnail URL is never empty: a caller-supplied URL must
    /// pass a HEAD check, anything else becomes the default placeholder.
    async fn resolve_thumbnail_url(&self, req: &RegisterAsset) -> String {
        match req.thumbnail_url.as_deref() {
            Some(url) if url == self.default_thumbnail_url => url.to_string(),
            Some(url) => {
                if self.blob.verify_public_url(url).await {
                    url.to_string()
                } else {
                    warn!(
                        upload_id = %req.upload_id,
                        url,
                        "Thumbnail URL failed verification, using default"
                    );
                    self.default_thumbnail_url.clone()
                }
            }
            None => self.default_thumbnail_url.clone(),
        }
    }
}
