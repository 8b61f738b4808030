//! Transient upload metadata in Redis.
//!
//! Written before any transcode work so consumers of blob-store events can
//! read title/description/price out-of-band. Reads are best-effort: a
//! missing key or an unreachable Redis never fails the caller.

use std::time::Duration;

use redis::AsyncCommands;
use tracing::warn;

use crate::{
    config::MetadataConfig,
    models::{UploadId, UploadMetadata},
    Result,
};

const KEY_PREFIX: &str = "upload_meta:";

#[derive(Clone)]
pub struct MetadataStore {
    conn: redis::aio::ConnectionManager,
    ttl_seconds: u64,
    settle_delay: Duration,
}

impl MetadataStore {
    #[must_use]
    pub fn new(conn: redis::aio::ConnectionManager, config: &MetadataConfig) -> Self {
        Self {
            conn,
            ttl_seconds: config.ttl_seconds,
            settle_delay: Duration::from_secs(config.settle_delay_seconds),
        }
    }

    #[must_use]
    pub fn key_for(upload_id: &UploadId) -> String {
        format!("{KEY_PREFIX}{upload_id}")
    }

    /// Store metadata, then wait out the configured settle delay so the
    /// store has converged for other readers before processing starts.
    pub async fn put_and_settle(&self, upload_id: &UploadId, meta: &UploadMetadata) -> Result<()> {
        if !meta.is_empty() {
            let json = serde_json::to_string(meta)?;
            let mut conn = self.conn.clone();
            let _: () = conn.set_ex(Self::key_for(upload_id), json, self.ttl_seconds).await?;
        }

        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
        Ok(())
    }

    /// Best-effort read; absence and store failures both come back as `None`.
    pub async fn get(&self, upload_id: &UploadId) -> Option<UploadMetadata> {
        let mut conn = self.conn.clone();
        let json: Option<String> = match conn.get(Self::key_for(upload_id)).await {
            Ok(value) => value,
            Err(e) => {
                warn!(upload_id = %upload_id, error = %e, "Metadata read failed, treating as absent");
                return None;
            }
        };

        json.and_then(|j| match serde_json::from_str(&j) {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!(upload_id = %upload_id, error = %e, "Metadata payload unreadable");
                None
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_includes_upload_id() {
        let id = UploadId::from_string("u1".to_string());
        assert_eq!(MetadataStore::key_for(&id), "upload_meta:u1");
    }
}
