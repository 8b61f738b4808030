//! Blob storage backed by an S3-compatible store through OpenDAL, fronted by
//! a CDN.
//!
//! All objects for an upload live under `clips/<streamKey>/<uploadId>/`;
//! [`object_key`] is the only place that composes keys so call sites cannot
//! drift.

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use glob::Pattern;
use opendal::{services::S3, Operator};
use tracing::{debug, warn};

use crate::{
    config::StorageConfig,
    models::{StreamKey, UploadId},
    Error, Result,
};

/// Backoff schedule for verified uploads (thumbnails, playlists).
const RETRY_BACKOFF_MS: [u64; 3] = [500, 1000, 2000];
/// Per-attempt budget for a verified upload.
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Key of the directory holding everything for one upload:
/// `clips/<streamKey>/<uploadId>`.
#[must_use]
pub fn dir_key(stream_key: &StreamKey, upload_id: &UploadId) -> String {
    format!("clips/{stream_key}/{upload_id}")
}

/// Canonical object key: `clips/<streamKey>/<uploadId>/<basename>`.
#[must_use]
pub fn object_key(stream_key: &StreamKey, upload_id: &UploadId, basename: &str) -> String {
    format!("{}/{basename}", dir_key(stream_key, upload_id))
}

/// Directory key for one episode:
/// `clips/<streamKey>/<uploadId>/episodes/episode_<n>`.
#[must_use]
pub fn episode_dir_key(stream_key: &StreamKey, upload_id: &UploadId, episode_number: i32) -> String {
    format!("{}/episodes/episode_{episode_number}", dir_key(stream_key, upload_id))
}

/// Episode object key:
/// `clips/<streamKey>/<uploadId>/episodes/episode_<n>/<basename>`.
#[must_use]
pub fn episode_key(
    stream_key: &StreamKey,
    upload_id: &UploadId,
    episode_number: i32,
    basename: &str,
) -> String {
    format!("{}/{basename}", episode_dir_key(stream_key, upload_id, episode_number))
}

/// Content type by file extension.
#[must_use]
pub fn content_type_for(name: &str) -> &'static str {
    match name.rsplit('.').next() {
        Some("m3u8") => "application/vnd.apple.mpegurl",
        Some("ts") => "video/mp2t",
        Some("jpg" | "jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

/// Does `name` match any of the patterns (exact names or `*` globs)?
#[must_use]
pub fn matches_any(name: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| {
        if p.contains('*') {
            Pattern::new(p).map(|pat| pat.matches(name)).unwrap_or(false)
        } else {
            p == name
        }
    })
}

#[derive(Clone)]
pub struct BlobStore {
    operator: Operator,
    cdn_base_url: String,
}

impl BlobStore {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let builder = S3::default()
            .endpoint(&config.endpoint)
            .region(&config.region)
            .bucket(&config.bucket)
            .access_key_id(&config.access_key_id)
            .secret_access_key(&config.secret_access_key);

        let operator = Operator::new(builder)
            .map_err(|e| Error::StorageUnavailable(format!("S3 operator init failed: {e}")))?
            .finish();

        Ok(Self {
            operator,
            cdn_base_url: config.cdn_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Public CDN URL for an object key.
    #[must_use]
    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{key}", self.cdn_base_url)
    }

    /// Public base URL for an upload's directory, without trailing slash.
    #[must_use]
    pub fn public_base(&self, stream_key: &StreamKey, upload_id: &UploadId) -> String {
        self.public_url(&dir_key(stream_key, upload_id))
    }

    /// Object key for a CDN URL minted by this store; `None` for foreign URLs.
    #[must_use]
    pub fn key_for_url(&self, url: &str) -> Option<String> {
        url.strip_prefix(&self.cdn_base_url)
            .map(|rest| rest.trim_start_matches('/').to_string())
            .filter(|key| !key.is_empty())
    }

    /// HEAD a public URL this store produced. Foreign URLs verify false.
    pub async fn verify_public_url(&self, url: &str) -> bool {
        match self.key_for_url(url) {
            Some(key) => self.exists(&key).await.unwrap_or(false),
            None => false,
        }
    }

    /// HEAD-equivalent existence check.
    pub async fn exists(&self, key: &str) -> Result<bool> {
        match self.operator.exists(key).await {
            Ok(found) => Ok(found),
            Err(e) => {
                warn!(key, error = %e, "Blob existence check failed");
                Ok(false)
            }
        }
    }

    /// Upload raw bytes under a key with an explicit content type.
    pub async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<()> {
        self.operator
            .write_with(key, data)
            .content_type(content_type)
            .await
            .map_err(|e| Error::StorageUnavailable(format!("write {key} failed: {e}")))?;
        Ok(())
    }

    /// Upload every file in `dir` whose name matches one of `patterns`.
    ///
    /// Not transactional; callers sequence playlist uploads after segment
    /// uploads themselves. Returns the object keys uploaded.
    pub async fn upload_dir(
        &self,
        stream_key: &StreamKey,
        upload_id: &UploadId,
        dir: &Path,
        patterns: &[String],
    ) -> Result<Vec<String>> {
        self.upload_dir_under(&dir_key(stream_key, upload_id), dir, patterns).await
    }

    /// [`Self::upload_dir`] with an explicit key prefix (episode layouts).
    pub async fn upload_dir_under(
        &self,
        key_prefix: &str,
        dir: &Path,
        patterns: &[String],
    ) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if entry.file_type().await?.is_file() && matches_any(name, patterns) {
                names.push(name.to_string());
            }
        }
        // Deterministic order keeps segment uploads in sequence.
        names.sort();

        let mut keys = Vec::with_capacity(names.len());
        for name in names {
            let key = format!("{key_prefix}/{name}");
            let data = tokio::fs::read(dir.join(&name)).await?;
            self.put(&key, Bytes::from(data), content_type_for(&name)).await?;
            debug!(key, "Uploaded blob");
            keys.push(key);
        }
        Ok(keys)
    }

    /// Upload with retry and verification: 3 attempts with exponential
    /// backoff, each bounded to 5 seconds, then a HEAD against the object
    /// before the URL is considered valid. Returns the public URL.
    pub async fn put_verified(&self, key: &str, data: Bytes, content_type: &str) -> Result<String> {
        let mut last_err = None;

        for (attempt, backoff_ms) in RETRY_BACKOFF_MS.iter().enumerate() {
            match tokio::time::timeout(ATTEMPT_TIMEOUT, self.put(key, data.clone(), content_type))
                .await
            {
                Ok(Ok(())) => {
                    if self.exists(key).await? {
                        return Ok(self.public_url(key));
                    }
                    last_err = Some(Error::StorageUnavailable(format!(
                        "object {key} missing after write"
                    )));
                }
                Ok(Err(e)) => {
                    warn!(key, attempt, error = %e, "Blob upload attempt failed");
                    last_err = Some(e);
                }
                Err(_) => {
                    warn!(key, attempt, "Blob upload attempt timed out");
                    last_err = Some(Error::StorageUnavailable(format!("upload {key} timed out")));
                }
            }

            if attempt + 1 < RETRY_BACKOFF_MS.len() {
                tokio::time::sleep(Duration::from_millis(*backoff_ms)).await;
            }
        }

        Err(last_err
            .unwrap_or_else(|| Error::StorageUnavailable(format!("upload {key} failed"))))
    }

    /// [`Self::put_verified`] for a local file.
    pub async fn upload_file_verified(&self, key: &str, path: &Path) -> Result<String> {
        let basename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::InvalidInput(format!("bad file name: {}", path.display())))?;
        let data = tokio::fs::read(path).await?;
        self.put_verified(key, Bytes::from(data), content_type_for(basename)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sk() -> StreamKey {
        StreamKey::from_string("sk_A".to_string())
    }

    fn uid() -> UploadId {
        UploadId::from_string("u1".to_string())
    }

    #[test]
    fn test_object_key_layout() {
        assert_eq!(
            object_key(&sk(), &uid(), "sk_A_u1_master.m3u8"),
            "clips/sk_A/u1/sk_A_u1_master.m3u8"
        );
    }

    #[test]
    fn test_episode_key_layout() {
        assert_eq!(
            episode_key(&sk(), &uid(), 2, "ep.m3u8"),
            "clips/sk_A/u1/episodes/episode_2/ep.m3u8"
        );
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for("a.m3u8"), "application/vnd.apple.mpegurl");
        assert_eq!(content_type_for("a_000.ts"), "video/mp2t");
        assert_eq!(content_type_for("thumb.jpg"), "image/jpeg");
        assert_eq!(content_type_for("raw.bin"), "application/octet-stream");
    }

    #[test]
    fn test_matches_any_exact_and_glob() {
        let patterns = vec!["sk_u1_1080p.m3u8".to_string(), "sk_u1_1080p_*.ts".to_string()];
        assert!(matches_any("sk_u1_1080p.m3u8", &patterns));
        assert!(matches_any("sk_u1_1080p_003.ts", &patterns));
        assert!(!matches_any("sk_u1_720p_003.ts", &patterns));
        assert!(!matches_any("sk_u1_1080p.m3u8.bak", &patterns));
    }
}
