//! The two-phase upload pipeline.
//!
//! Phase one (before the HTTP response): place the source, write metadata,
//! probe, thumbnail early, admit, encode the primary rendition, upload it,
//! register the catalog entry. Phase two (background): the remaining
//! renditions, the master rewrite, the optional episode post-pass, cleanup.

pub mod admission;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use clipstream_core::{
    models::{RegisterAsset, StreamKey, Upload, UploadId},
    service::{CatalogWriter, MetadataStore, QueuePublisher, StreamProcessedEvent},
    storage::{self, BlobStore},
    Error, Result,
};
use clipstream_media::{
    build_master_playlist,
    playlist::master_playlist_name,
    probe::probe_file,
    rendition::{RenditionSpec, LADDER},
    segmenter::SegmentRequest,
    thumbnail::{extract_thumbnail, thumbnail_name},
    MediaInfo, Segmenter,
};

use crate::episodes::EpisodeJob;
pub use admission::{Admission, AdmissionPermit};

const M3U8_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// What the HTTP caller learns once the asset is playable.
#[derive(Debug, Clone)]
pub struct ProcessedUpload {
    pub stream_key: StreamKey,
    pub upload_id: UploadId,
    pub master_url: String,
    pub thumbnail_url: String,
}

pub struct Pipeline {
    blob: Arc<BlobStore>,
    catalog: Arc<CatalogWriter>,
    metadata: MetadataStore,
    queue: QueuePublisher,
    admission: Arc<Admission>,
    segmenter: Segmenter,
    recording_dir: PathBuf,
    scratch_dir: PathBuf,
    episodes: Option<Arc<EpisodeJob>>,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        blob: Arc<BlobStore>,
        catalog: Arc<CatalogWriter>,
        metadata: MetadataStore,
        queue: QueuePublisher,
        admission: Arc<Admission>,
        recording_dir: PathBuf,
        scratch_dir: PathBuf,
        episodes: Option<Arc<EpisodeJob>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            blob,
            catalog,
            metadata,
            queue,
            admission,
            segmenter: Segmenter::new(),
            recording_dir,
            scratch_dir,
            episodes,
        })
    }

    #[must_use]
    pub fn recording_dir(&self) -> &Path {
        &self.recording_dir
    }

    /// Where the HTTP layer spools incoming multipart bodies.
    #[must_use]
    pub fn spool_dir(&self) -> PathBuf {
        self.scratch_dir.join("incoming")
    }

    /// Run one upload to the end of phase one; phase two continues in the
    /// background after this returns.
    pub async fn process(
        self: &Arc<Self>,
        mut upload: Upload,
        scheduler_id: Option<String>,
    ) -> Result<ProcessedUpload> {
        let prefix = upload.prefix();
        info!(
            upload_id = %upload.upload_id,
            stream_key = %upload.stream_key,
            "Upload accepted, starting pipeline"
        );

        // Pre-flight: the source gets its final, uniquely-named home before
        // anything else touches it.
        let recording_dir = ensure_dir_or_temp(&self.recording_dir).await;
        let extension = upload
            .source_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp4")
            .to_string();
        let final_source = recording_dir.join(format!("{prefix}.{extension}"));
        if let Err(e) = move_file(&upload.source_path, &final_source).await {
            let _ = tokio::fs::remove_file(&upload.source_path).await;
            return Err(Error::StorageUnavailable(format!("could not place source: {e}")));
        }
        upload.source_path = final_source;

        // Metadata is advisory; a dead store must not block the transcode.
        if let Err(e) = self.metadata.put_and_settle(&upload.upload_id, &upload.metadata).await {
            warn!(upload_id = %upload.upload_id, error = %e, "Metadata write failed, continuing");
        }

        let media_info = probe_file(&upload.source_path).await;
        debug!(
            upload_id = %upload.upload_id,
            width = media_info.width,
            height = media_info.height,
            rotation = media_info.rotation,
            audio = media_info.has_audio,
            "Probed source"
        );

        let work_dir = self.scratch_dir.join(&prefix);
        tokio::fs::create_dir_all(&work_dir)
            .await
            .map_err(|e| Error::StorageUnavailable(format!("scratch dir unavailable: {e}")))?;

        // Early thumbnail: its success unblocks catalog registration without
        // waiting on it here.
        let thumb_handle = tokio::spawn(thumbnail_task(
            self.blob.clone(),
            upload.stream_key.clone(),
            upload.upload_id.clone(),
            upload.source_path.clone(),
            work_dir.clone(),
            prefix.clone(),
            media_info.clone(),
        ));

        match self
            .run_primary(&mut upload, &media_info, &work_dir, thumb_handle, scheduler_id)
            .await
        {
            Ok((processed, permit)) => {
                self.spawn_background(upload, media_info, work_dir, permit);
                Ok(processed)
            }
            Err(e) => {
                cleanup_files(&work_dir, &upload.source_path).await;
                Err(e)
            }
        }
    }

    async fn run_primary(
        self: &Arc<Self>,
        upload: &mut Upload,
        media_info: &MediaInfo,
        work_dir: &Path,
        thumb_handle: JoinHandle<Option<String>>,
        scheduler_id: Option<String>,
    ) -> Result<(ProcessedUpload, AdmissionPermit)> {
        let prefix = upload.prefix();
        let permit = self.admission.admit(&upload.upload_id).await?;

        let primary = std::slice::from_ref(RenditionSpec::primary());
        let encoded = self
            .segmenter
            .segment(&SegmentRequest {
                source: &upload.source_path,
                out_dir: work_dir,
                specs: primary,
                info: media_info,
                prefix: &prefix,
                time_range: None,
            })
            .await
            .map_err(|e| Error::TranscodeFailed(e.to_string()));

        // Segments before their playlist, playlist before the master.
        let uploaded = match encoded {
            Ok(_) => self
                .upload_rendition(upload, work_dir, RenditionSpec::primary(), &prefix)
                .await
                .map_err(|e| Error::TranscodeFailed(format!("primary upload failed: {e}"))),
            Err(e) => Err(e),
        };
        if let Err(e) = uploaded {
            // The upload is failing; do not leave the thumbnail task racing
            // against scratch cleanup.
            thumb_handle.abort();
            return Err(e);
        }

        upload.thumbnail_url = match thumb_handle.await {
            Ok(url) => url,
            Err(e) => {
                warn!(upload_id = %upload.upload_id, error = %e, "Thumbnail task aborted");
                None
            }
        };

        let master_text = build_master_playlist(
            primary,
            media_info.orientation(),
            &self.blob.public_base(&upload.stream_key, &upload.upload_id),
            &prefix,
        );
        let master_key = storage::object_key(
            &upload.stream_key,
            &upload.upload_id,
            &master_playlist_name(&prefix),
        );
        let master_url = self
            .blob
            .put_verified(&master_key, Bytes::from(master_text), M3U8_CONTENT_TYPE)
            .await
            .map_err(|e| Error::TranscodeFailed(format!("master upload failed: {e}")))?;

        let entry = self
            .catalog
            .register_asset(&RegisterAsset {
                stream_key: upload.stream_key.clone(),
                upload_id: upload.upload_id.clone(),
                rendition_prefix: prefix.clone(),
                requester_email: upload.user_email.clone(),
                channel_name: upload.channel_name.clone(),
                thumbnail_url: upload.thumbnail_url.clone(),
                hls_url: Some(master_url.clone()),
                metadata: Some(upload.metadata.clone()),
            })
            .await?;

        let event = StreamProcessedEvent::new(
            upload.stream_key.to_string(),
            scheduler_id,
            LADDER.iter().map(|r| r.name.to_string()).collect(),
        );
        if let Err(e) = self.queue.publish(&event).await {
            warn!(upload_id = %upload.upload_id, error = %e, "Stream-processed event not published");
        }

        info!(
            upload_id = %upload.upload_id,
            master_url = %master_url,
            "Primary rendition live, responding to caller"
        );

        Ok((
            ProcessedUpload {
                stream_key: upload.stream_key.clone(),
                upload_id: upload.upload_id.clone(),
                master_url,
                thumbnail_url: entry.thumbnail_url,
            },
            permit,
        ))
    }

    /// Upload one rendition's artifacts: all segments, then the playlist.
    async fn upload_rendition(
        &self,
        upload: &Upload,
        work_dir: &Path,
        spec: &RenditionSpec,
        prefix: &str,
    ) -> Result<()> {
        self.blob
            .upload_dir(
                &upload.stream_key,
                &upload.upload_id,
                work_dir,
                &[spec.segment_glob(prefix)],
            )
            .await?;
        self.blob
            .upload_dir(
                &upload.stream_key,
                &upload.upload_id,
                work_dir,
                &[spec.playlist_name(prefix)],
            )
            .await?;
        Ok(())
    }

    /// Phase two, detached from the HTTP response. Failures here are logged
    /// and leave the primary rendition playable.
    fn spawn_background(
        self: &Arc<Self>,
        upload: Upload,
        media_info: MediaInfo,
        work_dir: PathBuf,
        permit: AdmissionPermit,
    ) {
        let pipeline = self.clone();
        tokio::spawn(async move {
            if let Err(e) = pipeline.run_remaining(&upload, &media_info, &work_dir).await {
                warn!(
                    upload_id = %upload.upload_id,
                    error = %e,
                    "Background rendition phase failed; primary rendition remains playable"
                );
            }

            // Step 8 release: the slot frees before the long post-pass so
            // queued uploads drain now.
            drop(permit);

            if let Some(job) = &pipeline.episodes {
                job.run(&upload, &media_info).await;
            }

            cleanup_files(&work_dir, &upload.source_path).await;
            info!(upload_id = %upload.upload_id, "Pipeline finished");
        });
    }

    async fn run_remaining(
        &self,
        upload: &Upload,
        media_info: &MediaInfo,
        work_dir: &Path,
    ) -> Result<()> {
        let prefix = upload.prefix();

        self.segmenter
            .segment(&SegmentRequest {
                source: &upload.source_path,
                out_dir: work_dir,
                specs: RenditionSpec::remaining(),
                info: media_info,
                prefix: &prefix,
                time_range: None,
            })
            .await
            .map_err(|e| Error::TranscodeFailed(format!("secondary transcode failed: {e}")))?;

        for spec in RenditionSpec::remaining() {
            self.upload_rendition(upload, work_dir, spec, &prefix).await?;
        }

        // Rewrite the master in place with the full ladder; the primary
        // entry stays and the URL never changes.
        let master_text = build_master_playlist(
            &LADDER,
            media_info.orientation(),
            &self.blob.public_base(&upload.stream_key, &upload.upload_id),
            &prefix,
        );
        let master_key = storage::object_key(
            &upload.stream_key,
            &upload.upload_id,
            &master_playlist_name(&prefix),
        );
        self.blob
            .put_verified(&master_key, Bytes::from(master_text), M3U8_CONTENT_TYPE)
            .await
            .map_err(|e| Error::TranscodeFailed(format!("master rewrite failed: {e}")))?;

        info!(upload_id = %upload.upload_id, "All renditions live, master rewritten");
        Ok(())
    }
}

async fn thumbnail_task(
    blob: Arc<BlobStore>,
    stream_key: StreamKey,
    upload_id: UploadId,
    source: PathBuf,
    work_dir: PathBuf,
    prefix: String,
    media_info: MediaInfo,
) -> Option<String> {
    let name = thumbnail_name(&prefix);
    let dest = work_dir.join(&name);

    if let Err(e) = extract_thumbnail(&source, &dest, &media_info, None).await {
        warn!(upload_id = %upload_id, error = %e, "Thumbnail generation failed, default will be used");
        return None;
    }

    let key = storage::object_key(&stream_key, &upload_id, &name);
    match blob.upload_file_verified(&key, &dest).await {
        Ok(url) => Some(url),
        Err(e) => {
            warn!(upload_id = %upload_id, error = %e, "Thumbnail upload failed, default will be used");
            None
        }
    }
}

/// Create the preferred directory, falling back to the system temp location
/// when it is unwritable.
async fn ensure_dir_or_temp(preferred: &Path) -> PathBuf {
    match tokio::fs::create_dir_all(preferred).await {
        Ok(()) => preferred.to_path_buf(),
        Err(e) => {
            let fallback = std::env::temp_dir();
            warn!(
                preferred = %preferred.display(),
                fallback = %fallback.display(),
                error = %e,
                "Recording dir unwritable, using temp"
            );
            fallback
        }
    }
}

/// Rename where possible, copy-and-delete across filesystems.
async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if from == to {
        return Ok(());
    }
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(_) => {
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await
        }
    }
}

async fn cleanup_files(work_dir: &Path, source: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(work_dir).await {
        debug!(dir = %work_dir.display(), error = %e, "Scratch dir already gone");
    }
    if let Err(e) = tokio::fs::remove_file(source).await {
        debug!(file = %source.display(), error = %e, "Source already gone");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_move_file_same_path_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mp4");
        tokio::fs::write(&path, b"x").await.unwrap();
        move_file(&path, &path).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_move_file_renames() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("spool.bin");
        let to = dir.path().join("sk_u1.mp4");
        tokio::fs::write(&from, b"payload").await.unwrap();
        move_file(&from, &to).await.unwrap();
        assert!(!from.exists());
        assert_eq!(tokio::fs::read(&to).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_ensure_dir_or_temp_creates_preferred() {
        let dir = tempfile::tempdir().unwrap();
        let preferred = dir.path().join("recordings");
        let chosen = ensure_dir_or_temp(&preferred).await;
        assert_eq!(chosen, preferred);
        assert!(preferred.is_dir());
    }

    #[tokio::test]
    async fn test_cleanup_files_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        let source = dir.path().join("src.mp4");
        tokio::fs::create_dir_all(&work).await.unwrap();
        tokio::fs::write(&source, b"x").await.unwrap();

        cleanup_files(&work, &source).await;
        assert!(!work.exists());
        assert!(!source.exists());

        // Second pass over missing files must not panic.
        cleanup_files(&work, &source).await;
    }
}
