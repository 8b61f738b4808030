//! The episode post-pass runner.
//!
//! Spawned only after an upload's primary phase succeeds. Every failure in
//! here is logged and contained; the primary asset is never affected.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use clipstream_core::{
    models::{EpisodeEntry, StreamKeyMapping, Upload, UserId},
    repository::{EpisodeRepository, StreamKeyRepository},
    storage::{self, BlobStore},
};
use clipstream_media::{
    build_master_playlist,
    playlist::master_playlist_name,
    rendition::RenditionSpec,
    segmenter::SegmentRequest,
    thumbnail::{extract_thumbnail, frame_offset, thumbnail_name},
    MediaInfo, Segmenter,
};

use super::llm::{EpisodePlan, LlmClient};
use super::transcribe::TranscriptionClient;
use super::{EpisodeError, Result};
use crate::pipeline::Admission;

const M3U8_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

pub struct EpisodeJob {
    transcriber: TranscriptionClient,
    llm: LlmClient,
    blob: Arc<BlobStore>,
    episodes: EpisodeRepository,
    stream_keys: StreamKeyRepository,
    admission: Arc<Admission>,
    segmenter: Segmenter,
    scratch_dir: PathBuf,
    master_account: UserId,
    default_thumbnail_url: String,
}

impl EpisodeJob {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        transcriber: TranscriptionClient,
        llm: LlmClient,
        blob: Arc<BlobStore>,
        episodes: EpisodeRepository,
        stream_keys: StreamKeyRepository,
        admission: Arc<Admission>,
        scratch_dir: PathBuf,
        master_account: UserId,
        default_thumbnail_url: String,
    ) -> Self {
        Self {
            transcriber,
            llm,
            blob,
            episodes,
            stream_keys,
            admission,
            segmenter: Segmenter::new(),
            scratch_dir,
            master_account,
            default_thumbnail_url,
        }
    }

    /// Run the whole post-pass for one finished upload. Never propagates
    /// failure.
    pub async fn run(&self, upload: &Upload, media_info: &MediaInfo) {
        info!(upload_id = %upload.upload_id, "Starting episode post-pass");
        match self.try_run(upload, media_info).await {
            Ok(published) => {
                info!(upload_id = %upload.upload_id, episodes = published, "Episode post-pass complete");
            }
            Err(e) => {
                warn!(
                    upload_id = %upload.upload_id,
                    error = %e,
                    "Episode job failed; primary upload unaffected"
                );
            }
        }
    }

    async fn try_run(&self, upload: &Upload, media_info: &MediaInfo) -> Result<usize> {
        let mapping = self
            .stream_keys
            .find(&upload.stream_key)
            .await?
            .ok_or_else(|| EpisodeError::NoMapping(upload.stream_key.to_string()))?;

        let segments = self.transcriber.transcribe(&upload.source_path).await?;
        if segments.is_empty() {
            info!(upload_id = %upload.upload_id, "Transcript empty, no episodes to cut");
            return Ok(0);
        }

        let plans = self.llm.plan_episodes(&segments).await?;

        let mut published = 0;
        for (idx, plan) in plans.iter().enumerate() {
            let number = (idx + 1) as i32;
            match self.publish_episode(upload, media_info, &mapping, number, plan).await {
                Ok(()) => published += 1,
                Err(e) => {
                    warn!(
                        upload_id = %upload.upload_id,
                        episode = number,
                        error = %e,
                        "Episode skipped"
                    );
                }
            }
        }
        Ok(published)
    }

    async fn publish_episode(
        &self,
        upload: &Upload,
        media_info: &MediaInfo,
        mapping: &StreamKeyMapping,
        number: i32,
        plan: &EpisodePlan,
    ) -> Result<()> {
        if plan.end_time <= plan.start_time {
            return Err(EpisodeError::BadPlan(format!(
                "episode {number} has empty window {}..{}",
                plan.start_time, plan.end_time
            )));
        }

        let ep_prefix = format!("{}_ep{number}", upload.prefix());
        let work_dir = self.scratch_dir.join(&ep_prefix);
        tokio::fs::create_dir_all(&work_dir).await?;

        let result = self
            .encode_and_publish(upload, media_info, mapping, number, plan, &ep_prefix, &work_dir)
            .await;

        let _ = tokio::fs::remove_dir_all(&work_dir).await;
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn encode_and_publish(
        &self,
        upload: &Upload,
        media_info: &MediaInfo,
        mapping: &StreamKeyMapping,
        number: i32,
        plan: &EpisodePlan,
        ep_prefix: &str,
        work_dir: &std::path::Path,
    ) -> Result<()> {
        let spec = RenditionSpec::primary();

        // Each cut is a real ffmpeg run and takes an admission slot like any
        // other transcode.
        let permit = self.admission.admit(&upload.upload_id).await?;
        self.segmenter
            .segment(&SegmentRequest {
                source: &upload.source_path,
                out_dir: work_dir,
                specs: std::slice::from_ref(spec),
                info: media_info,
                prefix: ep_prefix,
                time_range: Some((plan.start_time, plan.end_time)),
            })
            .await?;
        drop(permit);

        let key_prefix =
            storage::episode_dir_key(&upload.stream_key, &upload.upload_id, number);

        // Segments, then the variant playlist, then the episode master.
        self.blob
            .upload_dir_under(&key_prefix, work_dir, &[spec.segment_glob(ep_prefix)])
            .await?;
        self.blob
            .upload_dir_under(&key_prefix, work_dir, &[spec.playlist_name(ep_prefix)])
            .await?;

        let master_text = build_master_playlist(
            std::slice::from_ref(spec),
            media_info.orientation(),
            &self.blob.public_url(&key_prefix),
            ep_prefix,
        );
        let master_key = storage::episode_key(
            &upload.stream_key,
            &upload.upload_id,
            number,
            &master_playlist_name(ep_prefix),
        );
        let hls_url = self
            .blob
            .put_verified(&master_key, master_text.into(), M3U8_CONTENT_TYPE)
            .await?;

        let thumbnail_url = self
            .episode_thumbnail(upload, media_info, number, plan, ep_prefix, work_dir)
            .await;

        let duration = plan.end_time - plan.start_time;
        let entry = EpisodeEntry {
            owner_id: self.master_account.clone(),
            entry_key: EpisodeEntry::entry_key_for(&upload.stream_key, number),
            stream_key: upload.stream_key.clone(),
            episode_number: number,
            title: plan.title.clone(),
            description: plan.description.clone(),
            hls_url,
            thumbnail_url,
            start_time: plan.start_time,
            end_time: plan.end_time,
            duration,
            channel_name: mapping.channel_name.clone(),
            created_at: Utc::now(),
            edited_by: None,
            edited_at: None,
        };
        self.episodes.insert(&entry).await?;

        info!(
            upload_id = %upload.upload_id,
            episode = number,
            title = %entry.title,
            "Episode published"
        );
        Ok(())
    }

    /// Episode thumbnail from the source at a safe offset into the cut;
    /// degrades to the platform default on any failure.
    async fn episode_thumbnail(
        &self,
        upload: &Upload,
        media_info: &MediaInfo,
        number: i32,
        plan: &EpisodePlan,
        ep_prefix: &str,
        work_dir: &std::path::Path,
    ) -> String {
        let name = thumbnail_name(ep_prefix);
        let dest = work_dir.join(&name);
        let offset = plan.start_time + frame_offset(plan.end_time - plan.start_time);

        if let Err(e) = extract_thumbnail(&upload.source_path, &dest, media_info, Some(offset)).await
        {
            warn!(
                upload_id = %upload.upload_id,
                episode = number,
                error = %e,
                "Episode thumbnail generation failed, using default"
            );
            return self.default_thumbnail_url.clone();
        }

        let key = storage::episode_key(&upload.stream_key, &upload.upload_id, number, &name);
        match self.blob.upload_file_verified(&key, &dest).await {
            Ok(url) => url,
            Err(e) => {
                warn!(
                    upload_id = %upload.upload_id,
                    episode = number,
                    error = %e,
                    "Episode thumbnail upload failed, using default"
                );
                self.default_thumbnail_url.clone()
            }
        }
    }
}
