//! HLS segmenting via ffmpeg.
//!
//! One invocation encodes any number of renditions from a single input.
//! Rotation correction comes from the probe's descriptor and rotation
//! metadata is stripped on output so players do not double-rotate.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{MediaError, Result};
use crate::probe::MediaInfo;
use crate::rendition::RenditionSpec;

/// Fixed HLS segment duration in seconds.
pub const SEGMENT_SECONDS: u32 = 6;
/// Hard wall-clock cap per ffmpeg invocation.
const FFMPEG_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// How much trailing stderr to keep for error context.
const STDERR_TAIL: usize = 2000;

/// One batch of renditions to encode.
#[derive(Debug)]
pub struct SegmentRequest<'a> {
    pub source: &'a Path,
    pub out_dir: &'a Path,
    pub specs: &'a [RenditionSpec],
    pub info: &'a MediaInfo,
    /// Shared artifact prefix, `<streamKey>_<uploadId>`.
    pub prefix: &'a str,
    /// Cut window in seconds for episode extraction.
    pub time_range: Option<(f64, f64)>,
}

/// A produced rendition: its variant playlist and encoded frame.
#[derive(Debug, Clone)]
pub struct RenditionOutput {
    pub name: &'static str,
    pub playlist: PathBuf,
    pub resolution: (u32, u32),
}

#[derive(Debug, Clone)]
pub struct Segmenter {
    timeout: Duration,
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl Segmenter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            timeout: FFMPEG_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Encode every requested rendition in one ffmpeg run. The variant
    /// playlists reference only segments ffmpeg has already written, so the
    /// outputs are uploadable as soon as this returns.
    pub async fn segment(&self, req: &SegmentRequest<'_>) -> Result<Vec<RenditionOutput>> {
        let meta = tokio::fs::metadata(req.source)
            .await
            .map_err(|_| MediaError::SourceMissing(req.source.to_path_buf()))?;
        if meta.len() == 0 {
            return Err(MediaError::SourceMissing(req.source.to_path_buf()));
        }
        tokio::fs::create_dir_all(req.out_dir).await?;

        let args = build_args(req, encoder_threads());
        debug!(source = %req.source.display(), renditions = req.specs.len(), "Starting ffmpeg");

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| MediaError::Spawn {
                tool: "ffmpeg",
                source: e,
            })?;

        let mut stderr_pipe = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(result) => result?,
            Err(_) => {
                // Past the wall-clock cap: kill hard and surface the timeout.
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(MediaError::Timeout {
                    tool: "ffmpeg",
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        if !status.success() {
            let stderr = stderr_task.await.unwrap_or_default();
            let tail: String = stderr
                .chars()
                .skip(stderr.chars().count().saturating_sub(STDERR_TAIL))
                .collect();
            return Err(MediaError::Failed {
                tool: "ffmpeg",
                status: status.to_string(),
                stderr: tail.trim().to_string(),
            });
        }

        let orientation = req.info.orientation();
        let mut outputs = Vec::with_capacity(req.specs.len());
        for spec in req.specs {
            let playlist = req.out_dir.join(spec.playlist_name(req.prefix));
            if !playlist.exists() {
                return Err(MediaError::Failed {
                    tool: "ffmpeg",
                    status: "0".to_string(),
                    stderr: format!("expected playlist missing: {}", playlist.display()),
                });
            }
            outputs.push(RenditionOutput {
                name: spec.name,
                playlist,
                resolution: spec.frame(orientation),
            });
        }

        info!(
            prefix = req.prefix,
            renditions = outputs.len(),
            "Segmenting complete"
        );
        Ok(outputs)
    }
}

/// ffmpeg thread count: roughly 95% of host CPUs, at least one.
#[must_use]
pub fn encoder_threads() -> u32 {
    let cpus = std::thread::available_parallelism().map_or(1, |n| n.get() as u32);
    (cpus * 95 / 100).max(1)
}

/// Full argument list for one invocation. Pure so tests can inspect it.
#[must_use]
pub fn build_args(req: &SegmentRequest<'_>, threads: u32) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        // Rotation handling is ours: disable the built-in auto-rotate and
        // apply the probe's correction filter explicitly.
        "-noautorotate".into(),
    ];

    if let Some((start, end)) = req.time_range {
        args.push("-ss".into());
        args.push(format!("{start:.3}"));
        args.push("-to".into());
        args.push(format!("{end:.3}"));
    }

    args.push("-i".into());
    args.push(req.source.display().to_string());

    let orientation = req.info.orientation();
    let correction = req.info.correction_filter();

    for spec in req.specs {
        let (width, height) = spec.frame(orientation);
        let filter = match correction {
            Some(rotate) => format!("{rotate},scale={width}:{height}"),
            None => format!("scale={width}:{height}"),
        };

        args.push("-map".into());
        args.push("0:v:0".into());
        if req.info.has_audio {
            args.push("-map".into());
            args.push("0:a:0".into());
        }

        args.push("-vf".into());
        args.push(filter);
        args.push("-c:v".into());
        args.push("libx264".into());
        args.push("-preset".into());
        args.push("veryfast".into());
        args.push("-crf".into());
        args.push(spec.crf.to_string());
        args.push("-threads".into());
        args.push(threads.to_string());

        if req.info.has_audio {
            args.push("-c:a".into());
            args.push("aac".into());
            args.push("-b:a".into());
            args.push(spec.audio_bitrate.into());
        } else {
            args.push("-an".into());
        }

        // Strip rotation metadata so players do not rotate twice.
        args.push("-metadata:s:v:0".into());
        args.push("rotate=0".into());

        args.push("-f".into());
        args.push("hls".into());
        args.push("-hls_time".into());
        args.push(SEGMENT_SECONDS.to_string());
        args.push("-hls_list_size".into());
        args.push("0".into());
        args.push("-hls_segment_filename".into());
        args.push(req.out_dir.join(spec.segment_template(req.prefix)).display().to_string());
        args.push(req.out_dir.join(spec.playlist_name(req.prefix)).display().to_string());
    }

    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn landscape_info() -> MediaInfo {
        MediaInfo {
            width: 1280,
            height: 720,
            rotation: 0,
            duration: 10.0,
            has_audio: true,
        }
    }

    fn rotated_portrait_info() -> MediaInfo {
        MediaInfo {
            width: 1080,
            height: 1920,
            rotation: 90,
            duration: 10.0,
            has_audio: true,
        }
    }

    #[test]
    fn test_args_single_rendition_landscape() {
        let info = landscape_info();
        let req = SegmentRequest {
            source: Path::new("/in/src.mp4"),
            out_dir: Path::new("/out"),
            specs: std::slice::from_ref(RenditionSpec::primary()),
            info: &info,
            prefix: "sk_u1",
            time_range: None,
        };
        let args = build_args(&req, 4);

        assert!(args.contains(&"-noautorotate".to_string()));
        assert!(args.contains(&"scale=1920:1080".to_string()));
        assert!(args.contains(&"-crf".to_string()));
        assert!(args.contains(&"20".to_string()));
        assert!(args.contains(&"6".to_string()));
        assert!(args.contains(&"/out/sk_u1_1080p_%03d.ts".to_string()));
        assert!(args.contains(&"/out/sk_u1_1080p.m3u8".to_string()));
        assert!(args.contains(&"rotate=0".to_string()));
        assert!(!args.contains(&"-ss".to_string()));
    }

    #[test]
    fn test_args_rotated_portrait_gets_transpose() {
        let info = rotated_portrait_info();
        let req = SegmentRequest {
            source: Path::new("/in/src.mov"),
            out_dir: Path::new("/out"),
            specs: std::slice::from_ref(RenditionSpec::primary()),
            info: &info,
            prefix: "sk_u1",
            time_range: None,
        };
        let args = build_args(&req, 4);
        assert!(args.contains(&"transpose=1,scale=1080:1920".to_string()));
    }

    #[test]
    fn test_args_no_audio_maps_video_only() {
        let mut info = landscape_info();
        info.has_audio = false;
        let req = SegmentRequest {
            source: Path::new("/in/src.mp4"),
            out_dir: Path::new("/out"),
            specs: std::slice::from_ref(RenditionSpec::primary()),
            info: &info,
            prefix: "sk_u1",
            time_range: None,
        };
        let args = build_args(&req, 4);
        assert!(args.contains(&"-an".to_string()));
        assert!(!args.contains(&"0:a:0".to_string()));
        assert!(!args.contains(&"aac".to_string()));
    }

    #[test]
    fn test_args_batch_emits_every_rendition() {
        let info = landscape_info();
        let req = SegmentRequest {
            source: Path::new("/in/src.mp4"),
            out_dir: Path::new("/out"),
            specs: RenditionSpec::remaining(),
            info: &info,
            prefix: "sk_u1",
            time_range: None,
        };
        let args = build_args(&req, 4);
        for spec in RenditionSpec::remaining() {
            assert!(args.contains(&format!("/out/sk_u1_{}.m3u8", spec.name)));
        }
        assert_eq!(args.iter().filter(|a| *a == "libx264").count(), 3);
    }

    #[test]
    fn test_args_time_range_for_episode_cut() {
        let info = landscape_info();
        let req = SegmentRequest {
            source: Path::new("/in/src.mp4"),
            out_dir: Path::new("/out"),
            specs: std::slice::from_ref(RenditionSpec::primary()),
            info: &info,
            prefix: "sk_u1_ep1",
            time_range: Some((60.0, 420.5)),
        };
        let args = build_args(&req, 4);
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        assert_eq!(args[ss + 1], "60.000");
        let to = args.iter().position(|a| a == "-to").unwrap();
        assert_eq!(args[to + 1], "420.500");
        // Cut window precedes the input so ffmpeg seeks before decoding.
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert!(ss < input && to < input);
    }

    #[test]
    fn test_encoder_threads_at_least_one() {
        assert!(encoder_threads() >= 1);
    }

    #[tokio::test]
    async fn test_segment_rejects_missing_source() {
        let info = landscape_info();
        let dir = tempfile::tempdir().unwrap();
        let req = SegmentRequest {
            source: &dir.path().join("missing.mp4"),
            out_dir: dir.path(),
            specs: std::slice::from_ref(RenditionSpec::primary()),
            info: &info,
            prefix: "sk_u1",
            time_range: None,
        };
        let err = Segmenter::new().segment(&req).await.unwrap_err();
        assert!(matches!(err, MediaError::SourceMissing(_)));
    }

    #[tokio::test]
    async fn test_segment_rejects_empty_source() {
        let info = landscape_info();
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("empty.mp4");
        tokio::fs::write(&src, b"").await.unwrap();
        let req = SegmentRequest {
            source: &src,
            out_dir: dir.path(),
            specs: std::slice::from_ref(RenditionSpec::primary()),
            info: &info,
            prefix: "sk_u1",
            time_range: None,
        };
        let err = Segmenter::new().segment(&req).await.unwrap_err();
        assert!(matches!(err, MediaError::SourceMissing(_)));
    }
}
