//! Single-frame thumbnail extraction.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::error::{MediaError, Result};
use crate::probe::{MediaInfo, Orientation};

/// Thumbnail box per orientation; frames are center-cropped to fill.
const LANDSCAPE_FRAME: (u32, u32) = (640, 360);
const PORTRAIT_FRAME: (u32, u32) = (360, 640);

/// Frame offset considered safe for an arbitrary video.
const SAFE_OFFSET_SECONDS: f64 = 1.0;

const EXTRACT_TIMEOUT: Duration = Duration::from_secs(60);

const STABLE_POLL: Duration = Duration::from_millis(100);
const STABLE_FOR: Duration = Duration::from_millis(200);
const STABLE_CAP: Duration = Duration::from_secs(2);

/// `<prefix>_thumb.jpg`
#[must_use]
pub fn thumbnail_name(prefix: &str) -> String {
    format!("{prefix}_thumb.jpg")
}

#[must_use]
pub fn thumbnail_frame(orientation: Orientation) -> (u32, u32) {
    match orientation {
        Orientation::Landscape => LANDSCAPE_FRAME,
        Orientation::Portrait => PORTRAIT_FRAME,
    }
}

/// Offset to grab the frame at: 1 second, or 0 for sub-second clips.
#[must_use]
pub fn frame_offset(duration: f64) -> f64 {
    if duration >= SAFE_OFFSET_SECONDS {
        SAFE_OFFSET_SECONDS
    } else {
        0.0
    }
}

/// Wait until the file's size has stopped changing for 200 ms, polling at
/// 100 ms, giving up after 2 s. Defeats races with a writer that has not
/// flushed yet; on cap expiry the caller proceeds with whatever is there.
pub async fn wait_for_stable_size(path: &Path) -> Result<u64> {
    let started = tokio::time::Instant::now();
    let mut last_size = tokio::fs::metadata(path).await?.len();
    let mut stable_since = tokio::time::Instant::now();

    loop {
        if stable_since.elapsed() >= STABLE_FOR {
            return Ok(last_size);
        }
        if started.elapsed() >= STABLE_CAP {
            return Ok(last_size);
        }
        tokio::time::sleep(STABLE_POLL).await;

        let size = tokio::fs::metadata(path).await?.len();
        if size != last_size {
            last_size = size;
            stable_since = tokio::time::Instant::now();
        }
    }
}

/// ffmpeg arguments for one frame, rotation-corrected and center-cropped to
/// the orientation's box. Pure so tests can inspect it.
#[must_use]
pub fn build_args(
    source: &Path,
    dest: &Path,
    info: &MediaInfo,
    offset_override: Option<f64>,
) -> Vec<String> {
    let (width, height) = thumbnail_frame(info.orientation());
    let scale_crop = format!(
        "scale={width}:{height}:force_original_aspect_ratio=increase,crop={width}:{height}"
    );
    let filter = match info.correction_filter() {
        Some(rotate) => format!("{rotate},{scale_crop}"),
        None => scale_crop,
    };
    let offset = offset_override.unwrap_or_else(|| frame_offset(info.duration));

    vec![
        "-y".into(),
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-noautorotate".into(),
        "-ss".into(),
        format!("{offset:.3}"),
        "-i".into(),
        source.display().to_string(),
        "-frames:v".into(),
        "1".into(),
        "-vf".into(),
        filter,
        "-q:v".into(),
        "2".into(),
        dest.display().to_string(),
    ]
}

/// Extract one JPEG frame from `source` into `dest`.
///
/// Waits for the source size to settle first, then pulls the frame at the
/// safe offset (or `offset_override` for episode thumbnails).
pub async fn extract_thumbnail(
    source: &Path,
    dest: &Path,
    info: &MediaInfo,
    offset_override: Option<f64>,
) -> Result<()> {
    wait_for_stable_size(source).await?;

    let args = build_args(source, dest, info, offset_override);
    debug!(source = %source.display(), dest = %dest.display(), "Extracting thumbnail");

    let output = tokio::time::timeout(
        EXTRACT_TIMEOUT,
        Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output(),
    )
    .await
    .map_err(|_| MediaError::Timeout {
        tool: "ffmpeg",
        seconds: EXTRACT_TIMEOUT.as_secs(),
    })?
    .map_err(|e| MediaError::Spawn {
        tool: "ffmpeg",
        source: e,
    })?;

    if !output.status.success() {
        return Err(MediaError::Failed {
            tool: "ffmpeg",
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn info(width: u32, height: u32, rotation: u32, duration: f64) -> MediaInfo {
        MediaInfo {
            width,
            height,
            rotation,
            duration,
            has_audio: true,
        }
    }

    #[test]
    fn test_frame_offset() {
        assert!((frame_offset(10.0) - 1.0).abs() < f64::EPSILON);
        assert!((frame_offset(1.2) - 1.0).abs() < f64::EPSILON);
        assert!(frame_offset(0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_thumbnail_frames() {
        assert_eq!(thumbnail_frame(Orientation::Landscape), (640, 360));
        assert_eq!(thumbnail_frame(Orientation::Portrait), (360, 640));
    }

    #[test]
    fn test_args_landscape_crop_fill() {
        let args = build_args(
            &PathBuf::from("/in.mp4"),
            &PathBuf::from("/out.jpg"),
            &info(1280, 720, 0, 10.0),
            None,
        );
        assert!(args.contains(
            &"scale=640:360:force_original_aspect_ratio=increase,crop=640:360".to_string()
        ));
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        assert_eq!(args[ss + 1], "1.000");
    }

    #[test]
    fn test_args_rotated_portrait() {
        let args = build_args(
            &PathBuf::from("/in.mov"),
            &PathBuf::from("/out.jpg"),
            &info(1080, 1920, 90, 0.5),
            None,
        );
        assert!(args.contains(
            &"transpose=1,scale=360:640:force_original_aspect_ratio=increase,crop=360:640"
                .to_string()
        ));
        // Sub-second clip grabs the first frame.
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        assert_eq!(args[ss + 1], "0.000");
    }

    #[test]
    fn test_args_offset_override() {
        let args = build_args(
            &PathBuf::from("/in.mp4"),
            &PathBuf::from("/out.jpg"),
            &info(1280, 720, 0, 600.0),
            Some(61.0),
        );
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        assert_eq!(args[ss + 1], "61.000");
    }

    #[test]
    fn test_thumbnail_name() {
        assert_eq!(thumbnail_name("sk_u1"), "sk_u1_thumb.jpg");
    }

    #[tokio::test]
    async fn test_wait_for_stable_size_on_quiet_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("src.mp4");
        tokio::fs::write(&path, b"stable bytes").await.unwrap();
        let size = wait_for_stable_size(&path).await.unwrap();
        assert_eq!(size, 12);
    }

    #[tokio::test]
    async fn test_wait_for_stable_size_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.mp4");
        assert!(wait_for_stable_size(&missing).await.is_err());
    }
}
