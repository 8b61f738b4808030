//! Media inspection via ffprobe.
//!
//! Everything downstream (segmenter, thumbnailer, playlist builder) consumes
//! the typed [`MediaInfo`] this module produces; orientation and rotation
//! correction are decided once, here.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tracing::warn;

use crate::error::{MediaError, Result};

const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Landscape,
    Portrait,
}

/// Displayed geometry of a media file: width/height are the dimensions a
/// player shows after applying rotation metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    pub width: u32,
    pub height: u32,
    /// Container rotation, normalized to 0/90/180/270.
    pub rotation: u32,
    /// Seconds; 0.0 when unknown.
    pub duration: f64,
    pub has_audio: bool,
}

impl MediaInfo {
    /// Best-effort defaults used when probing fails; the pipeline proceeds
    /// as if the input were plain landscape 720p with audio.
    #[must_use]
    pub fn fallback() -> Self {
        Self {
            width: 1280,
            height: 720,
            rotation: 0,
            duration: 0.0,
            has_audio: true,
        }
    }

    #[must_use]
    pub fn orientation(&self) -> Orientation {
        if self.height > self.width {
            Orientation::Portrait
        } else {
            Orientation::Landscape
        }
    }

    #[must_use]
    pub fn is_portrait(&self) -> bool {
        self.orientation() == Orientation::Portrait
    }

    /// Rotation-correcting filter chain, applied only for portrait inputs
    /// carrying rotation metadata. Landscape inputs already display
    /// landscape, so no correction is applied there.
    #[must_use]
    pub fn correction_filter(&self) -> Option<&'static str> {
        if !self.is_portrait() {
            return None;
        }
        match self.rotation {
            90 => Some("transpose=1"),
            180 => Some("transpose=1,transpose=1"),
            270 => Some("transpose=2"),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
    tags: Option<ProbeTags>,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
}

#[derive(Debug, Deserialize)]
struct ProbeTags {
    rotate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeSideData {
    rotation: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Inspect a media file. Never fails: probe errors degrade to
/// [`MediaInfo::fallback`] and the pipeline continues best-effort.
pub async fn probe_file(path: &Path) -> MediaInfo {
    match try_probe(path).await {
        Ok(info) => info,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Probe failed, using fallback geometry");
            MediaInfo::fallback()
        }
    }
}

async fn try_probe(path: &Path) -> Result<MediaInfo> {
    let child = Command::new("ffprobe")
        .arg("-v")
        .arg("error")
        .arg("-print_format")
        .arg("json")
        .arg("-show_streams")
        .arg("-show_format")
        .arg(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output();

    let output = tokio::time::timeout(PROBE_TIMEOUT, child)
        .await
        .map_err(|_| MediaError::Timeout {
            tool: "ffprobe",
            seconds: PROBE_TIMEOUT.as_secs(),
        })?
        .map_err(|e| MediaError::Spawn {
            tool: "ffprobe",
            source: e,
        })?;

    if !output.status.success() {
        return Err(MediaError::Failed {
            tool: "ffprobe",
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    parse_probe_output(&String::from_utf8_lossy(&output.stdout))
}

fn parse_probe_output(json: &str) -> Result<MediaInfo> {
    let probe: ProbeOutput = serde_json::from_str(json)?;

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    let has_audio = probe
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    let (raw_width, raw_height, rotation) = match video {
        Some(stream) => (
            stream.width.unwrap_or(1280),
            stream.height.unwrap_or(720),
            extract_rotation(stream),
        ),
        None => (1280, 720, 0),
    };

    // ±90/270 swap the displayed axes; 0/180 leave them.
    let (width, height) = if rotation % 180 == 90 {
        (raw_height, raw_width)
    } else {
        (raw_width, raw_height)
    };

    let duration = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or_else(|| video.and_then(|s| s.duration.as_deref()))
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    Ok(MediaInfo {
        width,
        height,
        rotation,
        duration,
        has_audio,
    })
}

/// Rotation from the container tag or, failing that, the display-matrix
/// side data. The side-data angle is counterclockwise, the tag clockwise.
fn extract_rotation(stream: &ProbeStream) -> u32 {
    let degrees = stream
        .tags
        .as_ref()
        .and_then(|t| t.rotate.as_deref())
        .and_then(|r| r.parse::<i64>().ok())
        .or_else(|| {
            stream
                .side_data_list
                .iter()
                .find_map(|sd| sd.rotation)
                .map(|r| -(r.round() as i64))
        })
        .unwrap_or(0);

    degrees.rem_euclid(360) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    const LANDSCAPE_JSON: &str = r#"{
        "streams": [
            {"codec_type": "video", "width": 1280, "height": 720},
            {"codec_type": "audio"}
        ],
        "format": {"duration": "10.000000"}
    }"#;

    const ROTATED_PORTRAIT_JSON: &str = r#"{
        "streams": [
            {
                "codec_type": "video",
                "width": 1920,
                "height": 1080,
                "side_data_list": [{"rotation": -90.0}]
            }
        ],
        "format": {"duration": "4.2"}
    }"#;

    const ROTATE_TAG_JSON: &str = r#"{
        "streams": [
            {
                "codec_type": "video",
                "width": 1920,
                "height": 1080,
                "tags": {"rotate": "90"}
            },
            {"codec_type": "audio"}
        ],
        "format": {}
    }"#;

    #[test]
    fn test_parse_landscape_with_audio() {
        let info = parse_probe_output(LANDSCAPE_JSON).unwrap();
        assert_eq!((info.width, info.height), (1280, 720));
        assert_eq!(info.rotation, 0);
        assert!(info.has_audio);
        assert!((info.duration - 10.0).abs() < f64::EPSILON);
        assert_eq!(info.orientation(), Orientation::Landscape);
        assert!(info.correction_filter().is_none());
    }

    #[test]
    fn test_parse_display_matrix_rotation_swaps_axes() {
        let info = parse_probe_output(ROTATED_PORTRAIT_JSON).unwrap();
        assert_eq!(info.rotation, 90);
        assert_eq!((info.width, info.height), (1080, 1920));
        assert!(info.is_portrait());
        assert!(!info.has_audio);
        assert_eq!(info.correction_filter(), Some("transpose=1"));
    }

    #[test]
    fn test_rotate_tag_preferred_over_side_data() {
        let info = parse_probe_output(ROTATE_TAG_JSON).unwrap();
        assert_eq!(info.rotation, 90);
        assert!(info.is_portrait());
    }

    #[test]
    fn test_parse_without_video_stream_uses_defaults() {
        let info = parse_probe_output(r#"{"streams": [], "format": {}}"#).unwrap();
        assert_eq!((info.width, info.height), (1280, 720));
        assert!(!info.has_audio);
    }

    #[test]
    fn test_negative_rotation_normalizes() {
        let json = r#"{
            "streams": [{"codec_type": "video", "width": 1920, "height": 1080,
                         "tags": {"rotate": "-90"}}],
            "format": {}
        }"#;
        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.rotation, 270);
        assert!(info.is_portrait());
        assert_eq!(info.correction_filter(), Some("transpose=2"));
    }

    #[test]
    fn test_landscape_with_rotation_gets_no_correction() {
        // 180 degrees keeps landscape geometry; no correction is applied.
        let json = r#"{
            "streams": [{"codec_type": "video", "width": 1280, "height": 720,
                         "tags": {"rotate": "180"}}],
            "format": {}
        }"#;
        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.rotation, 180);
        assert!(!info.is_portrait());
        assert!(info.correction_filter().is_none());
    }

    #[test]
    fn test_fallback_geometry() {
        let info = MediaInfo::fallback();
        assert_eq!((info.width, info.height), (1280, 720));
        assert!(info.has_audio);
        assert_eq!(info.orientation(), Orientation::Landscape);
    }
}
