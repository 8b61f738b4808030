//! Client for the external transcription API.
//!
//! One multipart POST carrying the whole video; the response is a JSON
//! object with a `segments` array of `{start, end, text}`.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::{EpisodeError, Result};

/// Transcribing a long video is slow; budget generously.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    segments: Vec<TranscriptSegment>,
}

#[derive(Clone)]
pub struct TranscriptionClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
}

impl TranscriptionClient {
    #[must_use]
    pub fn new(url: String, api_key: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { http, url, api_key }
    }

    /// Transcribe a local video file into time-stamped segments.
    pub async fn transcribe(&self, path: &Path) -> Result<Vec<TranscriptSegment>> {
        let data = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("video.mp4")
            .to_string();

        let part = reqwest::multipart::Part::bytes(data)
            .file_name(file_name)
            .mime_str("video/mp4")?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("response_format", "segmented_json");

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EpisodeError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TranscriptionResponse = response.json().await?;
        Ok(parsed.segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_transcribe_parses_segments() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transcribe"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "segments": [
                    {"start": 0.0, "end": 4.5, "text": "hello"},
                    {"start": 4.5, "end": 9.0, "text": "world"}
                ]
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("clip.mp4");
        tokio::fs::write(&video, b"not really a video").await.unwrap();

        let client =
            TranscriptionClient::new(format!("{}/transcribe", server.uri()), "key".to_string());
        let segments = client.transcribe(&video).await.unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].text, "world");
        assert!((segments[1].end - 9.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_transcribe_surfaces_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("clip.mp4");
        tokio::fs::write(&video, b"x").await.unwrap();

        let client = TranscriptionClient::new(server.uri(), "key".to_string());
        let err = client.transcribe(&video).await.unwrap_err();
        assert!(matches!(err, EpisodeError::Api { status: 500, .. }));
    }
}
