//! RTMP lifecycle hooks.
//!
//! The external RTMP front-end records to the recording directory and calls
//! these hooks; `/stream/stop` runs the pipeline over the recorded file.
//! The `/start-stream` / `/stop-stream` pair is the nginx-hook variant that
//! additionally announces lifecycle events on the outbound queue.

use std::collections::HashMap;
use std::path::PathBuf;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use clipstream_core::{
    models::{StreamKey, Upload, UploadId},
    service::{StreamStartEvent, StreamStopEvent},
};
use clipstream_media::rendition::LADDER;

use crate::http::{AppError, AppResult, AppState};

/// In-memory registry of currently live streams.
#[derive(Default)]
pub struct StreamRegistry {
    inner: RwLock<HashMap<String, ActiveStream>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveStream {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler_id: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl StreamRegistry {
    pub fn register(&self, name: String, scheduler_id: Option<String>) {
        let stream = ActiveStream {
            name: name.clone(),
            scheduler_id,
            started_at: Utc::now(),
        };
        self.inner.write().insert(name, stream);
    }

    pub fn remove(&self, name: &str) -> Option<ActiveStream> {
        self.inner.write().remove(name)
    }

    #[must_use]
    pub fn list(&self) -> Vec<ActiveStream> {
        let mut streams: Vec<ActiveStream> = self.inner.read().values().cloned().collect();
        streams.sort_by(|a, b| a.name.cmp(&b.name));
        streams
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.read().len()
    }
}

pub fn create_hooks_router() -> Router<AppState> {
    Router::new()
        .route("/stream/start", post(stream_start))
        .route("/stream/stop", post(stream_stop))
        .route("/start-stream", post(nginx_start_stream))
        .route("/stop-stream", post(nginx_stop_stream))
        .route("/streams", get(list_streams))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamLifecycleRequest {
    name: Option<String>,
    scheduler_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NginxHookRequest {
    stream_id: Option<String>,
    input_url: Option<String>,
    output_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HookResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_key: Option<String>,
}

/// `POST /stream/start` — register a live stream in memory.
async fn stream_start(
    State(state): State<AppState>,
    Json(req): Json<StreamLifecycleRequest>,
) -> AppResult<Json<HookResponse>> {
    let name = require_field(req.name, "name")?;
    let scheduler_id = require_field(req.scheduler_id, "schedulerId")?;

    info!(stream = %name, scheduler_id = %scheduler_id, "Stream started");
    state.streams.register(name.clone(), Some(scheduler_id));

    Ok(Json(HookResponse {
        success: true,
        message: format!("stream {name} registered"),
        stream_key: Some(name),
    }))
}

/// `POST /stream/stop` — process the RTMP recording for this stream, then
/// deregister it.
async fn stream_stop(
    State(state): State<AppState>,
    Json(req): Json<StreamLifecycleRequest>,
) -> AppResult<Json<HookResponse>> {
    let name = require_field(req.name, "name")?;
    let scheduler_id = require_field(req.scheduler_id, "schedulerId")?;

    let source = find_recording(&state, &name).ok_or_else(|| {
        AppError::not_found(format!("no recording found for stream {name}"))
    })?;

    let upload = Upload::new(
        StreamKey::from_string(name.clone()),
        UploadId::generate(),
        source,
    );
    let processed = state.pipeline.process(upload, Some(scheduler_id)).await?;

    state.streams.remove(&name);
    info!(stream = %name, master_url = %processed.master_url, "Stream stopped and processed");

    Ok(Json(HookResponse {
        success: true,
        message: "stream processed".to_string(),
        stream_key: Some(name),
    }))
}

/// `POST /start-stream` — nginx-hook variant; also announces the start on
/// the outbound queue.
async fn nginx_start_stream(
    State(state): State<AppState>,
    Json(req): Json<NginxHookRequest>,
) -> AppResult<Json<HookResponse>> {
    let stream_id = require_field(req.stream_id, "streamId")?;
    let input_url = require_field(req.input_url, "inputUrl")?;
    let output_url = require_field(req.output_url, "outputUrl")?;

    state.streams.register(stream_id.clone(), None);

    let event = StreamStartEvent::new(
        stream_id.clone(),
        input_url,
        output_url,
        LADDER.iter().map(|r| r.name.to_string()).collect(),
    );
    if let Err(e) = state.queue.publish(&event).await {
        warn!(stream = %stream_id, error = %e, "Start event not published");
    }

    Ok(Json(HookResponse {
        success: true,
        message: format!("stream {stream_id} started"),
        stream_key: Some(stream_id),
    }))
}

/// `POST /stop-stream` — nginx-hook variant; announces the stop and, when a
/// recording exists, processes it like `/stream/stop`.
async fn nginx_stop_stream(
    State(state): State<AppState>,
    Json(req): Json<NginxHookRequest>,
) -> AppResult<Json<HookResponse>> {
    let stream_id = require_field(req.stream_id, "streamId")?;

    let event = StreamStopEvent::new(stream_id.clone());
    if let Err(e) = state.queue.publish(&event).await {
        warn!(stream = %stream_id, error = %e, "Stop event not published");
    }
    state.streams.remove(&stream_id);

    if let Some(source) = find_recording(&state, &stream_id) {
        let upload = Upload::new(
            StreamKey::from_string(stream_id.clone()),
            UploadId::generate(),
            source,
        );
        state.pipeline.process(upload, None).await?;
    } else {
        info!(stream = %stream_id, "No recording to process for stopped stream");
    }

    Ok(Json(HookResponse {
        success: true,
        message: format!("stream {stream_id} stopped"),
        stream_key: Some(stream_id),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StreamListResponse {
    streams: Vec<ActiveStream>,
    count: usize,
}

/// `GET /streams` — active stream names and metadata.
async fn list_streams(State(state): State<AppState>) -> Json<StreamListResponse> {
    let streams = state.streams.list();
    let count = streams.len();
    Json(StreamListResponse { streams, count })
}

fn require_field(value: Option<String>, name: &str) -> AppResult<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::bad_request(format!("{name} is required")))
}

/// The RTMP recorder drops `<name>.flv` (or `.mp4`) under the recording dir.
fn find_recording(state: &AppState, name: &str) -> Option<PathBuf> {
    for ext in ["flv", "mp4"] {
        let candidate = state.pipeline.recording_dir().join(format!("{name}.{ext}"));
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_register_and_remove() {
        let registry = StreamRegistry::default();
        registry.register("sk_A".to_string(), Some("sched".to_string()));
        registry.register("sk_B".to_string(), None);
        assert_eq!(registry.count(), 2);

        let listed = registry.list();
        assert_eq!(listed[0].name, "sk_A");
        assert_eq!(listed[1].name, "sk_B");

        let removed = registry.remove("sk_A").expect("present");
        assert_eq!(removed.scheduler_id.as_deref(), Some("sched"));
        assert_eq!(registry.count(), 1);
        assert!(registry.remove("sk_A").is_none());
    }

    #[test]
    fn test_require_field() {
        assert!(require_field(Some("x".to_string()), "name").is_ok());
        assert!(require_field(Some("  ".to_string()), "name").is_err());
        assert!(require_field(None, "name").is_err());
    }
}
