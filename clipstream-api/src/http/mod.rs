//! HTTP surface: upload ingress, RTMP lifecycle hooks, health introspection
//! and the admin episode API.

pub mod episodes;
pub mod error;
pub mod health;
pub mod hooks;
pub mod upload;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use clipstream_core::{models::UserId, repository::EpisodeRepository, service::QueuePublisher, Config};

use crate::pipeline::Pipeline;
pub use error::{AppError, AppResult};
pub use hooks::StreamRegistry;

/// Upload body cap: exactly 2 GiB of video is accepted, so the HTTP body
/// limit adds headroom for the multipart framing and text fields.
pub const MAX_VIDEO_BYTES: u64 = 2 * 1024 * 1024 * 1024;
const BODY_LIMIT_SLACK: usize = 16 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pipeline: Arc<Pipeline>,
    pub streams: Arc<StreamRegistry>,
    pub episode_repo: EpisodeRepository,
    pub queue: QueuePublisher,
    pub master_account: UserId,
}

/// Assemble the full router.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors(&state.config);

    Router::new()
        .merge(health::create_health_router())
        .merge(hooks::create_hooks_router())
        .merge(episodes::create_episode_router())
        .merge(
            upload::create_upload_router()
                .layer(DefaultBodyLimit::max(MAX_VIDEO_BYTES as usize + BODY_LIMIT_SLACK)),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn build_cors(config: &Config) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if config.server.cors_allowed_origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .server
            .cors_allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        layer.allow_origin(origins)
    }
}
