//! Admin-only episode endpoints.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use clipstream_core::models::{EpisodeEntry, StreamKey};

use crate::http::{AppError, AppResult, AppState};

pub fn create_episode_router() -> Router<AppState> {
    Router::new()
        .route("/api/episodes/edit", post(edit_episode))
        .route("/api/episodes/{stream_key}", get(list_episodes))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditEpisodeRequest {
    stream_key: Option<String>,
    episode_number: Option<i32>,
    title: Option<String>,
    description: Option<String>,
    admin_email: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EpisodeResponse {
    success: bool,
    episode: EpisodeEntry,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EpisodeListResponse {
    success: bool,
    episodes: Vec<EpisodeEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdminQuery {
    admin_email: Option<String>,
}

/// `POST /api/episodes/edit`
async fn edit_episode(
    State(state): State<AppState>,
    Json(req): Json<EditEpisodeRequest>,
) -> AppResult<Json<EpisodeResponse>> {
    let admin_email = check_admin(&state, req.admin_email.as_deref())?;

    let stream_key = req
        .stream_key
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("streamKey is required"))?;
    let episode_number = req
        .episode_number
        .ok_or_else(|| AppError::bad_request("episodeNumber is required"))?;
    let title = req
        .title
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("title is required"))?;

    let episode = state
        .episode_repo
        .update_title_description(
            &state.master_account,
            &StreamKey::from_string(stream_key.clone()),
            episode_number,
            &title,
            req.description.as_deref(),
            &admin_email,
        )
        .await?;

    info!(
        stream_key = %stream_key,
        episode = episode_number,
        edited_by = %admin_email,
        "Episode edited"
    );

    Ok(Json(EpisodeResponse {
        success: true,
        episode,
    }))
}

/// `GET /api/episodes/{streamKey}?adminEmail=...`
async fn list_episodes(
    State(state): State<AppState>,
    Path(stream_key): Path<String>,
    Query(query): Query<AdminQuery>,
) -> AppResult<Json<EpisodeListResponse>> {
    check_admin(&state, query.admin_email.as_deref())?;

    let episodes = state
        .episode_repo
        .list_for_stream(&StreamKey::from_string(stream_key))
        .await?;

    Ok(Json(EpisodeListResponse {
        success: true,
        episodes,
    }))
}

/// Only the configured platform admin may touch episodes.
fn check_admin(state: &AppState, claimed: Option<&str>) -> AppResult<String> {
    let configured = state.config.catalog.admin_email.trim();
    if configured.is_empty() {
        return Err(AppError::forbidden("episode administration is disabled"));
    }
    match claimed {
        Some(email) if email.eq_ignore_ascii_case(configured) => Ok(email.to_string()),
        _ => Err(AppError::forbidden("adminEmail does not match the platform admin")),
    }
}
