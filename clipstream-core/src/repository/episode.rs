//! Episode entry persistence.

use chrono::Utc;
use sqlx::PgPool;

use crate::{
    models::{EpisodeEntry, StreamKey, UserId},
    Error, Result,
};

#[derive(Clone)]
pub struct EpisodeRepository {
    pool: PgPool,
}

impl EpisodeRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, episode: &EpisodeEntry) -> Result<EpisodeEntry> {
        let row = sqlx::query_as::<_, EpisodeEntry>(
            r"
            INSERT INTO episode_entries
                (owner_id, entry_key, stream_key, episode_number, title, description,
                 hls_url, thumbnail_url, start_time, end_time, duration, channel_name,
                 created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (owner_id, entry_key) DO UPDATE SET
                hls_url = EXCLUDED.hls_url,
                thumbnail_url = EXCLUDED.thumbnail_url,
                start_time = EXCLUDED.start_time,
                end_time = EXCLUDED.end_time,
                duration = EXCLUDED.duration
            RETURNING owner_id, entry_key, stream_key, episode_number, title, description,
                      hls_url, thumbnail_url, start_time, end_time, duration, channel_name,
                      created_at, edited_by, edited_at
            ",
        )
        .bind(episode.owner_id.as_str())
        .bind(&episode.entry_key)
        .bind(episode.stream_key.as_str())
        .bind(episode.episode_number)
        .bind(&episode.title)
        .bind(&episode.description)
        .bind(&episode.hls_url)
        .bind(&episode.thumbnail_url)
        .bind(episode.start_time)
        .bind(episode.end_time)
        .bind(episode.duration)
        .bind(&episode.channel_name)
        .bind(episode.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    /// All episodes for a stream, in episode order.
    pub async fn list_for_stream(&self, stream_key: &StreamKey) -> Result<Vec<EpisodeEntry>> {
        let episodes = sqlx::query_as::<_, EpisodeEntry>(
            r"
            SELECT owner_id, entry_key, stream_key, episode_number, title, description,
                   hls_url, thumbnail_url, start_time, end_time, duration, channel_name,
                   created_at, edited_by, edited_at
              FROM episode_entries
             WHERE stream_key = $1
             ORDER BY episode_number
            ",
        )
        .bind(stream_key.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(episodes)
    }

    /// Admin edit of title/description; records who edited and when.
    pub async fn update_title_description(
        &self,
        owner_id: &UserId,
        stream_key: &StreamKey,
        episode_number: i32,
        title: &str,
        description: Option<&str>,
        edited_by: &str,
    ) -> Result<EpisodeEntry> {
        let entry_key = EpisodeEntry::entry_key_for(stream_key, episode_number);

        let row = sqlx::query_as::<_, EpisodeEntry>(
            r"
            UPDATE episode_entries
               SET title = $3, description = $4, edited_by = $5, edited_at = $6
             WHERE owner_id = $1 AND entry_key = $2
            RETURNING owner_id, entry_key, stream_key, episode_number, title, description,
                      hls_url, thumbnail_url, start_time, end_time, duration, channel_name,
                      created_at, edited_by, edited_at
            ",
        )
        .bind(owner_id.as_str())
        .bind(&entry_key)
        .bind(title)
        .bind(description)
        .bind(edited_by)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| Error::NotFound(format!("Episode {entry_key} not found")))
    }
}
