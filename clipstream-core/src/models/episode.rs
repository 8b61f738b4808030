use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::id::{StreamKey, UserId};

/// One published episode, cut from a finished upload by the post-pass.
///
/// Keyed by `(owner_id, entry_key)` where the entry key is
/// `EPISODE#<streamKey>#<n>`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeEntry {
    pub owner_id: UserId,
    pub entry_key: String,
    pub stream_key: StreamKey,
    pub episode_number: i32,
    pub title: String,
    pub description: Option<String>,
    pub hls_url: String,
    pub thumbnail_url: String,
    /// Seconds from the start of the source upload.
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,
    pub channel_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub edited_by: Option<String>,
    pub edited_at: Option<DateTime<Utc>>,
}

impl EpisodeEntry {
    /// `EPISODE#<streamKey>#<n>`
    #[must_use]
    pub fn entry_key_for(stream_key: &StreamKey, episode_number: i32) -> String {
        format!("EPISODE#{stream_key}#{episode_number}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_key_format() {
        let key = StreamKey::from_string("sk_A".to_string());
        assert_eq!(EpisodeEntry::entry_key_for(&key, 3), "EPISODE#sk_A#3");
    }
}
