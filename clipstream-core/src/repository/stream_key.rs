//! Stream-key mapping and account lookups.
//!
//! The mapping table is authoritative for ownership; the request's own
//! claims are only consulted when the mapping has no emails at all.

use sqlx::PgPool;

use crate::{
    models::{StreamKey, StreamKeyMapping},
    Result,
};

#[derive(Clone)]
pub struct StreamKeyRepository {
    pool: PgPool,
}

impl StreamKeyRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Look up the mapping for a stream key. `None` when the key is unknown.
    pub async fn find(&self, stream_key: &StreamKey) -> Result<Option<StreamKeyMapping>> {
        let mapping = sqlx::query_as::<_, StreamKeyMapping>(
            r"
            SELECT stream_key, owner_email, collaborator_email, is_collaborator_key,
                   channel_name, creator_id
              FROM stream_key_mappings
             WHERE stream_key = $1
            ",
        )
        .bind(stream_key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(mapping)
    }

    /// Last-resort ownership fallback: the owner email recorded for a channel
    /// in the channel-metadata table.
    pub async fn find_owner_by_channel(&self, channel_name: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT owner_email FROM channels WHERE name = $1")
                .bind(channel_name)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(email,)| email))
    }

    /// Per-owner auto-publish flag. Unknown owners default to not publishing.
    pub async fn post_automatically(&self, owner_email: &str) -> Result<bool> {
        let row: Option<(bool,)> =
            sqlx::query_as("SELECT post_automatically FROM accounts WHERE email = $1")
                .bind(owner_email)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(flag,)| flag).unwrap_or(false))
    }
}
