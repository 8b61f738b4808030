//! Catalog entry persistence.
//!
//! Writes are update-preferring so repeated registrations for the same
//! upload converge instead of clobbering each other. Per-field rules:
//!
//! | field | on conflict |
//! |---|---|
//! | `hls_url` | fill when the stored value is NULL, never replace a set value |
//! | `thumbnail_url` | a real URL replaces the placeholder; the placeholder never replaces a real URL |
//! | `title` / `description` / `price` | fill when missing |
//! | `folder_name`, `creator_id`, `is_collaborator_video`, `is_visible` | overwrite with the incoming value |

use sqlx::PgPool;

use crate::{
    models::{CatalogEntry, UserId},
    Result,
};

#[derive(Clone)]
pub struct CatalogRepository {
    pool: PgPool,
}

impl CatalogRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or update an entry keyed by `(owner_id, file_id)`.
    ///
    /// `default_thumbnail_url` identifies the placeholder so the conflict
    /// clause can tell a real thumbnail from the fallback.
    pub async fn upsert(
        &self,
        entry: &CatalogEntry,
        default_thumbnail_url: &str,
    ) -> Result<CatalogEntry> {
        let row = sqlx::query_as::<_, CatalogEntry>(
            r"
            INSERT INTO catalog_entries
                (owner_id, file_id, upload_id, hls_url, thumbnail_url, folder_name,
                 creator_id, is_collaborator_video, is_visible, title, description,
                 price, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13)
            ON CONFLICT (owner_id, file_id) DO UPDATE SET
                hls_url = COALESCE(catalog_entries.hls_url, EXCLUDED.hls_url),
                thumbnail_url = CASE
                    WHEN catalog_entries.thumbnail_url = $14 OR catalog_entries.thumbnail_url = ''
                        THEN EXCLUDED.thumbnail_url
                    ELSE catalog_entries.thumbnail_url
                END,
                folder_name = EXCLUDED.folder_name,
                creator_id = EXCLUDED.creator_id,
                is_collaborator_video = EXCLUDED.is_collaborator_video,
                is_visible = EXCLUDED.is_visible,
                title = COALESCE(catalog_entries.title, EXCLUDED.title),
                description = COALESCE(catalog_entries.description, EXCLUDED.description),
                price = COALESCE(catalog_entries.price, EXCLUDED.price),
                updated_at = EXCLUDED.updated_at
            RETURNING owner_id, file_id, upload_id, hls_url, thumbnail_url, folder_name,
                      creator_id, is_collaborator_video, is_visible, title, description,
                      price, created_at, updated_at
            ",
        )
        .bind(entry.owner_id.as_str())
        .bind(&entry.file_id)
        .bind(entry.upload_id.as_str())
        .bind(&entry.hls_url)
        .bind(&entry.thumbnail_url)
        .bind(&entry.folder_name)
        .bind(entry.creator_id.as_ref().map(UserId::as_str))
        .bind(entry.is_collaborator_video)
        .bind(entry.is_visible)
        .bind(&entry.title)
        .bind(&entry.description)
        .bind(&entry.price)
        .bind(entry.created_at)
        .bind(default_thumbnail_url)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn find(&self, owner_id: &UserId, file_id: &str) -> Result<Option<CatalogEntry>> {
        let entry = sqlx::query_as::<_, CatalogEntry>(
            r"
            SELECT owner_id, file_id, upload_id, hls_url, thumbnail_url, folder_name,
                   creator_id, is_collaborator_video, is_visible, title, description,
                   price, created_at, updated_at
              FROM catalog_entries
             WHERE owner_id = $1 AND file_id = $2
            ",
        )
        .bind(owner_id.as_str())
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }
}
