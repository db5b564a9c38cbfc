use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::types::{Game, PromoEvent};

/// Read access to the games on sale and the promotional calendar.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<Game>>;

    async fn count(&self) -> Result<u64>;

    /// The game at `offset` in the canonical ordering (ascending id).
    async fn find_by_offset(&self, offset: u64) -> Result<Option<Game>>;

    /// The promotional event running at `now`, newest first.
    async fn active_event(&self, now: DateTime<Utc>) -> Result<Option<PromoEvent>>;
}

/// Catalog backed by the `games` and `events` tables.
#[derive(Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<Game>> {
        sqlx::query_as::<_, Game>(
            r#"SELECT id, slug, title, price, category FROM games WHERE slug = $1"#,
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await
        .context("failed to look up game by slug")
    }

    async fn count(&self) -> Result<u64> {
        let total: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM games"#)
            .fetch_one(&self.pool)
            .await
            .context("failed to count games")?;
        Ok(u64::try_from(total).unwrap_or(0))
    }

    async fn find_by_offset(&self, offset: u64) -> Result<Option<Game>> {
        let offset = i64::try_from(offset).context("game offset out of range")?;
        sqlx::query_as::<_, Game>(
            r#"SELECT id, slug, title, price, category FROM games ORDER BY id ASC OFFSET $1 LIMIT 1"#,
        )
        .bind(offset)
        .fetch_optional(&self.pool)
        .await
        .context("failed to look up game by offset")
    }

    async fn active_event(&self, now: DateTime<Utc>) -> Result<Option<PromoEvent>> {
        sqlx::query_as::<_, PromoEvent>(
            r#"SELECT id, title, start_date AS starts_at, end_date AS ends_at, is_active
               FROM events
               WHERE is_active = TRUE
                 AND (start_date IS NULL OR start_date <= $1)
                 AND (end_date IS NULL OR end_date >= $1)
               ORDER BY created_at DESC, id DESC
               LIMIT 1"#,
        )
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .context("failed to look up active event")
    }
}
