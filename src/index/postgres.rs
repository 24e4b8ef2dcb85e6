//! Postgres-backed tag index.
//!
//! Schema lives in `migrations/` and is versioned by this crate,
//! independently of any host application schema. Row-level locking keeps
//! concurrent `record` calls for different URLs from serializing each other.

use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::error::IndexError;
use crate::tags::Tag;

use super::TagIndex;

pub struct PgTagIndex {
    pool: PgPool,
}

impl PgTagIndex {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, IndexError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|err| IndexError::storage("connect", err.to_string()))?;
        Ok(Self::new(pool))
    }

    pub async fn run_migrations(&self) -> Result<(), IndexError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|err| IndexError::storage("migrate", err.to_string()))
    }

    fn canonicals(tags: &[Tag]) -> Vec<String> {
        tags.iter().map(|tag| tag.canonical().to_string()).collect()
    }
}

#[async_trait]
impl TagIndex for PgTagIndex {
    async fn record(&self, url: &str, tags: &HashSet<Tag>) -> Result<(), IndexError> {
        let canonicals: Vec<String> = tags.iter().map(|tag| tag.canonical().to_string()).collect();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| IndexError::storage("record", err.to_string()))?;

        sqlx::query("DELETE FROM scopa_tag_index WHERE url = $1")
            .bind(url)
            .execute(&mut *tx)
            .await
            .map_err(|err| IndexError::storage("record", err.to_string()))?;

        if !canonicals.is_empty() {
            sqlx::query(
                "INSERT INTO scopa_tag_index (tag, url) \
                 SELECT tag, $2 FROM unnest($1::text[]) AS tag \
                 ON CONFLICT (tag, url) DO NOTHING",
            )
            .bind(&canonicals)
            .bind(url)
            .execute(&mut *tx)
            .await
            .map_err(|err| IndexError::storage("record", err.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|err| IndexError::storage("record", err.to_string()))
    }

    async fn lookup(&self, tags: &[Tag]) -> Result<HashSet<String>, IndexError> {
        if tags.is_empty() {
            return Ok(HashSet::new());
        }

        let urls: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT url FROM scopa_tag_index WHERE tag = ANY($1)")
                .bind(Self::canonicals(tags))
                .fetch_all(&self.pool)
                .await
                .map_err(|err| IndexError::storage("lookup", err.to_string()))?;

        Ok(urls.into_iter().collect())
    }

    async fn remove(&self, tags: &[Tag]) -> Result<(), IndexError> {
        if tags.is_empty() {
            return Ok(());
        }

        sqlx::query("DELETE FROM scopa_tag_index WHERE tag = ANY($1)")
            .bind(Self::canonicals(tags))
            .execute(&self.pool)
            .await
            .map_err(|err| IndexError::storage("remove", err.to_string()))?;

        Ok(())
    }

    async fn remove_urls(&self, tag: &Tag, urls: &[String]) -> Result<(), IndexError> {
        if urls.is_empty() {
            return Ok(());
        }

        sqlx::query("DELETE FROM scopa_tag_index WHERE tag = $1 AND url = ANY($2)")
            .bind(tag.canonical())
            .bind(urls.to_vec())
            .execute(&self.pool)
            .await
            .map_err(|err| IndexError::storage("remove_urls", err.to_string()))?;

        Ok(())
    }
}
