use crate::config::DatabaseConfig;
use crate::error::StoreError;
use crate::models::NewArticle;
use crate::store::Repository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

const SCHEMA_PUBLICATIONS: &str = r#"CREATE TABLE IF NOT EXISTS publications (
    id          UUID PRIMARY KEY,
    name        TEXT NOT NULL UNIQUE,
    created_on  TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_on  TIMESTAMPTZ NOT NULL DEFAULT now()
);"#;

const SCHEMA_ARTICLES: &str = r#"CREATE TABLE IF NOT EXISTS articles (
    id              UUID PRIMARY KEY,
    url             TEXT,
    title           TEXT NOT NULL,
    subtitle        TEXT NULL,
    publication_id  UUID NOT NULL REFERENCES publications(id),
    date_published  TIMESTAMPTZ NULL,
    created_on      TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_on      TIMESTAMPTZ NOT NULL DEFAULT now()
);"#;

/// `$1` candidate ids, `$2` names. Existing rows keep their id; only
/// `updated_on` moves. RETURNING covers both branches.
const SQL_UPSERT_PUBLICATIONS: &str = r#"INSERT INTO publications (id, name, created_on, updated_on)
SELECT id, name, now(), now()
FROM UNNEST($1::uuid[], $2::text[]) AS input(id, name)
ON CONFLICT (name) DO UPDATE
SET updated_on = now()
RETURNING name, id"#;

const SQL_INSERT_ARTICLES: &str = r#"INSERT INTO articles
    (id, url, title, subtitle, publication_id, date_published, created_on, updated_on)
SELECT id, url, title, subtitle, publication_id, date_published, now(), now()
FROM UNNEST($1::uuid[], $2::text[], $3::text[], $4::text[], $5::uuid[], $6::timestamptz[])
    AS input(id, url, title, subtitle, publication_id, date_published)"#;

/// Postgres-backed [`Repository`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        info!(target_db = %config.redacted(), "Connecting to Postgres");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.url())
            .await?;
        Ok(Self { pool })
    }

    /// Creates both relations if they are absent. Existing tables are left untouched.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(SCHEMA_PUBLICATIONS).execute(&mut *tx).await?;
        sqlx::query(SCHEMA_ARTICLES).execute(&mut *tx).await?;
        tx.commit().await?;
        info!("Schema ready");
        Ok(())
    }
}

#[async_trait]
impl Repository for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn upsert_publications(
        &self,
        names: &[String],
    ) -> Result<Vec<(String, Uuid)>, StoreError> {
        let ids: Vec<Uuid> = names.iter().map(|_| Uuid::new_v4()).collect();

        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(SQL_UPSERT_PUBLICATIONS)
            .persistent(false)
            .bind(&ids)
            .bind(names)
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;

        let mut returned = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("name")?;
            let id: Uuid = row.try_get("id")?;
            returned.push((name, id));
        }
        debug!(requested = names.len(), returned = returned.len(), "Publication chunk committed");
        Ok(returned)
    }

    async fn insert_articles(&self, rows: &[NewArticle]) -> Result<u64, StoreError> {
        let ids: Vec<Uuid> = rows.iter().map(|_| Uuid::new_v4()).collect();
        let urls: Vec<&str> = rows.iter().map(|r| r.url.as_str()).collect();
        let titles: Vec<&str> = rows.iter().map(|r| r.title.as_str()).collect();
        let subtitles: Vec<Option<&str>> = rows.iter().map(|r| r.subtitle.as_deref()).collect();
        let publication_ids: Vec<Uuid> = rows.iter().map(|r| r.publication_id).collect();
        let dates: Vec<Option<DateTime<Utc>>> = rows.iter().map(|r| r.date_published).collect();

        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(SQL_INSERT_ARTICLES)
            .persistent(false)
            .bind(&ids)
            .bind(&urls)
            .bind(&titles)
            .bind(&subtitles)
            .bind(&publication_ids)
            .bind(&dates)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        debug!(inserted, "Article chunk committed");
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_targets_name_and_only_touches_updated_on() {
        assert!(SQL_UPSERT_PUBLICATIONS.contains("ON CONFLICT (name) DO UPDATE"));
        assert!(SQL_UPSERT_PUBLICATIONS.contains("SET updated_on = now()"));
        assert!(!SQL_UPSERT_PUBLICATIONS.contains("SET name"));
        assert!(!SQL_UPSERT_PUBLICATIONS.contains("created_on ="));
        assert!(SQL_UPSERT_PUBLICATIONS.contains("RETURNING name, id"));
    }

    #[test]
    fn article_insert_has_no_conflict_clause() {
        assert!(SQL_INSERT_ARTICLES.contains("INSERT INTO articles"));
        assert!(!SQL_INSERT_ARTICLES.contains("ON CONFLICT"));
        assert!(SQL_INSERT_ARTICLES.contains("$6::timestamptz[]"));
    }

    #[test]
    fn article_insert_binds_every_column() {
        for column in [
            "url",
            "title",
            "subtitle",
            "publication_id",
            "date_published",
        ] {
            assert!(SQL_INSERT_ARTICLES.contains(column), "missing {column}");
        }
    }

    #[test]
    fn schema_declares_constraints() {
        assert!(SCHEMA_PUBLICATIONS.contains("name        TEXT NOT NULL UNIQUE"));
        assert!(SCHEMA_ARTICLES.contains("REFERENCES publications(id)"));
        assert!(SCHEMA_ARTICLES.contains("title           TEXT NOT NULL"));
        assert!(SCHEMA_PUBLICATIONS.contains("IF NOT EXISTS"));
        assert!(SCHEMA_ARTICLES.contains("IF NOT EXISTS"));
    }
}
