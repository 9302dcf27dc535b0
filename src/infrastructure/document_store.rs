//! SQLite-backed document store for fetched match and timeline payloads.
//!
//! One row per (partition key, document kind) with idempotent overwrite on
//! conflict, matching the put-semantics the fetch stage assumes: re-running
//! a fetch job must be safe.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::debug;

use crate::crawl::ports::{DocumentSink, SinkError};
use crate::domain::types::{DocumentKind, PartitionKey};

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS match_documents (
    partition_key TEXT NOT NULL,
    kind          TEXT NOT NULL,
    season        INTEGER NOT NULL,
    patch_bucket  TEXT NOT NULL,
    queue_id      INTEGER NOT NULL,
    match_id      TEXT NOT NULL,
    payload       TEXT NOT NULL,
    stored_at     TEXT NOT NULL,
    PRIMARY KEY (partition_key, kind)
)";

pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

impl SqliteDocumentStore {
    /// Opens (creating if missing) the database at the given URL, e.g.
    /// `sqlite://rewind.db`, and ensures the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid database URL: {database_url}"))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("failed to open document database")?;

        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .context("failed to create match_documents table")?;

        Ok(Self { pool })
    }

    /// Number of stored documents, for diagnostics.
    pub async fn document_count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM match_documents")
            .fetch_one(&self.pool)
            .await
            .context("failed to count documents")?;
        Ok(count)
    }

    /// Raw payload lookup, for diagnostics and tests.
    pub async fn fetch_payload(
        &self,
        key: &PartitionKey,
        kind: DocumentKind,
    ) -> Result<Option<serde_json::Value>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT payload FROM match_documents WHERE partition_key = ? AND kind = ?",
        )
        .bind(key.to_string())
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch document")?;

        row.map(|(raw,)| serde_json::from_str(&raw).context("stored payload is not valid JSON"))
            .transpose()
    }
}

#[async_trait]
impl DocumentSink for SqliteDocumentStore {
    async fn put(
        &self,
        key: &PartitionKey,
        kind: DocumentKind,
        payload: &serde_json::Value,
    ) -> Result<(), SinkError> {
        let encoded =
            serde_json::to_string(payload).map_err(|e| SinkError::Backend(e.to_string()))?;

        sqlx::query(
            r"
            INSERT INTO match_documents
                (partition_key, kind, season, patch_bucket, queue_id, match_id, payload, stored_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (partition_key, kind) DO UPDATE SET
                payload = excluded.payload,
                stored_at = excluded.stored_at
            ",
        )
        .bind(key.to_string())
        .bind(kind.as_str())
        .bind(i64::from(key.season.year()))
        .bind(&key.patch_bucket)
        .bind(i64::from(key.queue_id))
        .bind(key.match_id.as_str())
        .bind(encoded)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| SinkError::Backend(e.to_string()))?;

        debug!(key = %key, kind = kind.as_str(), "document stored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{MatchId, Season};

    async fn store() -> (SqliteDocumentStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("test.db").display());
        (SqliteDocumentStore::connect(&url).await.unwrap(), dir)
    }

    fn key() -> PartitionKey {
        PartitionKey {
            season: Season::new(2024),
            patch_bucket: "14.3".to_string(),
            queue_id: 420,
            match_id: MatchId::new("NA1_1"),
        }
    }

    #[tokio::test]
    async fn put_then_fetch_round_trips() {
        let (store, _dir) = store().await;
        let payload = serde_json::json!({"info": {"queueId": 420}});

        store.put(&key(), DocumentKind::Match, &payload).await.unwrap();

        let fetched = store
            .fetch_payload(&key(), DocumentKind::Match)
            .await
            .unwrap();
        assert_eq!(fetched, Some(payload));
    }

    #[tokio::test]
    async fn overwrite_is_idempotent() {
        let (store, _dir) = store().await;

        store
            .put(&key(), DocumentKind::Match, &serde_json::json!({"v": 1}))
            .await
            .unwrap();
        store
            .put(&key(), DocumentKind::Match, &serde_json::json!({"v": 2}))
            .await
            .unwrap();

        assert_eq!(store.document_count().await.unwrap(), 1);
        let fetched = store
            .fetch_payload(&key(), DocumentKind::Match)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched["v"], serde_json::json!(2));
    }

    #[tokio::test]
    async fn match_and_timeline_are_distinct_rows() {
        let (store, _dir) = store().await;

        store
            .put(&key(), DocumentKind::Match, &serde_json::json!({}))
            .await
            .unwrap();
        store
            .put(&key(), DocumentKind::Timeline, &serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(store.document_count().await.unwrap(), 2);
    }
}
