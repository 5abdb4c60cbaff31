//! SQLite-backed keyword store.
//!
//! The durable tier and single writer-of-record for `is_read`. Every
//! multi-row write runs inside one transaction scoped to its unit of work
//! (one import sheet, one refill batch).

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use thiserror::Error;

use super::migrations::MigrationRunner;

/// Rows per multi-row `INSERT` statement (5 bound parameters each).
const INSERT_CHUNK_ROWS: usize = 200;

/// Default number of ids per `UPDATE ... WHERE id IN (...)` statement.
pub const DEFAULT_MARK_CHUNK_SIZE: usize = 500;

/// Errors that can occur during database operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection to the database failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    Query(#[from] sqlx::Error),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] super::migrations::MigrationError),
}

/// A keyword row as stored in the durable tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordRecord {
    pub id: i64,
    /// Provenance tag, usually the originating sheet name.
    #[serde(rename = "type")]
    pub kind: String,
    pub keyword: String,
    pub is_read: bool,
    pub add_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

/// The `(id, keyword)` projection returned by unread scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadKeyword {
    pub id: i64,
    pub keyword: String,
}

/// Row counts for the keyword table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total: u64,
    pub unread: u64,
    pub read: u64,
}

/// Connection settings for [`KeywordStore::connect`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub max_connections: u32,
    pub busy_timeout: Duration,
    pub mark_chunk_size: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_connections: 8,
            busy_timeout: Duration::from_secs(30),
            mark_chunk_size: DEFAULT_MARK_CHUNK_SIZE,
        }
    }
}

/// Keyword table client.
///
/// Cloning is cheap; clones share the underlying pool, and every
/// transaction checks out its own connection.
#[derive(Clone)]
pub struct KeywordStore {
    pool: SqlitePool,
    mark_chunk_size: usize,
}

impl std::fmt::Debug for KeywordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeywordStore")
            .field("pool_size", &self.pool.size())
            .field("mark_chunk_size", &self.mark_chunk_size)
            .finish()
    }
}

impl KeywordStore {
    /// Connects to the database and returns a new client.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite URL (e.g. `sqlite://keywords.db`)
    /// * `options` - Pool size, lock wait and mark chunking
    pub async fn connect(database_url: &str, options: &StoreOptions) -> Result<Self, StoreError> {
        let connect_opts = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(options.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections.max(1))
            .acquire_timeout(options.busy_timeout)
            .connect_with(connect_opts)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        tracing::info!(url = database_url, "Keyword store connected");

        Ok(Self {
            pool,
            mark_chunk_size: options.mark_chunk_size.max(1),
        })
    }

    /// Opens (creating if needed) a database file and applies migrations.
    pub async fn open(path: &std::path::Path) -> Result<Self, StoreError> {
        let url = format!("sqlite://{}", path.display());
        let store = Self::connect(&url, &StoreOptions::default()).await?;
        store.run_migrations().await?;
        Ok(store)
    }

    /// Creates a new client from an existing pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            mark_chunk_size: DEFAULT_MARK_CHUNK_SIZE,
        }
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Runs database migrations.
    pub async fn run_migrations(&self) -> Result<usize, StoreError> {
        let runner = MigrationRunner::new(self.pool.clone());
        Ok(runner.run_migrations().await?)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Inserts a single unread keyword and returns its id.
    pub async fn insert(&self, kind: &str, keyword: &str) -> Result<i64, StoreError> {
        let now = Utc::now();
        // `execute` steps the statement to completion, so the autocommit
        // write is visible to other pooled connections on return.
        let result = sqlx::query(
            "INSERT INTO keyword (type, keyword, is_read, add_time, update_time)
             VALUES (?1, ?2, 0, ?3, ?3)",
        )
        .bind(kind)
        .bind(keyword)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Inserts one sheet's keywords in source order inside a single
    /// transaction. Either all rows become visible or none do.
    pub async fn insert_sheet(&self, kind: &str, keywords: &[String]) -> Result<u64, StoreError> {
        if keywords.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for chunk in keywords.chunks(INSERT_CHUNK_ROWS) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO keyword (type, keyword, is_read, add_time, update_time) ",
            );
            qb.push_values(chunk, |mut b, keyword| {
                b.push_bind(kind)
                    .push_bind(keyword.as_str())
                    .push_bind(0i64)
                    .push_bind(now)
                    .push_bind(now);
            });
            inserted += qb.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Marks the given ids as read and returns the ids this call flipped.
    ///
    /// The `is_read = 0` predicate makes the operation idempotent: ids that
    /// are already read, or were claimed by a concurrent caller, are
    /// skipped without error and keep their `update_time`. All chunks
    /// commit together.
    pub async fn mark_read(&self, ids: &[i64]) -> Result<Vec<i64>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut flipped = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(self.mark_chunk_size) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new("UPDATE keyword SET is_read = 1, update_time = ");
            qb.push_bind(now);
            qb.push(" WHERE is_read = 0 AND id IN (");
            let mut separated = qb.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(") RETURNING id");

            let rows: Vec<(i64,)> = qb.build_query_as().fetch_all(&mut *tx).await?;
            flipped.extend(rows.into_iter().map(|(id,)| id));
        }

        tx.commit().await?;
        Ok(flipped)
    }

    /// Removes every row and resets the id sequence. Returns rows deleted.
    pub async fn truncate(&self) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM keyword")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM sqlite_sequence WHERE name = 'keyword'")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(deleted)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Returns up to `limit` unread, non-empty keywords ordered by id
    /// descending, starting strictly below `before_id` when given.
    ///
    /// Callers page through the table by passing the smallest id of the
    /// previous page, which stays stable while earlier pages are marked.
    pub async fn select_unread(
        &self,
        limit: usize,
        before_id: Option<i64>,
    ) -> Result<Vec<UnreadKeyword>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, keyword FROM keyword
             WHERE is_read = 0 AND keyword <> '' AND (?1 IS NULL OR id < ?1)
             ORDER BY id DESC
             LIMIT ?2",
        )
        .bind(before_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| UnreadKeyword {
                id: row.get("id"),
                keyword: row.get("keyword"),
            })
            .collect())
    }

    /// Retrieves a record by id.
    pub async fn get(&self, id: i64) -> Result<Option<KeywordRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT id, type, keyword, is_read, add_time, update_time FROM keyword WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| KeywordRecord {
            id: r.get("id"),
            kind: r.get("type"),
            keyword: r.get("keyword"),
            is_read: r.get::<i64, _>("is_read") != 0,
            add_time: r.get("add_time"),
            update_time: r.get("update_time"),
        }))
    }

    /// Looks up records by keyword text, oldest first.
    pub async fn find_by_keyword(&self, keyword: &str) -> Result<Vec<KeywordRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, type, keyword, is_read, add_time, update_time
             FROM keyword WHERE keyword = ?1 ORDER BY id",
        )
        .bind(keyword)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| KeywordRecord {
                id: r.get("id"),
                kind: r.get("type"),
                keyword: r.get("keyword"),
                is_read: r.get::<i64, _>("is_read") != 0,
                add_time: r.get("add_time"),
                update_time: r.get("update_time"),
            })
            .collect())
    }

    /// Row counts per `type`, sorted by type.
    pub async fn count_by_type(&self) -> Result<Vec<(String, u64)>, StoreError> {
        let rows =
            sqlx::query("SELECT type, COUNT(*) AS n FROM keyword GROUP BY type ORDER BY type")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get("type"), r.get::<i64, _>("n") as u64))
            .collect())
    }

    /// Returns total/unread/read counts.
    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        let row = sqlx::query(
            "SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN is_read = 0 THEN 1 ELSE 0 END), 0) AS unread
             FROM keyword",
        )
        .fetch_one(&self.pool)
        .await?;

        let total = row.get::<i64, _>("total") as u64;
        let unread = row.get::<i64, _>("unread") as u64;
        Ok(StoreStats {
            total,
            unread,
            read: total - unread,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_store(dir: &tempfile::TempDir) -> KeywordStore {
        KeywordStore::open(&dir.path().join("test.db")).await.unwrap()
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_insert_creates_unread_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        let id = store.insert("Sheet1", "rust").await.unwrap();
        let record = store.get(id).await.unwrap().unwrap();

        assert_eq!(record.kind, "Sheet1");
        assert_eq!(record.keyword, "rust");
        assert!(!record.is_read);
        assert_eq!(record.add_time, record.update_time);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_inserted_rows_visible_to_other_connections() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        for round in 0..100 {
            store.truncate().await.unwrap();
            for kw in ["a", "b", "c"] {
                store.insert("t", kw).await.unwrap();
            }

            let unread = store.select_unread(10, None).await.unwrap();
            let words: Vec<&str> = unread.iter().map(|k| k.keyword.as_str()).collect();
            assert_eq!(words, vec!["c", "b", "a"], "round {round}");
            assert_eq!(store.stats().await.unwrap().unread, 3, "round {round}");
        }
    }

    #[tokio::test]
    async fn test_insert_sheet_preserves_source_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        let keywords: Vec<String> = (0..450).map(|i| format!("kw-{i}")).collect();
        let inserted = store.insert_sheet("big", &keywords).await.unwrap();
        assert_eq!(inserted, 450);

        let first = store.get(1).await.unwrap().unwrap();
        let last = store.get(450).await.unwrap().unwrap();
        assert_eq!(first.keyword, "kw-0");
        assert_eq!(last.keyword, "kw-449");
    }

    #[tokio::test]
    async fn test_select_unread_orders_by_id_descending() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store
            .insert_sheet("s", &strings(&["a", "b", "c", "d"]))
            .await
            .unwrap();

        let page = store.select_unread(2, None).await.unwrap();
        let ids: Vec<i64> = page.iter().map(|k| k.id).collect();
        assert_eq!(ids, vec![4, 3]);

        let next = store.select_unread(2, Some(3)).await.unwrap();
        let words: Vec<&str> = next.iter().map(|k| k.keyword.as_str()).collect();
        assert_eq!(words, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_select_unread_skips_read_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store.insert("s", "keep").await.unwrap();
        store.insert("s", "").await.unwrap();
        let read_id = store.insert("s", "done").await.unwrap();
        store.mark_read(&[read_id]).await.unwrap();

        let unread = store.select_unread(10, None).await.unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].keyword, "keep");
    }

    #[tokio::test]
    async fn test_mark_read_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store
            .insert_sheet("s", &strings(&["a", "b", "c"]))
            .await
            .unwrap();

        let first = store.mark_read(&[1, 2]).await.unwrap();
        assert_eq!(first, vec![1, 2]);
        let stamped = store.get(1).await.unwrap().unwrap().update_time;

        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = store.mark_read(&[1, 2, 3]).await.unwrap();
        assert_eq!(second, vec![3]);

        let one = store.get(1).await.unwrap().unwrap();
        let three = store.get(3).await.unwrap().unwrap();
        assert!(one.is_read);
        assert_eq!(one.update_time, stamped);
        assert!(three.is_read);
        assert!(three.update_time > three.add_time);
    }

    #[tokio::test]
    async fn test_mark_read_spans_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("chunks.db").display());
        let options = StoreOptions {
            mark_chunk_size: 7,
            ..Default::default()
        };
        let store = KeywordStore::connect(&url, &options).await.unwrap();
        store.run_migrations().await.unwrap();

        let keywords: Vec<String> = (0..30).map(|i| i.to_string()).collect();
        store.insert_sheet("s", &keywords).await.unwrap();

        let ids: Vec<i64> = (1..=30).collect();
        let flipped = store.mark_read(&ids).await.unwrap();
        assert_eq!(flipped.len(), 30);
        assert_eq!(store.stats().await.unwrap().unread, 0);
    }

    #[tokio::test]
    async fn test_truncate_resets_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store.insert_sheet("s", &strings(&["a", "b"])).await.unwrap();

        assert_eq!(store.truncate().await.unwrap(), 2);
        assert_eq!(store.stats().await.unwrap(), StoreStats::default());

        let id = store.insert("s", "fresh").await.unwrap();
        assert_eq!(id, 1);
    }

    #[tokio::test]
    async fn test_stats_and_type_counts() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store.insert_sheet("x", &strings(&["a", "b"])).await.unwrap();
        store.insert_sheet("y", &strings(&["c"])).await.unwrap();
        store.mark_read(&[1]).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(
            stats,
            StoreStats {
                total: 3,
                unread: 2,
                read: 1
            }
        );

        let by_type = store.count_by_type().await.unwrap();
        assert_eq!(by_type, vec![("x".to_string(), 2), ("y".to_string(), 1)]);
    }

    #[test]
    fn test_record_serializes_type_field() {
        let now = Utc::now();
        let record = KeywordRecord {
            id: 1,
            kind: "Sheet1".to_string(),
            keyword: "k".to_string(),
            is_read: false,
            add_time: now,
            update_time: now,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "Sheet1");
    }
}
