//! Durable full-text metadata store on SQLite FTS5.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::StorageConfig;
use crate::error::{IndexerError, Result};
use crate::metadata::{MetadataRecord, Observation, VideoStats};

const TABLE: &str = "video_metadata";
const COLUMNS: [&str; 6] = [
    "video_name",
    "frame_number",
    "timestamp",
    "transcription",
    "ocr_text",
    "objects_detected",
];

fn create_table_sql() -> String {
    format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS {} USING fts5({})",
        TABLE,
        COLUMNS.join(", ")
    )
}

fn select_sql(filter: &str) -> String {
    format!("SELECT {} FROM {} {} ORDER BY rowid", COLUMNS.join(", "), TABLE, filter)
}

/// Escape `LIKE` wildcards so the query is matched literally
fn like_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Missing tables and damaged files surface as `StoreCorrupt`
fn classify(error: sqlx::Error) -> IndexerError {
    if let sqlx::Error::Database(db) = &error {
        let message = db.message();
        if ["no such table", "no such column", "malformed", "not a database"]
            .iter()
            .any(|needle| message.contains(needle))
        {
            return IndexerError::StoreCorrupt(message.to_string());
        }
    }
    IndexerError::Database(error)
}

/// Append-only store of metadata records.
///
/// Appends and queries share the store freely; `reset` takes the lock
/// exclusively so no append lands in a half-recreated table.
#[derive(Clone)]
pub struct MetadataStore {
    pool: SqlitePool,
    lock: Arc<RwLock<()>>,
}

impl MetadataStore {
    /// Open (creating if needed) the database file named by the config
    pub async fn open(config: &StorageConfig) -> Result<Self> {
        let path = &config.database_path;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(config.busy_timeout));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(classify)?;

        info!("🗄️  Opened metadata store at {}", path.display());
        Self::from_pool(pool).await
    }

    /// Open a database file with default pool settings
    pub async fn open_path(path: &Path) -> Result<Self> {
        Self::open(&StorageConfig {
            database_path: path.to_path_buf(),
            max_connections: 4,
            busy_timeout: 30,
        })
        .await
    }

    /// A private in-memory store. A single connection is kept alive for the
    /// pool's lifetime since every new connection would see an empty database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self {
            pool,
            lock: Arc::new(RwLock::new(())),
        };
        store.initialize().await?;
        Ok(store)
    }

    /// Create the table if absent. Existing rows are left alone.
    pub async fn initialize(&self) -> Result<()> {
        let _guard = self.lock.read().await;
        sqlx::query(&create_table_sql())
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }

    /// Check that the table exists with the expected columns
    pub async fn verify_schema(&self) -> Result<()> {
        let _guard = self.lock.read().await;
        let columns: Vec<String> =
            sqlx::query_scalar(&format!("SELECT name FROM pragma_table_info('{}')", TABLE))
                .fetch_all(&self.pool)
                .await
                .map_err(classify)?;

        if columns.is_empty() {
            return Err(IndexerError::StoreCorrupt(format!("table {} is missing", TABLE)));
        }
        if columns.iter().map(String::as_str).ne(COLUMNS.iter().copied()) {
            return Err(IndexerError::StoreCorrupt(format!(
                "unexpected columns in {}: {}",
                TABLE,
                columns.join(", ")
            )));
        }
        Ok(())
    }

    /// Durably append one observation
    pub async fn append(&self, video_name: &str, observation: &Observation) -> Result<()> {
        let record = MetadataRecord::from_observation(video_name, observation);
        let _guard = self.lock.read().await;

        sqlx::query(&format!(
            "INSERT INTO {} ({}) VALUES (?, ?, ?, ?, ?, ?)",
            TABLE,
            COLUMNS.join(", ")
        ))
        .bind(&record.video_name)
        .bind(&record.frame_number)
        .bind(&record.timestamp)
        .bind(&record.transcription)
        .bind(&record.ocr_text)
        .bind(&record.objects_detected)
        .execute(&self.pool)
        .await
        .map_err(IndexerError::StoreWriteFailure)?;

        Ok(())
    }

    /// Remove every record, leaving an empty table with the same schema
    pub async fn reset(&self) -> Result<()> {
        let _guard = self.lock.write().await;
        let mut tx = self.pool.begin().await.map_err(classify)?;

        sqlx::query(&format!("DROP TABLE IF EXISTS {}", TABLE))
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        sqlx::query(&create_table_sql())
            .execute(&mut *tx)
            .await
            .map_err(classify)?;

        tx.commit().await.map_err(classify)?;
        info!("🧹 Metadata store reset");
        Ok(())
    }

    /// Records whose transcription or OCR text contains `query` (ASCII
    /// case-insensitive), in insertion order. The empty query matches every
    /// record carrying text.
    pub async fn search(&self, query: &str) -> Result<Vec<MetadataRecord>> {
        let pattern = like_pattern(query);
        let _guard = self.lock.read().await;
        let records = sqlx::query_as::<_, MetadataRecord>(&select_sql(
            "WHERE transcription LIKE ? ESCAPE '\\' OR ocr_text LIKE ? ESCAPE '\\'",
        ))
        .bind(&pattern)
        .bind(&pattern)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        debug!("🔎 '{}' matched {} records", query, records.len());
        Ok(records)
    }

    /// Distinct names of every video with at least one record
    pub async fn list_videos(&self) -> Result<BTreeSet<String>> {
        let _guard = self.lock.read().await;
        let names: Vec<String> =
            sqlx::query_scalar(&format!("SELECT DISTINCT video_name FROM {}", TABLE))
                .fetch_all(&self.pool)
                .await
                .map_err(classify)?;
        Ok(names.into_iter().collect())
    }

    /// Every record of one video in insertion order
    pub async fn records_for_video(&self, video_name: &str) -> Result<Vec<MetadataRecord>> {
        let _guard = self.lock.read().await;
        sqlx::query_as::<_, MetadataRecord>(&select_sql("WHERE video_name = ?"))
            .bind(video_name)
            .fetch_all(&self.pool)
            .await
            .map_err(classify)
    }

    /// Records within `tolerance` seconds of `seconds` (inclusive), ordered by time
    pub async fn records_near(
        &self,
        video_name: &str,
        seconds: f64,
        tolerance: f64,
    ) -> Result<Vec<MetadataRecord>> {
        let tolerance = tolerance.abs();
        let mut near: Vec<(u64, MetadataRecord)> = self
            .records_for_video(video_name)
            .await?
            .into_iter()
            .filter_map(|record| record.seconds().map(|secs| (secs, record)))
            .filter(|(secs, _)| (*secs as f64 - seconds).abs() <= tolerance)
            .collect();

        near.sort_by_key(|(secs, _)| *secs);
        Ok(near.into_iter().map(|(_, record)| record).collect())
    }

    /// Distinct record timestamps of one video in seconds, ascending
    pub async fn timestamps(&self, video_name: &str) -> Result<Vec<u64>> {
        let records = self.records_for_video(video_name).await?;
        let mut skipped = 0usize;
        let seconds: BTreeSet<u64> = records
            .iter()
            .filter_map(|record| {
                let secs = record.seconds();
                if secs.is_none() {
                    skipped += 1;
                }
                secs
            })
            .collect();

        if skipped > 0 {
            warn!("Skipped {} records of {} with unparseable timestamps", skipped, video_name);
        }
        Ok(seconds.into_iter().collect())
    }

    /// Record counts for one video
    pub async fn stats(&self, video_name: &str) -> Result<VideoStats> {
        let records = self.records_for_video(video_name).await?;
        let non_empty = |text: &Option<String>| text.as_deref().map_or(false, |t| !t.is_empty());

        let mut seconds: Vec<(u64, &str)> = records
            .iter()
            .filter_map(|r| r.seconds().map(|s| (s, r.timestamp.as_str())))
            .collect();
        seconds.sort_by_key(|(s, _)| *s);

        Ok(VideoStats {
            video_name: video_name.to_string(),
            total_records: records.len(),
            transcription_records: records.iter().filter(|r| non_empty(&r.transcription)).count(),
            ocr_records: records.iter().filter(|r| non_empty(&r.ocr_text)).count(),
            first_timestamp: seconds.first().map(|(_, t)| t.to_string()),
            last_timestamp: seconds.last().map(|(_, t)| t.to_string()),
        })
    }

    /// Total number of records
    pub async fn count(&self) -> Result<u64> {
        let _guard = self.lock.read().await;
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", TABLE))
            .fetch_one(&self.pool)
            .await
            .map_err(classify)?;
        Ok(count.max(0) as u64)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn seeded() -> MetadataStore {
        let store = MetadataStore::in_memory().await.unwrap();
        store.append("a.mp4", &Observation::frame(0, "00:00:00", "Welcome")).await.unwrap();
        store.append("a.mp4", &Observation::frame(150, "00:00:05", "EXIT 12")).await.unwrap();
        store.append("a.mp4", &Observation::speech(6.4, "take the next exit")).await.unwrap();
        store.append("b.mp4", &Observation::speech(2.0, "nothing to see")).await.unwrap();
        store
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("EXIT"), "%EXIT%");
        assert_eq!(like_pattern(""), "%%");
        assert_eq!(like_pattern("50%_off\\"), "%50\\%\\_off\\\\%");
    }

    #[tokio::test]
    async fn test_fresh_store_schema() {
        let store = MetadataStore::in_memory().await.unwrap();
        store.verify_schema().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.list_videos().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_both_columns_in_order() {
        let store = seeded().await;
        let results = store.search("exit").await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].ocr_text.as_deref(), Some("EXIT 12"));
        assert_eq!(results[1].transcription.as_deref(), Some("take the next exit"));
        assert!(results.iter().all(|r| r.matches("exit")));
    }

    #[tokio::test]
    async fn test_search_wildcards_are_literal() {
        let store = MetadataStore::in_memory().await.unwrap();
        store.append("a.mp4", &Observation::frame(0, "00:00:00", "50% off")).await.unwrap();
        store.append("a.mp4", &Observation::frame(15, "00:00:01", "500 off")).await.unwrap();

        assert_eq!(store.search("50%").await.unwrap().len(), 1);
        assert_eq!(store.search("5_0").await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_empty_query_matches_every_record() {
        let store = seeded().await;

        let all = store.search("").await.unwrap();
        assert_eq!(all.len(), 4);
        assert!(all.iter().all(|r| r.matches("")));
    }

    #[tokio::test]
    async fn test_rows_keep_nullable_columns() {
        let store = seeded().await;
        let records = store.records_for_video("a.mp4").await.unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[1].frame_number.as_deref(), Some("150"));
        assert!(records[1].transcription.is_none());
        assert!(records[2].frame_number.is_none());
        assert_eq!(records[2].timestamp, "00:00:06");
        assert!(records.iter().all(|r| r.objects_detected.is_none()));
    }

    #[tokio::test]
    async fn test_list_videos_distinct() {
        let store = seeded().await;
        let videos: Vec<String> = store.list_videos().await.unwrap().into_iter().collect();
        assert_eq!(videos, vec!["a.mp4".to_string(), "b.mp4".to_string()]);
    }

    #[tokio::test]
    async fn test_records_near_inclusive() {
        let store = seeded().await;

        let near = store.records_near("a.mp4", 5.0, 1.0).await.unwrap();
        let timestamps: Vec<&str> = near.iter().map(|r| r.timestamp.as_str()).collect();
        assert_eq!(timestamps, vec!["00:00:05", "00:00:06"]);

        assert!(store.records_near("a.mp4", 2.5, 1.0).await.unwrap().is_empty());
        assert!(store.records_near("missing.mp4", 5.0, 1.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timestamps_and_stats() {
        let store = seeded().await;
        store.append("a.mp4", &Observation::frame(165, "00:00:05", "EXIT 12")).await.unwrap();

        assert_eq!(store.timestamps("a.mp4").await.unwrap(), vec![0, 5, 6]);

        let stats = store.stats("a.mp4").await.unwrap();
        assert_eq!(stats.total_records, 4);
        assert_eq!(stats.ocr_records, 3);
        assert_eq!(stats.transcription_records, 1);
        assert_eq!(stats.first_timestamp.as_deref(), Some("00:00:00"));
        assert_eq!(stats.last_timestamp.as_deref(), Some("00:00:06"));
    }

    #[tokio::test]
    async fn test_reset_is_idempotent() {
        let store = seeded().await;

        store.reset().await.unwrap();
        store.reset().await.unwrap();

        store.verify_schema().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.search("exit").await.unwrap().is_empty());

        store.append("c.mp4", &Observation::speech(0.0, "fresh start")).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_table_is_corrupt() {
        let store = MetadataStore::in_memory().await.unwrap();
        sqlx::query("DROP TABLE video_metadata").execute(&store.pool).await.unwrap();

        assert!(matches!(store.verify_schema().await, Err(IndexerError::StoreCorrupt(_))));
        assert!(matches!(store.search("x").await, Err(IndexerError::StoreCorrupt(_))));
        assert!(matches!(
            store.append("a.mp4", &Observation::speech(0.0, "x")).await,
            Err(IndexerError::StoreWriteFailure(_))
        ));

        // Reset recreates the table
        store.reset().await.unwrap();
        store.verify_schema().await.unwrap();
    }

    #[tokio::test]
    async fn test_file_store_persists() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("video_metadata.db");

        let store = MetadataStore::open_path(&path).await.unwrap();
        store.append("a.mp4", &Observation::frame(0, "00:00:00", "persisted")).await.unwrap();
        store.close().await;

        let reopened = MetadataStore::open_path(&path).await.unwrap();
        assert_eq!(reopened.search("PERSISTED").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_appends() {
        let store = MetadataStore::in_memory().await.unwrap();
        let tasks = (0..8u64).map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .append(&format!("v{}.mp4", i % 2), &Observation::frame(i * 15, "00:00:00", "tick"))
                    .await
            })
        });

        for outcome in futures::future::join_all(tasks).await {
            outcome.unwrap().unwrap();
        }
        assert_eq!(store.count().await.unwrap(), 8);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_reset_racing_appends_leaves_consistent_table() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::open_path(&dir.path().join("race.db")).await.unwrap();

        let appends = (0..64u64).map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .append("race.mp4", &Observation::frame(i, "00:00:01", format!("tick {}", i)))
                    .await
            })
        });
        let resets = (0..4).map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.reset().await })
        });

        let (appended, reset) = tokio::join!(
            futures::future::join_all(appends),
            futures::future::join_all(resets)
        );
        for outcome in appended.into_iter().chain(reset) {
            outcome.unwrap().unwrap();
        }

        store.verify_schema().await.unwrap();
        let survivors = store.records_for_video("race.mp4").await.unwrap();
        assert!(survivors.len() <= 64);
        assert_eq!(store.count().await.unwrap(), survivors.len() as u64);
        for record in &survivors {
            assert_eq!(record.timestamp, "00:00:01");
            assert!(record.transcription.is_none());
            assert_eq!(record.ocr_text, Some(format!("tick {}", record.frame_number.as_deref().unwrap())));
        }

        // Writes after the race land in the recreated table
        store.append("race.mp4", &Observation::speech(2.0, "after")).await.unwrap();
        assert_eq!(store.count().await.unwrap(), survivors.len() as u64 + 1);
    }
}
