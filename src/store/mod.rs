//! Store: embedded, single-file, local persistence for the library and
//! play history.
//!
//! Built on `sqlx` + SQLite, generalized from a tracks/artists/albums
//! schema to the File / ArtistPlay / TitlePlay / PathPlay / History / Meta
//! relations this crate needs. WAL journaling lets the picker read
//! concurrently with an in-flight scanner write; a 2-second busy timeout
//! absorbs the brief writer contention that WAL still allows.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::error::{Error, Result};
use crate::model::FileRow;

/// Minimum busy timeout required of any open store.
const MIN_BUSY_TIMEOUT: Duration = Duration::from_secs(2);

/// Which per-key play table [`Store::last_play`] should consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayKind {
    Artist,
    Title,
    Path,
}

impl PlayKind {
    fn table(self) -> &'static str {
        match self {
            PlayKind::Artist => "artist_plays",
            PlayKind::Title => "title_plays",
            PlayKind::Path => "path_plays",
        }
    }

    fn key_column(self) -> &'static str {
        match self {
            PlayKind::Artist => "artist_key",
            PlayKind::Title => "title_key",
            PlayKind::Path => "path",
        }
    }
}

/// A candidate row returned by [`Store::sample_paths`]: the file path plus
/// its normalized artist/title keys, exactly what the picker's separation
/// predicates need without a second round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: String,
    pub normalized_artist: String,
    pub normalized_title: String,
}

/// Handle to an open store.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating and migrating if absent) the store at `path`.
    ///
    /// Enables WAL journaling and a busy timeout of at least 2s. Failure
    /// here is [`Error::StoreUnavailable`] — callers are expected to fall
    /// back to the filesystem cold path rather than treat this as fatal.
    pub async fn open(path: &Path) -> Result<Self> {
        let to_unavailable = |source: sqlx::Error| Error::StoreUnavailable {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| Error::StoreUnavailable {
                    path: path.to_path_buf(),
                    source: sqlx::Error::Io(e),
                })?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(to_unavailable)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(MIN_BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(to_unavailable)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| Error::StoreUnavailable {
                path: path.to_path_buf(),
                source: sqlx::Error::Migrate(Box::new(e)),
            })?;

        Ok(Self { pool })
    }

    /// Open an in-memory store, used by tests and by callers that only
    /// need the cold-path contract exercised without touching disk.
    #[cfg(test)]
    pub async fn open_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .expect("static memory URL always parses")
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(MIN_BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|source| Error::StoreUnavailable {
                path: PathBuf::from(":memory:"),
                source,
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| Error::StoreUnavailable {
                path: PathBuf::from(":memory:"),
                source: sqlx::Error::Migrate(Box::new(e)),
            })?;

        Ok(Self { pool })
    }

    /// Total number of `File` rows.
    pub async fn count_files(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM files")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::StoreBusy)?;
        Ok(row.try_get::<i64, _>("n").map_err(Error::Database)?)
    }

    /// Draw up to `n` random candidate rows without loading the table,
    /// via SQLite's builtin `RANDOM()`.
    pub async fn sample_paths(&self, n: i64) -> Result<Vec<Candidate>> {
        let rows = sqlx::query(
            "SELECT path, normalized_artist, normalized_title FROM files ORDER BY RANDOM() LIMIT ?",
        )
        .bind(n)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::StoreBusy)?;

        rows.into_iter()
            .map(|row| {
                Ok(Candidate {
                    path: row.try_get("path").map_err(Error::Database)?,
                    normalized_artist: row.try_get("normalized_artist").map_err(Error::Database)?,
                    normalized_title: row.try_get("normalized_title").map_err(Error::Database)?,
                })
            })
            .collect()
    }

    /// Most recent play timestamp for `key` under `kind`, or `None` if the
    /// key has never played.
    pub async fn last_play(&self, kind: PlayKind, key: &str) -> Result<Option<i64>> {
        let sql = format!(
            "SELECT last_play FROM {} WHERE {} = ?",
            kind.table(),
            kind.key_column()
        );
        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::StoreBusy)?;
        match row {
            Some(row) => Ok(Some(row.try_get("last_play").map_err(Error::Database)?)),
            None => Ok(None),
        }
    }

    /// Fetch `last_play` for every key in `keys` under `kind` in a single
    /// round trip, so the picker's two-pass scan over a sample of
    /// candidates never issues one query per candidate. Keys absent from
    /// the result have never played.
    pub async fn last_plays_batch(
        &self,
        kind: PlayKind,
        keys: &[String],
    ) -> Result<std::collections::HashMap<String, i64>> {
        let mut out = std::collections::HashMap::with_capacity(keys.len());
        if keys.is_empty() {
            return Ok(out);
        }

        let placeholders = keys.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!(
            "SELECT {0}, last_play FROM {1} WHERE {0} IN ({2})",
            kind.key_column(),
            kind.table(),
            placeholders
        );
        let mut query = sqlx::query(&sql);
        for key in keys {
            query = query.bind(key);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(Error::StoreBusy)?;

        for row in rows {
            let key: String = row
                .try_get(kind.key_column())
                .map_err(Error::Database)?;
            let last_play: i64 = row.try_get("last_play").map_err(Error::Database)?;
            out.insert(key, last_play);
        }
        Ok(out)
    }

    /// Upsert the three play tables and append a `History` row in one
    /// transaction, trimming both rings to their configured retention.
    pub async fn record_play(
        &self,
        path: &str,
        artist_norm: &str,
        title_norm: &str,
        artist_raw: Option<&str>,
        title_raw: Option<&str>,
        ts: i64,
        history_keep: i64,
        history_keep_paths: i64,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::StoreBusy)?;

        sqlx::query(
            "INSERT INTO artist_plays (artist_key, last_play) VALUES (?, ?)
             ON CONFLICT(artist_key) DO UPDATE SET last_play = excluded.last_play",
        )
        .bind(artist_norm)
        .bind(ts)
        .execute(&mut *tx)
        .await
        .map_err(Error::StoreBusy)?;

        sqlx::query(
            "INSERT INTO title_plays (title_key, last_play) VALUES (?, ?)
             ON CONFLICT(title_key) DO UPDATE SET last_play = excluded.last_play",
        )
        .bind(title_norm)
        .bind(ts)
        .execute(&mut *tx)
        .await
        .map_err(Error::StoreBusy)?;

        sqlx::query(
            "INSERT INTO path_plays (path, last_play) VALUES (?, ?)
             ON CONFLICT(path) DO UPDATE SET last_play = excluded.last_play",
        )
        .bind(path)
        .bind(ts)
        .execute(&mut *tx)
        .await
        .map_err(Error::StoreBusy)?;

        sqlx::query("INSERT INTO history (ts, path, artist_raw, title_raw) VALUES (?, ?, ?, ?)")
            .bind(ts)
            .bind(path)
            .bind(artist_raw)
            .bind(title_raw)
            .execute(&mut *tx)
            .await
            .map_err(Error::StoreBusy)?;

        if history_keep > 0 {
            sqlx::query(
                "DELETE FROM history WHERE id NOT IN (
                    SELECT id FROM history ORDER BY ts DESC LIMIT ?
                )",
            )
            .bind(history_keep)
            .execute(&mut *tx)
            .await
            .map_err(Error::StoreBusy)?;
        }

        if history_keep_paths > 0 {
            sqlx::query(
                "DELETE FROM path_plays WHERE path NOT IN (
                    SELECT path FROM path_plays ORDER BY last_play DESC LIMIT ?
                )",
            )
            .bind(history_keep_paths)
            .execute(&mut *tx)
            .await
            .map_err(Error::StoreBusy)?;
        }

        tx.commit().await.map_err(Error::StoreBusy)?;
        Ok(())
    }

    /// Insert or update one `File` row.
    pub async fn upsert_file(&self, row: &FileRow) -> Result<()> {
        sqlx::query(
            "INSERT INTO files (
                path, artist, title, normalized_artist, normalized_title,
                content_type, last_scanned
             ) VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(path) DO UPDATE SET
                artist = excluded.artist,
                title = excluded.title,
                normalized_artist = excluded.normalized_artist,
                normalized_title = excluded.normalized_title,
                content_type = excluded.content_type,
                last_scanned = excluded.last_scanned",
        )
        .bind(&row.path)
        .bind(&row.artist)
        .bind(&row.title)
        .bind(&row.normalized_artist)
        .bind(&row.normalized_title)
        .bind(&row.content_type)
        .bind(row.last_scanned)
        .execute(&self.pool)
        .await
        .map_err(Error::StoreBusy)?;
        Ok(())
    }

    /// Look up a single `File` row by path.
    pub async fn get_file(&self, path: &str) -> Result<Option<FileRow>> {
        sqlx::query_as::<_, FileRow>(
            "SELECT path, artist, title, normalized_artist, normalized_title, content_type, last_scanned
             FROM files WHERE path = ?",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::StoreBusy)
    }

    /// Delete any `File` row whose `last_scanned` predates `since_ts` —
    /// i.e. it was not observed during the pass that started at
    /// `since_ts`. Returns the number of rows removed.
    pub async fn delete_missing(&self, since_ts: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM files WHERE last_scanned < ?")
            .bind(since_ts)
            .execute(&self.pool)
            .await
            .map_err(Error::StoreBusy)?;
        Ok(result.rows_affected())
    }

    /// Set a `Meta` key/value pair.
    pub async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO meta (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(Error::StoreBusy)?;
        Ok(())
    }

    /// Get a `Meta` value, if set.
    pub async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::StoreBusy)?;
        match row {
            Some(row) => Ok(Some(row.try_get("value").map_err(Error::Database)?)),
            None => Ok(None),
        }
    }

    /// Compact storage.
    pub async fn vacuum(&self) -> Result<()> {
        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .map_err(Error::StoreBusy)?;
        Ok(())
    }

    /// Attempt to acquire the scan lock via atomic compare-and-set on
    /// `Meta.scan_lock`. `BEGIN IMMEDIATE` takes the write lock before the
    /// read, so two concurrent acquirers cannot both observe a stale lock
    /// and both "win" — the second serializes behind the first and
    /// re-reads the now-fresh value.
    pub async fn acquire_scan_lock(&self, pid: u32, now: i64, lock_stale_sec: i64) -> Result<bool> {
        let mut conn = self.pool.acquire().await.map_err(Error::StoreBusy)?;

        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(Error::StoreBusy)?;

        let existing = sqlx::query("SELECT value FROM meta WHERE key = 'scan_lock'")
            .fetch_optional(&mut *conn)
            .await
            .map_err(Error::StoreBusy)?;

        let held_since = existing
            .as_ref()
            .and_then(|row| row.try_get::<String, _>("value").ok())
            .and_then(|v| parse_lock(&v));

        let stale = match held_since {
            Some((_pid, ts)) => now.saturating_sub(ts) > lock_stale_sec,
            None => true,
        };

        if !stale {
            sqlx::query("ROLLBACK")
                .execute(&mut *conn)
                .await
                .map_err(Error::StoreBusy)?;
            return Ok(false);
        }

        let value = format!("{pid}:{now}");
        sqlx::query(
            "INSERT INTO meta (key, value) VALUES ('scan_lock', ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(&value)
        .execute(&mut *conn)
        .await
        .map_err(Error::StoreBusy)?;

        sqlx::query("COMMIT")
            .execute(&mut *conn)
            .await
            .map_err(Error::StoreBusy)?;

        Ok(true)
    }

    /// Release the scan lock unconditionally. Called by the lock holder
    /// once a scan completes or aborts cleanly.
    pub async fn release_scan_lock(&self) -> Result<()> {
        sqlx::query("DELETE FROM meta WHERE key = 'scan_lock'")
            .execute(&self.pool)
            .await
            .map_err(Error::StoreBusy)?;
        Ok(())
    }
}

fn parse_lock(value: &str) -> Option<(u32, i64)> {
    let (pid, ts) = value.split_once(':')?;
    Some((pid.parse().ok()?, ts.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(path: &str, artist: &str, title: &str, ts: i64) -> FileRow {
        FileRow::new(
            path.to_string(),
            Some(artist.to_string()),
            Some(title.to_string()),
            "mp3",
            ts,
            true,
        )
    }

    #[tokio::test]
    async fn open_creates_and_migrates() {
        let store = Store::open_memory().await.unwrap();
        assert_eq!(store.count_files().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn upsert_and_sample() {
        let store = Store::open_memory().await.unwrap();
        store
            .upsert_file(&row("/m/a.mp3", "The Beatles", "Yesterday", 1))
            .await
            .unwrap();
        store
            .upsert_file(&row("/m/b.mp3", "Daft Punk", "One More Time", 1))
            .await
            .unwrap();

        assert_eq!(store.count_files().await.unwrap(), 2);

        let sample = store.sample_paths(10).await.unwrap();
        assert_eq!(sample.len(), 2);
        let paths: Vec<_> = sample.iter().map(|c| c.path.clone()).collect();
        assert!(paths.contains(&"/m/a.mp3".to_string()));
        assert!(paths.contains(&"/m/b.mp3".to_string()));
    }

    #[tokio::test]
    async fn sample_paths_caps_at_n() {
        let store = Store::open_memory().await.unwrap();
        for i in 0..5 {
            store
                .upsert_file(&row(&format!("/m/{i}.mp3"), "Artist", "Title", 1))
                .await
                .unwrap();
        }
        let sample = store.sample_paths(2).await.unwrap();
        assert_eq!(sample.len(), 2);
    }

    #[tokio::test]
    async fn record_play_updates_all_three_tables_and_history() {
        let store = Store::open_memory().await.unwrap();
        store
            .record_play("/m/a.mp3", "beatles", "yesterday", Some("The Beatles"), Some("Yesterday"), 1000, 10_000, 20_000)
            .await
            .unwrap();

        assert_eq!(
            store.last_play(PlayKind::Artist, "beatles").await.unwrap(),
            Some(1000)
        );
        assert_eq!(
            store.last_play(PlayKind::Title, "yesterday").await.unwrap(),
            Some(1000)
        );
        assert_eq!(
            store.last_play(PlayKind::Path, "/m/a.mp3").await.unwrap(),
            Some(1000)
        );
    }

    #[tokio::test]
    async fn last_plays_batch_returns_only_known_keys() {
        let store = Store::open_memory().await.unwrap();
        store
            .record_play("/m/a.mp3", "beatles", "yesterday", None, None, 1000, 10_000, 20_000)
            .await
            .unwrap();

        let keys = vec!["beatles".to_string(), "unknown-artist-xyz".to_string()];
        let batch = store.last_plays_batch(PlayKind::Artist, &keys).await.unwrap();
        assert_eq!(batch.get("beatles"), Some(&1000));
        assert_eq!(batch.get("unknown-artist-xyz"), None);
    }

    #[tokio::test]
    async fn last_plays_batch_empty_keys_is_empty() {
        let store = Store::open_memory().await.unwrap();
        let batch = store.last_plays_batch(PlayKind::Artist, &[]).await.unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn record_play_is_monotonic_for_later_calls() {
        let store = Store::open_memory().await.unwrap();
        store
            .record_play("/m/a.mp3", "x", "y", None, None, 100, 10_000, 20_000)
            .await
            .unwrap();
        store
            .record_play("/m/a.mp3", "x", "y", None, None, 200, 10_000, 20_000)
            .await
            .unwrap();
        assert_eq!(
            store.last_play(PlayKind::Path, "/m/a.mp3").await.unwrap(),
            Some(200)
        );
    }

    #[tokio::test]
    async fn history_trims_to_keep_limit() {
        let store = Store::open_memory().await.unwrap();
        for i in 0..5 {
            store
                .record_play("/m/a.mp3", "x", "y", None, None, i, 3, 20_000)
                .await
                .unwrap();
        }
        let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM history")
            .fetch_one(&store.pool)
            .await
            .unwrap()
            .try_get("n")
            .unwrap();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn delete_missing_removes_stale_rows() {
        let store = Store::open_memory().await.unwrap();
        store.upsert_file(&row("/m/old.mp3", "A", "B", 1)).await.unwrap();
        store.upsert_file(&row("/m/new.mp3", "A", "B", 5)).await.unwrap();

        let removed = store.delete_missing(5).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_file("/m/old.mp3").await.unwrap().is_none());
        assert!(store.get_file("/m/new.mp3").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn meta_roundtrip() {
        let store = Store::open_memory().await.unwrap();
        assert_eq!(store.get_meta("last_full_scan").await.unwrap(), None);
        store.set_meta("last_full_scan", "12345").await.unwrap();
        assert_eq!(
            store.get_meta("last_full_scan").await.unwrap(),
            Some("12345".to_string())
        );
    }

    #[tokio::test]
    async fn scan_lock_acquire_blocks_second_holder() {
        let store = Store::open_memory().await.unwrap();
        assert!(store.acquire_scan_lock(1, 1000, 3600).await.unwrap());
        assert!(!store.acquire_scan_lock(2, 1001, 3600).await.unwrap());
    }

    #[tokio::test]
    async fn scan_lock_reclaimed_when_stale() {
        let store = Store::open_memory().await.unwrap();
        assert!(store.acquire_scan_lock(1, 1000, 3600).await.unwrap());
        // Far enough past lock_stale_sec.
        assert!(store.acquire_scan_lock(2, 1000 + 4000, 3600).await.unwrap());
    }

    #[tokio::test]
    async fn scan_lock_release_allows_immediate_reacquire() {
        let store = Store::open_memory().await.unwrap();
        assert!(store.acquire_scan_lock(1, 1000, 3600).await.unwrap());
        store.release_scan_lock().await.unwrap();
        assert!(store.acquire_scan_lock(2, 1001, 3600).await.unwrap());
    }
}
