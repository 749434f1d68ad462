//! Scanner: bring the `File` table into approximate agreement with the
//! on-disk music root.
//!
//! Directory traversal reuses `walkdir`, generalized from a fixed
//! five-extension match to [`Config::scan_exts`] and folded into a
//! synchronous lock/probe/upsert/delete-missing pass rather than left as a
//! bare path stream.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{content_type_for_extension, FileRow};
use crate::probe;
use crate::store::Store;

/// Outcome of a scan attempt, distinguishing "ran to completion" from
/// "another scanner already held the lock" — `rebuild-cache` needs this
/// to pick its exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Completed { scanned: usize, removed: u64 },
    LockHeld,
}

/// Run one full scan synchronously to completion.
///
/// Used directly by `rebuild-cache` (no detachment) and by the
/// `internal-rescan` hidden subcommand that a detached `pick-next`
/// re-invocation targets.
pub async fn full_scan(store: &Store, config: &Config) -> Result<ScanOutcome> {
    let start_ts = now();
    let pid = std::process::id();

    if !store
        .acquire_scan_lock(pid, start_ts, config.lock_stale_sec)
        .await?
    {
        tracing::info!("scan lock held by another process, aborting");
        return Ok(ScanOutcome::LockHeld);
    }

    let outcome = run_scan(store, config, start_ts).await;

    // Always release, even on error, so a failed scan doesn't wedge future
    // ones for a full lock_stale_sec window.
    if let Err(e) = store.release_scan_lock().await {
        tracing::warn!("failed to release scan lock: {e}");
    }

    outcome
}

async fn run_scan(store: &Store, config: &Config, start_ts: i64) -> Result<ScanOutcome> {
    let mut scanned = 0usize;

    for entry in WalkDir::new(&config.music_dir)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !config.has_audio_extension(path) {
            continue;
        }
        let Some(path_str) = path.to_str() else {
            continue;
        };

        let existing = match store.get_file(path_str).await {
            Ok(existing) => existing,
            Err(e) if e.is_transient() => {
                tracing::warn!("store busy checking {path_str}, treating as needs-probe: {e}");
                None
            }
            Err(e) => return Err(e),
        };
        let needs_probe = match &existing {
            Some(existing) => mtime_newer_than(path, existing.last_scanned),
            None => true,
        };

        let row = if needs_probe {
            let tags = probe::probe(path, config).await;
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or_default();
            FileRow::new(
                path_str,
                tags.artist,
                tags.title,
                content_type_for_extension(ext),
                start_ts,
                config.unknown_artist_bucket,
            )
        } else {
            // Unchanged: keep the already-fetched tags, just mark as
            // observed this pass by bumping last_scanned. `existing` is
            // `Some` here since `needs_probe` is only false when the first
            // lookup found a row.
            let existing = existing.expect("needs_probe false implies existing is Some");
            FileRow {
                last_scanned: start_ts,
                ..existing
            }
        };

        if let Err(e) = store.upsert_file(&row).await {
            if e.is_transient() {
                tracing::warn!("skipping upsert for {path_str}, store busy: {e}");
                continue;
            }
            return Err(e);
        }
        scanned += 1;
    }

    let removed = store.delete_missing(start_ts).await?;
    store
        .set_meta("last_full_scan", &start_ts.to_string())
        .await?;

    Ok(ScanOutcome::Completed { scanned, removed })
}

fn mtime_newer_than(path: &Path, last_scanned: i64) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return true;
    };
    let Ok(modified) = meta.modified() else {
        return true;
    };
    let modified_secs = modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    modified_secs > last_scanned
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    fn test_config(music_dir: &Path) -> Config {
        Config {
            music_dir: music_dir.to_path_buf(),
            ffprobe_path: "this-binary-does-not-exist-xyz".to_string(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn scans_matching_extensions_only() {
        let dir = tempdir().unwrap();
        File::create(dir.path().join("a.mp3")).unwrap();
        File::create(dir.path().join("b.txt")).unwrap();
        File::create(dir.path().join("c.FLAC")).unwrap();

        let store = Store::open_memory().await.unwrap();
        let config = test_config(dir.path());

        let outcome = full_scan(&store, &config).await.unwrap();
        assert_eq!(
            outcome,
            ScanOutcome::Completed {
                scanned: 2,
                removed: 0
            }
        );
        assert_eq!(store.count_files().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn second_scan_with_held_lock_reports_lock_held() {
        let dir = tempdir().unwrap();
        let store = Store::open_memory().await.unwrap();
        let config = test_config(dir.path());

        assert!(
            store
                .acquire_scan_lock(999, now(), config.lock_stale_sec)
                .await
                .unwrap()
        );
        let outcome = full_scan(&store, &config).await.unwrap();
        assert_eq!(outcome, ScanOutcome::LockHeld);
    }

    #[tokio::test]
    async fn rescan_removes_deleted_files() {
        let dir = tempdir().unwrap();
        let keep = dir.path().join("keep.mp3");
        let remove = dir.path().join("remove.mp3");
        File::create(&keep).unwrap();
        File::create(&remove).unwrap();

        let store = Store::open_memory().await.unwrap();
        let config = test_config(dir.path());
        full_scan(&store, &config).await.unwrap();
        assert_eq!(store.count_files().await.unwrap(), 2);

        std::fs::remove_file(&remove).unwrap();
        // Ensure the second scan's start_ts strictly exceeds the first's
        // last_scanned so delete_missing has something to bite on.
        std::thread::sleep(std::time::Duration::from_millis(1100));

        let outcome = full_scan(&store, &config).await.unwrap();
        match outcome {
            ScanOutcome::Completed { removed, .. } => assert_eq!(removed, 1),
            other => panic!("expected Completed, got {other:?}"),
        }
        assert_eq!(store.count_files().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rescanning_unchanged_library_is_idempotent_modulo_last_scanned() {
        let dir = tempdir().unwrap();
        File::create(dir.path().join("a.mp3")).unwrap();

        let store = Store::open_memory().await.unwrap();
        let config = test_config(dir.path());

        full_scan(&store, &config).await.unwrap();
        let first = store
            .get_file(dir.path().join("a.mp3").to_str().unwrap())
            .await
            .unwrap()
            .unwrap();

        full_scan(&store, &config).await.unwrap();
        let second = store
            .get_file(dir.path().join("a.mp3").to_str().unwrap())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first.path, second.path);
        assert_eq!(first.artist, second.artist);
        assert_eq!(first.title, second.title);
        assert_eq!(first.normalized_artist, second.normalized_artist);
        assert_eq!(first.normalized_title, second.normalized_title);
        assert_eq!(first.content_type, second.content_type);
    }
}
