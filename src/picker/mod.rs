//! Picker: choose one eligible file per call, preferring a candidate that
//! satisfies every separation window and falling back to the one whose
//! most recent offending play is furthest in the past.
//!
//! The two-pass shape and the batched-round-trip discipline are this
//! module's own; everything below it (`Store::sample_paths`,
//! `Store::last_plays_batch`, `Store::record_play`) is the same persistence
//! layer the scanner writes through.

use std::collections::HashMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::seq::SliceRandom;
use rand::Rng;

use crate::config::Config;
use crate::detach;
use crate::model::{normalize, normalize_artist};
use crate::store::{Candidate, PlayKind, Store};

/// Run the picker algorithm, falling back to the filesystem-only cold path
/// when no store is available at all (`StoreUnavailable` at open time).
///
/// Never returns an error: every store failure along the way is logged and
/// treated as a reason to fall back, never a reason to fail the call.
pub async fn pick_next(store: Option<&Store>, config: &Config) -> String {
    match store {
        Some(store) => pick_next_with_store(store, config).await,
        None => cold_dart(config, None, now_ts()).await,
    }
}

async fn pick_next_with_store(store: &Store, config: &Config) -> String {
    let now = now_ts();

    match store.count_files().await {
        Ok(0) => {
            detach::spawn_detached_rescan();
            return cold_dart(config, Some(store), now).await;
        }
        Ok(_) => {
            maybe_trigger_rescan(store, config, now).await;
        }
        Err(e) => {
            tracing::warn!("count_files failed, falling back to cold path: {e}");
            return cold_dart(config, None, now).await;
        }
    }

    let candidates = match store.sample_paths(config.sample_n).await {
        Ok(rows) if !rows.is_empty() => rows,
        Ok(_) => return cold_dart(config, Some(store), now).await,
        Err(e) => {
            tracing::warn!("sample_paths failed, falling back to cold path: {e}");
            return cold_dart(config, Some(store), now).await;
        }
    };

    let (artist_plays, title_plays, path_plays) = match fetch_play_state(store, config, &candidates).await
    {
        Ok(state) => state,
        Err(e) => {
            tracing::warn!("last_plays_batch failed, falling back to cold path: {e}");
            return cold_dart(config, Some(store), now).await;
        }
    };

    let scored: Vec<Scored> = candidates
        .iter()
        .map(|c| score(c, config, now, &artist_plays, &title_plays, &path_plays))
        .collect();

    let chosen = scored
        .iter()
        .find(|s| s.artist_ok && s.title_ok && s.path_ok)
        .or_else(|| least_violating(&scored));

    match chosen {
        Some(s) => {
            record_provisional(store, config, s, now).await;
            s.candidate.path.clone()
        }
        None => cold_dart(config, Some(store), now).await,
    }
}

/// Trigger a detached rescan when the cache is empty or older than
/// `rescan_sec`. Never blocks the calling invocation.
async fn maybe_trigger_rescan(store: &Store, config: &Config, now: i64) {
    let last_full_scan = store
        .get_meta("last_full_scan")
        .await
        .ok()
        .flatten()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(0);

    if now - last_full_scan > config.rescan_sec {
        detach::spawn_detached_rescan();
    }
}

async fn fetch_play_state(
    store: &Store,
    config: &Config,
    candidates: &[Candidate],
) -> crate::error::Result<(HashMap<String, i64>, HashMap<String, i64>, HashMap<String, i64>)> {
    let artist_keys: Vec<String> = candidates
        .iter()
        .map(|c| c.normalized_artist.clone())
        .collect();
    let title_keys: Vec<String> = candidates
        .iter()
        .map(|c| c.normalized_title.clone())
        .collect();

    let artist_plays = store.last_plays_batch(PlayKind::Artist, &artist_keys).await?;
    let title_plays = store.last_plays_batch(PlayKind::Title, &title_keys).await?;

    let path_plays = if config.track_sep_sec > 0 {
        let path_keys: Vec<String> = candidates.iter().map(|c| c.path.clone()).collect();
        store.last_plays_batch(PlayKind::Path, &path_keys).await?
    } else {
        HashMap::new()
    };

    Ok((artist_plays, title_plays, path_plays))
}

struct Scored<'a> {
    candidate: &'a Candidate,
    artist_ok: bool,
    title_ok: bool,
    path_ok: bool,
    artist_last: i64,
    title_last: i64,
    path_last: i64,
}

fn score<'a>(
    candidate: &'a Candidate,
    config: &Config,
    now: i64,
    artist_plays: &HashMap<String, i64>,
    title_plays: &HashMap<String, i64>,
    path_plays: &HashMap<String, i64>,
) -> Scored<'a> {
    let artist_last = artist_plays
        .get(&candidate.normalized_artist)
        .copied()
        .unwrap_or(0);
    let title_last = title_plays
        .get(&candidate.normalized_title)
        .copied()
        .unwrap_or(0);
    let path_last = path_plays.get(&candidate.path).copied().unwrap_or(0);

    // An empty normalized artist only arises when `unknown_artist_bucket`
    // is disabled and the raw artist was blank. Per the resolved open
    // question (DESIGN.md), that reads as "no artist constraint" rather
    // than "every blank-artist file shares one separation window" — an
    // empty key never enforces separation against another empty key.
    let artist_ok = candidate.normalized_artist.is_empty()
        || !artist_plays.contains_key(&candidate.normalized_artist)
        || now - artist_last > config.artist_sep_min * 60;
    let title_ok = !title_plays.contains_key(&candidate.normalized_title)
        || now - title_last > config.title_sep_min * 60;
    let path_ok = config.track_sep_sec == 0
        || !path_plays.contains_key(&candidate.path)
        || now - path_last > config.track_sep_sec;

    Scored {
        candidate,
        artist_ok,
        title_ok,
        path_ok,
        artist_last,
        title_last,
        path_last,
    }
}

/// Among candidates that failed the strict pass, pick the one whose
/// most-recent *violated* constraint is furthest in the past, breaking
/// ties by lexicographically-smallest path.
fn least_violating<'a, 'b>(scored: &'b [Scored<'a>]) -> Option<&'b Scored<'a>> {
    scored.iter().min_by(|a, b| {
        violation_score(a)
            .cmp(&violation_score(b))
            .then_with(|| a.candidate.path.cmp(&b.candidate.path))
    })
}

/// The candidate's violation score: the most recent (largest) timestamp
/// among the separation constraints it actually violates. Lower is better
/// — it means even the worst-offending constraint is old.
fn violation_score(s: &Scored) -> i64 {
    let mut worst = 0i64;
    if !s.artist_ok {
        worst = worst.max(s.artist_last);
    }
    if !s.title_ok {
        worst = worst.max(s.title_last);
    }
    if !s.path_ok {
        worst = worst.max(s.path_last);
    }
    worst
}

async fn record_provisional(store: &Store, config: &Config, s: &Scored<'_>, now: i64) {
    if let Err(e) = store
        .record_play(
            &s.candidate.path,
            &s.candidate.normalized_artist,
            &s.candidate.normalized_title,
            None,
            None,
            now,
            config.history_keep,
            config.history_keep_paths,
        )
        .await
    {
        tracing::warn!("failed to record provisional play for {}: {e}", s.candidate.path);
    }
}

/// Cold-path quick random dart: sample subdirectories of the music root
/// (the root itself counts as one), list entries without recursing, and
/// choose one audio file uniformly. Used when the Store has no rows yet or
/// has become unreachable.
async fn cold_dart(config: &Config, store: Option<&Store>, now: i64) -> String {
    let Some(path) = quick_random_dart(config) else {
        return String::new();
    };
    let path_str = path.display().to_string();

    if let Some(store) = store {
        let artist_norm = normalize_artist("", config.unknown_artist_bucket);
        let title_norm = normalize("");
        if let Err(e) = store
            .record_play(
                &path_str,
                &artist_norm,
                &title_norm,
                None,
                None,
                now,
                config.history_keep,
                config.history_keep_paths,
            )
            .await
        {
            tracing::warn!("failed to record provisional cold-path play: {e}");
        }
    }

    path_str
}

fn quick_random_dart(config: &Config) -> Option<std::path::PathBuf> {
    let mut rng = rand::rng();

    let mut dirs = vec![config.music_dir.clone()];
    if let Ok(entries) = std::fs::read_dir(&config.music_dir) {
        for entry in entries.flatten() {
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                dirs.push(entry.path());
            }
        }
    }
    dirs.shuffle(&mut rng);
    dirs.truncate(config.top_n_dirs.max(1));

    let mut candidates = Vec::new();
    for dir in &dirs {
        let Ok(entries) = std::fs::read_dir(dir) else {
            continue;
        };
        for entry in entries.flatten().take(config.files_per_dir_try) {
            let path = entry.path();
            if path.is_file() && config.has_audio_extension(&path) {
                candidates.push(path);
            }
        }
    }

    if candidates.is_empty() {
        None
    } else {
        let idx = rng.random_range(0..candidates.len());
        Some(candidates.swap_remove(idx))
    }
}

fn now_ts() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
