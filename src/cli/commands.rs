//! CLI command definitions and dispatch.

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::model::{normalize, normalize_artist};
use crate::scanner::{self, ScanOutcome};
use crate::store::Store;

/// Track selector service: picks the next file for an audio streaming host.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ensure the store exists and migrations are applied.
    Init,
    /// Run a full library scan synchronously, in this process.
    RebuildCache,
    /// Choose the next track and print its path to stdout.
    PickNext,
    /// Record that a track actually started airing.
    TrackStart {
        #[arg(long)]
        artist: Option<String>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        path: Option<String>,
    },
    /// Compact the store file.
    Vacuum,
    /// Run a full scan, detached from a triggering `pick-next`. Not part
    /// of the documented interface; only ever reached via re-exec.
    #[command(hide = true, name = "internal-rescan")]
    InternalRescan,
}

const EXIT_OK: i32 = 0;
const EXIT_STARTUP_ERROR: i32 = 1;
const EXIT_LOCK_CONTENTION: i32 = 2;

/// Dispatch a parsed command, returning the process exit code.
pub async fn run_command(command: Commands) -> i32 {
    let config = Config::from_env();

    match command {
        Commands::Init => cmd_init(&config).await,
        Commands::RebuildCache => cmd_rebuild_cache(&config).await,
        Commands::PickNext => cmd_pick_next(&config).await,
        Commands::TrackStart {
            artist,
            title,
            path,
        } => cmd_track_start(&config, artist, title, path).await,
        Commands::Vacuum => cmd_vacuum(&config).await,
        Commands::InternalRescan => cmd_rebuild_cache(&config).await,
    }
}

async fn cmd_init(config: &Config) -> i32 {
    match Store::open(&config.db_path).await {
        Ok(_) => EXIT_OK,
        Err(e) => {
            tracing::error!("init failed: {e}");
            EXIT_STARTUP_ERROR
        }
    }
}

async fn cmd_rebuild_cache(config: &Config) -> i32 {
    let store = match Store::open(&config.db_path).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("rebuild-cache: store unavailable: {e}");
            return EXIT_STARTUP_ERROR;
        }
    };

    match scanner::full_scan(&store, config).await {
        Ok(ScanOutcome::Completed { scanned, removed }) => {
            tracing::info!("rebuild-cache: scanned {scanned} files, removed {removed} stale rows");
            EXIT_OK
        }
        Ok(ScanOutcome::LockHeld) => {
            tracing::warn!("rebuild-cache: scan lock held by another process");
            EXIT_LOCK_CONTENTION
        }
        Err(e) => {
            tracing::error!("rebuild-cache failed: {e}");
            EXIT_STARTUP_ERROR
        }
    }
}

/// `pick-next` always exits 0; every failure path downgrades to a silent
/// empty line rather than a non-zero exit.
async fn cmd_pick_next(config: &Config) -> i32 {
    let store = Store::open(&config.db_path).await.ok();
    let path = crate::picker::pick_next(store.as_ref(), config).await;
    println!("{path}");
    EXIT_OK
}

/// Silent no-op on an empty path, per the contract. Otherwise overwrites
/// the provisional play recorded at pick time with the on-air moment.
async fn cmd_track_start(
    config: &Config,
    artist: Option<String>,
    title: Option<String>,
    path: Option<String>,
) -> i32 {
    let Some(path) = path.filter(|p| !p.is_empty()) else {
        return EXIT_OK;
    };

    let Ok(store) = Store::open(&config.db_path).await else {
        return EXIT_OK;
    };

    let artist_raw = artist.unwrap_or_default();
    let title_raw = title.unwrap_or_default();
    let artist_norm = normalize_artist(&artist_raw, config.unknown_artist_bucket);
    let title_norm = normalize(&title_raw);
    let now = now_ts();

    if let Err(e) = store
        .record_play(
            &path,
            &artist_norm,
            &title_norm,
            Some(artist_raw.as_str()).filter(|s| !s.is_empty()),
            Some(title_raw.as_str()).filter(|s| !s.is_empty()),
            now,
            config.history_keep,
            config.history_keep_paths,
        )
        .await
    {
        tracing::warn!("track-start: failed to record play for {path}: {e}");
    }

    EXIT_OK
}

async fn cmd_vacuum(config: &Config) -> i32 {
    match Store::open(&config.db_path).await {
        Ok(store) => match store.vacuum().await {
            Ok(()) => EXIT_OK,
            Err(e) => {
                tracing::error!("vacuum failed: {e}");
                EXIT_STARTUP_ERROR
            }
        },
        Err(e) => {
            tracing::error!("vacuum: store unavailable: {e}");
            EXIT_STARTUP_ERROR
        }
    }
}

fn now_ts() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
