//! Configuration via environment variables.
//!
//! Every tunable is read from an `LS_*` environment variable with a
//! documented default. There is no config file — a per-song CLI invocation
//! has no sensible place to persist user edits, and the streaming host
//! already owns the environment these processes run in.
//!
//! Parsing never fails the process: an unparsable value logs a warning via
//! `tracing` and falls back to the default, the same graceful-degradation
//! posture the rest of this crate takes toward its environment.

use std::path::PathBuf;
use std::time::Duration;

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the music library (`LS_MUSIC_DIR`).
    pub music_dir: PathBuf,
    /// Store file path (`LS_DB`).
    pub db_path: PathBuf,
    /// Artist separation window, minutes (`LS_ARTIST_SEP_MIN`).
    pub artist_sep_min: i64,
    /// Title separation window, minutes (`LS_TITLE_SEP_MIN`).
    pub title_sep_min: i64,
    /// Per-file separation window, seconds; 0 disables (`LS_TRACK_SEP_SEC`).
    pub track_sep_sec: i64,
    /// Trigger a background rescan if the cache is older than this, seconds
    /// (`LS_RESCAN_SEC`).
    pub rescan_sec: i64,
    /// A scan lock older than this is considered abandoned, seconds
    /// (`LS_LOCK_STALE_SEC`).
    pub lock_stale_sec: i64,
    /// Cold-path subdirectory sample cap (`LS_TOP_N_DIRS`).
    pub top_n_dirs: usize,
    /// Cold-path files-per-directory cap (`LS_FILES_PER_DIR_TRY`).
    pub files_per_dir_try: usize,
    /// Tag probe wall-clock timeout (`LS_FFPROBE_TIMEOUT_S`).
    pub ffprobe_timeout: Duration,
    /// Audio file extensions considered by the scanner and cold-path dart
    /// (`LS_SCAN_EXTS`), lowercase, without the leading dot.
    pub scan_exts: Vec<String>,
    /// Whether empty/unknown artists share one separation bucket
    /// (`LS_UNKNOWN_ARTIST_BUCKET`).
    pub unknown_artist_bucket: bool,
    /// Max `History` rows retained (`LS_HISTORY_KEEP`).
    pub history_keep: i64,
    /// Max `PathPlay` rows retained (`LS_HISTORY_KEEP_PATHS`).
    pub history_keep_paths: i64,
    /// Picker's two-pass sample size. Not independently environment
    /// configurable; fixed at the documented default.
    pub sample_n: i64,
    /// Path to the external tag-probe binary. Not part of the documented
    /// `LS_*` contract, but needs *some* source of truth; defaults to
    /// `ffprobe` on `$PATH`, overridable via `LS_FFPROBE_PATH` for tests
    /// and non-standard installs.
    pub ffprobe_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            music_dir: PathBuf::from("/srv/music"),
            db_path: PathBuf::from("/var/lib/liquidsoap/liquidsoap.db"),
            artist_sep_min: 45,
            title_sep_min: 180,
            track_sep_sec: 0,
            rescan_sec: 86_400,
            lock_stale_sec: 3_600,
            top_n_dirs: 64,
            files_per_dir_try: 128,
            ffprobe_timeout: Duration::from_millis(800),
            scan_exts: default_scan_exts(),
            unknown_artist_bucket: true,
            history_keep: 10_000,
            history_keep_paths: 20_000,
            sample_n: 2_000,
            ffprobe_path: "ffprobe".to_string(),
        }
    }
}

fn default_scan_exts() -> Vec<String> {
    [".mp3", ".flac", ".m4a", ".ogg", ".wav", ".aac"]
        .iter()
        .map(|s| s.trim_start_matches('.').to_ascii_lowercase())
        .collect()
}

impl Config {
    /// Build configuration from the process environment, falling back to
    /// defaults field-by-field on missing or unparsable values.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            music_dir: env_path("LS_MUSIC_DIR", defaults.music_dir),
            db_path: env_path("LS_DB", defaults.db_path),
            artist_sep_min: env_parsed("LS_ARTIST_SEP_MIN", defaults.artist_sep_min),
            title_sep_min: env_parsed("LS_TITLE_SEP_MIN", defaults.title_sep_min),
            track_sep_sec: env_parsed("LS_TRACK_SEP_SEC", defaults.track_sep_sec),
            rescan_sec: env_parsed("LS_RESCAN_SEC", defaults.rescan_sec),
            lock_stale_sec: env_parsed("LS_LOCK_STALE_SEC", defaults.lock_stale_sec),
            top_n_dirs: env_parsed("LS_TOP_N_DIRS", defaults.top_n_dirs),
            files_per_dir_try: env_parsed("LS_FILES_PER_DIR_TRY", defaults.files_per_dir_try),
            ffprobe_timeout: env_duration_secs_f64(
                "LS_FFPROBE_TIMEOUT_S",
                defaults.ffprobe_timeout,
            ),
            scan_exts: env_exts("LS_SCAN_EXTS", defaults.scan_exts),
            unknown_artist_bucket: env_bool(
                "LS_UNKNOWN_ARTIST_BUCKET",
                defaults.unknown_artist_bucket,
            ),
            history_keep: env_parsed("LS_HISTORY_KEEP", defaults.history_keep),
            history_keep_paths: env_parsed("LS_HISTORY_KEEP_PATHS", defaults.history_keep_paths),
            sample_n: defaults.sample_n,
            ffprobe_path: std::env::var("LS_FFPROBE_PATH").unwrap_or(defaults.ffprobe_path),
        }
    }

    /// Whether `path`'s extension is in the configured scan set
    /// (case-insensitive).
    pub fn has_audio_extension(&self, path: &std::path::Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .is_some_and(|e| self.scan_exts.iter().any(|want| want == &e))
    }
}

fn env_path(name: &str, default: PathBuf) -> PathBuf {
    std::env::var(name).map(PathBuf::from).unwrap_or(default)
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("{name}={raw:?} is not valid, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_duration_secs_f64(name: &str, default: Duration) -> Duration {
    match std::env::var(name) {
        Ok(raw) => match raw.parse::<f64>() {
            Ok(secs) if secs >= 0.0 => Duration::from_secs_f64(secs),
            _ => {
                tracing::warn!("{name}={raw:?} is not a valid duration, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => {
            let raw = raw.trim();
            if raw.is_empty() {
                default
            } else {
                !matches!(raw, "0" | "false" | "False" | "FALSE" | "no" | "No")
            }
        }
        Err(_) => default,
    }
}

fn env_exts(name: &str, default: Vec<String>) -> Vec<String> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .split(',')
            .map(|s| s.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => default,
    }
}
