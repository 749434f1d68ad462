//! Tag Probe: extract `(artist, title)` from one audio file via a bounded
//! external process.
//!
//! Shells out to a probe binary (`ffprobe` by default) the same way an
//! external fingerprinting binary would be invoked: missing binary,
//! non-zero exit, and garbage output are all soft failures, never a
//! propagated error. A hard wall-clock timeout and process-group kill are
//! layered on top since tag probing sits on the scanner's per-file hot
//! path and must never hang it.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::config::Config;

/// Result of probing one file: raw (unnormalized) artist/title, or `None`
/// for either tag that wasn't present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbedTags {
    pub artist: Option<String>,
    pub title: Option<String>,
}

/// Probe `path` for artist/title tags.
///
/// Never returns an error: timeout, non-zero exit, missing binary, or
/// unparseable output all collapse to `ProbedTags::default()` — a failed
/// probe is recorded as a null-tags row, never propagated.
pub async fn probe(path: &Path, config: &Config) -> ProbedTags {
    match run_with_timeout(path, config).await {
        Ok(tags) => tags,
        Err(_) => ProbedTags::default(),
    }
}

async fn run_with_timeout(path: &Path, config: &Config) -> Result<ProbedTags, String> {
    let mut child = Command::new(&config.ffprobe_path)
        .arg("-v")
        .arg("quiet")
        .arg("-print_format")
        .arg("json")
        .arg("-show_entries")
        .arg("format_tags=artist,title")
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("failed to spawn probe: {e}"))?;

    let mut stdout = child.stdout.take();

    let wait = tokio::time::timeout(config.ffprobe_timeout, child.wait()).await;

    let status = match wait {
        Ok(status) => status.map_err(|e| format!("probe wait failed: {e}"))?,
        Err(_) => {
            kill_with_grace(&mut child).await;
            return Err("probe timed out".to_string());
        }
    };

    if !status.success() {
        return Err(format!("probe exited with {status}"));
    }

    let mut buf = String::new();
    if let Some(stdout) = stdout.as_mut() {
        stdout
            .read_to_string(&mut buf)
            .await
            .map_err(|e| format!("failed to read probe output: {e}"))?;
    }

    parse_ffprobe_json(&buf).ok_or_else(|| "unparseable probe output".to_string())
}

/// Send SIGTERM, wait a 100ms grace period, then SIGKILL if the child is
/// still alive. Uses `nix::sys::signal::kill` on Unix and `Child::start_kill`
/// elsewhere.
async fn kill_with_grace(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }

    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }

    let grace = tokio::time::timeout(Duration::from_millis(100), child.wait()).await;
    if grace.is_err() {
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    #[serde(default)]
    tags: Option<FfprobeTags>,
}

#[derive(Debug, Deserialize, Default)]
struct FfprobeTags {
    #[serde(default, alias = "ARTIST")]
    artist: Option<String>,
    #[serde(default, alias = "TITLE")]
    title: Option<String>,
}

fn parse_ffprobe_json(raw: &str) -> Option<ProbedTags> {
    let parsed: FfprobeOutput = serde_json::from_str(raw).ok()?;
    let tags = parsed.format?.tags.unwrap_or_default();
    Some(ProbedTags {
        artist: tags.artist.filter(|s| !s.is_empty()),
        title: tags.title.filter(|s| !s.is_empty()),
    })
}
