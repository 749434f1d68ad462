//! Detached background rescan.
//!
//! A real double-fork has no portable story in this stack, so detachment
//! is expressed the way the fallback the corpus actually reaches for
//! works: re-exec the current binary against a hidden subcommand with all
//! three stdio streams closed, then drop the `Child` handle without
//! waiting on it. The OS reparents the orphan; this process returns
//! immediately either way.

use std::process::Stdio;

/// Spawn `internal-rescan` as a fully detached child and forget about it.
/// Best-effort: a spawn failure is logged, never propagated, since a
/// missed background rescan just means the next `pick-next` call retries.
pub fn spawn_detached_rescan() {
    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => {
            tracing::warn!("cannot locate current executable to spawn rescan: {e}");
            return;
        }
    };

    let spawned = std::process::Command::new(exe)
        .arg("internal-rescan")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();

    match spawned {
        Ok(child) => {
            tracing::debug!("spawned detached rescan, pid {}", child.id());
            // Deliberately not waited on: the point is to not block.
            drop(child);
        }
        Err(e) => tracing::warn!("failed to spawn detached rescan: {e}"),
    }
}
