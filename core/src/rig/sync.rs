//! File transfer between the local output tree and the remote scratch area.
//!
//! Transfers are rsync invocations. This module only builds the argument
//! vectors and interprets rsync's error stream; `RemoteShell::transfer` runs
//! the process. Transfers are incremental: rsync compares size and mtime, so
//! re-mirroring an unchanged tree moves no file data.

use serde::{Deserialize, Serialize};

use super::config::RemoteConfig;


/// Substrings rsync writes to stderr when a transfer fails.
pub const TRANSFER_ERROR_MARKERS: &[&str] = &["rsync:", "rsync error"];


// ---------------------------------------------------------------------------
// TransferDirection / TransferSpec
// ---------------------------------------------------------------------------

/// Whether a transfer pushes files to or pulls files from the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferDirection {
    /// Local -> Remote.
    Push,
    /// Remote -> Local.
    Pull,
}

/// One rsync transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSpec {
    pub direction: TransferDirection,
    /// Local sources (push) or the single local destination (pull).
    pub local_paths: Vec<String>,
    /// Remote destination (push) or source (pull).
    pub remote_path: String,
    /// Patterns passed as `--exclude`.
    pub excludes: Vec<String>,
    /// Copy the targets of symbolic links instead of the links.
    pub copy_links: bool,
}

impl TransferSpec {
    /// Push `sources` into the remote directory `remote_dir`.
    pub fn push(sources: Vec<String>, remote_dir: &str) -> Self {
        TransferSpec {
            direction: TransferDirection::Push,
            local_paths: sources,
            remote_path: remote_dir.to_string(),
            excludes: Vec::new(),
            copy_links: false,
        }
    }

    /// Pull the contents of `remote_dir` into `local_dir`.
    pub fn pull(remote_dir: &str, local_dir: &str) -> Self {
        TransferSpec {
            direction: TransferDirection::Pull,
            local_paths: vec![local_dir.to_string()],
            remote_path: remote_dir.to_string(),
            excludes: Vec::new(),
            copy_links: false,
        }
    }

    pub fn with_excludes(mut self, excludes: Vec<String>) -> Self {
        self.excludes = excludes;
        self
    }

    pub fn following_links(mut self) -> Self {
        self.copy_links = true;
        self
    }
}


// ---------------------------------------------------------------------------
// Argument building
// ---------------------------------------------------------------------------

/// Build the rsync argument vector for `spec`.
///
/// Pushes copy each source by name into the remote directory (no trailing
/// slash on sources, so directories arrive as `remote/<name>/`). Pulls copy
/// the remote directory's contents into the local directory.
pub fn build_rsync_args(spec: &TransferSpec, config: &RemoteConfig) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();

    // Recursive, keep mtimes for incremental re-runs, resume partial files.
    args.push("-rtz".to_string());
    args.push("--partial".to_string());
    if spec.copy_links {
        args.push("--copy-links".to_string());
    } else {
        args.push("--links".to_string());
    }

    args.push("-e".to_string());
    args.push(config.rsync_shell());

    for pattern in &spec.excludes {
        args.push("--exclude".to_string());
        args.push(pattern.clone());
    }

    match spec.direction {
        TransferDirection::Push => {
            for source in &spec.local_paths {
                args.push(source.trim_end_matches('/').to_string());
            }
            args.push(remote_spec(config, &ensure_trailing_slash(&spec.remote_path)));
        }
        TransferDirection::Pull => {
            args.push(remote_spec(config, &ensure_trailing_slash(&spec.remote_path)));
            if let Some(local) = spec.local_paths.first() {
                args.push(ensure_trailing_slash(local));
            }
        }
    }

    args
}

fn remote_spec(config: &RemoteConfig, path: &str) -> String {
    format!("{}:{}", config.user_at_host(), path)
}

/// Ensure a path ends with `/` (rsync convention for syncing directory contents).
fn ensure_trailing_slash(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}

/// The lines of `stderr` that report a transfer failure, if any.
pub fn find_transfer_error(stderr: &str) -> Option<String> {
    let lines: Vec<&str> = stderr
        .lines()
        .filter(|line| TRANSFER_ERROR_MARKERS.iter().any(|m| line.contains(m)))
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
