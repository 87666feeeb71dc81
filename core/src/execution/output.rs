//! Captured command output: stream classification and task log files.
//!
//! `BannerRule` is the stderr heuristic: some simulation tools print their
//! routine progress and self-identification banner on standard error. When a
//! configured marker shows up in a command's captured stderr, that stream is
//! reclassified as informational and appended to stdout. This is a heuristic
//! keyed on tool output, not a protocol guarantee, and can be switched off.
//!
//! `TaskLog` appends each command's captured streams to the task's pair of
//! log files.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};


/// Marker printed by GROMACS on stderr at the start of every invocation.
pub const GROMACS_BANNER: &str = "GROMACS";


// ---------------------------------------------------------------------------
// BannerRule
// ---------------------------------------------------------------------------

/// Reclassifies stderr as stdout when it carries a known tool banner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BannerRule {
    /// Whether the rule applies at all.
    pub enabled: bool,
    /// Byte markers; any one of them triggers the merge.
    pub markers: Vec<String>,
}

impl BannerRule {
    /// Rule with the given markers, enabled.
    pub fn new(markers: Vec<String>) -> Self {
        BannerRule {
            enabled: true,
            markers,
        }
    }

    /// A rule that never merges.
    pub fn disabled() -> Self {
        BannerRule {
            enabled: false,
            markers: Vec::new(),
        }
    }

    /// Whether `stderr` should be treated as informational output.
    pub fn matches(&self, stderr: &[u8]) -> bool {
        self.enabled
            && self
                .markers
                .iter()
                .filter(|m| !m.is_empty())
                .any(|m| contains(stderr, m.as_bytes()))
    }

    /// Apply the rule to one command's captured streams. Returns `true` when
    /// stderr was folded into stdout (and cleared).
    pub fn apply(&self, stdout: &mut Vec<u8>, stderr: &mut Vec<u8>) -> bool {
        if !self.matches(stderr) {
            return false;
        }
        stdout.append(stderr);
        true
    }
}

impl Default for BannerRule {
    fn default() -> Self {
        BannerRule::new(vec![GROMACS_BANNER.to_string()])
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.len() <= haystack.len() && haystack.windows(needle.len()).any(|w| w == needle)
}


// ---------------------------------------------------------------------------
// TaskLog
// ---------------------------------------------------------------------------

/// The append-only stdout/stderr log pair of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskLog {
    stdout_path: PathBuf,
    stderr_path: PathBuf,
}

impl TaskLog {
    pub fn new(stdout_path: PathBuf, stderr_path: PathBuf) -> Self {
        TaskLog {
            stdout_path,
            stderr_path,
        }
    }

    pub fn stdout_path(&self) -> &Path {
        &self.stdout_path
    }

    pub fn stderr_path(&self) -> &Path {
        &self.stderr_path
    }

    /// Append one command's streams, one write per file. Existing content is
    /// never truncated.
    pub fn append(&self, stdout: &[u8], stderr: &[u8]) -> Result<()> {
        append_bytes(&self.stdout_path, stdout)?;
        append_bytes(&self.stderr_path, stderr)
    }
}

fn append_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file: File = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::io(path, e))?;
    file.write_all(bytes).map_err(|e| Error::io(path, e))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banner_in_stderr_is_merged() {
        let rule = BannerRule::default();
        let mut out = b"step 1\n".to_vec();
        let mut err = b"  :-) GROMACS - gmx grompp, 2023 (-:\n".to_vec();
        assert!(rule.apply(&mut out, &mut err));
        assert!(err.is_empty());
        assert!(String::from_utf8(out).unwrap().ends_with("(-:\n"));
    }

    #[test]
    fn plain_stderr_is_kept() {
        let rule = BannerRule::default();
        let mut out = Vec::new();
        let mut err = b"Fatal error: file not found\n".to_vec();
        assert!(!rule.apply(&mut out, &mut err));
        assert!(out.is_empty());
        assert_eq!(err, b"Fatal error: file not found\n");
    }

    #[test]
    fn disabled_rule_never_merges() {
        let rule = BannerRule::disabled();
        assert!(!rule.matches(b"GROMACS"));
        let off = BannerRule {
            enabled: false,
            markers: vec!["GROMACS".into()],
        };
        assert!(!off.matches(b"GROMACS"));
    }

    #[test]
    fn empty_marker_matches_nothing() {
        let rule = BannerRule::new(vec![String::new()]);
        assert!(!rule.matches(b"anything"));
    }

    #[test]
    fn marker_search_is_binary_safe() {
        let rule = BannerRule::new(vec!["LAMMPS".into()]);
        assert!(rule.matches(&[0xff, 0x00, b'L', b'A', b'M', b'M', b'P', b'S']));
        assert!(!rule.matches(&[0xff, 0x00]));
    }

    #[test]
    fn task_log_appends() {
        let dir = tempfile::tempdir().unwrap();
        let log = TaskLog::new(dir.path().join("t_stdout.txt"), dir.path().join("t_stderr.txt"));
        log.append(b"one\n", b"").unwrap();
        log.append(b"two\n", b"warn\n").unwrap();
        assert_eq!(std::fs::read(log.stdout_path()).unwrap(), b"one\ntwo\n");
        assert_eq!(std::fs::read(log.stderr_path()).unwrap(), b"warn\n");
    }
}
