//! Batch scheduler text formats.
//!
//! Renders submission descriptors and parses what the scheduler prints back:
//! the job identifier on submission and the `key = value` listing of a status
//! query. The conventions are PBS/Torque's (`qsub` prints `12345.server`,
//! `qstat -f` prints a `Job Id:` header followed by indented attributes).

use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::config::{format_walltime, SchedulerConfig};
use super::connection::shell_quote;


// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// Render the submission descriptor for one task.
///
/// The header carries the resource request, wall-clock limit, optional queue
/// and job name; the body changes into `working_dir` and then lists the
/// script verbatim, one command per line.
pub fn render_descriptor(
    config: &SchedulerConfig,
    job_name: &str,
    working_dir: &str,
    script: &[String],
    walltime: Duration,
) -> String {
    let d = &config.directive;
    let mut lines = vec!["#!/bin/sh".to_string()];
    lines.push(format!("{} -l {}", d, config.resources));
    lines.push(format!("{} -l walltime={}", d, format_walltime(walltime)));
    if let Some(ref queue) = config.queue {
        lines.push(format!("{} -q {}", d, queue));
    }
    lines.push(format!("{} -N {}", d, job_name));
    lines.push(String::new());
    lines.push(format!("cd {}", shell_quote(working_dir)));
    lines.extend(script.iter().cloned());

    let mut text = lines.join("\n");
    text.push('\n');
    text
}


// ---------------------------------------------------------------------------
// Submission output
// ---------------------------------------------------------------------------

/// The job identifier in submission output: the first line, up to the first
/// `.`. Returns `None` when that is empty or not a single token.
pub fn parse_job_id(stdout: &str) -> Option<String> {
    let first = stdout.lines().next()?.trim();
    let id = first.split('.').next().unwrap_or("");
    if id.is_empty() || id.contains(char::is_whitespace) {
        return None;
    }
    Some(id.to_string())
}


// ---------------------------------------------------------------------------
// Status output
// ---------------------------------------------------------------------------

/// Parse status-query output into ordered fields.
///
/// The first line is a header and is skipped. Every later line containing
/// ` = ` starts a field; a line without one continues the previous field's
/// value (long attributes are wrapped across lines).
pub fn parse_status(stdout: &str) -> IndexMap<String, String> {
    let mut fields: IndexMap<String, String> = IndexMap::new();
    let mut last: Option<String> = None;

    for line in stdout.lines().skip(1) {
        if line.trim().is_empty() {
            continue;
        }
        if let Some((key, value)) = line.split_once(" = ") {
            let key = key.trim().to_string();
            fields.insert(key.clone(), value.trim().to_string());
            last = Some(key);
        } else if let Some(ref key) = last {
            if let Some(value) = fields.get_mut(key) {
                value.push_str(line.trim());
            }
        }
    }
    fields
}

/// Status-query stderr meaning the scheduler no longer lists the job. Torque
/// drops finished jobs after `keep_completed`; PBS Pro wants `-x` for them.
pub const PURGED_JOB_MARKERS: &[&str] = &["Unknown Job Id", "Job has finished"];

/// Whether status-query stderr says the job has left the scheduler.
pub fn is_purged_job(stderr: &str) -> bool {
    PURGED_JOB_MARKERS.iter().any(|m| stderr.contains(m))
}

/// Scheduler-reported job state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Held,
    Exiting,
    Completed,
    /// The scheduler no longer knows the job; it finished some time ago.
    Purged,
    Other(String),
}

impl JobState {
    /// Map a PBS `job_state` letter.
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "Q" | "W" | "T" => JobState::Queued,
            "R" | "B" => JobState::Running,
            "H" | "S" => JobState::Held,
            "E" => JobState::Exiting,
            "C" | "F" | "X" => JobState::Completed,
            other => JobState::Other(other.to_string()),
        }
    }

    /// Whether the scheduler has finished with the job.
    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Purged)
    }
}

/// One status query's result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    pub fields: IndexMap<String, String>,
    /// Set when the query found no such job.
    #[serde(default)]
    pub purged: bool,
}

impl JobStatus {
    pub fn from_output(job_id: &str, stdout: &str) -> Self {
        JobStatus {
            job_id: job_id.to_string(),
            fields: parse_status(stdout),
            purged: false,
        }
    }

    /// Status of a job the scheduler has already forgotten.
    pub fn purged(job_id: &str) -> Self {
        JobStatus {
            job_id: job_id.to_string(),
            fields: IndexMap::new(),
            purged: true,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// State from the `job_state` field, if the scheduler reported one.
    pub fn state(&self) -> Option<JobState> {
        if self.purged {
            return Some(JobState::Purged);
        }
        self.get("job_state").map(JobState::from_code)
    }

    pub fn is_finished(&self) -> bool {
        self.state().map_or(false, |s| s.is_finished())
    }

    /// Exit status of a finished job, when reported.
    pub fn exit_status(&self) -> Option<i32> {
        self.get("exit_status").and_then(|v| v.parse().ok())
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
