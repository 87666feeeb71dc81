//! Local execution of a task script.
//!
//! `LocalRunner` runs commands one after another inside a task directory.
//! Each command line is split into pipeline stages (see `command_line`),
//! every stage is spawned with an explicit working directory (the process-wide
//! cwd is never touched), and the last stage's stdout plus every stage's
//! stderr are captured as raw bytes. After the banner rule is applied the
//! streams are appended to the task's log pair.
//!
//! A non-zero exit does not stop the script under `FailurePolicy::Continue`
//! (the default); `FailurePolicy::Halt` stops at the first failed command.

use std::io::Read;
use std::path::Path;
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[cfg(unix)]
use std::os::unix::process::CommandExt;

use serde::{Deserialize, Serialize};

use super::command_line::{split_pipeline, Argv};
use super::output::{BannerRule, TaskLog};
use crate::error::{Error, Result};


/// How often a running pipeline is checked when a timeout or cancel token
/// is in effect.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Time between SIGTERM and SIGKILL when stopping a stage.
const KILL_GRACE: Duration = Duration::from_millis(200);


// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// What to do after a command fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure and run the next command.
    #[default]
    Continue,
    /// Stop the script; remaining commands are reported as skipped.
    Halt,
}

/// Runner configuration, usually taken from the `runner` manifest section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerOptions {
    pub failure_policy: FailurePolicy,
    pub banner: BannerRule,
    /// Per-command wall-clock limit in seconds. `None` waits indefinitely.
    pub timeout_secs: Option<u64>,
}

impl RunnerOptions {
    fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Shared flag used to stop a local run between (or during) commands.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}


// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// How a command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Exit status of the last pipeline stage.
    Exited(i32),
    /// The last stage was killed by a signal it did not ask for.
    Signaled,
    /// Killed after exceeding the per-command timeout.
    TimedOut,
    /// Killed because the run was cancelled.
    Cancelled,
}

/// Captured result of one command line.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub command: String,
    pub termination: Termination,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Whether stderr was folded into stdout by the banner rule.
    pub merged_banner: bool,
    pub elapsed: Duration,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.termination == Termination::Exited(0)
    }
}

/// Outcome of a whole script.
#[derive(Debug, Clone, Default)]
pub struct RunResult {
    /// One entry per command that was started, in script order.
    pub outcomes: Vec<CommandOutcome>,
    /// Commands never started because of `Halt` or cancellation.
    pub skipped: Vec<String>,
}

impl RunResult {
    pub fn all_succeeded(&self) -> bool {
        self.skipped.is_empty() && self.outcomes.iter().all(CommandOutcome::success)
    }

    pub fn first_failure(&self) -> Option<&CommandOutcome> {
        self.outcomes.iter().find(|o| !o.success())
    }

    pub fn was_cancelled(&self) -> bool {
        self.outcomes
            .iter()
            .any(|o| o.termination == Termination::Cancelled)
    }
}


// ---------------------------------------------------------------------------
// LocalRunner
// ---------------------------------------------------------------------------

/// Runs command scripts as local processes.
#[derive(Debug, Clone, Default)]
pub struct LocalRunner {
    options: RunnerOptions,
    cancel: Option<CancelToken>,
}

impl LocalRunner {
    pub fn new(options: RunnerOptions) -> Self {
        LocalRunner {
            options,
            cancel: None,
        }
    }

    /// Attach a cancel token checked before and while each command runs.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    /// Run `commands` in order inside `working_dir`, appending each command's
    /// output to `log`.
    ///
    /// Errors are reserved for commands that cannot be parsed or started and
    /// for log I/O; a command exiting non-zero is recorded in the result.
    pub fn run(&self, commands: &[String], working_dir: &Path, log: &TaskLog) -> Result<RunResult> {
        let mut result = RunResult::default();
        self.run_into(commands, working_dir, log, &mut result)?;
        Ok(result)
    }

    /// Like `run`, but records into `result` as it goes, so the outcomes of
    /// commands that finished before an error are still available.
    pub fn run_into(
        &self,
        commands: &[String],
        working_dir: &Path,
        log: &TaskLog,
        result: &mut RunResult,
    ) -> Result<()> {
        for (idx, command) in commands.iter().enumerate() {
            if self.is_cancelled() {
                tracing::info!(remaining = commands.len() - idx, "run cancelled");
                result.skipped.extend(commands[idx..].iter().cloned());
                break;
            }

            let stages = split_pipeline(command)?;
            tracing::info!(command = %command, "running");
            let mut outcome = if stages.is_empty() {
                CommandOutcome {
                    command: command.clone(),
                    termination: Termination::Exited(0),
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                    merged_banner: false,
                    elapsed: Duration::ZERO,
                }
            } else {
                self.run_pipeline(command, &stages, working_dir)?
            };
            outcome.merged_banner = self
                .options
                .banner
                .apply(&mut outcome.stdout, &mut outcome.stderr);
            log.append(&outcome.stdout, &outcome.stderr)?;

            let stop = match outcome.termination {
                Termination::Exited(0) => {
                    tracing::debug!(command = %command, elapsed_ms = outcome.elapsed.as_millis() as u64, "finished");
                    false
                }
                Termination::Cancelled => true,
                other => {
                    tracing::warn!(command = %command, termination = ?other, "command failed");
                    self.options.failure_policy == FailurePolicy::Halt
                }
            };
            result.outcomes.push(outcome);
            if stop {
                result.skipped.extend(commands[idx + 1..].iter().cloned());
                break;
            }
        }
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(CancelToken::is_cancelled).unwrap_or(false)
    }

    fn run_pipeline(&self, command: &str, stages: &[Argv], working_dir: &Path) -> Result<CommandOutcome> {
        let started = Instant::now();
        let mut children: Vec<Child> = Vec::with_capacity(stages.len());
        let mut stderr_readers = Vec::with_capacity(stages.len());
        let mut upstream: Option<ChildStdout> = None;

        for (idx, argv) in stages.iter().enumerate() {
            let mut cmd = Command::new(&argv[0]);
            cmd.args(&argv[1..])
                .current_dir(working_dir)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
            #[cfg(unix)]
            cmd.process_group(0);
            match upstream.take() {
                Some(out) => cmd.stdin(Stdio::from(out)),
                None => cmd.stdin(Stdio::null()),
            };

            let mut child = match cmd.spawn() {
                Ok(child) => child,
                Err(source) => {
                    stop_children(&mut children);
                    return Err(Error::Spawn {
                        command: command.to_string(),
                        source,
                    });
                }
            };
            stderr_readers.push(drain(child.stderr.take()));
            if idx + 1 < stages.len() {
                upstream = child.stdout.take();
            }
            children.push(child);
        }
        let stdout_reader = drain(children.last_mut().and_then(|c| c.stdout.take()));

        let termination = self.wait(command, &mut children, started)?;

        let stdout = stdout_reader.join().unwrap_or_default();
        let mut stderr = Vec::new();
        for reader in stderr_readers {
            stderr.extend(reader.join().unwrap_or_default());
        }

        Ok(CommandOutcome {
            command: command.to_string(),
            termination,
            stdout,
            stderr,
            merged_banner: false,
            elapsed: started.elapsed(),
        })
    }

    fn wait(&self, command: &str, children: &mut [Child], started: Instant) -> Result<Termination> {
        let timeout = self.options.timeout();
        let wait_err = |source| Error::Spawn {
            command: command.to_string(),
            source,
        };

        if timeout.is_none() && self.cancel.is_none() {
            let mut last = None;
            for child in children.iter_mut() {
                last = Some(child.wait().map_err(wait_err)?);
            }
            return Ok(last.map(classify).unwrap_or(Termination::Exited(0)));
        }

        let mut statuses: Vec<Option<ExitStatus>> = vec![None; children.len()];
        loop {
            let mut running = false;
            for (child, status) in children.iter_mut().zip(statuses.iter_mut()) {
                if status.is_none() {
                    *status = child.try_wait().map_err(wait_err)?;
                    running |= status.is_none();
                }
            }
            if !running {
                let last = statuses.last().copied().flatten();
                return Ok(last.map(classify).unwrap_or(Termination::Exited(0)));
            }
            if timeout.map(|t| started.elapsed() >= t).unwrap_or(false) {
                stop_children(children);
                return Ok(Termination::TimedOut);
            }
            if self.is_cancelled() {
                stop_children(children);
                return Ok(Termination::Cancelled);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

fn classify(status: ExitStatus) -> Termination {
    match status.code() {
        Some(code) => Termination::Exited(code),
        None => Termination::Signaled,
    }
}

/// Read a pipe to the end on a separate thread so a chatty stage can never
/// block on a full pipe buffer.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

/// SIGTERM to each stage's process group, a short grace period, then
/// SIGKILL. Signalling the group reaches programs a stage forked, which
/// would otherwise keep the output pipes open.
fn stop_children(children: &mut [Child]) {
    for child in children.iter_mut() {
        signal_group(child, Signal::Term);
    }
    let deadline = Instant::now() + KILL_GRACE;
    for child in children.iter_mut() {
        while let Ok(None) = child.try_wait() {
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }
    for child in children.iter_mut() {
        signal_group(child, Signal::Kill);
        let _ = child.kill();
        let _ = child.wait();
    }
}

#[derive(Clone, Copy)]
enum Signal {
    Term,
    Kill,
}

#[cfg(unix)]
fn signal_group(child: &Child, signal: Signal) {
    let sig = match signal {
        Signal::Term => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    // Each stage leads its own group, so the group id is the stage's pid.
    unsafe {
        libc::killpg(child.id() as libc::pid_t, sig);
    }
}

#[cfg(not(unix))]
fn signal_group(_child: &Child, _signal: Signal) {}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn script(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|s| s.to_string()).collect()
    }

    fn log_in(dir: &Path) -> TaskLog {
        TaskLog::new(dir.join("t_stdout.txt"), dir.join("t_stderr.txt"))
    }

    #[test]
    fn captures_stdout_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(dir.path());
        let runner = LocalRunner::default();
        let result = runner
            .run(&script(&["echo hello", "echo world"]), dir.path(), &log)
            .unwrap();
        assert!(result.all_succeeded());
        assert_eq!(result.outcomes[0].stdout, b"hello\n");
        assert_eq!(fs::read(log.stdout_path()).unwrap(), b"hello\nworld\n");
        assert_eq!(fs::read(log.stderr_path()).unwrap(), b"");
    }

    #[test]
    fn runs_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let log = log_in(dir.path());
        let result = LocalRunner::default()
            .run(&script(&["cat marker.txt"]), dir.path(), &log)
            .unwrap();
        assert_eq!(result.outcomes[0].stdout, b"here");
    }

    #[test]
    fn pipeline_feeds_next_stage() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(dir.path());
        let result = LocalRunner::default()
            .run(&script(&["echo 6 | cat | wc -l"]), dir.path(), &log)
            .unwrap();
        let text = String::from_utf8(result.outcomes[0].stdout.clone()).unwrap();
        assert_eq!(text.trim(), "1");
    }

    #[test]
    fn redirection_is_not_interpreted() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(dir.path());
        let result = LocalRunner::default()
            .run(&script(&["echo hi > out.txt"]), dir.path(), &log)
            .unwrap();
        assert_eq!(result.outcomes[0].stdout, b"hi > out.txt\n");
        assert!(!dir.path().join("out.txt").exists());
    }

    #[test]
    fn failure_does_not_halt_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(dir.path());
        let result = LocalRunner::default()
            .run(&script(&["false", "echo after"]), dir.path(), &log)
            .unwrap();
        assert_eq!(result.outcomes.len(), 2);
        assert_eq!(result.outcomes[0].termination, Termination::Exited(1));
        assert!(result.outcomes[1].success());
        assert!(result.skipped.is_empty());
        assert_eq!(result.first_failure().unwrap().command, "false");
    }

    #[test]
    fn halt_policy_stops_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(dir.path());
        let runner = LocalRunner::new(RunnerOptions {
            failure_policy: FailurePolicy::Halt,
            ..RunnerOptions::default()
        });
        let result = runner
            .run(&script(&["echo one", "false", "echo three"]), dir.path(), &log)
            .unwrap();
        assert_eq!(result.outcomes.len(), 2);
        assert_eq!(result.skipped, vec!["echo three".to_string()]);
        assert!(!result.all_succeeded());
    }

    #[test]
    fn stderr_is_kept_separate() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(dir.path());
        let result = LocalRunner::default()
            .run(&script(&["ls does-not-exist"]), dir.path(), &log)
            .unwrap();
        assert!(!result.outcomes[0].success());
        assert!(!result.outcomes[0].stderr.is_empty());
        assert!(!fs::read(log.stderr_path()).unwrap().is_empty());
    }

    #[test]
    fn banner_merge_applies_per_command() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(dir.path());
        // `ls` reports the missing name on stderr; use it as the marker.
        let runner = LocalRunner::new(RunnerOptions {
            banner: BannerRule::new(vec!["BANNER-TOOL".into()]),
            ..RunnerOptions::default()
        });
        let result = runner
            .run(&script(&["ls BANNER-TOOL", "ls other-missing"]), dir.path(), &log)
            .unwrap();
        assert!(result.outcomes[0].merged_banner);
        assert!(result.outcomes[0].stderr.is_empty());
        assert!(!result.outcomes[1].merged_banner);
        assert!(!result.outcomes[1].stderr.is_empty());
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(dir.path());
        let err = LocalRunner::default()
            .run(&script(&["simrig-no-such-program-xyz"]), dir.path(), &log)
            .unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
    }

    #[test]
    fn rerun_appends_to_logs() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(dir.path());
        let runner = LocalRunner::default();
        runner.run(&script(&["echo a"]), dir.path(), &log).unwrap();
        runner.run(&script(&["echo a"]), dir.path(), &log).unwrap();
        assert_eq!(fs::read(log.stdout_path()).unwrap(), b"a\na\n");
    }

    #[test]
    fn timeout_kills_hung_command() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(dir.path());
        let runner = LocalRunner::new(RunnerOptions {
            timeout_secs: Some(1),
            ..RunnerOptions::default()
        });
        let started = Instant::now();
        let result = runner
            .run(&script(&["sleep 30", "echo next"]), dir.path(), &log)
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(result.outcomes[0].termination, Termination::TimedOut);
        assert!(result.outcomes[1].success());
    }

    #[test]
    fn timeout_reaches_forked_programs() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(dir.path());
        let runner = LocalRunner::new(RunnerOptions {
            timeout_secs: Some(1),
            ..RunnerOptions::default()
        });
        let started = Instant::now();
        let result = runner
            .run(&script(&["sh -c 'sleep 8; echo late'"]), dir.path(), &log)
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(result.outcomes[0].termination, Termination::TimedOut);
        assert!(result.outcomes[0].stdout.is_empty());
    }

    #[test]
    fn run_into_keeps_outcomes_before_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(dir.path());
        let mut result = RunResult::default();
        let err = LocalRunner::default()
            .run_into(
                &script(&["echo first", "simrig-no-such-program-xyz", "echo never"]),
                dir.path(),
                &log,
                &mut result,
            )
            .unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
        assert_eq!(result.outcomes.len(), 1);
        assert_eq!(result.outcomes[0].stdout, b"first\n");
    }

    #[test]
    fn cancelled_token_skips_everything() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(dir.path());
        let token = CancelToken::new();
        token.cancel();
        let runner = LocalRunner::default().with_cancel(token);
        let result = runner.run(&script(&["echo a", "echo b"]), dir.path(), &log).unwrap();
        assert!(result.outcomes.is_empty());
        assert_eq!(result.skipped.len(), 2);
    }

    #[test]
    fn cancel_during_command_stops_run() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(dir.path());
        let token = CancelToken::new();
        let runner = LocalRunner::default().with_cancel(token.clone());
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            token.cancel();
        });
        let result = runner
            .run(&script(&["sleep 30", "echo never"]), dir.path(), &log)
            .unwrap();
        canceller.join().unwrap();
        assert!(result.was_cancelled());
        assert_eq!(result.skipped, vec!["echo never".to_string()]);
    }
}
