//! Tasks: one command script, one directory, local or remote.
//!
//! Phases move `Created → Staged → Running | Submitted → Completed`, with
//! `Failed` reachable from anywhere when staging, the local runner, or
//! remote submission raises an error. A command exiting non-zero does not
//! fail the task; the exit status is in the `RunResult`.
//!
//! A task never holds its simulation. It receives a `TaskContext` with the
//! capabilities it needs: the workspace, the shared remote handle, the local
//! runner and the simulation name for its tracing span.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::Span;

use crate::error::{Error, Result};
use crate::execution::{LocalRunner, RunResult, TaskLog};
use crate::record::TaskRecord;
use crate::rig::config::RemoteConfig;
use crate::rig::remote::{RemoteHandle, RemoteSession};
use crate::rig::scheduler::{render_descriptor, JobStatus};
use crate::template::Params;
use crate::workspace::Workspace;


// ---------------------------------------------------------------------------
// TaskPhase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    Created,
    Staged,
    Running,
    Submitted,
    Completed,
    Failed,
}

impl TaskPhase {
    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Completed and failed tasks may be staged again (a re-run); a submitted
    /// job must be observed as completed first.
    pub fn can_transition_to(self, next: TaskPhase) -> bool {
        use TaskPhase::*;
        match (self, next) {
            (_, Failed) => true,
            (Created | Staged | Completed | Failed, Staged) => true,
            (Staged, Running | Submitted) => true,
            (Running | Submitted, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskPhase::Created => "created",
            TaskPhase::Staged => "staged",
            TaskPhase::Running => "running",
            TaskPhase::Submitted => "submitted",
            TaskPhase::Completed => "completed",
            TaskPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Where the task last executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Local,
    Remote,
}

/// Result of `Task::execute`.
#[derive(Debug, Clone)]
pub enum Execution {
    /// The script ran to the end (or was halted) on this machine.
    Local(RunResult),
    /// The scheduler accepted the job.
    Submitted { job_id: String },
}

/// Result of `Task::sync`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The simulation has no remote session.
    NoSession,
    /// The task was never staged, so there is nothing remote to pull.
    NotStaged,
    Pulled,
}


// ---------------------------------------------------------------------------
// TaskContext
// ---------------------------------------------------------------------------

/// Capabilities a task borrows from its simulation.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub simulation: String,
    pub workspace: Arc<Workspace>,
    pub remote: RemoteHandle,
    pub runner: LocalRunner,
}


// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Task {
    name: String,
    script: Vec<String>,
    params: Params,
    phase: TaskPhase,
    mode: Option<ExecutionMode>,
    job_id: Option<String>,
    last_run: Option<RunResult>,
    failure: Option<String>,
    ctx: TaskContext,
    span: Span,
}

impl Task {
    pub fn new(name: &str, script: Vec<String>, params: Params, ctx: TaskContext) -> Self {
        let span = tracing::info_span!("task", simulation = %ctx.simulation, task = %name);
        Task {
            name: name.to_string(),
            script,
            params,
            phase: TaskPhase::Created,
            mode: None,
            job_id: None,
            last_run: None,
            failure: None,
            ctx,
            span,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn script(&self) -> &[String] {
        &self.script
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn phase(&self) -> TaskPhase {
        self.phase
    }

    pub fn mode(&self) -> Option<ExecutionMode> {
        self.mode
    }

    /// Scheduler job id of the current remote submission.
    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    /// Result of the most recent local run.
    pub fn last_run(&self) -> Option<&RunResult> {
        self.last_run.as_ref()
    }

    /// Message of the error that moved the task to `Failed`.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn task_dir(&self) -> PathBuf {
        self.ctx.workspace.task_dir(&self.name)
    }

    pub fn log(&self) -> TaskLog {
        TaskLog::new(
            self.ctx.workspace.stdout_log(&self.name),
            self.ctx.workspace.stderr_log(&self.name),
        )
    }

    /// The task directory's path inside the remote scratch workspace, once a
    /// session exists.
    pub fn remote_dir(&self) -> Option<String> {
        self.ctx.remote.session().map(|s| self.remote_dir_in(s))
    }

    fn remote_dir_in(&self, session: &RemoteSession) -> String {
        session.remote_path(&format!("{}/{}", self.output_root_name(), self.name))
    }

    fn output_root_name(&self) -> String {
        self.ctx
            .workspace
            .output_root()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Stage the task directory, then either run the script here (`None`) or
    /// submit it to the scheduler of `target`.
    ///
    /// Local runs block until the script finishes. Remote runs return once
    /// the job is queued.
    pub fn execute(&mut self, target: Option<&RemoteConfig>) -> Result<Execution> {
        let span = self.span.clone();
        let _entered = span.enter();

        if !self.phase.can_transition_to(TaskPhase::Staged) {
            return Err(Error::Precondition(format!(
                "task '{}' is {} (job {}); poll until it completes before executing again",
                self.name,
                self.phase,
                self.job_id.as_deref().unwrap_or("?")
            )));
        }
        self.job_id = None;
        let dir = match self.ctx.workspace.stage_task(&self.name) {
            Ok(dir) => dir,
            Err(e) => return Err(self.fail(e)),
        };
        self.set_phase(TaskPhase::Staged);

        match target {
            None => self.run_local(&dir),
            Some(config) => self.submit_remote(config),
        }
    }

    fn run_local(&mut self, dir: &Path) -> Result<Execution> {
        self.mode = Some(ExecutionMode::Local);
        self.set_phase(TaskPhase::Running);

        let mut result = RunResult::default();
        let run = self.ctx.runner.run_into(&self.script, dir, &self.log(), &mut result);
        self.last_run = Some(result.clone());
        match run {
            Ok(()) => {
                if let Some(failed) = result.first_failure() {
                    tracing::warn!(command = %failed.command, "script finished with failed commands");
                }
                self.set_phase(TaskPhase::Completed);
                Ok(Execution::Local(result))
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn submit_remote(&mut self, config: &RemoteConfig) -> Result<Execution> {
        self.mode = Some(ExecutionMode::Remote);
        match self.stage_remote_and_submit(config) {
            Ok(job_id) => {
                self.job_id = Some(job_id.clone());
                self.set_phase(TaskPhase::Submitted);
                Ok(Execution::Submitted { job_id })
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn stage_remote_and_submit(&self, config: &RemoteConfig) -> Result<String> {
        config.validate()?;
        let walltime = config.scheduler.walltime()?;
        let session = self.ctx.remote.get_or_establish(config)?;
        let workspace = &self.ctx.workspace;

        session.mirror_to_remote(&workspace.input_files()?, session.scratch_dir(), false)?;
        session.mirror_to_remote(
            &[workspace.output_root().to_path_buf()],
            session.scratch_dir(),
            true,
        )?;
        session.submit_job(&self.name, &self.remote_dir_in(session), &self.script, walltime)
    }

    /// Current scheduler view of the submitted job. Read-only.
    pub fn status(&self) -> Result<JobStatus> {
        let _entered = self.span.enter();
        let job_id = self.submitted_job()?;
        self.session()?.query_status(job_id)
    }

    /// Query the scheduler and mark the task `Completed` once it reports the
    /// job finished, or no longer knows the job at all.
    pub fn poll(&mut self) -> Result<JobStatus> {
        let status = self.status()?;
        if self.phase == TaskPhase::Submitted && status.is_finished() {
            let span = self.span.clone();
            let _entered = span.enter();
            self.set_phase(TaskPhase::Completed);
        }
        Ok(status)
    }

    /// Ask the scheduler to cancel the submitted job. The task stays
    /// `Submitted` until a poll sees the job finish.
    pub fn cancel(&self) -> Result<()> {
        let _entered = self.span.enter();
        let job_id = self.submitted_job()?;
        self.session()?.cancel_job(job_id)
    }

    /// Pull the task's remote directory into its local directory.
    ///
    /// Staged input links are excluded, so results never replace them.
    pub fn sync(&self) -> Result<SyncOutcome> {
        let _entered = self.span.enter();
        let Some(session) = self.ctx.remote.session() else {
            tracing::info!("no remote session; nothing to sync");
            return Ok(SyncOutcome::NoSession);
        };
        if self.phase == TaskPhase::Created {
            tracing::info!("task not staged; nothing to sync");
            return Ok(SyncOutcome::NotStaged);
        }
        let excludes: Vec<String> = self
            .ctx
            .workspace
            .input_files()?
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect();
        session.mirror_from_remote(&self.remote_dir_in(session), &self.task_dir(), &excludes)?;
        tracing::info!("results pulled");
        Ok(SyncOutcome::Pulled)
    }

    /// The descriptor this task would be submitted with to `config`.
    ///
    /// Before a session exists the scratch directory name is not known yet;
    /// the preview then changes into a path relative to the home directory,
    /// where batch jobs start.
    pub fn descriptor(&self, config: &RemoteConfig) -> Result<String> {
        let working_dir = match self.ctx.remote.session() {
            Some(session) => self.remote_dir_in(session),
            None => format!(
                "{}XXXXXXXX/{}/{}",
                config.scratch_prefix,
                self.output_root_name(),
                self.name
            ),
        };
        Ok(render_descriptor(
            &config.scheduler,
            &self.name,
            &working_dir,
            &self.script,
            config.scheduler.walltime()?,
        ))
    }

    /// Flat record of the task for a document store.
    pub fn record(&self) -> TaskRecord {
        TaskRecord {
            simulation: self.ctx.simulation.clone(),
            task: self.name.clone(),
            input_dir: self.ctx.workspace.input_dir().display().to_string(),
            output_dir: self.task_dir().display().to_string(),
            params: self.params.clone(),
        }
    }

    fn submitted_job(&self) -> Result<&str> {
        match (self.mode, self.job_id.as_deref()) {
            (Some(ExecutionMode::Remote), Some(job_id)) => Ok(job_id),
            (Some(ExecutionMode::Local), _) => Err(Error::Precondition(format!(
                "task '{}' ran locally and has no scheduler job",
                self.name
            ))),
            _ => Err(Error::Precondition(format!(
                "task '{}' has not been submitted",
                self.name
            ))),
        }
    }

    fn session(&self) -> Result<&RemoteSession> {
        self.ctx.remote.session().ok_or_else(|| {
            Error::Precondition(format!("task '{}' has no remote session", self.name))
        })
    }

    fn set_phase(&mut self, next: TaskPhase) {
        debug_assert!(self.phase.can_transition_to(next), "{} -> {}", self.phase, next);
        tracing::info!(from = %self.phase, to = %next, "phase");
        self.phase = next;
    }

    fn fail(&mut self, err: Error) -> Error {
        tracing::error!(error = %err, remote = err.is_remote(), "task failed");
        self.failure = Some(err.to_string());
        self.set_phase(TaskPhase::Failed);
        err
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::connection::RemoteOutput;
    use crate::rig::mock::{MockConnector, MockShell};
    use std::fs;

    struct Fixture {
        _dir: tempfile::TempDir,
        ctx: TaskContext,
        shell: MockShell,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input");
        fs::create_dir(&input).unwrap();
        fs::write(input.join("a.txt"), "alpha\n").unwrap();
        fs::write(input.join("b.txt"), "beta\n").unwrap();
        fs::write(input.join("prep.py"), "print()\n").unwrap();
        let out = dir.path().join("out");
        let workspace = Workspace::new("sim", &input, Some(&out), &["py".to_string()]).unwrap();

        let shell = MockShell::new(RemoteConfig::new("hpc", "alice"));
        let ctx = TaskContext {
            simulation: "sim".into(),
            workspace: Arc::new(workspace),
            remote: RemoteHandle::new(Arc::new(MockConnector::new(shell.clone()))),
            runner: LocalRunner::default(),
        };
        Fixture {
            _dir: dir,
            ctx,
            shell,
        }
    }

    fn task(fx: &Fixture, script: &[&str]) -> Task {
        Task::new(
            "task_1",
            script.iter().map(|s| s.to_string()).collect(),
            Params::new(),
            fx.ctx.clone(),
        )
    }

    fn remote() -> RemoteConfig {
        RemoteConfig::new("hpc", "alice")
    }

    fn queue_submission(shell: &MockShell, job: &str) {
        shell.push_exec_reply(Ok(RemoteOutput::ok("simrig_q1w2e3r4\n/home/alice\n")));
        shell.push_exec_reply(Ok(RemoteOutput::ok("")));
        shell.push_exec_reply(Ok(RemoteOutput::ok(job)));
    }

    #[test]
    fn phase_transitions() {
        use TaskPhase::*;
        assert!(Created.can_transition_to(Staged));
        assert!(Staged.can_transition_to(Submitted));
        assert!(Completed.can_transition_to(Staged));
        assert!(Submitted.can_transition_to(Failed));
        assert!(!Created.can_transition_to(Running));
        assert!(!Submitted.can_transition_to(Staged));
        assert!(!Completed.can_transition_to(Running));
    }

    #[test]
    fn local_execution_stages_and_logs() {
        let fx = fixture();
        let mut t = task(&fx, &["echo hello"]);
        assert_eq!(t.phase(), TaskPhase::Created);

        match t.execute(None).unwrap() {
            Execution::Local(result) => assert!(result.all_succeeded()),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(t.phase(), TaskPhase::Completed);
        assert_eq!(t.mode(), Some(ExecutionMode::Local));

        let dir = t.task_dir();
        assert!(fs::symlink_metadata(dir.join("a.txt")).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_to_string(dir.join("b.txt")).unwrap(), "beta\n");
        assert!(!dir.join("prep.py").exists());
        assert_eq!(fs::read_to_string(t.log().stdout_path()).unwrap(), "hello\n");
    }

    #[test]
    fn failing_command_does_not_fail_task() {
        let fx = fixture();
        let mut t = task(&fx, &["false", "echo after"]);
        t.execute(None).unwrap();
        assert_eq!(t.phase(), TaskPhase::Completed);
        let run = t.last_run().unwrap();
        assert_eq!(run.outcomes.len(), 2);
        assert!(!run.all_succeeded());
    }

    #[test]
    fn spawn_error_fails_task() {
        let fx = fixture();
        let mut t = task(&fx, &["simrig-no-such-program-xyz"]);
        assert!(matches!(t.execute(None), Err(Error::Spawn { .. })));
        assert_eq!(t.phase(), TaskPhase::Failed);
        assert!(t.failure().unwrap().contains("simrig-no-such-program-xyz"));
    }

    #[test]
    fn staging_error_fails_task() {
        let fx = fixture();
        fs::write(fx.ctx.workspace.task_dir("task_1"), "in the way").unwrap();
        let mut t = task(&fx, &["echo x"]);
        assert!(matches!(t.execute(None), Err(Error::Directory { .. })));
        assert_eq!(t.phase(), TaskPhase::Failed);
    }

    #[test]
    fn status_of_local_task_is_a_precondition_error() {
        let fx = fixture();
        let mut t = task(&fx, &["echo hello"]);
        assert!(matches!(t.status(), Err(Error::Precondition(_))));
        t.execute(None).unwrap();
        match t.status() {
            Err(Error::Precondition(msg)) => assert!(msg.contains("locally")),
            other => panic!("expected precondition error, got {:?}", other),
        }
        assert!(matches!(t.cancel(), Err(Error::Precondition(_))));
    }

    #[test]
    fn sync_without_session_is_a_noop() {
        let fx = fixture();
        let mut t = task(&fx, &["echo hello"]);
        t.execute(None).unwrap();
        assert_eq!(t.sync().unwrap(), SyncOutcome::NoSession);
        assert!(fx.shell.calls().is_empty());
    }

    #[test]
    fn remote_execution_mirrors_and_submits() {
        let fx = fixture();
        queue_submission(&fx.shell, "42.pbs-head\n");
        let mut t = task(&fx, &["gmx mdrun -deffnm md"]);

        match t.execute(Some(&remote())).unwrap() {
            Execution::Submitted { job_id } => assert_eq!(job_id, "42"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(t.phase(), TaskPhase::Submitted);
        assert_eq!(t.job_id(), Some("42"));
        assert_eq!(
            t.remote_dir().as_deref(),
            Some("/home/alice/simrig_q1w2e3r4/out/task_1")
        );

        let transfers = fx.shell.transfers();
        assert_eq!(transfers.len(), 2);
        let inputs = &transfers[0];
        assert!(inputs.iter().any(|a| a.ends_with("/input/a.txt")));
        assert!(!inputs.iter().any(|a| a.ends_with("prep.py")));
        let tree = &transfers[1];
        assert!(tree.contains(&"--copy-links".to_string()));
        assert!(tree[tree.len() - 2].ends_with("/out"));

        let commands = fx.shell.executed_commands();
        assert_eq!(commands.len(), 3);
        assert!(commands[2].ends_with("qsub /home/alice/simrig_q1w2e3r4/task_1.job"));
    }

    #[test]
    fn poll_completes_finished_job() {
        let fx = fixture();
        queue_submission(&fx.shell, "42.pbs-head\n");
        let mut t = task(&fx, &["gmx mdrun"]);
        t.execute(Some(&remote())).unwrap();

        fx.shell
            .push_exec_reply(Ok(RemoteOutput::ok("Job Id: 42.pbs-head\n    job_state = R\n")));
        t.poll().unwrap();
        assert_eq!(t.phase(), TaskPhase::Submitted);

        fx.shell
            .push_exec_reply(Ok(RemoteOutput::ok("Job Id: 42.pbs-head\n    job_state = C\n")));
        let status = t.poll().unwrap();
        assert!(status.is_finished());
        assert_eq!(t.phase(), TaskPhase::Completed);
        assert_eq!(fx.shell.executed_commands().last().unwrap(), "qstat -f 42");
    }

    #[test]
    fn executing_a_submitted_task_again_is_rejected() {
        let fx = fixture();
        queue_submission(&fx.shell, "42.pbs-head\n");
        let mut t = task(&fx, &["gmx mdrun"]);
        t.execute(Some(&remote())).unwrap();
        assert!(matches!(t.execute(None), Err(Error::Precondition(_))));
        assert_eq!(t.phase(), TaskPhase::Submitted);
    }

    #[test]
    fn submission_error_fails_task() {
        let fx = fixture();
        queue_submission(&fx.shell, "");
        let mut t = task(&fx, &["gmx mdrun"]);
        assert!(matches!(
            t.execute(Some(&remote())),
            Err(Error::Submission { .. })
        ));
        assert_eq!(t.phase(), TaskPhase::Failed);
        assert!(t.job_id().is_none());
    }

    #[test]
    fn poll_completes_job_the_scheduler_forgot() {
        let fx = fixture();
        queue_submission(&fx.shell, "42.pbs-head\n");
        let mut t = task(&fx, &["gmx mdrun"]);
        t.execute(Some(&remote())).unwrap();

        fx.shell
            .push_exec_reply(Ok(RemoteOutput::err("qstat: Unknown Job Id 42.pbs-head\n")));
        let status = t.poll().unwrap();
        assert!(status.purged);
        assert_eq!(t.phase(), TaskPhase::Completed);

        fx.shell.push_exec_reply(Ok(RemoteOutput::ok("")));
        fx.shell.push_exec_reply(Ok(RemoteOutput::ok("43.pbs-head\n")));
        let execution = t.execute(Some(&remote())).unwrap();
        assert!(matches!(execution, Execution::Submitted { ref job_id } if job_id == "43"));
        assert_eq!(t.job_id(), Some("43"));
    }

    #[test]
    fn failed_resubmission_forgets_previous_job() {
        let fx = fixture();
        queue_submission(&fx.shell, "42.pbs-head\n");
        let mut t = task(&fx, &["gmx mdrun"]);
        t.execute(Some(&remote())).unwrap();
        fx.shell
            .push_exec_reply(Ok(RemoteOutput::ok("Job Id: 42.pbs-head\n    job_state = C\n")));
        t.poll().unwrap();
        assert_eq!(t.phase(), TaskPhase::Completed);

        fx.shell.push_exec_reply(Ok(RemoteOutput::ok("")));
        fx.shell.push_exec_reply(Ok(RemoteOutput::ok("")));
        assert!(matches!(
            t.execute(Some(&remote())),
            Err(Error::Submission { .. })
        ));
        assert_eq!(t.phase(), TaskPhase::Failed);
        assert!(t.job_id().is_none());
        assert!(matches!(t.status(), Err(Error::Precondition(_))));
    }

    #[test]
    fn spawn_error_keeps_commands_already_run() {
        let fx = fixture();
        let mut t = task(&fx, &["echo first", "simrig-no-such-program-xyz"]);
        assert!(matches!(t.execute(None), Err(Error::Spawn { .. })));
        assert_eq!(t.phase(), TaskPhase::Failed);
        let run = t.last_run().unwrap();
        assert_eq!(run.outcomes.len(), 1);
        assert_eq!(run.outcomes[0].command, "echo first");
    }

    #[test]
    fn sync_pulls_task_dir_excluding_inputs() {
        let fx = fixture();
        queue_submission(&fx.shell, "42.pbs-head\n");
        let mut t = task(&fx, &["gmx mdrun"]);
        t.execute(Some(&remote())).unwrap();

        assert_eq!(t.sync().unwrap(), SyncOutcome::Pulled);
        let pull = fx.shell.transfers().pop().unwrap();
        let n = pull.len();
        assert_eq!(pull[n - 2], "alice@hpc:/home/alice/simrig_q1w2e3r4/out/task_1/");
        assert!(pull[n - 1].ends_with("/out/task_1/"));
        assert!(pull.contains(&"a.txt".to_string()));
        assert!(pull.contains(&"b.txt".to_string()));
    }

    #[test]
    fn cancel_issues_scheduler_cancel() {
        let fx = fixture();
        queue_submission(&fx.shell, "42.pbs-head\n");
        let mut t = task(&fx, &["gmx mdrun"]);
        t.execute(Some(&remote())).unwrap();
        t.cancel().unwrap();
        assert_eq!(fx.shell.executed_commands().last().unwrap(), "qdel 42");
        assert_eq!(t.phase(), TaskPhase::Submitted);
    }

    #[test]
    fn descriptor_preview_before_session() {
        let fx = fixture();
        let t = task(&fx, &["gmx mdrun"]);
        let text = t.descriptor(&remote()).unwrap();
        assert!(text.contains("#PBS -N task_1\n"));
        assert!(text.contains("\ncd simrig_XXXXXXXX/out/task_1\n"));
        assert!(!text.contains('\''));
        assert!(text.ends_with("gmx mdrun\n"));
    }

    #[test]
    fn record_carries_paths() {
        let fx = fixture();
        let t = task(&fx, &["x"]);
        let record = t.record();
        assert_eq!(record.task, "task_1");
        assert_eq!(record.simulation, "sim");
        assert!(record.output_dir.ends_with("task_1"));
        assert!(record.input_dir.ends_with("input"));
    }
}
