//! The remote session of a simulation.
//!
//! A `RemoteSession` is one connection plus one scratch directory created in
//! the remote home directory. Every task of the simulation that targets the
//! remote mirrors into, submits from and pulls out of that directory.
//!
//! `RemoteHandle` is the capability tasks receive: a shared slot holding the
//! session once established, and the connector used to establish it. The
//! slot is a `OnceCell`, so concurrent first submissions create exactly one
//! scratch directory.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;

use crate::error::{Error, Result};
use crate::rig::config::RemoteConfig;
use crate::rig::connection::{shell_quote, Connector, RemoteShell};
use crate::rig::scheduler::{is_purged_job, parse_job_id, render_descriptor, JobStatus};
use crate::rig::sync::{build_rsync_args, find_transfer_error, TransferSpec};


// ---------------------------------------------------------------------------
// RemoteSession
// ---------------------------------------------------------------------------

pub struct RemoteSession {
    shell: Box<dyn RemoteShell>,
    scratch_dir: String,
}

impl fmt::Debug for RemoteSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSession")
            .field("host", &self.config().host)
            .field("user", &self.config().user)
            .field("scratch_dir", &self.scratch_dir)
            .finish()
    }
}

impl RemoteSession {
    /// Connect and create a fresh scratch directory under the remote home.
    ///
    /// Anything the creation command writes to stderr is a `RemoteCommand`
    /// error; nothing is retried.
    pub fn establish(connector: &dyn Connector, config: &RemoteConfig) -> Result<Self> {
        let shell = connector.connect(config)?;
        let command = format!(
            "cd ~ && mktemp -d {}XXXXXXXX && pwd",
            shell_quote(&config.scratch_prefix)
        );
        let output = shell.exec(&command)?;
        if output.has_stderr() || output.status.map_or(false, |s| s != 0) {
            return Err(Error::RemoteCommand {
                command,
                stderr: output.stderr.trim().to_string(),
            });
        }

        let lines: Vec<&str> = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        let scratch_dir = match lines.as_slice() {
            [dir, home] => join_remote(home, dir),
            _ => {
                return Err(Error::RemoteCommand {
                    command,
                    stderr: format!("unexpected output: {:?}", output.stdout),
                })
            }
        };

        tracing::info!(host = %config.host, scratch = %scratch_dir, "remote scratch workspace created");
        Ok(RemoteSession { shell, scratch_dir })
    }

    /// The configuration the session was established with.
    pub fn config(&self) -> &RemoteConfig {
        self.shell.config()
    }

    /// Absolute path of the scratch directory.
    pub fn scratch_dir(&self) -> &str {
        &self.scratch_dir
    }

    /// `relative` resolved inside the scratch directory.
    pub fn remote_path(&self, relative: &str) -> String {
        join_remote(&self.scratch_dir, relative)
    }

    /// Whether this session serves `config`'s host and user.
    pub fn serves(&self, config: &RemoteConfig) -> bool {
        let own = self.config();
        own.host == config.host && own.user == config.user && own.port == config.port
    }

    /// Push `local_paths` into `remote_dest`. With `follow_links`, symbolic
    /// links are replaced by copies of their targets on the remote side.
    pub fn mirror_to_remote(
        &self,
        local_paths: &[PathBuf],
        remote_dest: &str,
        follow_links: bool,
    ) -> Result<()> {
        if local_paths.is_empty() {
            return Ok(());
        }
        let sources = local_paths
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        let mut spec = TransferSpec::push(sources, remote_dest);
        if follow_links {
            spec = spec.following_links();
        }
        self.transfer(&spec, remote_dest)
    }

    /// Pull the contents of `remote_src` into `local_dest`, skipping
    /// `excludes`.
    pub fn mirror_from_remote(
        &self,
        remote_src: &str,
        local_dest: &Path,
        excludes: &[String],
    ) -> Result<()> {
        let spec = TransferSpec::pull(remote_src, &local_dest.to_string_lossy())
            .with_excludes(excludes.to_vec());
        self.transfer(&spec, remote_src)
    }

    fn transfer(&self, spec: &TransferSpec, endpoint: &str) -> Result<()> {
        let args = build_rsync_args(spec, self.config());
        tracing::debug!(command = %format!("rsync {}", args.join(" ")), "transfer");
        let output = self.shell.transfer(&args)?;
        for line in output.stdout.lines() {
            tracing::debug!("{}", line);
        }
        let failed_status = output.status.map_or(true, |s| s != 0);
        match find_transfer_error(&output.stderr) {
            Some(detail) => Err(Error::Transfer {
                endpoint: format!("{}:{}", self.config().user_at_host(), endpoint),
                detail,
            }),
            None if failed_status => Err(Error::Transfer {
                endpoint: format!("{}:{}", self.config().user_at_host(), endpoint),
                detail: format!("rsync exited with {:?}: {}", output.status, output.stderr.trim()),
            }),
            None => Ok(()),
        }
    }

    /// Write the descriptor for `job_name` into the scratch directory and
    /// submit it. Returns the scheduler's job identifier.
    pub fn submit_job(
        &self,
        job_name: &str,
        working_dir: &str,
        script: &[String],
        walltime: Duration,
    ) -> Result<String> {
        let scheduler = &self.config().scheduler;
        let descriptor = render_descriptor(scheduler, job_name, working_dir, script, walltime);
        let descriptor_path = self.remote_path(&format!("{}.job", job_name));

        let write = format!("cat > {}", shell_quote(&descriptor_path));
        let written = self.shell.exec_with_input(&write, descriptor.as_bytes())?;
        if written.has_stderr() {
            return Err(Error::RemoteCommand {
                command: write,
                stderr: written.stderr.trim().to_string(),
            });
        }

        let submit = format!(
            "cd {} && {} {}",
            shell_quote(&self.scratch_dir),
            scheduler.submit_command,
            shell_quote(&descriptor_path)
        );
        let output = self.shell.exec(&submit)?;
        match parse_job_id(&output.stdout) {
            Some(job_id) if !output.has_stderr() => {
                tracing::info!(task = %job_name, job_id = %job_id, "job submitted");
                Ok(job_id)
            }
            _ => Err(Error::Submission {
                task: job_name.to_string(),
                output: format!("{}{}", output.stdout, output.stderr).trim().to_string(),
            }),
        }
    }

    /// Ask the scheduler about `job_id`.
    pub fn query_status(&self, job_id: &str) -> Result<JobStatus> {
        let command = format!("{} {}", self.config().scheduler.status_command, shell_quote(job_id));
        let output = self.shell.exec(&command)?;
        if output.has_stderr() && is_purged_job(&output.stderr) {
            tracing::info!(job_id = %job_id, "scheduler no longer lists the job");
            return Ok(JobStatus::purged(job_id));
        }
        if output.has_stderr() {
            return Err(Error::Status {
                job_id: job_id.to_string(),
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(JobStatus::from_output(job_id, &output.stdout))
    }

    /// Ask the scheduler to cancel `job_id`.
    pub fn cancel_job(&self, job_id: &str) -> Result<()> {
        let command = format!("{} {}", self.config().scheduler.cancel_command, shell_quote(job_id));
        let output = self.shell.exec(&command)?;
        if output.has_stderr() {
            return Err(Error::RemoteCommand {
                command,
                stderr: output.stderr.trim().to_string(),
            });
        }
        tracing::info!(job_id = %job_id, "job cancelled");
        Ok(())
    }
}

fn join_remote(base: &str, relative: &str) -> String {
    if relative.starts_with('/') {
        relative.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), relative)
    }
}


// ---------------------------------------------------------------------------
// RemoteHandle
// ---------------------------------------------------------------------------

/// Shared, lazily established remote session of one simulation.
#[derive(Clone)]
pub struct RemoteHandle {
    slot: Arc<OnceCell<RemoteSession>>,
    connector: Arc<dyn Connector>,
}

impl fmt::Debug for RemoteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteHandle")
            .field("session", &self.slot.get())
            .finish()
    }
}

impl RemoteHandle {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        RemoteHandle {
            slot: Arc::new(OnceCell::new()),
            connector,
        }
    }

    /// The session, if one has been established.
    pub fn session(&self) -> Option<&RemoteSession> {
        self.slot.get()
    }

    /// The session for `config`, establishing it on first use.
    ///
    /// A simulation has one remote workspace; asking for a different host
    /// afterwards is a `Precondition` error.
    pub fn get_or_establish(&self, config: &RemoteConfig) -> Result<&RemoteSession> {
        let session = self
            .slot
            .get_or_try_init(|| RemoteSession::establish(self.connector.as_ref(), config))?;
        if !session.serves(config) {
            return Err(Error::Precondition(format!(
                "remote workspace already lives on {}; cannot target {}",
                session.config().user_at_host(),
                config.user_at_host()
            )));
        }
        Ok(session)
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
