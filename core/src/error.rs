//! Error taxonomy for simrig.
//!
//! Every fallible operation in the crate returns [`Result`]. Variants carry
//! enough context (task name, command, path or remote host) to diagnose a
//! failure without re-running it. Nothing in the crate retries on error.

use std::path::PathBuf;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// All failures surfaced by simrig.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A workspace directory could not be created or is not a directory.
    #[error("directory error at {}: {reason}", path.display())]
    Directory { path: PathBuf, reason: String },

    /// An input reference could not be placed in a task directory.
    #[error("link error at {}: {reason}", link.display())]
    Link { link: PathBuf, reason: String },

    /// A mirror operation reported an error.
    #[error("transfer to/from {endpoint} failed: {detail}")]
    Transfer { endpoint: String, detail: String },

    /// The remote host could not be reached or refused authentication.
    #[error("connection to {host} failed: {reason}")]
    Connection { host: String, reason: String },

    /// A remote bookkeeping command wrote to its error stream.
    #[error("remote command `{command}` failed: {stderr}")]
    RemoteCommand { command: String, stderr: String },

    /// The scheduler did not hand back a job identifier.
    #[error("submission of task '{task}' failed: {output}")]
    Submission { task: String, output: String },

    /// A status query wrote to its error stream.
    #[error("status query for job {job_id} failed: {stderr}")]
    Status { job_id: String, stderr: String },

    /// An operation was invoked in a state that does not allow it.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// The template collaborator violated its contract.
    #[error("template error: {0}")]
    Template(String),

    /// A command line could not be split into a runnable pipeline.
    #[error("invalid command `{command}`: {reason}")]
    InvalidCommand { command: String, reason: String },

    /// A local program could not be started.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Filesystem I/O outside of staging (logs, descriptors, stores).
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A simulation manifest could not be loaded or validated.
    #[error("configuration error: {0}")]
    Config(String),

    /// The parallel executor could not be built.
    #[error("thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// The record collaborator rejected a document.
    #[error("record store error: {0}")]
    Store(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn directory(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Directory {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn link(link: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Link {
            link: link.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error came from the remote side of a run.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Error::Transfer { .. }
                | Error::Connection { .. }
                | Error::RemoteCommand { .. }
                | Error::Submission { .. }
                | Error::Status { .. }
        )
    }
}
