//! Remote host capabilities: command execution and file transfer.
//!
//! Everything the rig layer needs from a remote host goes through the
//! `RemoteShell` trait, so sessions can be driven by the SSH implementation
//! here or by the scripted double in `rig::mock`. A `Connector` opens shells;
//! the simulation holds one and calls it at most once.
//!
//! `SshShell` spawns the system `ssh` and `rsync` binaries with argument
//! vectors built from `RemoteConfig`; authentication is whatever the local
//! SSH setup provides (agent, key file). No interactive prompts: `BatchMode`
//! makes them fail.

use std::io::Write;
use std::process::{Command, Output, Stdio};
use std::thread;

use crate::error::{Error, Result};
use crate::rig::config::RemoteConfig;


/// Exit status `ssh` uses for its own failures (as opposed to the remote
/// command's).
const SSH_FAILURE_STATUS: i32 = 255;


// ---------------------------------------------------------------------------
// RemoteOutput
// ---------------------------------------------------------------------------

/// Captured result of a remote command or transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit status, when the process exited normally.
    pub status: Option<i32>,
}

impl RemoteOutput {
    /// Successful output with the given stdout.
    pub fn ok(stdout: &str) -> Self {
        RemoteOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            status: Some(0),
        }
    }

    /// Output that wrote `stderr` to the error stream.
    pub fn err(stderr: &str) -> Self {
        RemoteOutput {
            stdout: String::new(),
            stderr: stderr.to_string(),
            status: Some(1),
        }
    }

    /// Whether anything besides whitespace reached the error stream.
    pub fn has_stderr(&self) -> bool {
        !self.stderr.trim().is_empty()
    }

    fn from_process(output: Output) -> Self {
        RemoteOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            status: output.status.code(),
        }
    }
}


// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// One authenticated connection to a remote host.
pub trait RemoteShell: Send + Sync {
    /// The configuration this shell was opened with.
    fn config(&self) -> &RemoteConfig;

    /// Run `command` through the remote user's shell.
    fn exec(&self, command: &str) -> Result<RemoteOutput>;

    /// Run `command` with `input` on its standard input.
    fn exec_with_input(&self, command: &str, input: &[u8]) -> Result<RemoteOutput>;

    /// Run the transfer tool locally with `args` (endpoints included).
    fn transfer(&self, args: &[String]) -> Result<RemoteOutput>;
}

/// Opens `RemoteShell`s.
pub trait Connector: Send + Sync {
    /// Authenticate against `config.host`. Fails with `Connection` when the
    /// host is unreachable or refuses the credentials.
    fn connect(&self, config: &RemoteConfig) -> Result<Box<dyn RemoteShell>>;
}


// ---------------------------------------------------------------------------
// SSH implementation
// ---------------------------------------------------------------------------

/// Connector that opens `SshShell`s after a round-trip check.
#[derive(Debug, Clone, Copy, Default)]
pub struct SshConnector;

impl Connector for SshConnector {
    fn connect(&self, config: &RemoteConfig) -> Result<Box<dyn RemoteShell>> {
        config.validate()?;
        let shell = SshShell::new(config.clone());
        let reply = shell.exec("echo ok")?;
        if reply.stdout.trim() != "ok" {
            return Err(Error::Connection {
                host: config.host.clone(),
                reason: format!("unexpected check response: {}", reply.stdout.trim()),
            });
        }
        tracing::info!(host = %config.host, user = %config.user, "connected");
        Ok(Box::new(shell))
    }
}

/// `RemoteShell` backed by the `ssh` and `rsync` executables.
#[derive(Debug, Clone)]
pub struct SshShell {
    config: RemoteConfig,
}

impl SshShell {
    pub fn new(config: RemoteConfig) -> Self {
        SshShell { config }
    }

    /// The `ssh` invocation that runs `command` remotely.
    pub fn ssh_command(&self, command: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(self.config.ssh_base_args()).arg(command);
        cmd
    }

    fn finish(&self, output: RemoteOutput) -> Result<RemoteOutput> {
        if output.status == Some(SSH_FAILURE_STATUS) {
            return Err(Error::Connection {
                host: self.config.host.clone(),
                reason: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }

    fn connection_error(&self, err: std::io::Error) -> Error {
        Error::Connection {
            host: self.config.host.clone(),
            reason: format!("cannot run ssh: {}", err),
        }
    }
}

impl RemoteShell for SshShell {
    fn config(&self) -> &RemoteConfig {
        &self.config
    }

    fn exec(&self, command: &str) -> Result<RemoteOutput> {
        tracing::debug!(host = %self.config.host, command = %command, "ssh exec");
        let output = self
            .ssh_command(command)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| self.connection_error(e))?;
        self.finish(RemoteOutput::from_process(output))
    }

    fn exec_with_input(&self, command: &str, input: &[u8]) -> Result<RemoteOutput> {
        tracing::debug!(host = %self.config.host, command = %command, bytes = input.len(), "ssh exec with input");
        let mut child = self
            .ssh_command(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.connection_error(e))?;

        let writer = child.stdin.take().map(|mut stdin| {
            let input = input.to_vec();
            thread::spawn(move || stdin.write_all(&input))
        });
        let output = child
            .wait_with_output()
            .map_err(|e| self.connection_error(e))?;
        if let Some(writer) = writer {
            if let Ok(Err(e)) = writer.join() {
                tracing::warn!(error = %e, "remote stdin closed early");
            }
        }
        self.finish(RemoteOutput::from_process(output))
    }

    fn transfer(&self, args: &[String]) -> Result<RemoteOutput> {
        let output = Command::new("rsync")
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::Transfer {
                endpoint: self.config.user_at_host(),
                detail: format!("cannot run rsync: {}", e),
            })?;
        Ok(RemoteOutput::from_process(output))
    }
}


/// Quote `text` for a POSIX shell: single quotes, with embedded single quotes
/// spliced as `'\''`. Plain words are left unquoted.
pub fn shell_quote(text: &str) -> String {
    let plain = !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | ':' | '=' | '+' | ','));
    if plain {
        text.to_string()
    } else {
        format!("'{}'", text.replace('\'', r"'\''"))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssh_command_ends_with_remote_command() {
        let shell = SshShell::new(RemoteConfig::new("hpc", "alice"));
        let cmd = shell.ssh_command("mktemp -d");
        assert_eq!(cmd.get_program(), "ssh");
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args[args.len() - 2], "alice@hpc");
        assert_eq!(args[args.len() - 1], "mktemp -d");
    }

    #[test]
    fn ssh_failure_status_is_a_connection_error() {
        let shell = SshShell::new(RemoteConfig::new("hpc", "alice"));
        let out = RemoteOutput {
            stdout: String::new(),
            stderr: "ssh: connect to host hpc port 22: Connection refused\n".into(),
            status: Some(255),
        };
        match shell.finish(out) {
            Err(Error::Connection { host, reason }) => {
                assert_eq!(host, "hpc");
                assert!(reason.contains("Connection refused"));
            }
            other => panic!("expected connection error, got {:?}", other),
        }
    }

    #[test]
    fn remote_command_failure_is_not_a_connection_error() {
        let shell = SshShell::new(RemoteConfig::new("hpc", "alice"));
        let out = shell.finish(RemoteOutput::err("qstat: Unknown Job Id\n")).unwrap();
        assert!(out.has_stderr());
    }

    #[test]
    fn whitespace_only_stderr_is_ignored() {
        let out = RemoteOutput {
            stdout: "x".into(),
            stderr: " \n".into(),
            status: Some(0),
        };
        assert!(!out.has_stderr());
    }

    #[test]
    fn shell_quoting() {
        assert_eq!(shell_quote("/home/alice/simrig_ab12"), "/home/alice/simrig_ab12");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }
}
