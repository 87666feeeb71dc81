//! Remote host and batch scheduler configuration.
//!
//! `RemoteConfig` describes where a simulation's remote jobs run (SSH
//! coordinates plus the prefix of the scratch directory created there).
//! `SchedulerConfig` holds the queue-submission settings and the scheduler
//! command names; the defaults follow PBS/Torque conventions.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};


/// Default wall-clock limit written into submission descriptors.
pub const DEFAULT_WALLTIME: &str = "96:00:00";


// ---------------------------------------------------------------------------
// RemoteConfig
// ---------------------------------------------------------------------------

/// Configuration for a single remote compute host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Hostname or IP address.
    pub host: String,
    /// SSH user.
    pub user: String,
    /// SSH port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Path to an SSH private key, if not using the agent/default key.
    #[serde(default)]
    pub ssh_key: Option<String>,
    /// Prefix of the scratch directory created in the remote home directory.
    #[serde(default = "default_scratch_prefix")]
    pub scratch_prefix: String,
    /// Batch scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

fn default_port() -> u16 {
    22
}

fn default_scratch_prefix() -> String {
    "simrig_".to_string()
}

impl RemoteConfig {
    /// Config with default port, no key and default scheduler settings.
    pub fn new(host: &str, user: &str) -> Self {
        RemoteConfig {
            host: host.to_string(),
            user: user.to_string(),
            port: default_port(),
            ssh_key: None,
            scratch_prefix: default_scratch_prefix(),
            scheduler: SchedulerConfig::default(),
        }
    }

    /// Build the `user@host` string used in SSH/rsync commands.
    pub fn user_at_host(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// Base SSH arguments (port, options, key, user@host) without a command.
    ///
    /// `BatchMode` makes a missing key fail fast instead of prompting.
    pub fn ssh_base_args(&self) -> Vec<String> {
        let mut args = self.ssh_option_args();
        args.push(self.user_at_host());
        args
    }

    /// The `ssh ...` transport string handed to rsync's `-e`.
    pub fn rsync_shell(&self) -> String {
        let mut shell = vec!["ssh".to_string()];
        shell.extend(self.ssh_option_args());
        shell.join(" ")
    }

    fn ssh_option_args(&self) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            self.port.to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "ConnectTimeout=10".to_string(),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
        ];
        if let Some(ref key) = self.ssh_key {
            args.push("-i".to_string());
            args.push(key.clone());
        }
        args
    }

    /// Reject configurations that cannot possibly connect.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("remote host is empty".into()));
        }
        if self.user.trim().is_empty() {
            return Err(Error::Config("remote user is empty".into()));
        }
        if self.scratch_prefix.contains('/') {
            return Err(Error::Config(format!(
                "scratch prefix '{}' must not contain '/'",
                self.scratch_prefix
            )));
        }
        self.scheduler.walltime()?;
        Ok(())
    }
}


// ---------------------------------------------------------------------------
// SchedulerConfig
// ---------------------------------------------------------------------------

/// Queue-submission header fields and scheduler commands.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Prefix of header directive lines.
    pub directive: String,
    /// Resource request (`-l` value).
    pub resources: String,
    /// Wall-clock limit as `HH:MM:SS`.
    pub walltime: String,
    /// Queue name; omitted from the header when unset.
    pub queue: Option<String>,
    /// Submission program, given the descriptor path as last argument.
    pub submit_command: String,
    /// Status program, given the job id as last argument.
    pub status_command: String,
    /// Cancel program, given the job id as last argument.
    pub cancel_command: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            directive: "#PBS".to_string(),
            resources: "nodes=1:ppn=1".to_string(),
            walltime: DEFAULT_WALLTIME.to_string(),
            queue: None,
            submit_command: "qsub".to_string(),
            status_command: "qstat -f".to_string(),
            cancel_command: "qdel".to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Parsed wall-clock limit.
    pub fn walltime(&self) -> Result<Duration> {
        parse_walltime(&self.walltime)
    }
}


// ---------------------------------------------------------------------------
// Walltime
// ---------------------------------------------------------------------------

/// Parse `HH:MM:SS`, `MM:SS` or plain seconds. Hours may exceed 24.
pub fn parse_walltime(text: &str) -> Result<Duration> {
    let bad = || Error::Config(format!("invalid walltime '{}'", text));
    let parts: Vec<&str> = text.trim().split(':').collect();
    if parts.is_empty() || parts.len() > 3 {
        return Err(bad());
    }
    let mut values = Vec::with_capacity(parts.len());
    for part in &parts {
        values.push(part.parse::<u64>().map_err(|_| bad())?);
    }
    // Minutes and seconds fields must stay below 60 once a larger unit exists.
    if values.len() > 1 && values[1..].iter().any(|v| *v >= 60) {
        return Err(bad());
    }
    let secs = values.iter().fold(0u64, |acc, v| acc * 60 + v);
    Ok(Duration::from_secs(secs))
}

/// Format a duration as `HH:MM:SS` (hours unbounded).
pub fn format_walltime(walltime: Duration) -> String {
    let total = walltime.as_secs();
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config_with_key() -> RemoteConfig {
        RemoteConfig {
            host: "10.0.0.1".to_string(),
            user: "deploy".to_string(),
            port: 2222,
            ssh_key: Some("/keys/hpc.pem".to_string()),
            scratch_prefix: "simrig_".to_string(),
            scheduler: SchedulerConfig::default(),
        }
    }

    #[test]
    fn user_at_host() {
        assert_eq!(RemoteConfig::new("hpc", "alice").user_at_host(), "alice@hpc");
    }

    #[test]
    fn ssh_args_default_port() {
        let args = RemoteConfig::new("hpc", "alice").ssh_base_args();
        assert_eq!(args[0], "-p");
        assert_eq!(args[1], "22");
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert_eq!(args.last().unwrap(), "alice@hpc");
        assert!(!args.contains(&"-i".to_string()));
    }

    #[test]
    fn ssh_args_with_key() {
        let args = test_config_with_key().ssh_base_args();
        let idx = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[idx + 1], "/keys/hpc.pem");
        assert_eq!(args[1], "2222");
    }

    #[test]
    fn rsync_shell_has_no_destination() {
        let shell = test_config_with_key().rsync_shell();
        assert!(shell.starts_with("ssh -p 2222"));
        assert!(shell.contains("-i /keys/hpc.pem"));
        assert!(!shell.contains("deploy@"));
    }

    #[test]
    fn yaml_defaults_fill_in() {
        let yaml = "host: hpc.example.org\nuser: alice\n";
        let config: RemoteConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.port, 22);
        assert_eq!(config.scratch_prefix, "simrig_");
        assert_eq!(config.scheduler, SchedulerConfig::default());
    }

    #[test]
    fn yaml_scheduler_overrides() {
        let yaml = "host: h\nuser: u\nscheduler:\n  queue: gpu\n  walltime: \"12:00:00\"\n";
        let config: RemoteConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.scheduler.queue.as_deref(), Some("gpu"));
        assert_eq!(config.scheduler.submit_command, "qsub");
        assert_eq!(config.scheduler.walltime().unwrap(), Duration::from_secs(12 * 3600));
    }

    #[test]
    fn validate_rejects_empty_host() {
        assert!(RemoteConfig::new("", "u").validate().is_err());
        assert!(RemoteConfig::new("h", "u").validate().is_ok());
    }

    #[test]
    fn walltime_parsing() {
        assert_eq!(parse_walltime("96:00:00").unwrap(), Duration::from_secs(96 * 3600));
        assert_eq!(parse_walltime("1:30").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_walltime("45").unwrap(), Duration::from_secs(45));
        assert!(parse_walltime("1:60:00").is_err());
        assert!(parse_walltime("abc").is_err());
        assert!(parse_walltime("1:2:3:4").is_err());
    }

    #[test]
    fn walltime_formatting() {
        assert_eq!(format_walltime(Duration::from_secs(96 * 3600)), "96:00:00");
        assert_eq!(format_walltime(Duration::from_secs(3661)), "01:01:01");
    }
}
