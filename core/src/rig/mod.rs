//! Remote execution (the "rig" subsystem).
//!
//! Host and scheduler configuration, the remote capability trait with its
//! SSH/rsync implementation, transfer argument building, scheduler text
//! formats, and the per-simulation `RemoteSession` built on top of them.

pub mod config;
pub mod connection;
pub mod mock;
pub mod remote;
pub mod scheduler;
pub mod sync;

pub use config::{RemoteConfig, SchedulerConfig};
pub use connection::{Connector, RemoteOutput, RemoteShell, SshConnector};
pub use remote::{RemoteHandle, RemoteSession};
pub use scheduler::{JobState, JobStatus};
