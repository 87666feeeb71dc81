//! Simrig core: scripted simulation tasks, run locally or on a batch-queue
//! host over SSH.
//!
//! A [`Simulation`] owns an output workspace and an ordered set of
//! [`Task`]s. Each task is staged into its own directory (input files are
//! linked, never copied), then either run here by the [`LocalRunner`] or
//! mirrored to a shared remote scratch directory and submitted to the
//! scheduler through a [`RemoteSession`].

pub mod config;
pub mod error;
pub mod execution;
pub mod logging;
pub mod record;
pub mod rig;
pub mod simulation;
pub mod task;
pub mod template;
pub mod workspace;

pub use error::{Error, Result};
pub use execution::{LocalRunner, RunResult, RunnerOptions};
pub use rig::{RemoteConfig, RemoteSession, SchedulerConfig};
pub use simulation::{Simulation, SimulationBuilder, TaskSpec};
pub use task::{Execution, SyncOutcome, Task, TaskPhase};
pub use template::{Params, Template};
pub use workspace::Workspace;
