//! Local execution: command-line splitting, process pipelines and output capture.

pub mod command_line;
pub mod local;
pub mod output;

pub use local::{CancelToken, CommandOutcome, FailurePolicy, LocalRunner, RunResult, RunnerOptions, Termination};
pub use output::{BannerRule, TaskLog};
