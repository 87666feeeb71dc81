//! Simulations: a named batch of tasks sharing inputs and an output root.
//!
//! The simulation owns the workspace, the template, the local runner
//! settings and the remote handle, and hands each task a `TaskContext`
//! built from them. Tasks are kept in insertion order and every batch
//! operation walks them in that order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use rayon::prelude::*;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::execution::{CancelToken, LocalRunner, RunnerOptions};
use crate::record::{DocumentStore, TaskRecord, UpsertOutcome};
use crate::rig::config::RemoteConfig;
use crate::rig::connection::{Connector, SshConnector};
use crate::rig::remote::RemoteHandle;
use crate::rig::scheduler::JobStatus;
use crate::task::{Execution, SyncOutcome, Task, TaskContext, TaskPhase};
use crate::template::{Params, Template};
use crate::workspace::{relative_path, validate_task_name, Workspace, DEFAULT_EXCLUDED_EXTENSIONS};


/// Name used when none is given.
pub const DEFAULT_SIMULATION_NAME: &str = "project";

/// Parameter injected by `parametrize`: the input directory relative to the
/// task directory.
pub const INPUT_DIR_PARAM: &str = "input_dir";


// ---------------------------------------------------------------------------
// TaskSpec
// ---------------------------------------------------------------------------

/// A task to add: optional name, script and the parameters it came from.
#[derive(Debug, Clone, Default)]
pub struct TaskSpec {
    pub name: Option<String>,
    pub script: Vec<String>,
    pub params: Params,
}

impl TaskSpec {
    pub fn new<S: Into<String>>(script: impl IntoIterator<Item = S>) -> Self {
        TaskSpec {
            name: None,
            script: script.into_iter().map(Into::into).collect(),
            params: Params::new(),
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }
}


// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct SimulationBuilder {
    name: String,
    template: Template,
    input_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    excluded_extensions: Vec<String>,
    runner: RunnerOptions,
    cancel: Option<CancelToken>,
    connector: Option<Arc<dyn Connector>>,
}

impl SimulationBuilder {
    pub fn new(name: &str) -> Self {
        SimulationBuilder {
            name: name.to_string(),
            template: Template::Fixed(Vec::new()),
            input_dir: None,
            output_dir: None,
            excluded_extensions: DEFAULT_EXCLUDED_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            runner: RunnerOptions::default(),
            cancel: None,
            connector: None,
        }
    }

    pub fn template(mut self, template: Template) -> Self {
        self.template = template;
        self
    }

    /// Shared input directory. Defaults to the current directory.
    pub fn input_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.input_dir = Some(dir.into());
        self
    }

    /// Output root. Defaults to a fresh temporary directory.
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn excluded_extensions(mut self, extensions: Vec<String>) -> Self {
        self.excluded_extensions = extensions;
        self
    }

    pub fn runner(mut self, options: RunnerOptions) -> Self {
        self.runner = options;
        self
    }

    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Connector for the remote session. Defaults to SSH.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn build(self) -> Result<Simulation> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("simulation name is empty".into()));
        }
        let input_dir = match self.input_dir {
            Some(dir) => dir,
            None => std::env::current_dir().map_err(|e| Error::io(".", e))?,
        };
        let workspace = Workspace::new(
            &self.name,
            &input_dir,
            self.output_dir.as_deref(),
            &self.excluded_extensions,
        )?;

        let mut runner = LocalRunner::new(self.runner);
        if let Some(token) = self.cancel {
            runner = runner.with_cancel(token);
        }
        let connector = self.connector.unwrap_or_else(|| Arc::new(SshConnector));

        tracing::info!(
            simulation = %self.name,
            input_dir = %workspace.input_dir().display(),
            output_dir = %workspace.output_root().display(),
            "simulation created"
        );
        Ok(Simulation {
            name: self.name,
            template: self.template,
            workspace: Arc::new(workspace),
            remote: RemoteHandle::new(connector),
            runner,
            tasks: IndexMap::new(),
        })
    }
}


// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Simulation {
    name: String,
    template: Template,
    workspace: Arc<Workspace>,
    remote: RemoteHandle,
    runner: LocalRunner,
    tasks: IndexMap<String, Task>,
}

impl Simulation {
    pub fn builder(name: &str) -> SimulationBuilder {
        SimulationBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn input_dir(&self) -> &Path {
        self.workspace.input_dir()
    }

    pub fn output_dir(&self) -> &Path {
        self.workspace.output_root()
    }

    /// Scratch directory on the remote host, once a session exists.
    pub fn remote_workspace(&self) -> Option<&str> {
        self.remote.session().map(|s| s.scratch_dir())
    }

    pub fn n_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name)
    }

    pub fn task_mut(&mut self, name: &str) -> Option<&mut Task> {
        self.tasks.get_mut(name)
    }

    /// Register a task. Unnamed tasks get the first free `task_{n}` name,
    /// starting at one past the current task count. An explicit name already
    /// in use is a `Precondition` error.
    pub fn add_task(&mut self, spec: TaskSpec) -> Result<&mut Task> {
        let name = match spec.name {
            Some(name) => {
                validate_task_name(&name)?;
                if self.tasks.contains_key(&name) {
                    return Err(Error::Precondition(format!(
                        "simulation '{}' already has a task named '{}'",
                        self.name, name
                    )));
                }
                name
            }
            None => self.next_task_name(),
        };
        tracing::debug!(simulation = %self.name, task = %name, commands = spec.script.len(), "task added");
        let task = Task::new(&name, spec.script, spec.params, self.task_context());
        Ok(self.tasks.entry(name).or_insert(task))
    }

    /// Render the template for `params` and register the result as a new
    /// unnamed task.
    pub fn parametrize(&mut self, params: Params) -> Result<&mut Task> {
        self.parametrize_as(None, params)
    }

    /// Like `parametrize`, with an explicit task name.
    ///
    /// Unless the caller supplies one, an `input_dir` parameter holding the
    /// input directory relative to the task directory is added before
    /// rendering.
    pub fn parametrize_as(&mut self, name: Option<&str>, mut params: Params) -> Result<&mut Task> {
        let name = match name {
            Some(name) => name.to_string(),
            None => self.next_task_name(),
        };
        if !params.contains_key(INPUT_DIR_PARAM) {
            let rel = relative_path(&self.workspace.task_dir(&name), self.workspace.input_dir());
            params.insert(
                INPUT_DIR_PARAM.to_string(),
                Value::String(rel.to_string_lossy().into_owned()),
            );
        }
        let script = self.template.render(&params)?;
        self.add_task(TaskSpec {
            name: Some(name),
            script,
            params,
        })
    }

    /// Execute every task in insertion order, one at a time. The first error
    /// stops the batch and is returned.
    pub fn execute_all(&mut self, target: Option<&RemoteConfig>) -> Result<Vec<Execution>> {
        let mut results = Vec::with_capacity(self.tasks.len());
        for task in self.tasks.values_mut() {
            results.push(task.execute(target)?);
        }
        Ok(results)
    }

    /// Execute tasks concurrently on a pool of `jobs` threads. Results are in
    /// insertion order. The remote session, if needed, is established once.
    pub fn execute_all_parallel(
        &mut self,
        target: Option<&RemoteConfig>,
        jobs: usize,
    ) -> Result<Vec<Execution>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs.max(1))
            .thread_name(|i| format!("simrig-task-{}", i))
            .build()?;
        let tasks = &mut self.tasks;
        pool.install(|| {
            tasks
                .par_values_mut()
                .map(|task| task.execute(target))
                .collect()
        })
    }

    /// Pull every task's remote results. Without a remote session this is a
    /// no-op per task.
    pub fn sync_all(&self) -> Result<Vec<SyncOutcome>> {
        self.tasks.values().map(Task::sync).collect()
    }

    /// Poll every submitted task once.
    pub fn poll_all(&mut self) -> Result<Vec<JobStatus>> {
        let mut statuses = Vec::new();
        for task in self.tasks.values_mut() {
            if task.phase() == TaskPhase::Submitted {
                statuses.push(task.poll()?);
            }
        }
        Ok(statuses)
    }

    /// Whether no task is still waiting on the scheduler.
    pub fn all_finished(&self) -> bool {
        self.tasks.values().all(|t| t.phase() != TaskPhase::Submitted)
    }

    pub fn records(&self) -> Vec<TaskRecord> {
        self.tasks.values().map(Task::record).collect()
    }

    /// Upsert every task's record into `store`. Returns how many documents
    /// were inserted or updated.
    pub fn record_all(&self, store: &dyn DocumentStore, update_duplicates: bool) -> Result<usize> {
        let mut changed = 0;
        for record in self.records() {
            match store.upsert(&record.to_document(), update_duplicates)? {
                UpsertOutcome::Inserted | UpsertOutcome::Updated => changed += 1,
                UpsertOutcome::Ambiguous => {}
            }
        }
        Ok(changed)
    }

    fn next_task_name(&self) -> String {
        let mut n = self.tasks.len() + 1;
        loop {
            let name = format!("task_{}", n);
            if !self.tasks.contains_key(&name) {
                return name;
            }
            n += 1;
        }
    }

    fn task_context(&self) -> TaskContext {
        TaskContext {
            simulation: self.name.clone(),
            workspace: Arc::clone(&self.workspace),
            remote: self.remote.clone(),
            runner: self.runner.clone(),
        }
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
