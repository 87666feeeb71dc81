//! Simrig CLI: run a simulation manifest locally or on a batch-queue host.
//!
//! # Usage
//!
//! ```text
//! simrig run shear.yaml --local
//! simrig run shear.yaml --jobs 4 --wait --records runs.jsonl
//! simrig plan shear.yaml
//! ```

use std::path::{Path, PathBuf};
use std::process;
use std::thread;
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand};
use serde_json::json;

use simrig_core::config::{self, SimulationManifest};
use simrig_core::record::JsonlStore;
use simrig_core::{logging, Execution, Result, Simulation};


#[derive(Debug, Parser)]
#[command(name = "simrig", version, about = "Run scripted simulation tasks locally or on a PBS host")]
struct Cli {
    /// Increase log detail (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Append log output to this file.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Execute every task of a manifest, then pull remote results.
    Run {
        manifest: PathBuf,

        /// Run here even if the manifest names a remote host.
        #[arg(long)]
        local: bool,

        /// Tasks to execute concurrently.
        #[arg(long, default_value_t = 1)]
        jobs: usize,

        /// Poll the scheduler until every submitted job has finished.
        #[arg(long)]
        wait: bool,

        /// Seconds between scheduler polls with --wait.
        #[arg(long, default_value_t = 60)]
        poll_secs: u64,

        /// Upsert one record per task into this JSON-lines file.
        #[arg(long)]
        records: Option<PathBuf>,
    },

    /// Print each task's rendered script without executing anything.
    Plan {
        manifest: PathBuf,

        /// Emit JSON instead of text.
        #[arg(long)]
        json: bool,
    },
}


fn main() {
    let cli = Cli::parse();
    let result = match &cli.command {
        Commands::Run {
            manifest,
            local,
            jobs,
            wait,
            poll_secs,
            records,
        } => {
            let opts = RunOptions {
                local: *local,
                jobs: *jobs,
                wait: *wait,
                poll: Duration::from_secs((*poll_secs).max(1)),
                records: records.clone(),
            };
            run(&cli, manifest, &opts)
        }
        Commands::Plan { manifest, json } => plan(&cli, manifest, *json),
    };

    if let Err(e) = result {
        eprintln!("simrig: {}", e);
        process::exit(1);
    }
}


struct RunOptions {
    local: bool,
    jobs: usize,
    wait: bool,
    poll: Duration,
    records: Option<PathBuf>,
}

fn run(cli: &Cli, manifest_path: &Path, opts: &RunOptions) -> Result<()> {
    let manifest = config::load(manifest_path)?;
    let mut sim = manifest.build()?;

    let log_file = cli
        .log_file
        .clone()
        .unwrap_or_else(|| sim.output_dir().join(format!("{}.log", sim.name())));
    logging::init(cli.verbose, Some(&log_file))?;
    tracing::info!(simulation = %sim.name(), tasks = sim.n_tasks(), log = %log_file.display(), "starting run");

    let target = if opts.local { None } else { manifest.remote.as_ref() };
    let executions = if opts.jobs > 1 {
        sim.execute_all_parallel(target, opts.jobs)?
    } else {
        sim.execute_all(target)?
    };
    for (name, execution) in sim.task_names().zip(&executions) {
        println!("{:<24} {}", name, describe(execution));
    }

    let mut waited = Ok(());
    if target.is_some() {
        if opts.wait {
            waited = wait_for_jobs(&mut sim, opts.poll);
            if let Err(e) = &waited {
                tracing::error!(error = %e, "stopped waiting for jobs; pulling what exists");
            }
        }
        sim.sync_all()?;
        if let Some(dir) = sim.remote_workspace() {
            println!("results pulled from {}", dir);
        }
    }

    if let Some(path) = &opts.records {
        let store = JsonlStore::open(path);
        let written = sim.record_all(&store, true)?;
        println!("{} record(s) written to {}", written, path.display());
    }
    println!("output: {}", sim.output_dir().display());
    waited
}

fn wait_for_jobs(sim: &mut Simulation, poll: Duration) -> Result<()> {
    while !sim.all_finished() {
        thread::sleep(poll);
        for status in sim.poll_all()? {
            tracing::debug!(job_id = %status.job_id, state = ?status.state(), "polled");
        }
    }
    tracing::info!("all submitted jobs finished");
    Ok(())
}

fn describe(execution: &Execution) -> String {
    match execution {
        Execution::Local(result) => {
            let failed = result.outcomes.iter().filter(|o| !o.success()).count();
            let mut text = format!("completed, {} command(s)", result.outcomes.len());
            if failed > 0 {
                text.push_str(&format!(", {} failed", failed));
            }
            if !result.skipped.is_empty() {
                text.push_str(&format!(", {} skipped", result.skipped.len()));
            }
            text
        }
        Execution::Submitted { job_id } => format!("submitted as job {}", job_id),
    }
}


fn plan(cli: &Cli, manifest_path: &Path, as_json: bool) -> Result<()> {
    logging::init(cli.verbose, cli.log_file.as_deref())?;
    let manifest = config::load(manifest_path)?;
    let sim = manifest.build()?;

    let mut entries = Vec::new();
    for task in sim.tasks() {
        let descriptor = descriptor_for(&manifest, task)?;
        if as_json {
            entries.push(json!({
                "task": task.name(),
                "script": task.script(),
                "params": task.params(),
                "descriptor": descriptor,
            }));
            continue;
        }
        println!("# {}", task.name());
        for line in task.script() {
            println!("{}", line);
        }
        if let Some(text) = descriptor {
            println!("# descriptor");
            print!("{}", text);
        }
        println!();
    }
    if as_json {
        println!("{}", serde_json::Value::Array(entries));
    }
    Ok(())
}

fn descriptor_for(manifest: &SimulationManifest, task: &simrig_core::Task) -> Result<Option<String>> {
    match &manifest.remote {
        Some(remote) => task.descriptor(remote).map(Some),
        None => Ok(None),
    }
}
