//! YAML simulation manifests.
//!
//! A manifest describes a whole run: where inputs live, where outputs go,
//! the command template, one parameter set per task, local runner settings
//! and an optional remote host.
//!
//! ```yaml
//! name: shear
//! input_dir: inputs
//! template:
//!   - gmx grompp -f {mdp} -c {input_dir}/conf.gro
//!   - gmx mdrun -nsteps {steps}
//! tasks:
//!   - name: short
//!     params: {mdp: em.mdp, steps: 500}
//!   - params: {mdp: em.mdp, steps: 5000}
//! remote:
//!   host: cluster.example.org
//!   user: alice
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::execution::RunnerOptions;
use crate::rig::config::RemoteConfig;
use crate::simulation::{Simulation, SimulationBuilder, INPUT_DIR_PARAM};
use crate::template::{Params, Template};
use crate::workspace::{validate_task_name, DEFAULT_EXCLUDED_EXTENSIONS};


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationManifest {
    pub name: String,

    /// Shared input directory. Relative paths are taken from the manifest's
    /// directory when loaded with [`load`].
    pub input_dir: PathBuf,

    /// Output root. A temporary directory is allocated when absent.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    /// Input files with these extensions are not linked into task directories.
    #[serde(default = "default_excluded_extensions")]
    pub excluded_extensions: Vec<String>,

    /// Command lines with `{name}` placeholders.
    pub template: Vec<String>,

    #[serde(default)]
    pub tasks: Vec<TaskEntry>,

    #[serde(default)]
    pub runner: RunnerOptions,

    #[serde(default)]
    pub remote: Option<RemoteConfig>,
}

/// One task of a manifest: an optional name and its template parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub params: Params,
}

fn default_excluded_extensions() -> Vec<String> {
    DEFAULT_EXCLUDED_EXTENSIONS.iter().map(|s| s.to_string()).collect()
}


/// Read, resolve and validate a manifest file.
pub fn load(path: &Path) -> Result<SimulationManifest> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read '{}': {}", path.display(), e)))?;
    let mut manifest: SimulationManifest = serde_yaml::from_str(&content).map_err(|e| {
        Error::Config(format!("invalid simulation manifest '{}': {}", path.display(), e))
    })?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    manifest.resolve_paths(base);
    manifest.validate()?;
    Ok(manifest)
}

/// Parse a manifest from YAML text. Paths are left as written.
pub fn parse(content: &str) -> Result<SimulationManifest> {
    serde_yaml::from_str(content)
        .map_err(|e| Error::Config(format!("invalid simulation manifest: {}", e)))
}


impl SimulationManifest {
    /// Make relative `input_dir`/`output_dir` relative to `base` instead of
    /// the process working directory.
    pub fn resolve_paths(&mut self, base: &Path) {
        if self.input_dir.is_relative() {
            self.input_dir = base.join(&self.input_dir);
        }
        if let Some(out) = self.output_dir.as_mut() {
            if out.is_relative() {
                *out = base.join(&*out);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("manifest name is empty".into()));
        }
        if self.template.is_empty() {
            return Err(Error::Config(format!(
                "manifest '{}' has an empty template",
                self.name
            )));
        }
        let placeholders = self.template().placeholders();
        let mut seen = HashSet::new();
        for (index, entry) in self.tasks.iter().enumerate() {
            if let Some(name) = &entry.name {
                validate_task_name(name).map_err(|e| Error::Config(e.to_string()))?;
                if !seen.insert(name.as_str()) {
                    return Err(Error::Config(format!("task '{}' is listed twice", name)));
                }
            }
            let missing = placeholders
                .iter()
                .find(|p| p.as_str() != INPUT_DIR_PARAM && !entry.params.contains_key(p.as_str()));
            if let Some(placeholder) = missing {
                let label = entry.name.clone().unwrap_or_else(|| format!("#{}", index + 1));
                return Err(Error::Config(format!(
                    "task {} has no value for placeholder {{{}}}",
                    label, placeholder
                )));
            }
        }
        if let Some(remote) = &self.remote {
            remote.validate()?;
        }
        Ok(())
    }

    pub fn template(&self) -> Template {
        Template::fixed(self.template.iter().cloned())
    }

    /// Builder carrying every setting of the manifest. Callers may still
    /// swap the connector or add a cancel token before building.
    pub fn simulation_builder(&self) -> SimulationBuilder {
        let mut builder = Simulation::builder(&self.name)
            .template(self.template())
            .input_dir(&self.input_dir)
            .excluded_extensions(self.excluded_extensions.clone())
            .runner(self.runner.clone());
        if let Some(out) = &self.output_dir {
            builder = builder.output_dir(out);
        }
        builder
    }

    pub fn build(&self) -> Result<Simulation> {
        self.build_from(self.simulation_builder())
    }

    /// Build the simulation from `builder` and register one task per entry,
    /// in manifest order.
    pub fn build_from(&self, builder: SimulationBuilder) -> Result<Simulation> {
        let mut sim = builder.build()?;
        for entry in &self.tasks {
            sim.parametrize_as(entry.name.as_deref(), entry.params.clone())?;
        }
        tracing::debug!(simulation = %self.name, tasks = sim.n_tasks(), "manifest loaded");
        Ok(sim)
    }
}
