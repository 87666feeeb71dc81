//! Simulation workspaces on the local filesystem.
//!
//! A `Workspace` owns two locations: the shared input directory and the output
//! root that holds one subdirectory per task. Staging a task links every input
//! file into its directory through a *relative* symbolic link, so the whole
//! output tree can be moved or mirrored to another host without rewriting
//! links and without copying input data.
//!
//! Layout produced under the output root:
//!
//! ```text
//! {output_root}/{task}/            staged inputs + task outputs
//! {output_root}/{task}_stdout.txt  append-only
//! {output_root}/{task}_stderr.txt  append-only
//! ```

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};


/// Extensions of files in the input directory that are never staged.
pub const DEFAULT_EXCLUDED_EXTENSIONS: &[&str] = &["py", "ipynb"];

/// Prefix of the temporary directory allocated when no output path is given.
pub const TEMP_ROOT_PREFIX: &str = "simrig_";


// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

/// Input directory plus output root of one simulation.
#[derive(Debug, Clone)]
pub struct Workspace {
    input_dir: PathBuf,
    output_root: PathBuf,
    excluded_extensions: Vec<String>,
}

impl Workspace {
    /// Open a workspace for the simulation `name`.
    ///
    /// The input directory must exist. The output root is created through
    /// [`create_output_root`], so it exists once this returns.
    pub fn new(
        name: &str,
        input_dir: &Path,
        output_dir: Option<&Path>,
        excluded_extensions: &[String],
    ) -> Result<Self> {
        let input_dir = fs::canonicalize(input_dir)
            .map_err(|e| Error::directory(input_dir, format!("input directory: {}", e)))?;
        if !input_dir.is_dir() {
            return Err(Error::directory(&input_dir, "input path is not a directory"));
        }
        let output_root = create_output_root(name, output_dir)?;
        Ok(Workspace {
            input_dir,
            output_root,
            excluded_extensions: excluded_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_string())
                .collect(),
        })
    }

    /// Absolute path of the shared input directory.
    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    /// Absolute path of the output root.
    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Directory of a single task. Not created by this call.
    pub fn task_dir(&self, task: &str) -> PathBuf {
        self.output_root.join(task)
    }

    /// Append-only standard output log of a task.
    pub fn stdout_log(&self, task: &str) -> PathBuf {
        self.output_root.join(format!("{}_stdout.txt", task))
    }

    /// Append-only standard error log of a task.
    pub fn stderr_log(&self, task: &str) -> PathBuf {
        self.output_root.join(format!("{}_stderr.txt", task))
    }

    /// Current set of input files. Re-read on every call since rendering a
    /// task's template may add inputs.
    pub fn input_files(&self) -> Result<Vec<PathBuf>> {
        discover_inputs(&self.input_dir, &self.excluded_extensions, &self.output_root)
    }

    /// Create the task directory and link every current input file into it.
    pub fn stage_task(&self, task: &str) -> Result<PathBuf> {
        validate_task_name(task)?;
        let inputs = self.input_files()?;
        stage_task_dir(task, &self.output_root, &inputs)
    }
}


// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Create (or adopt) the output root of a simulation.
///
/// Without an explicit path, a fresh `simrig_*` directory is allocated under
/// the system temp dir and `{name}` is created inside it. The temp directory
/// is kept after the process exits. An explicit path is created if missing;
/// an existing non-directory is a `Directory` error.
pub fn create_output_root(name: &str, explicit: Option<&Path>) -> Result<PathBuf> {
    let root = match explicit {
        None => {
            let tmp = tempfile::Builder::new()
                .prefix(TEMP_ROOT_PREFIX)
                .tempdir()
                .map_err(|e| Error::directory(std::env::temp_dir(), e.to_string()))?
                .keep();
            let root = tmp.join(name);
            fs::create_dir(&root).map_err(|e| Error::directory(&root, e.to_string()))?;
            root
        }
        Some(path) => {
            match fs::metadata(path) {
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => {
                    return Err(Error::directory(path, "exists but is not a directory"));
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    fs::create_dir_all(path)
                        .map_err(|e| Error::directory(path, e.to_string()))?;
                }
                Err(e) => return Err(Error::directory(path, e.to_string())),
            }
            path.to_path_buf()
        }
    };
    fs::canonicalize(&root).map_err(|e| Error::directory(&root, e.to_string()))
}

/// List the immediate children of `input_dir` that count as input data.
///
/// Hidden entries, entries whose extension is in `excluded_extensions`, and
/// the output root itself (when nested under the input directory) are left
/// out. The result is sorted by file name.
pub fn discover_inputs(
    input_dir: &Path,
    excluded_extensions: &[String],
    output_root: &Path,
) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(input_dir)
        .map_err(|e| Error::directory(input_dir, format!("cannot list inputs: {}", e)))?;
    let output_root = fs::canonicalize(output_root).unwrap_or_else(|_| output_root.to_path_buf());

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(input_dir, e))?;
        let path = entry.path();
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        let excluded = path
            .extension()
            .map(|ext| excluded_extensions.iter().any(|x| ext == x.as_str()))
            .unwrap_or(false);
        if excluded {
            continue;
        }
        if path == output_root || fs::canonicalize(&path).map(|p| p == output_root).unwrap_or(false)
        {
            continue;
        }
        files.push(path);
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Create `{output_root}/{task_name}` and link each input into it.
///
/// Idempotent: an existing directory is reused and a link that already points
/// at the right target is left alone. Two distinct inputs sharing a file name,
/// or an existing entry that is not the expected link, is a `Link` error.
pub fn stage_task_dir(task_name: &str, output_root: &Path, inputs: &[PathBuf]) -> Result<PathBuf> {
    let task_dir = output_root.join(task_name);
    match fs::metadata(&task_dir) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => return Err(Error::directory(&task_dir, "exists but is not a directory")),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            fs::create_dir_all(&task_dir)
                .map_err(|e| Error::directory(&task_dir, e.to_string()))?;
        }
        Err(e) => return Err(Error::directory(&task_dir, e.to_string())),
    }

    let mut seen: HashMap<OsString, &Path> = HashMap::new();
    for input in inputs {
        let file_name = input
            .file_name()
            .ok_or_else(|| Error::link(input, "input has no file name"))?;
        let link = task_dir.join(file_name);
        if let Some(previous) = seen.insert(file_name.to_os_string(), input.as_path()) {
            if previous != input.as_path() {
                return Err(Error::link(
                    &link,
                    format!(
                        "{} and {} map to the same name",
                        previous.display(),
                        input.display()
                    ),
                ));
            }
            continue;
        }

        let target = relative_path(&task_dir, input);
        match fs::symlink_metadata(&link) {
            Ok(meta) if meta.file_type().is_symlink() => {
                let existing = fs::read_link(&link).map_err(|e| Error::link(&link, e.to_string()))?;
                if existing != target {
                    return Err(Error::link(
                        &link,
                        format!("already links to {}", existing.display()),
                    ));
                }
            }
            Ok(_) => return Err(Error::link(&link, "a non-link entry already exists")),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                symlink(&target, &link).map_err(|e| Error::link(&link, e.to_string()))?;
            }
            Err(e) => return Err(Error::link(&link, e.to_string())),
        }
    }
    Ok(task_dir)
}

/// Path of `to` relative to the directory `from_dir`. Both must be absolute.
pub fn relative_path(from_dir: &Path, to: &Path) -> PathBuf {
    let from: Vec<Component> = from_dir.components().collect();
    let target: Vec<Component> = to.components().collect();
    let common = from
        .iter()
        .zip(target.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = PathBuf::new();
    for _ in common..from.len() {
        rel.push("..");
    }
    for part in &target[common..] {
        rel.push(part.as_os_str());
    }
    if rel.as_os_str().is_empty() {
        rel.push(".");
    }
    rel
}

/// Task names become directory and file names, so they must be one plain
/// path component.
pub fn validate_task_name(name: &str) -> Result<()> {
    let plain = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0');
    if plain {
        Ok(())
    } else {
        Err(Error::Precondition(format!("invalid task name '{}'", name)))
    }
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
