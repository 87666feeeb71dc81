//! Task records and the document stores that keep them.
//!
//! A record is one flat JSON object per task: its parameters plus the
//! resolved input and output directories and the task/simulation names.
//! Stores match documents by containment: a stored document matches `doc`
//! when it carries every field of `doc` with an equal value.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::template::Params;


/// A flat JSON object.
pub type Document = Map<String, Value>;

/// Field stamped on documents changed by an upsert.
pub const LAST_MODIFIED_FIELD: &str = "lastModified";


// ---------------------------------------------------------------------------
// TaskRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub simulation: String,
    pub task: String,
    pub input_dir: String,
    pub output_dir: String,
    pub params: Params,
}

impl TaskRecord {
    /// The record as one flat document. Path and name fields take precedence
    /// over parameters of the same name.
    pub fn to_document(&self) -> Document {
        let mut doc: Document = self
            .params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        doc.insert("input_dir".into(), Value::String(self.input_dir.clone()));
        doc.insert("output_dir".into(), Value::String(self.output_dir.clone()));
        doc.insert("task".into(), Value::String(self.task.clone()));
        doc.insert("simulation".into(), Value::String(self.simulation.clone()));
        doc
    }
}


// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Accepted values per field. A document matches when, for every field, its
/// value equals one of the listed alternatives.
pub type RecordQuery = IndexMap<String, Vec<Value>>;

/// Whether `stored` carries every field of `doc` with an equal value.
pub fn contains_document(stored: &Document, doc: &Document) -> bool {
    doc.iter().all(|(k, v)| stored.get(k) == Some(v))
}

fn matches_query(stored: &Document, query: &RecordQuery) -> bool {
    query
        .iter()
        .all(|(field, accepted)| stored.get(field).map_or(false, |v| accepted.contains(v)))
}

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// More than one stored document matched; nothing changed.
    Ambiguous,
}


// ---------------------------------------------------------------------------
// DocumentStore
// ---------------------------------------------------------------------------

pub trait DocumentStore: Send + Sync {
    /// Insert `doc`, or with `update_duplicates` refresh the one stored
    /// document that already contains it.
    fn upsert(&self, doc: &Document, update_duplicates: bool) -> Result<UpsertOutcome>;

    /// Merge `added` into the single document containing `existing`.
    /// Returns whether a document was changed.
    fn update(&self, existing: &Document, added: &Document) -> Result<bool>;

    /// Documents matching `query`. An empty query is rejected.
    fn find(&self, query: &RecordQuery) -> Result<Vec<Document>>;

    /// Every stored document.
    fn all(&self) -> Result<Vec<Document>>;
}

/// Apply upsert semantics to an in-memory collection.
fn upsert_into(docs: &mut Vec<Document>, doc: &Document, update_duplicates: bool) -> UpsertOutcome {
    if !update_duplicates || doc.is_empty() {
        docs.push(doc.clone());
        return UpsertOutcome::Inserted;
    }
    let hits: Vec<usize> = docs
        .iter()
        .enumerate()
        .filter(|(_, stored)| contains_document(stored, doc))
        .map(|(i, _)| i)
        .collect();
    match hits.as_slice() {
        [] => {
            docs.push(doc.clone());
            UpsertOutcome::Inserted
        }
        [idx] => {
            let stored = &mut docs[*idx];
            for (k, v) in doc {
                stored.insert(k.clone(), v.clone());
            }
            stored.insert(LAST_MODIFIED_FIELD.into(), Value::from(now_ms()));
            UpsertOutcome::Updated
        }
        _ => {
            tracing::warn!(matches = hits.len(), "store not updated: more than one document matches");
            UpsertOutcome::Ambiguous
        }
    }
}

fn update_into(docs: &mut [Document], existing: &Document, added: &Document) -> bool {
    let hits: Vec<usize> = docs
        .iter()
        .enumerate()
        .filter(|(_, stored)| contains_document(stored, existing))
        .map(|(i, _)| i)
        .collect();
    if let [idx] = hits.as_slice() {
        for (k, v) in added {
            docs[*idx].insert(k.clone(), v.clone());
        }
        true
    } else {
        tracing::warn!(matches = hits.len(), "store not updated: need exactly one existing document");
        false
    }
}

fn find_in(docs: &[Document], query: &RecordQuery) -> Result<Vec<Document>> {
    if query.is_empty() {
        return Err(Error::Store("query needs at least one field".into()));
    }
    Ok(docs.iter().filter(|d| matches_query(d, query)).cloned().collect())
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}


// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: Mutex<Vec<Document>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.lock().is_empty()
    }
}

impl DocumentStore for MemoryStore {
    fn upsert(&self, doc: &Document, update_duplicates: bool) -> Result<UpsertOutcome> {
        Ok(upsert_into(&mut self.docs.lock(), doc, update_duplicates))
    }

    fn update(&self, existing: &Document, added: &Document) -> Result<bool> {
        Ok(update_into(&mut self.docs.lock(), existing, added))
    }

    fn find(&self, query: &RecordQuery) -> Result<Vec<Document>> {
        find_in(&self.docs.lock(), query)
    }

    fn all(&self) -> Result<Vec<Document>> {
        Ok(self.docs.lock().clone())
    }
}


// ---------------------------------------------------------------------------
// JsonlStore
// ---------------------------------------------------------------------------

/// One JSON document per line. Inserts append; updates rewrite the file
/// through a temporary file in the same directory.
#[derive(Debug)]
pub struct JsonlStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        JsonlStore {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Vec<Document>> {
        let file = match fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(&self.path, e)),
        };
        let mut docs = Vec::new();
        for (n, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| Error::io(&self.path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            let doc: Document = serde_json::from_str(&line).map_err(|e| {
                Error::Store(format!("{}:{}: {}", self.path.display(), n + 1, e))
            })?;
            docs.push(doc);
        }
        Ok(docs)
    }

    fn append(&self, doc: &Document) -> Result<()> {
        let line = serde_json::to_string(doc).map_err(|e| Error::Store(e.to_string()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::io(&self.path, e))?;
        writeln!(file, "{}", line).map_err(|e| Error::io(&self.path, e))
    }

    fn rewrite(&self, docs: &[Document]) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::io(dir, e))?;
        for doc in docs {
            let line = serde_json::to_string(doc).map_err(|e| Error::Store(e.to_string()))?;
            writeln!(tmp, "{}", line).map_err(|e| Error::io(tmp.path(), e))?;
        }
        tmp.persist(&self.path)
            .map_err(|e| Error::io(&self.path, e.error))?;
        Ok(())
    }
}

impl DocumentStore for JsonlStore {
    fn upsert(&self, doc: &Document, update_duplicates: bool) -> Result<UpsertOutcome> {
        let _guard = self.lock.lock();
        if !update_duplicates {
            self.append(doc)?;
            return Ok(UpsertOutcome::Inserted);
        }
        let mut docs = self.load()?;
        let outcome = upsert_into(&mut docs, doc, true);
        match outcome {
            UpsertOutcome::Inserted => self.append(doc)?,
            UpsertOutcome::Updated => self.rewrite(&docs)?,
            UpsertOutcome::Ambiguous => {}
        }
        Ok(outcome)
    }

    fn update(&self, existing: &Document, added: &Document) -> Result<bool> {
        let _guard = self.lock.lock();
        let mut docs = self.load()?;
        let changed = update_into(&mut docs, existing, added);
        if changed {
            self.rewrite(&docs)?;
        }
        Ok(changed)
    }

    fn find(&self, query: &RecordQuery) -> Result<Vec<Document>> {
        let _guard = self.lock.lock();
        find_in(&self.load()?, query)
    }

    fn all(&self) -> Result<Vec<Document>> {
        let _guard = self.lock.lock();
        self.load()
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
