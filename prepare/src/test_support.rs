//! Scripted collaborators and helpers for tests.
//!
//! Every fake records how it was called so tests can assert on fetch counts,
//! provisioning calls and the exact launch requests the engine built.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use tempfile::TempDir;
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

use crate::core::reference::ActionReference;
use crate::core::types::PipelineDocument;
use crate::io::cache::{ActionCache, CachedAction, EntryPaths, LOGS_DIR};
use crate::io::git::Fetcher;
use crate::io::process::{LaunchRequest, Launcher};
use crate::io::provision::{ProvisionOutcome, Provisioner};

/// Shared in-memory sink for formatted log lines.
#[derive(Debug, Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        match self.0.lock() {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(poisoned) => String::from_utf8_lossy(&poisoned.into_inner()).into_owned(),
        }
    }
}

pub struct LogWriter(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut bytes = self
            .0
            .lock()
            .map_err(|_| io::Error::other("log buffer poisoned"))?;
        bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter(self.0.clone())
    }
}

/// Run `f` with a thread-local subscriber capturing every event (all
/// targets, down to trace) and return its result plus the formatted logs.
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    let buffer = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(buffer.clone())
        .with_max_level(Level::TRACE)
        .with_ansi(false)
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, buffer.contents())
}

/// Parse a pipeline document from YAML.
pub fn pipeline(yaml: &str) -> PipelineDocument {
    serde_yaml::from_str(yaml).expect("pipeline yaml")
}

/// Fetcher serving actions from an in-memory file table.
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    actions: HashMap<String, Vec<(PathBuf, String)>>,
    fetches: RefCell<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the files `raw` checks out to.
    pub fn with_action(mut self, raw: &str, files: &[(&str, &str)]) -> Self {
        let reference = ActionReference::parse(raw).expect("reference");
        let files = files
            .iter()
            .map(|(path, contents)| (PathBuf::from(path), (*contents).to_string()))
            .collect();
        self.actions.insert(reference.to_string(), files);
        self
    }

    /// Register a leaf action: `action.yml` plus an empty `main.py`.
    pub fn with_leaf(self, raw: &str, action_yaml: &str) -> Self {
        self.with_action(raw, &[("action.yml", action_yaml), ("main.py", "")])
    }

    /// Register a composite action: `action.yml` only.
    pub fn with_composite(self, raw: &str, action_yaml: &str) -> Self {
        self.with_action(raw, &[("action.yml", action_yaml)])
    }

    /// Canonical references fetched so far, in order.
    pub fn fetches(&self) -> Vec<String> {
        self.fetches.borrow().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.borrow().len()
    }
}

impl Fetcher for ScriptedFetcher {
    fn fetch(&self, reference: &ActionReference, destination: &Path) -> Result<()> {
        let key = reference.to_string();
        self.fetches.borrow_mut().push(key.clone());
        let files = self
            .actions
            .get(&key)
            .ok_or_else(|| anyhow!("repository for '{key}' not found"))?;
        for (path, contents) in files {
            let target = destination.join(path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, contents)?;
        }
        Ok(())
    }
}

/// Provisioner that succeeds or fails on demand without running anything.
#[derive(Debug, Default)]
pub struct ScriptedProvisioner {
    failure_log: Option<String>,
    calls: Cell<usize>,
}

impl ScriptedProvisioner {
    pub fn succeeding() -> Self {
        Self::default()
    }

    pub fn failing(log: &str) -> Self {
        Self {
            failure_log: Some(log.to_string()),
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl Provisioner for ScriptedProvisioner {
    fn provision(&self, _repo: &Path, environment: &Path) -> Result<ProvisionOutcome> {
        self.calls.set(self.calls.get() + 1);
        if let Some(log) = &self.failure_log {
            return Ok(ProvisionOutcome::failed(log.clone()));
        }
        fs::create_dir_all(environment)?;
        Ok(ProvisionOutcome::ok())
    }
}

/// Output and exit code of one scripted process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedProcess {
    pub lines: Vec<String>,
    pub exit: Option<i32>,
}

impl ScriptedProcess {
    pub fn ok(lines: &[&str]) -> Self {
        Self::exit(0, lines)
    }

    pub fn exit(code: i32, lines: &[&str]) -> Self {
        Self {
            lines: lines.iter().map(|line| (*line).to_string()).collect(),
            exit: Some(code),
        }
    }
}

/// Launcher replaying scripted processes in order and recording requests.
///
/// Once the script runs out every launch succeeds silently.
#[derive(Debug, Default)]
pub struct ScriptedLauncher {
    script: RefCell<VecDeque<ScriptedProcess>>,
    requests: RefCell<Vec<LaunchRequest>>,
}

impl ScriptedLauncher {
    pub fn new(script: Vec<ScriptedProcess>) -> Self {
        Self {
            script: RefCell::new(script.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<LaunchRequest> {
        self.requests.borrow().clone()
    }
}

impl Launcher for ScriptedLauncher {
    fn launch(&self, request: &LaunchRequest, on_line: &mut dyn FnMut(&str)) -> Result<Option<i32>> {
        self.requests.borrow_mut().push(request.clone());
        let process = self
            .script
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| ScriptedProcess::ok(&[]));
        for line in &process.lines {
            on_line(line);
        }
        Ok(process.exit)
    }
}

/// Cache keeping complete entries in memory; source and environment paths
/// point into a temporary directory.
#[derive(Debug)]
pub struct MemoryCache {
    root: TempDir,
    entries: RefCell<HashMap<ActionReference, CachedAction>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().expect("tempdir"),
            entries: RefCell::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionCache for MemoryCache {
    fn entry_paths(&self, reference: &ActionReference) -> EntryPaths {
        EntryPaths::under(self.root.path(), reference)
    }

    fn logs_dir(&self) -> PathBuf {
        self.root.path().join(LOGS_DIR)
    }

    fn load(&self, reference: &ActionReference) -> Result<Option<CachedAction>> {
        Ok(self.entries.borrow().get(reference).cloned())
    }

    fn store(&self, reference: &ActionReference, action: &CachedAction) -> Result<()> {
        self.entries
            .borrow_mut()
            .insert(reference.clone(), action.clone());
        Ok(())
    }

    fn remove(&self, reference: &ActionReference) -> Result<bool> {
        Ok(self.entries.borrow_mut().remove(reference).is_some())
    }
}
