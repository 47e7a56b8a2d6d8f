//! On-disk action cache.
//!
//! Layout under the cache root:
//!
//! ```text
//! actions/<org>/<name>/<version>/repo/               fetched source
//! actions/<org>/<name>/<version>/<name>.schema.json  invocation schema
//! actions/<org>/<name>/<version>/venv/               provisioned environment
//! logs/<timestamp>_<org>_<name>_<version>.log        dependency failures
//! ```
//!
//! The schema file is written last, so an entry without one is incomplete
//! and gets fetched again.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::reference::ActionReference;
use crate::core::types::ActionDefinition;
use crate::io::config::write_atomic;
use crate::io::document::{find_action_file, read_yaml};

pub const APP_NAME: &str = "prepare";
pub const ACTIONS_DIR: &str = "actions";
pub const LOGS_DIR: &str = "logs";

/// Paths belonging to one cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPaths {
    pub dir: PathBuf,
    pub repo: PathBuf,
    pub environment: PathBuf,
    pub schema: PathBuf,
}

impl EntryPaths {
    pub fn under(actions_dir: &Path, reference: &ActionReference) -> Self {
        let dir = actions_dir
            .join(&reference.organization)
            .join(&reference.name)
            .join(&reference.version);
        Self {
            repo: dir.join("repo"),
            environment: dir.join("venv"),
            schema: dir.join(format!("{}.schema.json", reference.name)),
            dir,
        }
    }
}

/// A complete cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedAction {
    pub definition: ActionDefinition,
    pub schema: Value,
}

/// Read/write access to cache entries by reference.
///
/// Fetched sources and provisioned environments live at [`EntryPaths`];
/// `store` only marks the entry complete.
pub trait ActionCache {
    fn entry_paths(&self, reference: &ActionReference) -> EntryPaths;

    fn logs_dir(&self) -> PathBuf;

    /// Return the entry if it is complete, `None` otherwise.
    fn load(&self, reference: &ActionReference) -> Result<Option<CachedAction>>;

    fn store(&self, reference: &ActionReference, action: &CachedAction) -> Result<()>;

    /// Delete the entry; returns whether anything was there.
    fn remove(&self, reference: &ActionReference) -> Result<bool>;
}

/// `<platform cache dir>/prepare`.
pub fn default_cache_dir() -> Result<PathBuf> {
    let base = dirs_next::cache_dir().context("no platform cache directory")?;
    Ok(base.join(APP_NAME))
}

/// Timestamped log file name for a failed dependency install.
pub fn dependency_log_path(logs_dir: &Path, reference: &ActionReference) -> PathBuf {
    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    logs_dir.join(format!(
        "{timestamp}_{}_{}_{}.log",
        reference.organization, reference.name, reference.version
    ))
}

/// Cache backed by the filesystem.
#[derive(Debug, Clone)]
pub struct FsCache {
    root: PathBuf,
}

impl FsCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn actions_dir(&self) -> PathBuf {
        self.root.join(ACTIONS_DIR)
    }

    /// Every entry directory present on disk, sorted, complete or not.
    pub fn references(&self) -> Result<Vec<ActionReference>> {
        let actions = self.actions_dir();
        let mut references = Vec::new();
        for organization in sorted_dirs(&actions)? {
            for name in sorted_dirs(&actions.join(&organization))? {
                for version in sorted_dirs(&actions.join(&organization).join(&name))? {
                    references.push(ActionReference::new(
                        organization.clone(),
                        name.clone(),
                        version,
                    ));
                }
            }
        }
        Ok(references)
    }

    /// Remove every cached action. Logs are kept.
    pub fn remove_all(&self) -> Result<()> {
        let actions = self.actions_dir();
        if actions.exists() {
            fs::remove_dir_all(&actions)
                .with_context(|| format!("remove {}", actions.display()))?;
        }
        Ok(())
    }
}

impl ActionCache for FsCache {
    fn entry_paths(&self, reference: &ActionReference) -> EntryPaths {
        EntryPaths::under(&self.actions_dir(), reference)
    }

    fn logs_dir(&self) -> PathBuf {
        self.root.join(LOGS_DIR)
    }

    #[instrument(skip_all, fields(action = %reference))]
    fn load(&self, reference: &ActionReference) -> Result<Option<CachedAction>> {
        let paths = self.entry_paths(reference);
        if !paths.schema.is_file() {
            debug!("no complete cache entry");
            return Ok(None);
        }
        let raw = fs::read_to_string(&paths.schema)
            .with_context(|| format!("read {}", paths.schema.display()))?;
        let schema: Value = serde_json::from_str(&raw)
            .with_context(|| format!("parse {}", paths.schema.display()))?;
        let file = find_action_file(&paths.repo)?;
        let definition = ActionDefinition::from_value(read_yaml(&file)?)
            .map_err(|message| anyhow::anyhow!("{}: {message}", file.display()))?;
        debug!("loaded cache entry");
        Ok(Some(CachedAction { definition, schema }))
    }

    fn store(&self, reference: &ActionReference, action: &CachedAction) -> Result<()> {
        let paths = self.entry_paths(reference);
        let mut payload =
            serde_json::to_string_pretty(&action.schema).context("serialize schema json")?;
        payload.push('\n');
        write_atomic(&paths.schema, &payload)
    }

    fn remove(&self, reference: &ActionReference) -> Result<bool> {
        let paths = self.entry_paths(reference);
        if !paths.dir.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&paths.dir)
            .with_context(|| format!("remove {}", paths.dir.display()))?;
        Ok(true)
    }
}

fn sorted_dirs(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
        if entry.path().is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}
