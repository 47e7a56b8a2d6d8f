//! User configuration stored under `<config dir>/prepare/config.toml`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::cache::APP_NAME;

/// Prepare configuration (TOML).
///
/// Meant to be edited by humans. Missing fields take their defaults, and
/// command line flags override whatever the file says.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct PrepareConfig {
    /// Cache root override; the platform cache directory is used when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    pub core: CoreConfig,
    pub run: RunSection,
    pub provision: ProvisionConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum GitMode {
    #[default]
    Ssh,
    Https,
}

impl fmt::Display for GitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GitMode::Ssh => f.write_str("ssh"),
            GitMode::Https => f.write_str("https"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CoreConfig {
    /// Transport used to clone actions.
    pub git_mode: GitMode,
    /// Host actions are cloned from.
    pub git_host: String,
    /// Verbosity of the runner's own diagnostics (0 = errors only).
    pub debug: u8,
    /// Verbosity of action output (0 = errors only, 4+ = everything).
    pub verbosity: u8,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            git_mode: GitMode::Ssh,
            git_host: "github.com".to_string(),
            debug: 0,
            verbosity: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunSection {
    /// Command prefix for `run` invocations; the command is appended.
    pub shell: Vec<String>,
    /// Skip the rest of a job after the first failed invocation.
    pub fail_fast: bool,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            shell: vec!["bash".to_string(), "-c".to_string()],
            fail_fast: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Interpreter used to create per-action virtual environments.
    pub python: String,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
        }
    }
}

impl PrepareConfig {
    pub fn validate(&self) -> Result<()> {
        if self.run.shell.is_empty() || self.run.shell[0].trim().is_empty() {
            return Err(anyhow!("run.shell must be a non-empty array"));
        }
        if self.provision.python.trim().is_empty() {
            return Err(anyhow!("provision.python must not be empty"));
        }
        if self.core.git_host.trim().is_empty() {
            return Err(anyhow!("core.git_host must not be empty"));
        }
        Ok(())
    }
}

/// `<platform config dir>/prepare/config.toml`.
pub fn default_config_path() -> Result<PathBuf> {
    let base = dirs_next::config_dir().context("no platform config directory")?;
    Ok(base.join(APP_NAME).join("config.toml"))
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PrepareConfig::default()`.
pub fn load_config(path: &Path) -> Result<PrepareConfig> {
    if !path.exists() {
        let cfg = PrepareConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PrepareConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PrepareConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
