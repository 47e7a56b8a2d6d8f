//! Per-action runtime environments.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Result;
use tracing::{debug, info, instrument};

use crate::io::process::run_captured;

pub const REQUIREMENTS_FILE: &str = "requirements.txt";

/// Result of provisioning: on failure `log` is persisted for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionOutcome {
    pub success: bool,
    pub log: String,
}

impl ProvisionOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            log: String::new(),
        }
    }

    pub fn failed(log: impl Into<String>) -> Self {
        Self {
            success: false,
            log: log.into(),
        }
    }
}

/// Creates the isolated environment a leaf action runs in.
pub trait Provisioner {
    /// Build `environment` for the action fetched into `repo`.
    ///
    /// `Err` is reserved for failures of the provisioner itself; a failed
    /// dependency install is a non-successful [`ProvisionOutcome`].
    fn provision(&self, repo: &Path, environment: &Path) -> Result<ProvisionOutcome>;
}

/// Interpreter inside a virtual environment.
pub fn python_executable(environment: &Path) -> PathBuf {
    if cfg!(windows) {
        environment.join("Scripts").join("python.exe")
    } else {
        environment.join("bin").join("python")
    }
}

/// Provisioner creating a Python virtual environment and installing the
/// action's `requirements.txt` into it.
#[derive(Debug, Clone)]
pub struct VenvProvisioner {
    python: String,
}

impl VenvProvisioner {
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
        }
    }
}

impl Provisioner for VenvProvisioner {
    #[instrument(skip_all, fields(environment = %environment.display()))]
    fn provision(&self, repo: &Path, environment: &Path) -> Result<ProvisionOutcome> {
        info!("creating virtual environment");
        let mut venv = Command::new(&self.python);
        venv.arg("-m").arg("venv").arg(environment);
        let output = run_captured(venv)?;
        if !output.status.success() {
            return Ok(ProvisionOutcome::failed(output.combined));
        }

        let requirements = repo.join(REQUIREMENTS_FILE);
        if !requirements.is_file() {
            debug!("no requirements to install");
            return Ok(ProvisionOutcome::ok());
        }
        info!("installing requirements");
        let mut pip = Command::new(python_executable(environment));
        pip.args(["-m", "pip", "install", "--disable-pip-version-check", "-r"])
            .arg(&requirements)
            .current_dir(repo);
        let output = run_captured(pip)?;
        if !output.status.success() {
            return Ok(ProvisionOutcome::failed(output.combined));
        }
        Ok(ProvisionOutcome::ok())
    }
}
