//! Git adapter used to fetch actions.
//!
//! Actions are plain repositories named after the action under the
//! organization that publishes them, so fetching is a clone followed by a
//! checkout of the requested version.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument};

use crate::core::reference::ActionReference;
use crate::io::config::GitMode;

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Clone `url` into `destination` (which must not exist yet).
    #[instrument(skip_all, fields(url = %url))]
    pub fn clone_into(url: &str, destination: &Path) -> Result<Self> {
        let parent = destination
            .parent()
            .with_context(|| format!("clone destination missing parent {}", destination.display()))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
        let target = destination.to_string_lossy().into_owned();
        Git::new(parent).run_checked(&["clone", "--quiet", url, &target])?;
        Ok(Git::new(destination))
    }

    /// Checkout a tag, branch or commit.
    #[instrument(skip_all, fields(version = %version))]
    pub fn checkout(&self, version: &str) -> Result<()> {
        debug!(version, "checking out version");
        self.run_checked(&["checkout", "--quiet", version])?;
        Ok(())
    }

    /// Return the current HEAD short SHA.
    pub fn head_short_sha(&self, len: usize) -> Result<String> {
        let arg = format!("--short={len}");
        let out = self.run_capture(&["rev-parse", &arg, "HEAD"])?;
        Ok(out.trim().to_string())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

/// Retrieves the source of an action at a version.
pub trait Fetcher {
    /// Materialize `reference` into `destination`, which does not exist yet.
    fn fetch(&self, reference: &ActionReference, destination: &Path) -> Result<()>;
}

/// Fetcher that clones from a git host.
#[derive(Debug, Clone)]
pub struct GitFetcher {
    mode: GitMode,
    host: String,
}

impl GitFetcher {
    pub fn new(mode: GitMode, host: impl Into<String>) -> Self {
        Self {
            mode,
            host: host.into(),
        }
    }

    pub fn url(&self, reference: &ActionReference) -> String {
        match self.mode {
            GitMode::Ssh => format!(
                "git@{}:{}/{}.git",
                self.host, reference.organization, reference.name
            ),
            GitMode::Https => format!(
                "https://{}/{}/{}.git",
                self.host, reference.organization, reference.name
            ),
        }
    }
}

impl Fetcher for GitFetcher {
    #[instrument(skip_all, fields(action = %reference))]
    fn fetch(&self, reference: &ActionReference, destination: &Path) -> Result<()> {
        let url = self.url(reference);
        info!(%url, "cloning action");
        let git = Git::clone_into(&url, destination)
            .with_context(|| format!("fetch action '{reference}'"))?;
        if !reference.is_latest() {
            git.checkout(&reference.version)
                .with_context(|| format!("fetch action '{reference}'"))?;
        }
        Ok(())
    }
}
