//! Action resolution: make every action a pipeline uses available locally.
//!
//! For each `uses` invocation the referenced action is loaded from the cache,
//! or fetched, validated, described by a generated schema, provisioned and
//! stored. Composite actions pull in their nested actions recursively. Any
//! error aborts resolution, so execution never starts against a partially
//! resolved action set.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::reference::ActionReference;
use crate::core::schema::{check_declarations, invocation_schema};
use crate::core::types::{ActionDefinition, ActionKind, PipelineDocument, UsesInvocation};
use crate::error::PrepareError;
use crate::io::cache::{ActionCache, CachedAction, EntryPaths, dependency_log_path};
use crate::io::document::{ACTION_FILE_NAMES, find_action_file, read_yaml};
use crate::io::git::Fetcher;
use crate::io::provision::Provisioner;
use crate::io::validator::Validator;

/// An action ready to run.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAction {
    pub reference: ActionReference,
    pub definition: ActionDefinition,
    pub schema: Value,
    pub paths: EntryPaths,
}

/// Resolved actions keyed by canonical reference string.
pub type ResolvedActions = IndexMap<String, ResolvedAction>;

/// Look up the action a `uses` string refers to.
pub fn lookup<'r>(
    resolved: &'r ResolvedActions,
    uses: &str,
) -> Result<&'r ResolvedAction, PrepareError> {
    let reference = ActionReference::parse(uses)?;
    resolved.get(&reference.to_string()).ok_or_else(|| {
        PrepareError::validation(format!("action '{uses}' has not been resolved"))
    })
}

pub struct Resolver<'a, C, F, P> {
    cache: &'a C,
    fetcher: &'a F,
    provisioner: &'a P,
    validator: &'a Validator,
}

impl<'a, C: ActionCache, F: Fetcher, P: Provisioner> Resolver<'a, C, F, P> {
    pub fn new(cache: &'a C, fetcher: &'a F, provisioner: &'a P, validator: &'a Validator) -> Self {
        Self {
            cache,
            fetcher,
            provisioner,
            validator,
        }
    }

    /// Resolve every action used by `document`, which was read from
    /// `pipeline_path`, and validate each invocation against its action.
    #[instrument(skip_all, fields(pipeline = %pipeline_path.display()))]
    pub fn resolve(
        &self,
        pipeline_path: &Path,
        document: &PipelineDocument,
    ) -> Result<ResolvedActions, PrepareError> {
        let mut resolved = ResolvedActions::new();
        for invocation in document.uses_invocations() {
            self.ensure_invocation(pipeline_path, invocation, &mut Vec::new(), &mut resolved)?;
        }
        info!(actions = resolved.len(), "all actions resolved");
        Ok(resolved)
    }

    /// Resolve a single reference (and whatever it uses).
    pub fn resolve_reference(&self, raw: &str) -> Result<ResolvedAction, PrepareError> {
        let reference = ActionReference::parse(raw)?;
        let mut resolved = ResolvedActions::new();
        self.ensure(&reference, &mut Vec::new(), &mut resolved)?;
        resolved
            .shift_remove(&reference.to_string())
            .ok_or_else(|| PrepareError::validation(format!("action '{raw}' was not resolved")))
    }

    fn ensure_invocation(
        &self,
        file: &Path,
        invocation: &UsesInvocation,
        chain: &mut Vec<String>,
        resolved: &mut ResolvedActions,
    ) -> Result<(), PrepareError> {
        let reference = ActionReference::parse(&invocation.uses)?;
        self.ensure(&reference, chain, resolved)?;
        let action = lookup(resolved, &invocation.uses)?;
        self.validator
            .validate_invocation(file, invocation, &action.schema)
    }

    /// Make `reference` available, at most once per run.
    ///
    /// `chain` holds the references currently being resolved; meeting one of
    /// them again means the composite actions form a cycle.
    fn ensure(
        &self,
        reference: &ActionReference,
        chain: &mut Vec<String>,
        resolved: &mut ResolvedActions,
    ) -> Result<(), PrepareError> {
        let key = reference.to_string();
        if chain.contains(&key) {
            return Err(PrepareError::validation(format!(
                "cyclic action reference: {} -> {key}",
                chain.join(" -> ")
            )));
        }
        if resolved.contains_key(&key) {
            debug!(action = %key, "already resolved in this run");
            return Ok(());
        }

        let paths = self.cache.entry_paths(reference);
        let cached = match self.cache.load(reference)? {
            Some(cached) => {
                debug!(action = %key, "loaded from cache");
                cached
            }
            None => self.install(reference, &paths)?,
        };

        chain.push(key.clone());
        if cached.definition.is_composite() {
            let file = definition_file(&paths.repo);
            for nested in cached.definition.nested_uses() {
                self.ensure_invocation(&file, nested, chain, resolved)?;
            }
        }
        chain.pop();

        resolved.insert(
            key,
            ResolvedAction {
                reference: reference.clone(),
                definition: cached.definition,
                schema: cached.schema,
                paths,
            },
        );
        Ok(())
    }

    #[instrument(skip_all, fields(action = %reference))]
    fn install(
        &self,
        reference: &ActionReference,
        paths: &EntryPaths,
    ) -> Result<CachedAction, PrepareError> {
        info!("action not cached, fetching");
        if paths.dir.exists() {
            warn!(dir = %paths.dir.display(), "removing incomplete cache entry");
            fs::remove_dir_all(&paths.dir)
                .with_context(|| format!("remove {}", paths.dir.display()))?;
        }
        fs::create_dir_all(&paths.dir)
            .with_context(|| format!("create {}", paths.dir.display()))?;
        self.fetcher.fetch(reference, &paths.repo)?;

        let file = find_action_file(&paths.repo)
            .map_err(|err| PrepareError::validation(format!("action '{reference}': {err}")))?;
        let document = read_yaml(&file)?;
        self.validator.validate_action_document(&file, &document)?;
        let definition = ActionDefinition::from_value(document)
            .map_err(|message| PrepareError::validation(format!("{}: {message}", file.display())))?;

        if let ActionKind::Leaf { main, .. } = &definition.kind {
            let entry_point = paths.repo.join(main);
            if !entry_point.is_file() {
                return Err(PrepareError::validation(format!(
                    "{}: entry point '{}' does not exist",
                    file.display(),
                    main.display()
                )));
            }
        }

        let problems = check_declarations(&definition);
        if !problems.is_empty() {
            return Err(PrepareError::validation(format!(
                "{}: invalid inputs or outputs:\n- {}",
                file.display(),
                problems.join("\n- ")
            )));
        }

        let schema = invocation_schema(reference, &definition);
        if !definition.is_composite() {
            self.provision(reference, paths)?;
        }

        let cached = CachedAction { definition, schema };
        self.cache.store(reference, &cached)?;
        Ok(cached)
    }

    fn provision(&self, reference: &ActionReference, paths: &EntryPaths) -> Result<(), PrepareError> {
        let outcome = self.provisioner.provision(&paths.repo, &paths.environment)?;
        if outcome.success {
            debug!("environment provisioned");
            return Ok(());
        }
        let logs_dir = self.cache.logs_dir();
        fs::create_dir_all(&logs_dir)
            .with_context(|| format!("create {}", logs_dir.display()))?;
        let log_path = dependency_log_path(&logs_dir, reference);
        fs::write(&log_path, &outcome.log)
            .with_context(|| format!("write {}", log_path.display()))?;
        warn!(log = %log_path.display(), "dependency installation failed");
        Err(PrepareError::Dependency {
            action: reference.to_string(),
            log_path,
        })
    }
}

/// Definition file of a fetched action, for error locations.
fn definition_file(repo: &Path) -> PathBuf {
    find_action_file(repo).unwrap_or_else(|_| repo.join(ACTION_FILE_NAMES[0]))
}
