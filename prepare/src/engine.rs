//! Pipeline execution.
//!
//! Jobs run in document order, each against a fresh root scope seeded with
//! the ambient environment. Invocations run strictly one after another; a
//! composite action expands into a child scope and leaf actions stream their
//! output through the structured output protocol.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::core::protocol::handle_line;
use crate::core::scope::ExecutionScope;
use crate::core::substitute::{substitute, substitute_all, value_to_string};
use crate::core::types::{ActionKind, InvocationSpec, PipelineDocument, RunInvocation, UsesInvocation};
use crate::error::{PrepareError, ProtocolError};
use crate::io::config::PrepareConfig;
use crate::io::process::{LaunchRequest, Launcher};
use crate::io::provision::python_executable;
use crate::resolve::{ResolvedAction, ResolvedActions, lookup};

/// Prefix of the environment variables carrying action inputs.
pub const INPUT_PREFIX: &str = "PREPARE_";
/// Variable pointing a leaf action at its provisioned environment.
pub const ENVIRONMENT_VARIABLE: &str = "VIRTUAL_ENV";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Command prefix for `run` invocations.
    pub shell: Vec<String>,
    /// Skip the rest of a step list after its first unsuccessful invocation.
    pub fail_fast: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::from(&PrepareConfig::default())
    }
}

impl From<&PrepareConfig> for RunConfig {
    fn from(config: &PrepareConfig) -> Self {
        Self {
            shell: config.run.shell.clone(),
            fail_fast: config.run.fail_fast,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationOutcome {
    Succeeded,
    /// Non-zero exit; `None` when the process was killed by a signal.
    Failed(Option<i32>),
    ProtocolError(String),
    /// Not run because an earlier invocation failed under `fail_fast`.
    Skipped,
}

impl InvocationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, InvocationOutcome::Succeeded)
    }

    fn from_exit(code: Option<i32>) -> Self {
        match code {
            Some(0) => InvocationOutcome::Succeeded,
            other => InvocationOutcome::Failed(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvocationReport {
    pub key: String,
    pub name: String,
    pub outcome: InvocationOutcome,
    /// Reports of a composite action's steps.
    pub children: Vec<InvocationReport>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub name: String,
    pub invocations: Vec<InvocationReport>,
    /// Outputs recorded in the job's root scope, by invocation key.
    pub outputs: HashMap<String, Map<String, Value>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub jobs: Vec<JobReport>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failures().is_empty()
    }

    /// Top-level invocations that did not succeed (skipped ones excluded).
    pub fn failures(&self) -> Vec<(&str, &InvocationReport)> {
        self.jobs
            .iter()
            .flat_map(|job| job.invocations.iter().map(move |inv| (job.name.as_str(), inv)))
            .filter(|(_, inv)| {
                !inv.outcome.is_success() && inv.outcome != InvocationOutcome::Skipped
            })
            .collect()
    }

    pub fn job(&self, name: &str) -> Option<&JobReport> {
        self.jobs.iter().find(|job| job.name == name)
    }
}

pub struct Engine<'a, L> {
    launcher: &'a L,
    config: RunConfig,
    environment: HashMap<String, String>,
    workdir: Option<PathBuf>,
}

impl<'a, L: Launcher> Engine<'a, L> {
    /// Engine seeded with the ambient process environment.
    pub fn new(launcher: &'a L, config: RunConfig) -> Self {
        Self {
            launcher,
            config,
            environment: std::env::vars().collect(),
            workdir: None,
        }
    }

    /// Replace the environment every job starts from.
    pub fn with_environment(mut self, environment: HashMap<String, String>) -> Self {
        self.environment = environment;
        self
    }

    /// Directory processes are started in (the caller's by default).
    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    /// Execute every job of `document`.
    ///
    /// Failed invocations are reported, not raised; `Err` means the pipeline
    /// could not be executed at all.
    #[instrument(skip_all, fields(pipeline = %document.name))]
    pub fn run(
        &self,
        document: &PipelineDocument,
        resolved: &ResolvedActions,
    ) -> Result<RunReport, PrepareError> {
        let mut report = RunReport::default();
        for (name, steps) in &document.jobs {
            info!(job = %name, "running job");
            let mut scope = ExecutionScope::root(self.environment.clone());
            let invocations = self.run_steps(steps, &mut scope, resolved, &mut Vec::new())?;
            report.jobs.push(JobReport {
                name: name.clone(),
                invocations,
                outputs: scope.outputs,
            });
        }
        Ok(report)
    }

    fn run_steps(
        &self,
        steps: &[InvocationSpec],
        scope: &mut ExecutionScope,
        resolved: &ResolvedActions,
        chain: &mut Vec<String>,
    ) -> Result<Vec<InvocationReport>, PrepareError> {
        let mut reports = Vec::with_capacity(steps.len());
        let mut keys = HashSet::new();
        let mut halted = false;
        for step in steps {
            let key = step.key();
            if !keys.insert(key.clone()) {
                warn!(
                    key = %key,
                    "duplicate invocation key '{key}', outputs of the later invocation replace earlier ones"
                );
            }
            if halted {
                debug!(key = %key, "skipping");
                reports.push(InvocationReport {
                    key,
                    name: step.name().to_string(),
                    outcome: InvocationOutcome::Skipped,
                    children: Vec::new(),
                });
                continue;
            }
            let report = match step {
                InvocationSpec::Run(run) => self.run_command(run, key, scope)?,
                InvocationSpec::Uses(uses) => self.run_uses(uses, key, scope, resolved, chain)?,
            };
            if !report.outcome.is_success() {
                warn!(key = %report.key, outcome = ?report.outcome, "invocation did not succeed");
                halted = self.config.fail_fast;
            }
            reports.push(report);
        }
        Ok(reports)
    }

    fn run_command(
        &self,
        run: &RunInvocation,
        key: String,
        scope: &ExecutionScope,
    ) -> Result<InvocationReport, PrepareError> {
        let command = substitute(&run.run, scope);
        debug!(key = %key, command = %command, "running command");
        let (program, prefix) = self
            .config
            .shell
            .split_first()
            .ok_or_else(|| PrepareError::validation("run.shell must not be empty"))?;
        let mut args = prefix.to_vec();
        args.push(command);
        let request = LaunchRequest {
            program: PathBuf::from(program),
            args,
            env: scope.environment.clone(),
            workdir: self.workdir.clone(),
        };
        let exit = self
            .launcher
            .launch(&request, &mut |line| trace!(target: "actions", "{line}"))?;
        Ok(InvocationReport {
            key,
            name: run.name.clone(),
            outcome: InvocationOutcome::from_exit(exit),
            children: Vec::new(),
        })
    }

    fn run_uses(
        &self,
        uses: &UsesInvocation,
        key: String,
        scope: &mut ExecutionScope,
        resolved: &ResolvedActions,
        chain: &mut Vec<String>,
    ) -> Result<InvocationReport, PrepareError> {
        let action = lookup(resolved, &uses.uses)?;
        let mut inputs = uses.with.clone();
        action.definition.apply_defaults(&mut inputs);
        substitute_all(&mut inputs, scope);

        let (outcome, children) = match &action.definition.kind {
            ActionKind::Composite { steps } => {
                let reference = action.reference.to_string();
                if chain.contains(&reference) {
                    return Err(PrepareError::validation(format!(
                        "cyclic action reference: {} -> {reference}",
                        chain.join(" -> ")
                    )));
                }
                debug!(key = %key, action = %reference, "expanding composite action");
                chain.push(reference);
                let mut child = scope.child(inputs);
                let children = self.run_steps(steps, &mut child, resolved, chain)?;
                chain.pop();
                let outcome = children
                    .iter()
                    .map(|child| &child.outcome)
                    .find(|outcome| {
                        matches!(
                            outcome,
                            InvocationOutcome::Failed(_) | InvocationOutcome::ProtocolError(_)
                        )
                    })
                    .cloned()
                    .unwrap_or(InvocationOutcome::Succeeded);
                (outcome, children)
            }
            ActionKind::Leaf { .. } => (self.run_leaf(action, &key, inputs, scope)?, Vec::new()),
        };

        Ok(InvocationReport {
            key,
            name: uses.name.clone(),
            outcome,
            children,
        })
    }

    fn run_leaf(
        &self,
        action: &ResolvedAction,
        key: &str,
        inputs: IndexMap<String, Value>,
        scope: &mut ExecutionScope,
    ) -> Result<InvocationOutcome, PrepareError> {
        let ActionKind::Leaf { main, .. } = &action.definition.kind else {
            return Err(PrepareError::validation(format!(
                "action '{}' is not a leaf action",
                action.reference
            )));
        };
        debug!(key, action = %action.reference, "running leaf action");

        let mut env = scope.environment.clone();
        env.insert(
            ENVIRONMENT_VARIABLE.to_string(),
            action.paths.environment.display().to_string(),
        );
        for (name, value) in &inputs {
            env.insert(input_variable(name), value_to_string(value));
        }
        let request = LaunchRequest {
            program: python_executable(&action.paths.environment),
            args: vec![action.paths.repo.join(main).display().to_string()],
            env,
            workdir: self.workdir.clone(),
        };

        scope.begin_action(key, &action.definition);
        let mut protocol_error: Option<ProtocolError> = None;
        let launched = self.launcher.launch(&request, &mut |line| {
            if protocol_error.is_some() {
                trace!(target: "actions", "{line}");
                return;
            }
            if let Err(err) = handle_line(line, scope) {
                error!(target: "actions", action = %action.reference, "{err}");
                protocol_error = Some(err);
            }
        });
        scope.end_action();
        let exit = launched?;

        Ok(match protocol_error {
            Some(err) => InvocationOutcome::ProtocolError(err.to_string()),
            None => InvocationOutcome::from_exit(exit),
        })
    }
}

/// `PREPARE_<NAME>`: upper-cased, spaces replaced by underscores.
pub fn input_variable(name: &str) -> String {
    format!("{INPUT_PREFIX}{}", name.to_uppercase().replace(' ', "_"))
}
