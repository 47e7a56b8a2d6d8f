//! JSON Schema validation of pipeline documents, action documents and
//! invocations (Draft 2020-12).
//!
//! Every failure is reported as a [`PrepareError::Validation`] naming the file
//! and the JSON pointer of each offending value.

use std::path::Path;

use anyhow::Context;
use jsonschema::{Draft, Validator as SchemaValidator};
use serde_json::Value;
use tracing::debug;

use crate::core::types::UsesInvocation;
use crate::error::PrepareError;

const PIPELINE_SCHEMA: &str = include_str!("../../schemas/pipeline.schema.json");
const ACTION_SCHEMA: &str = include_str!("../../schemas/action.schema.json");

/// Compiled schemas for the two document kinds.
pub struct Validator {
    pipeline: SchemaValidator,
    action: SchemaValidator,
}

impl Validator {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            pipeline: compile_embedded(PIPELINE_SCHEMA).context("compile pipeline schema")?,
            action: compile_embedded(ACTION_SCHEMA).context("compile action schema")?,
        })
    }

    pub fn validate_pipeline(&self, file: &Path, document: &Value) -> Result<(), PrepareError> {
        debug!(file = %file.display(), "validating pipeline document");
        check(&self.pipeline, document)
            .map_err(|problems| invalid(format!("invalid pipeline file {}", file.display()), &problems))
    }

    pub fn validate_action_document(
        &self,
        file: &Path,
        document: &Value,
    ) -> Result<(), PrepareError> {
        debug!(file = %file.display(), "validating action document");
        check(&self.action, document)
            .map_err(|problems| invalid(format!("invalid action file {}", file.display()), &problems))
    }

    /// Validate one `uses` invocation against an action's generated schema.
    ///
    /// `file` is the document the invocation appears in.
    pub fn validate_invocation(
        &self,
        file: &Path,
        invocation: &UsesInvocation,
        schema: &Value,
    ) -> Result<(), PrepareError> {
        let compiled = compile(schema).map_err(|err| {
            PrepareError::validation(format!(
                "invalid schema for action '{}': {err}",
                invocation.uses
            ))
        })?;
        let instance = serde_json::to_value(invocation)
            .context("serialize invocation")
            .map_err(PrepareError::Io)?;
        check(&compiled, &instance).map_err(|problems| {
            invalid(
                format!(
                    "{}: invocation '{}' of '{}' is invalid",
                    file.display(),
                    invocation.name,
                    invocation.uses
                ),
                &problems,
            )
        })
    }
}

fn compile_embedded(raw: &str) -> anyhow::Result<SchemaValidator> {
    let schema: Value = serde_json::from_str(raw).context("parse schema json")?;
    compile(&schema).map_err(|err| anyhow::anyhow!("{err}"))
}

fn compile(schema: &Value) -> Result<SchemaValidator, String> {
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .map_err(|err| err.to_string())
}

/// `(pointer, message)` for every violation, or `Ok` if there are none.
fn check(validator: &SchemaValidator, instance: &Value) -> Result<(), Vec<(String, String)>> {
    let problems: Vec<(String, String)> = validator
        .iter_errors(instance)
        .map(|err| {
            let pointer = err.instance_path().as_str().to_string();
            let pointer = if pointer.is_empty() {
                "/".to_string()
            } else {
                pointer
            };
            (pointer, err.to_string())
        })
        .collect();
    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems)
    }
}

fn invalid(headline: String, problems: &[(String, String)]) -> PrepareError {
    let details: Vec<String> = problems
        .iter()
        .map(|(pointer, message)| format!("at '{pointer}': {message}"))
        .collect();
    PrepareError::validation(format!("{headline}:\n- {}", details.join("\n- ")))
}
