//! Pipeline and action document model.
//!
//! These types mirror the YAML documents after they passed structural
//! validation. They carry no I/O and no cache paths.

use std::fmt;
use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `runs.using` discriminator for composite actions.
pub const COMPOSITE: &str = "composite";

/// Declared type of an action input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
}

impl ValueType {
    pub fn as_str(self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Integer => "integer",
            ValueType::Number => "number",
            ValueType::Boolean => "boolean",
            ValueType::Array => "array",
        }
    }

    /// Whether the runtime JSON type of `value` matches this type.
    ///
    /// Item types of arrays are not inspected here.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            ValueType::String => value.is_string(),
            ValueType::Integer => value.is_i64() || value.is_u64(),
            ValueType::Number => value.is_number(),
            ValueType::Boolean => value.is_boolean(),
            ValueType::Array => value.is_array(),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Short name of a JSON value's runtime type, for diagnostics.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputSpec {
    pub name: String,
    pub description: String,
    pub required: bool,
    pub value_type: ValueType,
    /// Element type; present iff `value_type` is `array`.
    pub items: Option<ValueType>,
    pub default: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub description: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<ValueType>,
}

impl OutputSpec {
    /// Check a value against the declared type, including array elements.
    pub fn accepts(&self, value: &Value) -> bool {
        if !self.value_type.matches(value) {
            return false;
        }
        match (self.items, value) {
            (Some(items), Value::Array(elements)) => elements.iter().all(|e| items.matches(e)),
            _ => true,
        }
    }
}

/// Variant-specific part of an action definition.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionKind {
    /// Single executable run inside the action's provisioned environment.
    Leaf { using: String, main: PathBuf },
    /// Sequence of nested invocations expanded into a child scope.
    Composite { steps: Vec<InvocationSpec> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub inputs: Vec<InputSpec>,
    pub outputs: IndexMap<String, OutputSpec>,
    pub kind: ActionKind,
}

impl ActionDefinition {
    /// Build a definition from a structurally valid action document.
    pub fn from_value(value: Value) -> Result<Self, String> {
        let doc: ActionDocument =
            serde_json::from_value(value).map_err(|err| format!("invalid action document: {err}"))?;

        let kind = if doc.runs.using == COMPOSITE {
            let steps = doc
                .runs
                .steps
                .ok_or_else(|| format!("composite action '{}' must declare runs.steps", doc.id))?;
            ActionKind::Composite { steps }
        } else {
            let main = doc.runs.main.ok_or_else(|| {
                format!(
                    "action '{}' using '{}' must declare runs.main",
                    doc.id, doc.runs.using
                )
            })?;
            ActionKind::Leaf {
                using: doc.runs.using,
                main,
            }
        };

        let inputs = doc
            .inputs
            .into_iter()
            .map(|(name, input)| InputSpec {
                name,
                description: input.description,
                required: input.required,
                value_type: input.value_type,
                items: input.items,
                default: input.default,
            })
            .collect();

        Ok(Self {
            id: doc.id,
            name: doc.name,
            description: doc.description,
            inputs,
            outputs: doc.outputs,
            kind,
        })
    }

    pub fn is_composite(&self) -> bool {
        matches!(self.kind, ActionKind::Composite { .. })
    }

    /// `uses` invocations of a composite's steps (empty for leaf actions).
    pub fn nested_uses(&self) -> impl Iterator<Item = &UsesInvocation> {
        let steps: &[InvocationSpec] = match &self.kind {
            ActionKind::Composite { steps } => steps,
            ActionKind::Leaf { .. } => &[],
        };
        steps.iter().filter_map(|step| match step {
            InvocationSpec::Uses(uses) => Some(uses),
            InvocationSpec::Run(_) => None,
        })
    }

    /// Fill declared defaults for inputs absent from `with`.
    pub fn apply_defaults(&self, with: &mut IndexMap<String, Value>) {
        for input in &self.inputs {
            if let Some(default) = &input.default
                && !with.contains_key(&input.name)
            {
                with.insert(input.name.clone(), default.clone());
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ActionDocument {
    id: String,
    name: String,
    description: String,
    #[serde(default)]
    inputs: IndexMap<String, InputDocument>,
    #[serde(default)]
    outputs: IndexMap<String, OutputSpec>,
    runs: RunsDocument,
}

#[derive(Debug, Deserialize)]
struct InputDocument {
    description: String,
    #[serde(default)]
    required: bool,
    #[serde(rename = "type")]
    value_type: ValueType,
    #[serde(default)]
    items: Option<ValueType>,
    #[serde(default)]
    default: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RunsDocument {
    using: String,
    #[serde(default)]
    steps: Option<Vec<InvocationSpec>>,
    #[serde(default)]
    main: Option<PathBuf>,
}

/// Top-level pipeline document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDocument {
    pub name: String,
    /// Jobs in document order.
    pub jobs: IndexMap<String, Vec<InvocationSpec>>,
}

impl PipelineDocument {
    /// Every `uses` invocation across all jobs, in document order.
    pub fn uses_invocations(&self) -> impl Iterator<Item = &UsesInvocation> {
        self.jobs.values().flatten().filter_map(|step| match step {
            InvocationSpec::Uses(uses) => Some(uses),
            InvocationSpec::Run(_) => None,
        })
    }
}

/// One entry of a job's (or composite action's) step list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InvocationSpec {
    Run(RunInvocation),
    Uses(UsesInvocation),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunInvocation {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub run: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UsesInvocation {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub uses: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub with: IndexMap<String, Value>,
}

impl UsesInvocation {
    pub fn key(&self) -> String {
        invocation_key(&self.name, self.id.as_deref())
    }
}

impl InvocationSpec {
    pub fn name(&self) -> &str {
        match self {
            InvocationSpec::Run(run) => &run.name,
            InvocationSpec::Uses(uses) => &uses.name,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            InvocationSpec::Run(run) => run.id.as_deref(),
            InvocationSpec::Uses(uses) => uses.id.as_deref(),
        }
    }

    /// Key that namespaces this invocation's outputs within its scope.
    pub fn key(&self) -> String {
        invocation_key(self.name(), self.id())
    }
}

/// `id` if given, otherwise the lower-cased name with `_` mapped to `-` and
/// whitespace runs collapsed to a single `-`.
///
/// Two unnamed invocations with the same name share a key.
pub fn invocation_key(name: &str, id: Option<&str>) -> String {
    if let Some(id) = id {
        return id.to_string();
    }
    let mut key = String::with_capacity(name.len());
    let mut in_whitespace = false;
    for ch in name.chars() {
        if ch.is_whitespace() {
            if !in_whitespace {
                key.push('-');
            }
            in_whitespace = true;
            continue;
        }
        in_whitespace = false;
        if ch == '_' {
            key.push('-');
        } else {
            key.extend(ch.to_lowercase());
        }
    }
    key
}
