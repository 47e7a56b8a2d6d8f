//! Variable environment visible to substitution and running invocations.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::core::types::{ActionDefinition, OutputSpec};

/// Leaf invocation currently receiving structured output.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentAction {
    /// Invocation key the outputs are recorded under.
    pub key: String,
    pub action_id: String,
    /// Outputs the action declares; anything else is rejected.
    pub outputs: IndexMap<String, OutputSpec>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionScope {
    pub environment: HashMap<String, String>,
    pub outputs: HashMap<String, Map<String, Value>>,
    pub inputs: IndexMap<String, Value>,
    pub current: Option<CurrentAction>,
}

impl ExecutionScope {
    /// Root scope for a job: given environment, no outputs, no inputs.
    pub fn root(environment: HashMap<String, String>) -> Self {
        Self {
            environment,
            ..Self::default()
        }
    }

    /// Scope for a composite expansion.
    ///
    /// The environment is copied so nothing propagates back to `self`;
    /// outputs start empty so nested step keys cannot collide with ours.
    pub fn child(&self, inputs: IndexMap<String, Value>) -> Self {
        Self {
            environment: self.environment.clone(),
            outputs: HashMap::new(),
            inputs,
            current: None,
        }
    }

    /// Mark a leaf invocation as current and reset its output slot.
    pub fn begin_action(&mut self, key: &str, action: &ActionDefinition) {
        self.outputs.insert(key.to_string(), Map::new());
        self.current = Some(CurrentAction {
            key: key.to_string(),
            action_id: action.id.clone(),
            outputs: action.outputs.clone(),
        });
    }

    pub fn end_action(&mut self) {
        self.current = None;
    }

    pub fn input(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name)
    }

    pub fn output(&self, step: &str, name: &str) -> Option<&Value> {
        self.outputs.get(step).and_then(|outputs| outputs.get(name))
    }

    pub fn record_output(&mut self, step: &str, name: &str, value: Value) {
        self.outputs
            .entry(step.to_string())
            .or_default()
            .insert(name.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn child_copies_environment_but_not_outputs() {
        let mut parent = ExecutionScope::root(HashMap::from([("A".to_string(), "1".to_string())]));
        parent.record_output("step", "out", json!("value"));

        let mut inputs = IndexMap::new();
        inputs.insert("input".to_string(), json!("glob"));
        let mut child = parent.child(inputs);
        child.environment.insert("B".to_string(), "2".to_string());

        assert_eq!(child.environment.get("A").map(String::as_str), Some("1"));
        assert!(child.outputs.is_empty());
        assert_eq!(child.input("input"), Some(&json!("glob")));
        assert!(!parent.environment.contains_key("B"));
    }

    #[test]
    fn begin_action_resets_previous_outputs_for_key() {
        let action = ActionDefinition::from_value(json!({
            "id": "a",
            "name": "a",
            "description": "a",
            "runs": {"using": "python", "main": "main.py"}
        }))
        .expect("definition");

        let mut scope = ExecutionScope::default();
        scope.record_output("k", "out", json!(1));
        scope.begin_action("k", &action);
        assert_eq!(scope.output("k", "out"), None);
        assert_eq!(scope.current.as_ref().map(|c| c.key.as_str()), Some("k"));

        scope.end_action();
        assert!(scope.current.is_none());
    }
}
