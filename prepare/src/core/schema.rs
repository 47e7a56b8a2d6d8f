//! Invocation schema generation and checks of declared inputs and outputs.
//!
//! The generated schema describes the accepted shape of a `uses` invocation of
//! one action and is derived mechanically from the action's declared inputs.

use serde_json::{Map, Value, json};

use crate::core::reference::ActionReference;
use crate::core::types::{ActionDefinition, InputSpec, ValueType, json_type_name};

pub const SCHEMA_DIALECT: &str = "https://json-schema.org/draft/2020-12/schema";

/// Build the JSON Schema a `uses` invocation of `action` must satisfy.
pub fn invocation_schema(reference: &ActionReference, action: &ActionDefinition) -> Value {
    let mut properties = Map::new();
    properties.insert("name".to_string(), json!({"type": "string"}));
    properties.insert("id".to_string(), json!({"type": "string"}));
    properties.insert("uses".to_string(), json!({"type": "string"}));

    let mut required = vec![json!("name"), json!("uses")];
    if !action.inputs.is_empty() {
        let with_required: Vec<Value> = action
            .inputs
            .iter()
            .filter(|input| input.required)
            .map(|input| json!(input.name))
            .collect();
        let mut with = json!({
            "type": "object",
            "additionalProperties": false,
            "properties": Value::Object(
                action.inputs.iter().map(|input| (input.name.clone(), input_schema(input))).collect()
            ),
        });
        if !with_required.is_empty() {
            with["required"] = Value::Array(with_required);
            required.push(json!("with"));
        }
        properties.insert("with".to_string(), with);
    }

    json!({
        "$schema": SCHEMA_DIALECT,
        "$id": format!(
            "https://github.com/{}/{}/{}.schema.json",
            reference.organization, reference.name, reference.name
        ),
        "title": action.name,
        "description": action.description,
        "type": "object",
        "additionalProperties": false,
        "properties": Value::Object(properties),
        "required": required,
    })
}

fn input_schema(input: &InputSpec) -> Value {
    let mut schema = json!({"type": input.value_type.as_str()});
    if let Some(items) = input.items {
        schema["items"] = json!({"type": items.as_str()});
    }
    if let Some(default) = &input.default {
        schema["default"] = default.clone();
    }
    schema
}

/// Check declared inputs and outputs for consistency: `items` is given exactly
/// when the type is `array`, and input defaults match their declared type
/// element by element.
///
/// Returns one message per problem; an empty vector means the declarations are fine.
pub fn check_declarations(action: &ActionDefinition) -> Vec<String> {
    let mut problems = Vec::new();
    for input in &action.inputs {
        if let Some(problem) = items_problem("input", &input.name, input.value_type, input.items, action)
        {
            problems.push(problem);
            continue;
        }
        let Some(default) = &input.default else {
            continue;
        };
        if !input.value_type.matches(default) {
            problems.push(format!(
                "default value {} of input '{}' of action '{}' has type '{}', expected '{}'",
                default,
                input.name,
                action.id,
                json_type_name(default),
                input.value_type
            ));
            continue;
        }
        if let (Some(items), Value::Array(elements)) = (input.items, default) {
            for (index, element) in elements.iter().enumerate() {
                if !items.matches(element) {
                    problems.push(format!(
                        "default value of input '{}' of action '{}' has element {} at index {} \
                         of type '{}', expected '{}'",
                        input.name,
                        action.id,
                        element,
                        index,
                        json_type_name(element),
                        items
                    ));
                }
            }
        }
    }
    for (name, output) in &action.outputs {
        if let Some(problem) = items_problem("output", name, output.value_type, output.items, action) {
            problems.push(problem);
        }
    }
    problems
}

fn items_problem(
    kind: &str,
    name: &str,
    value_type: ValueType,
    items: Option<ValueType>,
    action: &ActionDefinition,
) -> Option<String> {
    match (value_type, items) {
        (ValueType::Array, None) => Some(format!(
            "{kind} '{name}' of action '{}' is an array but declares no 'items' type",
            action.id
        )),
        (other, Some(items)) if other != ValueType::Array => Some(format!(
            "{kind} '{name}' of action '{}' has type '{other}' but declares 'items: {items}'",
            action.id
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(inputs: Value) -> ActionDefinition {
        ActionDefinition::from_value(json!({
            "id": "test",
            "name": "test",
            "description": "test",
            "inputs": inputs,
            "runs": {"using": "python", "main": "main.py"}
        }))
        .expect("definition")
    }

    fn reference() -> ActionReference {
        ActionReference::parse("test").expect("reference")
    }

    #[test]
    fn schema_without_inputs_has_no_with_property() {
        let schema = invocation_schema(&reference(), &action(json!({})));
        assert!(schema["properties"].get("with").is_none());
        assert_eq!(schema["additionalProperties"], json!(false));
        assert_eq!(schema["required"], json!(["name", "uses"]));
    }

    #[test]
    fn schema_lists_inputs_and_required() {
        let schema = invocation_schema(
            &reference(),
            &action(json!({
                "fail": {"description": "f", "type": "boolean", "required": true},
                "list": {"description": "l", "type": "array", "items": "string", "default": ["a"]}
            })),
        );
        let with = &schema["properties"]["with"];
        assert_eq!(with["additionalProperties"], json!(false));
        assert_eq!(with["properties"]["fail"], json!({"type": "boolean"}));
        assert_eq!(
            with["properties"]["list"],
            json!({"type": "array", "items": {"type": "string"}, "default": ["a"]})
        );
        assert_eq!(with["required"], json!(["fail"]));
        assert_eq!(schema["required"], json!(["name", "uses", "with"]));
    }

    #[test]
    fn optional_inputs_do_not_require_with() {
        let schema = invocation_schema(
            &reference(),
            &action(json!({"opt": {"description": "o", "type": "string"}})),
        );
        assert!(schema["properties"]["with"].get("required").is_none());
        assert_eq!(schema["required"], json!(["name", "uses"]));
    }

    #[test]
    fn valid_defaults_pass() {
        let problems = check_declarations(&action(json!({
            "test": {"description": "d", "type": "string", "default": "test"},
            "list": {"description": "d", "type": "array", "items": "string", "default": ["a", "b"]},
            "n": {"description": "d", "type": "number", "default": 3}
        })));
        assert!(problems.is_empty(), "{problems:?}");
    }

    #[test]
    fn scalar_default_with_wrong_type_is_reported() {
        let problems = check_declarations(&action(json!({
            "flag": {"description": "d", "type": "boolean", "default": "yes"}
        })));
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("flag"));
        assert!(problems[0].contains("boolean"));
    }

    #[test]
    fn array_default_names_offending_element() {
        let problems = check_declarations(&action(json!({
            "list": {"description": "d", "type": "array", "items": "string", "default": ["ok", 5]}
        })));
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("list"), "{}", problems[0]);
        assert!(problems[0].contains("element 5"), "{}", problems[0]);
    }

    #[test]
    fn array_without_items_is_reported() {
        let problems = check_declarations(&action(json!({
            "list": {"description": "d", "type": "array"}
        })));
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("items"));
    }

    #[test]
    fn items_on_scalar_input_is_reported() {
        let problems = check_declarations(&action(json!({
            "name": {"description": "d", "type": "string", "items": "string"}
        })));
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("input 'name'"), "{}", problems[0]);
        assert!(problems[0].contains("items"), "{}", problems[0]);
    }

    #[test]
    fn output_array_without_items_is_reported() {
        let definition = ActionDefinition::from_value(json!({
            "id": "test",
            "name": "test",
            "description": "test",
            "outputs": {
                "files": {"description": "f", "type": "array"},
                "count": {"description": "c", "type": "integer", "items": "string"},
                "ok": {"description": "o", "type": "array", "items": "string"}
            },
            "runs": {"using": "python", "main": "main.py"}
        }))
        .expect("definition");
        let problems = check_declarations(&definition);
        assert_eq!(problems.len(), 2, "{problems:?}");
        assert!(problems[0].contains("output 'files'"), "{}", problems[0]);
        assert!(problems[1].contains("output 'count'"), "{}", problems[1]);
    }
}
