//! `${{ ... }}` template substitution against an [`ExecutionScope`].
//!
//! Two expression forms are understood:
//!
//! - `inputs.<name>` reads the scope's bound inputs.
//! - `<ns>.<step>.outputs.<name>` reads an output recorded by an earlier
//!   invocation, where `<ns>` is one of [`OUTPUT_NAMESPACES`].
//!
//! Resolution is best effort: an expression that cannot be resolved is logged
//! and replaced by the empty string.

use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::core::scope::ExecutionScope;

/// Leading tokens accepted for output references.
pub const OUTPUT_NAMESPACES: [&str; 3] = ["steps", "jobs", "tasks"];

static EXPRESSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{\{\s*(.*?)\s*\}\}").unwrap());
static INPUT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^inputs\.([A-Za-z0-9_-]+)$").unwrap());
static OUTPUT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_-]*)\.([A-Za-z0-9_-]+)\.outputs\.([A-Za-z0-9_-]+)$").unwrap()
});

/// Replace every expression in `template`, left to right.
pub fn substitute(template: &str, scope: &ExecutionScope) -> String {
    if !EXPRESSION_RE.is_match(template) {
        return template.to_string();
    }
    let mut result = String::with_capacity(template.len());
    let mut last = 0;
    for captures in EXPRESSION_RE.captures_iter(template) {
        let (Some(whole), Some(content)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        result.push_str(&template[last..whole.start()]);
        match resolve(content.as_str(), scope) {
            Some(value) => result.push_str(&value_to_string(value)),
            None => warn!(
                target: "actions",
                expression = content.as_str(),
                "cannot substitute '{}'",
                content.as_str()
            ),
        }
        last = whole.end();
    }
    result.push_str(&template[last..]);
    result
}

/// Substitute string values and string elements of arrays in place.
///
/// Other values pass through untouched.
pub fn substitute_all(values: &mut IndexMap<String, Value>, scope: &ExecutionScope) {
    for value in values.values_mut() {
        match value {
            Value::String(text) => *text = substitute(text, scope),
            Value::Array(elements) => {
                for element in elements.iter_mut() {
                    if let Value::String(text) = element {
                        *text = substitute(text, scope);
                    }
                }
            }
            _ => {}
        }
    }
}

/// Textual form used when a value is spliced into a template.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        other => other.to_string(),
    }
}

/// Value an expression refers to; `null` counts as unresolved.
fn resolve<'s>(content: &str, scope: &'s ExecutionScope) -> Option<&'s Value> {
    let value = if let Some(captures) = INPUT_RE.captures(content) {
        scope.input(&captures[1])
    } else if let Some(captures) = OUTPUT_RE.captures(content) {
        if !OUTPUT_NAMESPACES.contains(&&captures[1]) {
            return None;
        }
        scope.output(&captures[2], &captures[3])
    } else {
        None
    };
    value.filter(|value| !value.is_null())
}
