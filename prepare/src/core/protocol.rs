//! Line protocol spoken by leaf actions on stdout.
//!
//! A command line looks like `:PA:<command>:PA:<param>:PA:<param>`; each field
//! is percent-encoded on its own. Anything else is plain output.

use std::borrow::Cow;

use percent_encoding::percent_decode_str;
use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use crate::core::scope::ExecutionScope;
use crate::core::types::json_type_name;
use crate::error::ProtocolError;

/// Prefix (and field separator) of command lines.
pub const DEMARCATION: &str = ":PA:";

/// A single line of action output, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolLine<'a> {
    Plain(&'a str),
    Command { name: String, params: Vec<String> },
}

/// What handling a line did to the scope or the logs.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Plain line forwarded to the action log.
    Forwarded,
    /// Message logged at the given level.
    Logged(tracing::Level),
    /// Outputs written for the current invocation.
    OutputsSet(Vec<String>),
    /// A `set-output` entry was refused; processing of that command stopped.
    OutputRejected(OutputRejection),
    /// Command without a handler.
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutputRejection {
    Undeclared { key: String },
    WrongType { key: String, expected: String, found: String },
}

impl std::fmt::Display for OutputRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputRejection::Undeclared { key } => write!(
                f,
                "trying to set output '{key}', but it is not declared by the action"
            ),
            OutputRejection::WrongType {
                key,
                expected,
                found,
            } => write!(
                f,
                "output '{key}' has type '{found}', but the declared type is '{expected}'"
            ),
        }
    }
}

/// Classify a raw line (trailing newline tolerated).
pub fn parse_line(line: &str) -> ProtocolLine<'_> {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(rest) = line.strip_prefix(DEMARCATION) else {
        return ProtocolLine::Plain(line);
    };
    let mut fields = rest.split(DEMARCATION).map(decode_field);
    let name = fields.next().unwrap_or_default();
    ProtocolLine::Command {
        name,
        params: fields.collect(),
    }
}

/// Handle one line of action output against `scope`.
pub fn handle_line(line: &str, scope: &mut ExecutionScope) -> Result<Effect, ProtocolError> {
    match parse_line(line) {
        ProtocolLine::Plain(text) => {
            trace!(target: "actions", "{text}");
            Ok(Effect::Forwarded)
        }
        ProtocolLine::Command { name, params } => handle_command(&name, &params, scope),
    }
}

pub fn handle_command(
    name: &str,
    params: &[String],
    scope: &mut ExecutionScope,
) -> Result<Effect, ProtocolError> {
    match name {
        "set-failed" | "error" => {
            let message = message_param(name, params)?;
            error!(target: "actions", "{message}");
            Ok(Effect::Logged(tracing::Level::ERROR))
        }
        "warning" => {
            let message = message_param(name, params)?;
            warn!(target: "actions", "{message}");
            Ok(Effect::Logged(tracing::Level::WARN))
        }
        "info" => {
            let message = message_param(name, params)?;
            info!(target: "actions", "{message}");
            Ok(Effect::Logged(tracing::Level::INFO))
        }
        "debug" => {
            let message = message_param(name, params)?;
            debug!(target: "actions", "{message}");
            Ok(Effect::Logged(tracing::Level::DEBUG))
        }
        "set-output" => set_output(name, params, scope),
        other => {
            warn!(
                target: "actions",
                command = other,
                "found command '{other}', but no handler is registered for it"
            );
            Ok(Effect::Unknown(other.to_string()))
        }
    }
}

fn set_output(
    name: &str,
    params: &[String],
    scope: &mut ExecutionScope,
) -> Result<Effect, ProtocolError> {
    if params.len() < 2 {
        return Err(ProtocolError::MissingParams {
            command: name.to_string(),
            expected: 2,
            found: params.len(),
        });
    }
    let payload: Value =
        serde_json::from_str(&params[1]).map_err(|err| ProtocolError::InvalidJson {
            command: name.to_string(),
            reason: err.to_string(),
        })?;
    let Value::Object(entries) = payload else {
        return Err(ProtocolError::NotAnObject {
            command: name.to_string(),
        });
    };
    let Some(current) = scope.current.clone() else {
        return Err(ProtocolError::NoCurrentAction {
            command: name.to_string(),
        });
    };

    let mut written = Vec::new();
    for (key, value) in entries {
        let Some(spec) = current.outputs.get(&key) else {
            let rejection = OutputRejection::Undeclared { key };
            warn!(target: "actions", action = %current.action_id, "{rejection}");
            return Ok(Effect::OutputRejected(rejection));
        };
        if !spec.accepts(&value) {
            let expected = match spec.items {
                Some(items) => format!("{}<{}>", spec.value_type, items),
                None => spec.value_type.to_string(),
            };
            let rejection = OutputRejection::WrongType {
                key,
                expected,
                found: json_type_name(&value).to_string(),
            };
            warn!(target: "actions", action = %current.action_id, "{rejection}");
            return Ok(Effect::OutputRejected(rejection));
        }
        debug!(step = %current.key, output = %key, "recording output");
        scope.record_output(&current.key, &key, value);
        written.push(key);
    }
    Ok(Effect::OutputsSet(written))
}

fn message_param<'p>(name: &str, params: &'p [String]) -> Result<&'p str, ProtocolError> {
    params
        .first()
        .map(|message| message.trim_end())
        .ok_or_else(|| ProtocolError::MissingParams {
            command: name.to_string(),
            expected: 1,
            found: 0,
        })
}

/// `+` is a space; everything else is standard percent-encoding. Trailing
/// whitespace is dropped.
fn decode_field(field: &str) -> String {
    let spaced: Cow<'_, str> = if field.contains('+') {
        Cow::Owned(field.replace('+', " "))
    } else {
        Cow::Borrowed(field)
    };
    percent_decode_str(&spaced).decode_utf8_lossy().trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ActionDefinition;
    use crate::test_support::capture_logs;
    use serde_json::json;

    fn scope_running(key: &str) -> ExecutionScope {
        let action = ActionDefinition::from_value(json!({
            "id": "test",
            "name": "test",
            "description": "test",
            "outputs": {
                "test": {"description": "test", "type": "string"},
                "files": {"description": "files", "type": "array", "items": "string"}
            },
            "runs": {"using": "python", "main": "main.py"}
        }))
        .expect("definition");
        let mut scope = ExecutionScope::default();
        scope.begin_action(key, &action);
        scope
    }

    fn params(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn parses_command_fields() {
        assert_eq!(
            parse_line(":PA:error:PA:error+message%21\n"),
            ProtocolLine::Command {
                name: "error".to_string(),
                params: params(&["error message!"]),
            }
        );
    }

    #[test]
    fn plain_lines_are_forwarded() {
        assert_eq!(parse_line("hello :PA: world\n"), ProtocolLine::Plain("hello :PA: world"));
        let mut scope = ExecutionScope::default();
        let effect = handle_line("just output", &mut scope).expect("handle");
        assert_eq!(effect, Effect::Forwarded);
    }

    #[test]
    fn message_commands_log_at_their_level() {
        let cases = [
            ("set-failed", tracing::Level::ERROR, "ERROR"),
            ("error", tracing::Level::ERROR, "ERROR"),
            ("warning", tracing::Level::WARN, "WARN"),
            ("info", tracing::Level::INFO, "INFO"),
            ("debug", tracing::Level::DEBUG, "DEBUG"),
        ];
        for (command, level, label) in cases {
            let mut scope = ExecutionScope::default();
            let (effect, logs) =
                capture_logs(|| handle_command(command, &params(&["message"]), &mut scope));
            assert_eq!(effect.expect("handle"), Effect::Logged(level));
            assert!(logs.contains("message"), "{command}: {logs}");
            assert!(logs.contains(label), "{command}: {logs}");
        }
    }

    #[test]
    fn missing_params_are_protocol_errors() {
        for command in ["set-failed", "error", "warning", "info", "debug", "set-output"] {
            let mut scope = scope_running("id");
            let err = handle_command(command, &[], &mut scope).expect_err("should fail");
            assert!(matches!(err, ProtocolError::MissingParams { .. }), "{command}");
        }
    }

    #[test]
    fn set_output_rejects_malformed_json() {
        let mut scope = scope_running("id");
        let err = handle_command("set-output", &params(&["message", "not a dict"]), &mut scope)
            .expect_err("should fail");
        assert!(err.to_string().contains("JSON"));
    }

    #[test]
    fn set_output_rejects_non_object() {
        let mut scope = scope_running("id");
        let err = handle_command("set-output", &params(&["message", "\"not a dict\""]), &mut scope)
            .expect_err("should fail");
        assert!(err.to_string().contains("dictionary"));
    }

    #[test]
    fn set_output_with_undeclared_key_warns_and_writes_nothing() {
        let mut scope = scope_running("id");
        let (effect, logs) = capture_logs(|| {
            handle_command(
                "set-output",
                &params(&["test", r#"{"testkey": "test"}"#]),
                &mut scope,
            )
        });
        assert!(matches!(
            effect.expect("handle"),
            Effect::OutputRejected(OutputRejection::Undeclared { .. })
        ));
        assert!(logs.contains("testkey"), "logs: {logs}");
        assert!(scope.outputs["id"].is_empty());
    }

    #[test]
    fn set_output_with_wrong_type_warns_and_writes_nothing() {
        let mut scope = scope_running("id");
        let (effect, logs) = capture_logs(|| {
            handle_command("set-output", &params(&["test", r#"{"test": 1}"#]), &mut scope)
        });
        assert!(matches!(
            effect.expect("handle"),
            Effect::OutputRejected(OutputRejection::WrongType { .. })
        ));
        assert!(logs.contains("type"), "logs: {logs}");
        assert_eq!(scope.output("id", "test"), None);
    }

    #[test]
    fn set_output_writes_declared_value() {
        let mut scope = scope_running("id");
        let line = r#":PA:set-output:PA:test:PA:{"test": "asd", "files": ["a"]}"#;
        let effect = handle_line(line, &mut scope).expect("handle");
        assert_eq!(
            effect,
            Effect::OutputsSet(vec!["test".to_string(), "files".to_string()])
        );
        assert_eq!(scope.output("id", "test"), Some(&json!("asd")));
        assert_eq!(scope.output("id", "files"), Some(&json!(["a"])));
    }

    #[test]
    fn set_output_keeps_entries_before_a_rejected_key() {
        let mut scope = scope_running("id");
        let line = r#":PA:set-output:PA:test:PA:{"test": "ok", "aaa": 1, "files": ["a"]}"#;
        let effect = handle_line(line, &mut scope).expect("handle");
        assert_eq!(
            effect,
            Effect::OutputRejected(OutputRejection::Undeclared {
                key: "aaa".to_string()
            })
        );
        assert_eq!(scope.output("id", "test"), Some(&json!("ok")));
        assert_eq!(scope.output("id", "files"), None);
    }

    #[test]
    fn set_output_outside_action_is_protocol_error() {
        let mut scope = ExecutionScope::default();
        let err = handle_command("set-output", &params(&["k", "{}"]), &mut scope)
            .expect_err("should fail");
        assert!(matches!(err, ProtocolError::NoCurrentAction { .. }));
    }

    #[test]
    fn unknown_command_is_ignored_with_warning() {
        let mut scope = ExecutionScope::default();
        let (effect, logs) =
            capture_logs(|| handle_line(":PA:add-mask:PA:secret", &mut scope));
        assert_eq!(effect.expect("handle"), Effect::Unknown("add-mask".to_string()));
        assert!(logs.contains("add-mask"));
    }
}
