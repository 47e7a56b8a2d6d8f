//! Stable exit codes for the prepare CLI.

/// Command succeeded; for `run`, every invocation succeeded.
pub const OK: i32 = 0;
/// Invalid pipeline, action, reference, config, or any other error.
pub const INVALID: i32 = 1;
/// An action's dependencies could not be installed.
pub const DEPENDENCY: i32 = 2;
/// The pipeline ran but at least one invocation did not succeed.
pub const FAILED: i32 = 3;

/// Exit code for an error that aborted a command.
pub fn for_error(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<crate::error::PrepareError>() {
        Some(crate::error::PrepareError::Dependency { .. }) => DEPENDENCY,
        _ => INVALID,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PrepareError;
    use std::path::PathBuf;

    #[test]
    fn dependency_failures_have_their_own_code() {
        let err = anyhow::Error::from(PrepareError::Dependency {
            action: "remove".to_string(),
            log_path: PathBuf::from("remove.log"),
        });
        assert_eq!(for_error(&err), DEPENDENCY);
    }

    #[test]
    fn other_errors_are_invalid() {
        assert_eq!(for_error(&anyhow::anyhow!("boom")), INVALID);
        let err = anyhow::Error::from(PrepareError::validation("bad"));
        assert_eq!(for_error(&err), INVALID);
    }
}
