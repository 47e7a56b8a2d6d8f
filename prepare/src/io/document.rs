//! Locating and reading YAML documents.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use serde_json::Value;

pub const PIPELINE_FILE_NAMES: [&str; 2] = ["prepare.yml", "prepare.yaml"];
pub const ACTION_FILE_NAMES: [&str; 2] = ["action.yml", "action.yaml"];

/// Find the pipeline file to run.
///
/// An explicit path is resolved against `dir` and must be a file. Otherwise
/// exactly one of [`PIPELINE_FILE_NAMES`] must exist in `dir`.
pub fn find_pipeline_file(dir: &Path, explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(explicit) = explicit {
        let path = dir.join(explicit);
        if !path.is_file() {
            bail!("supplied file '{}' is not a file", path.display());
        }
        return Ok(path);
    }
    let found: Vec<PathBuf> = PIPELINE_FILE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .filter(|path| path.is_file())
        .collect();
    match found.as_slice() {
        [] => Err(anyhow!(
            "no {} file found in {}",
            PIPELINE_FILE_NAMES.join(" or "),
            dir.display()
        )),
        [only] => Ok(only.clone()),
        _ => Err(anyhow!(
            "both {} exist in {}, use --file to pick one",
            PIPELINE_FILE_NAMES.join(" and "),
            dir.display()
        )),
    }
}

/// The action definition file inside a fetched repository.
pub fn find_action_file(repo: &Path) -> Result<PathBuf> {
    ACTION_FILE_NAMES
        .iter()
        .map(|name| repo.join(name))
        .find(|path| path.is_file())
        .ok_or_else(|| {
            anyhow!(
                "no {} found in {}",
                ACTION_FILE_NAMES.join(" or "),
                repo.display()
            )
        })
}

/// Read a YAML file into a JSON value. An empty file reads as `null`.
pub fn read_yaml(path: &Path) -> Result<Value> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    if contents.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_yaml::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn finds_single_pipeline_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("prepare.yaml"), "name: x\n").expect("write");
        let found = find_pipeline_file(temp.path(), None).expect("find");
        assert_eq!(found, temp.path().join("prepare.yaml"));
    }

    #[test]
    fn missing_pipeline_file_is_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = find_pipeline_file(temp.path(), None).expect_err("should fail");
        assert!(err.to_string().contains("prepare.yml"));
    }

    #[test]
    fn ambiguous_pipeline_files_are_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("prepare.yml"), "").expect("write");
        fs::write(temp.path().join("prepare.yaml"), "").expect("write");
        let err = find_pipeline_file(temp.path(), None).expect_err("should fail");
        assert!(err.to_string().contains("--file"));
    }

    #[test]
    fn explicit_file_must_exist() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("custom.yml"), "").expect("write");
        let found =
            find_pipeline_file(temp.path(), Some(Path::new("custom.yml"))).expect("find");
        assert_eq!(found, temp.path().join("custom.yml"));
        assert!(find_pipeline_file(temp.path(), Some(Path::new("nope.yml"))).is_err());
    }

    #[test]
    fn reads_yaml_as_json() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("doc.yml");
        fs::write(&path, "name: test\nlist:\n  - 1\n  - two\nflag: true\n").expect("write");
        assert_eq!(
            read_yaml(&path).expect("read"),
            json!({"name": "test", "list": [1, "two"], "flag": true})
        );
    }

    #[test]
    fn empty_yaml_reads_as_null() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("doc.yml");
        fs::write(&path, "\n").expect("write");
        assert_eq!(read_yaml(&path).expect("read"), Value::Null);
    }

    #[test]
    fn prefers_action_yml() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("action.yaml"), "").expect("write");
        assert_eq!(
            find_action_file(temp.path()).expect("find"),
            temp.path().join("action.yaml")
        );
        fs::write(temp.path().join("action.yml"), "").expect("write");
        assert_eq!(
            find_action_file(temp.path()).expect("find"),
            temp.path().join("action.yml")
        );
    }
}
