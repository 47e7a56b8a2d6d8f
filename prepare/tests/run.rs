//! Pipeline execution with scripted processes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::json;

use prepare::core::types::PipelineDocument;
use prepare::engine::{Engine, InvocationOutcome, RunConfig, RunReport};
use prepare::io::document::read_yaml;
use prepare::io::provision::python_executable;
use prepare::io::validator::Validator;
use prepare::resolve::{ResolvedActions, Resolver};
use prepare::test_support::{
    MemoryCache, ScriptedFetcher, ScriptedLauncher, ScriptedProcess, ScriptedProvisioner,
    capture_logs, pipeline,
};

const REMOVE: &str = "\
id: remove
name: Remove
description: Remove files matching globs
inputs:
  input:
    description: Globs to remove
    type: array
    items: string
    required: true
  force:
    description: Ignore missing files
    type: boolean
    default: false
runs:
  using: python
  main: main.py
";

const COMPOSITE: &str = "\
id: composite
name: Composite
description: Remove a single glob
inputs:
  input:
    description: Glob to remove
    type: string
    required: true
runs:
  using: composite
  steps:
    - name: remove
      uses: remove
      with:
        input: [\"${{ inputs.input }}\"]
";

const PRODUCER: &str = "\
id: producer
name: Producer
description: Emits a path
outputs:
  path:
    description: Produced path
    type: string
runs:
  using: python
  main: main.py
";

fn resolve(document: &PipelineDocument, cache: &MemoryCache) -> ResolvedActions {
    let fetcher = ScriptedFetcher::new()
        .with_leaf("remove", REMOVE)
        .with_composite("composite", COMPOSITE)
        .with_leaf("producer", PRODUCER);
    let provisioner = ScriptedProvisioner::succeeding();
    let validator = Validator::new().expect("validator");
    Resolver::new(cache, &fetcher, &provisioner, &validator)
        .resolve(Path::new("prepare.yml"), document)
        .expect("resolve")
}

fn run(
    document: &PipelineDocument,
    launcher: &ScriptedLauncher,
    config: RunConfig,
) -> (RunReport, ResolvedActions) {
    let cache = MemoryCache::new();
    let resolved = resolve(document, &cache);
    let report = Engine::new(launcher, config)
        .with_environment(HashMap::from([("HOME".to_string(), "/home/student".to_string())]))
        .run(document, &resolved)
        .expect("run");
    (report, resolved)
}

fn outcomes(report: &RunReport, job: &str) -> Vec<InvocationOutcome> {
    report
        .job(job)
        .expect("job")
        .invocations
        .iter()
        .map(|invocation| invocation.outcome.clone())
        .collect()
}

#[test]
fn composite_passes_substituted_inputs_to_leaf() {
    let document = pipeline(
        "name: c\njobs:\n  clean:\n    - name: composite\n      uses: composite\n      with:\n        input: glob\n",
    );
    let launcher = ScriptedLauncher::default();
    let (report, resolved) = run(&document, &launcher, RunConfig::default());

    assert!(report.is_success());
    let composite = &report.job("clean").expect("job").invocations[0];
    assert_eq!(composite.children.len(), 1);

    let requests = launcher.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    let remove = resolved.get("remove").expect("remove");
    assert_eq!(request.env.get("PREPARE_INPUT").map(String::as_str), Some(r#"["glob"]"#));
    assert_eq!(request.env.get("PREPARE_FORCE").map(String::as_str), Some("false"));
    assert_eq!(
        request.env.get("VIRTUAL_ENV"),
        Some(&remove.paths.environment.display().to_string())
    );
    assert_eq!(request.env.get("HOME").map(String::as_str), Some("/home/student"));
    assert_eq!(request.program, python_executable(&remove.paths.environment));
    assert_eq!(
        request.args,
        vec![remove.paths.repo.join("main.py").display().to_string()]
    );
}

#[test]
fn outputs_flow_into_later_steps() {
    let document = pipeline(
        "\
name: outputs
jobs:
  build:
    - name: produce
      uses: producer
    - name: show
      run: echo ${{ steps.produce.outputs.path }}
",
    );
    let launcher = ScriptedLauncher::new(vec![ScriptedProcess::ok(&[
        "producing",
        r#":PA:set-output:PA:path:PA:{"path": "out/report.txt"}"#,
    ])]);
    let (report, _) = run(&document, &launcher, RunConfig::default());

    assert!(report.is_success());
    let requests = launcher.requests();
    assert_eq!(requests[1].program, PathBuf::from("bash"));
    assert_eq!(requests[1].args, vec!["-c".to_string(), "echo out/report.txt".to_string()]);
    assert_eq!(
        report.job("build").expect("job").outputs["produce"].get("path"),
        Some(&json!("out/report.txt"))
    );
}

#[test]
fn failures_do_not_stop_the_job_by_default() {
    let document = pipeline(
        "name: f\njobs:\n  job:\n    - name: first\n      run: exit 1\n    - name: second\n      run: echo ok\n",
    );
    let launcher = ScriptedLauncher::new(vec![ScriptedProcess::exit(1, &[])]);
    let (report, _) = run(&document, &launcher, RunConfig::default());

    assert_eq!(launcher.requests().len(), 2);
    assert_eq!(
        outcomes(&report, "job"),
        vec![InvocationOutcome::Failed(Some(1)), InvocationOutcome::Succeeded]
    );
    assert!(!report.is_success());
}

#[test]
fn fail_fast_skips_the_rest_of_the_job() {
    let document = pipeline(
        "\
name: f
jobs:
  first:
    - name: fails
      run: exit 1
    - name: skipped
      run: echo never
  second:
    - name: still runs
      run: echo ok
",
    );
    let launcher = ScriptedLauncher::new(vec![ScriptedProcess::exit(1, &[])]);
    let config = RunConfig {
        fail_fast: true,
        ..RunConfig::default()
    };
    let (report, _) = run(&document, &launcher, config);

    assert_eq!(launcher.requests().len(), 2);
    assert_eq!(
        outcomes(&report, "first"),
        vec![InvocationOutcome::Failed(Some(1)), InvocationOutcome::Skipped]
    );
    assert_eq!(outcomes(&report, "second"), vec![InvocationOutcome::Succeeded]);
    assert_eq!(report.failures().len(), 1);
}

#[test]
fn protocol_error_fails_invocation_and_ignores_later_commands() {
    let document = pipeline("name: p\njobs:\n  job:\n    - name: produce\n      uses: producer\n");
    let launcher = ScriptedLauncher::new(vec![ScriptedProcess::ok(&[
        ":PA:set-output:PA:path",
        r#":PA:set-output:PA:path:PA:{"path": "late"}"#,
        "trailing output",
    ])]);
    let ((report, _), logs) = capture_logs(|| run(&document, &launcher, RunConfig::default()));

    let outcome = &outcomes(&report, "job")[0];
    let InvocationOutcome::ProtocolError(message) = outcome else {
        panic!("expected protocol error, got {outcome:?}");
    };
    assert!(message.contains("missing required params"), "{message}");
    assert!(report.job("job").expect("job").outputs["produce"].is_empty());
    assert!(logs.contains("trailing output"), "{logs}");
}

#[test]
fn rejected_output_is_not_recorded() {
    let document = pipeline("name: p\njobs:\n  job:\n    - name: produce\n      uses: producer\n");
    let launcher = ScriptedLauncher::new(vec![ScriptedProcess::ok(&[
        r#":PA:set-output:PA:path:PA:{"path": 3}"#,
    ])]);
    let ((report, _), logs) = capture_logs(|| run(&document, &launcher, RunConfig::default()));

    assert!(report.is_success());
    assert!(report.job("job").expect("job").outputs["produce"].is_empty());
    assert!(logs.contains("path"), "{logs}");
    assert!(logs.contains("type"), "{logs}");
}

#[test]
fn duplicate_keys_keep_the_last_outputs() {
    let document = pipeline(
        "name: d\njobs:\n  job:\n    - name: produce\n      uses: producer\n    - name: produce\n      uses: producer\n",
    );
    let launcher = ScriptedLauncher::new(vec![
        ScriptedProcess::ok(&[r#":PA:set-output:PA:path:PA:{"path": "first"}"#]),
        ScriptedProcess::ok(&[r#":PA:set-output:PA:path:PA:{"path": "second"}"#]),
    ]);
    let ((report, _), logs) = capture_logs(|| run(&document, &launcher, RunConfig::default()));

    assert_eq!(
        report.job("job").expect("job").outputs["produce"].get("path"),
        Some(&json!("second"))
    );
    assert!(logs.contains("duplicate invocation key 'produce'"), "{logs}");
}

#[test]
fn jobs_do_not_share_outputs() {
    let document = pipeline(
        "\
name: isolated
jobs:
  first:
    - name: produce
      uses: producer
  second:
    - name: show
      run: echo [${{ steps.produce.outputs.path }}]
",
    );
    let launcher = ScriptedLauncher::new(vec![ScriptedProcess::ok(&[
        r#":PA:set-output:PA:path:PA:{"path": "x"}"#,
    ])]);
    let (report, _) = run(&document, &launcher, RunConfig::default());

    assert!(report.is_success());
    assert_eq!(launcher.requests()[1].args[1], "echo []");
}

#[test]
fn jobs_run_in_document_order_from_yaml_files() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("prepare.yml");
    std::fs::write(
        &path,
        "\
name: ordered
jobs:
  zeta:
    - name: last alphabetically
      run: echo z
  alpha:
    - name: first alphabetically
      run: echo a
",
    )
    .expect("write pipeline");
    let raw = read_yaml(&path).expect("read pipeline");
    let document: PipelineDocument = serde_json::from_value(raw).expect("pipeline");
    let launcher = ScriptedLauncher::default();
    let (report, _) = run(&document, &launcher, RunConfig::default());

    let jobs: Vec<&str> = report.jobs.iter().map(|job| job.name.as_str()).collect();
    assert_eq!(jobs, vec!["zeta", "alpha"]);
    let commands: Vec<String> = launcher
        .requests()
        .iter()
        .map(|request| request.args[1].clone())
        .collect();
    assert_eq!(commands, vec!["echo z", "echo a"]);
}
