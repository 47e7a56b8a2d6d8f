//! `prepare`: run assignment preparation pipelines.
//!
//! `prepare run` resolves every action the pipeline uses (fetching,
//! validating and provisioning what is not cached) and then executes its
//! jobs. `prepare task` and `prepare tasks` manage the action cache.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::{error, info};

use prepare::core::types::PipelineDocument;
use prepare::engine::{Engine, InvocationOutcome, RunConfig, RunReport};
use prepare::error::PrepareError;
use prepare::exit_codes;
use prepare::io::cache::{FsCache, default_cache_dir};
use prepare::io::config::{GitMode, PrepareConfig, default_config_path, load_config};
use prepare::io::document::{find_pipeline_file, read_yaml};
use prepare::io::git::GitFetcher;
use prepare::io::process::ProcessLauncher;
use prepare::io::provision::VenvProvisioner;
use prepare::io::validator::Validator;
use prepare::resolve::Resolver;
use prepare::{logging, tasks};

#[derive(Parser)]
#[command(name = "prepare", version, about = "Run prepare-assignment pipelines")]
struct Cli {
    /// Config file (defaults to `<config dir>/prepare/config.toml`).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Raise the runner's own log level (repeat for more).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    debug: u8,

    /// Raise the log level of action output (repeat for more).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve and run the pipeline in the current directory.
    Run(RunArgs),
    /// Inspect or manage one cached action.
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },
    /// Manage all cached actions.
    Tasks {
        #[command(subcommand)]
        command: TasksCommand,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Pipeline file to run instead of `prepare.yml`/`prepare.yaml`.
    #[arg(short, long, value_name = "FILE")]
    file: Option<PathBuf>,

    /// How action repositories are cloned (overrides `core.git_mode`).
    #[arg(long, value_enum)]
    git: Option<GitMode>,
}

#[derive(Subcommand)]
enum TaskCommand {
    /// Show a cached action's definition.
    Info { reference: String },
    /// Fetch and provision an action again.
    Update { reference: String },
    /// Delete an action from the cache.
    Remove { reference: String },
}

#[derive(Subcommand)]
enum TasksCommand {
    /// List cached actions.
    #[command(alias = "list")]
    Ls,
    /// Delete every cached action.
    Remove {
        /// Confirm the removal.
        #[arg(long)]
        yes: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    let code = match dispatch(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::for_error(&err)
        }
    };
    std::process::exit(code);
}

fn dispatch(cli: Cli) -> Result<i32> {
    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let config = load_config(&config_path)?;
    logging::init(
        cli.debug.max(config.core.debug),
        cli.verbose.max(config.core.verbosity),
    );

    match cli.command {
        Command::Run(args) => cmd_run(&config, &args),
        Command::Task { command } => cmd_task(&config, command).map(|()| exit_codes::OK),
        Command::Tasks { command } => cmd_tasks(&config, command).map(|()| exit_codes::OK),
    }
}

fn cache_for(config: &PrepareConfig) -> Result<FsCache> {
    let root = match &config.cache_dir {
        Some(dir) => dir.clone(),
        None => default_cache_dir()?,
    };
    Ok(FsCache::new(root))
}

fn cmd_run(config: &PrepareConfig, args: &RunArgs) -> Result<i32> {
    let cwd = std::env::current_dir().context("resolve current directory")?;
    let pipeline_path = find_pipeline_file(&cwd, args.file.as_deref())?;
    let workdir = pipeline_path.parent().unwrap_or(cwd.as_path()).to_path_buf();

    let validator = Validator::new()?;
    let document = load_pipeline(&validator, &pipeline_path)?;
    info!(pipeline = %document.name, file = %pipeline_path.display(), "loaded pipeline");

    let cache = cache_for(config)?;
    let fetcher = GitFetcher::new(
        args.git.unwrap_or(config.core.git_mode),
        config.core.git_host.clone(),
    );
    let provisioner = VenvProvisioner::new(config.provision.python.clone());
    let resolver = Resolver::new(&cache, &fetcher, &provisioner, &validator);
    let resolved = resolver.resolve(&pipeline_path, &document)?;

    let engine = Engine::new(&ProcessLauncher, RunConfig::from(config)).with_workdir(workdir);
    let report = engine.run(&document, &resolved)?;
    if report.is_success() {
        return Ok(exit_codes::OK);
    }
    eprint!("{}", failure_summary(&report));
    Ok(exit_codes::FAILED)
}

fn load_pipeline(validator: &Validator, path: &Path) -> Result<PipelineDocument, PrepareError> {
    let raw = read_yaml(path)?;
    validator.validate_pipeline(path, &raw)?;
    serde_json::from_value(raw)
        .map_err(|err| PrepareError::validation(format!("{}: {err}", path.display())))
}

fn failure_summary(report: &RunReport) -> String {
    let mut out = String::new();
    for (job, invocation) in report.failures() {
        let reason = match &invocation.outcome {
            InvocationOutcome::Failed(Some(code)) => format!("exited with status {code}"),
            InvocationOutcome::Failed(None) => "was terminated by a signal".to_string(),
            InvocationOutcome::ProtocolError(message) => format!("protocol error: {message}"),
            InvocationOutcome::Succeeded | InvocationOutcome::Skipped => continue,
        };
        error!(job, key = %invocation.key, "invocation failed");
        out.push_str(&format!("job '{job}': '{}' {reason}\n", invocation.name));
    }
    out
}

fn cmd_task(config: &PrepareConfig, command: TaskCommand) -> Result<()> {
    let cache = cache_for(config)?;
    match command {
        TaskCommand::Info { reference } => {
            print!("{}", tasks::info(&cache, &reference)?);
        }
        TaskCommand::Update { reference } => {
            let validator = Validator::new()?;
            let fetcher = GitFetcher::new(config.core.git_mode, config.core.git_host.clone());
            let provisioner = VenvProvisioner::new(config.provision.python.clone());
            let resolver = Resolver::new(&cache, &fetcher, &provisioner, &validator);
            let action = tasks::update(&cache, &resolver, &reference)?;
            println!("updated {}", action.reference);
        }
        TaskCommand::Remove { reference } => {
            if tasks::remove(&cache, &reference)? {
                println!("removed {reference}");
            } else {
                println!("{reference} is not cached");
            }
        }
    }
    Ok(())
}

fn cmd_tasks(config: &PrepareConfig, command: TasksCommand) -> Result<()> {
    let cache = cache_for(config)?;
    match command {
        TasksCommand::Ls => print!("{}", tasks::list(&cache)?),
        TasksCommand::Remove { yes } => {
            if !yes {
                bail!(
                    "refusing to remove every cached action in {} without --yes",
                    cache.root().display()
                );
            }
            tasks::remove_all(&cache)?;
            println!("removed all cached actions");
        }
    }
    Ok(())
}
