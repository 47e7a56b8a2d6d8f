//! Helpers for running child processes without risking pipe deadlocks.
//!
//! Both stdout and stderr are drained on reader threads while the child runs.
//! There is no timeout: a hung child hangs the caller.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument};

/// Captured child process output, stdout and stderr interleaved by line.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub combined: String,
}

/// A process to launch with an exact environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Complete child environment; nothing is inherited beyond this.
    pub env: HashMap<String, String>,
    pub workdir: Option<PathBuf>,
}

/// Abstraction over process spawning.
pub trait Launcher {
    /// Run the request to completion, feeding every output line (stdout and
    /// stderr, in arrival order, without the newline) to `on_line`.
    ///
    /// Returns the exit code, or `None` if the process was killed by a signal.
    fn launch(&self, request: &LaunchRequest, on_line: &mut dyn FnMut(&str)) -> Result<Option<i32>>;
}

/// Launcher that spawns real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLauncher;

impl Launcher for ProcessLauncher {
    #[instrument(skip_all, fields(program = %request.program.display()))]
    fn launch(&self, request: &LaunchRequest, on_line: &mut dyn FnMut(&str)) -> Result<Option<i32>> {
        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args).env_clear().envs(&request.env);
        if let Some(workdir) = &request.workdir {
            cmd.current_dir(workdir);
        }
        let status = stream_lines(cmd, on_line)?;
        debug!(exit_code = ?status.code(), "process finished");
        Ok(status.code())
    }
}

/// Run `cmd` and collect its combined output.
#[instrument(skip_all)]
pub fn run_captured(cmd: Command) -> Result<CommandOutput> {
    let mut combined = String::new();
    let status = stream_lines(cmd, &mut |line| {
        combined.push_str(line);
        combined.push('\n');
    })?;
    Ok(CommandOutput { status, combined })
}

fn stream_lines(mut cmd: Command, on_line: &mut dyn FnMut(&str)) -> Result<ExitStatus> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).with_context(|| format!("spawn {:?}", cmd.get_program()));
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let (sender, receiver) = mpsc::channel();
    let stdout_sender = sender.clone();
    let stdout_handle = thread::spawn(move || forward_lines(stdout, &stdout_sender));
    let stderr_handle = thread::spawn(move || forward_lines(stderr, &sender));

    // Ends once both reader threads dropped their senders.
    for line in receiver {
        on_line(&line);
    }

    join_reader(stdout_handle).context("join stdout")?;
    join_reader(stderr_handle).context("join stderr")?;
    child.wait().context("wait for command")
}

fn join_reader(handle: thread::JoinHandle<Result<()>>) -> Result<()> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn forward_lines<R: Read>(reader: R, sender: &mpsc::Sender<String>) -> Result<()> {
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line).context("read line")?;
        if n == 0 {
            return Ok(());
        }
        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end_matches(['\r', '\n']).to_string();
        // Receiver gone: keep draining so the child never blocks on a full pipe.
        let _ = sender.send(text);
    }
}
