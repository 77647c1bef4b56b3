use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;
use log::debug;

use crate::shutdown::Shutdown;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long to wait for stderr once the child is gone. A grandchild that
/// inherited the pipe can keep it open well past that.
const STDERR_GRACE: Duration = Duration::from_millis(500);

/// How an external tool invocation ended.
#[derive(Debug)]
pub enum ToolOutcome {
    Success,
    Failed { status: ExitStatus, stderr: String },
    NotFound(String),
    TimedOut(Duration),
    Cancelled,
}

impl ToolOutcome {
    pub fn describe(&self, program: &str) -> String {
        match self {
            ToolOutcome::Success => format!("{} finished", program),
            ToolOutcome::Failed { status, stderr } => {
                let stderr = stderr.trim();
                if stderr.is_empty() {
                    format!("{} exited with {}", program, status)
                } else {
                    format!("{} exited with {}: {}", program, status, last_line(stderr))
                }
            }
            ToolOutcome::NotFound(err) => format!("{} could not be started: {}", program, err),
            ToolOutcome::TimedOut(limit) => {
                format!("{} killed after {}s", program, limit.as_secs_f64())
            }
            ToolOutcome::Cancelled => format!("{} interrupted by shutdown", program),
        }
    }
}

fn last_line(text: &str) -> &str {
    text.lines().last().unwrap_or(text)
}

/// Runs `command` to completion, killing it once `timeout` elapses or the
/// shutdown signal fires. Stdout is discarded, stderr is kept for the log.
pub fn run_bounded(mut command: Command, timeout: Duration, shutdown: &Shutdown) -> ToolOutcome {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    debug!("spawning {:?}", command);
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => return ToolOutcome::NotFound(err.to_string()),
    };

    // drain stderr on the side so a chatty tool can't fill the pipe and stall
    let (stderr_tx, stderr_rx) = bounded(1);
    if let Some(mut pipe) = child.stderr.take() {
        thread::spawn(move || {
            let mut buf = String::new();
            let _ = pipe.read_to_string(&mut buf);
            let _ = stderr_tx.send(buf);
        });
    }

    let started = Instant::now();
    let outcome = loop {
        match child.try_wait() {
            Ok(Some(status)) if status.success() => break ToolOutcome::Success,
            Ok(Some(status)) => {
                break ToolOutcome::Failed {
                    status,
                    stderr: String::new(),
                }
            }
            Ok(None) => {}
            Err(err) => {
                kill(&mut child);
                break ToolOutcome::NotFound(err.to_string());
            }
        }

        if shutdown.is_triggered() {
            kill(&mut child);
            break ToolOutcome::Cancelled;
        }
        if started.elapsed() >= timeout {
            kill(&mut child);
            break ToolOutcome::TimedOut(timeout);
        }
        thread::sleep(POLL_INTERVAL);
    };

    // the reader is left behind if the pipe outlives the child
    let stderr = stderr_rx.recv_timeout(STDERR_GRACE).unwrap_or_default();

    match outcome {
        ToolOutcome::Failed { status, .. } => ToolOutcome::Failed { status, stderr },
        other => other,
    }
}

fn kill(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Looks `program` up the way the shell would. Paths with a separator are
/// checked as given.
pub fn find_program(program: &str) -> Option<std::path::PathBuf> {
    let candidate = std::path::Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|path| path.is_file())
}
