//! Subprocess execution with live output and cancellation.

use kubeline_core::{CancelToken, LogStream, StageLogger};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use futures::future::join_all;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, warn};

use crate::error::{ExecutorError, ExecutorResult};

/// A command line to run on the engine host.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Written to the child's stdin, which is then closed.
    pub stdin: Option<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// The command line as echoed into the stage log.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Run `spec` to completion, streaming stdout and stderr into `logger`.
///
/// The child is killed as soon as `cancel` fires and the call returns
/// [`ExecutorError::Canceled`]. A non-zero exit is
/// [`ExecutorError::CommandFailed`].
pub async fn run_command(
    spec: &CommandSpec,
    logger: &StageLogger,
    cancel: &CancelToken,
) -> ExecutorResult<()> {
    if cancel.is_cancelled() {
        return Err(ExecutorError::Canceled);
    }

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .kill_on_drop(true);
    if let Some(dir) = &spec.current_dir {
        command.current_dir(dir);
    }

    logger.log(format!("$ {}", spec.display()));
    debug!(program = %spec.program, "Spawning process");

    let mut child = command.spawn().map_err(|e| ExecutorError::Spawn {
        program: spec.program.clone(),
        source: e,
    })?;

    let mut pumps: Vec<JoinHandle<()>> = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        pumps.push(tokio::spawn(pump(stdout, logger.clone(), LogStream::Stdout)));
    }
    if let Some(stderr) = child.stderr.take() {
        pumps.push(tokio::spawn(pump(stderr, logger.clone(), LogStream::Stderr)));
    }
    if let (Some(mut stdin), Some(input)) = (child.stdin.take(), spec.stdin.clone()) {
        pumps.push(tokio::spawn(async move {
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                warn!(error = %e, "Failed to write process stdin");
            }
            // Dropping closes the pipe.
        }));
    }

    let status = tokio::select! {
        status = child.wait() => status?,
        _ = cancel.cancelled() => {
            warn!(program = %spec.program, "Killing process after cancellation");
            if let Err(e) = child.start_kill() {
                warn!(program = %spec.program, error = %e, "Failed to kill process");
            }
            for pump in &pumps {
                pump.abort();
            }
            return Err(ExecutorError::Canceled);
        }
    };

    // A backgrounded grandchild can hold the pipes open past the child's exit.
    let aborts: Vec<AbortHandle> = pumps.iter().map(JoinHandle::abort_handle).collect();
    tokio::select! {
        _ = join_all(pumps) => {}
        _ = cancel.cancelled() => {
            warn!(program = %spec.program, "Canceled while draining process output");
            for abort in &aborts {
                abort.abort();
            }
            return Err(ExecutorError::Canceled);
        }
    }

    if status.success() {
        Ok(())
    } else {
        let status = match status.code() {
            Some(code) => format!("exit code {code}"),
            None => "a signal".to_string(),
        };
        Err(ExecutorError::CommandFailed {
            program: spec.program.clone(),
            status,
        })
    }
}

async fn pump<R>(reader: R, logger: StageLogger, stream: LogStream)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => logger.write(stream, &line),
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Error reading process output");
                break;
            }
        }
    }
}
