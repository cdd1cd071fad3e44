//! Privileged command execution.
//!
//! Every change this tool makes to the system goes through a [`CommandRunner`]: kernel
//! values are written with `tee`, unit files are moved into place with `mv`, and the swap
//! file is rebuilt with `swapoff`/`dd`/`chmod`/`mkswap`/`swapon`. Services are generic over
//! the runner so tests can substitute an in-process fake.

use crate::metrics::Metrics;
use std::future::Future;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Errors raised by a privileged command
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write stdin of `{command}`: {source}")]
    Stdin {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with status {status}: {stderr}")]
    Failed {
        command: String,
        status: i32,
        stderr: String,
    },
}

impl CommandError {
    /// The rendered command line that failed.
    pub fn command(&self) -> &str {
        match self {
            CommandError::Spawn { command, .. }
            | CommandError::Stdin { command, .. }
            | CommandError::Failed { command, .. } => command,
        }
    }
}

/// Capability to run an external program with elevated privileges.
///
/// A non-zero exit is always an error carrying stderr; nothing is retried.
/// Credential prompting happens out of band before the first call.
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` and return its stdout.
    fn run(
        &self,
        program: &str,
        args: &[&str],
    ) -> impl Future<Output = Result<Vec<u8>, CommandError>> + Send;

    /// Run `program` with `args`, feeding `input` to its stdin, and return its stdout.
    fn run_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        input: &[u8],
    ) -> impl Future<Output = Result<Vec<u8>, CommandError>> + Send;
}

/// Render a command line for logs and error messages.
pub fn render_command(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

/// Runs commands on the host, through `sudo` unless configured otherwise.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    use_sudo: bool,
    metrics: Arc<Metrics>,
}

impl SystemRunner {
    pub fn new(use_sudo: bool, metrics: Arc<Metrics>) -> Self {
        Self { use_sudo, metrics }
    }

    fn build(&self, program: &str, args: &[&str]) -> Command {
        let mut cmd = if self.use_sudo {
            let mut c = Command::new("sudo");
            c.arg(program);
            c
        } else {
            Command::new(program)
        };
        cmd.args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn execute(
        &self,
        program: &str,
        args: &[&str],
        input: Option<&[u8]>,
    ) -> Result<Vec<u8>, CommandError> {
        let command = render_command(program, args);
        tracing::debug!("Running: {}", command);

        let start = Instant::now();
        let result = self.spawn_and_wait(&command, program, args, input).await;
        self.metrics.record_command(result.is_ok(), start.elapsed());

        if let Err(e) = &result {
            tracing::error!("{}", e);
        }
        result
    }

    async fn spawn_and_wait(
        &self,
        command: &str,
        program: &str,
        args: &[&str],
        input: Option<&[u8]>,
    ) -> Result<Vec<u8>, CommandError> {
        let mut cmd = self.build(program, args);
        cmd.stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = cmd.spawn().map_err(|source| CommandError::Spawn {
            command: command.to_string(),
            source,
        })?;

        if let Some(input) = input {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(input)
                    .await
                    .map_err(|source| CommandError::Stdin {
                        command: command.to_string(),
                        source,
                    })?;
                // Dropping stdin closes the pipe so the child sees EOF
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|source| CommandError::Spawn {
                command: command.to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(CommandError::Failed {
                command: command.to_string(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }
}

impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<Vec<u8>, CommandError> {
        self.execute(program, args, None).await
    }

    async fn run_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        input: &[u8],
    ) -> Result<Vec<u8>, CommandError> {
        self.execute(program, args, Some(input)).await
    }
}
