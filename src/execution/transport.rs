//! Transport: launching one command on one host
//!
//! The executor drives every host through this trait, which keeps the
//! scheduler independent of how commands actually reach a machine and lets
//! tests script per-host behaviour. Output is streamed back in raw chunks;
//! the per-command timeout and the run-wide cancellation signal are both
//! enforced here so the child process is always reaped.

use crate::core::error::Result;
use crate::execution::command::Command;
use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// Which stream a chunk of output came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// A piece of command output, in arrival order
#[derive(Debug, Clone)]
pub struct OutputChunk {
    pub stream: OutputStream,
    pub bytes: Vec<u8>,
}

/// How a command ended on a host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Exited(i32),
    TimedOut,
    Cancelled,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Run `command` on `host`, sending output chunks through `sink`.
    ///
    /// Implementations must honour the command's timeout and the
    /// cancellation signal, terminating the remote command in both cases.
    /// An `Err` means the command could not be launched at all.
    async fn run(
        &self,
        host: &str,
        command: &Command,
        sink: mpsc::Sender<OutputChunk>,
        cancel: broadcast::Receiver<()>,
    ) -> Result<CommandStatus>;
}

/// SSH transport: one `ssh` child process per (host, command)
pub struct SshTransport {
    ssh_options: Vec<String>,
    environment: HashMap<String, String>,
}

impl SshTransport {
    pub fn new(ssh_options: Vec<String>, environment: HashMap<String, String>) -> Self {
        Self {
            ssh_options,
            environment,
        }
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn run(
        &self,
        host: &str,
        command: &Command,
        sink: mpsc::Sender<OutputChunk>,
        mut cancel: broadcast::Receiver<()>,
    ) -> Result<CommandStatus> {
        let mut cmd = tokio::process::Command::new("ssh");
        for option in &self.ssh_options {
            cmd.args(option.split_whitespace());
        }
        cmd.arg("-oBatchMode=yes")
            .arg(host)
            .arg(command.text())
            .envs(&self.environment)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(host, command = command.text(), "Launching ssh");
        let mut child = cmd.spawn()?;
        let stdout = child.stdout.take().expect("stdout is piped");
        let stderr = child.stderr.take().expect("stderr is piped");

        enum Outcome {
            Done(std::io::Result<std::process::ExitStatus>),
            TimedOut,
            Cancelled,
        }

        let outcome = {
            let run = async {
                futures::future::join(
                    pump(stdout, OutputStream::Stdout, sink.clone()),
                    pump(stderr, OutputStream::Stderr, sink.clone()),
                )
                .await;
                child.wait().await
            };
            tokio::pin!(run);
            tokio::select! {
                status = &mut run => Outcome::Done(status),
                _ = deadline(command.timeout()) => Outcome::TimedOut,
                _ = cancel.recv() => Outcome::Cancelled,
            }
        };

        match outcome {
            Outcome::Done(status) => {
                let status = status?;
                Ok(CommandStatus::Exited(status.code().unwrap_or(-1)))
            }
            Outcome::TimedOut => {
                warn!(host, command = command.text(), "Command timed out, killing");
                let _ = child.kill().await;
                Ok(CommandStatus::TimedOut)
            }
            Outcome::Cancelled => {
                let _ = child.kill().await;
                Ok(CommandStatus::Cancelled)
            }
        }
    }
}

/// Forward one pipe into the sink until EOF
async fn pump(
    mut reader: impl AsyncRead + Unpin,
    stream: OutputStream,
    sink: mpsc::Sender<OutputChunk>,
) {
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let chunk = OutputChunk {
                    stream,
                    bytes: buf[..n].to_vec(),
                };
                if sink.send(chunk).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Sleep for the timeout, or forever when there is none
async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(t) => tokio::time::sleep(t).await,
        None => std::future::pending().await,
    }
}
