//! Runtime adapter boundary
//!
//! The engine never shells out directly; every interaction with the
//! container engine goes through [`RuntimeAdapter`]. Long-running calls
//! (build, push, deploy, clone) hand back a [`CommandStream`] so the
//! pipeline can pull output lines as they arrive instead of registering
//! callbacks.

pub mod docker;
pub mod git;

use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{EngineError, Result};

/// Compose/container label carrying the owning container id
pub const DEPLOYMENT_LABEL: &str = "drydock.deployment";
/// Compose/container label carrying the build that produced the deployment
pub const BUILD_LABEL: &str = "drydock.build";

/// Which process stream a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStreamKind {
    Stdout,
    Stderr,
}

/// One line of external-process output
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub stream: OutputStreamKind,
    pub line: String,
}

/// Lifecycle notification observed from the container engine
#[derive(Debug, Clone)]
pub struct RuntimeEvent {
    pub kind: RuntimeEventKind,
    /// Container id recovered from the deployment label, when present
    pub deployment_id: Option<Uuid>,
    pub build_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeEventKind {
    Start,
    Stop,
    Die,
    Other,
}

/// Pull-based view of a running external process
///
/// `next_line` yields stdout and stderr lines as they arrive; order is
/// guaranteed within each stream but not across the two. `finish` resolves
/// to the process outcome: exit code 0 maps to `Ok`, anything else to an
/// `ExternalProcess` error carrying the captured stderr.
pub struct CommandStream {
    stdout: Option<mpsc::Receiver<String>>,
    stderr: Option<mpsc::Receiver<String>>,
    status: tokio::task::JoinHandle<Result<()>>,
}

impl CommandStream {
    /// Next output line from either stream; `None` once both are closed
    pub async fn next_line(&mut self) -> Option<OutputLine> {
        loop {
            match (self.stdout.as_mut(), self.stderr.as_mut()) {
                (Some(out), Some(err)) => {
                    tokio::select! {
                        line = out.recv() => match line {
                            Some(line) => {
                                return Some(OutputLine {
                                    stream: OutputStreamKind::Stdout,
                                    line,
                                });
                            }
                            None => self.stdout = None,
                        },
                        line = err.recv() => match line {
                            Some(line) => {
                                return Some(OutputLine {
                                    stream: OutputStreamKind::Stderr,
                                    line,
                                });
                            }
                            None => self.stderr = None,
                        },
                    }
                }
                (Some(out), None) => {
                    return out.recv().await.map(|line| OutputLine {
                        stream: OutputStreamKind::Stdout,
                        line,
                    });
                }
                (None, Some(err)) => {
                    return err.recv().await.map(|line| OutputLine {
                        stream: OutputStreamKind::Stderr,
                        line,
                    });
                }
                (None, None) => return None,
            }
        }
    }

    /// Waits for the process to exit and maps its exit code
    pub async fn finish(self) -> Result<()> {
        self.status
            .await
            .map_err(|e| EngineError::TransientInfra(format!("process task lost: {}", e)))?
    }

    /// Builds a stream from pre-created channels and a status task.
    ///
    /// Used by adapters that do not spawn a real process (tests, dry runs).
    pub fn from_parts(
        stdout: mpsc::Receiver<String>,
        stderr: mpsc::Receiver<String>,
        status: tokio::task::JoinHandle<Result<()>>,
    ) -> Self {
        Self {
            stdout: Some(stdout),
            stderr: Some(stderr),
            status,
        }
    }
}

/// Spawns a command with piped output and wires it into a [`CommandStream`]
pub(crate) fn spawn_streaming(mut command: Command, label: String) -> Result<CommandStream> {
    command.stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = command.spawn()?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| EngineError::TransientInfra("child stdout not captured".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| EngineError::TransientInfra("child stderr not captured".into()))?;

    let (out_tx, out_rx) = mpsc::channel::<String>(256);
    let (err_tx, err_rx) = mpsc::channel::<String>(256);

    let out_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if out_tx.send(line).await.is_err() {
                break;
            }
        }
    });

    // stderr is both streamed and retained for the failure message
    let captured = Arc::new(Mutex::new(Vec::<String>::new()));
    let captured_writer = Arc::clone(&captured);
    let err_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            captured_writer.lock().unwrap().push(line.clone());
            if err_tx.send(line).await.is_err() {
                break;
            }
        }
    });

    let status = tokio::spawn(async move {
        let status = child.wait().await.map_err(EngineError::Io)?;
        let _ = out_task.await;
        let _ = err_task.await;
        if status.success() {
            Ok(())
        } else {
            let stderr = captured.lock().unwrap().join("\n");
            Err(EngineError::ExternalProcess {
                command: label,
                exit_code: status.code().unwrap_or(-1),
                stderr,
            })
        }
    });

    Ok(CommandStream::from_parts(out_rx, err_rx, status))
}

/// Contract to the container engine
///
/// Exit code 0 maps to success; any other exit code maps to an
/// `ExternalProcess` error with captured stderr.
#[async_trait]
pub trait RuntimeAdapter: Send + Sync {
    /// Builds an image from a workspace directory and Dockerfile
    async fn build_image(
        &self,
        context_dir: &Path,
        dockerfile: &Path,
        image_tag: &str,
    ) -> Result<CommandStream>;

    /// Pushes a built image, optionally authenticating from a credential file
    async fn push_image(
        &self,
        image_tag: &str,
        credential_file: Option<&Path>,
    ) -> Result<CommandStream>;

    /// Brings a compiled deployment plan up
    async fn deploy(&self, plan_file: &Path, project: &str) -> Result<CommandStream>;

    /// Stops and removes the running instances of a deployment
    async fn stop(&self, deployment_id: Uuid) -> Result<()>;

    /// Engine-native id of the running instance, if any
    async fn runtime_id(&self, deployment_id: Uuid) -> Result<Option<String>>;

    /// Runtime logs, optionally bounded to entries after `since`
    async fn logs(
        &self,
        deployment_id: Uuid,
        since: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<String>;

    /// Whether the deployment currently reports healthy
    async fn health(&self, deployment_id: Uuid) -> Result<bool>;

    /// Resource usage snapshot for the deployment
    async fn stats(&self, deployment_id: Uuid) -> Result<serde_json::Value>;

    async fn delete_volume(&self, name: &str) -> Result<()>;

    /// Continuous feed of lifecycle events carrying the deployment label
    async fn events(&self) -> Result<mpsc::Receiver<RuntimeEvent>>;
}
