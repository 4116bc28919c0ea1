//! Docker CLI runtime adapter
//!
//! Talks to the container engine through the `docker` binary. Instances are
//! correlated back to domain entities via the deployment/build label pair
//! stamped into every compiled plan.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    BUILD_LABEL, CommandStream, DEPLOYMENT_LABEL, RuntimeAdapter, RuntimeEvent, RuntimeEventKind,
    spawn_streaming,
};
use crate::error::{EngineError, Result};

/// Checks that the docker CLI is installed and responding
pub async fn check_docker_available() -> Result<()> {
    let output = Command::new("docker").arg("--version").output().await?;
    if !output.status.success() {
        return Err(EngineError::TransientInfra(
            "docker is installed but not responding".into(),
        ));
    }
    let version = String::from_utf8_lossy(&output.stdout);
    info!("Docker is available: {}", version.trim());
    Ok(())
}

/// Docker-backed [`RuntimeAdapter`]
#[derive(Debug, Default, Clone)]
pub struct DockerRuntime;

impl DockerRuntime {
    pub fn new() -> Self {
        Self
    }

    /// Runs a short docker command to completion, returning trimmed stdout
    async fn run(&self, args: &[&str]) -> Result<String> {
        debug!("docker {}", args.join(" "));
        let output = Command::new("docker").args(args).output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            return Err(EngineError::ExternalProcess {
                command: format!("docker {}", args.join(" ")),
                exit_code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }
        Ok(stdout)
    }

    /// Running (or exited) container ids carrying the deployment label
    async fn instance_ids(&self, deployment_id: Uuid) -> Result<Vec<String>> {
        let filter = format!("label={}={}", DEPLOYMENT_LABEL, deployment_id);
        let stdout = self.run(&["ps", "-aq", "--filter", &filter]).await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }
}

#[async_trait]
impl RuntimeAdapter for DockerRuntime {
    async fn build_image(
        &self,
        context_dir: &Path,
        dockerfile: &Path,
        image_tag: &str,
    ) -> Result<CommandStream> {
        let mut command = Command::new("docker");
        command
            .arg("build")
            .arg("-f")
            .arg(dockerfile)
            .arg("-t")
            .arg(image_tag)
            .arg(context_dir);
        spawn_streaming(command, format!("docker build {}", image_tag))
    }

    async fn push_image(
        &self,
        image_tag: &str,
        credential_file: Option<&Path>,
    ) -> Result<CommandStream> {
        let mut command = Command::new("docker");
        if let Some(config) = credential_file.and_then(Path::parent) {
            // docker reads registry auth from the config dir holding the
            // generated credential file
            command.arg("--config").arg(config);
        }
        command.arg("push").arg(image_tag);
        spawn_streaming(command, format!("docker push {}", image_tag))
    }

    async fn deploy(&self, plan_file: &Path, project: &str) -> Result<CommandStream> {
        let mut command = Command::new("docker");
        command
            .arg("compose")
            .arg("-f")
            .arg(plan_file)
            .arg("-p")
            .arg(project)
            .arg("up")
            .arg("-d")
            .arg("--remove-orphans");
        spawn_streaming(command, format!("docker compose up {}", project))
    }

    async fn stop(&self, deployment_id: Uuid) -> Result<()> {
        let ids = self.instance_ids(deployment_id).await?;
        if ids.is_empty() {
            debug!("No running instances for deployment {}", deployment_id);
            return Ok(());
        }
        for id in ids {
            if let Err(e) = self.run(&["stop", &id]).await {
                warn!("Failed to stop instance {}: {}", id, e);
            }
            if let Err(e) = self.run(&["rm", "-f", &id]).await {
                warn!("Failed to remove instance {}: {}", id, e);
            }
        }
        Ok(())
    }

    async fn runtime_id(&self, deployment_id: Uuid) -> Result<Option<String>> {
        Ok(self.instance_ids(deployment_id).await?.into_iter().next())
    }

    async fn logs(
        &self,
        deployment_id: Uuid,
        since: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<String> {
        let Some(id) = self.runtime_id(deployment_id).await? else {
            return Ok(String::new());
        };
        match since {
            Some(since) => {
                let since = since.to_rfc3339();
                self.run(&["logs", "--since", &since, &id]).await
            }
            None => self.run(&["logs", &id]).await,
        }
    }

    async fn health(&self, deployment_id: Uuid) -> Result<bool> {
        let Some(id) = self.runtime_id(deployment_id).await? else {
            return Ok(false);
        };
        let state = self
            .run(&[
                "inspect",
                "--format",
                "{{if .State.Health}}{{.State.Health.Status}}{{else}}{{.State.Status}}{{end}}",
                &id,
            ])
            .await?;
        Ok(matches!(state.as_str(), "healthy" | "running"))
    }

    async fn stats(&self, deployment_id: Uuid) -> Result<serde_json::Value> {
        let Some(id) = self.runtime_id(deployment_id).await? else {
            return Ok(serde_json::Value::Null);
        };
        let stdout = self
            .run(&["stats", "--no-stream", "--format", "{{json .}}", &id])
            .await?;
        serde_json::from_str(&stdout)
            .map_err(|e| EngineError::TransientInfra(format!("unparseable stats output: {}", e)))
    }

    async fn delete_volume(&self, name: &str) -> Result<()> {
        self.run(&["volume", "rm", "-f", name]).await?;
        Ok(())
    }

    async fn events(&self) -> Result<mpsc::Receiver<RuntimeEvent>> {
        let mut command = Command::new("docker");
        command
            .arg("events")
            .arg("--format")
            .arg("{{json .}}")
            .arg("--filter")
            .arg(format!("label={}", DEPLOYMENT_LABEL));

        let mut stream = spawn_streaming(command, "docker events".to_string())?;
        let (tx, rx) = mpsc::channel::<RuntimeEvent>(256);

        tokio::spawn(async move {
            while let Some(output) = stream.next_line().await {
                let Some(event) = parse_event(&output.line) else {
                    continue;
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            if let Err(e) = stream.finish().await {
                warn!("docker events stream ended: {}", e);
            }
        });

        Ok(rx)
    }
}

/// Parses one `docker events --format '{{json .}}'` line
fn parse_event(line: &str) -> Option<RuntimeEvent> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    let action = value
        .get("Action")
        .or_else(|| value.get("status"))
        .and_then(|v| v.as_str())?;
    let kind = match action {
        "start" => RuntimeEventKind::Start,
        "stop" => RuntimeEventKind::Stop,
        "die" => RuntimeEventKind::Die,
        _ => RuntimeEventKind::Other,
    };
    let attributes = value.pointer("/Actor/Attributes")?;
    let deployment_id = attributes
        .get(DEPLOYMENT_LABEL)
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok());
    let build_id = attributes
        .get(BUILD_LABEL)
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok());
    Some(RuntimeEvent {
        kind,
        deployment_id,
        build_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_event_with_labels() {
        let deployment = Uuid::new_v4();
        let build = Uuid::new_v4();
        let line = serde_json::json!({
            "Action": "start",
            "Type": "container",
            "Actor": {
                "ID": "abc123",
                "Attributes": {
                    "drydock.deployment": deployment.to_string(),
                    "drydock.build": build.to_string(),
                }
            }
        })
        .to_string();

        let event = parse_event(&line).unwrap();
        assert_eq!(event.kind, RuntimeEventKind::Start);
        assert_eq!(event.deployment_id, Some(deployment));
        assert_eq!(event.build_id, Some(build));
    }

    #[test]
    fn test_parse_event_without_label_has_no_deployment() {
        let line = serde_json::json!({
            "Action": "die",
            "Actor": { "ID": "abc", "Attributes": { "image": "nginx" } }
        })
        .to_string();
        let event = parse_event(&line).unwrap();
        assert_eq!(event.kind, RuntimeEventKind::Die);
        assert!(event.deployment_id.is_none());
    }

    #[test]
    fn test_parse_event_rejects_garbage() {
        assert!(parse_event("not json").is_none());
        assert!(parse_event("{}").is_none());
    }
}
