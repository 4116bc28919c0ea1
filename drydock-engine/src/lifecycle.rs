//! Container lifecycle state machine
//!
//! Owns every container status mutation. Entry point for deploy/stop
//! requests, for build outcomes reported by the pipeline, and for
//! reconciliation against externally observed runtime events.
//!
//! ```text
//! DRAFT ──deploy──▶ BUILDING ──success──▶ DEPLOYED
//!                      │  └──all builds failed──▶ DIED
//!                      └──stop──▶ STOPPED
//! DEPLOYED/DIED ──stop──▶ STOPPED
//! DEPLOYED ◀─system ops─▶ STOPPED_BY_SYSTEM
//! ```

use std::sync::Arc;

use drydock_core::domain::{
    Build, BuildStatus, Container, ContainerStatus, ContainerType, LogSeverity,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::artifact::{ArtifactRegistry, ensure_service_secret};
use crate::error::{EngineError, Result};
use crate::notify::{Notifier, NotifyEvent};
use crate::queue::BuildQueue;
use crate::runtime::RuntimeAdapter;
use crate::store::{BuildStore, ContainerStore};
use crate::workspacefs::WorkspaceManager;

/// What a deploy request resulted in
#[derive(Debug)]
pub enum DeployOutcome {
    /// Application/custom kinds: a build was queued, container is BUILDING
    BuildQueued(Build),
    /// Database/service kinds: deployed directly without a build
    Deployed,
}

/// Compose project name for a container's deployment
pub fn project_name(container: &Container) -> String {
    format!("drydock-{}", container.id.simple())
}

pub struct ContainerLifecycle {
    containers: Arc<dyn ContainerStore>,
    builds: Arc<dyn BuildStore>,
    runtime: Arc<dyn RuntimeAdapter>,
    queue: Arc<BuildQueue>,
    workspaces: WorkspaceManager,
    registry: Arc<ArtifactRegistry>,
    notifier: Arc<dyn Notifier>,
}

impl ContainerLifecycle {
    pub fn new(
        containers: Arc<dyn ContainerStore>,
        builds: Arc<dyn BuildStore>,
        runtime: Arc<dyn RuntimeAdapter>,
        queue: Arc<BuildQueue>,
        workspaces: WorkspaceManager,
        registry: Arc<ArtifactRegistry>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            containers,
            builds,
            runtime,
            queue,
            workspaces,
            registry,
            notifier,
        }
    }

    /// Deploys a container from a resting state
    ///
    /// Application/custom kinds transition to BUILDING and queue a build;
    /// database/service kinds deploy directly from the bundled catalog and
    /// transition to DEPLOYED. Validation failures reject the request
    /// before any state change.
    pub async fn deploy(&self, container_id: Uuid) -> Result<DeployOutcome> {
        let mut container = self.containers.get(container_id).await?;
        if !matches!(
            container.status,
            ContainerStatus::Draft
                | ContainerStatus::Stopped
                | ContainerStatus::StoppedBySystem
                | ContainerStatus::Died
        ) {
            return Err(EngineError::Validation(format!(
                "cannot deploy container in status {:?}",
                container.status
            )));
        }
        validate_for_deploy(&container)?;

        if container.requires_build() {
            let build = self.request_build(&container, None, None).await?;
            return Ok(DeployOutcome::BuildQueued(build));
        }

        if ensure_service_secret(&mut container) {
            self.containers.update(&container).await?;
        }
        self.deploy_from_plan(&container).await?;
        self.containers
            .touch_deployed(container.id, chrono::Utc::now())
            .await?;
        info!("Container {} deployed directly", container.name);
        Ok(DeployOutcome::Deployed)
    }

    /// Queues a build for the container and marks it BUILDING
    ///
    /// Shared entry for operator deploys, webhook triggers, and manual
    /// API deploys; the caller is responsible for eligibility gates.
    pub async fn request_build(
        &self,
        container: &Container,
        ref_override: Option<String>,
        callback_url: Option<String>,
    ) -> Result<Build> {
        let build = self
            .queue
            .enqueue_build(container, ref_override, callback_url)
            .await?;
        self.containers
            .set_status(container.id, ContainerStatus::Building)
            .await?;
        Ok(build)
    }

    /// Stops a container
    ///
    /// BUILDING containers get their active build cancelled (queued jobs are
    /// removed, running ones observe CANCEL at the next stage boundary).
    /// Runtime stop failures are logged but still force STOPPED.
    pub async fn stop(&self, container_id: Uuid) -> Result<()> {
        let container = self.containers.get(container_id).await?;
        match container.status {
            ContainerStatus::Building => {
                for build in self.builds.find_by_container(container_id).await? {
                    if !matches!(build.status, BuildStatus::Queue | BuildStatus::Running) {
                        continue;
                    }
                    self.queue.cancel(build.id);
                    self.builds
                        .append_log(build.id, LogSeverity::Log, "build cancelled: container stopped")
                        .await?;
                    self.builds
                        .mark_finished(build.id, BuildStatus::Cancel, chrono::Utc::now())
                        .await?;
                }
            }
            ContainerStatus::Deployed | ContainerStatus::Died => {
                if let Err(e) = self.runtime.stop(container_id).await {
                    warn!(
                        "Runtime stop for {} failed, forcing STOPPED anyway: {}",
                        container.name, e
                    );
                }
            }
            other => {
                return Err(EngineError::Validation(format!(
                    "cannot stop container in status {:?}",
                    other
                )));
            }
        }

        self.containers
            .set_status(container_id, ContainerStatus::Stopped)
            .await?;
        // generated artifacts are removed together with the workspace
        if let Err(e) = self.workspaces.remove(container_id).await {
            warn!("Failed to remove workspace for {}: {}", container.name, e);
        }
        info!("Container {} stopped", container.name);
        Ok(())
    }

    /// Applies a terminal build outcome to the owning container
    ///
    /// Success moves BUILDING to DEPLOYED. Failure only moves BUILDING to
    /// DIED once every recorded build for the container has FAILED;
    /// otherwise another build may still be in flight and status is left
    /// alone.
    pub async fn build_outcome(&self, build: &Build, success: bool) -> Result<()> {
        let container = match self.containers.get(build.container_id).await {
            Ok(container) => container,
            Err(EngineError::NotFound { .. }) => return Ok(()),
            Err(e) => return Err(e),
        };

        if success {
            if container.status == ContainerStatus::Building {
                self.containers
                    .touch_deployed(container.id, chrono::Utc::now())
                    .await?;
            }
            return Ok(());
        }

        let builds = self.builds.find_by_container(container.id).await?;
        let all_failed =
            !builds.is_empty() && builds.iter().all(|b| b.status == BuildStatus::Failed);
        if all_failed && container.status == ContainerStatus::Building {
            self.containers
                .set_status(container.id, ContainerStatus::Died)
                .await?;
            self.notifier
                .notify(NotifyEvent::ContainerDied {
                    container_name: container.name.clone(),
                })
                .await;
        }
        Ok(())
    }

    /// Re-queues a finished build
    pub async fn restart_build(&self, build_id: Uuid) -> Result<Build> {
        let mut build = self.builds.get(build_id).await?;
        if !build.status.is_terminal() {
            return Err(EngineError::Validation(format!(
                "only finished builds can be restarted (status {:?})",
                build.status
            )));
        }
        let container = self.containers.get(build.container_id).await?;

        build.status = BuildStatus::Queue;
        build.restarted = true;
        build.started_at = None;
        build.finished_at = None;
        self.builds.update(&build).await?;
        self.containers
            .set_status(container.id, ContainerStatus::Building)
            .await?;
        self.containers
            .set_last_build(container.id, build.id)
            .await?;
        self.queue.resubmit(&build).await?;
        Ok(build)
    }

    /// Reconciles an externally observed start: any state except
    /// STOPPED_BY_SYSTEM becomes DEPLOYED
    pub async fn reconcile_external_start(&self, container_id: Uuid) -> Result<()> {
        let container = match self.containers.get(container_id).await {
            Ok(container) => container,
            Err(EngineError::NotFound { .. }) => return Ok(()),
            Err(e) => return Err(e),
        };
        if container.status == ContainerStatus::StoppedBySystem {
            return Ok(());
        }
        if container.status != ContainerStatus::Deployed {
            info!(
                "Reconciling {} from {:?} to DEPLOYED after external start",
                container.name, container.status
            );
            self.containers
                .set_status(container_id, ContainerStatus::Deployed)
                .await?;
        }
        Ok(())
    }

    /// Bulk maintenance stop: every DEPLOYED container of the project goes
    /// to STOPPED_BY_SYSTEM
    pub async fn system_stop(&self, project_id: Uuid) -> Result<usize> {
        let mut stopped = 0;
        for container in self.containers.find_by_project(project_id).await? {
            if container.status != ContainerStatus::Deployed {
                continue;
            }
            if let Err(e) = self.runtime.stop(container.id).await {
                warn!("Runtime stop for {} failed: {}", container.name, e);
            }
            self.containers
                .set_status(container.id, ContainerStatus::StoppedBySystem)
                .await?;
            stopped += 1;
        }
        info!("System stop: {} container(s) halted", stopped);
        Ok(stopped)
    }

    /// Bulk maintenance restart: STOPPED_BY_SYSTEM containers come back up
    /// from their last compiled plan (images were pushed by earlier builds)
    pub async fn system_restart(&self, project_id: Uuid) -> Result<usize> {
        let mut restarted = 0;
        for container in self.containers.find_by_project(project_id).await? {
            if container.status != ContainerStatus::StoppedBySystem {
                continue;
            }
            let mut container = container;
            if ensure_service_secret(&mut container) {
                self.containers.update(&container).await?;
            }
            match self.deploy_from_plan(&container).await {
                Ok(()) => {
                    self.containers
                        .touch_deployed(container.id, chrono::Utc::now())
                        .await?;
                    restarted += 1;
                }
                Err(e) => {
                    warn!("System restart of {} failed: {}", container.name, e);
                }
            }
        }
        info!("System restart: {} container(s) resumed", restarted);
        Ok(restarted)
    }

    /// Compiles the container's deployment plan, writes it to the
    /// workspace, and brings it up
    async fn deploy_from_plan(&self, container: &Container) -> Result<()> {
        let set = self
            .registry
            .compile_or_custom(container, None)
            .ok_or_else(|| {
                EngineError::Validation(format!(
                    "no artifact builder for ({:?}, {:?}) and no custom plan",
                    container.kind, container.container_type
                ))
            })?;
        let ref_name = container.deploy_ref().unwrap_or("latest").to_string();
        let written = self
            .workspaces
            .write_artifacts(
                container.id,
                &ref_name,
                &set,
                container.env.as_deref(),
                container.registry_auth.as_deref(),
            )
            .await?;

        let mut stream = self
            .runtime
            .deploy(&written.compose_file, &project_name(container))
            .await?;
        while let Some(output) = stream.next_line().await {
            tracing::debug!("deploy[{}]: {}", container.name, output.line);
        }
        stream.finish().await
    }
}

/// Deploy precondition: required fields must be present before any
/// transition happens
pub fn validate_for_deploy(container: &Container) -> Result<()> {
    let mut missing = Vec::new();
    if container.name.trim().is_empty() {
        missing.push("name");
    }
    if container.requires_build() {
        if container.registry.is_none() {
            missing.push("registry");
        }
        if container.source.is_none() {
            missing.push("source");
        }
        if container.repository_id.is_none() {
            missing.push("repositoryId");
        }
        if container.url.is_none() {
            missing.push("url");
        }
        if container.deploy_ref().is_none() {
            missing.push(match container.deployment_type {
                drydock_core::domain::DeploymentType::Branch => "branch",
                drydock_core::domain::DeploymentType::Tag => "tag",
            });
        }
        if container.port.is_none() && container.container_type != ContainerType::Static {
            missing.push("port");
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Validation(format!(
            "missing required fields: {}",
            missing.join(", ")
        )))
    }
}
