//! Build pipeline
//!
//! Runs one queued build end to end: prepare the workspace, clone the
//! source, build and push the image (when the plan carries one), bring the
//! deployment up, then clean up. Every stage returns a `Result`; the first
//! error short-circuits the rest. Cancellation is cooperative: the build
//! status is re-checked at each stage boundary and a CANCEL observed there
//! halts the run without marking it failed.

use std::path::PathBuf;
use std::sync::Arc;

use drydock_core::domain::{Build, BuildStatus, Container, DeploymentType, LogSeverity};
use tracing::{info, warn};
use uuid::Uuid;

use crate::artifact::{ArtifactRegistry, ImageBuildPlan};
use crate::callback::CallbackClient;
use crate::error::{EngineError, Result};
use crate::lifecycle::{ContainerLifecycle, project_name};
use crate::notify::{Notifier, NotifyEvent};
use crate::queue::BuildJob;
use crate::runtime::git::{CloneSpec, SourceFetcher};
use crate::runtime::{CommandStream, OutputStreamKind, RuntimeAdapter};
use crate::store::{BuildStore, ContainerStore};
use crate::workspacefs::{WorkspaceManager, WrittenArtifacts, build_inputs};

/// How a pipeline run ended when no stage errored
enum StageFlow {
    Completed,
    /// CANCEL observed at a stage boundary; carries the stage not entered
    Cancelled(&'static str),
}

/// Workspace state carried between stages
struct Prepared {
    ref_name: String,
    image: Option<ImageBuildPlan>,
    written: WrittenArtifacts,
    source_dir: PathBuf,
}

pub struct BuildPipeline {
    containers: Arc<dyn ContainerStore>,
    builds: Arc<dyn BuildStore>,
    runtime: Arc<dyn RuntimeAdapter>,
    fetcher: Arc<dyn SourceFetcher>,
    workspaces: WorkspaceManager,
    registry: Arc<ArtifactRegistry>,
    lifecycle: Arc<ContainerLifecycle>,
    notifier: Arc<dyn Notifier>,
    callbacks: CallbackClient,
}

impl BuildPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        containers: Arc<dyn ContainerStore>,
        builds: Arc<dyn BuildStore>,
        runtime: Arc<dyn RuntimeAdapter>,
        fetcher: Arc<dyn SourceFetcher>,
        workspaces: WorkspaceManager,
        registry: Arc<ArtifactRegistry>,
        lifecycle: Arc<ContainerLifecycle>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            containers,
            builds,
            runtime,
            fetcher,
            workspaces,
            registry,
            lifecycle,
            notifier,
            callbacks: CallbackClient::new(),
        }
    }

    /// Runs one job to a terminal state.
    ///
    /// Returns `Err` only for transient infrastructure failures the queue
    /// may retry; business failures are recorded on the build and reported
    /// through the lifecycle, and the call returns `Ok`.
    pub async fn run(&self, job: &BuildJob) -> Result<()> {
        let container = match self.containers.get(job.container_id).await {
            Ok(container) => container,
            Err(EngineError::NotFound { .. }) => {
                warn!(
                    "Container {} deleted before build {} started",
                    job.container_id, job.build_id
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let build = match self.builds.get(job.build_id).await {
            Ok(build) => build,
            Err(EngineError::NotFound { .. }) => {
                warn!("Build {} missing from the store", job.build_id);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if build.status == BuildStatus::Cancel {
            self.builds
                .append_log(job.build_id, LogSeverity::Log, "cancelled before start")
                .await?;
            return Ok(());
        }
        if build.status.is_terminal() {
            // superseded while queued
            return Ok(());
        }

        self.builds
            .mark_started(job.build_id, chrono::Utc::now())
            .await?;
        self.callbacks
            .notify(
                job.callback_url.as_deref(),
                &build,
                &container,
                BuildStatus::Running,
            )
            .await;
        info!("Build {} started for {}", job.build_id, container.name);

        match self.execute(&container, job).await {
            Ok(StageFlow::Completed) => self.succeed(job, &container, &build).await,
            Ok(StageFlow::Cancelled(stage)) => {
                self.builds
                    .append_log(
                        job.build_id,
                        LogSeverity::Log,
                        &format!("build cancelled before {}", stage),
                    )
                    .await?;
                info!("Build {} cancelled before {}", job.build_id, stage);
                Ok(())
            }
            Err(e) if e.is_transient() => Err(e),
            Err(e) => {
                self.fail(job, &container, &build, &e.to_string()).await;
                Ok(())
            }
        }
    }

    /// Terminal failure path used by the queue once retries are exhausted
    pub async fn force_fail(&self, job: &BuildJob, reason: &str) {
        let Ok(build) = self.builds.get(job.build_id).await else {
            return;
        };
        if build.status.is_terminal() {
            // cancelled (or superseded) during the retry window
            return;
        }
        match self.containers.get(job.container_id).await {
            Ok(container) => self.fail(job, &container, &build, reason).await,
            Err(_) => {
                let _ = self
                    .builds
                    .append_log(job.build_id, LogSeverity::Error, reason)
                    .await;
                let _ = self
                    .builds
                    .mark_finished(job.build_id, BuildStatus::Failed, chrono::Utc::now())
                    .await;
            }
        }
    }

    async fn execute(&self, container: &Container, job: &BuildJob) -> Result<StageFlow> {
        if self.cancelled(job.build_id).await? {
            return Ok(StageFlow::Cancelled("prepare"));
        }
        let prepared = self.prepare(container, job).await?;

        if self.cancelled(job.build_id).await? {
            return Ok(StageFlow::Cancelled("clone"));
        }
        self.clone_source(container, job, &prepared).await?;

        if let Some(plan) = prepared.image.clone() {
            if self.cancelled(job.build_id).await? {
                return Ok(StageFlow::Cancelled("image build"));
            }
            self.build_image(container, job, &plan, &prepared).await?;

            if self.cancelled(job.build_id).await? {
                return Ok(StageFlow::Cancelled("image push"));
            }
            self.push_image(job, &plan, &prepared).await?;
        }

        if self.cancelled(job.build_id).await? {
            return Ok(StageFlow::Cancelled("deploy"));
        }
        self.deploy(container, job, &prepared).await?;

        if self.cancelled(job.build_id).await? {
            return Ok(StageFlow::Cancelled("finalize"));
        }
        self.finalize(container, job, &prepared).await?;
        Ok(StageFlow::Completed)
    }

    /// Resolves the ref, compiles artifacts for it, and lays out the
    /// workspace
    async fn prepare(&self, container: &Container, job: &BuildJob) -> Result<Prepared> {
        let ref_name = job
            .ref_override
            .clone()
            .or_else(|| container.deploy_ref().map(str::to_string))
            .ok_or_else(|| EngineError::Validation("no deployable ref configured".into()))?;
        self.builds
            .append_log(
                job.build_id,
                LogSeverity::Log,
                &format!("preparing workspace for ref {}", ref_name),
            )
            .await?;

        // compile against the resolved ref, not the stored one
        let mut effective = container.clone();
        match effective.deployment_type {
            DeploymentType::Branch => effective.branch = Some(ref_name.clone()),
            DeploymentType::Tag => effective.tag = Some(ref_name.clone()),
        }
        let set = self
            .registry
            .compile_or_custom(&effective, Some(job.build_id))
            .ok_or_else(|| {
                EngineError::Validation(format!(
                    "no artifact builder for ({:?}, {:?}) and no custom plan",
                    container.kind, container.container_type
                ))
            })?;

        let source_dir = self.workspaces.recreate_source(container.id).await?;
        let written = self
            .workspaces
            .write_artifacts(
                container.id,
                &ref_name,
                &set,
                effective.env.as_deref(),
                effective.registry_auth.as_deref(),
            )
            .await?;

        Ok(Prepared {
            ref_name,
            image: set.image,
            written,
            source_dir,
        })
    }

    async fn clone_source(
        &self,
        container: &Container,
        job: &BuildJob,
        prepared: &Prepared,
    ) -> Result<()> {
        let source = container
            .source
            .as_deref()
            .ok_or_else(|| EngineError::Validation("no VCS source configured".into()))?;
        let repository = container
            .repository_id
            .as_deref()
            .ok_or_else(|| EngineError::Validation("no repository configured".into()))?;
        let repo_url = format!("{}/{}.git", source.trim_end_matches('/'), repository);

        self.builds
            .append_log(
                job.build_id,
                LogSeverity::Log,
                &format!("cloning {} at {}", repository, prepared.ref_name),
            )
            .await?;
        let stream = self
            .fetcher
            .fetch(&CloneSpec {
                repo_url,
                git_ref: prepared.ref_name.clone(),
                dest: prepared.source_dir.clone(),
            })
            .await?;
        self.stream_to_log(job.build_id, stream).await
    }

    async fn build_image(
        &self,
        container: &Container,
        job: &BuildJob,
        plan: &ImageBuildPlan,
        prepared: &Prepared,
    ) -> Result<()> {
        let (dockerfile, context) = build_inputs(
            &prepared.source_dir,
            &container.base_dir,
            &prepared.written,
            &plan.dockerfile,
        );
        self.builds
            .append_log(
                job.build_id,
                LogSeverity::Log,
                &format!("building image {}", plan.image_tag),
            )
            .await?;
        let stream = self
            .runtime
            .build_image(&context, &dockerfile, &plan.image_tag)
            .await?;
        self.stream_to_log(job.build_id, stream).await
    }

    async fn push_image(
        &self,
        job: &BuildJob,
        plan: &ImageBuildPlan,
        prepared: &Prepared,
    ) -> Result<()> {
        self.builds
            .append_log(
                job.build_id,
                LogSeverity::Log,
                &format!("pushing image {}", plan.image_tag),
            )
            .await?;
        let stream = self
            .runtime
            .push_image(&plan.image_tag, prepared.written.credential_file.as_deref())
            .await?;
        self.stream_to_log(job.build_id, stream).await
    }

    async fn deploy(
        &self,
        container: &Container,
        job: &BuildJob,
        prepared: &Prepared,
    ) -> Result<()> {
        self.builds
            .append_log(job.build_id, LogSeverity::Log, "starting deployment")
            .await?;
        let stream = self
            .runtime
            .deploy(&prepared.written.compose_file, &project_name(container))
            .await?;
        self.stream_to_log(job.build_id, stream).await
    }

    /// Post-deploy cleanup: tag-based containers drop artifacts of refs
    /// other than the one just deployed
    async fn finalize(
        &self,
        container: &Container,
        job: &BuildJob,
        prepared: &Prepared,
    ) -> Result<()> {
        if container.deployment_type == DeploymentType::Tag {
            self.workspaces
                .clean_stale_refs(container.id, &prepared.ref_name)
                .await?;
        }
        self.builds
            .append_log(job.build_id, LogSeverity::Log, "deployment complete")
            .await
    }

    /// Forwards process output into the build log, stderr tagged as error,
    /// then maps the exit status
    async fn stream_to_log(&self, build_id: Uuid, mut stream: CommandStream) -> Result<()> {
        while let Some(output) = stream.next_line().await {
            let severity = match output.stream {
                OutputStreamKind::Stdout => LogSeverity::Log,
                OutputStreamKind::Stderr => LogSeverity::Error,
            };
            self.builds.append_log(build_id, severity, &output.line).await?;
        }
        stream.finish().await
    }

    async fn cancelled(&self, build_id: Uuid) -> Result<bool> {
        Ok(self.builds.get(build_id).await?.status == BuildStatus::Cancel)
    }

    async fn succeed(&self, job: &BuildJob, container: &Container, build: &Build) -> Result<()> {
        let current = self.builds.get(job.build_id).await?;
        if current.status.is_terminal() {
            // a cancel raced the final stages; the terminal status stands
            info!(
                "Build {} already {:?}; not marking success",
                job.build_id, current.status
            );
            return Ok(());
        }
        self.builds
            .mark_finished(job.build_id, BuildStatus::Success, chrono::Utc::now())
            .await?;
        self.callbacks
            .notify(
                job.callback_url.as_deref(),
                build,
                container,
                BuildStatus::Success,
            )
            .await;
        self.lifecycle.build_outcome(build, true).await?;
        self.notifier
            .notify(NotifyEvent::BuildSucceeded {
                container_name: container.name.clone(),
                build_id: job.build_id,
            })
            .await;
        info!("Build {} for {} succeeded", job.build_id, container.name);
        Ok(())
    }

    async fn fail(&self, job: &BuildJob, container: &Container, build: &Build, reason: &str) {
        // a stop() can flip the build to CANCEL while a stage is in flight;
        // the stage then errors, but the terminal status must not change
        if let Ok(current) = self.builds.get(job.build_id).await {
            if current.status.is_terminal() {
                info!(
                    "Build {} already {:?}; discarding stage error: {}",
                    job.build_id, current.status, reason
                );
                return;
            }
        }
        if let Err(e) = self
            .builds
            .append_log(job.build_id, LogSeverity::Error, reason)
            .await
        {
            warn!("Failed to record failure log for {}: {}", job.build_id, e);
        }
        if let Err(e) = self
            .builds
            .mark_finished(job.build_id, BuildStatus::Failed, chrono::Utc::now())
            .await
        {
            warn!("Failed to mark build {} failed: {}", job.build_id, e);
        }
        self.callbacks
            .notify(
                job.callback_url.as_deref(),
                build,
                container,
                BuildStatus::Failed,
            )
            .await;
        if let Err(e) = self.lifecycle.build_outcome(build, false).await {
            warn!(
                "Failed to apply failure outcome for build {}: {}",
                job.build_id, e
            );
        }
        self.notifier
            .notify(NotifyEvent::BuildFailed {
                container_name: container.name.clone(),
                build_id: job.build_id,
                reason: reason.to_string(),
            })
            .await;
    }
}
