//! Shared test doubles: a scripted runtime adapter, a recording source
//! fetcher, and a fully wired engine rig over the in-memory store.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use drydock_core::domain::{
    BuildStatus, Container, ContainerKind, ContainerType, DeploymentType,
};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::artifact::ArtifactRegistry;
use crate::error::{EngineError, Result};
use crate::lifecycle::ContainerLifecycle;
use crate::notify::TracingNotifier;
use crate::pipeline::BuildPipeline;
use crate::queue::BuildQueue;
use crate::runtime::git::{CloneSpec, SourceFetcher};
use crate::runtime::{CommandStream, RuntimeAdapter, RuntimeEvent};
use crate::store::{BuildStore, MemoryStore};
use crate::workspacefs::WorkspaceManager;

/// Stream that emits the given stdout lines and exits 0
pub(crate) fn stream_lines(lines: &[&str]) -> CommandStream {
    let (out_tx, out_rx) = mpsc::channel(32);
    let (_err_tx, err_rx) = mpsc::channel(1);
    let lines: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
    let status = tokio::spawn(async move {
        for line in lines {
            let _ = out_tx.send(line).await;
        }
        Ok(())
    });
    CommandStream::from_parts(out_rx, err_rx, status)
}

/// Stream that emits one stderr line and exits non-zero
pub(crate) fn stream_err(command: &str, stderr_line: &str) -> CommandStream {
    let (_out_tx, out_rx) = mpsc::channel(1);
    let (err_tx, err_rx) = mpsc::channel(8);
    let command = command.to_string();
    let line = stderr_line.to_string();
    let status = tokio::spawn(async move {
        let _ = err_tx.send(line.clone()).await;
        Err(EngineError::ExternalProcess {
            command,
            exit_code: 1,
            stderr: line,
        })
    });
    CommandStream::from_parts(out_rx, err_rx, status)
}

/// Scripted runtime adapter recording call counts
#[derive(Default)]
pub(crate) struct MockRuntime {
    fail_stage: Mutex<Option<&'static str>>,
    stop_fails: AtomicBool,
    build_calls: AtomicUsize,
    push_calls: AtomicUsize,
    deploy_calls: AtomicUsize,
    pub stopped: Mutex<Vec<Uuid>>,
}

impl MockRuntime {
    /// Makes the named stage ("build", "push", "deploy") exit non-zero
    pub fn fail_at(&self, stage: &'static str) {
        *self.fail_stage.lock().unwrap() = Some(stage);
    }

    pub fn fail_stop(&self) {
        self.stop_fails.store(true, Ordering::SeqCst);
    }

    pub fn build_calls(&self) -> usize {
        self.build_calls.load(Ordering::SeqCst)
    }

    pub fn push_calls(&self) -> usize {
        self.push_calls.load(Ordering::SeqCst)
    }

    pub fn deploy_calls(&self) -> usize {
        self.deploy_calls.load(Ordering::SeqCst)
    }

    fn stage_stream(&self, stage: &'static str, ok_line: &str) -> CommandStream {
        if *self.fail_stage.lock().unwrap() == Some(stage) {
            stream_err(stage, &format!("{} failed", stage))
        } else {
            stream_lines(&[ok_line])
        }
    }
}

#[async_trait]
impl RuntimeAdapter for MockRuntime {
    async fn build_image(
        &self,
        _context_dir: &Path,
        _dockerfile: &Path,
        image_tag: &str,
    ) -> Result<CommandStream> {
        self.build_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.stage_stream("build", &format!("built {}", image_tag)))
    }

    async fn push_image(
        &self,
        image_tag: &str,
        _credential_file: Option<&Path>,
    ) -> Result<CommandStream> {
        self.push_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.stage_stream("push", &format!("pushed {}", image_tag)))
    }

    async fn deploy(&self, _plan_file: &Path, project: &str) -> Result<CommandStream> {
        self.deploy_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.stage_stream("deploy", &format!("started {}", project)))
    }

    async fn stop(&self, deployment_id: Uuid) -> Result<()> {
        if self.stop_fails.load(Ordering::SeqCst) {
            return Err(EngineError::TransientInfra("engine unreachable".into()));
        }
        self.stopped.lock().unwrap().push(deployment_id);
        Ok(())
    }

    async fn runtime_id(&self, _deployment_id: Uuid) -> Result<Option<String>> {
        Ok(None)
    }

    async fn logs(
        &self,
        _deployment_id: Uuid,
        _since: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<String> {
        Ok(String::new())
    }

    async fn health(&self, _deployment_id: Uuid) -> Result<bool> {
        Ok(true)
    }

    async fn stats(&self, _deployment_id: Uuid) -> Result<serde_json::Value> {
        Ok(serde_json::json!({}))
    }

    async fn delete_volume(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn events(&self) -> Result<mpsc::Receiver<RuntimeEvent>> {
        let (tx, rx) = mpsc::channel(1);
        drop(tx);
        Ok(rx)
    }
}

/// Recording fetcher; can fail transiently or flip a build to CANCEL
/// mid-pipeline to exercise stage-boundary cancellation
#[derive(Default)]
pub(crate) struct MockFetcher {
    pub specs: Mutex<Vec<CloneSpec>>,
    pub fail_transient: AtomicBool,
    pub fail_clone: AtomicBool,
    pub cancel_build: Mutex<Option<(MemoryStore, Uuid)>>,
}

#[async_trait]
impl SourceFetcher for MockFetcher {
    async fn fetch(&self, spec: &CloneSpec) -> Result<CommandStream> {
        if self.fail_transient.load(Ordering::SeqCst) {
            return Err(EngineError::TransientInfra("git host unreachable".into()));
        }
        self.specs.lock().unwrap().push(spec.clone());
        let cancel = self.cancel_build.lock().unwrap().clone();
        if let Some((store, build_id)) = cancel {
            BuildStore::set_status(&store, build_id, BuildStatus::Cancel).await?;
        }
        if self.fail_clone.load(Ordering::SeqCst) {
            return Ok(stream_err("git clone", "destination path removed"));
        }
        Ok(stream_lines(&["Cloning into 'source'..."]))
    }
}

/// Fully wired engine over the in-memory store and mocks
pub(crate) struct Rig {
    pub store: MemoryStore,
    pub queue: Arc<BuildQueue>,
    pub lifecycle: Arc<ContainerLifecycle>,
    pub pipeline: Arc<BuildPipeline>,
    pub runtime: Arc<MockRuntime>,
    pub fetcher: Arc<MockFetcher>,
    pub workspaces: WorkspaceManager,
    pub _tmp: tempfile::TempDir,
}

pub(crate) fn rig() -> Rig {
    let store = MemoryStore::new();
    let tmp = tempfile::tempdir().unwrap();
    let runtime = Arc::new(MockRuntime::default());
    let fetcher = Arc::new(MockFetcher::default());
    let workspaces = WorkspaceManager::new(tmp.path().to_path_buf());
    let registry = Arc::new(ArtifactRegistry::with_defaults());
    let notifier = Arc::new(TracingNotifier);

    let queue = Arc::new(BuildQueue::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        1,
        3,
        100,
    ));
    let lifecycle = Arc::new(ContainerLifecycle::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        runtime.clone(),
        queue.clone(),
        workspaces.clone(),
        registry.clone(),
        notifier.clone(),
    ));
    let pipeline = Arc::new(BuildPipeline::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        runtime.clone(),
        fetcher.clone(),
        workspaces.clone(),
        registry,
        lifecycle.clone(),
        notifier,
    ));

    Rig {
        store,
        queue,
        lifecycle,
        pipeline,
        runtime,
        fetcher,
        workspaces,
        _tmp: tmp,
    }
}

/// Application container with every deploy-required field filled in
pub(crate) fn app_container() -> Container {
    let mut c = Container::new(
        Uuid::new_v4(),
        "api",
        ContainerKind::Application,
        ContainerType::General,
    );
    c.deployment_type = DeploymentType::Branch;
    c.branch = Some("main".to_string());
    c.registry = Some("registry.example.com".to_string());
    c.source = Some("https://git.example.com".to_string());
    c.repository_id = Some("42".to_string());
    c.url = Some("api.example.com".to_string());
    c.port = Some(3000);
    c
}

/// Bundled postgres database container
pub(crate) fn db_container() -> Container {
    Container::new(
        Uuid::new_v4(),
        "db",
        ContainerKind::Database,
        ContainerType::Postgres,
    )
}
