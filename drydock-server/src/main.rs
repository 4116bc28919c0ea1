use std::sync::Arc;

use drydock_engine::EngineConfig;
use drydock_engine::artifact::ArtifactRegistry;
use drydock_engine::lifecycle::ContainerLifecycle;
use drydock_engine::notify::{Notifier, TracingNotifier};
use drydock_engine::pipeline::BuildPipeline;
use drydock_engine::queue::BuildQueue;
use drydock_engine::reconciler::EventReconciler;
use drydock_engine::runtime::docker::{DockerRuntime, check_docker_available};
use drydock_engine::runtime::git::{GitFetcher, SourceFetcher};
use drydock_engine::runtime::RuntimeAdapter;
use drydock_engine::store::{BuildStore, ContainerStore, MemoryStore};
use drydock_engine::sweep::SweepService;
use drydock_engine::webhook::WebhookResolver;
use drydock_engine::workspacefs::WorkspaceManager;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod config;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "drydock=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Drydock...");

    let server_config = config::ServerConfig::from_env();
    let engine_config = EngineConfig::from_env().expect("Invalid engine configuration");

    check_docker_available()
        .await
        .expect("Container engine is not available");

    // Single-node operation: both store contracts backed in-process
    let store = MemoryStore::new();
    let containers: Arc<dyn ContainerStore> = Arc::new(store.clone());
    let builds: Arc<dyn BuildStore> = Arc::new(store.clone());
    let runtime: Arc<dyn RuntimeAdapter> = Arc::new(DockerRuntime::new());
    let fetcher: Arc<dyn SourceFetcher> = Arc::new(GitFetcher::new());
    let workspaces = WorkspaceManager::new(engine_config.data_dir.clone());
    let registry = Arc::new(ArtifactRegistry::with_defaults());
    let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier);

    let queue = Arc::new(BuildQueue::new(
        builds.clone(),
        containers.clone(),
        engine_config.worker_concurrency,
        engine_config.retry_attempts,
        engine_config.log_cap,
    ));
    let lifecycle = Arc::new(ContainerLifecycle::new(
        containers.clone(),
        builds.clone(),
        runtime.clone(),
        queue.clone(),
        workspaces.clone(),
        registry.clone(),
        notifier.clone(),
    ));
    let pipeline = Arc::new(BuildPipeline::new(
        containers.clone(),
        builds.clone(),
        runtime.clone(),
        fetcher,
        workspaces,
        registry,
        lifecycle.clone(),
        notifier,
    ));

    let workers = queue.spawn_workers(pipeline);
    tracing::info!("{} build worker(s) started", workers.len());

    Arc::new(EventReconciler::new(runtime.clone(), lifecycle.clone())).spawn();
    Arc::new(SweepService::new(
        builds,
        containers.clone(),
        lifecycle.clone(),
        engine_config.sweep_interval,
        engine_config.build_timeout,
    ))
    .spawn();

    let resolver = Arc::new(WebhookResolver::new(
        containers.clone(),
        lifecycle.clone(),
        engine_config.monorepo_commit_threshold,
        engine_config.skip_marker.clone(),
    ));

    let app = api::create_router(api::AppState {
        containers,
        lifecycle,
        resolver,
        api_token: server_config.api_token,
    });

    tracing::info!("Listening on {}", server_config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&server_config.bind_addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
