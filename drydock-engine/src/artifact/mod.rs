//! Deployment artifact compiler
//!
//! Pure mapping from a container's declared configuration to the text
//! artifacts the runtime consumes: an image build plan and a compose-based
//! deployment plan. Dispatch is a registry keyed by `(kind, type)` so new
//! service types plug in without touching a central conditional. Compiling
//! the same container twice yields identical output.

pub mod builders;
pub mod proxy;

use std::collections::HashMap;

use drydock_core::domain::{Container, ContainerKind, ContainerType};
use uuid::Uuid;

/// Where the Dockerfile for an image build comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DockerfileSource {
    /// Compiler-generated content, written into the workspace before build
    Generated(String),
    /// Path inside the cloned repository, relative to the base dir
    FromRepo(String),
}

/// Instructions for building one image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuildPlan {
    pub image_tag: String,
    pub dockerfile: DockerfileSource,
}

/// Compose document handed to the runtime adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentPlan {
    pub compose: String,
}

/// Compiled artifacts for one container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSet {
    /// Absent for kinds deployed directly from a published image
    pub image: Option<ImageBuildPlan>,
    pub deployment: DeploymentPlan,
}

/// Inputs that vary per compilation but not per container config
#[derive(Debug, Clone)]
pub struct CompileContext {
    /// Build this compilation belongs to, stamped into the plan labels
    pub build_id: Option<Uuid>,
    /// Fully qualified image tag for kinds that build an image
    pub image_tag: String,
}

impl CompileContext {
    /// Derives the image tag from the container's registry, name, and
    /// active ref
    pub fn for_container(container: &Container, build_id: Option<Uuid>) -> Self {
        let registry = container.registry.as_deref().unwrap_or("localhost:5000");
        let version = container.deploy_ref().unwrap_or("latest");
        Self {
            build_id,
            image_tag: format!("{}/{}:{}", registry, container.name, version),
        }
    }
}

type BuilderFn = fn(&Container, &CompileContext) -> ArtifactSet;

/// Registry mapping `(kind, type)` to a builder function
pub struct ArtifactRegistry {
    builders: HashMap<(ContainerKind, ContainerType), BuilderFn>,
}

impl ArtifactRegistry {
    /// Registry with every bundled builder installed
    pub fn with_defaults() -> Self {
        let mut registry = Self {
            builders: HashMap::new(),
        };
        registry.register(
            ContainerKind::Application,
            ContainerType::General,
            builders::build_general,
        );
        registry.register(
            ContainerKind::Application,
            ContainerType::Static,
            builders::build_static,
        );
        for kind in [ContainerKind::Database, ContainerKind::Service] {
            registry.register(kind, ContainerType::Postgres, builders::build_postgres);
            registry.register(kind, ContainerType::Mysql, builders::build_mysql);
            registry.register(kind, ContainerType::Mariadb, builders::build_mariadb);
            registry.register(kind, ContainerType::Mongo, builders::build_mongo);
            registry.register(kind, ContainerType::Redis, builders::build_redis);
        }
        registry
    }

    pub fn register(&mut self, kind: ContainerKind, ty: ContainerType, builder: BuilderFn) {
        self.builders.insert((kind, ty), builder);
    }

    /// Compiles artifacts for the container, or `None` when no builder
    /// matches its `(kind, type)`
    pub fn compile(&self, container: &Container, build_id: Option<Uuid>) -> Option<ArtifactSet> {
        let builder = self.builders.get(&(container.kind, container.container_type))?;
        let ctx = CompileContext::for_container(container, build_id);
        Some(builder(container, &ctx))
    }

    /// Compiles via the registry, falling back to the container's
    /// user-supplied artifacts when no builder matches
    pub fn compile_or_custom(
        &self,
        container: &Container,
        build_id: Option<Uuid>,
    ) -> Option<ArtifactSet> {
        if let Some(set) = self.compile(container, build_id) {
            return Some(set);
        }
        let compose = container.custom_compose.clone()?;
        let ctx = CompileContext::for_container(container, build_id);
        let image = container
            .custom_dockerfile
            .clone()
            .map(|dockerfile| ImageBuildPlan {
                image_tag: ctx.image_tag.clone(),
                dockerfile: DockerfileSource::Generated(dockerfile),
            });
        Some(ArtifactSet {
            image,
            deployment: DeploymentPlan { compose },
        })
    }
}

/// Generated-secret env key for bundled database/service kinds
pub const SERVICE_PASSWORD_KEY: &str = "SERVICE_PASSWORD";

/// Ensures the container env carries a generated service password.
///
/// The secret is generated exactly once per container; compilation itself
/// stays pure so identical input keeps compiling to identical output.
/// Returns true when the env was changed and needs persisting.
pub fn ensure_service_secret(container: &mut Container) -> bool {
    if !matches!(
        container.kind,
        ContainerKind::Database | ContainerKind::Service
    ) {
        return false;
    }
    let has_secret = container
        .env
        .as_deref()
        .is_some_and(|env| env.lines().any(|l| l.starts_with(SERVICE_PASSWORD_KEY)));
    if has_secret {
        return false;
    }
    let secret = Uuid::new_v4().simple().to_string();
    let line = format!("{}={}", SERVICE_PASSWORD_KEY, secret);
    container.env = Some(match container.env.take() {
        Some(env) if !env.is_empty() => format!("{}\n{}", env, line),
        _ => line,
    });
    true
}
