//! Container domain types
//!
//! A container is the deployable unit tracked by the orchestrator: an
//! application built from source, a bundled database/service image, or a
//! custom user-defined artifact.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What the container fundamentally is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerKind {
    Application,
    Database,
    Service,
    Custom,
}

/// Runtime/engine variant within a kind
///
/// Application kinds use `General` or `Static`; database/service kinds pick
/// one of the bundled images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerType {
    General,
    Static,
    Postgres,
    Mysql,
    Mariadb,
    Mongo,
    Redis,
}

/// Which VCS ref the container deploys from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentType {
    Branch,
    Tag,
}

/// How tag-deployed containers match an incoming tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TagMatchType {
    Exact,
    Pattern,
}

/// Container status, owned by the lifecycle state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerStatus {
    Draft,
    Building,
    Deployed,
    Died,
    Stopped,
    StoppedBySystem,
    Restoring,
}

/// A named volume mounted into the deployed container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
}

/// Basic-auth protection for the reverse-proxy route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    /// htpasswd-style hash, passed through to the proxy verbatim
    pub password_hash: String,
}

/// Deployable unit
///
/// Declared configuration plus runtime-observed fields. `status` and the
/// `last_*` fields are only written through the lifecycle state machine and
/// the build pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub kind: ContainerKind,
    #[serde(rename = "type")]
    pub container_type: ContainerType,
    pub deployment_type: DeploymentType,
    pub branch: Option<String>,
    pub tag: Option<String>,
    pub tag_match_type: Option<TagMatchType>,
    pub tag_pattern: Option<String>,
    pub auto_deploy: bool,
    /// Logical VCS repository identifier, matched against webhook payloads
    pub repository_id: Option<String>,
    /// Subdirectory the container builds from; "/" means the repo root
    pub base_dir: String,
    /// Registry host images are pushed to
    pub registry: Option<String>,
    /// Opaque docker-config JSON for authenticating against the registry
    pub registry_auth: Option<String>,
    /// Reference to the VCS credentials record (clone URL base)
    pub source: Option<String>,
    /// Opaque env-file text, written verbatim into the workspace
    pub env: Option<String>,
    pub port: Option<u16>,
    pub health_check_cmd: Option<String>,
    /// Base image override for the general-purpose builder
    pub build_image: Option<String>,
    /// User-supplied Dockerfile, used when no builder matches (kind, type)
    pub custom_dockerfile: Option<String>,
    /// User-supplied compose document, used when no builder matches
    pub custom_compose: Option<String>,
    #[serde(default)]
    pub volumes: Vec<VolumeMount>,
    /// Public hostname routed by the reverse proxy
    pub url: Option<String>,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub compress: bool,
    pub basic_auth: Option<BasicAuth>,

    pub status: ContainerStatus,
    pub last_build: Option<Uuid>,
    pub last_deployed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_logs_from: Option<chrono::DateTime<chrono::Utc>>,
}

impl Container {
    /// Creates a new container in DRAFT with the minimal required identity
    pub fn new(
        project_id: Uuid,
        name: impl Into<String>,
        kind: ContainerKind,
        container_type: ContainerType,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            name: name.into(),
            kind,
            container_type,
            deployment_type: DeploymentType::Branch,
            branch: None,
            tag: None,
            tag_match_type: None,
            tag_pattern: None,
            auto_deploy: true,
            repository_id: None,
            base_dir: "/".to_string(),
            registry: None,
            registry_auth: None,
            source: None,
            env: None,
            port: None,
            health_check_cmd: None,
            build_image: None,
            custom_dockerfile: None,
            custom_compose: None,
            volumes: Vec::new(),
            url: None,
            tls: false,
            compress: false,
            basic_auth: None,
            status: ContainerStatus::Draft,
            last_build: None,
            last_deployed_at: None,
            last_logs_from: None,
        }
    }

    /// Whether this kind is deployed through the build pipeline
    /// (as opposed to directly from a bundled image)
    pub fn requires_build(&self) -> bool {
        matches!(self.kind, ContainerKind::Application | ContainerKind::Custom)
    }

    /// Whether the base dir points at a repo subdirectory
    pub fn has_sub_dir(&self) -> bool {
        !matches!(self.base_dir.as_str(), "" | "/")
    }

    /// The VCS ref this container deploys from, if configured
    pub fn deploy_ref(&self) -> Option<&str> {
        match self.deployment_type {
            DeploymentType::Branch => self.branch.as_deref(),
            DeploymentType::Tag => self.tag.as_deref(),
        }
    }
}
