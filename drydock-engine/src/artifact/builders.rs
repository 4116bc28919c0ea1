//! Bundled artifact builders
//!
//! One builder per supported `(kind, type)` pair: the general-purpose
//! application builder, the static-content builder, and the catalog of
//! bundled database/service images. All of them compile down to an optional
//! image plan plus a compose deployment plan.

use std::collections::BTreeMap;

use drydock_core::domain::Container;
use serde_json::{Map, Value, json};

use super::proxy;
use super::{
    ArtifactSet, CompileContext, DeploymentPlan, DockerfileSource, ImageBuildPlan,
    SERVICE_PASSWORD_KEY,
};
use crate::runtime::{BUILD_LABEL, DEPLOYMENT_LABEL};

/// Relative name of the env file written next to the compose file
pub const ENV_FILE_NAME: &str = ".env";

/// General-purpose application builder
///
/// Builds from the repository's own Dockerfile by default; when a base image
/// is configured, generates a convention-based scaffold instead.
pub fn build_general(container: &Container, ctx: &CompileContext) -> ArtifactSet {
    let dockerfile = match container.build_image.as_deref() {
        Some(base) => DockerfileSource::Generated(scaffold_dockerfile(base)),
        None => DockerfileSource::FromRepo("Dockerfile".to_string()),
    };
    ArtifactSet {
        image: Some(ImageBuildPlan {
            image_tag: ctx.image_tag.clone(),
            dockerfile,
        }),
        deployment: render_deployment(
            container,
            ctx,
            ComposeSpec {
                image: ctx.image_tag.clone(),
                port: container.port,
                exposed: true,
                environment: BTreeMap::new(),
                command: None,
                data_volume: None,
            },
        ),
    }
}

/// Static-content builder (nginx serving the repo contents)
pub fn build_static(container: &Container, ctx: &CompileContext) -> ArtifactSet {
    let dockerfile = [
        "FROM docker.io/library/nginx:alpine",
        "COPY . /usr/share/nginx/html",
    ]
    .join("\n");
    ArtifactSet {
        image: Some(ImageBuildPlan {
            image_tag: ctx.image_tag.clone(),
            dockerfile: DockerfileSource::Generated(dockerfile),
        }),
        deployment: render_deployment(
            container,
            ctx,
            ComposeSpec {
                image: ctx.image_tag.clone(),
                port: Some(container.port.unwrap_or(80)),
                exposed: true,
                environment: BTreeMap::new(),
                command: None,
                data_volume: None,
            },
        ),
    }
}

pub fn build_postgres(container: &Container, ctx: &CompileContext) -> ArtifactSet {
    let secret = service_secret(container);
    let mut environment = BTreeMap::new();
    environment.insert("POSTGRES_USER".to_string(), container.name.clone());
    environment.insert("POSTGRES_PASSWORD".to_string(), secret);
    environment.insert("POSTGRES_DB".to_string(), container.name.clone());
    bundled_service(
        container,
        ctx,
        "docker.io/library/postgres:16-alpine",
        5432,
        environment,
        None,
        "/var/lib/postgresql/data",
    )
}

pub fn build_mysql(container: &Container, ctx: &CompileContext) -> ArtifactSet {
    let secret = service_secret(container);
    let mut environment = BTreeMap::new();
    environment.insert("MYSQL_ROOT_PASSWORD".to_string(), secret);
    environment.insert("MYSQL_DATABASE".to_string(), container.name.clone());
    bundled_service(
        container,
        ctx,
        "docker.io/library/mysql:8.4",
        3306,
        environment,
        None,
        "/var/lib/mysql",
    )
}

pub fn build_mariadb(container: &Container, ctx: &CompileContext) -> ArtifactSet {
    let secret = service_secret(container);
    let mut environment = BTreeMap::new();
    environment.insert("MARIADB_ROOT_PASSWORD".to_string(), secret);
    environment.insert("MARIADB_DATABASE".to_string(), container.name.clone());
    bundled_service(
        container,
        ctx,
        "docker.io/library/mariadb:11",
        3306,
        environment,
        None,
        "/var/lib/mysql",
    )
}

pub fn build_mongo(container: &Container, ctx: &CompileContext) -> ArtifactSet {
    let secret = service_secret(container);
    let mut environment = BTreeMap::new();
    environment.insert(
        "MONGO_INITDB_ROOT_USERNAME".to_string(),
        container.name.clone(),
    );
    environment.insert("MONGO_INITDB_ROOT_PASSWORD".to_string(), secret);
    bundled_service(
        container,
        ctx,
        "docker.io/library/mongo:7",
        27017,
        environment,
        None,
        "/data/db",
    )
}

pub fn build_redis(container: &Container, ctx: &CompileContext) -> ArtifactSet {
    let secret = service_secret(container);
    bundled_service(
        container,
        ctx,
        "docker.io/library/redis:7-alpine",
        6379,
        BTreeMap::new(),
        Some(format!("redis-server --requirepass {}", secret)),
        "/data",
    )
}

fn bundled_service(
    container: &Container,
    ctx: &CompileContext,
    image: &str,
    port: u16,
    environment: BTreeMap<String, String>,
    command: Option<String>,
    data_path: &str,
) -> ArtifactSet {
    ArtifactSet {
        image: None,
        deployment: render_deployment(
            container,
            ctx,
            ComposeSpec {
                image: image.to_string(),
                port: Some(port),
                exposed: false,
                environment,
                command,
                data_volume: Some(data_path.to_string()),
            },
        ),
    }
}

/// Reads the generated service password out of the container env; empty when
/// the secret has not been provisioned yet
fn service_secret(container: &Container) -> String {
    container
        .env
        .as_deref()
        .and_then(|env| {
            env.lines()
                .find_map(|l| l.strip_prefix(&format!("{}=", SERVICE_PASSWORD_KEY)))
        })
        .unwrap_or_default()
        .to_string()
}

fn scaffold_dockerfile(base: &str) -> String {
    [
        &format!("FROM {}", base) as &str,
        "WORKDIR /app",
        "COPY . .",
        "RUN if [ -f ./build.sh ]; then sh ./build.sh; fi",
        "CMD [\"sh\", \"./start.sh\"]",
    ]
    .join("\n")
}

struct ComposeSpec {
    image: String,
    port: Option<u16>,
    /// Whether the service gets reverse-proxy routing labels
    exposed: bool,
    environment: BTreeMap<String, String>,
    command: Option<String>,
    /// Mount path for a generated named data volume
    data_volume: Option<String>,
}

/// Renders the compose deployment plan for one container
///
/// serde_json's sorted object keys plus BTreeMap labels make the output
/// deterministic for identical input.
fn render_deployment(
    container: &Container,
    ctx: &CompileContext,
    spec: ComposeSpec,
) -> DeploymentPlan {
    let mut labels = BTreeMap::new();
    labels.insert(DEPLOYMENT_LABEL.to_string(), container.id.to_string());
    if let Some(build_id) = ctx.build_id {
        labels.insert(BUILD_LABEL.to_string(), build_id.to_string());
    }
    if spec.exposed {
        let port = spec.port.unwrap_or(80);
        labels.extend(proxy::routing_labels(container, port));
    }

    let mut service = Map::new();
    service.insert("image".to_string(), json!(spec.image));
    service.insert("restart".to_string(), json!("unless-stopped"));
    service.insert("labels".to_string(), json!(labels));
    service.insert("networks".to_string(), json!(["drydock"]));
    if container.env.is_some() {
        service.insert("env_file".to_string(), json!([ENV_FILE_NAME]));
    }
    if !spec.environment.is_empty() {
        service.insert("environment".to_string(), json!(spec.environment));
    }
    if let Some(command) = &spec.command {
        service.insert("command".to_string(), json!(command));
    }
    if let Some(port) = spec.port {
        service.insert("expose".to_string(), json!([port]));
    }
    if let Some(cmd) = &container.health_check_cmd {
        service.insert(
            "healthcheck".to_string(),
            json!({ "test": ["CMD-SHELL", cmd] }),
        );
    }

    let mut mounts = Vec::new();
    let mut named_volumes = Map::new();
    if let Some(path) = &spec.data_volume {
        let volume = format!("{}-data", container.name);
        mounts.push(format!("{}:{}", volume, path));
        named_volumes.insert(volume, json!({}));
    }
    for mount in &container.volumes {
        let volume = format!("{}-{}", container.name, mount.name);
        mounts.push(format!("{}:{}", volume, mount.mount_path));
        named_volumes.insert(volume, json!({}));
    }
    if !mounts.is_empty() {
        service.insert("volumes".to_string(), json!(mounts));
    }

    let mut doc = Map::new();
    doc.insert(
        "services".to_string(),
        json!({ container.name.clone(): Value::Object(service) }),
    );
    doc.insert(
        "networks".to_string(),
        json!({ "drydock": { "external": true } }),
    );
    if !named_volumes.is_empty() {
        doc.insert("volumes".to_string(), Value::Object(named_volumes));
    }

    let compose = serde_yaml::to_string(&Value::Object(doc))
        .unwrap_or_else(|e| format!("# compose render failed: {}", e));
    DeploymentPlan { compose }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drydock_core::domain::{ContainerKind, ContainerType, VolumeMount};
    use uuid::Uuid;

    fn app() -> Container {
        let mut c = Container::new(
            Uuid::new_v4(),
            "web",
            ContainerKind::Application,
            ContainerType::General,
        );
        c.registry = Some("registry.example.com".to_string());
        c.branch = Some("main".to_string());
        c.url = Some("web.example.com".to_string());
        c.port = Some(3000);
        c
    }

    #[test]
    fn test_general_builds_from_repo_dockerfile() {
        let c = app();
        let ctx = CompileContext::for_container(&c, None);
        let set = build_general(&c, &ctx);
        let image = set.image.unwrap();
        assert_eq!(image.dockerfile, DockerfileSource::FromRepo("Dockerfile".into()));
        assert_eq!(image.image_tag, "registry.example.com/web:main");
    }

    #[test]
    fn test_general_scaffolds_when_base_image_set() {
        let mut c = app();
        c.build_image = Some("docker.io/library/node:22-alpine".to_string());
        let ctx = CompileContext::for_container(&c, None);
        let set = build_general(&c, &ctx);
        match set.image.unwrap().dockerfile {
            DockerfileSource::Generated(content) => {
                assert!(content.starts_with("FROM docker.io/library/node:22-alpine"));
            }
            other => panic!("expected generated dockerfile, got {:?}", other),
        }
    }

    #[test]
    fn test_deployment_plan_embeds_identifying_labels() {
        let c = app();
        let build_id = Uuid::new_v4();
        let ctx = CompileContext::for_container(&c, Some(build_id));
        let set = build_general(&c, &ctx);
        assert!(
            set.deployment
                .compose
                .contains(&format!("drydock.deployment: {}", c.id))
        );
        assert!(
            set.deployment
                .compose
                .contains(&format!("drydock.build: {}", build_id))
        );
    }

    #[test]
    fn test_exposed_service_gets_proxy_rule() {
        let c = app();
        let ctx = CompileContext::for_container(&c, None);
        let set = build_general(&c, &ctx);
        assert!(set.deployment.compose.contains("Host(`web.example.com`)"));
    }

    #[test]
    fn test_postgres_uses_provisioned_secret() {
        let mut c = Container::new(
            Uuid::new_v4(),
            "maindb",
            ContainerKind::Database,
            ContainerType::Postgres,
        );
        c.env = Some("SERVICE_PASSWORD=s3cret".to_string());
        let ctx = CompileContext::for_container(&c, None);
        let set = build_postgres(&c, &ctx);
        assert!(set.image.is_none());
        assert!(set.deployment.compose.contains("POSTGRES_PASSWORD: s3cret"));
        assert!(set.deployment.compose.contains("maindb-data:/var/lib/postgresql/data"));
        // databases are not routed through the proxy
        assert!(!set.deployment.compose.contains("traefik.enable"));
    }

    #[test]
    fn test_redis_password_flows_into_command() {
        let mut c = Container::new(
            Uuid::new_v4(),
            "cache",
            ContainerKind::Service,
            ContainerType::Redis,
        );
        c.env = Some("SERVICE_PASSWORD=abc123".to_string());
        let ctx = CompileContext::for_container(&c, None);
        let set = build_redis(&c, &ctx);
        assert!(
            set.deployment
                .compose
                .contains("redis-server --requirepass abc123")
        );
    }

    #[test]
    fn test_user_volumes_rendered() {
        let mut c = app();
        c.volumes.push(VolumeMount {
            name: "uploads".to_string(),
            mount_path: "/app/uploads".to_string(),
        });
        let ctx = CompileContext::for_container(&c, None);
        let set = build_general(&c, &ctx);
        assert!(set.deployment.compose.contains("web-uploads:/app/uploads"));
    }
}
