//! Per-container workspace directories
//!
//! Each container owns an exclusive directory under the data dir:
//!
//! ```text
//! {data_dir}/{container_id}/source            cloned repository
//! {data_dir}/{container_id}/refs/{ref}/       compiled artifacts per ref
//!     compose.yaml  Dockerfile  .env  config.json
//! ```
//!
//! Artifacts are written before each build/deploy and removed on stop;
//! tag-based containers additionally drop stale ref directories after a
//! successful deploy.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::artifact::builders::ENV_FILE_NAME;
use crate::artifact::{ArtifactSet, DockerfileSource};
use crate::error::Result;

/// Filesystem artifacts written for one (container, ref) pair
#[derive(Debug, Clone)]
pub struct WrittenArtifacts {
    pub compose_file: PathBuf,
    /// Present when the image plan carried generated Dockerfile content
    pub dockerfile: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    pub credential_file: Option<PathBuf>,
}

/// Manages per-container workspace directories under a single root
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn container_dir(&self, container_id: Uuid) -> PathBuf {
        self.root.join(container_id.to_string())
    }

    /// Clone destination for the container's source
    pub fn source_dir(&self, container_id: Uuid) -> PathBuf {
        self.container_dir(container_id).join("source")
    }

    /// Directory holding compiled artifacts for one ref
    pub fn ref_dir(&self, container_id: Uuid, ref_name: &str) -> PathBuf {
        self.container_dir(container_id)
            .join("refs")
            .join(sanitize_ref(ref_name))
    }

    /// Removes and recreates the source directory for a fresh clone
    pub async fn recreate_source(&self, container_id: Uuid) -> Result<PathBuf> {
        let dir = self.source_dir(container_id);
        if fs::metadata(&dir).await.is_ok() {
            fs::remove_dir_all(&dir).await?;
        }
        // the clone itself creates the leaf; only the parent must exist
        if let Some(parent) = dir.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(dir)
    }

    /// Writes compiled artifacts plus env/credential files for one ref
    pub async fn write_artifacts(
        &self,
        container_id: Uuid,
        ref_name: &str,
        set: &ArtifactSet,
        env: Option<&str>,
        registry_credentials: Option<&str>,
    ) -> Result<WrittenArtifacts> {
        let dir = self.ref_dir(container_id, ref_name);
        fs::create_dir_all(&dir).await?;

        let compose_file = dir.join("compose.yaml");
        fs::write(&compose_file, &set.deployment.compose).await?;

        let dockerfile = match set.image.as_ref().map(|p| &p.dockerfile) {
            Some(DockerfileSource::Generated(content)) => {
                let path = dir.join("Dockerfile");
                fs::write(&path, content).await?;
                Some(path)
            }
            _ => None,
        };

        let env_file = match env {
            Some(env) => {
                let path = dir.join(ENV_FILE_NAME);
                fs::write(&path, env).await?;
                Some(path)
            }
            None => None,
        };

        let credential_file = match registry_credentials {
            Some(credentials) => {
                let path = dir.join("config.json");
                fs::write(&path, credentials).await?;
                Some(path)
            }
            None => None,
        };

        debug!("Wrote artifacts for {} under {}", container_id, dir.display());
        Ok(WrittenArtifacts {
            compose_file,
            dockerfile,
            env_file,
            credential_file,
        })
    }

    /// Drops artifact directories for every ref except `keep`
    pub async fn clean_stale_refs(&self, container_id: Uuid, keep: &str) -> Result<()> {
        let refs = self.container_dir(container_id).join("refs");
        let keep = sanitize_ref(keep);
        let Ok(mut entries) = fs::read_dir(&refs).await else {
            return Ok(());
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy() != keep.as_str() {
                debug!("Removing stale ref artifacts {:?}", entry.path());
                let _ = fs::remove_dir_all(entry.path()).await;
            }
        }
        Ok(())
    }

    /// Removes the whole workspace (called on container stop)
    pub async fn remove(&self, container_id: Uuid) -> Result<()> {
        let dir = self.container_dir(container_id);
        if fs::metadata(&dir).await.is_ok() {
            fs::remove_dir_all(&dir).await?;
        }
        Ok(())
    }
}

/// Refs can contain path separators (release/v1); keep them out of paths
fn sanitize_ref(ref_name: &str) -> String {
    ref_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Dockerfile path and build context for an image plan
pub fn build_inputs(
    source_dir: &Path,
    base_dir: &str,
    written: &WrittenArtifacts,
    plan_dockerfile: &DockerfileSource,
) -> (PathBuf, PathBuf) {
    let context = context_dir(source_dir, base_dir);
    let dockerfile = match plan_dockerfile {
        DockerfileSource::Generated(_) => written
            .dockerfile
            .clone()
            .unwrap_or_else(|| context.join("Dockerfile")),
        DockerfileSource::FromRepo(rel) => context.join(rel),
    };
    (dockerfile, context)
}

/// Build context: the source dir, narrowed to the base dir when set
pub fn context_dir(source_dir: &Path, base_dir: &str) -> PathBuf {
    let trimmed = base_dir.trim_matches('/');
    if trimmed.is_empty() {
        source_dir.to_path_buf()
    } else {
        source_dir.join(trimmed)
    }
}
