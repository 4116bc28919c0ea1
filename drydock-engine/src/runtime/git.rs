//! Source fetching
//!
//! Clones the repository at the resolved ref into the build workspace.
//! Kept behind a trait so the pipeline can run against a fake fetcher in
//! tests.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;

use super::{CommandStream, spawn_streaming};
use crate::error::Result;

/// What to clone and where
#[derive(Debug, Clone)]
pub struct CloneSpec {
    /// Full clone URL (credentials already embedded by the caller)
    pub repo_url: String,
    /// Branch or tag to check out
    pub git_ref: String,
    pub dest: PathBuf,
}

/// Fetches source code for a build
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, spec: &CloneSpec) -> Result<CommandStream>;
}

/// git-CLI fetcher
#[derive(Debug, Default, Clone)]
pub struct GitFetcher;

impl GitFetcher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SourceFetcher for GitFetcher {
    async fn fetch(&self, spec: &CloneSpec) -> Result<CommandStream> {
        let mut command = Command::new("git");
        command
            .arg("clone")
            .arg("--depth")
            .arg("1")
            .arg("--branch")
            .arg(&spec.git_ref)
            .arg("--single-branch")
            .arg(&spec.repo_url)
            .arg(&spec.dest);
        spawn_streaming(command, format!("git clone {}", spec.git_ref))
    }
}
