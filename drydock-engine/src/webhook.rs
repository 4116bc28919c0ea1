//! Webhook trigger resolver
//!
//! Turns a classified VCS event into zero or more queued builds. Resolution
//! is deliberately forgiving: unknown events, unmatched refs, and invalid
//! tag patterns are all no-ops, never errors. Only candidate selection
//! lives here; queueing and state transitions go through the lifecycle.

use std::sync::Arc;

use drydock_core::domain::{Build, Container, ContainerStatus, DeploymentType, TagMatchType};
use drydock_core::dto::{PushCommit, WebhookEvent, WebhookPayload};
use regex::Regex;
use tracing::{debug, info};

use crate::error::Result;
use crate::lifecycle::ContainerLifecycle;
use crate::store::ContainerStore;

/// Resolves webhook payloads into build submissions
pub struct WebhookResolver {
    containers: Arc<dyn ContainerStore>,
    lifecycle: Arc<ContainerLifecycle>,
    /// Push events with at least this many commits always trigger,
    /// skipping the per-directory diff check (diffing large pushes is
    /// unreliable)
    commit_threshold: usize,
    /// Commit-message marker that suppresses the whole push event
    skip_marker: String,
}

impl WebhookResolver {
    pub fn new(
        containers: Arc<dyn ContainerStore>,
        lifecycle: Arc<ContainerLifecycle>,
        commit_threshold: usize,
        skip_marker: impl Into<String>,
    ) -> Self {
        Self {
            containers,
            lifecycle,
            commit_threshold,
            skip_marker: skip_marker.into(),
        }
    }

    /// Resolves one payload; returns the builds that were queued
    pub async fn resolve(&self, payload: WebhookPayload) -> Result<Vec<Build>> {
        match payload.classify() {
            WebhookEvent::Push {
                repository_id,
                branch,
                commits,
            } => self.resolve_push(&repository_id, &branch, &commits).await,
            WebhookEvent::Release { repository_id, tag } => {
                self.resolve_release(&repository_id, &tag).await
            }
            WebhookEvent::Ignored => Ok(Vec::new()),
        }
    }

    async fn resolve_push(
        &self,
        repository_id: &str,
        branch: &str,
        commits: &[PushCommit],
    ) -> Result<Vec<Build>> {
        if commits.iter().any(|c| c.message.contains(&self.skip_marker)) {
            info!(
                "Push to {} on {} carries {:?}, skipping all builds",
                repository_id, branch, self.skip_marker
            );
            return Ok(Vec::new());
        }

        let mut queued = Vec::new();
        for container in self.containers.find_by_repository(repository_id).await? {
            if container.deployment_type != DeploymentType::Branch
                || container.branch.as_deref() != Some(branch)
            {
                continue;
            }
            if !self.eligible(&container) {
                continue;
            }
            if commits.len() < self.commit_threshold
                && container.has_sub_dir()
                && !touches_base_dir(commits, &container.base_dir)
            {
                debug!(
                    "No commit touched {} for {}, skipping build",
                    container.base_dir, container.name
                );
                continue;
            }
            let build = self
                .lifecycle
                .request_build(&container, Some(branch.to_string()), None)
                .await?;
            queued.push(build);
        }
        Ok(queued)
    }

    async fn resolve_release(&self, repository_id: &str, tag: &str) -> Result<Vec<Build>> {
        let mut queued = Vec::new();
        for container in self.containers.find_by_repository(repository_id).await? {
            if container.deployment_type != DeploymentType::Tag {
                continue;
            }
            let matched = match container.tag_match_type {
                // unset defaults to exact for containers predating patterns
                None | Some(TagMatchType::Exact) => container.tag.as_deref() == Some(tag),
                Some(TagMatchType::Pattern) => container
                    .tag_pattern
                    .as_deref()
                    .is_some_and(|pattern| tag_matches(pattern, tag)),
            };
            if !matched || !self.eligible(&container) {
                continue;
            }
            let build = self
                .lifecycle
                .request_build(&container, Some(tag.to_string()), None)
                .await?;
            queued.push(build);
        }
        Ok(queued)
    }

    fn eligible(&self, container: &Container) -> bool {
        container.auto_deploy
            && !matches!(
                container.status,
                ContainerStatus::Stopped
                    | ContainerStatus::Draft
                    | ContainerStatus::StoppedBySystem
            )
    }
}

/// Whether any commit touched a path at or under the base dir
fn touches_base_dir(commits: &[PushCommit], base_dir: &str) -> bool {
    let base = base_dir.trim_matches('/');
    commits.iter().any(|commit| {
        commit.touched_paths().any(|path| {
            let path = path.trim_start_matches('/');
            path == base || path.starts_with(&format!("{}/", base))
        })
    })
}

/// Whether a tag matches a glob pattern; invalid patterns never match
pub fn tag_matches(pattern: &str, tag: &str) -> bool {
    Regex::new(&glob_to_regex(pattern))
        .map(|re| re.is_match(tag))
        .unwrap_or(false)
}

/// Converts a tag glob to an anchored regex
///
/// `*` becomes `.*` and `?` becomes `.`; `[`, `]`, `+`, a trailing `$`,
/// and backslash escape pairs pass through as regex syntax; every other
/// metacharacter is escaped. The result is anchored with `^`, and with a
/// trailing `$` unless the pattern supplied one or the conversion ends
/// open-ended on `.*`.
pub fn glob_to_regex(pattern: &str) -> String {
    let mut regex = String::with_capacity(pattern.len() + 4);
    regex.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                regex.push('\\');
                if let Some(next) = chars.next() {
                    regex.push(next);
                }
            }
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            '[' | ']' | '+' => regex.push(c),
            '$' if chars.peek().is_none() => regex.push('$'),
            '.' | '(' | ')' | '{' | '}' | '^' | '|' | '$' => {
                regex.push('\\');
                regex.push(c);
            }
            c => regex.push(c),
        }
    }
    if !regex.ends_with('$') && !regex.ends_with(".*") {
        regex.push('$');
    }
    regex
}
