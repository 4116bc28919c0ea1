//! VCS webhook payloads
//!
//! Providers disagree on details, so deserialization is deliberately
//! tolerant: every field is optional and unknown event kinds classify as
//! `Ignored` rather than failing the request.

use serde::{Deserialize, Serialize};

/// Repository ids arrive as numbers from some providers and strings from
/// others; both normalize to a string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RepoId {
    Int(i64),
    Str(String),
}

impl std::fmt::Display for RepoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepoId::Int(n) => write!(f, "{}", n),
            RepoId::Str(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub id: RepoId,
    #[serde(default)]
    pub full_name: Option<String>,
}

/// One commit from a push payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushCommit {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub added: Vec<String>,
    #[serde(default)]
    pub modified: Vec<String>,
    #[serde(default)]
    pub removed: Vec<String>,
}

impl PushCommit {
    /// All paths touched by this commit
    pub fn touched_paths(&self) -> impl Iterator<Item = &str> {
        self.added
            .iter()
            .chain(self.modified.iter())
            .chain(self.removed.iter())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseRef {
    pub tag_name: String,
}

/// Raw provider payload as received on the webhook endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Event-kind discriminator ("push", "release", "tag_push", ...)
    #[serde(default, alias = "event")]
    pub object_kind: Option<String>,
    #[serde(default, rename = "ref")]
    pub git_ref: Option<String>,
    #[serde(default)]
    pub repository: Option<RepositoryRef>,
    #[serde(default)]
    pub commits: Vec<PushCommit>,
    #[serde(default)]
    pub release: Option<ReleaseRef>,
    #[serde(default)]
    pub action: Option<String>,
}

/// Classified webhook event consumed by the trigger resolver
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    Push {
        repository_id: String,
        branch: String,
        commits: Vec<PushCommit>,
    },
    Release {
        repository_id: String,
        tag: String,
    },
    /// Anything we do not trigger builds for
    Ignored,
}

impl WebhookPayload {
    /// Classifies the raw payload into a push, a release/tag-create, or
    /// an ignored event
    pub fn classify(self) -> WebhookEvent {
        let repository_id = match &self.repository {
            Some(repo) => repo.id.to_string(),
            None => return WebhookEvent::Ignored,
        };

        match self.object_kind.as_deref() {
            Some("push") => {
                let Some(branch) = self.git_ref.as_deref().map(strip_branch_ref) else {
                    return WebhookEvent::Ignored;
                };
                WebhookEvent::Push {
                    repository_id,
                    branch: branch.to_string(),
                    commits: self.commits,
                }
            }
            Some("release") => {
                // only tag creation deploys; edits and deletions are ignored
                if !matches!(self.action.as_deref(), None | Some("published" | "created")) {
                    return WebhookEvent::Ignored;
                }
                match self.release {
                    Some(release) => WebhookEvent::Release {
                        repository_id,
                        tag: release.tag_name,
                    },
                    None => WebhookEvent::Ignored,
                }
            }
            Some("tag_push") => match self.git_ref.as_deref().map(strip_tag_ref) {
                Some(tag) => WebhookEvent::Release {
                    repository_id,
                    tag: tag.to_string(),
                },
                None => WebhookEvent::Ignored,
            },
            _ => WebhookEvent::Ignored,
        }
    }
}

fn strip_branch_ref(git_ref: &str) -> &str {
    git_ref.strip_prefix("refs/heads/").unwrap_or(git_ref)
}

fn strip_tag_ref(git_ref: &str) -> &str {
    git_ref.strip_prefix("refs/tags/").unwrap_or(git_ref)
}
