//! Manual-deploy request and status-callback payloads

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{BuildStatus, DeploymentType};

/// Body of `POST /extern/{project_id}/deploy`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternDeployRequest {
    /// Which ref kind the requested version names
    pub deployment_type: DeploymentType,
    /// Branch name or tag to deploy
    pub version: String,
    /// Optional URL to POST build status transitions to
    #[serde(default)]
    pub callback_url: Option<String>,
}

/// Best-effort status notification POSTed to a caller-supplied URL at
/// QUEUE / RUNNING / SUCCESS / FAILED transitions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub build_id: Uuid,
    pub container_id: Uuid,
    pub container_name: String,
    pub status: BuildStatus,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}
