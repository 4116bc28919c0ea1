//! Extern Deploy API Handler
//!
//! Lets external callers (CI jobs, release scripts) deploy a specific
//! version across a project. Guarded by a static token since it bypasses
//! the operator UI entirely.

use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
};
use drydock_core::domain::{Container, ContainerStatus, DeploymentType};
use drydock_core::dto::ExternDeployRequest;
use serde::Serialize;
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};

const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Serialize)]
pub struct QueuedBuild {
    pub build_id: Uuid,
    pub container_id: Uuid,
    pub container_name: String,
}

#[derive(Debug, Serialize)]
pub struct ExternDeployResponse {
    pub queued: Vec<QueuedBuild>,
}

/// POST /extern/{project_id}/deploy
/// Queue builds at the requested version for every eligible container of
/// the project
pub async fn extern_deploy(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<ExternDeployRequest>,
) -> ApiResult<Json<ExternDeployResponse>> {
    authorize(&state, &headers)?;
    tracing::info!(
        "Extern deploy of {} ({:?}) for project {}",
        req.version,
        req.deployment_type,
        project_id
    );

    let containers = state.containers.find_by_project(project_id).await?;
    if containers.is_empty() {
        return Err(ApiError::NotFound(format!(
            "project {} has no containers",
            project_id
        )));
    }

    let mut queued = Vec::new();
    for container in containers {
        if !eligible(&container, req.deployment_type) {
            continue;
        }
        let build = state
            .lifecycle
            .request_build(&container, Some(req.version.clone()), req.callback_url.clone())
            .await?;
        queued.push(QueuedBuild {
            build_id: build.id,
            container_id: container.id,
            container_name: container.name,
        });
    }
    Ok(Json(ExternDeployResponse { queued }))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    let Some(expected) = state.api_token.as_deref() else {
        return Err(ApiError::Unauthorized(
            "extern deploys are disabled: no API token configured".to_string(),
        ));
    };
    let supplied = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
    if supplied == Some(expected) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized("invalid API key".to_string()))
    }
}

/// Only build-capable containers whose configured ref kind matches the
/// request can deploy a caller-named version
fn eligible(container: &Container, deployment_type: DeploymentType) -> bool {
    container.requires_build()
        && container.deployment_type == deployment_type
        && !matches!(
            container.status,
            ContainerStatus::Draft | ContainerStatus::Stopped | ContainerStatus::StoppedBySystem
        )
}
