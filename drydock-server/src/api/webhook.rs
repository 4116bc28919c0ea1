//! Webhook API Handler
//!
//! Single intake endpoint for VCS provider events. Providers treat
//! non-2xx answers as delivery failures and retry aggressively, so this
//! endpoint always acknowledges; resolution problems are logged instead.

use axum::{Json, extract::State};
use drydock_core::dto::WebhookPayload;

use crate::api::AppState;

/// POST /webhook
/// Receive a provider event and queue builds for matching containers
pub async fn receive_webhook(
    State(state): State<AppState>,
    Json(payload): Json<WebhookPayload>,
) -> Json<bool> {
    match state.resolver.resolve(payload).await {
        Ok(builds) if !builds.is_empty() => {
            tracing::info!("Webhook queued {} build(s)", builds.len());
        }
        Ok(_) => {
            tracing::debug!("Webhook matched no containers");
        }
        Err(e) => {
            tracing::error!("Webhook resolution failed: {}", e);
        }
    }
    Json(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::deploy::tests::test_state;
    use drydock_core::domain::{ContainerStatus, DeploymentType};
    use drydock_engine::store::ContainerStore;

    #[tokio::test]
    async fn test_webhook_acknowledges_and_queues() {
        let (state, store) = test_state();
        let mut c = crate::api::deploy::tests::app_container();
        c.deployment_type = DeploymentType::Branch;
        c.branch = Some("main".to_string());
        c.status = ContainerStatus::Deployed;
        ContainerStore::insert(&store, c.clone()).await.unwrap();

        let payload: WebhookPayload = serde_json::from_value(serde_json::json!({
            "object_kind": "push",
            "ref": "refs/heads/main",
            "repository": { "id": 42 },
            "commits": [{ "message": "fix" }]
        }))
        .unwrap();

        let Json(ack) = receive_webhook(State(state), Json(payload)).await;
        assert!(ack);
        let loaded = ContainerStore::get(&store, c.id).await.unwrap();
        assert_eq!(loaded.status, ContainerStatus::Building);
    }

    #[tokio::test]
    async fn test_webhook_acknowledges_unknown_events() {
        let (state, _store) = test_state();
        let payload: WebhookPayload = serde_json::from_value(serde_json::json!({
            "object_kind": "issue_comment",
            "repository": { "id": 42 }
        }))
        .unwrap();
        let Json(ack) = receive_webhook(State(state), Json(payload)).await;
        assert!(ack);
    }
}
