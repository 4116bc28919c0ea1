//! Status callbacks
//!
//! Optional HTTP POST to a caller-supplied URL at QUEUE / RUNNING / SUCCESS
//! / FAILED transitions. Delivery is best-effort: errors are logged and
//! swallowed, never retried, and never affect build state.

use drydock_core::domain::{Build, BuildStatus, Container};
use drydock_core::dto::CallbackPayload;
use tracing::{debug, warn};

/// Best-effort callback sender
#[derive(Debug, Clone, Default)]
pub struct CallbackClient {
    http: reqwest::Client,
}

impl CallbackClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Posts a status transition to the callback URL, when one is set
    pub async fn notify(
        &self,
        url: Option<&str>,
        build: &Build,
        container: &Container,
        status: BuildStatus,
    ) {
        let Some(url) = url else {
            return;
        };
        let payload = CallbackPayload {
            build_id: build.id,
            container_id: container.id,
            container_name: container.name.clone(),
            status,
            timestamp: chrono::Utc::now(),
        };
        match self.http.post(url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Callback delivered to {} ({:?})", url, status);
            }
            Ok(response) => {
                warn!(
                    "Callback to {} answered {} for build {}",
                    url,
                    response.status(),
                    build.id
                );
            }
            Err(e) => {
                warn!("Callback to {} failed for build {}: {}", url, build.id, e);
            }
        }
    }
}
