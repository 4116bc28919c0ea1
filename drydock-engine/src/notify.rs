//! Notification boundary
//!
//! Push-notification delivery lives outside the engine; this trait is the
//! narrow contract it is consumed through. The default implementation just
//! logs.

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

/// Engine events worth telling an operator about
#[derive(Debug, Clone)]
pub enum NotifyEvent {
    BuildSucceeded {
        container_name: String,
        build_id: Uuid,
    },
    BuildFailed {
        container_name: String,
        build_id: Uuid,
        reason: String,
    },
    ContainerDied {
        container_name: String,
    },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: NotifyEvent);
}

/// Default notifier that emits tracing events
#[derive(Debug, Default, Clone)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, event: NotifyEvent) {
        match event {
            NotifyEvent::BuildSucceeded {
                container_name,
                build_id,
            } => info!("Build {} for {} succeeded", build_id, container_name),
            NotifyEvent::BuildFailed {
                container_name,
                build_id,
                reason,
            } => warn!(
                "Build {} for {} failed: {}",
                build_id, container_name, reason
            ),
            NotifyEvent::ContainerDied { container_name } => {
                warn!("Container {} died: all builds failed", container_name)
            }
        }
    }
}
