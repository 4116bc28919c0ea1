//! Event reconciler
//!
//! Consumes the runtime's lifecycle event stream and folds externally
//! observed starts back into container status. Events without a known
//! deployment label are ignored. At most one reconciliation per deployment
//! id runs at a time; duplicate events arriving while one is in flight are
//! dropped, and the guard is released only once the attempt completes.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::lifecycle::ContainerLifecycle;
use crate::runtime::{RuntimeAdapter, RuntimeEvent, RuntimeEventKind};

pub struct EventReconciler {
    runtime: Arc<dyn RuntimeAdapter>,
    lifecycle: Arc<ContainerLifecycle>,
    in_flight: Mutex<HashSet<Uuid>>,
}

impl EventReconciler {
    pub fn new(runtime: Arc<dyn RuntimeAdapter>, lifecycle: Arc<ContainerLifecycle>) -> Self {
        Self {
            runtime,
            lifecycle,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Subscribes to the runtime event stream and dispatches forever,
    /// resubscribing if the stream drops
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!("Event reconciler started");
            loop {
                let mut events = match self.runtime.events().await {
                    Ok(events) => events,
                    Err(e) => {
                        warn!("Could not subscribe to runtime events: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                };
                while let Some(event) = events.recv().await {
                    let reconciler = Arc::clone(&self);
                    tokio::spawn(async move { reconciler.handle(event).await });
                }
                warn!("Runtime event stream closed, resubscribing");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        })
    }

    /// Applies one event; safe to call concurrently
    pub async fn handle(&self, event: RuntimeEvent) {
        if event.kind != RuntimeEventKind::Start {
            return;
        }
        let Some(deployment_id) = event.deployment_id else {
            return;
        };
        if !self.in_flight.lock().unwrap().insert(deployment_id) {
            debug!(
                "Reconciliation for {} already in flight, dropping event",
                deployment_id
            );
            return;
        }
        let result = self.lifecycle.reconcile_external_start(deployment_id).await;
        self.in_flight.lock().unwrap().remove(&deployment_id);
        if let Err(e) = result {
            warn!("Reconciliation for {} failed: {}", deployment_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ContainerStore;
    use crate::testing::{app_container, rig};
    use drydock_core::domain::ContainerStatus;

    fn start_event(deployment_id: Option<Uuid>) -> RuntimeEvent {
        RuntimeEvent {
            kind: RuntimeEventKind::Start,
            deployment_id,
            build_id: None,
        }
    }

    #[tokio::test]
    async fn test_start_event_reconciles_to_deployed() {
        let rig = rig();
        let reconciler = EventReconciler::new(rig.runtime.clone(), rig.lifecycle.clone());
        let mut c = app_container();
        c.status = ContainerStatus::Died;
        ContainerStore::insert(&rig.store, c.clone()).await.unwrap();

        reconciler.handle(start_event(Some(c.id))).await;

        let loaded = ContainerStore::get(&rig.store, c.id).await.unwrap();
        assert_eq!(loaded.status, ContainerStatus::Deployed);
    }

    #[tokio::test]
    async fn test_stop_and_unlabelled_events_are_ignored() {
        let rig = rig();
        let reconciler = EventReconciler::new(rig.runtime.clone(), rig.lifecycle.clone());
        let mut c = app_container();
        c.status = ContainerStatus::Died;
        ContainerStore::insert(&rig.store, c.clone()).await.unwrap();

        reconciler
            .handle(RuntimeEvent {
                kind: RuntimeEventKind::Stop,
                deployment_id: Some(c.id),
                build_id: None,
            })
            .await;
        reconciler.handle(start_event(None)).await;

        let loaded = ContainerStore::get(&rig.store, c.id).await.unwrap();
        assert_eq!(loaded.status, ContainerStatus::Died);
    }

    #[tokio::test]
    async fn test_in_flight_guard_drops_duplicate_events() {
        let rig = rig();
        let reconciler = EventReconciler::new(rig.runtime.clone(), rig.lifecycle.clone());
        let mut c = app_container();
        c.status = ContainerStatus::Died;
        ContainerStore::insert(&rig.store, c.clone()).await.unwrap();

        // simulate a reconciliation for this id still in flight
        reconciler.in_flight.lock().unwrap().insert(c.id);
        reconciler.handle(start_event(Some(c.id))).await;
        let loaded = ContainerStore::get(&rig.store, c.id).await.unwrap();
        assert_eq!(loaded.status, ContainerStatus::Died);

        // guard released: the next event goes through
        reconciler.in_flight.lock().unwrap().remove(&c.id);
        reconciler.handle(start_event(Some(c.id))).await;
        let loaded = ContainerStore::get(&rig.store, c.id).await.unwrap();
        assert_eq!(loaded.status, ContainerStatus::Deployed);
    }

    #[tokio::test]
    async fn test_guard_is_released_after_handling() {
        let rig = rig();
        let reconciler = EventReconciler::new(rig.runtime.clone(), rig.lifecycle.clone());
        let mut c = app_container();
        c.status = ContainerStatus::Died;
        ContainerStore::insert(&rig.store, c.clone()).await.unwrap();

        reconciler.handle(start_event(Some(c.id))).await;
        assert!(reconciler.in_flight.lock().unwrap().is_empty());
    }
}
