//! Periodic sweeps
//!
//! Two repairs run on a shared interval:
//! - a build RUNNING past the configured ceiling is force-failed, unless
//!   it was restarted manually (operators debugging a build keep it alive)
//! - a container stuck BUILDING with no queued or running build left is
//!   reconciled back to DEPLOYED

use std::sync::Arc;
use std::time::Duration;

use drydock_core::domain::{BuildStatus, ContainerStatus, LogSeverity};
use tracing::{info, warn};

use crate::error::Result;
use crate::lifecycle::ContainerLifecycle;
use crate::store::{BuildStore, ContainerStore};

pub struct SweepService {
    builds: Arc<dyn BuildStore>,
    containers: Arc<dyn ContainerStore>,
    lifecycle: Arc<ContainerLifecycle>,
    interval: Duration,
    build_timeout: chrono::Duration,
}

impl SweepService {
    pub fn new(
        builds: Arc<dyn BuildStore>,
        containers: Arc<dyn ContainerStore>,
        lifecycle: Arc<ContainerLifecycle>,
        interval: Duration,
        build_timeout: Duration,
    ) -> Self {
        Self {
            builds,
            containers,
            lifecycle,
            interval,
            build_timeout: chrono::Duration::from_std(build_timeout)
                .unwrap_or_else(|_| chrono::Duration::hours(1)),
        }
    }

    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!("Sweep service started (every {:?})", self.interval);
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep_once().await {
                    warn!("Sweep pass failed: {}", e);
                }
            }
        })
    }

    pub async fn sweep_once(&self) -> Result<()> {
        self.fail_timed_out_builds().await?;
        self.unstick_building_containers().await?;
        Ok(())
    }

    async fn fail_timed_out_builds(&self) -> Result<()> {
        let now = chrono::Utc::now();
        for build in self.builds.find_by_status(BuildStatus::Running).await? {
            if build.restarted {
                continue;
            }
            let Some(started_at) = build.started_at else {
                continue;
            };
            if now - started_at < self.build_timeout {
                continue;
            }
            warn!(
                "Build {} has been running since {}, force-failing",
                build.id, started_at
            );
            self.builds
                .append_log(build.id, LogSeverity::Error, "build timed out")
                .await?;
            self.builds
                .mark_finished(build.id, BuildStatus::Failed, now)
                .await?;
            self.lifecycle.build_outcome(&build, false).await?;
        }
        Ok(())
    }

    async fn unstick_building_containers(&self) -> Result<()> {
        for container in self.containers.list().await? {
            if container.status != ContainerStatus::Building {
                continue;
            }
            let builds = self.builds.find_by_container(container.id).await?;
            let active = builds
                .iter()
                .any(|b| matches!(b.status, BuildStatus::Queue | BuildStatus::Running));
            if active {
                continue;
            }
            info!(
                "Container {} stuck in BUILDING with no active build, reconciling",
                container.name
            );
            self.containers
                .set_status(container.id, ContainerStatus::Deployed)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Rig, app_container, rig};
    use drydock_core::domain::Build;

    fn sweeper(rig: &Rig, timeout: Duration) -> SweepService {
        SweepService::new(
            Arc::new(rig.store.clone()),
            Arc::new(rig.store.clone()),
            rig.lifecycle.clone(),
            Duration::from_secs(60),
            timeout,
        )
    }

    #[tokio::test]
    async fn test_timed_out_build_is_force_failed() {
        let rig = rig();
        let sweeper = sweeper(&rig, Duration::from_secs(3600));
        let mut c = app_container();
        c.status = ContainerStatus::Building;
        ContainerStore::insert(&rig.store, c.clone()).await.unwrap();

        let mut build = Build::new(c.id, 100);
        build.status = BuildStatus::Running;
        build.started_at = Some(chrono::Utc::now() - chrono::Duration::hours(2));
        BuildStore::insert(&rig.store, build.clone()).await.unwrap();

        sweeper.sweep_once().await.unwrap();

        let build = BuildStore::get(&rig.store, build.id).await.unwrap();
        assert_eq!(build.status, BuildStatus::Failed);
        assert!(build.log.lines().iter().any(|l| l.contains("timed out")));
        // its only build failed, so the container aggregates to DIED
        let c = ContainerStore::get(&rig.store, c.id).await.unwrap();
        assert_eq!(c.status, ContainerStatus::Died);
    }

    #[tokio::test]
    async fn test_restarted_build_is_exempt_from_timeout() {
        let rig = rig();
        let sweeper = sweeper(&rig, Duration::from_secs(3600));
        let mut build = Build::new(uuid::Uuid::new_v4(), 100);
        build.status = BuildStatus::Running;
        build.restarted = true;
        build.started_at = Some(chrono::Utc::now() - chrono::Duration::hours(5));
        BuildStore::insert(&rig.store, build.clone()).await.unwrap();

        sweeper.sweep_once().await.unwrap();
        let build = BuildStore::get(&rig.store, build.id).await.unwrap();
        assert_eq!(build.status, BuildStatus::Running);
    }

    #[tokio::test]
    async fn test_running_build_within_ceiling_is_untouched() {
        let rig = rig();
        let sweeper = sweeper(&rig, Duration::from_secs(3600));
        let mut build = Build::new(uuid::Uuid::new_v4(), 100);
        build.status = BuildStatus::Running;
        build.started_at = Some(chrono::Utc::now() - chrono::Duration::minutes(5));
        BuildStore::insert(&rig.store, build.clone()).await.unwrap();

        sweeper.sweep_once().await.unwrap();
        let build = BuildStore::get(&rig.store, build.id).await.unwrap();
        assert_eq!(build.status, BuildStatus::Running);
    }

    #[tokio::test]
    async fn test_stuck_building_container_is_reconciled() {
        let rig = rig();
        let sweeper = sweeper(&rig, Duration::from_secs(3600));
        let mut stuck = app_container();
        stuck.status = ContainerStatus::Building;
        let mut active = app_container();
        active.status = ContainerStatus::Building;
        ContainerStore::insert(&rig.store, stuck.clone()).await.unwrap();
        ContainerStore::insert(&rig.store, active.clone()).await.unwrap();

        // the second container still has a queued build
        let queued = Build::new(active.id, 100);
        BuildStore::insert(&rig.store, queued).await.unwrap();

        sweeper.sweep_once().await.unwrap();

        assert_eq!(
            ContainerStore::get(&rig.store, stuck.id).await.unwrap().status,
            ContainerStatus::Deployed
        );
        assert_eq!(
            ContainerStore::get(&rig.store, active.id).await.unwrap().status,
            ContainerStatus::Building
        );
    }
}
