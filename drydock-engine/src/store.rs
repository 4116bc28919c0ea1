//! Persistence boundary
//!
//! The engine never talks to a database directly; it consumes these narrow
//! contracts. `MemoryStore` is the in-process implementation used for
//! single-node operation and tests; a persistent collaborator can stand in
//! behind the same traits.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use drydock_core::domain::{Build, BuildStatus, Container, ContainerStatus, LogSeverity};
use uuid::Uuid;

use crate::error::{EngineError, Result};

/// Container persistence contract
#[async_trait]
pub trait ContainerStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Container>;
    async fn insert(&self, container: Container) -> Result<()>;
    async fn update(&self, container: &Container) -> Result<()>;
    async fn set_status(&self, id: Uuid, status: ContainerStatus) -> Result<()>;
    async fn list(&self) -> Result<Vec<Container>>;
    async fn find_by_project(&self, project_id: Uuid) -> Result<Vec<Container>>;
    async fn find_by_repository(&self, repository_id: &str) -> Result<Vec<Container>>;
    /// Records a successful deploy: status DEPLOYED plus the deploy timestamp
    async fn touch_deployed(&self, id: Uuid, at: chrono::DateTime<chrono::Utc>) -> Result<()>;
    /// Updates the denormalized back-reference to the newest build
    async fn set_last_build(&self, id: Uuid, build_id: Uuid) -> Result<()>;
}

/// Build persistence contract
#[async_trait]
pub trait BuildStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Build>;
    async fn insert(&self, build: Build) -> Result<()>;
    async fn update(&self, build: &Build) -> Result<()>;
    async fn set_status(&self, id: Uuid, status: BuildStatus) -> Result<()>;
    /// Marks a build RUNNING and stamps `started_at`
    async fn mark_started(&self, id: Uuid, at: chrono::DateTime<chrono::Utc>) -> Result<()>;
    /// Records a terminal status and stamps `finished_at`
    async fn mark_finished(
        &self,
        id: Uuid,
        status: BuildStatus,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<()>;
    async fn find_by_container(&self, container_id: Uuid) -> Result<Vec<Build>>;
    async fn find_by_status(&self, status: BuildStatus) -> Result<Vec<Build>>;
    /// Appends one severity-tagged line under the configured cap
    async fn append_log(&self, id: Uuid, severity: LogSeverity, line: &str) -> Result<()>;
}

/// In-memory store backing both contracts
#[derive(Clone, Default)]
pub struct MemoryStore {
    containers: Arc<Mutex<HashMap<Uuid, Container>>>,
    builds: Arc<Mutex<HashMap<Uuid, Build>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_containers(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, Container>>> {
        self.containers
            .lock()
            .map_err(|e| EngineError::Store(format!("container store poisoned: {}", e)))
    }

    fn lock_builds(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, Build>>> {
        self.builds
            .lock()
            .map_err(|e| EngineError::Store(format!("build store poisoned: {}", e)))
    }
}

#[async_trait]
impl ContainerStore for MemoryStore {
    async fn get(&self, id: Uuid) -> Result<Container> {
        self.lock_containers()?
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("container", id))
    }

    async fn insert(&self, container: Container) -> Result<()> {
        self.lock_containers()?.insert(container.id, container);
        Ok(())
    }

    async fn update(&self, container: &Container) -> Result<()> {
        let mut map = self.lock_containers()?;
        if !map.contains_key(&container.id) {
            return Err(EngineError::not_found("container", container.id));
        }
        map.insert(container.id, container.clone());
        Ok(())
    }

    async fn set_status(&self, id: Uuid, status: ContainerStatus) -> Result<()> {
        let mut map = self.lock_containers()?;
        let container = map
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("container", id))?;
        container.status = status;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Container>> {
        Ok(self.lock_containers()?.values().cloned().collect())
    }

    async fn find_by_project(&self, project_id: Uuid) -> Result<Vec<Container>> {
        Ok(self
            .lock_containers()?
            .values()
            .filter(|c| c.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn find_by_repository(&self, repository_id: &str) -> Result<Vec<Container>> {
        Ok(self
            .lock_containers()?
            .values()
            .filter(|c| c.repository_id.as_deref() == Some(repository_id))
            .cloned()
            .collect())
    }

    async fn touch_deployed(&self, id: Uuid, at: chrono::DateTime<chrono::Utc>) -> Result<()> {
        let mut map = self.lock_containers()?;
        let container = map
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("container", id))?;
        container.status = ContainerStatus::Deployed;
        container.last_deployed_at = Some(at);
        Ok(())
    }

    async fn set_last_build(&self, id: Uuid, build_id: Uuid) -> Result<()> {
        let mut map = self.lock_containers()?;
        let container = map
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("container", id))?;
        container.last_build = Some(build_id);
        Ok(())
    }
}

#[async_trait]
impl BuildStore for MemoryStore {
    async fn get(&self, id: Uuid) -> Result<Build> {
        self.lock_builds()?
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("build", id))
    }

    async fn insert(&self, build: Build) -> Result<()> {
        self.lock_builds()?.insert(build.id, build);
        Ok(())
    }

    async fn update(&self, build: &Build) -> Result<()> {
        let mut map = self.lock_builds()?;
        if !map.contains_key(&build.id) {
            return Err(EngineError::not_found("build", build.id));
        }
        map.insert(build.id, build.clone());
        Ok(())
    }

    async fn set_status(&self, id: Uuid, status: BuildStatus) -> Result<()> {
        let mut map = self.lock_builds()?;
        let build = map
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("build", id))?;
        build.status = status;
        Ok(())
    }

    async fn mark_started(&self, id: Uuid, at: chrono::DateTime<chrono::Utc>) -> Result<()> {
        let mut map = self.lock_builds()?;
        let build = map
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("build", id))?;
        build.status = BuildStatus::Running;
        build.started_at = Some(at);
        Ok(())
    }

    async fn mark_finished(
        &self,
        id: Uuid,
        status: BuildStatus,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        let mut map = self.lock_builds()?;
        let build = map
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("build", id))?;
        build.status = status;
        build.finished_at = Some(at);
        Ok(())
    }

    async fn find_by_container(&self, container_id: Uuid) -> Result<Vec<Build>> {
        let mut builds: Vec<Build> = self
            .lock_builds()?
            .values()
            .filter(|b| b.container_id == container_id)
            .cloned()
            .collect();
        builds.sort_by_key(|b| b.created_at);
        Ok(builds)
    }

    async fn find_by_status(&self, status: BuildStatus) -> Result<Vec<Build>> {
        Ok(self
            .lock_builds()?
            .values()
            .filter(|b| b.status == status)
            .cloned()
            .collect())
    }

    async fn append_log(&self, id: Uuid, severity: LogSeverity, line: &str) -> Result<()> {
        let mut map = self.lock_builds()?;
        let build = map
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("build", id))?;
        build.log.append(severity, line);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drydock_core::domain::{ContainerKind, ContainerType};

    fn sample_container() -> Container {
        Container::new(
            Uuid::new_v4(),
            "api",
            ContainerKind::Application,
            ContainerType::General,
        )
    }

    #[tokio::test]
    async fn test_container_round_trip() {
        let store = MemoryStore::new();
        let container = sample_container();
        let id = container.id;

        ContainerStore::insert(&store, container).await.unwrap();
        let loaded = ContainerStore::get(&store, id).await.unwrap();
        assert_eq!(loaded.name, "api");

        ContainerStore::set_status(&store, id, ContainerStatus::Building)
            .await
            .unwrap();
        let loaded = ContainerStore::get(&store, id).await.unwrap();
        assert_eq!(loaded.status, ContainerStatus::Building);
    }

    #[tokio::test]
    async fn test_missing_container_is_not_found() {
        let store = MemoryStore::new();
        let err = ContainerStore::get(&store, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_find_by_repository() {
        let store = MemoryStore::new();
        let mut a = sample_container();
        a.repository_id = Some("42".to_string());
        let mut b = sample_container();
        b.repository_id = Some("43".to_string());
        ContainerStore::insert(&store, a).await.unwrap();
        ContainerStore::insert(&store, b).await.unwrap();

        let found = store.find_by_repository("42").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].repository_id.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn test_build_log_append_respects_cap() {
        let store = MemoryStore::new();
        let build = Build::new(Uuid::new_v4(), 3);
        let id = build.id;
        BuildStore::insert(&store, build).await.unwrap();

        for i in 0..5 {
            store
                .append_log(id, LogSeverity::Log, &format!("line {}", i))
                .await
                .unwrap();
        }

        let loaded = BuildStore::get(&store, id).await.unwrap();
        assert_eq!(loaded.log.len(), 3);
        assert_eq!(loaded.log.lines()[0], "log: line 2");
    }

    #[tokio::test]
    async fn test_builds_sorted_by_creation() {
        let store = MemoryStore::new();
        let container_id = Uuid::new_v4();
        let first = Build::new(container_id, 10);
        let mut second = Build::new(container_id, 10);
        second.created_at = first.created_at + chrono::Duration::seconds(1);
        let first_id = first.id;
        BuildStore::insert(&store, second).await.unwrap();
        BuildStore::insert(&store, first).await.unwrap();

        let builds = store.find_by_container(container_id).await.unwrap();
        assert_eq!(builds.len(), 2);
        assert_eq!(builds[0].id, first_id);
    }
}
