//! Build queue
//!
//! FIFO queue drained by a fixed number of worker tasks. Submitting a new
//! build for a container supersedes any build for the same container that is
//! still queued (the older one is marked SKIPPED and dropped). The queue can
//! be paused globally without losing jobs, and retries transient
//! infrastructure failures up to a configured attempt count; business
//! failures raised by the pipeline are terminal.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use drydock_core::domain::{Build, BuildStatus, Container, LogSeverity};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::callback::CallbackClient;
use crate::error::Result;
use crate::pipeline::BuildPipeline;
use crate::store::{BuildStore, ContainerStore};

/// One queued pipeline execution
#[derive(Debug, Clone)]
pub struct BuildJob {
    pub build_id: Uuid,
    pub container_id: Uuid,
    /// Ref resolved by the trigger (branch/tag from the event or a manual
    /// version); falls back to the container's configured ref when absent
    pub ref_override: Option<String>,
    pub callback_url: Option<String>,
    pub attempts: u32,
}

/// FIFO build queue with bounded worker concurrency
pub struct BuildQueue {
    jobs: Mutex<VecDeque<BuildJob>>,
    job_ready: Notify,
    paused: Mutex<bool>,
    resumed: Notify,
    worker_concurrency: usize,
    retry_attempts: u32,
    log_cap: usize,
    builds: Arc<dyn BuildStore>,
    containers: Arc<dyn ContainerStore>,
    callbacks: CallbackClient,
}

impl BuildQueue {
    pub fn new(
        builds: Arc<dyn BuildStore>,
        containers: Arc<dyn ContainerStore>,
        worker_concurrency: usize,
        retry_attempts: u32,
        log_cap: usize,
    ) -> Self {
        Self {
            jobs: Mutex::new(VecDeque::new()),
            job_ready: Notify::new(),
            paused: Mutex::new(false),
            resumed: Notify::new(),
            worker_concurrency,
            retry_attempts,
            log_cap,
            builds,
            containers,
            callbacks: CallbackClient::new(),
        }
    }

    /// Creates a fresh QUEUE build for the container and enqueues it,
    /// superseding any still-queued build for the same container.
    ///
    /// Only QUEUE builds are superseded; a build already RUNNING for this
    /// container is left alone, so a new job can queue up behind it.
    pub async fn enqueue_build(
        &self,
        container: &Container,
        ref_override: Option<String>,
        callback_url: Option<String>,
    ) -> Result<Build> {
        self.supersede_queued(container.id).await?;

        let build = Build::new(container.id, self.log_cap);
        self.builds.insert(build.clone()).await?;
        self.containers.set_last_build(container.id, build.id).await?;

        self.push(BuildJob {
            build_id: build.id,
            container_id: container.id,
            ref_override,
            callback_url: callback_url.clone(),
            attempts: 0,
        });
        info!("Build {} queued for container {}", build.id, container.name);

        self.callbacks
            .notify(callback_url.as_deref(), &build, container, BuildStatus::Queue)
            .await;
        Ok(build)
    }

    /// Re-enqueues an existing build (restart path); the build record is
    /// expected to already be back in QUEUE
    pub async fn resubmit(&self, build: &Build) -> Result<()> {
        self.supersede_queued(build.container_id).await?;
        self.push(BuildJob {
            build_id: build.id,
            container_id: build.container_id,
            ref_override: None,
            callback_url: None,
            attempts: 0,
        });
        info!("Build {} re-queued", build.id);
        Ok(())
    }

    /// Removes a still-queued job; returns whether anything was removed.
    /// Running jobs are cancelled cooperatively through the build status
    /// instead.
    pub fn cancel(&self, build_id: Uuid) -> bool {
        let mut jobs = self.jobs.lock().unwrap();
        let before = jobs.len();
        jobs.retain(|job| job.build_id != build_id);
        before != jobs.len()
    }

    /// Halts all workers without dropping queued jobs
    pub fn pause(&self) {
        *self.paused.lock().unwrap() = true;
        info!("Build queue paused");
    }

    pub fn resume(&self) {
        *self.paused.lock().unwrap() = false;
        self.resumed.notify_waiters();
        info!("Build queue resumed");
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.lock().unwrap()
    }

    /// Number of jobs currently waiting
    pub fn depth(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    /// Queued build ids for a container (used by stop/cancel flows)
    pub fn queued_for_container(&self, container_id: Uuid) -> Vec<Uuid> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|job| job.container_id == container_id)
            .map(|job| job.build_id)
            .collect()
    }

    /// Spawns the worker pool; each worker runs one pipeline to completion
    /// before taking the next job, preserving FIFO start order
    pub fn spawn_workers(
        self: &Arc<Self>,
        pipeline: Arc<BuildPipeline>,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        (0..self.worker_concurrency)
            .map(|index| {
                let queue = Arc::clone(self);
                let pipeline = Arc::clone(&pipeline);
                tokio::spawn(async move {
                    debug!("Build worker {} started", index);
                    queue.worker_loop(pipeline).await;
                })
            })
            .collect()
    }

    async fn worker_loop(&self, pipeline: Arc<BuildPipeline>) {
        loop {
            let mut job = self.next_job().await;
            loop {
                match pipeline.run(&job).await {
                    Ok(()) => break,
                    Err(e) if e.is_transient() && job.attempts < self.retry_attempts => {
                        job.attempts += 1;
                        warn!(
                            "Build {} hit a transient failure (attempt {}/{}): {}",
                            job.build_id, job.attempts, self.retry_attempts, e
                        );
                    }
                    Err(e) => {
                        error!(
                            "Build {} failed at the queue level after {} attempt(s): {}",
                            job.build_id, job.attempts + 1, e
                        );
                        pipeline.force_fail(&job, &e.to_string()).await;
                        break;
                    }
                }
            }
        }
    }

    fn push(&self, job: BuildJob) {
        self.jobs.lock().unwrap().push_back(job);
        self.job_ready.notify_one();
    }

    async fn next_job(&self) -> BuildJob {
        loop {
            self.wait_while_paused().await;
            let notified = self.job_ready.notified();
            if let Some(job) = self.jobs.lock().unwrap().pop_front() {
                return job;
            }
            notified.await;
        }
    }

    async fn wait_while_paused(&self) {
        loop {
            let resumed = self.resumed.notified();
            if !self.is_paused() {
                return;
            }
            resumed.await;
        }
    }

    /// Marks still-queued builds for this container SKIPPED and drops them
    async fn supersede_queued(&self, container_id: Uuid) -> Result<()> {
        let superseded: Vec<Uuid> = {
            let mut jobs = self.jobs.lock().unwrap();
            let ids = jobs
                .iter()
                .filter(|job| job.container_id == container_id)
                .map(|job| job.build_id)
                .collect();
            jobs.retain(|job| job.container_id != container_id);
            ids
        };
        for build_id in superseded {
            debug!("Build {} superseded by a newer build", build_id);
            self.builds
                .append_log(build_id, LogSeverity::Log, "superseded by a newer build")
                .await?;
            self.builds.set_status(build_id, BuildStatus::Skipped).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use drydock_core::domain::{ContainerKind, ContainerType};

    fn queue_with_store() -> (Arc<BuildQueue>, MemoryStore) {
        let store = MemoryStore::new();
        let queue = Arc::new(BuildQueue::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            1,
            3,
            100,
        ));
        (queue, store)
    }

    async fn container(store: &MemoryStore) -> Container {
        let c = Container::new(
            Uuid::new_v4(),
            "api",
            ContainerKind::Application,
            ContainerType::General,
        );
        ContainerStore::insert(store, c.clone()).await.unwrap();
        c
    }

    #[tokio::test]
    async fn test_newest_supersedes_queued() {
        let (queue, store) = queue_with_store();
        let c = container(&store).await;

        let a = queue.enqueue_build(&c, None, None).await.unwrap();
        let b = queue.enqueue_build(&c, None, None).await.unwrap();

        let a = BuildStore::get(&store, a.id).await.unwrap();
        let b = BuildStore::get(&store, b.id).await.unwrap();
        assert_eq!(a.status, BuildStatus::Skipped);
        assert_eq!(b.status, BuildStatus::Queue);
        assert_eq!(queue.depth(), 1);
    }

    #[tokio::test]
    async fn test_at_most_one_queued_build_per_container() {
        let (queue, store) = queue_with_store();
        let c = container(&store).await;

        for _ in 0..4 {
            queue.enqueue_build(&c, None, None).await.unwrap();
        }

        let queued = store
            .find_by_status(BuildStatus::Queue)
            .await
            .unwrap()
            .into_iter()
            .filter(|b| b.container_id == c.id)
            .count();
        assert_eq!(queued, 1);
        assert_eq!(queue.depth(), 1);
    }

    #[tokio::test]
    async fn test_supersede_is_scoped_per_container() {
        let (queue, store) = queue_with_store();
        let c1 = container(&store).await;
        let c2 = container(&store).await;

        let a = queue.enqueue_build(&c1, None, None).await.unwrap();
        queue.enqueue_build(&c2, None, None).await.unwrap();

        let a = BuildStore::get(&store, a.id).await.unwrap();
        assert_eq!(a.status, BuildStatus::Queue);
        assert_eq!(queue.depth(), 2);
    }

    #[tokio::test]
    async fn test_enqueue_updates_last_build() {
        let (queue, store) = queue_with_store();
        let c = container(&store).await;
        let build = queue.enqueue_build(&c, None, None).await.unwrap();
        let loaded = ContainerStore::get(&store, c.id).await.unwrap();
        assert_eq!(loaded.last_build, Some(build.id));
    }

    #[tokio::test]
    async fn test_cancel_removes_queued_job() {
        let (queue, store) = queue_with_store();
        let c = container(&store).await;
        let build = queue.enqueue_build(&c, None, None).await.unwrap();

        assert!(queue.cancel(build.id));
        assert_eq!(queue.depth(), 0);
        // cancelling again is a no-op
        assert!(!queue.cancel(build.id));
    }

    #[tokio::test]
    async fn test_retry_exhaustion_marks_build_failed() {
        use drydock_core::domain::ContainerStatus;
        use std::sync::atomic::Ordering;

        let rig = crate::testing::rig();
        rig.fetcher.fail_transient.store(true, Ordering::SeqCst);
        let c = crate::testing::app_container();
        ContainerStore::insert(&rig.store, c.clone()).await.unwrap();
        ContainerStore::set_status(&rig.store, c.id, ContainerStatus::Building)
            .await
            .unwrap();

        let build = rig.queue.enqueue_build(&c, None, None).await.unwrap();
        let workers = rig.queue.spawn_workers(rig.pipeline.clone());

        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
        let finished = loop {
            let current = BuildStore::get(&rig.store, build.id).await.unwrap();
            if current.status.is_terminal() {
                break current;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "build never reached a terminal status"
            );
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        };

        assert_eq!(finished.status, BuildStatus::Failed);
        assert!(
            finished
                .log
                .lines()
                .iter()
                .any(|l| l.contains("git host unreachable"))
        );
        // its only build failed: the container aggregates to DIED
        let c = ContainerStore::get(&rig.store, c.id).await.unwrap();
        assert_eq!(c.status, ContainerStatus::Died);
        for worker in workers {
            worker.abort();
        }
    }

    #[tokio::test]
    async fn test_pause_blocks_next_job() {
        let (queue, store) = queue_with_store();
        let c = container(&store).await;
        queue.enqueue_build(&c, None, None).await.unwrap();
        queue.pause();

        let waiting = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next_job().await })
        };
        // paused: the job must not be handed out
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());
        assert_eq!(queue.depth(), 1);

        queue.resume();
        let job = waiting.await.unwrap();
        assert_eq!(job.container_id, c.id);
    }
}
