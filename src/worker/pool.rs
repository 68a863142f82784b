use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::{
    sync::{Mutex as AsyncMutex, OwnedMutexGuard},
    task::JoinHandle,
    time::Instant,
};

use crate::{
    error::ServiceError,
    modes::PoolId,
    worker::{GenerationResult, GenerationTask, Worker, WorkerFactory},
};

struct Slot {
    worker: Option<Box<dyn Worker>>,
    last_used: Instant,
}

#[derive(Debug, Default)]
struct PoolStats {
    live: bool,
    cold_starts: u64,
    served: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub pool: PoolId,
    pub generator: String,
    pub live: bool,
    pub cold_starts: u64,
    pub served: u64,
    pub idle_timeout_secs: u64,
}

/// Owns at most one live worker for a model family.
///
/// The slot is a FIFO-fair async mutex, so concurrent callers queue up and are
/// served in submission order. A worker is started on the first checkout of an
/// empty slot and kept until it has been idle for `idle_timeout`.
pub struct WorkerPool {
    id: PoolId,
    generator: String,
    factory: Arc<dyn WorkerFactory>,
    slot: Arc<AsyncMutex<Slot>>,
    idle_timeout: Duration,
    stats: Mutex<PoolStats>,
}

/// Exclusive checkout of the pool's worker. Dropping it releases the slot.
pub struct WorkerLease {
    slot: OwnedMutexGuard<Slot>,
}

/// Start failure shared by the tasks of one dispatch.
#[derive(Debug, Default)]
pub struct StartGate {
    failure: Mutex<Option<String>>,
}

impl StartGate {
    fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }

    fn record(&self, err: &ServiceError) {
        let reason = match err {
            ServiceError::WorkerStartup(reason) => reason.clone(),
            other => other.to_string(),
        };
        *self.failure.lock() = Some(reason);
    }
}

impl WorkerLease {
    pub async fn generate(
        &mut self,
        task: &GenerationTask,
    ) -> Result<GenerationResult, ServiceError> {
        let worker = self
            .slot
            .worker
            .as_mut()
            .ok_or_else(|| ServiceError::WorkerStartup("worker slot is empty".into()))?;
        worker.generate(task).await
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        self.slot.last_used = Instant::now();
    }
}

impl WorkerPool {
    pub fn new(
        id: PoolId,
        generator: impl Into<String>,
        factory: Arc<dyn WorkerFactory>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            id,
            generator: generator.into(),
            factory,
            slot: Arc::new(AsyncMutex::new(Slot {
                worker: None,
                last_used: Instant::now(),
            })),
            idle_timeout,
            stats: Mutex::new(PoolStats::default()),
        }
    }

    pub fn id(&self) -> PoolId {
        self.id
    }

    pub fn generator(&self) -> &str {
        &self.generator
    }

    pub fn status(&self) -> PoolStatus {
        let stats = self.stats.lock();
        PoolStatus {
            pool: self.id,
            generator: self.generator.clone(),
            live: stats.live,
            cold_starts: stats.cold_starts,
            served: stats.served,
            idle_timeout_secs: self.idle_timeout.as_secs(),
        }
    }

    /// Waits for the slot, starting a worker if none is live.
    pub async fn checkout(&self) -> Result<WorkerLease, ServiceError> {
        self.checkout_gated(None).await
    }

    async fn checkout_gated(
        &self,
        gate: Option<&StartGate>,
    ) -> Result<WorkerLease, ServiceError> {
        let mut slot = self.slot.clone().lock_owned().await;

        if slot.worker.is_none() {
            if let Some(reason) = gate.and_then(StartGate::failure) {
                return Err(ServiceError::WorkerStartup(reason));
            }

            tracing::info!(pool = ?self.id, generator = %self.generator, "starting worker");
            let started = Instant::now();
            let worker = match self.factory.start().await {
                Ok(worker) => worker,
                Err(err) => {
                    if let Some(gate) = gate {
                        gate.record(&err);
                    }
                    return Err(err);
                }
            };
            tracing::info!(
                pool = ?self.id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "worker ready"
            );

            slot.worker = Some(worker);
            slot.last_used = Instant::now();
            let mut stats = self.stats.lock();
            stats.live = true;
            stats.cold_starts += 1;
        }

        Ok(WorkerLease { slot })
    }

    pub async fn run(&self, task: &GenerationTask) -> Result<GenerationResult, ServiceError> {
        self.run_gated(task, None).await
    }

    /// Runs `task` as part of a batch sharing `gate`. Once a start fails,
    /// the remaining tasks of the batch fail with that reason instead of
    /// starting the worker again.
    pub async fn run_in_batch(
        &self,
        task: &GenerationTask,
        gate: &StartGate,
    ) -> Result<GenerationResult, ServiceError> {
        self.run_gated(task, Some(gate)).await
    }

    async fn run_gated(
        &self,
        task: &GenerationTask,
        gate: Option<&StartGate>,
    ) -> Result<GenerationResult, ServiceError> {
        let mut lease = self.checkout_gated(gate).await?;
        let result = lease.generate(task).await;
        drop(lease);

        self.stats.lock().served += 1;
        result
    }

    /// Tears the worker down if it has been idle for at least `idle_timeout`.
    /// A worker that is currently checked out is never idle.
    pub fn reap_idle(&self) -> bool {
        let Ok(mut slot) = self.slot.try_lock() else {
            return false;
        };
        if slot.worker.is_none() || slot.last_used.elapsed() < self.idle_timeout {
            return false;
        }

        slot.worker = None;
        self.stats.lock().live = false;
        tracing::info!(pool = ?self.id, "idle worker torn down");
        true
    }

    pub fn spawn_idle_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let pool: Weak<Self> = Arc::downgrade(self);
        let period = (self.idle_timeout / 2).max(Duration::from_millis(100));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(pool) = pool.upgrade() else {
                    break;
                };
                pool.reap_idle();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::modes::aspect_ratio;

    #[derive(Default)]
    struct Counters {
        starts: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    struct CountingWorker {
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl Worker for CountingWorker {
        async fn generate(
            &mut self,
            task: &GenerationTask,
        ) -> Result<GenerationResult, ServiceError> {
            let now = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.counters.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(GenerationResult::local_only(PathBuf::from(&task.prompt)))
        }
    }

    struct CountingFactory {
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl WorkerFactory for CountingFactory {
        async fn start(&self) -> Result<Box<dyn Worker>, ServiceError> {
            self.counters.starts.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingWorker {
                counters: self.counters.clone(),
            }))
        }
    }

    struct CountedFailingFactory {
        starts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl WorkerFactory for CountedFailingFactory {
        async fn start(&self) -> Result<Box<dyn Worker>, ServiceError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Err(ServiceError::WorkerStartup("model weights missing".into()))
        }
    }

    struct FailingFactory;

    #[async_trait]
    impl WorkerFactory for FailingFactory {
        async fn start(&self) -> Result<Box<dyn Worker>, ServiceError> {
            Err(ServiceError::WorkerStartup("model weights missing".into()))
        }
    }

    fn pool(counters: &Arc<Counters>, idle: Duration) -> Arc<WorkerPool> {
        Arc::new(WorkerPool::new(
            PoolId::ProfilePicture,
            "test",
            Arc::new(CountingFactory {
                counters: counters.clone(),
            }),
            idle,
        ))
    }

    fn task(prompt: &str) -> GenerationTask {
        GenerationTask {
            aspect_ratio: aspect_ratio("1:1").unwrap(),
            prompt: prompt.into(),
            category: "cars".into(),
        }
    }

    #[tokio::test]
    async fn concurrent_calls_share_one_worker_serially() {
        let counters = Arc::new(Counters::default());
        let pool = pool(&counters, Duration::from_secs(30));
        let tasks: Vec<_> = (0..4).map(|i| task(&format!("p{i}"))).collect();

        let results = futures::future::join_all(tasks.iter().map(|t| pool.run(t))).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(counters.starts.load(Ordering::SeqCst), 1);
        assert_eq!(counters.max_in_flight.load(Ordering::SeqCst), 1);
        let status = pool.status();
        assert!(status.live);
        assert_eq!((status.cold_starts, status.served), (1, 4));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_worker_is_torn_down_and_restarted() {
        let counters = Arc::new(Counters::default());
        let pool = pool(&counters, Duration::from_secs(30));

        pool.run(&task("a")).await.unwrap();
        assert!(!pool.reap_idle());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(pool.reap_idle());
        assert!(!pool.status().live);

        pool.run(&task("b")).await.unwrap();
        assert_eq!(pool.status().cold_starts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reaper_task_tears_down_idle_worker() {
        let counters = Arc::new(Counters::default());
        let pool = pool(&counters, Duration::from_secs(10));
        let reaper = pool.spawn_idle_reaper();

        pool.run(&task("a")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(25)).await;

        assert!(!pool.status().live);
        reaper.abort();
    }

    #[tokio::test]
    async fn leased_worker_is_not_reaped() {
        let counters = Arc::new(Counters::default());
        let pool = pool(&counters, Duration::ZERO);

        let lease = pool.checkout().await.unwrap();
        assert!(!pool.reap_idle());
        drop(lease);
        assert!(pool.reap_idle());
    }

    #[tokio::test]
    async fn failed_start_leaves_slot_empty() {
        let pool = WorkerPool::new(
            PoolId::Wallpaper,
            "broken",
            Arc::new(FailingFactory),
            Duration::from_secs(30),
        );

        let err = pool.run(&task("a")).await.unwrap_err();

        assert!(matches!(err, ServiceError::WorkerStartup(_)));
        let status = pool.status();
        assert!(!status.live);
        assert_eq!(status.cold_starts, 0);
    }

    #[tokio::test]
    async fn batch_attempts_one_start_after_failure() {
        let starts = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new(
            PoolId::Wallpaper,
            "broken",
            Arc::new(CountedFailingFactory {
                starts: starts.clone(),
            }),
            Duration::from_secs(30),
        );
        let tasks: Vec<_> = (0..5).map(|i| task(&format!("p{i}"))).collect();
        let gate = StartGate::default();

        let results =
            futures::future::join_all(tasks.iter().map(|t| pool.run_in_batch(t, &gate))).await;

        assert_eq!(starts.load(Ordering::SeqCst), 1);
        for result in results {
            let err = result.unwrap_err();
            assert_eq!(
                err.to_string(),
                "generation worker failed to start: model weights missing"
            );
        }

        pool.run(&task("next request")).await.unwrap_err();
        assert_eq!(starts.load(Ordering::SeqCst), 2);
    }
}
