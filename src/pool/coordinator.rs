//! # Worker Pool Coordinator
//!
//! Owns the worker array and the load balancer, routes calls to the least
//! loaded worker, samples worker stats on a timer, and turns worker faults
//! into teardown plus supervised revival.
//!
//! ## Architecture
//!
//! - **Routing**: `call` acquires the best slot, bumps its active count for
//!   the duration of the round trip, and always gives it back.
//! - **Crash handling**: one monitor task per worker handle; a fault only
//!   counts if that exact handle instance is still installed.
//! - **Stats**: a timer asks every present worker for `getStats` and feeds
//!   the samples, plus the measured round-trip time, into the balancer.
//! - **Revival**: see [`revival`](super::revival).
//!
//! Locks are never held across an `.await`. When both are needed, `workers`
//! is taken before `balancer`.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use workpool::config::PoolConfig;
//! use workpool::pool::WorkerPool;
//! use workpool::worker::ThreadScript;
//! # use workpool::rpc::{Exposed, RemoteValue, Thrown, Transfer};
//! # struct MyWorker;
//! # #[async_trait::async_trait]
//! # impl Exposed for MyWorker {
//! #     async fn apply(&self, _: &[String], _: Vec<RemoteValue>) -> Result<Transfer, Thrown> {
//! #         Ok(serde_json::Value::Null.into())
//! #     }
//! # }
//!
//! # async fn example() -> Result<(), workpool::pool::PoolError> {
//! let script = ThreadScript::new("resize", |_id| MyWorker);
//! let pool = WorkerPool::new(script, PoolConfig::default())?;
//!
//! pool.init(serde_json::json!({"quality": 80})).await?;
//! pool.bootstrap(serde_json::json!({})).await?;
//! let result = pool.call("resize", vec![serde_json::json!("cat.png").into()]).await?;
//!
//! pool.destroy().await;
//! # Ok(())
//! # }
//! ```

use dashmap::DashSet;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::error::PoolError;
use super::events::{PoolEvent, EVENT_BUFFER_SIZE};
use super::revival;
use super::snapshot::{PoolSnapshot, SlotSnapshot};
use crate::config::PoolConfig;
use crate::load_balancer::{LoadBalancer, Slot, StatsSample};
use crate::logging::{log_pool_operation, log_worker_lifecycle};
use crate::rpc::{Remote, RemoteValue, Transfer};
use crate::worker::{WorkerFault, WorkerHandle, WorkerScript};

/// Load-balanced pool of worker units
///
/// Cheap to clone; all clones share the same workers.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

pub(crate) struct PoolInner {
    pub(crate) script: Arc<dyn WorkerScript>,
    pub(crate) config: PoolConfig,
    size: usize,
    workers: RwLock<Vec<Option<Arc<WorkerHandle>>>>,
    balancer: Mutex<LoadBalancer>,
    /// Revival tracker: ids with a running supervisor
    pub(crate) reviving: DashSet<usize>,
    destroying: AtomicBool,
    init_params: RwLock<Option<Value>>,
    bootstrap_params: RwLock<Option<Value>>,
    stats_task: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<PoolEvent>,
}

impl WorkerPool {
    /// Spawn `config.size` workers (host concurrency by default) from `script`
    ///
    /// Must be called inside a tokio runtime. If any worker fails to spawn, the
    /// ones already started are terminated and the error is returned.
    pub fn new<S: WorkerScript>(script: S, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        let size = config.resolved_size();
        let (events, _) = broadcast::channel(EVENT_BUFFER_SIZE);

        let inner = Arc::new(PoolInner {
            script: Arc::new(script),
            size,
            workers: RwLock::new(vec![None; size]),
            balancer: Mutex::new(LoadBalancer::new(
                size,
                config.memory_ceiling_bytes as f64,
                config.response_time_ceiling_ms,
            )),
            reviving: DashSet::new(),
            destroying: AtomicBool::new(false),
            init_params: RwLock::new(None),
            bootstrap_params: RwLock::new(None),
            stats_task: Mutex::new(None),
            events,
            config,
        });

        let mut spawned = Vec::with_capacity(size);
        for id in 0..size {
            match WorkerHandle::spawn(inner.script.as_ref(), id) {
                Ok(handle) => spawned.push(Arc::new(handle)),
                Err(e) => {
                    warn!(worker_id = id, error = %e, "Worker spawn failed during pool construction");
                    spawned.iter().for_each(|handle| handle.terminate());
                    return Err(e.into());
                }
            }
        }
        for handle in spawned {
            inner.install(handle)?;
        }

        log_pool_operation("create", size, "ready", Some(inner.script.name()));
        Ok(Self { inner })
    }

    /// Call `method` on the least-loaded worker
    ///
    /// Capacity errors come back without touching any worker. Errors thrown by
    /// the worker come back as [`PoolError::Remote`].
    pub async fn call(&self, method: &str, args: Vec<Transfer>) -> Result<RemoteValue, PoolError> {
        if self.inner.is_destroying() {
            return Err(PoolError::Destroyed);
        }

        let (handle, _active) = self.inner.checkout()?;
        trace!(worker_id = handle.id(), method, "Dispatching call");

        handle
            .remote()
            .call(method, args)
            .await
            .map_err(PoolError::from)
    }

    /// Run `init(id, params)` on every present worker and start stats collection
    ///
    /// `params` are kept and replayed to revived workers.
    pub async fn init(&self, params: Value) -> Result<(), PoolError> {
        if self.inner.is_destroying() {
            return Err(PoolError::Destroyed);
        }
        *self.inner.init_params.write() = Some(params.clone());

        let workers = self.inner.present_workers();
        let results = join_all(workers.iter().map(|handle| handle.init(&params))).await;
        self.inner.start_stats_timer();

        log_pool_operation("init", workers.len(), "complete", None);
        first_error(results)
    }

    /// Run `bootstrap(params)` on every present worker
    ///
    /// `params` are kept and replayed to revived workers.
    pub async fn bootstrap(&self, params: Value) -> Result<(), PoolError> {
        if self.inner.is_destroying() {
            return Err(PoolError::Destroyed);
        }
        *self.inner.bootstrap_params.write() = Some(params.clone());

        let workers = self.inner.present_workers();
        let results = join_all(workers.iter().map(|handle| handle.bootstrap(&params))).await;

        log_pool_operation("bootstrap", workers.len(), "complete", None);
        first_error(results)
    }

    /// Tear down every worker and stop all background activity
    ///
    /// Best effort: a failing worker teardown is logged and does not stop the
    /// others. Calling it again is a no-op.
    pub async fn destroy(&self) {
        if self.inner.destroying.swap(true, Ordering::SeqCst) {
            debug!("Worker pool already destroyed");
            return;
        }

        if let Some(task) = self.inner.stats_task.lock().take() {
            task.abort();
        }

        let workers: Vec<Arc<WorkerHandle>> = {
            let mut workers = self.inner.workers.write();
            let mut balancer = self.inner.balancer.lock();
            workers
                .iter_mut()
                .enumerate()
                .filter_map(|(id, slot)| {
                    balancer.delete_slot(id);
                    slot.take()
                })
                .collect()
        };

        let count = workers.len();
        let results = join_all(workers.iter().map(|handle| async move {
            (handle.id(), handle.shutdown().await)
        }))
        .await;

        for (worker_id, result) in results {
            if let Err(e) = result {
                warn!(worker_id, error = %e, "Worker teardown failed");
            }
        }

        self.inner.publish(PoolEvent::PoolDestroyed);
        log_pool_operation("destroy", count, "complete", None);
    }

    /// Start a revival for a worker that is down and not already reviving
    ///
    /// Returns `false` when the worker is present, already reviving, out of
    /// range, or the pool is being destroyed.
    pub fn restart_worker(&self, worker_id: usize) -> bool {
        if worker_id >= self.inner.size || self.inner.worker(worker_id).is_some() {
            return false;
        }
        revival::start(&self.inner, worker_id)
    }

    /// Subscribe to crash, revival and shutdown events
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.inner.events.subscribe()
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn is_destroying(&self) -> bool {
        self.inner.is_destroying()
    }

    /// Stub for direct access to one worker
    pub fn remote(&self, worker_id: usize) -> Option<Remote> {
        self.inner
            .worker(worker_id)
            .map(|handle| handle.remote().clone())
    }

    /// Ids of workers currently installed
    pub fn available_workers(&self) -> Vec<usize> {
        self.inner
            .present_workers()
            .iter()
            .map(|handle| handle.id())
            .collect()
    }

    /// Ids with a revival in progress, ascending
    pub fn reviving_workers(&self) -> Vec<usize> {
        let mut ids: Vec<usize> = self.inner.reviving.iter().map(|id| *id).collect();
        ids.sort_unstable();
        ids
    }

    /// Current load record of one worker
    pub fn slot(&self, worker_id: usize) -> Option<Slot> {
        self.inner.balancer.lock().slot(worker_id).copied()
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let workers = self.inner.workers.read();
        let balancer = self.inner.balancer.lock();

        let slots = (0..self.inner.size)
            .map(|id| SlotSnapshot {
                worker_id: id,
                load: balancer.slot(id).copied(),
                score: balancer.slot(id).map(|_| balancer.score(id)),
                spawned_at: workers
                    .get(id)
                    .and_then(Option::as_ref)
                    .map(|handle| handle.spawned_at()),
            })
            .collect();

        PoolSnapshot {
            size: self.inner.size,
            available: workers.iter().flatten().count(),
            reviving: self.reviving_workers(),
            destroying: self.inner.is_destroying(),
            slots,
            taken_at: chrono::Utc::now(),
        }
    }

    /// Sample every present worker once, outside the timer
    pub async fn collect_stats(&self) {
        self.inner.collect_stats().await;
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("script", &self.inner.script.name())
            .field("size", &self.inner.size)
            .field("available", &self.available_workers())
            .field("destroying", &self.is_destroying())
            .finish()
    }
}

impl PoolInner {
    pub(crate) fn is_destroying(&self) -> bool {
        self.destroying.load(Ordering::SeqCst)
    }

    pub(crate) fn init_params(&self) -> Option<Value> {
        self.init_params.read().clone()
    }

    pub(crate) fn bootstrap_params(&self) -> Option<Value> {
        self.bootstrap_params.read().clone()
    }

    pub(crate) fn publish(&self, event: PoolEvent) {
        if self.events.send(event).is_err() {
            trace!("No pool event subscribers");
        }
    }

    fn worker(&self, id: usize) -> Option<Arc<WorkerHandle>> {
        self.workers.read().get(id).cloned().flatten()
    }

    fn present_workers(&self) -> Vec<Arc<WorkerHandle>> {
        self.workers.read().iter().flatten().cloned().collect()
    }

    /// Pick a worker and count the call against it
    fn checkout(&self) -> Result<(Arc<WorkerHandle>, ActiveGuard<'_>), PoolError> {
        let workers = self.workers.read();
        let mut balancer = self.balancer.lock();

        let id = balancer.acquire().ok_or(PoolError::NoAvailableWorkers)?;
        let Some(handle) = workers.get(id).cloned().flatten() else {
            balancer.delete_slot(id);
            warn!(worker_id = id, "Stale load slot without a worker, removed");
            return Err(PoolError::WorkerUnavailable { worker_id: id });
        };

        balancer.increase_active(id);
        let guard = ActiveGuard {
            pool: self,
            id,
            instance: handle.instance(),
        };
        Ok((handle, guard))
    }

    /// Put a ready worker into service
    ///
    /// Refused once the pool is destroying; the worker is terminated instead.
    pub(crate) fn install(self: &Arc<Self>, handle: Arc<WorkerHandle>) -> Result<(), PoolError> {
        let id = handle.id();
        {
            let mut workers = self.workers.write();
            if self.is_destroying() {
                drop(workers);
                handle.terminate();
                debug!(worker_id = id, "Pool destroying, fresh worker discarded");
                return Err(PoolError::Destroyed);
            }
            if let Some(slot) = workers.get_mut(id) {
                *slot = Some(Arc::clone(&handle));
            }
            self.balancer.lock().add_slot(id);
        }

        self.spawn_monitor(&handle);
        Ok(())
    }

    fn spawn_monitor(self: &Arc<Self>, handle: &WorkerHandle) {
        let Some(mut faults) = handle.take_faults() else {
            return;
        };
        let pool = Arc::downgrade(self);
        let id = handle.id();
        let instance = handle.instance();

        tokio::spawn(async move {
            if let Some(fault) = faults.recv().await {
                if let Some(pool) = pool.upgrade() {
                    pool.handle_fault(id, instance, fault);
                }
            }
        });
    }

    /// Tear down a faulted worker and hand it to the revival supervisor
    fn handle_fault(self: &Arc<Self>, id: usize, instance: Uuid, fault: WorkerFault) {
        if self.is_destroying() {
            debug!(worker_id = id, fault = %fault, "Fault during destroy ignored");
            return;
        }

        let Some(handle) = self.retire(id, instance) else {
            debug!(worker_id = id, fault = %fault, "Fault from a replaced worker ignored");
            return;
        };

        warn!(
            worker_id = id,
            kind = %fault.kind,
            cause = %fault.cause,
            "💥 Worker crashed, scheduling revival"
        );
        log_worker_lifecycle(id, "crashed", None, Some(&fault.cause));
        self.publish(PoolEvent::WorkerCrashed {
            worker_id: id,
            fault,
        });

        handle.terminate();
        drop(handle);

        revival::start(self, id);
    }

    /// Take worker `id` out of service if `instance` is still the installed one
    ///
    /// Worker and slot leave together under the workers lock, so a concurrent
    /// `install` never has its fresh slot removed.
    fn retire(&self, id: usize, instance: Uuid) -> Option<Arc<WorkerHandle>> {
        let mut workers = self.workers.write();
        let slot = workers.get_mut(id)?;
        if slot.as_ref().map(|h| h.instance()) != Some(instance) {
            return None;
        }
        let handle = slot.take();
        self.balancer.lock().delete_slot(id);
        handle
    }

    fn start_stats_timer(self: &Arc<Self>) {
        let mut task = self.stats_task.lock();
        if task.is_some() || self.is_destroying() {
            return;
        }

        let pool = Arc::downgrade(self);
        let period = self.config.stats_interval();
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(pool) = pool.upgrade() else { break };
                if pool.is_destroying() {
                    break;
                }
                pool.collect_stats().await;
            }
        }));
        info!(interval_ms = period.as_millis() as u64, "Stats collection started");
    }

    async fn collect_stats(&self) {
        let workers = self.present_workers();
        let samples = join_all(workers.into_iter().map(|handle| async move {
            let started = Instant::now();
            let stats = handle.get_stats().await;
            (handle, stats, started.elapsed())
        }))
        .await;

        let workers = self.workers.read();
        let mut balancer = self.balancer.lock();
        for (handle, stats, elapsed) in samples {
            let id = handle.id();
            let current = workers.get(id).and_then(Option::as_ref).map(|h| h.instance());
            if current != Some(handle.instance()) {
                continue;
            }

            match stats {
                Ok(stats) => balancer.update_stats(
                    id,
                    StatsSample {
                        cpu: Some(stats.cpu),
                        memory: Some(stats.memory),
                        response_time: Some(elapsed.as_secs_f64() * 1000.0),
                    },
                ),
                Err(e) => trace!(worker_id = id, error = %e, "No stats sample this tick"),
            }
        }
    }
}

/// Gives back one unit of `active` when the call finishes, however it finishes
struct ActiveGuard<'a> {
    pool: &'a PoolInner,
    id: usize,
    instance: Uuid,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let workers = self.pool.workers.read();
        let same_worker = workers
            .get(self.id)
            .and_then(Option::as_ref)
            .is_some_and(|handle| handle.instance() == self.instance);
        // A revived worker starts from a fresh slot.
        if same_worker {
            self.pool.balancer.lock().decrease_active(self.id);
        }
    }
}

fn first_error<E>(results: Vec<Result<(), E>>) -> Result<(), PoolError>
where
    PoolError: From<E>,
{
    results
        .into_iter()
        .find_map(Result::err)
        .map_or(Ok(()), |e| Err(e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{Exposed, Thrown};
    use crate::worker::ThreadScript;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(5);

    struct Echo {
        id: usize,
    }

    #[async_trait]
    impl Exposed for Echo {
        async fn apply(&self, path: &[String], _args: Vec<RemoteValue>) -> Result<Transfer, Thrown> {
            match path.first().map(String::as_str) {
                Some("whoami") => Ok(json!(self.id).into()),
                _ => Ok(Value::Null.into()),
            }
        }
    }

    fn echo_pool(size: usize) -> WorkerPool {
        let config = PoolConfig {
            size: Some(size),
            stats_interval_ms: 60_000,
            ..PoolConfig::default()
        };
        WorkerPool::new(ThreadScript::new("echo", |id| Echo { id }), config).unwrap()
    }

    async fn whoami(pool: &WorkerPool) -> Result<u64, PoolError> {
        let value = tokio::time::timeout(TIMEOUT, pool.call("whoami", vec![]))
            .await
            .expect("call in time")?;
        Ok(value.into_json().unwrap().as_u64().unwrap())
    }

    #[tokio::test]
    async fn test_stale_slot_is_removed_and_reported() {
        let pool = echo_pool(2);

        // Worker gone while its load slot lingers.
        let orphan = pool.inner.workers.write()[0].take().unwrap();
        orphan.terminate();
        assert!(pool.slot(0).is_some());

        assert_eq!(
            whoami(&pool).await.unwrap_err(),
            PoolError::WorkerUnavailable { worker_id: 0 }
        );
        assert!(pool.slot(0).is_none());
        assert_eq!(pool.available_workers(), vec![1]);

        assert_eq!(whoami(&pool).await.unwrap(), 1);
        assert_eq!(pool.slot(1).unwrap().active, 0);

        pool.destroy().await;
    }

    #[tokio::test]
    async fn test_retire_takes_worker_and_slot_together() {
        let pool = echo_pool(2);
        let first = pool.inner.worker(0).unwrap();

        let retired = pool.inner.retire(0, first.instance()).unwrap();
        assert_eq!(retired.instance(), first.instance());
        assert!(pool.inner.worker(0).is_none());
        assert!(pool.slot(0).is_none());
        retired.terminate();

        // A replacement is installed; a late fault from the old instance leaves it alone.
        let fresh = Arc::new(WorkerHandle::spawn(pool.inner.script.as_ref(), 0).unwrap());
        pool.inner.install(Arc::clone(&fresh)).unwrap();
        assert!(pool.inner.retire(0, first.instance()).is_none());
        assert_eq!(pool.inner.worker(0).unwrap().instance(), fresh.instance());
        assert!(pool.slot(0).is_some());
        assert_eq!(whoami(&pool).await.unwrap(), 0);

        // Out of range ids are ignored.
        assert!(pool.inner.retire(9, fresh.instance()).is_none());

        pool.destroy().await;
    }
}
