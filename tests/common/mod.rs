//! Shared fixtures for the integration tests: a scriptable worker, spawn
//! wrappers that fail on demand, and small polling helpers.

#![allow(dead_code)]

pub mod strategies;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use workpool::config::{PoolConfig, RevivalConfig};
use workpool::rpc::{single_segment, Exposed, RemoteValue, Thrown, Transfer};
use workpool::worker::{SpawnError, ThreadScript, WorkerScript, WorkerUnit};

/// What the test workers saw, shared between the test and every worker thread
#[derive(Debug, Default)]
pub struct Recorder {
    pub inits: Mutex<Vec<(usize, Value)>>,
    pub bootstraps: Mutex<Vec<(usize, Value)>>,
    pub destroys: Mutex<Vec<usize>>,
    pub constructed: Mutex<HashMap<usize, u32>>,
    /// Stats returned by `getStats`, per worker id
    pub stats: Mutex<HashMap<usize, Value>>,
}

impl Recorder {
    pub fn init_ids(&self) -> Vec<usize> {
        let mut ids: Vec<usize> = self.inits.lock().iter().map(|(id, _)| *id).collect();
        ids.sort_unstable();
        ids
    }

    pub fn inits_for(&self, worker_id: usize) -> usize {
        self.inits.lock().iter().filter(|(id, _)| *id == worker_id).count()
    }

    pub fn bootstraps_for(&self, worker_id: usize) -> usize {
        self.bootstraps
            .lock()
            .iter()
            .filter(|(id, _)| *id == worker_id)
            .count()
    }
}

/// Worker exposing the pool lifecycle methods plus a handful of test methods
pub struct TestWorker {
    id: usize,
    recorder: Arc<Recorder>,
}

impl TestWorker {
    pub fn new(id: usize, recorder: Arc<Recorder>) -> Self {
        Self { id, recorder }
    }
}

fn arg(args: &[RemoteValue], index: usize) -> Value {
    args.get(index)
        .and_then(RemoteValue::as_json)
        .cloned()
        .unwrap_or(Value::Null)
}

#[async_trait]
impl Exposed for TestWorker {
    async fn get(&self, path: &[String]) -> Result<Transfer, Thrown> {
        match single_segment(path)? {
            "id" => Ok(json!(self.id).into()),
            other => Err(Thrown::type_error(format!("no property `{other}`"))),
        }
    }

    async fn apply(&self, path: &[String], args: Vec<RemoteValue>) -> Result<Transfer, Thrown> {
        match single_segment(path)? {
            "init" => {
                let id = arg(&args, 0).as_u64().unwrap_or(u64::MAX) as usize;
                self.recorder.inits.lock().push((id, arg(&args, 1)));
                Ok(Value::Null.into())
            }
            "bootstrap" => {
                self.recorder.bootstraps.lock().push((self.id, arg(&args, 0)));
                Ok(Value::Null.into())
            }
            "destroy" => {
                self.recorder.destroys.lock().push(self.id);
                Ok(Value::Null.into())
            }
            "getStats" => {
                let stats = self.recorder.stats.lock().get(&self.id).cloned();
                Ok(stats.unwrap_or_else(|| json!({"cpu": 0.0, "memory": 0.0})).into())
            }
            "whoami" => Ok(json!(self.id).into()),
            "echo" => Ok(arg(&args, 0).into()),
            "add" => {
                let a = arg(&args, 0).as_f64().unwrap_or_default();
                let b = arg(&args, 1).as_f64().unwrap_or_default();
                Ok(json!(a + b).into())
            }
            "sleep" => {
                let ms = arg(&args, 0).as_u64().unwrap_or_default();
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(json!(self.id).into())
            }
            "fail" => Err(Thrown::error("RangeError", "requested failure")),
            "throwValue" => Err(Thrown::value(arg(&args, 0))),
            "crash" => panic!("worker {} crashed on request", self.id),
            "counter" => Ok(Transfer::proxy(Counter::default())),
            other => Err(Thrown::type_error(format!("unknown method `{other}`"))),
        }
    }

    async fn construct(
        &self,
        path: &[String],
        args: Vec<RemoteValue>,
    ) -> Result<Arc<dyn Exposed>, Thrown> {
        match single_segment(path)? {
            "Counter" => {
                *self.recorder.constructed.lock().entry(self.id).or_default() += 1;
                let start = arg(&args, 0).as_i64().unwrap_or_default();
                Ok(Arc::new(Counter::starting_at(start)))
            }
            other => Err(Thrown::type_error(format!("`{other}` is not a constructor"))),
        }
    }
}

/// Small stateful object handed out by reference
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicI64,
}

impl Counter {
    pub fn starting_at(value: i64) -> Self {
        Self {
            value: AtomicI64::new(value),
        }
    }
}

#[async_trait]
impl Exposed for Counter {
    async fn get(&self, path: &[String]) -> Result<Transfer, Thrown> {
        match single_segment(path)? {
            "value" => Ok(json!(self.value.load(Ordering::SeqCst)).into()),
            other => Err(Thrown::type_error(format!("no property `{other}`"))),
        }
    }

    async fn set(&self, path: &[String], value: RemoteValue) -> Result<(), Thrown> {
        match single_segment(path)? {
            "value" => {
                let value = value
                    .as_json()
                    .and_then(Value::as_i64)
                    .ok_or_else(|| Thrown::type_error("value must be an integer"))?;
                self.value.store(value, Ordering::SeqCst);
                Ok(())
            }
            other => Err(Thrown::type_error(format!("no property `{other}`"))),
        }
    }

    async fn apply(&self, path: &[String], _args: Vec<RemoteValue>) -> Result<Transfer, Thrown> {
        match single_segment(path)? {
            "increment" => Ok(json!(self.value.fetch_add(1, Ordering::SeqCst) + 1).into()),
            other => Err(Thrown::type_error(format!("unknown method `{other}`"))),
        }
    }
}

pub fn test_script(recorder: &Arc<Recorder>) -> ThreadScript {
    let recorder = Arc::clone(recorder);
    ThreadScript::new("test-worker", move |id| TestWorker::new(id, Arc::clone(&recorder)))
}

/// Wraps a script and rejects spawns while `failures` remain for that id
pub struct FlakyScript {
    inner: ThreadScript,
    failures: Arc<Mutex<HashMap<usize, u32>>>,
    pub spawns: Arc<AtomicU32>,
}

impl FlakyScript {
    pub fn new(inner: ThreadScript) -> Self {
        Self {
            inner,
            failures: Arc::default(),
            spawns: Arc::default(),
        }
    }

    /// Handle for adjusting failures after the script moved into a pool
    pub fn failures(&self) -> Arc<Mutex<HashMap<usize, u32>>> {
        Arc::clone(&self.failures)
    }
}

impl WorkerScript for FlakyScript {
    fn name(&self) -> &str {
        "flaky-worker"
    }

    fn spawn(&self, id: usize) -> Result<WorkerUnit, SpawnError> {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        let mut failures = self.failures.lock();
        if let Some(remaining) = failures.get_mut(&id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SpawnError::Rejected {
                    worker_id: id,
                    reason: format!("scripted failure, {} left", *remaining),
                });
            }
        }
        drop(failures);
        self.inner.spawn(id)
    }
}

/// Pool settings for tests: explicit size, fast revival, no stats noise
pub fn test_config(size: usize) -> PoolConfig {
    PoolConfig {
        size: Some(size),
        stats_interval_ms: 60_000,
        revival: RevivalConfig {
            max_attempts: 50,
            starting_delay_ms: 1,
            multiplier: 2.0,
            max_delay_ms: 5,
            full_jitter: true,
        },
        ..PoolConfig::default()
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Await `future`, failing the test if it takes longer than `timeout`
pub async fn within<T>(timeout: Duration, future: impl Future<Output = T>) -> T {
    tokio::time::timeout(timeout, future)
        .await
        .expect("operation timed out")
}
