//! Workpool Demo Binary
//!
//! Starts a pool of Fibonacci workers, fans a batch of calls across it and
//! prints the resulting load snapshot.

use anyhow::Context;
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

use workpool::config::{ConfigManager, PoolConfig};
use workpool::logging::init_structured_logging;
use workpool::pool::WorkerPool;
use workpool::rpc::{single_segment, Exposed, RemoteValue, Thrown, Transfer};
use workpool::worker::ThreadScript;

struct FibWorker {
    id: usize,
    active: AtomicUsize,
    served: AtomicUsize,
}

impl FibWorker {
    fn new(id: usize) -> Self {
        Self {
            id,
            active: AtomicUsize::new(0),
            served: AtomicUsize::new(0),
        }
    }
}

fn fib(n: u64) -> u64 {
    let (mut a, mut b) = (0u64, 1u64);
    for _ in 0..n {
        (a, b) = (b, a.wrapping_add(b));
    }
    a
}

fn arg_u64(args: &[RemoteValue], index: usize) -> Result<u64, Thrown> {
    args.get(index)
        .and_then(RemoteValue::as_json)
        .and_then(Value::as_u64)
        .ok_or_else(|| Thrown::type_error(format!("argument {index} must be a non-negative integer")))
}

#[async_trait]
impl Exposed for FibWorker {
    async fn apply(&self, path: &[String], args: Vec<RemoteValue>) -> Result<Transfer, Thrown> {
        match single_segment(path)? {
            "init" | "bootstrap" | "destroy" => Ok(Value::Null.into()),
            "getStats" => {
                let active = self.active.load(Ordering::Relaxed) as f64;
                Ok(json!({
                    "cpu": (active / 4.0).min(1.0),
                    "memory": 8_388_608.0 + self.served.load(Ordering::Relaxed) as f64 * 1024.0,
                })
                .into())
            }
            "fib" => {
                let n = arg_u64(&args, 0)?;
                self.active.fetch_add(1, Ordering::Relaxed);
                let value = fib(n);
                tokio::time::sleep(std::time::Duration::from_millis(n)).await;
                self.active.fetch_sub(1, Ordering::Relaxed);
                self.served.fetch_add(1, Ordering::Relaxed);
                Ok(json!({"worker": self.id, "n": n, "value": value}).into())
            }
            other => Err(Thrown::type_error(format!("unknown method `{other}`"))),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_structured_logging();

    let config = match ConfigManager::load() {
        Ok(manager) => manager.config().clone(),
        Err(e) => {
            warn!(error = %e, "Falling back to default pool configuration");
            PoolConfig::default()
        }
    };

    let pool = WorkerPool::new(ThreadScript::new("fib", FibWorker::new), config)
        .context("failed to start worker pool")?;
    info!(size = pool.size(), "🚀 Demo pool started");

    pool.init(json!({"demo": true})).await.context("init failed")?;
    pool.bootstrap(json!({})).await.context("bootstrap failed")?;

    let calls = (10..40u64).map(|n| {
        let pool = pool.clone();
        async move { pool.call("fib", vec![json!(n).into()]).await }
    });
    for result in join_all(calls).await {
        match result.map(RemoteValue::into_json) {
            Ok(Ok(value)) => println!("{value}"),
            Ok(Err(e)) => warn!(error = %e, "Unexpected reply"),
            Err(e) => warn!(error = %e, "Call failed"),
        }
    }

    pool.collect_stats().await;
    println!("{}", serde_json::to_string_pretty(&pool.snapshot())?);

    pool.destroy().await;
    info!("Demo pool destroyed");
    Ok(())
}
