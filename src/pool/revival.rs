//! # Revival Supervisor
//!
//! Brings a crashed worker back: spawn a fresh unit, replay the stored
//! `init` and `bootstrap` params, then install it. Attempts follow the
//! pool's [`BackoffPolicy`](crate::resilience::BackoffPolicy), with the delay
//! applied before every attempt, and stop as soon as the pool starts
//! destroying.
//!
//! At most one supervisor runs per worker id. The id stays in the revival
//! tracker until the supervisor task ends, however it ends.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::coordinator::PoolInner;
use super::error::PoolError;
use super::events::PoolEvent;
use crate::logging::{log_error, log_worker_lifecycle};
use crate::resilience::{retry_with_backoff, RetryOutcome};
use crate::worker::WorkerHandle;

/// Start supervising `worker_id` unless it is already being revived
///
/// Returns whether a new supervisor was started.
pub(crate) fn start(pool: &Arc<PoolInner>, worker_id: usize) -> bool {
    if pool.is_destroying() {
        return false;
    }
    if !pool.reviving.insert(worker_id) {
        debug!(worker_id, "Revival already in progress");
        return false;
    }

    let tracker = TrackerGuard {
        pool: Arc::clone(pool),
        worker_id,
    };
    tokio::spawn(async move {
        supervise(&tracker.pool, worker_id).await;
        drop(tracker);
    });
    true
}

/// Removes the id from the revival tracker on drop, including when the task is cancelled
struct TrackerGuard {
    pool: Arc<PoolInner>,
    worker_id: usize,
}

impl Drop for TrackerGuard {
    fn drop(&mut self) {
        self.pool.reviving.remove(&self.worker_id);
    }
}

async fn supervise(pool: &Arc<PoolInner>, worker_id: usize) {
    let policy = pool.config.backoff_policy();
    log_worker_lifecycle(worker_id, "reviving", None, None);

    let outcome = retry_with_backoff(
        &policy,
        || pool.is_destroying(),
        |_: &PoolError| !pool.is_destroying(),
        |attempt| attempt_revival(pool, worker_id, attempt),
    )
    .await;

    match outcome {
        RetryOutcome::Succeeded { attempts, .. } => {
            info!(worker_id, attempts, "✅ Worker revived");
            log_worker_lifecycle(worker_id, "revived", Some(attempts), None);
            pool.publish(PoolEvent::WorkerRevived {
                worker_id,
                attempts,
            });
        }
        RetryOutcome::Aborted { attempts } => {
            info!(worker_id, attempts, "Revival aborted, pool is being destroyed");
        }
        RetryOutcome::Exhausted {
            attempts,
            last_error,
        } => {
            let cause = last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempts made".to_string());
            error!(worker_id, attempts, cause = %cause, "❌ Worker revival exhausted, leaving it down");
            log_worker_lifecycle(worker_id, "permanently_down", Some(attempts), Some(&cause));
            pool.publish(PoolEvent::WorkerPermanentlyDown {
                worker_id,
                attempts,
            });
        }
    }
}

async fn attempt_revival(
    pool: &Arc<PoolInner>,
    worker_id: usize,
    attempt: u32,
) -> Result<(), PoolError> {
    debug!(worker_id, attempt, "Attempting worker revival");

    let handle = WorkerHandle::spawn(pool.script.as_ref(), worker_id).map_err(|e| {
        warn!(worker_id, attempt, error = %e, "Revival spawn failed");
        PoolError::from(e)
    })?;
    let handle = Arc::new(handle);

    if let Err(e) = replay_setup(pool, &handle).await {
        let context = format!("worker {worker_id}, attempt {attempt}");
        log_error("revival", "replay_setup", &e.to_string(), Some(context.as_str()));
        handle.terminate();
        return Err(e);
    }

    pool.install(handle)
}

/// Re-run the setup phases the pool has already been through
async fn replay_setup(pool: &PoolInner, handle: &WorkerHandle) -> Result<(), PoolError> {
    if let Some(params) = pool.init_params() {
        handle.init(&params).await?;
    }
    if let Some(params) = pool.bootstrap_params() {
        handle.bootstrap(&params).await?;
    }
    Ok(())
}
