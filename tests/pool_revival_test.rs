//! Crash detection, supervised revival and shutdown interplay

mod common;

use common::{test_config, test_script, wait_until, within, FlakyScript, Recorder};
use futures::future::join_all;
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use workpool::config::PoolConfig;
use workpool::pool::{PoolError, PoolEvent, WorkerPool};
use workpool::rpc::RemoteError;
use workpool::worker::FaultKind;

const TIMEOUT: Duration = Duration::from_secs(5);

fn long_revival(size: usize) -> PoolConfig {
    let mut config = test_config(size);
    config.revival.max_attempts = 10_000;
    config
}

async fn next_event(events: &mut broadcast::Receiver<PoolEvent>) -> PoolEvent {
    within(TIMEOUT, events.recv()).await.expect("pool event")
}

async fn crash(pool: &WorkerPool, worker_id: usize) -> RemoteError {
    let remote = pool.remote(worker_id).expect("worker present before crash");
    within(TIMEOUT, remote.call("crash", vec![]))
        .await
        .expect_err("crash call cannot succeed")
}

#[tokio::test]
async fn test_crashed_worker_is_revived_with_stored_params() {
    let recorder = Arc::new(Recorder::default());
    let pool = WorkerPool::new(test_script(&recorder), test_config(3)).unwrap();
    within(TIMEOUT, pool.init(json!({"model": "small"}))).await.unwrap();
    within(TIMEOUT, pool.bootstrap(json!({"warm": true}))).await.unwrap();
    let mut events = pool.subscribe();

    let err = crash(&pool, 1).await;
    assert_eq!(err, RemoteError::ChannelClosed);

    match next_event(&mut events).await {
        PoolEvent::WorkerCrashed { worker_id, fault } => {
            assert_eq!(worker_id, 1);
            assert_eq!(fault.worker_id, 1);
            assert!(matches!(fault.kind, FaultKind::Transport | FaultKind::Closed));
        }
        other => panic!("expected a crash event, got {other:?}"),
    }
    match next_event(&mut events).await {
        PoolEvent::WorkerRevived {
            worker_id,
            attempts,
        } => {
            assert_eq!(worker_id, 1);
            assert_eq!(attempts, 1);
        }
        other => panic!("expected a revival event, got {other:?}"),
    }

    assert_eq!(pool.available_workers(), vec![0, 1, 2]);
    assert!(wait_until(TIMEOUT, || pool.reviving_workers().is_empty()).await);

    // init and bootstrap replayed to the fresh worker only.
    assert_eq!(recorder.inits_for(1), 2);
    assert_eq!(recorder.bootstraps_for(1), 2);
    assert_eq!(recorder.inits_for(0), 1);
    assert!(recorder
        .inits
        .lock()
        .iter()
        .all(|(_, params)| params == &json!({"model": "small"})));

    // The revived worker starts from a fresh load slot and serves calls.
    assert_eq!(pool.slot(1).unwrap().active, 0);
    let who = within(TIMEOUT, pool.remote(1).unwrap().call("whoami", vec![]))
        .await
        .unwrap();
    assert_eq!(who.into_json().unwrap(), json!(1));

    within(TIMEOUT, pool.destroy()).await;
}

#[tokio::test]
async fn test_revival_skips_phases_that_never_ran() {
    let recorder = Arc::new(Recorder::default());
    let pool = WorkerPool::new(test_script(&recorder), test_config(2)).unwrap();
    within(TIMEOUT, pool.init(json!({"only": "init"}))).await.unwrap();
    let mut events = pool.subscribe();

    crash(&pool, 0).await;
    assert!(matches!(next_event(&mut events).await, PoolEvent::WorkerCrashed { .. }));
    assert!(matches!(next_event(&mut events).await, PoolEvent::WorkerRevived { .. }));

    assert_eq!(recorder.inits_for(0), 2);
    assert_eq!(recorder.bootstraps_for(0), 0);

    within(TIMEOUT, pool.destroy()).await;
}

#[tokio::test]
async fn test_down_worker_receives_no_calls_until_revived() {
    let recorder = Arc::new(Recorder::default());
    let script = FlakyScript::new(test_script(&recorder));
    let failures = script.failures();
    let pool = WorkerPool::new(script, long_revival(3)).unwrap();
    let mut events = pool.subscribe();

    failures.lock().insert(1, u32::MAX);
    crash(&pool, 1).await;
    assert!(matches!(next_event(&mut events).await, PoolEvent::WorkerCrashed { worker_id: 1, .. }));

    assert_eq!(pool.available_workers(), vec![0, 2]);
    assert!(wait_until(TIMEOUT, || pool.reviving_workers() == vec![1]).await);
    assert!(pool.slot(1).is_none());
    assert!(pool.remote(1).is_none());

    let calls = (0..6).map(|_| {
        let pool = pool.clone();
        async move { pool.call("sleep", vec![json!(20).into()]).await }
    });
    let served: HashSet<u64> = within(TIMEOUT, join_all(calls))
        .await
        .into_iter()
        .map(|result| result.unwrap().into_json().unwrap().as_u64().unwrap())
        .collect();
    assert_eq!(served, HashSet::from([0, 2]));

    // A second revival of the same id is refused while one is running.
    assert!(!pool.restart_worker(1));
    assert!(!pool.restart_worker(0));
    assert_eq!(pool.reviving_workers(), vec![1]);

    failures.lock().insert(1, 0);
    assert!(matches!(next_event(&mut events).await, PoolEvent::WorkerRevived { worker_id: 1, .. }));
    assert_eq!(pool.available_workers(), vec![0, 1, 2]);

    within(TIMEOUT, pool.destroy()).await;
}

#[tokio::test]
async fn test_exhausted_revival_leaves_worker_down() {
    let recorder = Arc::new(Recorder::default());
    let script = FlakyScript::new(test_script(&recorder));
    let failures = script.failures();
    let mut config = test_config(2);
    config.revival.max_attempts = 3;
    let pool = WorkerPool::new(script, config).unwrap();
    let mut events = pool.subscribe();

    failures.lock().insert(0, u32::MAX);
    crash(&pool, 0).await;
    assert!(matches!(next_event(&mut events).await, PoolEvent::WorkerCrashed { worker_id: 0, .. }));
    assert_eq!(
        next_event(&mut events).await,
        PoolEvent::WorkerPermanentlyDown {
            worker_id: 0,
            attempts: 3
        }
    );

    assert!(wait_until(TIMEOUT, || pool.reviving_workers().is_empty()).await);
    assert_eq!(pool.available_workers(), vec![1]);

    // An explicit restart brings it back once spawning works again.
    failures.lock().insert(0, 0);
    assert!(pool.restart_worker(0));
    assert!(matches!(next_event(&mut events).await, PoolEvent::WorkerRevived { worker_id: 0, .. }));
    assert_eq!(pool.available_workers(), vec![0, 1]);

    within(TIMEOUT, pool.destroy()).await;
}

#[tokio::test]
async fn test_no_available_workers_when_all_are_down() {
    let recorder = Arc::new(Recorder::default());
    let script = FlakyScript::new(test_script(&recorder));
    let failures = script.failures();
    let pool = WorkerPool::new(script, long_revival(1)).unwrap();
    let mut events = pool.subscribe();

    failures.lock().insert(0, u32::MAX);
    crash(&pool, 0).await;
    assert!(matches!(next_event(&mut events).await, PoolEvent::WorkerCrashed { .. }));

    let err = pool.call("whoami", vec![]).await.unwrap_err();
    assert_eq!(err, PoolError::NoAvailableWorkers);
    assert!(err.is_capacity());

    within(TIMEOUT, pool.destroy()).await;
}

#[tokio::test]
async fn test_destroy_aborts_revival_and_stays_silent() {
    let recorder = Arc::new(Recorder::default());
    let script = FlakyScript::new(test_script(&recorder));
    let failures = script.failures();
    let spawns = Arc::clone(&script.spawns);
    let pool = WorkerPool::new(script, long_revival(2)).unwrap();
    let mut events = pool.subscribe();

    failures.lock().insert(1, u32::MAX);
    crash(&pool, 1).await;
    assert!(matches!(next_event(&mut events).await, PoolEvent::WorkerCrashed { .. }));
    assert!(wait_until(TIMEOUT, || spawns.load(Ordering::SeqCst) > 4).await);

    within(TIMEOUT, pool.destroy()).await;
    assert_eq!(next_event(&mut events).await, PoolEvent::PoolDestroyed);
    assert!(wait_until(TIMEOUT, || pool.reviving_workers().is_empty()).await);

    // Spawning would now succeed, yet nothing comes back to life.
    failures.lock().insert(1, 0);
    let settled = spawns.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(spawns.load(Ordering::SeqCst), settled);
    assert!(events.try_recv().is_err());
    assert!(pool.available_workers().is_empty());

    let mut destroyed = recorder.destroys.lock().clone();
    destroyed.sort_unstable();
    assert_eq!(destroyed, vec![0]);
}

#[tokio::test]
async fn test_thrown_errors_do_not_crash_workers() {
    let recorder = Arc::new(Recorder::default());
    let pool = WorkerPool::new(test_script(&recorder), test_config(1)).unwrap();
    let mut events = pool.subscribe();

    for _ in 0..3 {
        let err = within(TIMEOUT, pool.call("throwValue", vec![json!("boom").into()]))
            .await
            .unwrap_err();
        assert!(!err.is_capacity());
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events.try_recv().is_err());
    assert_eq!(pool.available_workers(), vec![0]);

    within(TIMEOUT, pool.destroy()).await;
}
