//! # Worker Handle
//!
//! Owns one worker unit: its remote stub, its native handle and a merged
//! stream of infrastructure faults. Handles are replaced wholesale on revival;
//! each carries an `instance` id so late faults from a replaced unit can be
//! told apart from faults of the current one.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::script::{NativeEvent, NativeHandle, SpawnError, WorkerScript};
use crate::rpc::channel::ChannelFault;
use crate::rpc::error::RemoteError;
use crate::rpc::remote::Remote;

/// Worker method names the pool relies on
pub const INIT_METHOD: &str = "init";
pub const BOOTSTRAP_METHOD: &str = "bootstrap";
pub const GET_STATS_METHOD: &str = "getStats";
pub const DESTROY_METHOD: &str = "destroy";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Transport-level error, including a worker unit failing
    Transport,
    /// Malformed or undecodable message
    MessageError,
    /// Unexpected closure or exit
    Closed,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultKind::Transport => f.write_str("transport_error"),
            FaultKind::MessageError => f.write_str("message_error"),
            FaultKind::Closed => f.write_str("closed"),
        }
    }
}

/// Infrastructure failure of one worker, with its id and cause
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerFault {
    pub worker_id: usize,
    pub kind: FaultKind,
    pub cause: String,
}

impl fmt::Display for WorkerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker {} {}: {}", self.worker_id, self.kind, self.cause)
    }
}

/// Sample returned by a worker's `getStats`
///
/// `cpu` may be a 0-1 fraction or a 0-100 percentage; `memory` is in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkerStats {
    pub cpu: f64,
    pub memory: f64,
}

pub struct WorkerHandle {
    id: usize,
    instance: Uuid,
    remote: Remote,
    native: Box<dyn NativeHandle>,
    terminated: Arc<AtomicBool>,
    spawned_at: DateTime<Utc>,
    faults: Mutex<Option<mpsc::UnboundedReceiver<WorkerFault>>>,
}

impl WorkerHandle {
    /// Spawn worker `id` from `script`
    ///
    /// Must be called inside a tokio runtime: the channel reader and the fault
    /// forwarder run as tasks on it.
    pub fn spawn(script: &dyn WorkerScript, id: usize) -> Result<Self, SpawnError> {
        let unit = script.spawn(id)?;

        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        let remote = Remote::open_with_faults(unit.port, channel_tx);

        let (faults_tx, faults_rx) = mpsc::unbounded_channel();
        let terminated = Arc::new(AtomicBool::new(false));
        tokio::spawn(forward_faults(
            id,
            channel_rx,
            unit.events,
            faults_tx,
            Arc::clone(&terminated),
        ));

        let handle = Self {
            id,
            instance: Uuid::new_v4(),
            remote,
            native: unit.native,
            terminated,
            spawned_at: Utc::now(),
            faults: Mutex::new(Some(faults_rx)),
        };
        debug!(worker_id = id, instance = %handle.instance, script = script.name(), "Worker handle spawned");
        Ok(handle)
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Identity of this particular spawn of worker `id`
    pub fn instance(&self) -> Uuid {
        self.instance
    }

    pub fn remote(&self) -> &Remote {
        &self.remote
    }

    pub fn spawned_at(&self) -> DateTime<Utc> {
        self.spawned_at
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Take the fault stream; only the first caller gets it
    pub fn take_faults(&self) -> Option<mpsc::UnboundedReceiver<WorkerFault>> {
        self.faults.lock().take()
    }

    pub async fn init(&self, params: &Value) -> Result<(), RemoteError> {
        self.remote
            .call(INIT_METHOD, vec![json!(self.id).into(), params.clone().into()])
            .await
            .map(|_| ())
    }

    pub async fn bootstrap(&self, params: &Value) -> Result<(), RemoteError> {
        self.remote
            .call(BOOTSTRAP_METHOD, vec![params.clone().into()])
            .await
            .map(|_| ())
    }

    pub async fn get_stats(&self) -> Result<WorkerStats, RemoteError> {
        let value = self
            .remote
            .call(GET_STATS_METHOD, vec![])
            .await?
            .into_json()?;
        serde_json::from_value(value)
            .map_err(|e| RemoteError::decode(format!("invalid stats sample: {e}")))
    }

    /// Run the worker's own `destroy` hook
    pub async fn destroy(&self) -> Result<(), RemoteError> {
        self.remote
            .call(DESTROY_METHOD, vec![])
            .await
            .map(|_| ())
    }

    /// Stop the native unit without talking to it; later faults are suppressed
    pub fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
        self.native.terminate();
    }

    /// Graceful teardown: `destroy` hook, explicit release, then terminate
    ///
    /// Every step runs even if an earlier one fails; the first error is returned.
    pub async fn shutdown(&self) -> Result<(), RemoteError> {
        self.terminated.store(true, Ordering::SeqCst);

        let destroyed = self.destroy().await;
        let released = self.remote.release().await;
        self.native.terminate();

        destroyed.and(released)
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("instance", &self.instance)
            .field("terminated", &self.is_terminated())
            .field("spawned_at", &self.spawned_at)
            .finish()
    }
}

async fn forward_faults(
    worker_id: usize,
    mut channel: mpsc::UnboundedReceiver<ChannelFault>,
    mut native: mpsc::UnboundedReceiver<NativeEvent>,
    faults: mpsc::UnboundedSender<WorkerFault>,
    terminated: Arc<AtomicBool>,
) {
    loop {
        let fault = tokio::select! {
            Some(fault) = channel.recv() => channel_fault(worker_id, fault),
            Some(event) = native.recv() => native_fault(worker_id, event),
            else => break,
        };

        if terminated.load(Ordering::SeqCst) {
            debug!(worker_id, fault = %fault, "Fault after terminate suppressed");
            continue;
        }
        if faults.send(fault).is_err() {
            break;
        }
    }
}

fn channel_fault(worker_id: usize, fault: ChannelFault) -> WorkerFault {
    let (kind, cause) = match fault {
        ChannelFault::Transport(cause) => (FaultKind::Transport, cause),
        ChannelFault::MessageError(cause) => (FaultKind::MessageError, cause),
        ChannelFault::Closed => (FaultKind::Closed, "channel closed unexpectedly".to_string()),
    };
    WorkerFault {
        worker_id,
        kind,
        cause,
    }
}

fn native_fault(worker_id: usize, event: NativeEvent) -> WorkerFault {
    let (kind, cause) = match event {
        NativeEvent::Error(cause) => (FaultKind::Transport, cause),
        NativeEvent::Exit { clean: true } => (FaultKind::Closed, "worker exited".to_string()),
        NativeEvent::Exit { clean: false } => {
            (FaultKind::Closed, "worker exited unexpectedly".to_string())
        }
    };
    WorkerFault {
        worker_id,
        kind,
        cause,
    }
}
