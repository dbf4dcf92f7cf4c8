//! Worker scripts: how a worker unit is started
//!
//! A [`WorkerScript`] is the pool's reference to worker code. Spawning one
//! yields a [`WorkerUnit`]: the caller end of a port to the worker's exposed
//! object, a native handle to stop it, and a stream of native lifecycle events.

use parking_lot::Mutex;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::rpc::expose::{panic_message, serve_until, Exposed, ServeExit};
use crate::rpc::port::{port_pair, Port};

/// Native lifecycle event raised by a worker unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeEvent {
    /// The worker failed (panic, runtime failure, fatal serve error)
    Error(String),
    /// The worker stopped
    Exit { clean: bool },
}

/// Errors starting a worker unit
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpawnError {
    #[error("Failed to start thread for worker {worker_id}: {message}")]
    Thread { worker_id: usize, message: String },

    #[error("Worker {worker_id} rejected by script: {reason}")]
    Rejected { worker_id: usize, reason: String },
}

/// Control over the underlying thread or process
pub trait NativeHandle: Send + Sync {
    /// Ask the unit to stop. Cooperative; returns immediately.
    fn terminate(&self);

    fn is_finished(&self) -> bool;
}

/// A freshly spawned worker unit
pub struct WorkerUnit {
    pub port: Port,
    pub native: Box<dyn NativeHandle>,
    pub events: mpsc::UnboundedReceiver<NativeEvent>,
}

impl fmt::Debug for WorkerUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerUnit")
            .field("port", &self.port)
            .field("finished", &self.native.is_finished())
            .finish()
    }
}

/// Reference to spawnable worker code
pub trait WorkerScript: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn spawn(&self, id: usize) -> Result<WorkerUnit, SpawnError>;
}

type Factory = dyn Fn(usize) -> Arc<dyn Exposed> + Send + Sync;

/// Runs each worker on a dedicated OS thread with its own current-thread runtime
///
/// The factory is called on the worker thread, so the exposed object never
/// leaves it.
#[derive(Clone)]
pub struct ThreadScript {
    name: String,
    factory: Arc<Factory>,
}

impl ThreadScript {
    pub fn new<F, E>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(usize) -> E + Send + Sync + 'static,
        E: Exposed + 'static,
    {
        Self {
            name: name.into(),
            factory: Arc::new(move |id| Arc::new(factory(id)) as Arc<dyn Exposed>),
        }
    }
}

impl fmt::Debug for ThreadScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadScript")
            .field("name", &self.name)
            .finish()
    }
}

impl WorkerScript for ThreadScript {
    fn name(&self) -> &str {
        &self.name
    }

    fn spawn(&self, id: usize) -> Result<WorkerUnit, SpawnError> {
        let (caller, responder) = port_pair();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let factory = Arc::clone(&self.factory);
        let thread_name = format!("{}-{}", self.name, id);

        let thread = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let event = run_worker(id, factory, responder, shutdown_rx);
                debug!(worker_id = id, ?event, "Worker thread finished");
                let _ = events_tx.send(event);
            })
            .map_err(|e| SpawnError::Thread {
                worker_id: id,
                message: e.to_string(),
            })?;

        debug!(worker_id = id, thread = %thread_name, "Worker thread started");

        Ok(WorkerUnit {
            port: caller,
            native: Box::new(ThreadHandle {
                shutdown: Mutex::new(Some(shutdown_tx)),
                thread: Mutex::new(Some(thread)),
            }),
            events: events_rx,
        })
    }
}

fn run_worker(
    id: usize,
    factory: Arc<Factory>,
    port: Port,
    shutdown: oneshot::Receiver<()>,
) -> NativeEvent {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(worker_id = id, error = %e, "Failed to build worker runtime");
            return NativeEvent::Error(format!("failed to build worker runtime: {e}"));
        }
    };

    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
        runtime.block_on(async move {
            let root = factory(id);
            // Resolves on terminate and when the handle is dropped.
            let stop = async move {
                let _ = shutdown.await;
            };
            serve_until(root, port, stop).await
        })
    }));

    match outcome {
        Ok(Ok(ServeExit::Released | ServeExit::Shutdown)) => NativeEvent::Exit { clean: true },
        Ok(Ok(ServeExit::Disconnected)) => NativeEvent::Exit { clean: false },
        Ok(Err(e)) => NativeEvent::Error(e.to_string()),
        Err(payload) => NativeEvent::Error(format!("worker panicked: {}", panic_message(payload))),
    }
}

struct ThreadHandle {
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl NativeHandle for ThreadHandle {
    fn terminate(&self) {
        if let Some(shutdown) = self.shutdown.lock().take() {
            let _ = shutdown.send(());
        }
    }

    fn is_finished(&self) -> bool {
        self.thread
            .lock()
            .as_ref()
            .map(JoinHandle::is_finished)
            .unwrap_or(true)
    }
}
