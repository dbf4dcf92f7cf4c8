#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Workpool
//!
//! Load-balanced pool of isolated worker units, reachable through a
//! message-based remote call protocol, with crash detection and supervised
//! revival.
//!
//! ## Architecture
//!
//! - **Remote calls** ([`rpc`]): a [`Remote`](rpc::Remote) stub turns property
//!   access, assignment, calls and construction into messages over a
//!   [`Port`](rpc::Port); the worker side answers them with [`rpc::serve`].
//! - **Load balancing** ([`load_balancer`]): per-worker active counts plus
//!   smoothed cpu, memory and response-time samples fold into one score.
//! - **Pool** ([`pool`]): routes calls to the lowest score, samples stats on a
//!   timer, and revives crashed workers with jittered exponential backoff.
//! - **Workers** ([`worker`]): how a unit is spawned and what the pool keeps
//!   for each one.
//!
//! ## Module Organization
//!
//! - [`config`] - Pool configuration and layered loading
//! - [`error`] - Crate-level error type
//! - [`logging`] - Structured logging setup
//! - [`resilience`] - Retry with backoff
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use serde_json::json;
//! use workpool::config::PoolConfig;
//! use workpool::pool::WorkerPool;
//! use workpool::rpc::{single_segment, Exposed, RemoteValue, Thrown, Transfer};
//! use workpool::worker::ThreadScript;
//!
//! struct Greeter;
//!
//! #[async_trait]
//! impl Exposed for Greeter {
//!     async fn apply(&self, path: &[String], args: Vec<RemoteValue>) -> Result<Transfer, Thrown> {
//!         match single_segment(path)? {
//!             "greet" => {
//!                 let name = args.first().and_then(RemoteValue::as_json).cloned();
//!                 Ok(json!({"hello": name}).into())
//!             }
//!             other => Err(Thrown::type_error(format!("unknown method `{other}`"))),
//!         }
//!     }
//! }
//!
//! # async fn example() -> workpool::Result<()> {
//! let pool = WorkerPool::new(ThreadScript::new("greeter", |_id| Greeter), PoolConfig::default())?;
//! let reply = pool.call("greet", vec![json!("world").into()]).await?;
//! println!("{:?}", reply.into_json());
//! pool.destroy().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod load_balancer;
pub mod logging;
pub mod pool;
pub mod resilience;
pub mod rpc;
pub mod worker;

pub use config::{ConfigManager, PoolConfig, RevivalConfig};
pub use error::{Result, WorkpoolError};
pub use load_balancer::{LoadBalancer, LoadWeights, Slot, StatsSample};
pub use pool::{PoolError, PoolEvent, PoolSnapshot, WorkerPool};
pub use rpc::{Exposed, Remote, RemoteError, RemoteValue, Thrown, Transfer};
pub use worker::{ThreadScript, WorkerScript};
