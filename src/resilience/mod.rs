//! # Resilience Module
//!
//! Retry primitives used by the pool's revival supervisor.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use workpool::resilience::{retry_with_backoff, BackoffPolicy, RetryOutcome};
//!
//! # async fn example() {
//! let policy = BackoffPolicy::default();
//! let outcome = retry_with_backoff(
//!     &policy,
//!     || false,
//!     |_: &String| true,
//!     |attempt| async move {
//!         if attempt < 2 { Err(format!("attempt {attempt} failed")) } else { Ok(attempt) }
//!     },
//! )
//! .await;
//! assert!(matches!(outcome, RetryOutcome::Succeeded { value: 2, .. }));
//! # }
//! ```

pub mod backoff;

pub use backoff::{full_jitter, retry_with_backoff, BackoffPolicy, RetryOutcome};
