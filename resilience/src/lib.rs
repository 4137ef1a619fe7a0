//! Resilience primitives layered on top of the SCU/pool crates: a
//! policy-driven retry executor, a per-endpoint circuit breaker, and a
//! durable store-and-forward queue for operations that must survive a
//! restart.
//!
//! None of these know about DICOM specifically — they operate on
//! caller-supplied thunks and payload bytes — which keeps them usable
//! from the SCU services, the pool, or an application's own code.

pub mod breaker;
pub mod category;
pub mod queue;
pub mod retry;

pub use breaker::{BreakerConfig, CircuitBreaker};
pub use category::ErrorCategory;
pub use queue::{ItemStatus, Priority, QueueStatus, QueuedItem, SendOutcome, StoreForwardQueue};
pub use retry::{BackoffStrategy, RetryError, RetryPolicy, execute};
