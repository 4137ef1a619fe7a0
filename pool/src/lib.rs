//! Association pooling: a FIFO-fair, health-checked cache of
//! established associations keyed by (host, port, AE-title pair), so
//! that repeated operations against the same peer reuse a connection
//! instead of renegotiating one every time.

pub mod config;
pub mod connection;
pub mod error;
mod pool;

pub use config::{PoolConfig, PoolKey};
pub use connection::PooledConnection;
pub use error::{Error, Result};
pub use pool::{ConnectionPool, Lease};
