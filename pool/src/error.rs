//! The error type returned by pool acquisition and maintenance.

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("failed to establish a new pooled association to {host}:{port}"))]
    Connect {
        host: String,
        port: u16,
        source: dcmnet_ul::association::Error,
    },

    #[snafu(display("no connection became available within the acquire timeout"))]
    PoolExhausted,

    #[snafu(display("the pool was shut down while this acquire was waiting"))]
    PoolShutdown,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
