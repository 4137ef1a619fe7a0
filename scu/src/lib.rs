//! Service-class-user implementations for the DICOM Message Exchange
//! protocol, built atop the association engine in `dcmnet-ul` and the
//! command-set codec in `dcmnet-dimse`.
//!
//! Each service is a free function (or a pair, for C-STORE's single
//! and batch forms) that opens its own association, runs the DIMSE
//! exchange to completion, and releases. None of them retry, pool
//! connections, or persist state across calls; that belongs to the
//! `dcmnet-resilience` and `dcmnet-pool` crates layered on top.

pub mod c_move;
pub mod echo;
pub mod error;
pub mod find;
pub mod get;
pub mod negotiate;
pub mod store;
pub mod transport;

pub use c_move::{move_instances, MoveEvent, MoveProgress};
pub use echo::{echo, EchoResult};
pub use error::{Error, ErrorCategory, Result};
pub use find::{find, InformationModel};
pub use get::{get, GetEvent, GetProgress};
pub use store::{store_batch, store_file, BatchStoreOptions, StoreEvent, StoreResult};
