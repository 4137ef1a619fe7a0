//! Service-class-provider support for the DICOM Message Exchange
//! protocol: a concurrent association listener built atop the
//! acceptor side of `dcmnet-ul`'s association engine, dispatching
//! each negotiated association's DIMSE traffic to an application
//! supplied [`StorageDelegate`].
//!
//! The listener itself only negotiates associations and reassembles
//! messages; it has no opinion on storage layout beyond the
//! [`FileSystemStorage`] reference implementation. Applications that
//! need their own persistence, routing, or admission policy implement
//! [`StorageDelegate`] directly.

pub mod admission;
pub mod delegate;
pub mod dispatch;
pub mod error;
pub mod listener;
pub mod storage;

pub use delegate::{AssociationInfo, ReceivedFile, StorageDelegate, StoreOutcome};
pub use error::{Error, ErrorCategory, Result};
pub use listener::ScpListener;
pub use storage::{FileSystemStorage, Layout};
