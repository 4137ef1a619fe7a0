//! # dcmnet
//!
//! This crate aggregates the DICOM network services crates in this
//! workspace under a single dependency.
//!
//! These modules are also available as standalone crates, which can be
//! depended on directly, in complement or as an alternative to this
//! one. They carry the `dcmnet-` prefix; for instance, the module
//! [`scp`] lives in the crate named `dcmnet-scp`.
//!
//! - [`ul`] provides the Upper Layer PDU codec and the association
//!   state machine underlying everything else here.
//! - [`dimse`] builds DIMSE command sets, fragmentation and
//!   reassembly, and status categorization on top of [`ul`].
//! - [`scu`] implements the service class user operations: C-ECHO,
//!   C-FIND, C-STORE, C-MOVE, C-GET.
//! - [`scp`] implements a concurrent, admission-controlled service
//!   class provider listener.
//! - [`pool`] keeps a FIFO-fair, health-checked pool of associations
//!   keyed by endpoint and AE title pair.
//! - [`resilience`] layers a retry executor, circuit breaker, and
//!   durable store-and-forward queue over any of the above.
//! - [`observability`] supplies the structured and audit logging sinks
//!   the other crates emit through.

pub use dcmnet_ul as ul;
pub use dcmnet_dimse as dimse;

#[cfg(feature = "scu")]
pub use dcmnet_scu as scu;

#[cfg(feature = "scp")]
pub use dcmnet_scp as scp;

#[cfg(feature = "pool")]
pub use dcmnet_pool as pool;

#[cfg(feature = "resilience")]
pub use dcmnet_resilience as resilience;

#[cfg(feature = "observability")]
pub use dcmnet_observability as observability;
