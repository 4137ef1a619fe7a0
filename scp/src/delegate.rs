//! The hooks an application plugs into the listener to decide which
//! associations and files it wants, grounded on the `storescp` binary's
//! callback shape.

use dicom_object::InMemDicomObject;

/// Facts about an incoming association request, known before
/// negotiation decides whether to accept it.
#[derive(Debug, Clone)]
pub struct AssociationInfo {
    pub calling_ae_title: String,
    pub called_ae_title: String,
    pub peer_address: std::net::SocketAddr,
}

/// A single C-STORE-RQ's data set as handed to the delegate after a
/// successful reassembly.
#[derive(Debug, Clone)]
pub struct ReceivedFile {
    pub sop_class_uid: String,
    pub sop_instance_uid: String,
    pub transfer_syntax_uid: String,
    pub calling_ae_title: String,
    pub data_set: InMemDicomObject,
}

/// The delegate's verdict for a received file, driving the C-STORE-RSP
/// status sent back.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum StoreOutcome {
    Success,
    ProcessingFailure,
}

/// Application-supplied policy for an [`crate::listener::ScpListener`].
///
/// Every method has a permissive default so a minimal delegate (e.g.
/// one that only overrides `did_receive`) compiles without boilerplate.
pub trait StorageDelegate: Send + Sync {
    /// Final admission check, invoked after the built-in blacklist /
    /// whitelist / called-AE checks pass.
    fn should_accept_association(&self, _info: &AssociationInfo) -> bool {
        true
    }

    /// Whether this node is willing to receive the named SOP instance,
    /// checked before the data set is fully reassembled.
    fn will_receive(&self, _sop_class_uid: &str, _sop_instance_uid: &str) -> bool {
        true
    }

    /// Persist (or otherwise process) a fully received file.
    fn did_receive(&self, file: ReceivedFile) -> StoreOutcome;
}
