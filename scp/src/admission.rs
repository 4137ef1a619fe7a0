//! Admission control composing the built-in blacklist/whitelist/called-AE
//! checks with the application's [`StorageDelegate::should_accept_association`]
//! hook.

use std::net::SocketAddr;
use std::sync::Arc;

use dcmnet_ul::association::{AccessControl, AccessControlList};
use dcmnet_ul::pdu::{AssociationRJServiceUserReason, UserIdentity};

use crate::delegate::{AssociationInfo, StorageDelegate};

/// An [`AccessControl`] implementation that runs the configured
/// blacklist/whitelist/called-AE-title checks first, then defers to the
/// delegate's `should_accept_association` for anything those checks let
/// through.
pub struct Admission<D> {
    acl: AccessControlList,
    delegate: Arc<D>,
    peer_address: SocketAddr,
}

impl<D> Admission<D>
where
    D: StorageDelegate,
{
    pub fn new(acl: AccessControlList, delegate: Arc<D>, peer_address: SocketAddr) -> Self {
        Admission {
            acl,
            delegate,
            peer_address,
        }
    }
}

impl<D> AccessControl for Admission<D>
where
    D: StorageDelegate,
{
    fn check_access(
        &self,
        this_ae_title: &str,
        calling_ae_title: &str,
        called_ae_title: &str,
        user_identity: Option<&UserIdentity>,
    ) -> Result<(), AssociationRJServiceUserReason> {
        self.acl
            .check_access(this_ae_title, calling_ae_title, called_ae_title, user_identity)?;

        let info = AssociationInfo {
            calling_ae_title: calling_ae_title.to_string(),
            called_ae_title: called_ae_title.to_string(),
            peer_address: self.peer_address,
        };
        if self.delegate.should_accept_association(&info) {
            Ok(())
        } else {
            Err(AssociationRJServiceUserReason::NoReasonGiven)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegate::{ReceivedFile, StoreOutcome};
    use std::net::{IpAddr, Ipv4Addr};

    struct AlwaysAccept;
    impl StorageDelegate for AlwaysAccept {
        fn did_receive(&self, _file: ReceivedFile) -> StoreOutcome {
            StoreOutcome::Success
        }
    }

    struct RejectsByPeer {
        rejected_ae: &'static str,
    }
    impl StorageDelegate for RejectsByPeer {
        fn should_accept_association(&self, info: &AssociationInfo) -> bool {
            info.calling_ae_title != self.rejected_ae
        }
        fn did_receive(&self, _file: ReceivedFile) -> StoreOutcome {
            StoreOutcome::Success
        }
    }

    fn peer() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 11112)
    }

    #[test]
    fn acl_blacklist_rejects_before_delegate_is_consulted() {
        let acl = AccessControlList::new().blacklist("BAD_AE");
        let admission = Admission::new(acl, Arc::new(AlwaysAccept), peer());
        let result = admission.check_access("US", "BAD_AE", "US", None);
        assert_eq!(
            result,
            Err(AssociationRJServiceUserReason::CallingAETitleNotRecognized)
        );
    }

    #[test]
    fn delegate_hook_runs_after_acl_passes() {
        let acl = AccessControlList::new();
        let delegate = Arc::new(RejectsByPeer {
            rejected_ae: "BAD_AE",
        });
        let admission = Admission::new(acl, Arc::clone(&delegate), peer());
        assert_eq!(
            admission.check_access("US", "BAD_AE", "US", None),
            Err(AssociationRJServiceUserReason::NoReasonGiven)
        );
        assert_eq!(admission.check_access("US", "GOOD_AE", "US", None), Ok(()));
    }

    #[test]
    fn called_ae_mismatch_is_rejected_even_with_permissive_delegate() {
        let acl = AccessControlList::new();
        let admission = Admission::new(acl, Arc::new(AlwaysAccept), peer());
        let result = admission.check_access("US", "SCU", "WRONG", None);
        assert_eq!(
            result,
            Err(AssociationRJServiceUserReason::CalledAETitleNotRecognized)
        );
    }
}
