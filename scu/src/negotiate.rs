//! Shared presentation-context lookup used by every SCU service: the
//! upper layer only guarantees that *some* proposed context was
//! accepted, so each service must still confirm that the specific
//! abstract syntax it needs was among them.

use dcmnet_ul::association::Association;
use dcmnet_ul::pdu::PresentationContextNegotiated;
use snafu::OptionExt;

use crate::error::{NoPresentationContextSnafu, Result};

/// Look up the presentation context accepted for `abstract_syntax_uid`,
/// failing with [`crate::error::Error::NoPresentationContext`] if it
/// was not proposed, or was proposed but rejected.
pub fn accepted_context(
    association: &impl Association,
    abstract_syntax_uid: &str,
) -> Result<PresentationContextNegotiated> {
    association
        .presentation_contexts()
        .iter()
        .find(|pc| pc.abstract_syntax == abstract_syntax_uid && pc.result.is_acceptance())
        .cloned()
        .context(NoPresentationContextSnafu {
            abstract_syntax: abstract_syntax_uid,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcmnet_ul::pdu::{PresentationContextResultReason, UserVariableItem};

    struct MockAssociation {
        contexts: Vec<PresentationContextNegotiated>,
    }

    impl Association for MockAssociation {
        fn presentation_contexts(&self) -> &[PresentationContextNegotiated] {
            &self.contexts
        }
        fn acceptor_max_pdu_length(&self) -> u32 {
            16384
        }
        fn requestor_max_pdu_length(&self) -> u32 {
            16384
        }
        fn peer_ae_title(&self) -> &str {
            "PEER"
        }
        fn user_variables(&self) -> &[UserVariableItem] {
            &[]
        }
    }

    fn context(abstract_syntax: &str, result: PresentationContextResultReason) -> PresentationContextNegotiated {
        PresentationContextNegotiated {
            id: 1,
            abstract_syntax: abstract_syntax.to_string(),
            transfer_syntax: "1.2.840.10008.1.2".to_string(),
            result,
        }
    }

    #[test]
    fn finds_an_accepted_context_by_abstract_syntax() {
        let association = MockAssociation {
            contexts: vec![context("1.2.840.10008.1.1", PresentationContextResultReason::Acceptance)],
        };
        let found = accepted_context(&association, "1.2.840.10008.1.1").unwrap();
        assert_eq!(found.abstract_syntax, "1.2.840.10008.1.1");
    }

    #[test]
    fn rejects_when_abstract_syntax_was_not_proposed() {
        let association = MockAssociation { contexts: vec![] };
        assert!(accepted_context(&association, "1.2.840.10008.1.1").is_err());
    }

    #[test]
    fn rejects_when_proposed_but_not_accepted() {
        let association = MockAssociation {
            contexts: vec![context(
                "1.2.840.10008.1.1",
                PresentationContextResultReason::AbstractSyntaxNotSupported,
            )],
        };
        assert!(accepted_context(&association, "1.2.840.10008.1.1").is_err());
    }
}
