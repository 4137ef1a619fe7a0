//! The error type shared by every SCU service in this crate.

use dicom_core::Tag;
use snafu::Snafu;

/// The coarse failure category used by the
/// `resilience` crate to decide whether an error is retryable and
/// whether it should count against a circuit breaker.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ErrorCategory {
    /// Transport-level failure: connect, read/write, timeout, ARTIM.
    Connection,
    /// Association rejected with a transient result.
    TransientRejection,
    /// Association rejected permanently, or aborted by the peer.
    PermanentRejection,
    /// Malformed or unexpected protocol data.
    Protocol,
    /// Caller-side misconfiguration; retrying would not help.
    Configuration,
    /// The operation completed but the DIMSE service reported failure.
    Application,
}

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("association error"))]
    Association { source: dcmnet_ul::association::Error },

    #[snafu(display("failed to encode DIMSE command"))]
    EncodeCommand { source: Box<dicom_object::WriteError> },

    #[snafu(display("failed to decode DIMSE command set"))]
    DecodeCommand { source: dcmnet_dimse::message::Error },

    #[snafu(display("failed to reassemble a DIMSE message"))]
    Reassemble { source: dcmnet_dimse::assembler::Error },

    #[snafu(display("failed to read DICOM file {path}"))]
    ReadFile {
        path: String,
        source: Box<dicom_object::ReadError>,
    },

    #[snafu(display("failed to write DICOM data set"))]
    WriteDataSet { source: Box<dicom_object::WriteError> },

    #[snafu(display("failed to read DICOM data set"))]
    ReadDataSet { source: dicom_object::ReadError },

    #[snafu(display("response is missing required element {tag:x?}"))]
    MissingElement { tag: Tag },

    #[snafu(display("transfer syntax {uid} is not registered"))]
    UnsupportedTransferSyntax { uid: String },

    #[snafu(display(
        "no presentation context was negotiated for abstract syntax {abstract_syntax}"
    ))]
    NoPresentationContext { abstract_syntax: String },

    #[snafu(display("invalid state: {message}"))]
    InvalidState { message: String },

    #[snafu(display("unexpected PDU `{pdu:?}` while awaiting a DIMSE response"))]
    UnexpectedPdu { pdu: dcmnet_ul::Pdu },

    #[snafu(display("C-ECHO failed with status {status:#06x}"))]
    EchoFailed { status: u16 },

    #[snafu(display("C-STORE failed with status {status:#06x}"))]
    StoreFailed { status: u16 },

    #[snafu(display("C-FIND failed with status {status:#06x}"))]
    QueryFailed { status: u16 },

    #[snafu(display("C-MOVE/C-GET failed with status {status:#06x}"))]
    RetrieveFailed { status: u16 },

    #[snafu(display("operation cancelled"))]
    Cancelled,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Association { source } => association_category(source),
            Error::EncodeCommand { .. }
            | Error::DecodeCommand { .. }
            | Error::Reassemble { .. }
            | Error::WriteDataSet { .. }
            | Error::ReadDataSet { .. }
            | Error::MissingElement { .. }
            | Error::UnexpectedPdu { .. } => ErrorCategory::Protocol,
            Error::ReadFile { .. }
            | Error::UnsupportedTransferSyntax { .. }
            | Error::NoPresentationContext { .. }
            | Error::InvalidState { .. } => ErrorCategory::Configuration,
            Error::EchoFailed { .. }
            | Error::StoreFailed { .. }
            | Error::QueryFailed { .. }
            | Error::RetrieveFailed { .. } => ErrorCategory::Application,
            Error::Cancelled => ErrorCategory::Application,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_failed_is_an_application_failure() {
        assert_eq!(
            Error::EchoFailed { status: 0xA700 }.category(),
            ErrorCategory::Application
        );
    }

    #[test]
    fn invalid_state_is_a_configuration_failure() {
        let error = Error::InvalidState {
            message: "cannot transcode".to_string(),
        };
        assert_eq!(error.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn permanent_rejection_is_distinguished_from_transient() {
        use dcmnet_ul::association::RejectedSnafu;
        use dcmnet_ul::pdu::{AssociationRJ, AssociationRJResult, AssociationRJSource, AssociationRJServiceUserReason};

        let permanent = AssociationRJ {
            result: AssociationRJResult::Permanent,
            source: AssociationRJSource::ServiceUser(AssociationRJServiceUserReason::CalledAETitleNotRecognized),
        };
        let error: dcmnet_ul::association::Error = RejectedSnafu {
            association_rj: permanent,
        }
        .build();
        assert_eq!(association_category(&error), ErrorCategory::PermanentRejection);

        let transient = AssociationRJ {
            result: AssociationRJResult::Transient,
            source: AssociationRJSource::ServiceUser(AssociationRJServiceUserReason::NoReasonGiven),
        };
        let error: dcmnet_ul::association::Error = RejectedSnafu {
            association_rj: transient,
        }
        .build();
        assert_eq!(association_category(&error), ErrorCategory::TransientRejection);
    }
}

fn association_category(source: &dcmnet_ul::association::Error) -> ErrorCategory {
    use dcmnet_ul::association::Error as AssocError;
    match source {
        AssocError::Connect { .. }
        | AssocError::SetReadTimeout { .. }
        | AssocError::SetWriteTimeout { .. }
        | AssocError::WireSend { .. }
        | AssocError::Receive { .. }
        | AssocError::Timeout { .. }
        | AssocError::Aborted => ErrorCategory::Connection,
        AssocError::Rejected { association_rj } => {
            if association_rj.result.is_permanent() {
                ErrorCategory::PermanentRejection
            } else {
                ErrorCategory::TransientRejection
            }
        }
        AssocError::MissingAbstractSyntax
        | AssocError::NoAcceptedPresentationContexts
        | AssocError::ProtocolVersionMismatch { .. } => ErrorCategory::Configuration,
        AssocError::SendPdu { .. }
        | AssocError::PduTooLarge { .. }
        | AssocError::UnexpectedPdu { .. }
        | AssocError::UnknownPdu { .. } => ErrorCategory::Protocol,
        // TLS negotiation failures and any future variant: transport-level.
        _ => ErrorCategory::Connection,
    }
}
