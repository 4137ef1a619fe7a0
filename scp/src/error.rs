//! The error type shared by the listener and dispatch loop.

use snafu::Snafu;

/// The coarse failure category mirroring
/// `dcmnet_scu::error::ErrorCategory` for the acceptor side.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ErrorCategory {
    Connection,
    Protocol,
    Configuration,
}

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("failed to bind listener on {address}"))]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[snafu(display("association negotiation failed"))]
    Association { source: dcmnet_ul::association::Error },

    #[snafu(display("failed to reassemble a DIMSE message"))]
    Reassemble { source: dcmnet_dimse::assembler::Error },

    #[snafu(display("failed to decode an incoming data set"))]
    DecodeDataSet { source: dicom_object::ReadError },

    #[snafu(display("failed to encode a DIMSE response"))]
    EncodeCommand { source: Box<dicom_object::WriteError> },

    #[snafu(display("failed to write a received data set to {path}"))]
    WriteFile {
        path: String,
        source: Box<dicom_object::WriteError>,
    },

    #[snafu(display("failed to create storage directory {path}"))]
    CreateDir {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("response is missing required element"))]
    MissingElement,

    #[snafu(display("transfer syntax {uid} is not registered"))]
    UnsupportedTransferSyntax { uid: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Bind { .. } => ErrorCategory::Connection,
            Error::Association { .. } => ErrorCategory::Connection,
            Error::Reassemble { .. } | Error::MissingElement | Error::EncodeCommand { .. } => {
                ErrorCategory::Protocol
            }
            Error::DecodeDataSet { .. }
            | Error::WriteFile { .. }
            | Error::CreateDir { .. }
            | Error::UnsupportedTransferSyntax { .. } => ErrorCategory::Configuration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_element_is_a_protocol_failure() {
        assert_eq!(Error::MissingElement.category(), ErrorCategory::Protocol);
    }

    #[test]
    fn unsupported_transfer_syntax_is_a_configuration_failure() {
        let error = Error::UnsupportedTransferSyntax {
            uid: "1.2.3".to_string(),
        };
        assert_eq!(error.category(), ErrorCategory::Configuration);
    }
}
