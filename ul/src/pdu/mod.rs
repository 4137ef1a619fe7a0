//! Protocol data unit types for the DICOM upper layer protocol.
//!
//! This module defines the PDU structures exchanged over the wire
//! (PS3.8 Section 9.3) together with the [`reader`] and [`writer`]
//! sub-modules which turn them into bytes and back.

pub mod reader;
pub mod writer;

#[cfg(test)]
mod test;

pub use reader::{
    read_pdu, Error as ReadError, DEFAULT_MAX_PDU, MAXIMUM_PDU_SIZE, MINIMUM_PDU_SIZE,
    PDU_HEADER_SIZE,
};
pub use writer::{write_pdu, Error as WriteError};

/// Read buffers are pre-allocated up to this size so that negotiation
/// (which may exchange PDUs larger than the eventually negotiated
/// maximum) does not need to reallocate on the first message.
pub const LARGE_PDU_SIZE: u32 = 1 << 20;

/// Parse the fixed 6-byte PDU header (PS3.8 Section 9.3): a 1-byte PDU
/// type, a reserved byte, and a 4-byte big-endian body length.
///
/// This lets a framed transport peek at the declared body length before
/// committing to read (and allocate for) the rest of the PDU.
pub fn read_header(header: &[u8; 6]) -> (u8, u32) {
    let pdu_type = header[0];
    let body_length = u32::from_be_bytes([header[2], header[3], header[4], header[5]]);
    (pdu_type, body_length)
}

/// An A-ASSOCIATE-RQ PDU: the first message sent by the requestor of an
/// association.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct AssociationRQ {
    pub protocol_version: u16,
    pub calling_ae_title: String,
    pub called_ae_title: String,
    pub application_context_name: String,
    pub presentation_contexts: Vec<PresentationContextProposed>,
    pub user_variables: Vec<UserVariableItem>,
}

/// An A-ASSOCIATE-AC PDU: sent by the acceptor in response to a successful
/// negotiation.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct AssociationAC {
    pub protocol_version: u16,
    pub application_context_name: String,
    pub presentation_contexts: Vec<PresentationContextResult>,
    pub calling_ae_title: String,
    pub called_ae_title: String,
    pub user_variables: Vec<UserVariableItem>,
}

/// An A-ASSOCIATE-RJ PDU: sent by the acceptor (or an intermediate
/// provider) to reject the proposed association.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct AssociationRJ {
    pub result: AssociationRJResult,
    pub source: AssociationRJSource,
}

#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum AssociationRJResult {
    Permanent,
    Transient,
}

impl AssociationRJResult {
    pub fn from(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(AssociationRJResult::Permanent),
            0x02 => Some(AssociationRJResult::Transient),
            _ => None,
        }
    }

    /// Whether a retry against the same peer and parameters is pointless.
    pub fn is_permanent(self) -> bool {
        matches!(self, AssociationRJResult::Permanent)
    }
}

#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum AssociationRJSource {
    ServiceUser(AssociationRJServiceUserReason),
    ServiceProviderASCE(AssociationRJServiceProviderASCEReason),
    ServiceProviderPresentation(AssociationRJServiceProviderPresentationReason),
}

impl AssociationRJSource {
    pub fn from(source: u8, reason: u8) -> Option<Self> {
        match source {
            0x01 => Some(AssociationRJSource::ServiceUser(match reason {
                0x01 => AssociationRJServiceUserReason::NoReasonGiven,
                0x02 => AssociationRJServiceUserReason::ApplicationContextNameNotSupported,
                0x03 => AssociationRJServiceUserReason::CallingAETitleNotRecognized,
                0x07 => AssociationRJServiceUserReason::CalledAETitleNotRecognized,
                other => AssociationRJServiceUserReason::Reserved(other),
            })),
            0x02 => Some(AssociationRJSource::ServiceProviderASCE(match reason {
                0x02 => AssociationRJServiceProviderASCEReason::ProtocolVersionNotSupported,
                _ => AssociationRJServiceProviderASCEReason::NoReasonGiven,
            })),
            0x03 => Some(AssociationRJSource::ServiceProviderPresentation(
                match reason {
                    0x01 => AssociationRJServiceProviderPresentationReason::TemporaryCongestion,
                    0x02 => AssociationRJServiceProviderPresentationReason::LocalLimitExceeded,
                    other => AssociationRJServiceProviderPresentationReason::Reserved(other),
                },
            )),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum AssociationRJServiceUserReason {
    NoReasonGiven,
    ApplicationContextNameNotSupported,
    CallingAETitleNotRecognized,
    CalledAETitleNotRecognized,
    Reserved(u8),
}

#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum AssociationRJServiceProviderASCEReason {
    NoReasonGiven,
    ProtocolVersionNotSupported,
}

#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum AssociationRJServiceProviderPresentationReason {
    TemporaryCongestion,
    LocalLimitExceeded,
    Reserved(u8),
}

/// A presentation context as proposed by the association requestor: one
/// abstract syntax with an ordered list of candidate transfer syntaxes.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct PresentationContextProposed {
    pub id: u8,
    pub abstract_syntax: String,
    pub transfer_syntaxes: Vec<String>,
}

/// A presentation context as returned by the acceptor: the result of
/// negotiation, with the single chosen transfer syntax significant only
/// when the context was accepted.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct PresentationContextResult {
    pub id: u8,
    pub reason: PresentationContextResultReason,
    pub transfer_syntax: String,
}

#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum PresentationContextResultReason {
    Acceptance = 0,
    UserRejection = 1,
    NoReason = 2,
    AbstractSyntaxNotSupported = 3,
    TransferSyntaxesNotSupported = 4,
}

impl PresentationContextResultReason {
    pub fn from(value: u8) -> Option<Self> {
        Some(match value {
            0 => PresentationContextResultReason::Acceptance,
            1 => PresentationContextResultReason::UserRejection,
            2 => PresentationContextResultReason::NoReason,
            3 => PresentationContextResultReason::AbstractSyntaxNotSupported,
            4 => PresentationContextResultReason::TransferSyntaxesNotSupported,
            _ => return None,
        })
    }

    pub fn is_acceptance(&self) -> bool {
        matches!(self, PresentationContextResultReason::Acceptance)
    }
}

/// A presentation context negotiated during association establishment, as
/// seen by either peer once the association reaches the `Established`
/// state.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct PresentationContextNegotiated {
    pub id: u8,
    pub abstract_syntax: String,
    pub transfer_syntax: String,
    pub result: PresentationContextResultReason,
}

/// One fragment of a P-DATA-TF PDU.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct PDataValue {
    pub presentation_context_id: u8,
    pub value_type: PDataValueType,
    pub is_last: bool,
    pub data: Vec<u8>,
}

#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum PDataValueType {
    Command,
    Data,
}

#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum AbortRQSource {
    ServiceUser,
    ServiceProvider(AbortRQServiceProviderReason),
    Reserved,
}

#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum AbortRQServiceProviderReason {
    ReasonNotSpecified,
    UnrecognizedPdu,
    UnexpectedPdu,
    Reserved,
    UnrecognizedPduParameter,
    UnexpectedPduParameter,
    InvalidPduParameter,
}

impl AbortRQSource {
    pub fn from(source: u8, reason: u8) -> Option<Self> {
        match source {
            0x00 => Some(AbortRQSource::ServiceUser),
            0x01 => Some(AbortRQSource::Reserved),
            0x02 => Some(AbortRQSource::ServiceProvider(match reason {
                0x00 => AbortRQServiceProviderReason::ReasonNotSpecified,
                0x01 => AbortRQServiceProviderReason::UnrecognizedPdu,
                0x02 => AbortRQServiceProviderReason::UnexpectedPdu,
                0x04 => AbortRQServiceProviderReason::UnrecognizedPduParameter,
                0x05 => AbortRQServiceProviderReason::UnexpectedPduParameter,
                0x06 => AbortRQServiceProviderReason::InvalidPduParameter,
                _ => AbortRQServiceProviderReason::Reserved,
            })),
            _ => None,
        }
    }
}

/// A sub-item parsed out of a variable-length field of an association PDU.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum PduVariableItem {
    Unknown(u8),
    ApplicationContext(String),
    PresentationContextProposed(PresentationContextProposed),
    PresentationContextResult(PresentationContextResult),
    UserVariables(Vec<UserVariableItem>),
}

/// One of the sub-items of a User Information item (0x50).
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum UserVariableItem {
    Unknown(u8, Vec<u8>),
    MaxLength(u32),
    ImplementationClassUID(String),
    ImplementationVersionName(String),
    UserIdentityItem(UserIdentity),
}

/// A User Identity Negotiation sub-item (PS3.7 Annex D.3.3.7): carries the
/// requestor's identity claim and, on the server side, its acknowledgement.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct UserIdentity {
    pub identity_type: UserIdentityType,
    pub positive_response_requested: bool,
    pub primary_field: Vec<u8>,
    pub secondary_field: Vec<u8>,
    pub server_response: Vec<u8>,
}

impl UserIdentity {
    /// Build a username-only identity claim (type 1).
    pub fn username(username: impl Into<Vec<u8>>) -> Self {
        UserIdentity {
            identity_type: UserIdentityType::Username,
            positive_response_requested: false,
            primary_field: username.into(),
            secondary_field: Vec::new(),
            server_response: Vec::new(),
        }
    }

    /// Build a username-and-passcode identity claim (type 2).
    pub fn username_passcode(username: impl Into<Vec<u8>>, passcode: impl Into<Vec<u8>>) -> Self {
        UserIdentity {
            identity_type: UserIdentityType::UsernameAndPasscode,
            positive_response_requested: false,
            primary_field: username.into(),
            secondary_field: passcode.into(),
            server_response: Vec::new(),
        }
    }
}

#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum UserIdentityType {
    Username,
    UsernameAndPasscode,
    Kerberos,
    Saml,
    Jwt,
    Reserved(u8),
}

impl UserIdentityType {
    pub fn from(value: u8) -> Self {
        match value {
            1 => UserIdentityType::Username,
            2 => UserIdentityType::UsernameAndPasscode,
            3 => UserIdentityType::Kerberos,
            4 => UserIdentityType::Saml,
            5 => UserIdentityType::Jwt,
            other => UserIdentityType::Reserved(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            UserIdentityType::Username => 1,
            UserIdentityType::UsernameAndPasscode => 2,
            UserIdentityType::Kerberos => 3,
            UserIdentityType::Saml => 4,
            UserIdentityType::Jwt => 5,
            UserIdentityType::Reserved(other) => other,
        }
    }
}

/// The protocol data units of the DICOM upper layer protocol, PS3.8
/// Section 9.3.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum Pdu {
    AssociationRQ(AssociationRQ),
    AssociationAC(AssociationAC),
    AssociationRJ(AssociationRJ),
    PData { data: Vec<PDataValue> },
    ReleaseRQ,
    ReleaseRP,
    AbortRQ { source: AbortRQSource },
    Unknown { pdu_type: u8, data: Vec<u8> },
}
