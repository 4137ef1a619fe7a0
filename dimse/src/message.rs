//! Assembled DIMSE messages: the result of reassembling one or more
//! P-DATA-TF PDUs into a command set plus an optional data set.

use dicom_core::Tag;
use dicom_dictionary_std::tags;
use dicom_object::InMemDicomObject;
use dicom_transfer_syntax_registry::entries;
use snafu::{OptionExt, ResultExt, Snafu};

use crate::commands::CommandField;
use crate::status::DimseStatus;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("failed to decode command set"))]
    DecodeCommandSet { source: dicom_object::ReadError },

    #[snafu(display("command set is missing required element {:x?}", tag))]
    MissingElement { tag: Tag },

    #[snafu(display("failed to read integer value of element {:x?}", tag))]
    ReadElementInt {
        tag: Tag,
        source: dicom_core::value::ConvertValueError,
    },

    #[snafu(display("failed to read string value of element {:x?}", tag))]
    ReadElementStr {
        tag: Tag,
        source: dicom_core::value::CastValueError,
    },

    #[snafu(display("command field {:#06x} is not a recognized DIMSE command", value))]
    UnknownCommandField { value: u16 },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The specific DIMSE-C service primitive a message represents.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum CommandKind {
    CEchoRq,
    CEchoRsp,
    CStoreRq,
    CStoreRsp,
    CFindRq,
    CFindRsp,
    CMoveRq,
    CMoveRsp,
    CGetRq,
    CGetRsp,
    CCancelRq,
}

impl CommandKind {
    pub fn from_command_field(field: CommandField) -> Option<Self> {
        Some(match field {
            CommandField::C_ECHO_RQ => CommandKind::CEchoRq,
            CommandField::C_ECHO_RSP => CommandKind::CEchoRsp,
            CommandField::C_STORE_RQ => CommandKind::CStoreRq,
            CommandField::C_STORE_RSP => CommandKind::CStoreRsp,
            CommandField::C_FIND_RQ => CommandKind::CFindRq,
            CommandField::C_FIND_RSP => CommandKind::CFindRsp,
            CommandField::C_MOVE_RQ => CommandKind::CMoveRq,
            CommandField::C_MOVE_RSP => CommandKind::CMoveRsp,
            CommandField::C_GET_RQ => CommandKind::CGetRq,
            CommandField::C_GET_RSP => CommandKind::CGetRsp,
            CommandField::C_CANCEL_RQ => CommandKind::CCancelRq,
            _ => return None,
        })
    }

    /// Whether a response of this kind is expected to be followed by
    /// further responses to the same message ID (a C-FIND/C-MOVE/C-GET
    /// exchange reporting Pending statuses).
    pub fn is_response(self) -> bool {
        matches!(
            self,
            CommandKind::CEchoRsp
                | CommandKind::CStoreRsp
                | CommandKind::CFindRsp
                | CommandKind::CMoveRsp
                | CommandKind::CGetRsp
        )
    }
}

/// The command-set fields common across DIMSE-C primitives, parsed out
/// of the group-0x0000 data set that precedes every DIMSE message.
///
/// Fields that do not apply to a given command's kind are left unset
/// rather than erroring, matching the "conditional field" nature of the
/// command set (PS3.7 Section 9/10).
#[derive(Debug, Clone, Default)]
pub struct CommandSet {
    pub command_field: u16,
    pub message_id: Option<u16>,
    pub message_id_being_responded_to: Option<u16>,
    pub affected_sop_class_uid: Option<String>,
    pub requested_sop_class_uid: Option<String>,
    pub affected_sop_instance_uid: Option<String>,
    pub requested_sop_instance_uid: Option<String>,
    pub priority: Option<u16>,
    pub status: Option<u16>,
    pub move_destination: Option<String>,
    pub number_of_remaining_suboperations: Option<u16>,
    pub number_of_completed_suboperations: Option<u16>,
    pub number_of_failed_suboperations: Option<u16>,
    pub number_of_warning_suboperations: Option<u16>,
    pub data_set_present: bool,
}

impl CommandSet {
    pub fn status(&self) -> Option<DimseStatus> {
        self.status.map(DimseStatus::from)
    }

    pub fn kind(&self) -> Result<CommandKind> {
        let field = CommandField::from_u16(self.command_field)
            .with_context(|| UnknownCommandFieldSnafu { value: self.command_field })?;
        CommandKind::from_command_field(field)
            .with_context(|| UnknownCommandFieldSnafu { value: self.command_field })
    }
}

/// A fully reassembled DIMSE message: the command set plus the data
/// set, if one accompanied it, addressed to a single presentation
/// context.
#[derive(Debug, Clone)]
pub struct DimseMessage {
    pub presentation_context_id: u8,
    pub command: CommandSet,
    pub data_set: Option<Vec<u8>>,
    pub command_kind: CommandKind,
}

fn optional_u16(obj: &InMemDicomObject, tag: Tag) -> Result<Option<u16>> {
    match obj.element_opt(tag).ok().flatten() {
        Some(elem) => Ok(Some(
            elem.to_int::<u16>().context(ReadElementIntSnafu { tag })?,
        )),
        None => Ok(None),
    }
}

fn optional_str(obj: &InMemDicomObject, tag: Tag) -> Result<Option<String>> {
    match obj.element_opt(tag).ok().flatten() {
        Some(elem) => {
            let s = elem
                .to_str()
                .context(ReadElementStrSnafu { tag })?
                .trim_end_matches(['\0', ' '])
                .to_string();
            Ok(Some(s))
        }
        None => Ok(None),
    }
}

/// Decode a raw Implicit VR Little Endian command set (as carried by a
/// reassembled P-DATA-TF command fragment) into its logical fields.
pub fn decode_command_set(bytes: &[u8]) -> Result<CommandSet> {
    let ts = entries::IMPLICIT_VR_LITTLE_ENDIAN.erased();
    let obj =
        InMemDicomObject::read_dataset_with_ts(bytes, &ts).context(DecodeCommandSetSnafu)?;

    let command_field = obj
        .element(tags::COMMAND_FIELD)
        .ok()
        .context(MissingElementSnafu { tag: tags::COMMAND_FIELD })?
        .to_int::<u16>()
        .context(ReadElementIntSnafu { tag: tags::COMMAND_FIELD })?;

    let data_set_present = optional_u16(&obj, tags::COMMAND_DATA_SET_TYPE)?
        .map(|v| v != 0x0101)
        .unwrap_or(false);

    Ok(CommandSet {
        command_field,
        message_id: optional_u16(&obj, tags::MESSAGE_ID)?,
        message_id_being_responded_to: optional_u16(&obj, tags::MESSAGE_ID_BEING_RESPONDED_TO)?,
        affected_sop_class_uid: optional_str(&obj, tags::AFFECTED_SOP_CLASS_UID)?,
        requested_sop_class_uid: optional_str(&obj, tags::REQUESTED_SOP_CLASS_UID)?,
        affected_sop_instance_uid: optional_str(&obj, tags::AFFECTED_SOP_INSTANCE_UID)?,
        requested_sop_instance_uid: optional_str(&obj, tags::REQUESTED_SOP_INSTANCE_UID)?,
        priority: optional_u16(&obj, tags::PRIORITY)?,
        status: optional_u16(&obj, tags::STATUS)?,
        move_destination: optional_str(&obj, tags::MOVE_DESTINATION)?,
        number_of_remaining_suboperations: optional_u16(
            &obj,
            tags::NUMBER_OF_REMAINING_SUBOPERATIONS,
        )?,
        number_of_completed_suboperations: optional_u16(
            &obj,
            tags::NUMBER_OF_COMPLETED_SUBOPERATIONS,
        )?,
        number_of_failed_suboperations: optional_u16(&obj, tags::NUMBER_OF_FAILED_SUBOPERATIONS)?,
        number_of_warning_suboperations: optional_u16(
            &obj,
            tags::NUMBER_OF_WARNING_SUBOPERATIONS,
        )?,
        data_set_present,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Command;
    use crate::generated::{CEchoRq, CStoreRq};

    #[test]
    fn decodes_a_c_echo_rq_command_set() {
        let command = CEchoRq::builder()
            .message_id(7)
            .affected_sop_class_uid("1.2.840.10008.1.1")
            .build();
        let bytes = command.encode(false).unwrap();

        let decoded = decode_command_set(&bytes).unwrap();
        assert_eq!(decoded.command_field, CommandField::C_ECHO_RQ as u16);
        assert_eq!(decoded.message_id, Some(7));
        assert_eq!(
            decoded.affected_sop_class_uid.as_deref(),
            Some("1.2.840.10008.1.1")
        );
        assert!(!decoded.data_set_present);
        assert_eq!(decoded.kind().unwrap(), CommandKind::CEchoRq);
    }

    #[test]
    fn data_set_present_flag_survives_round_trip() {
        let command = CStoreRq::builder()
            .message_id(1)
            .affected_sop_class_uid("1.2.840.10008.5.1.4.1.1.2")
            .affected_sop_instance_uid("1.2.3.4")
            .build();
        let bytes = command.encode(true).unwrap();
        let decoded = decode_command_set(&bytes).unwrap();
        assert!(decoded.data_set_present);
        assert_eq!(decoded.kind().unwrap(), CommandKind::CStoreRq);
    }

    #[test]
    fn unknown_command_field_is_rejected() {
        let set = CommandSet {
            command_field: 0xFFFF,
            ..Default::default()
        };
        assert!(set.kind().is_err());
    }

    #[test]
    fn command_kind_is_response_only_for_responses() {
        assert!(CommandKind::CEchoRsp.is_response());
        assert!(!CommandKind::CEchoRq.is_response());
    }
}
