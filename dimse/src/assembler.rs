//! Reassembling incoming P-DATA-TF PDUs into complete DIMSE messages.
//!
//! Mirrors [`crate::fragmentation`] from the receiving side: PDV
//! payloads are buffered per `(presentation_context_id, is_command)`
//! until a fragment marked `is_last` arrives, at which point the
//! command set (and, if the command signals one, the data set) are
//! decoded into a [`DimseMessage`].
//!
//! Cross-context interleaving is permitted (PS3.8 Section 9.3.1): a
//! command fragment for context 3 may arrive between two data
//! fragments for context 1. Partial state is therefore kept per
//! context, not globally.

use std::collections::HashMap;

use dcmnet_ul::pdu::{PDataValue, PDataValueType};
use dcmnet_ul::Pdu;
use snafu::{ensure, ResultExt, Snafu};

use crate::message::{decode_command_set, CommandSet, DimseMessage};

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("received a non-PData PDU where a PDV fragment was expected"))]
    UnexpectedPdu,

    #[snafu(display(
        "received a data fragment for presentation context {} before its command",
        presentation_context_id
    ))]
    DataBeforeCommand { presentation_context_id: u8 },

    #[snafu(display(
        "received a fragment for unknown presentation context {}",
        presentation_context_id
    ))]
    UnknownPresentationContext { presentation_context_id: u8 },

    #[snafu(display("failed to decode the reassembled command set"))]
    DecodeCommand { source: crate::message::Error },

    #[snafu(display(
        "association closed while a data set fragment was still pending for context {}",
        presentation_context_id
    ))]
    IncompleteMessage { presentation_context_id: u8 },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Default)]
struct PartialContext {
    command: Vec<u8>,
    command_done: bool,
    data: Vec<u8>,
    data_done: bool,
    decoded_command: Option<CommandSet>,
}

/// Reassembles P-DATA-TF PDUs arriving for any number of presentation
/// contexts into complete [`DimseMessage`] values.
///
/// Construct with [`Assembler::new`], passing the set of presentation
/// context IDs the association has negotiated (fragments for any other
/// ID are rejected). Feed PDUs with [`Assembler::accept`]; a `Some`
/// return means a message has fully arrived.
pub struct Assembler {
    known_contexts: Vec<u8>,
    partial: HashMap<u8, PartialContext>,
}

impl Assembler {
    pub fn new(known_contexts: impl IntoIterator<Item = u8>) -> Self {
        Assembler {
            known_contexts: known_contexts.into_iter().collect(),
            partial: HashMap::new(),
        }
    }

    /// Feed one PDU (expected to be a `P-DATA-TF`) into the assembler.
    /// Returns `Ok(Some(message))` once a full DIMSE message has been
    /// reassembled for some presentation context, `Ok(None)` if more
    /// fragments are still needed.
    pub fn accept(&mut self, pdu: Pdu) -> Result<Option<DimseMessage>> {
        let data = match pdu {
            Pdu::PData { data } => data,
            _ => return UnexpectedPduSnafu.fail(),
        };

        let mut ready = None;
        for pdv in data {
            if let Some(message) = self.accept_pdv(pdv)? {
                ready = Some(message);
            }
        }
        Ok(ready)
    }

    fn accept_pdv(&mut self, pdv: PDataValue) -> Result<Option<DimseMessage>> {
        let PDataValue {
            presentation_context_id,
            value_type,
            is_last,
            data,
        } = pdv;

        ensure!(
            self.known_contexts.contains(&presentation_context_id),
            UnknownPresentationContextSnafu {
                presentation_context_id
            }
        );

        let entry = self.partial.entry(presentation_context_id).or_default();

        match value_type {
            PDataValueType::Command => {
                entry.command.extend_from_slice(&data);
                if is_last {
                    entry.command_done = true;
                    let command =
                        decode_command_set(&entry.command).context(DecodeCommandSnafu)?;
                    entry.decoded_command = Some(command);
                }
            }
            PDataValueType::Data => {
                ensure!(
                    entry.command_done,
                    DataBeforeCommandSnafu {
                        presentation_context_id
                    }
                );
                entry.data.extend_from_slice(&data);
                if is_last {
                    entry.data_done = true;
                }
            }
        }

        let complete = match &entry.decoded_command {
            Some(command) => !command.data_set_present || entry.data_done,
            None => false,
        };

        if !complete {
            return Ok(None);
        }

        let entry = self.partial.remove(&presentation_context_id).unwrap();
        let command = entry.decoded_command.expect("checked above");
        let command_kind = command.kind().context(DecodeCommandSnafu)?;
        let data_set = if command.data_set_present {
            Some(entry.data)
        } else {
            None
        };

        Ok(Some(DimseMessage {
            presentation_context_id,
            command,
            data_set,
            command_kind,
        }))
    }

    /// Called when the underlying association has closed. Returns an
    /// error naming any presentation context that still had a data
    /// fragment pending, so the caller can surface `DecodingFailed`
    /// rather than silently dropping a truncated message.
    pub fn check_no_pending(&self) -> Result<()> {
        for (&presentation_context_id, partial) in &self.partial {
            if partial.command_done
                && partial
                    .decoded_command
                    .as_ref()
                    .map(|c| c.data_set_present)
                    .unwrap_or(false)
                && !partial.data_done
            {
                return IncompleteMessageSnafu {
                    presentation_context_id,
                }
                .fail();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragmentation::fragment;

    #[test]
    fn assembles_single_fragment_message_without_dataset() {
        // A minimal Implicit VR LE command set: group length + command
        // field (C-ECHO-RQ) + data set type (Absent).
        let ts = dicom_transfer_syntax_registry::entries::IMPLICIT_VR_LITTLE_ENDIAN.erased();
        let mut ds = dicom_object::InMemDicomObject::new_empty();
        ds.put(dicom_core::DataElement::new(
            dicom_dictionary_std::tags::COMMAND_FIELD,
            dicom_core::VR::US,
            dicom_core::dicom_value!(0x0030u16),
        ));
        ds.put(dicom_core::DataElement::new(
            dicom_dictionary_std::tags::COMMAND_DATA_SET_TYPE,
            dicom_core::VR::US,
            dicom_core::dicom_value!(0x0101u16),
        ));
        let mut body = Vec::new();
        ds.write_dataset_with_ts(&mut body, &ts).unwrap();

        let pdus = fragment(&body, None, 1, 16384);
        let mut assembler = Assembler::new([1]);
        let mut result = None;
        for pdu in pdus {
            result = assembler.accept(pdu).unwrap();
        }
        let message = result.expect("message should be complete");
        assert_eq!(message.presentation_context_id, 1);
        assert!(message.data_set.is_none());
    }

    #[test]
    fn rejects_data_fragment_for_unknown_context() {
        let mut assembler = Assembler::new([1]);
        let pdu = Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id: 99,
                value_type: PDataValueType::Data,
                is_last: true,
                data: vec![1, 2, 3],
            }],
        };
        assert!(matches!(
            assembler.accept(pdu),
            Err(Error::UnknownPresentationContext {
                presentation_context_id: 99
            })
        ));
    }

    #[test]
    fn rejects_data_fragment_preceding_its_command() {
        let mut assembler = Assembler::new([1]);
        let pdu = Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id: 1,
                value_type: PDataValueType::Data,
                is_last: true,
                data: vec![1, 2, 3],
            }],
        };
        assert!(matches!(
            assembler.accept(pdu),
            Err(Error::DataBeforeCommand {
                presentation_context_id: 1
            })
        ));
    }
}
