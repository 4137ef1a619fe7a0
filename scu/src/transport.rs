//! Shared command/data-set send path used by every SCU service: splits
//! the command set (and, when present, the accompanying data set)
//! across as many P-DATA-TF PDUs as the peer's negotiated maximum PDU
//! length requires (PS3.8 Section 9.3.1), rather than assuming the
//! whole exchange fits in one.

use dcmnet_dimse::commands::Command;
use dcmnet_dimse::fragmentation::fragment;
use dcmnet_ul::association::{Association, ClientAssociation, CloseSocket, SyncAssociation};
use dicom_encoding::TransferSyntax;
use dicom_object::InMemDicomObject;
use snafu::ResultExt;

use crate::error::{AssociationSnafu, EncodeCommandSnafu, Result, WriteDataSetSnafu};

/// Encode `command`, plus `dataset` if one accompanies it, and send
/// the result to `association` over `presentation_context_id`.
pub fn send_command<T>(
    association: &mut ClientAssociation<T>,
    presentation_context_id: u8,
    command: &impl Command,
    dataset: Option<(&InMemDicomObject, &TransferSyntax)>,
) -> Result<()>
where
    T: std::io::Read + std::io::Write + CloseSocket,
{
    let command_bytes = command.encode(dataset.is_some()).context(EncodeCommandSnafu)?;

    let data_set_bytes = dataset
        .map(|(dataset, ts)| -> Result<Vec<u8>> {
            let mut buf = Vec::new();
            dataset
                .write_dataset_with_ts(&mut buf, ts)
                .map_err(Box::new)
                .context(WriteDataSetSnafu)?;
            Ok(buf)
        })
        .transpose()?;

    let max_pdu_size = association.requestor_max_pdu_length();
    let pdus = fragment(
        &command_bytes,
        data_set_bytes.as_deref(),
        presentation_context_id,
        max_pdu_size,
    );
    for pdu in pdus {
        association.send(&pdu).context(AssociationSnafu)?;
    }
    Ok(())
}
