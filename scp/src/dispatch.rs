//! Message dispatch for one established association, grounded on the
//! `storescp` binary's per-connection loop and generalized to the
//! delegate hooks in [`crate::delegate`] ("Operation
//! dispatch").

use dcmnet_dimse::fragmentation::fragment;
use dcmnet_dimse::message::CommandKind;
use dcmnet_dimse::status::DimseStatus;
use dcmnet_dimse::{Assembler, CEchoRsp, CStoreRsp};
use dcmnet_ul::association::{Association, ServerAssociation, SyncAssociation};
use dcmnet_ul::pdu::{AbortRQServiceProviderReason, AbortRQSource};
use dcmnet_ul::Pdu;
use dicom_object::InMemDicomObject;
use dicom_transfer_syntax_registry::TransferSyntaxRegistry;
use snafu::{OptionExt, ResultExt};

use crate::delegate::{ReceivedFile, StorageDelegate, StoreOutcome};
use crate::error::{
    AssociationSnafu, DecodeDataSetSnafu, EncodeCommandSnafu, MissingElementSnafu, ReassembleSnafu,
    Result, UnsupportedTransferSyntaxSnafu,
};

/// Run the dispatch loop for a fully negotiated association until the
/// requestor releases, aborts, or the transport fails.
///
/// Every fully reassembled message is routed to the matching DIMSE-C
/// primitive; anything this node does not implement provokes an
/// A-ABORT with `UnexpectedPduParameter`.
pub fn run<S, D>(association: &mut ServerAssociation<S>, delegate: &D) -> Result<()>
where
    S: std::io::Read + std::io::Write + dcmnet_ul::association::CloseSocket,
    D: StorageDelegate,
{
    let calling_ae_title = association.peer_ae_title().to_string();
    let context_ids: Vec<u8> = association
        .presentation_contexts()
        .iter()
        .filter(|pc| pc.result.is_acceptance())
        .map(|pc| pc.id)
        .collect();
    let mut assembler = Assembler::new(context_ids);

    loop {
        let pdu = match association.receive() {
            Ok(pdu) => pdu,
            Err(dcmnet_ul::association::Error::Aborted) => {
                assembler.check_no_pending().context(ReassembleSnafu)?;
                return Ok(());
            }
            Err(source) => {
                assembler.check_no_pending().context(ReassembleSnafu)?;
                return Err(source).context(AssociationSnafu);
            }
        };

        match pdu {
            Pdu::PData { data } => {
                let message = match assembler.accept(Pdu::PData { data }) {
                    Ok(Some(message)) => message,
                    Ok(None) => continue,
                    Err(source) => return Err(source).context(ReassembleSnafu),
                };

                match message.command_kind {
                    CommandKind::CEchoRq => {
                        respond_echo(association, &message)?;
                    }
                    CommandKind::CStoreRq => {
                        respond_store(association, &message, delegate, &calling_ae_title)?;
                    }
                    _ => {
                        let _ = association.send(&Pdu::AbortRQ {
                            source: AbortRQSource::ServiceProvider(
                                AbortRQServiceProviderReason::UnexpectedPduParameter,
                            ),
                        });
                        return Ok(());
                    }
                }
            }
            Pdu::ReleaseRQ => {
                let _ = association.send(&Pdu::ReleaseRP);
                return Ok(());
            }
            _ => {
                let _ = association.send(&Pdu::AbortRQ {
                    source: AbortRQSource::ServiceProvider(
                        AbortRQServiceProviderReason::UnexpectedPdu,
                    ),
                });
                return Ok(());
            }
        }
    }
}

fn send_response<S>(
    association: &mut ServerAssociation<S>,
    presentation_context_id: u8,
    command_bytes: Vec<u8>,
) -> Result<()>
where
    S: std::io::Read + std::io::Write + dcmnet_ul::association::CloseSocket,
{
    let max_pdu_size = association.requestor_max_pdu_length();
    for pdu in fragment(&command_bytes, None, presentation_context_id, max_pdu_size) {
        association.send(&pdu).context(AssociationSnafu)?;
    }
    Ok(())
}

fn respond_echo<S>(
    association: &mut ServerAssociation<S>,
    message: &dcmnet_dimse::message::DimseMessage,
) -> Result<()>
where
    S: std::io::Read + std::io::Write + dcmnet_ul::association::CloseSocket,
{
    let message_id_being_responded_to =
        message.command.message_id.context(MissingElementSnafu)?;
    let response = CEchoRsp::builder()
        .message_id_being_responded_to(message_id_being_responded_to)
        .affected_sop_class_uid(message.command.affected_sop_class_uid.as_deref().unwrap_or_default())
        .status(DimseStatus::SUCCESS.0)
        .build();
    let bytes = response.encode(false).context(EncodeCommandSnafu)?;
    send_response(association, message.presentation_context_id, bytes)
}

fn respond_store<S, D>(
    association: &mut ServerAssociation<S>,
    message: &dcmnet_dimse::message::DimseMessage,
    delegate: &D,
    calling_ae_title: &str,
) -> Result<()>
where
    S: std::io::Read + std::io::Write + dcmnet_ul::association::CloseSocket,
    D: StorageDelegate,
{
    let message_id_being_responded_to =
        message.command.message_id.context(MissingElementSnafu)?;
    let sop_class_uid = message
        .command
        .affected_sop_class_uid
        .clone()
        .context(MissingElementSnafu)?;
    let sop_instance_uid = message
        .command
        .affected_sop_instance_uid
        .clone()
        .context(MissingElementSnafu)?;

    let status = if !delegate.will_receive(&sop_class_uid, &sop_instance_uid) {
        DimseStatus::REFUSED_OUT_OF_RESOURCES.0
    } else {
        let pc = association
            .presentation_contexts()
            .iter()
            .find(|pc| pc.id == message.presentation_context_id)
            .context(MissingElementSnafu)?;
        let ts = TransferSyntaxRegistry
            .get(&pc.transfer_syntax)
            .context(UnsupportedTransferSyntaxSnafu {
                uid: pc.transfer_syntax.clone(),
            })?;
        let data_set_bytes = message.data_set.as_deref().unwrap_or_default();
        let data_set = InMemDicomObject::read_dataset_with_ts(data_set_bytes, ts)
            .context(DecodeDataSetSnafu)?;

        let file = ReceivedFile {
            sop_class_uid: sop_class_uid.clone(),
            sop_instance_uid: sop_instance_uid.clone(),
            transfer_syntax_uid: pc.transfer_syntax.clone(),
            calling_ae_title: calling_ae_title.to_string(),
            data_set,
        };

        match delegate.did_receive(file) {
            StoreOutcome::Success => DimseStatus::SUCCESS.0,
            StoreOutcome::ProcessingFailure => DimseStatus::PROCESSING_FAILURE.0,
        }
    };

    let response = CStoreRsp::builder()
        .message_id_being_responded_to(message_id_being_responded_to)
        .affected_sop_class_uid(sop_class_uid.as_str())
        .affected_sop_instance_uid(sop_instance_uid.as_str())
        .status(status)
        .build();
    let bytes = response.encode(false).context(EncodeCommandSnafu)?;
    send_response(association, message.presentation_context_id, bytes)
}
