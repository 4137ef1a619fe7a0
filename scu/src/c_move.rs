//! C-MOVE SCU: ask the remote AE to push instances to a third-party
//! move destination over a separate association, reporting progress
//! from the sub-operation counters carried on each Pending response
//! (PS3.7 Section 9.1.4), grounded on the `movescu` binary.

use dcmnet_dimse::{message::CommandKind, status::StatusCategory, Assembler, CMoveRq, DimseStatus};
use dcmnet_ul::association::{ClientAssociationOptions, SyncAssociation};
use dicom_object::InMemDicomObject;
use dicom_transfer_syntax_registry::{TransferSyntaxIndex, TransferSyntaxRegistry};
use snafu::{ensure, OptionExt, ResultExt};

use crate::error::{
    AssociationSnafu, CancelledSnafu, InvalidStateSnafu, MissingElementSnafu, ReassembleSnafu,
    Result, RetrieveFailedSnafu, UnsupportedTransferSyntaxSnafu,
};
use crate::find::InformationModel;
use crate::negotiate::accepted_context;
use crate::transport::send_command;

/// Sub-operation progress reported on a Pending C-MOVE-RSP.
#[derive(Debug, Clone, Copy, Default)]
pub struct MoveProgress {
    pub remaining: u16,
    pub completed: u16,
    pub failed: u16,
    pub warning: u16,
}

/// Events emitted while a C-MOVE operation is running.
#[derive(Debug, Clone)]
pub enum MoveEvent {
    Progress(MoveProgress),
    Completed(MoveProgress),
}

fn move_sop_class_uid(information_model: InformationModel) -> &'static str {
    use dicom_dictionary_std::uids::*;
    match information_model {
        InformationModel::PatientRoot => PATIENT_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE,
        InformationModel::StudyRoot => STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE,
        InformationModel::PatientStudyOnly => {
            PATIENT_STUDY_ONLY_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE
        }
    }
}

/// Ask `called_ae_title` to move the instances matched by `identifier`
/// to `move_destination`, streaming progress through `on_event` until
/// a terminal status arrives.
pub fn move_instances(
    address: impl std::net::ToSocketAddrs,
    calling_ae_title: &str,
    called_ae_title: &str,
    move_destination: &str,
    information_model: InformationModel,
    identifier: &InMemDicomObject,
    mut on_event: impl FnMut(MoveEvent),
) -> Result<()> {
    let sop_class_uid = move_sop_class_uid(information_model);

    let mut association = ClientAssociationOptions::new()
        .calling_ae_title(calling_ae_title.to_string())
        .called_ae_title(called_ae_title.to_string())
        .with_abstract_syntax(sop_class_uid)
        .establish(address)
        .context(AssociationSnafu)?;

    let pc = accepted_context(&association, sop_class_uid)?;
    let ts = TransferSyntaxRegistry
        .get(&pc.transfer_syntax)
        .context(UnsupportedTransferSyntaxSnafu { uid: pc.transfer_syntax.clone() })?;

    let command = CMoveRq::builder()
        .message_id(1)
        .affected_sop_class_uid(sop_class_uid)
        .move_destination(move_destination)
        .build();
    send_command(&mut association, pc.id, &command, Some((identifier, ts)))?;

    let mut assembler = Assembler::new([pc.id]);

    loop {
        let pdu = match association.receive() {
            Ok(pdu) => pdu,
            Err(source) => {
                assembler.check_no_pending().context(ReassembleSnafu)?;
                return Err(source).context(AssociationSnafu);
            }
        };
        let Some(message) = assembler.accept(pdu).context(ReassembleSnafu)? else {
            continue;
        };

        ensure!(
            message.command_kind == CommandKind::CMoveRsp,
            InvalidStateSnafu {
                message: format!("expected C-MOVE-RSP, got {:?}", message.command_kind),
            }
        );

        let status = message
            .command
            .status
            .context(MissingElementSnafu { tag: dicom_dictionary_std::tags::STATUS })?;
        let progress = MoveProgress {
            remaining: message.command.number_of_remaining_suboperations.unwrap_or(0),
            completed: message.command.number_of_completed_suboperations.unwrap_or(0),
            failed: message.command.number_of_failed_suboperations.unwrap_or(0),
            warning: message.command.number_of_warning_suboperations.unwrap_or(0),
        };

        match DimseStatus::from(status).category() {
            StatusCategory::Pending => on_event(MoveEvent::Progress(progress)),
            StatusCategory::Success | StatusCategory::Warning => {
                on_event(MoveEvent::Completed(progress));
                break;
            }
            StatusCategory::Cancel => {
                let _ = association.release();
                return CancelledSnafu.fail();
            }
            StatusCategory::Failure => {
                let _ = association.release();
                return RetrieveFailedSnafu { status }.fail();
            }
        }
    }

    let _ = association.release();
    Ok(())
}
