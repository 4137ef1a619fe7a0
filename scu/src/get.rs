//! C-GET SCU: retrieve instances over the same association used to
//! query for them. Unlike C-MOVE, the SCP pushes C-STORE-RQ
//! sub-operations back down this association rather than opening one
//! of its own, so the SCU must propose storage presentation contexts
//! alongside the retrieve model and multiplex between C-GET-RSP and
//! incoming C-STORE-RQ (PS3.7 Section 9.1.3).

use dcmnet_dimse::{
    message::CommandKind, status::StatusCategory, Assembler, CGetRq, CStoreRsp, DimseStatus,
};
use dcmnet_ul::association::{Association, ClientAssociationOptions, SyncAssociation};
use dicom_object::InMemDicomObject;
use dicom_transfer_syntax_registry::{entries, TransferSyntaxIndex, TransferSyntaxRegistry};
use snafu::{OptionExt, ResultExt};

use crate::error::{
    AssociationSnafu, CancelledSnafu, InvalidStateSnafu, MissingElementSnafu, ReassembleSnafu,
    Result, RetrieveFailedSnafu, UnsupportedTransferSyntaxSnafu,
};
use crate::find::InformationModel;
use crate::negotiate::accepted_context;
use crate::transport::send_command;

fn get_sop_class_uid(information_model: InformationModel) -> &'static str {
    use dicom_dictionary_std::uids::*;
    match information_model {
        InformationModel::PatientRoot => PATIENT_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_GET,
        InformationModel::StudyRoot => STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_GET,
        InformationModel::PatientStudyOnly => {
            PATIENT_STUDY_ONLY_QUERY_RETRIEVE_INFORMATION_MODEL_GET
        }
    }
}

fn storage_transfer_syntaxes() -> Vec<String> {
    vec![
        entries::EXPLICIT_VR_LITTLE_ENDIAN.uid().to_string(),
        entries::IMPLICIT_VR_LITTLE_ENDIAN.uid().to_string(),
    ]
}

/// Sub-operation progress reported on a Pending C-GET-RSP.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetProgress {
    pub remaining: u16,
    pub completed: u16,
    pub failed: u16,
    pub warning: u16,
}

/// Events emitted while a C-GET operation is running.
#[derive(Debug, Clone)]
pub enum GetEvent {
    Progress(GetProgress),
    /// One instance pushed by the SCP as a C-STORE-RQ sub-operation.
    /// `data_set` holds the encoded data set exactly as received, in
    /// the transfer syntax negotiated for its presentation context.
    Instance { sop_instance_uid: String, sop_class_uid: String, data_set: Vec<u8> },
    Completed(GetProgress),
}

/// Retrieve the instances matched by `identifier`, proposing the
/// retrieve model plus one presentation context per entry in
/// `storage_sop_classes` so the SCP can stream C-STORE-RQ
/// sub-operations back on the same association.
pub fn get(
    address: impl std::net::ToSocketAddrs,
    calling_ae_title: &str,
    called_ae_title: &str,
    information_model: InformationModel,
    identifier: &InMemDicomObject,
    storage_sop_classes: &[String],
    mut on_event: impl FnMut(GetEvent),
) -> Result<()> {
    let get_sop_class_uid = get_sop_class_uid(information_model);

    let mut options = ClientAssociationOptions::new()
        .calling_ae_title(calling_ae_title.to_string())
        .called_ae_title(called_ae_title.to_string())
        .with_abstract_syntax(get_sop_class_uid);
    for sop_class_uid in storage_sop_classes {
        options = options.with_presentation_context(sop_class_uid.clone(), storage_transfer_syntaxes());
    }

    let mut association = options.establish(address).context(AssociationSnafu)?;

    let get_pc = accepted_context(&association, get_sop_class_uid)?;
    let get_ts = TransferSyntaxRegistry
        .get(&get_pc.transfer_syntax)
        .context(UnsupportedTransferSyntaxSnafu { uid: get_pc.transfer_syntax.clone() })?;

    let mut known_contexts = vec![get_pc.id];
    for pc in association.presentation_contexts() {
        if pc.result.is_acceptance() && pc.id != get_pc.id {
            known_contexts.push(pc.id);
        }
    }

    let command = CGetRq::builder()
        .message_id(1)
        .affected_sop_class_uid(get_sop_class_uid)
        .build();
    send_command(&mut association, get_pc.id, &command, Some((identifier, get_ts)))?;

    let mut assembler = Assembler::new(known_contexts);

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

        match message.command_kind {
            CommandKind::CGetRsp => {
                let status = message
                    .command
                    .status
                    .context(MissingElementSnafu { tag: dicom_dictionary_std::tags::STATUS })?;
                let progress = GetProgress {
                    remaining: message.command.number_of_remaining_suboperations.unwrap_or(0),
                    completed: message.command.number_of_completed_suboperations.unwrap_or(0),
                    failed: message.command.number_of_failed_suboperations.unwrap_or(0),
                    warning: message.command.number_of_warning_suboperations.unwrap_or(0),
                };

                match DimseStatus::from(status).category() {
                    StatusCategory::Pending => on_event(GetEvent::Progress(progress)),
                    StatusCategory::Success | StatusCategory::Warning => {
                        on_event(GetEvent::Completed(progress));
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
            CommandKind::CStoreRq => {
                let rq_message_id = message
                    .command
                    .message_id
                    .context(MissingElementSnafu { tag: dicom_dictionary_std::tags::MESSAGE_ID })?;
                let sop_class_uid = message.command.affected_sop_class_uid.clone().context(
                    MissingElementSnafu { tag: dicom_dictionary_std::tags::AFFECTED_SOP_CLASS_UID },
                )?;
                let sop_instance_uid = message.command.affected_sop_instance_uid.clone().context(
                    MissingElementSnafu { tag: dicom_dictionary_std::tags::AFFECTED_SOP_INSTANCE_UID },
                )?;
                let data_set = message.data_set.clone().unwrap_or_default();

                on_event(GetEvent::Instance {
                    sop_instance_uid: sop_instance_uid.clone(),
                    sop_class_uid: sop_class_uid.clone(),
                    data_set,
                });

                let response = CStoreRsp::builder()
                    .message_id_being_responded_to(rq_message_id)
                    .affected_sop_class_uid(sop_class_uid.as_str())
                    .affected_sop_instance_uid(sop_instance_uid.as_str())
                    .status(0)
                    .build();
                send_command(&mut association, message.presentation_context_id, &response, None)?;
            }
            other => {
                let _ = association.release();
                return InvalidStateSnafu {
                    message: format!("unexpected message {:?} during a C-GET exchange", other),
                }
                .fail();
            }
        }
    }

    let _ = association.release();
    Ok(())
}
