//! C-FIND SCU: query an information model, accumulating every Pending
//! response's identifier data set until a terminal status arrives
//! (PS3.7 Section 9.1.2), grounded on the `findscu` binary's query
//! flow but working over `InMemDicomObject` identifiers directly
//! rather than a CLI-specific query syntax.

use dcmnet_dimse::{message::CommandKind, status::StatusCategory, Assembler, CFindRq, DimseStatus};
use dcmnet_ul::association::{ClientAssociationOptions, SyncAssociation};
use dicom_object::InMemDicomObject;
use dicom_transfer_syntax_registry::{TransferSyntaxIndex, TransferSyntaxRegistry};
use snafu::{ensure, OptionExt, ResultExt};

use crate::error::{
    AssociationSnafu, CancelledSnafu, InvalidStateSnafu, MissingElementSnafu, QueryFailedSnafu,
    ReadDataSetSnafu, ReassembleSnafu, Result, UnsupportedTransferSyntaxSnafu,
};
use crate::negotiate::accepted_context;
use crate::transport::send_command;

/// Query-retrieve information models a C-FIND may be run against.
#[derive(Debug, Clone, Copy)]
pub enum InformationModel {
    PatientRoot,
    StudyRoot,
    PatientStudyOnly,
}

impl InformationModel {
    fn find_sop_class_uid(self) -> &'static str {
        use dicom_dictionary_std::uids::*;
        match self {
            InformationModel::PatientRoot => PATIENT_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND,
            InformationModel::StudyRoot => STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND,
            InformationModel::PatientStudyOnly => {
                PATIENT_STUDY_ONLY_QUERY_RETRIEVE_INFORMATION_MODEL_FIND
            }
        }
    }
}

impl Default for InformationModel {
    fn default() -> Self {
        InformationModel::StudyRoot
    }
}

/// Run a C-FIND query, returning the identifier data set carried by
/// every Pending response, in the order received.
pub fn find(
    address: impl std::net::ToSocketAddrs,
    calling_ae_title: &str,
    called_ae_title: &str,
    information_model: InformationModel,
    identifier: &InMemDicomObject,
) -> Result<Vec<InMemDicomObject>> {
    let sop_class_uid = information_model.find_sop_class_uid();

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

    let command = CFindRq::builder()
        .message_id(1)
        .affected_sop_class_uid(sop_class_uid)
        .build();
    send_command(&mut association, pc.id, &command, Some((identifier, ts)))?;

    let mut assembler = Assembler::new([pc.id]);
    let mut results = Vec::new();

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
            message.command_kind == CommandKind::CFindRsp,
            InvalidStateSnafu {
                message: format!("expected C-FIND-RSP, got {:?}", message.command_kind),
            }
        );

        let status = message
            .command
            .status
            .context(MissingElementSnafu { tag: dicom_dictionary_std::tags::STATUS })?;

        match DimseStatus::from(status).category() {
            StatusCategory::Pending => {
                if let Some(data) = message.data_set {
                    let identifier = InMemDicomObject::read_dataset_with_ts(data.as_slice(), ts)
                        .context(ReadDataSetSnafu)?;
                    results.push(identifier);
                }
            }
            StatusCategory::Success | StatusCategory::Warning => break,
            StatusCategory::Cancel => {
                let _ = association.release();
                return CancelledSnafu.fail();
            }
            StatusCategory::Failure => {
                let _ = association.release();
                return QueryFailedSnafu { status }.fail();
            }
        }
    }

    let _ = association.release();
    Ok(results)
}
