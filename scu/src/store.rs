//! C-STORE SCU: single-file and batch transfer, grounded on the
//! `storescu` binary's `store_sync`/`inner` flow.
//!
//! Transcoding between codec families (e.g. a JPEG transfer syntax to
//! an uncompressed one) is out of scope; only the trivial Explicit VR
//! Little Endian / Implicit VR Little Endian equivalence is honored,
//! since both share the same typed element model and differ only in
//! how a value's VR is carried on the wire.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use dcmnet_dimse::{message::CommandKind, Assembler, CStoreRq};
use dcmnet_ul::association::{ClientAssociation, ClientAssociationOptions, SyncAssociation};
use dicom_encoding::TransferSyntax;
use dicom_object::open_file;
use dicom_transfer_syntax_registry::{entries, TransferSyntaxIndex, TransferSyntaxRegistry};
use snafu::{ensure, OptionExt, ResultExt};

use crate::error::{
    AssociationSnafu, InvalidStateSnafu, MissingElementSnafu, ReadFileSnafu, ReassembleSnafu,
    Result, UnsupportedTransferSyntaxSnafu,
};
use crate::negotiate::accepted_context;
use crate::transport::send_command;

const IMPLICIT_VR_LE: &str = entries::IMPLICIT_VR_LITTLE_ENDIAN.uid();
const EXPLICIT_VR_LE: &str = entries::EXPLICIT_VR_LITTLE_ENDIAN.uid();

fn is_le_vr_family(uid: &str) -> bool {
    uid == IMPLICIT_VR_LE || uid == EXPLICIT_VR_LE
}

/// A file's storage-relevant facts, extracted from its file meta group
/// up front so a whole batch can be planned before any association is
/// opened.
#[derive(Debug, Clone)]
struct PlannedFile {
    path: PathBuf,
    sop_class_uid: String,
    sop_instance_uid: String,
    file_transfer_syntax: String,
}

fn plan_file(path: &Path) -> Result<PlannedFile> {
    let obj = open_file(path).map_err(Box::new).context(ReadFileSnafu {
        path: path.display().to_string(),
    })?;
    let meta = obj.meta();
    Ok(PlannedFile {
        path: path.to_path_buf(),
        sop_class_uid: meta.media_storage_sop_class_uid().trim_end_matches(['\0', ' ']).to_string(),
        sop_instance_uid: meta
            .media_storage_sop_instance_uid()
            .trim_end_matches(['\0', ' '])
            .to_string(),
        file_transfer_syntax: meta.transfer_syntax().trim_end_matches(['\0', ' ']).to_string(),
    })
}

/// Outcome of one C-STORE exchange.
#[derive(Debug, Clone)]
pub struct StoreResult {
    pub success: bool,
    pub status: u16,
    pub round_trip_time: Duration,
}

/// Store a single file: propose its SOP Class UID with its own
/// transfer syntax plus the two uncompressed fallbacks, then run one
/// C-STORE exchange.
pub fn store_file(
    address: impl std::net::ToSocketAddrs,
    calling_ae_title: &str,
    called_ae_title: &str,
    path: &Path,
) -> Result<StoreResult> {
    let file = plan_file(path)?;

    let mut options = ClientAssociationOptions::new()
        .calling_ae_title(calling_ae_title.to_string())
        .called_ae_title(called_ae_title.to_string());
    options = options.with_presentation_context(
        file.sop_class_uid.clone(),
        fallback_transfer_syntaxes(&file.file_transfer_syntax),
    );

    let mut association = options.establish(address).context(AssociationSnafu)?;

    let result = send_one(&mut association, &file, 1)?;
    let _ = association.release();
    Ok(result)
}

/// Events reported while streaming through a batch of files.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    Progress { path: PathBuf, index: usize, total: usize },
    FileResult { path: PathBuf, outcome: std::result::Result<StoreResult, String> },
    Completed { succeeded: usize, failed: usize },
}

/// Options governing a batch C-STORE run.
#[derive(Debug, Clone)]
pub struct BatchStoreOptions {
    pub calling_ae_title: String,
    pub called_ae_title: String,
    /// Re-associate after this many files have been sent on one
    /// association.
    pub max_files_per_association: usize,
    /// Keep sending the remaining files after one fails.
    pub continue_on_error: bool,
    /// Pace between files, e.g. to respect a receiver's rate limit.
    pub delay_between_files: Option<Duration>,
}

impl Default for BatchStoreOptions {
    fn default() -> Self {
        BatchStoreOptions {
            calling_ae_title: "STORESCU".to_string(),
            called_ae_title: "ANY-SCP".to_string(),
            max_files_per_association: 128,
            continue_on_error: true,
            delay_between_files: None,
        }
    }
}

/// The maximum number of presentation contexts a single association
/// may propose: odd IDs `1, 3, 5, ..., 255` (PS3.8 Section 9.3.2.2).
const MAX_PRESENTATION_CONTEXTS: usize = 128;

/// Store a batch of files, re-associating as needed, reporting
/// progress through `on_event`.
pub fn store_batch(
    address: impl std::net::ToSocketAddrs + Clone,
    paths: &[PathBuf],
    options: &BatchStoreOptions,
    mut on_event: impl FnMut(StoreEvent),
) -> Result<()> {
    let total = paths.len();
    let mut planned = Vec::with_capacity(total);
    for path in paths {
        planned.push(plan_file(path)?);
    }

    // Gather distinct SOP classes, each with its own fallback list,
    // capped at the number of presentation contexts one association
    // may carry.
    let mut distinct: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for file in &planned {
        distinct
            .entry(file.sop_class_uid.clone())
            .or_insert_with(|| fallback_transfer_syntaxes(&file.file_transfer_syntax));
    }
    ensure!(
        distinct.len() <= MAX_PRESENTATION_CONTEXTS,
        InvalidStateSnafu {
            message: format!(
                "batch spans {} distinct SOP classes, exceeding the {} presentation contexts \
                 one association can propose",
                distinct.len(),
                MAX_PRESENTATION_CONTEXTS
            ),
        }
    );

    let mut succeeded = 0usize;
    let mut failed = 0usize;

    let mut index = 0usize;
    while index < planned.len() {
        let mut options_builder = ClientAssociationOptions::new()
            .calling_ae_title(options.calling_ae_title.clone())
            .called_ae_title(options.called_ae_title.clone());
        for (sop_class_uid, transfer_syntaxes) in &distinct {
            options_builder =
                options_builder.with_presentation_context(sop_class_uid.clone(), transfer_syntaxes.clone());
        }

        let mut association = options_builder
            .establish(address.clone())
            .context(AssociationSnafu)?;

        let chunk_end = (index + options.max_files_per_association).min(planned.len());
        let mut message_id = 1u16;
        while index < chunk_end {
            let file = &planned[index];
            on_event(StoreEvent::Progress {
                path: file.path.clone(),
                index,
                total,
            });

            let outcome = send_one(&mut association, file, message_id);
            message_id = message_id.wrapping_add(1);

            match outcome {
                Ok(result) => {
                    succeeded += 1;
                    on_event(StoreEvent::FileResult {
                        path: file.path.clone(),
                        outcome: Ok(result),
                    });
                }
                Err(error) => {
                    failed += 1;
                    let message = error.to_string();
                    on_event(StoreEvent::FileResult {
                        path: file.path.clone(),
                        outcome: Err(message),
                    });
                    if !options.continue_on_error {
                        let _ = association.release();
                        on_event(StoreEvent::Completed { succeeded, failed });
                        return Err(error);
                    }
                }
            }

            index += 1;
            if let Some(delay) = options.delay_between_files {
                if index < chunk_end {
                    std::thread::sleep(delay);
                }
            }
        }

        let _ = association.release();
    }

    on_event(StoreEvent::Completed { succeeded, failed });
    Ok(())
}

fn fallback_transfer_syntaxes(file_transfer_syntax: &str) -> Vec<String> {
    let mut list = vec![file_transfer_syntax.to_string()];
    for candidate in [EXPLICIT_VR_LE, IMPLICIT_VR_LE] {
        if !list.iter().any(|ts| ts == candidate) {
            list.push(candidate.to_string());
        }
    }
    list
}

fn send_one<T>(
    association: &mut ClientAssociation<T>,
    file: &PlannedFile,
    message_id: u16,
) -> Result<StoreResult>
where
    T: std::io::Read + std::io::Write + dcmnet_ul::association::CloseSocket,
{
    let started = Instant::now();

    let pc = accepted_context(&*association, &file.sop_class_uid)?;

    let negotiated_ts = resolve_transfer_syntax(&file.file_transfer_syntax, &pc.transfer_syntax)?;

    let dicom_file = open_file(&file.path).map_err(Box::new).context(ReadFileSnafu {
        path: file.path.display().to_string(),
    })?;
    let data_set = dicom_file.into_inner();

    let command = CStoreRq::builder()
        .message_id(message_id)
        .affected_sop_class_uid(file.sop_class_uid.as_str())
        .affected_sop_instance_uid(file.sop_instance_uid.as_str())
        .build();
    send_command(association, pc.id, &command, Some((&data_set, negotiated_ts)))?;

    let mut assembler = Assembler::new([pc.id]);
    let message = loop {
        let pdu = match association.receive() {
            Ok(pdu) => pdu,
            Err(source) => {
                assembler.check_no_pending().context(ReassembleSnafu)?;
                return Err(source).context(AssociationSnafu);
            }
        };
        if let Some(message) = assembler.accept(pdu).context(ReassembleSnafu)? {
            break message;
        }
    };

    ensure!(
        message.command_kind == CommandKind::CStoreRsp,
        InvalidStateSnafu {
            message: format!("expected C-STORE-RSP, got {:?}", message.command_kind),
        }
    );

    let status = message
        .command
        .status
        .context(MissingElementSnafu { tag: dicom_dictionary_std::tags::STATUS })?;

    Ok(StoreResult {
        success: status == 0,
        status,
        round_trip_time: started.elapsed(),
    })
}

fn resolve_transfer_syntax<'a>(file_ts_uid: &str, negotiated_uid: &'a str) -> Result<&'a TransferSyntax> {
    ensure!(
        negotiated_uid == file_ts_uid || is_le_vr_family(file_ts_uid) && is_le_vr_family(negotiated_uid),
        InvalidStateSnafu {
            message: "cannot transcode".to_string(),
        }
    );
    TransferSyntaxRegistry
        .get(negotiated_uid)
        .context(UnsupportedTransferSyntaxSnafu { uid: negotiated_uid.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_list_dedups_and_orders_file_ts_first() {
        let list = fallback_transfer_syntaxes(EXPLICIT_VR_LE);
        assert_eq!(list, vec![EXPLICIT_VR_LE.to_string(), IMPLICIT_VR_LE.to_string()]);
    }

    #[test]
    fn resolve_rejects_non_trivial_transcode() {
        let err = resolve_transfer_syntax(
            "1.2.840.10008.1.2.4.50",
            "1.2.840.10008.1.2.4.51",
        );
        assert!(err.is_err());
    }

    #[test]
    fn resolve_accepts_vr_le_family_crossover() {
        let ts = resolve_transfer_syntax(IMPLICIT_VR_LE, EXPLICIT_VR_LE).unwrap();
        assert_eq!(ts.uid(), EXPLICIT_VR_LE);
    }
}
