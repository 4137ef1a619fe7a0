//! The default storage handler: persists each received file under
//! `storage_dir/{sop_instance_uid}.dcm`, with an optional hierarchical
//! patient/study/series layout.

use std::path::{Path, PathBuf};

use dicom_dictionary_std::tags;
use dicom_object::{FileMetaTableBuilder, InMemDicomObject};
use dicom_transfer_syntax_registry::TransferSyntaxRegistry;
use snafu::{OptionExt, ResultExt};

use crate::delegate::{ReceivedFile, StorageDelegate, StoreOutcome};
use crate::error::{CreateDirSnafu, MissingElementSnafu, Result, UnsupportedTransferSyntaxSnafu, WriteFileSnafu};

/// How a received file's path under `storage_dir` is derived.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Layout {
    /// `storage_dir/{sop_instance_uid}.dcm`
    Flat,
    /// `storage_dir/{patient_id}/{study_instance_uid}/{series_instance_uid}/{sop_instance_uid}.dcm`
    Hierarchical,
}

/// Default [`StorageDelegate`]: writes every accepted file to disk and
/// otherwise accepts everything offered.
pub struct FileSystemStorage {
    storage_dir: PathBuf,
    layout: Layout,
}

impl FileSystemStorage {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        FileSystemStorage {
            storage_dir: storage_dir.into(),
            layout: Layout::Flat,
        }
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    fn destination_path(&self, file: &ReceivedFile) -> Result<PathBuf> {
        let file_name = format!("{}.dcm", file.sop_instance_uid);
        match self.layout {
            Layout::Flat => Ok(self.storage_dir.join(file_name)),
            Layout::Hierarchical => {
                let patient_id = string_element(&file.data_set, tags::PATIENT_ID).unwrap_or_else(|| "UNKNOWN".to_string());
                let study = string_element(&file.data_set, tags::STUDY_INSTANCE_UID).unwrap_or_else(|| "UNKNOWN".to_string());
                let series = string_element(&file.data_set, tags::SERIES_INSTANCE_UID).unwrap_or_else(|| "UNKNOWN".to_string());
                let dir = self.storage_dir.join(patient_id).join(study).join(series);
                std::fs::create_dir_all(&dir).context(CreateDirSnafu {
                    path: dir.display().to_string(),
                })?;
                Ok(dir.join(file_name))
            }
        }
    }

    fn persist(&self, file: &ReceivedFile) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.storage_dir).context(CreateDirSnafu {
            path: self.storage_dir.display().to_string(),
        })?;
        let path = self.destination_path(file)?;
        let ts = TransferSyntaxRegistry
            .get(&file.transfer_syntax_uid)
            .context(UnsupportedTransferSyntaxSnafu {
                uid: file.transfer_syntax_uid.clone(),
            })?;

        let meta = FileMetaTableBuilder::new()
            .media_storage_sop_class_uid(file.sop_class_uid.clone())
            .media_storage_sop_instance_uid(file.sop_instance_uid.clone())
            .transfer_syntax(ts.uid())
            .build()
            .ok()
            .context(MissingElementSnafu)?;

        let dicom_file = file.data_set.clone().with_exact_meta(meta);
        dicom_file
            .write_to_file(&path)
            .map_err(Box::new)
            .context(WriteFileSnafu {
                path: path.display().to_string(),
            })?;
        Ok(path)
    }
}

fn string_element(obj: &InMemDicomObject, tag: dicom_core::Tag) -> Option<String> {
    obj.element_opt(tag)
        .ok()
        .flatten()
        .and_then(|elem| elem.to_str().ok())
        .map(|s| s.trim_end_matches(['\0', ' ']).to_string())
}

impl StorageDelegate for FileSystemStorage {
    fn did_receive(&self, file: ReceivedFile) -> StoreOutcome {
        match self.persist(&file) {
            Ok(_path) => StoreOutcome::Success,
            Err(error) => {
                tracing::error!(%error, "failed to persist received file");
                StoreOutcome::ProcessingFailure
            }
        }
    }
}

/// Path a flat-layout store would use for `sop_instance_uid`, exposed
/// for callers that need to look a file up without re-deriving the
/// naming rule themselves.
pub fn flat_path(storage_dir: &Path, sop_instance_uid: &str) -> PathBuf {
    storage_dir.join(format!("{sop_instance_uid}.dcm"))
}
