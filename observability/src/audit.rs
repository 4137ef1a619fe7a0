//! The audit logger: an IHE ATNA-aligned event taxonomy with
//! console, rotating-file, and "unified logging" sinks. Grounded on
//! the structured logger's handler-fan-out shape, specialized to the
//! richer audit entry.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use snafu::{ResultExt, Snafu};

/// The IHE ATNA event category an audit entry belongs to.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    Association,
    Store,
    Query,
    Retrieve,
    Verification,
    Commitment,
    Connection,
    Security,
}

/// One side of an audit entry's transaction.
#[derive(Debug, Clone, Serialize)]
pub struct Participant {
    pub ae_title: String,
    pub host: String,
    pub port: u16,
    pub is_requestor: bool,
    pub user_identity: Option<String>,
}

/// How an audited operation concluded.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub enum Outcome {
    Success,
    MinorFailure,
    SeriousFailure,
    MajorFailure,
}

/// One audit record, serialized as a single JSON-Lines object.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub event_type: EventType,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: time::OffsetDateTime,
    pub source: Participant,
    pub destination: Participant,
    pub sop_class_uid: Option<String>,
    pub sop_instance_uid: Option<String>,
    pub study_instance_uid: Option<String>,
    pub series_instance_uid: Option<String>,
    pub patient_id: Option<String>,
    pub byte_count: Option<u64>,
    #[serde(with = "duration_as_millis")]
    pub duration: std::time::Duration,
    pub dimse_status: Option<u16>,
    pub outcome: Outcome,
    pub metadata: BTreeMap<String, String>,
}

mod duration_as_millis {
    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &std::time::Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u128(value.as_millis())
    }
}

pub trait AuditHandler: Send + Sync {
    fn handle(&self, entry: &AuditEntry);
}

/// Prints one line per entry to stderr, human-readable rather than
/// JSON (the file handler is the machine-readable sink).
pub struct ConsoleAuditHandler;

impl AuditHandler for ConsoleAuditHandler {
    fn handle(&self, entry: &AuditEntry) {
        eprintln!(
            "[audit] {:?} {:?} {} -> {} outcome={:?}",
            entry.timestamp, entry.event_type, entry.source.ae_title, entry.destination.ae_title, entry.outcome
        );
    }
}

/// A sink that forwards to the process's own unified structured
/// logger under the `Audit` category, for deployments that want a
/// single combined stream rather than a separate audit trail file.
pub struct UnifiedLoggingHandler;

impl AuditHandler for UnifiedLoggingHandler {
    fn handle(&self, entry: &AuditEntry) {
        let text = format!(
            "{:?} {} -> {} outcome={:?}",
            entry.event_type, entry.source.ae_title, entry.destination.ae_title, entry.outcome
        );
        tracing::info!(target: "dcmnet::audit", %text);
    }
}

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum FileHandlerError {
    #[snafu(display("failed to open audit log file {path}"))]
    Open { path: String, source: std::io::Error },

    #[snafu(display("failed to serialize audit entry"))]
    Serialize { source: serde_json::Error },

    #[snafu(display("failed to write audit log entry to {path}"))]
    Write { path: String, source: std::io::Error },

    #[snafu(display("failed to rotate audit log from {from} to {to}"))]
    Rotate { from: String, to: String, source: std::io::Error },
}

struct FileState {
    file: File,
    size: u64,
}

/// Appends one JSON object per line to `base_path`, rotating
/// synchronously to `base.1.jsonl`, `base.2.jsonl`, ... once the
/// active file exceeds `max_size_bytes`, keeping at most `max_files`
/// archives (the oldest is deleted).
pub struct FileAuditHandler {
    base_path: PathBuf,
    max_size_bytes: u64,
    max_files: u32,
    state: Mutex<FileState>,
}

impl FileAuditHandler {
    pub fn new(base_path: impl Into<PathBuf>, max_size_bytes: u64, max_files: u32) -> Result<Self, FileHandlerError> {
        let base_path = base_path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&base_path)
            .context(OpenSnafu { path: base_path.display().to_string() })?;
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(FileAuditHandler {
            base_path,
            max_size_bytes,
            max_files,
            state: Mutex::new(FileState { file, size }),
        })
    }

    fn rotate(&self, state: &mut FileState) -> Result<(), FileHandlerError> {
        for index in (1..self.max_files).rev() {
            let from = archive_path(&self.base_path, index);
            let to = archive_path(&self.base_path, index + 1);
            if from.exists() {
                fs::rename(&from, &to).context(RotateSnafu {
                    from: from.display().to_string(),
                    to: to.display().to_string(),
                })?;
            }
        }
        let oldest = archive_path(&self.base_path, self.max_files);
        if oldest.exists() {
            let _ = fs::remove_file(&oldest);
        }
        let first_archive = archive_path(&self.base_path, 1);
        fs::rename(&self.base_path, &first_archive).context(RotateSnafu {
            from: self.base_path.display().to_string(),
            to: first_archive.display().to_string(),
        })?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.base_path)
            .context(OpenSnafu { path: self.base_path.display().to_string() })?;
        state.file = file;
        state.size = 0;
        Ok(())
    }

    fn write_line(&self, entry: &AuditEntry) -> Result<(), FileHandlerError> {
        let mut line = serde_json::to_vec(entry).context(SerializeSnafu)?;
        line.push(b'\n');

        let mut state = self.state.lock();
        if state.size + line.len() as u64 > self.max_size_bytes && state.size > 0 {
            self.rotate(&mut state)?;
        }
        state.file.write_all(&line).context(WriteSnafu { path: self.base_path.display().to_string() })?;
        state.file.sync_data().context(WriteSnafu { path: self.base_path.display().to_string() })?;
        state.size += line.len() as u64;
        Ok(())
    }
}

fn archive_path(base_path: &Path, index: u32) -> PathBuf {
    let file_name = base_path.file_stem().and_then(|s| s.to_str()).unwrap_or("audit");
    let extension = base_path.extension().and_then(|s| s.to_str()).unwrap_or("jsonl");
    base_path.with_file_name(format!("{file_name}.{index}.{extension}"))
}

impl AuditHandler for FileAuditHandler {
    fn handle(&self, entry: &AuditEntry) {
        if let Err(error) = self.write_line(entry) {
            tracing::error!(%error, "failed to write audit log entry");
        }
    }
}

/// The process-wide audit logger, fanning each entry out to every
/// registered handler.
pub struct AuditLogger {
    handlers: RwLock<Vec<Arc<dyn AuditHandler>>>,
}

static GLOBAL: OnceLock<AuditLogger> = OnceLock::new();

impl Default for AuditLogger {
    fn default() -> Self {
        AuditLogger { handlers: RwLock::new(vec![Arc::new(ConsoleAuditHandler)]) }
    }
}

impl AuditLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> &'static AuditLogger {
        GLOBAL.get_or_init(AuditLogger::default)
    }

    pub fn add_handler(&self, handler: Arc<dyn AuditHandler>) {
        self.handlers.write().push(handler);
    }

    pub fn clear_handlers(&self) {
        self.handlers.write().clear();
    }

    pub fn record(&self, entry: AuditEntry) {
        for handler in self.handlers.read().iter() {
            handler.handle(&entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(ae_title: &str) -> Participant {
        Participant {
            ae_title: ae_title.to_string(),
            host: "127.0.0.1".to_string(),
            port: 104,
            is_requestor: true,
            user_identity: None,
        }
    }

    fn entry() -> AuditEntry {
        AuditEntry {
            event_type: EventType::Store,
            timestamp: time::OffsetDateTime::now_utc(),
            source: participant("SCU"),
            destination: participant("SCP"),
            sop_class_uid: Some("1.2.840.10008.5.1.4.1.1.7".to_string()),
            sop_instance_uid: Some("1.2.3.4".to_string()),
            study_instance_uid: None,
            series_instance_uid: None,
            patient_id: None,
            byte_count: Some(1024),
            duration: std::time::Duration::from_millis(42),
            dimse_status: Some(0),
            outcome: Outcome::Success,
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn file_handler_appends_one_json_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let handler = FileAuditHandler::new(&path, 1_000_000, 3).unwrap();
        handler.handle(&entry());
        handler.handle(&entry());

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        for line in contents.lines() {
            let _: serde_json::Value = serde_json::from_str(line).unwrap();
        }
    }

    #[test]
    fn file_handler_rotates_once_size_exceeds_the_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let handler = FileAuditHandler::new(&path, 1, 3).unwrap();
        handler.handle(&entry());
        handler.handle(&entry());

        assert!(dir.path().join("audit.1.jsonl").exists());
    }

    #[test]
    fn logger_fans_out_to_every_handler() {
        let logger = AuditLogger::new();
        logger.clear_handlers();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        logger.add_handler(Arc::new(FileAuditHandler::new(&path, 1_000_000, 3).unwrap()));
        logger.record(entry());
        assert!(path.exists());
    }
}
