//! A durable, crash-recoverable store-and-forward queue: each item's
//! payload is written to its own file before the item is appended to
//! a JSON metadata index, so a crash between the two leaves an orphan
//! payload rather than a dangling metadata entry.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use uuid::Uuid;

const METADATA_FILE: &str = "queue_metadata.json";

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("failed to create queue directory {path}"))]
    CreateDir { path: String, source: std::io::Error },

    #[snafu(display("failed to read queue metadata at {path}"))]
    ReadMetadata { path: String, source: std::io::Error },

    #[snafu(display("failed to parse queue metadata at {path}"))]
    ParseMetadata { path: String, source: serde_json::Error },

    #[snafu(display("failed to write file {path}"))]
    WriteFile { path: String, source: std::io::Error },

    #[snafu(display("failed to read payload file {path}"))]
    ReadPayload { path: String, source: std::io::Error },

    #[snafu(display("queue is {status:?} and is not accepting new items"))]
    NotAcceptingEnqueues { status: QueueStatus },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum ItemStatus {
    Pending,
    Sending,
    Completed,
    Failed,
}

/// One queued C-STORE request: its payload lives alongside the
/// metadata file as `{id}.dcm`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedItem {
    pub id: Uuid,
    pub priority: Priority,
    pub status: ItemStatus,
    pub attempt_count: u32,
    pub sequence: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: time::OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_attempt_at: Option<time::OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<time::OffsetDateTime>,
    pub metadata: BTreeMap<String, String>,
}

impl QueuedItem {
    pub fn payload_file_name(&self) -> String {
        format!("{}.dcm", self.id)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct MetadataFile {
    items: Vec<QueuedItem>,
    total_processed: u64,
    #[serde(with = "time::serde::rfc3339")]
    created_at: time::OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    last_modified_at: time::OffsetDateTime,
}

/// The queue's overall run state, independent of any individual
/// item's status.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum QueueStatus {
    Running,
    Paused,
    Draining,
    Stopped,
}

/// Outcome of attempting to send one item, classifying the failure the
/// same way every service crate's `Error::category()` does.
pub enum SendOutcome {
    Success,
    TransientFailure,
    PermanentFailure,
}

struct State {
    items: Vec<QueuedItem>,
    total_processed: u64,
    next_sequence: u64,
    status: QueueStatus,
}

/// A durable FIFO-or-priority queue of store requests, persisted under
/// `dir/queue_metadata.json` plus one payload file per item.
pub struct StoreForwardQueue {
    dir: PathBuf,
    max_retry_attempts: u32,
    completed_retention: time::Duration,
    state: parking_lot::Mutex<State>,
}

impl StoreForwardQueue {
    /// Open (or create) the queue rooted at `dir`, reverting any item
    /// left `Sending` by a previous process to `Pending`.
    pub fn open(
        dir: impl Into<PathBuf>,
        max_retry_attempts: u32,
        completed_retention: std::time::Duration,
    ) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).context(CreateDirSnafu { path: dir.display().to_string() })?;
        let metadata_path = dir.join(METADATA_FILE);

        let metadata = if metadata_path.exists() {
            let raw = fs::read(&metadata_path).context(ReadMetadataSnafu {
                path: metadata_path.display().to_string(),
            })?;
            let mut metadata: MetadataFile = serde_json::from_slice(&raw).context(ParseMetadataSnafu {
                path: metadata_path.display().to_string(),
            })?;
            for item in &mut metadata.items {
                if item.status == ItemStatus::Sending {
                    item.status = ItemStatus::Pending;
                }
            }
            metadata
        } else {
            let now = now();
            MetadataFile { items: Vec::new(), total_processed: 0, created_at: now, last_modified_at: now }
        };

        let next_sequence = metadata.items.iter().map(|item| item.sequence).max().map_or(0, |m| m + 1);

        let queue = StoreForwardQueue {
            dir,
            max_retry_attempts,
            completed_retention: time::Duration::try_from(completed_retention)
                .unwrap_or(time::Duration::ZERO),
            state: parking_lot::Mutex::new(State {
                items: metadata.items,
                total_processed: metadata.total_processed,
                next_sequence,
                status: QueueStatus::Running,
            }),
        };
        queue.persist()?;
        Ok(queue)
    }

    pub fn status(&self) -> QueueStatus {
        self.state.lock().status
    }

    pub fn pause(&self) {
        self.state.lock().status = QueueStatus::Paused;
    }

    pub fn resume(&self) {
        self.state.lock().status = QueueStatus::Running;
    }

    /// Stop accepting new enqueues; keep sending until empty, at which
    /// point [`status`](Self::status) reports [`QueueStatus::Stopped`].
    pub fn start_draining(&self) {
        self.state.lock().status = QueueStatus::Draining;
    }

    /// Write `payload` to disk and append a new `Pending` item ahead
    /// of persisting the metadata file, so a crash mid-write never
    /// references a payload that doesn't exist on disk.
    pub fn enqueue(&self, payload: &[u8], priority: Priority, metadata: HashMap<String, String>) -> Result<Uuid> {
        let mut state = self.state.lock();
        if matches!(state.status, QueueStatus::Draining | QueueStatus::Stopped) {
            return NotAcceptingEnqueuesSnafu { status: state.status }.fail();
        }
        let id = Uuid::new_v4();
        let path = self.dir.join(format!("{id}.dcm"));
        write_atomically(&path, payload)?;

        let item = QueuedItem {
            id,
            priority,
            status: ItemStatus::Pending,
            attempt_count: 0,
            sequence: state.next_sequence,
            created_at: now(),
            last_attempt_at: None,
            completed_at: None,
            metadata: metadata.into_iter().collect(),
        };
        state.next_sequence += 1;
        state.items.push(item);
        drop(state);
        self.persist()?;
        Ok(id)
    }

    /// Select the next `Pending` item by priority (`High` > `Medium` >
    /// `Low`), then insertion order, and flip it to `Sending`.
    fn take_next_pending(&self) -> Option<(Uuid, usize)> {
        let mut state = self.state.lock();
        let index = state
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.status == ItemStatus::Pending)
            .min_by_key(|(_, item)| (item.priority, item.sequence))
            .map(|(index, _)| index)?;
        state.items[index].status = ItemStatus::Sending;
        state.items[index].attempt_count += 1;
        state.items[index].last_attempt_at = Some(now());
        Some((state.items[index].id, index))
    }

    /// Run one processing step: pick the next pending item (if any),
    /// load its payload, hand both to `send`, and apply the resulting
    /// status transition. Returns the id processed, or `None` if there
    /// was nothing to do (callers typically sleep and retry).
    pub fn process_one(&self, send: impl FnOnce(&QueuedItem, &[u8]) -> SendOutcome) -> Result<Option<Uuid>> {
        if !matches!(self.status(), QueueStatus::Running | QueueStatus::Draining) {
            return Ok(None);
        }
        let Some((id, _)) = self.take_next_pending() else {
            self.maybe_finish_draining();
            return Ok(None);
        };

        let payload_path = self.dir.join(format!("{id}.dcm"));
        let payload = fs::read(&payload_path).context(ReadPayloadSnafu {
            path: payload_path.display().to_string(),
        })?;
        let item = {
            let state = self.state.lock();
            state.items.iter().find(|item| item.id == id).cloned().expect("just inserted")
        };

        let outcome = send(&item, &payload);
        self.apply_outcome(id, outcome)?;
        self.maybe_finish_draining();
        Ok(Some(id))
    }

    fn apply_outcome(&self, id: Uuid, outcome: SendOutcome) -> Result<()> {
        let remove_payload;
        {
            let mut state = self.state.lock();
            let item = state.items.iter_mut().find(|item| item.id == id).expect("item exists");
            match outcome {
                SendOutcome::Success => {
                    item.status = ItemStatus::Completed;
                    item.completed_at = Some(now());
                    state.total_processed += 1;
                    remove_payload = true;
                }
                SendOutcome::PermanentFailure => {
                    item.status = ItemStatus::Failed;
                    remove_payload = true;
                }
                SendOutcome::TransientFailure => {
                    if item.attempt_count >= self.max_retry_attempts {
                        item.status = ItemStatus::Failed;
                        remove_payload = true;
                    } else {
                        item.status = ItemStatus::Pending;
                        remove_payload = false;
                    }
                }
            }
        }
        if remove_payload {
            let _ = fs::remove_file(self.dir.join(format!("{id}.dcm")));
        }
        self.persist()?;
        Ok(())
    }

    /// Drop `Completed` items older than `completed_retention`, and
    /// finish draining to `Stopped` once nothing is in flight.
    pub fn sweep(&self) -> Result<()> {
        let mut state = self.state.lock();
        let cutoff = now() - self.completed_retention;
        state
            .items
            .retain(|item| !(item.status == ItemStatus::Completed && item.completed_at.is_some_and(|at| at <= cutoff)));
        drop(state);
        self.persist()?;
        self.maybe_finish_draining();
        Ok(())
    }

    /// Spawn a background thread that repeatedly calls [`process_one`]
    /// with `send` until the queue reaches [`QueueStatus::Stopped`].
    ///
    /// [`process_one`]: Self::process_one
    pub fn run_loop<F>(
        self: std::sync::Arc<Self>,
        poll_interval: std::time::Duration,
        mut send: F,
    ) -> std::thread::JoinHandle<()>
    where
        F: FnMut(&QueuedItem, &[u8]) -> SendOutcome + Send + 'static,
    {
        std::thread::spawn(move || loop {
            match self.status() {
                QueueStatus::Stopped => break,
                QueueStatus::Paused => {
                    std::thread::sleep(poll_interval);
                    continue;
                }
                QueueStatus::Running | QueueStatus::Draining => {}
            }
            match self.process_one(|item, payload| send(item, payload)) {
                Ok(Some(_)) => {}
                Ok(None) => std::thread::sleep(poll_interval),
                Err(error) => {
                    tracing::warn!(%error, "queue processing step failed");
                    std::thread::sleep(poll_interval);
                }
            }
        })
    }

    fn maybe_finish_draining(&self) {
        let mut state = self.state.lock();
        if state.status != QueueStatus::Draining {
            return;
        }
        let in_flight = state
            .items
            .iter()
            .any(|item| matches!(item.status, ItemStatus::Pending | ItemStatus::Sending));
        if !in_flight {
            state.status = QueueStatus::Stopped;
        }
    }

    fn persist(&self) -> Result<()> {
        let state = self.state.lock();
        let metadata = MetadataFile {
            items: state.items.clone(),
            total_processed: state.total_processed,
            created_at: now(),
            last_modified_at: now(),
        };
        drop(state);
        let path = self.dir.join(METADATA_FILE);
        let json = serde_json::to_vec_pretty(&metadata).expect("metadata always serializes");
        write_atomically(&path, &json)
    }
}

fn now() -> time::OffsetDateTime {
    time::OffsetDateTime::now_utc()
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp_path).context(WriteFileSnafu {
            path: tmp_path.display().to_string(),
        })?;
        file.write_all(bytes).context(WriteFileSnafu {
            path: tmp_path.display().to_string(),
        })?;
        file.sync_all().context(WriteFileSnafu {
            path: tmp_path.display().to_string(),
        })?;
    }
    fs::rename(&tmp_path, path).context(WriteFileSnafu { path: path.display().to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_persists_payload_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let queue = StoreForwardQueue::open(dir.path(), 3, std::time::Duration::from_secs(60)).unwrap();
        let id = queue.enqueue(b"dicom bytes", Priority::Medium, HashMap::new()).unwrap();
        assert!(dir.path().join(format!("{id}.dcm")).exists());
        assert!(dir.path().join("queue_metadata.json").exists());
    }

    #[test]
    fn process_one_picks_high_priority_first() {
        let dir = tempfile::tempdir().unwrap();
        let queue = StoreForwardQueue::open(dir.path(), 3, std::time::Duration::from_secs(60)).unwrap();
        queue.enqueue(b"low", Priority::Low, HashMap::new()).unwrap();
        let high_id = queue.enqueue(b"high", Priority::High, HashMap::new()).unwrap();

        let processed = queue.process_one(|_item, _payload| SendOutcome::Success).unwrap();
        assert_eq!(processed, Some(high_id));
    }

    #[test]
    fn transient_failure_reverts_to_pending_until_max_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let queue = StoreForwardQueue::open(dir.path(), 2, std::time::Duration::from_secs(60)).unwrap();
        let id = queue.enqueue(b"x", Priority::Medium, HashMap::new()).unwrap();

        queue.process_one(|_, _| SendOutcome::TransientFailure).unwrap();
        assert_eq!(queue.state.lock().items[0].status, ItemStatus::Pending);

        queue.process_one(|_, _| SendOutcome::TransientFailure).unwrap();
        let item = queue.state.lock().items.iter().find(|i| i.id == id).unwrap().clone();
        assert_eq!(item.status, ItemStatus::Failed);
        assert!(!dir.path().join(format!("{id}.dcm")).exists());
    }

    #[test]
    fn crash_recovery_reverts_sending_to_pending_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let queue = StoreForwardQueue::open(dir.path(), 3, std::time::Duration::from_secs(60)).unwrap();
            queue.enqueue(b"x", Priority::Medium, HashMap::new()).unwrap();
            queue.take_next_pending().unwrap();
            // simulate a crash: the item is left Sending in the
            // persisted metadata, which we force by persisting here.
            queue.persist().unwrap();
        }
        let reopened = StoreForwardQueue::open(dir.path(), 3, std::time::Duration::from_secs(60)).unwrap();
        assert_eq!(reopened.state.lock().items[0].status, ItemStatus::Pending);
    }

    #[test]
    fn draining_finishes_to_stopped_once_empty() {
        let dir = tempfile::tempdir().unwrap();
        let queue = StoreForwardQueue::open(dir.path(), 3, std::time::Duration::from_secs(60)).unwrap();
        queue.enqueue(b"x", Priority::Medium, HashMap::new()).unwrap();
        queue.start_draining();
        queue.process_one(|_, _| SendOutcome::Success).unwrap();
        assert_eq!(queue.status(), QueueStatus::Stopped);
    }
}
