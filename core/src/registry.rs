//! Bookkeeping for in-flight transport tasks.
//!
//! # Design
//! Transport callbacks only carry a `TaskId`, so whatever is needed to
//! resolve a call (accumulated bytes, progress accounting, the completion)
//! lives here, keyed by that id. A single mutex guards the whole map; every
//! operation is an in-memory lookup, so contention is negligible next to
//! network latency.
//!
//! A record leaves the map through `remove`, which hands ownership to the
//! caller. Completions are `FnOnce` and are only reachable through a removed
//! record, so a task can be resolved at most once and the lock is never held
//! while user code runs.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::progress::Progress;
use crate::transport::{TaskId, TransportFailure};

pub type DataCompletion = Box<dyn FnOnce(Result<Vec<u8>, TransportFailure>, i32) + Send + 'static>;
pub type FileCompletion = Box<dyn FnOnce(Result<PathBuf, TransportFailure>, i32) + Send + 'static>;

/// Progress accounting shared by both record shapes.
///
/// Counts are per attempt. The shared `Progress` only ever moves up to them,
/// so several attempts of one call report the larger attempt, not the sum.
pub struct ProgressBook {
    progress: Arc<Progress>,
    counted_total: bool,
    transferred: u64,
}

impl ProgressBook {
    pub fn new(progress: Arc<Progress>) -> Self {
        Self {
            progress,
            counted_total: false,
            transferred: 0,
        }
    }

    pub fn progress(&self) -> &Arc<Progress> {
        &self.progress
    }

    /// The expected total is only taken from the first call.
    pub fn record_sent(&mut self, bytes_sent: u64, total_expected: u64) {
        self.record(bytes_sent, total_expected);
    }

    /// Same first-call rule as `record_sent`, for download writes.
    pub fn record_written(&mut self, bytes_written: u64, total_expected: u64) {
        self.record(bytes_written, total_expected);
    }

    fn record(&mut self, bytes: u64, total_expected: u64) {
        if !self.counted_total {
            self.counted_total = true;
            self.progress.raise_total(total_expected);
        }
        self.transferred += bytes;
        self.progress.raise_completed(self.transferred);
    }
}

/// A task that resolves to response bytes.
pub struct DataRecord {
    pub data: Vec<u8>,
    pub book: ProgressBook,
    /// Staged upload body, removed once the task resolves.
    pub staged: Option<PathBuf>,
    completion: DataCompletion,
}

impl DataRecord {
    pub fn new(progress: Arc<Progress>, completion: DataCompletion) -> Self {
        Self {
            data: Vec::new(),
            book: ProgressBook::new(progress),
            staged: None,
            completion,
        }
    }

    pub fn with_staged(mut self, staged: PathBuf) -> Self {
        self.staged = Some(staged);
        self
    }

    pub fn resolve(self, result: Result<Vec<u8>, TransportFailure>, status: i32) {
        (self.completion)(result, status);
    }

    /// Resolve with the bytes accumulated so far.
    pub fn resolve_with_data(mut self, status: i32) {
        let data = std::mem::take(&mut self.data);
        self.resolve(Ok(data), status);
    }
}

/// A task that resolves to a downloaded file location.
pub struct FileRecord {
    pub book: ProgressBook,
    completion: FileCompletion,
}

impl FileRecord {
    pub fn new(progress: Arc<Progress>, completion: FileCompletion) -> Self {
        Self {
            book: ProgressBook::new(progress),
            completion,
        }
    }

    pub fn resolve(self, result: Result<PathBuf, TransportFailure>, status: i32) {
        (self.completion)(result, status);
    }
}

pub enum TrackedTask {
    Data(DataRecord),
    File(FileRecord),
}

impl TrackedTask {
    pub fn book_mut(&mut self) -> &mut ProgressBook {
        match self {
            TrackedTask::Data(record) => &mut record.book,
            TrackedTask::File(record) => &mut record.book,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, TrackedTask::File(_))
    }
}

/// Thread-safe map from task id to its tracked record.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<TaskId, TrackedTask>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, task: TaskId, record: TrackedTask) {
        if self.tasks.lock().insert(task, record).is_some() {
            warn!(%task, "task registered twice; previous record dropped unresolved");
        }
    }

    /// Run `f` against the record for `task` under the registry lock.
    /// Returns `None`, without calling `f`, when the task is unknown.
    pub fn with_record<R>(&self, task: TaskId, f: impl FnOnce(&mut TrackedTask) -> R) -> Option<R> {
        self.tasks.lock().get_mut(&task).map(f)
    }

    /// Take the record for `task` out of the registry.
    pub fn remove(&self, task: TaskId) -> Option<TrackedTask> {
        self.tasks.lock().remove(&task)
    }

    /// Take the record only if `pred` accepts it.
    pub fn remove_if(&self, task: TaskId, pred: impl FnOnce(&TrackedTask) -> bool) -> Option<TrackedTask> {
        let mut tasks = self.tasks.lock();
        if tasks.get(&task).is_some_and(pred) {
            tasks.remove(&task)
        } else {
            None
        }
    }

    pub fn contains(&self, task: TaskId) -> bool {
        self.tasks.lock().contains_key(&task)
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn data_record(calls: Arc<AtomicUsize>) -> TrackedTask {
        TrackedTask::Data(DataRecord::new(
            Progress::new(),
            Box::new(move |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
            }),
        ))
    }

    #[test]
    fn unknown_task_is_a_no_op() {
        let registry = TaskRegistry::new();
        let id = TaskId::new();
        assert!(registry.with_record(id, |_| ()).is_none());
        assert!(registry.remove(id).is_none());
    }

    #[test]
    fn remove_resolves_once() {
        let registry = TaskRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let id = TaskId::new();
        registry.register(id, data_record(Arc::clone(&calls)));
        assert!(registry.contains(id));

        for _ in 0..3 {
            if let Some(TrackedTask::Data(record)) = registry.remove(id) {
                record.resolve_with_data(200);
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_if_respects_predicate() {
        let registry = TaskRegistry::new();
        let id = TaskId::new();
        registry.register(id, data_record(Arc::new(AtomicUsize::new(0))));
        assert!(registry.remove_if(id, TrackedTask::is_file).is_none());
        assert!(registry.contains(id));
        assert!(registry.remove_if(id, |r| !r.is_file()).is_some());
    }

    #[test]
    fn progress_total_counted_once() {
        let progress = Progress::new();
        let mut book = ProgressBook::new(Arc::clone(&progress));
        book.record_sent(10, 100);
        book.record_sent(30, 100);
        book.record_sent(60, 100);
        assert_eq!(progress.total(), 100);
        assert_eq!(progress.completed(), 100);
    }

    #[test]
    fn second_attempt_of_a_call_is_not_added() {
        let progress = Progress::new();
        for _ in 0..2 {
            let mut book = ProgressBook::new(Arc::clone(&progress));
            book.record_sent(6, 13);
            book.record_sent(7, 13);
        }
        assert_eq!(progress.total(), 13);
        assert_eq!(progress.completed(), 13);
    }

    #[test]
    fn concurrent_resolution_happens_once_per_task() {
        let registry = Arc::new(TaskRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let ids: Vec<TaskId> = (0..64).map(|_| TaskId::new()).collect();
        for id in &ids {
            registry.register(*id, data_record(Arc::clone(&calls)));
        }

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let ids = ids.clone();
                thread::spawn(move || {
                    for id in ids {
                        registry.with_record(id, |r| {
                            if let TrackedTask::Data(d) = r {
                                d.data.extend_from_slice(b"x");
                            }
                        });
                        if let Some(TrackedTask::Data(record)) = registry.remove(id) {
                            record.resolve_with_data(200);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), ids.len());
        assert!(registry.is_empty());
    }
}
