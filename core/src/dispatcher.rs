//! Starts transport tasks and resolves them from transport callbacks.
//!
//! # Design
//! `Dispatcher` owns the transport and the staging sink; the delegate half
//! (`DispatchCore`) owns the registry and is what transports call back into.
//! Each send creates the task, registers its record, then resumes it, so no
//! callback can arrive for an id the registry has not seen yet.
//!
//! Callbacks for unknown ids are ignored: the task was already resolved, or
//! was never tracked by this dispatcher.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::RestError;
use crate::http::PreparedRequest;
use crate::progress::Progress;
use crate::registry::{DataCompletion, DataRecord, FileCompletion, FileRecord, TaskRegistry, TrackedTask};
use crate::sink::ByteSink;
use crate::transport::{TaskId, Transport, TransportDelegate, TransportFailure, TransportTask};

/// Handle for a task that has been started.
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub task: TaskId,
    pub progress: Arc<Progress>,
}

pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    sink: Arc<dyn ByteSink>,
    core: Arc<DispatchCore>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, sink: Arc<dyn ByteSink>) -> Self {
        Self::with_registry(transport, sink, Arc::new(TaskRegistry::new()))
    }

    pub fn with_registry(
        transport: Arc<dyn Transport>,
        sink: Arc<dyn ByteSink>,
        registry: Arc<TaskRegistry>,
    ) -> Self {
        let core = Arc::new(DispatchCore {
            registry,
            sink: Arc::clone(&sink),
        });
        Self {
            transport,
            sink,
            core,
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.core.registry
    }

    pub fn sink(&self) -> &Arc<dyn ByteSink> {
        &self.sink
    }

    /// Plain request, response bytes streamed back.
    pub fn send_data_request(
        &self,
        request: PreparedRequest,
        progress: Arc<Progress>,
        completion: DataCompletion,
    ) -> Dispatched {
        debug!(method = %request.method, url = %request.url, "dispatching data task");
        let task = self.transport.data_task(request, self.delegate());
        let record = DataRecord::new(Arc::clone(&progress), completion);
        self.start(task, TrackedTask::Data(record), progress)
    }

    /// Move the request body into a staged file for `send_upload_request`.
    ///
    /// Fails with `WriteFailure` before anything touches the network.
    pub fn stage_body(&self, request: &mut PreparedRequest) -> Result<PathBuf, RestError> {
        let body = request.body.take().unwrap_or_default();
        self.sink.write(&body)
    }

    /// Upload the staged body at `staged`. The file is discarded once the
    /// task resolves.
    pub fn send_upload_request(
        &self,
        request: PreparedRequest,
        staged: PathBuf,
        progress: Arc<Progress>,
        completion: DataCompletion,
    ) -> Dispatched {
        debug!(method = %request.method, url = %request.url, staged = %staged.display(), "dispatching upload task");
        let task = self.transport.upload_task(request, staged.clone(), self.delegate());
        let record = DataRecord::new(Arc::clone(&progress), completion).with_staged(staged);
        self.start(task, TrackedTask::Data(record), progress)
    }

    /// Response written to a transport-owned file whose location is handed back.
    pub fn send_download_request(
        &self,
        request: PreparedRequest,
        progress: Arc<Progress>,
        completion: FileCompletion,
    ) -> Dispatched {
        debug!(method = %request.method, url = %request.url, "dispatching download task");
        let task = self.transport.download_task(request, self.delegate());
        let record = FileRecord::new(Arc::clone(&progress), completion);
        self.start(task, TrackedTask::File(record), progress)
    }

    fn delegate(&self) -> Arc<dyn TransportDelegate> {
        Arc::clone(&self.core) as Arc<dyn TransportDelegate>
    }

    fn start(&self, task: Box<dyn TransportTask>, record: TrackedTask, progress: Arc<Progress>) -> Dispatched {
        let id = task.id();
        if task.kind().produces_file() != record.is_file() {
            warn!(task = %id, kind = ?task.kind(), "transport task kind does not match its record");
        }
        self.core.registry.register(id, record);
        task.resume();
        Dispatched { task: id, progress }
    }
}

/// The transport-facing half of the dispatcher.
struct DispatchCore {
    registry: Arc<TaskRegistry>,
    sink: Arc<dyn ByteSink>,
}

impl DispatchCore {
    /// Resolve with the record's accumulated bytes, or with `failure`.
    fn resolve_data(&self, record: DataRecord, failure: Option<TransportFailure>, status: i32) {
        if let Some(staged) = &record.staged {
            self.sink.discard(staged);
        }
        match failure {
            None => record.resolve_with_data(status),
            Some(failure) => record.resolve(Err(failure), status),
        }
    }
}

impl TransportDelegate for DispatchCore {
    fn did_receive_data(&self, task: TaskId, data: &[u8]) {
        self.registry.with_record(task, |record| {
            if let TrackedTask::Data(record) = record {
                record.data.extend_from_slice(data);
            }
        });
    }

    fn did_send_body_data(&self, task: TaskId, bytes_sent: u64, total_expected: u64) {
        self.registry
            .with_record(task, |record| record.book_mut().record_sent(bytes_sent, total_expected));
    }

    fn did_write_data(&self, task: TaskId, bytes_written: u64, total_expected: u64) {
        self.registry
            .with_record(task, |record| record.book_mut().record_written(bytes_written, total_expected));
    }

    fn did_finish_downloading(&self, task: TaskId, location: &Path, status: i32) {
        if let Some(TrackedTask::File(record)) = self.registry.remove_if(task, TrackedTask::is_file) {
            debug!(%task, status, "download finished");
            record.resolve(Ok(location.to_path_buf()), status);
        }
    }

    fn did_complete(&self, task: TaskId, status: i32, error: Option<TransportFailure>) {
        match error {
            Some(failure) => {
                debug!(%task, status, error = %failure, "task failed");
                match self.registry.remove(task) {
                    Some(TrackedTask::Data(record)) => self.resolve_data(record, Some(failure), status),
                    Some(TrackedTask::File(record)) => record.resolve(Err(failure), status),
                    None => {}
                }
            }
            None => match self.registry.remove(task) {
                Some(TrackedTask::Data(record)) => {
                    debug!(%task, status, len = record.data.len(), "task completed");
                    self.resolve_data(record, None, status);
                }
                // Downloads resolve in did_finish_downloading; reaching here
                // means the transport never produced a file.
                Some(TrackedTask::File(record)) => {
                    warn!(%task, status, "download completed without a file");
                    record.resolve(
                        Err(TransportFailure::new(-1, crate::error::ERROR_DOMAIN, "download completed without a file")),
                        status,
                    );
                }
                None => {}
            },
        }
    }
}
