//! Scripted in-memory transport.
//!
//! Routes requests by method and path to canned `MockReply`s and emits the
//! same event sequence the network transport does: body bytes sent (in two
//! callbacks, so first-call accounting is exercised), response chunks or
//! download writes, download finished, completion. Every request it sees is
//! recorded for later assertions.
//!
//! By default events are delivered inline from `resume`; `threaded()` moves
//! each task onto its own thread instead.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use uuid::Uuid;

use super::{TaskId, TaskKind, Transport, TransportDelegate, TransportFailure, TransportTask};
use crate::http::{HttpMethod, PreparedRequest, UNKNOWN_STATUS};

const CHUNK_SIZE: usize = 8;

/// What the mock server answers with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockReply {
    pub status: i32,
    pub body: Vec<u8>,
    pub failure: Option<TransportFailure>,
}

impl MockReply {
    pub fn bytes(status: i32, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
            failure: None,
        }
    }

    pub fn text(status: i32, body: &str) -> Self {
        Self::bytes(status, body.as_bytes().to_vec())
    }

    pub fn json(status: i32, body: &serde_json::Value) -> Self {
        Self::bytes(status, body.to_string().into_bytes())
    }

    pub fn empty(status: i32) -> Self {
        Self::bytes(status, Vec::new())
    }

    /// A connection-level failure with no HTTP response.
    pub fn failure(failure: TransportFailure) -> Self {
        Self {
            status: UNKNOWN_STATUS,
            body: Vec::new(),
            failure: Some(failure),
        }
    }
}

type Handler = Arc<dyn Fn(&PreparedRequest) -> MockReply + Send + Sync>;

struct Route {
    method: HttpMethod,
    path: String,
    handler: Handler,
}

/// Transport that answers from a routing table instead of the network.
pub struct MockTransport {
    routes: Mutex<Vec<Route>>,
    seen: Mutex<Vec<PreparedRequest>>,
    download_dir: PathBuf,
    threaded: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(Vec::new()),
            seen: Mutex::new(Vec::new()),
            download_dir: std::env::temp_dir(),
            threaded: false,
        }
    }

    /// Deliver each task's events from a fresh thread.
    pub fn threaded(mut self) -> Self {
        self.threaded = true;
        self
    }

    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    /// Answer `method path` with whatever `handler` returns. Later routes win.
    pub fn route<F>(&self, method: HttpMethod, path: &str, handler: F) -> &Self
    where
        F: Fn(&PreparedRequest) -> MockReply + Send + Sync + 'static,
    {
        self.routes.lock().push(Route {
            method,
            path: normalize(path),
            handler: Arc::new(handler),
        });
        self
    }

    /// Answer `method path` with the same reply every time.
    pub fn reply(&self, method: HttpMethod, path: &str, reply: MockReply) -> &Self {
        self.route(method, path, move |_| reply.clone())
    }

    /// Every request seen so far, in creation order. Upload bodies are read
    /// back from their staged files.
    pub fn requests(&self) -> Vec<PreparedRequest> {
        self.seen.lock().clone()
    }

    pub fn count(&self, method: HttpMethod, path: &str) -> usize {
        let path = normalize(path);
        self.seen
            .lock()
            .iter()
            .filter(|r| r.method == method && normalize(r.url.path()) == path)
            .count()
    }

    fn answer(&self, request: &PreparedRequest) -> MockReply {
        let path = normalize(request.url.path());
        let handler = self
            .routes
            .lock()
            .iter()
            .rev()
            .find(|r| r.method == request.method && r.path == path)
            .map(|r| Arc::clone(&r.handler));
        match handler {
            Some(handler) => handler(request),
            None => MockReply::text(404, "no mock route"),
        }
    }

    fn task(
        &self,
        kind: TaskKind,
        request: PreparedRequest,
        upload_from: Option<PathBuf>,
        delegate: Arc<dyn TransportDelegate>,
    ) -> Box<dyn TransportTask> {
        let mut recorded = request.clone();
        if let Some(path) = &upload_from {
            recorded.body = fs::read(path).ok();
        }
        let reply = self.answer(&recorded);
        self.seen.lock().push(recorded);
        Box::new(MockTask {
            id: TaskId::new(),
            kind,
            upload_from,
            reply,
            delegate,
            download_dir: self.download_dir.clone(),
            threaded: self.threaded,
        })
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    fn data_task(
        &self,
        request: PreparedRequest,
        delegate: Arc<dyn TransportDelegate>,
    ) -> Box<dyn TransportTask> {
        self.task(TaskKind::Data, request, None, delegate)
    }

    fn upload_task(
        &self,
        request: PreparedRequest,
        body: PathBuf,
        delegate: Arc<dyn TransportDelegate>,
    ) -> Box<dyn TransportTask> {
        self.task(TaskKind::Upload, request, Some(body), delegate)
    }

    fn download_task(
        &self,
        request: PreparedRequest,
        delegate: Arc<dyn TransportDelegate>,
    ) -> Box<dyn TransportTask> {
        self.task(TaskKind::Download, request, None, delegate)
    }
}

struct MockTask {
    id: TaskId,
    kind: TaskKind,
    upload_from: Option<PathBuf>,
    reply: MockReply,
    delegate: Arc<dyn TransportDelegate>,
    download_dir: PathBuf,
    threaded: bool,
}

impl TransportTask for MockTask {
    fn id(&self) -> TaskId {
        self.id
    }

    fn kind(&self) -> TaskKind {
        self.kind
    }

    fn resume(self: Box<Self>) {
        if self.threaded {
            thread::spawn(move || self.run());
        } else {
            self.run();
        }
    }
}

impl MockTask {
    fn run(self) {
        let delegate = &self.delegate;
        if let Some(path) = &self.upload_from {
            match fs::read(path) {
                Ok(bytes) => {
                    let total = bytes.len() as u64;
                    let first = total / 2;
                    delegate.did_send_body_data(self.id, first, total);
                    delegate.did_send_body_data(self.id, total - first, total);
                }
                Err(err) => {
                    delegate.did_complete(self.id, UNKNOWN_STATUS, Some(TransportFailure::io(&err)));
                    return;
                }
            }
        }

        if let Some(failure) = self.reply.failure.clone() {
            delegate.did_complete(self.id, self.reply.status, Some(failure));
            return;
        }

        match self.kind {
            TaskKind::Download => self.download(),
            TaskKind::Data | TaskKind::Upload => {
                for chunk in self.reply.body.chunks(CHUNK_SIZE) {
                    delegate.did_receive_data(self.id, chunk);
                }
                delegate.did_complete(self.id, self.reply.status, None);
            }
        }
    }

    fn download(&self) {
        let location = self
            .download_dir
            .join(format!("restwire-mock-dl-{}", Uuid::new_v4()));
        if let Err(err) = fs::write(&location, &self.reply.body) {
            self.delegate
                .did_complete(self.id, self.reply.status, Some(TransportFailure::io(&err)));
            return;
        }
        let total = self.reply.body.len() as u64;
        for chunk in self.reply.body.chunks(CHUNK_SIZE) {
            self.delegate.did_write_data(self.id, chunk.len() as u64, total);
        }
        self.delegate
            .did_finish_downloading(self.id, &location, self.reply.status);
        let _ = fs::remove_file(&location);
        self.delegate.did_complete(self.id, self.reply.status, None);
    }
}

fn normalize(path: &str) -> String {
    path.trim_start_matches('/').to_string()
}
