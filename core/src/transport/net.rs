//! Network transport backed by a blocking `ureq` agent.
//!
//! Each resumed task runs on its own thread and reports through the delegate
//! from there, so callbacks for different tasks may interleave. HTTP error
//! statuses are returned as data (`http_status_as_error(false)`); only
//! connection-level problems become `TransportFailure`s.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use tracing::{debug, error};
use ureq::http::Response;
use ureq::{Agent, Body, RequestBuilder};
use uuid::Uuid;

use super::{TaskId, TaskKind, Transport, TransportDelegate, TransportFailure, TransportTask};
use crate::http::{HttpMethod, PreparedRequest, UNKNOWN_STATUS};

const CHUNK_SIZE: usize = 16 * 1024;

/// Transport that performs real HTTP round-trips.
#[derive(Clone)]
pub struct UreqTransport {
    agent: Agent,
    download_dir: PathBuf,
}

impl UreqTransport {
    pub fn new() -> Self {
        let agent = Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .new_agent();
        Self {
            agent,
            download_dir: std::env::temp_dir(),
        }
    }

    /// Directory download tasks write their transient files into.
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    fn task(
        &self,
        kind: TaskKind,
        request: PreparedRequest,
        upload_from: Option<PathBuf>,
        delegate: Arc<dyn TransportDelegate>,
    ) -> Box<dyn TransportTask> {
        Box::new(UreqTask {
            id: TaskId::new(),
            kind,
            request,
            upload_from,
            agent: self.agent.clone(),
            download_dir: self.download_dir.clone(),
            delegate,
        })
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for UreqTransport {
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

struct UreqTask {
    id: TaskId,
    kind: TaskKind,
    request: PreparedRequest,
    upload_from: Option<PathBuf>,
    agent: Agent,
    download_dir: PathBuf,
    delegate: Arc<dyn TransportDelegate>,
}

impl TransportTask for UreqTask {
    fn id(&self) -> TaskId {
        self.id
    }

    fn kind(&self) -> TaskKind {
        self.kind
    }

    fn resume(self: Box<Self>) {
        let id = self.id;
        let delegate = Arc::clone(&self.delegate);
        let spawned = thread::Builder::new()
            .name(format!("restwire-task-{id}"))
            .spawn(move || self.run());
        if let Err(err) = spawned {
            error!(task = %id, error = %err, "could not start transport thread");
            delegate.did_complete(id, UNKNOWN_STATUS, Some(TransportFailure::io(&err)));
        }
    }
}

impl UreqTask {
    fn run(self) {
        let body = match &self.upload_from {
            Some(path) => match fs::read(path) {
                Ok(bytes) => Some(bytes),
                Err(err) => {
                    self.fail(UNKNOWN_STATUS, TransportFailure::io(&err));
                    return;
                }
            },
            None => self.request.body.clone(),
        };

        debug!(task = %self.id, method = %self.request.method, url = %self.request.url, "transport sending");
        let mut response = match self.execute(body.as_deref()) {
            Ok(response) => response,
            Err(err) => {
                self.fail(UNKNOWN_STATUS, failure_from(&err));
                return;
            }
        };

        if let Some(bytes) = &body {
            let len = bytes.len() as u64;
            self.delegate.did_send_body_data(self.id, len, len);
        }

        let status = i32::from(response.status().as_u16());
        let expected = content_length(&response);
        let result = match self.kind {
            TaskKind::Download => self.stream_to_file(&mut response, status, expected),
            TaskKind::Data | TaskKind::Upload => self.stream_to_delegate(&mut response),
        };
        match result {
            Ok(()) => self.delegate.did_complete(self.id, status, None),
            Err(failure) => self.fail(status, failure),
        }
    }

    fn execute(&self, body: Option<&[u8]>) -> Result<Response<Body>, ureq::Error> {
        let url = self.request.url.as_str();
        let headers = &self.request.headers;
        let body = body.unwrap_or_default();
        match self.request.method {
            HttpMethod::Get => with_headers(self.agent.get(url), headers).call(),
            HttpMethod::Delete => with_headers(self.agent.delete(url), headers).call(),
            HttpMethod::Post => with_headers(self.agent.post(url), headers).send(body),
            HttpMethod::Put => with_headers(self.agent.put(url), headers).send(body),
            HttpMethod::Patch => with_headers(self.agent.patch(url), headers).send(body),
        }
    }

    fn stream_to_delegate(&self, response: &mut Response<Body>) -> Result<(), TransportFailure> {
        let mut reader = response.body_mut().as_reader();
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = reader.read(&mut buf).map_err(|e| TransportFailure::io(&e))?;
            if n == 0 {
                return Ok(());
            }
            self.delegate.did_receive_data(self.id, &buf[..n]);
        }
    }

    fn stream_to_file(
        &self,
        response: &mut Response<Body>,
        status: i32,
        expected: u64,
    ) -> Result<(), TransportFailure> {
        let location = self.download_dir.join(format!("restwire-dl-{}", Uuid::new_v4()));
        let written = self.write_download(response, &location, expected);
        if written.is_ok() {
            self.delegate.did_finish_downloading(self.id, &location, status);
        }
        // The delegate has had its chance to copy the file.
        let _ = fs::remove_file(&location);
        written
    }

    fn write_download(
        &self,
        response: &mut Response<Body>,
        location: &Path,
        expected: u64,
    ) -> Result<(), TransportFailure> {
        let mut file = File::create(location).map_err(|e| TransportFailure::io(&e))?;
        let mut reader = response.body_mut().as_reader();
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = reader.read(&mut buf).map_err(|e| TransportFailure::io(&e))?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).map_err(|e| TransportFailure::io(&e))?;
            self.delegate.did_write_data(self.id, n as u64, expected);
        }
        file.flush().map_err(|e| TransportFailure::io(&e))
    }

    fn fail(&self, status: i32, failure: TransportFailure) {
        error!(task = %self.id, url = %self.request.url, error = %failure, "transport failed");
        self.delegate.did_complete(self.id, status, Some(failure));
    }
}

fn with_headers<B>(mut builder: RequestBuilder<B>, headers: &[(String, String)]) -> RequestBuilder<B> {
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}

fn content_length(response: &Response<Body>) -> u64 {
    response
        .headers()
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

fn failure_from(err: &ureq::Error) -> TransportFailure {
    match err {
        ureq::Error::Io(io) => TransportFailure::io(io),
        other => TransportFailure::new(-1, "ureq", other.to_string()),
    }
}
