//! The transport capability the dispatcher drives.
//!
//! # Design
//! A transport turns a `PreparedRequest` into a task that does nothing until
//! `resume` is called. Once running, it reports back through a
//! `TransportDelegate` on whatever thread it likes, identifying the task only
//! by its `TaskId`. The delegate never sees a closure over the original call;
//! correlating events back to the caller is the registry's job.
//!
//! Three task kinds exist and the dispatcher switches on the tag rather than
//! on concrete task types:
//! - `Data`: request in, response bytes streamed back.
//! - `Upload`: request body read from a staged file, response bytes back.
//! - `Download`: response written to a transport-owned file, location back.

pub mod mock;
pub mod net;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use uuid::Uuid;

use crate::error::RestError;
use crate::http::PreparedRequest;

/// Opaque identity of one transport task. Used only as a registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Data,
    Upload,
    Download,
}

impl TaskKind {
    /// Whether the task resolves to a file location instead of bytes.
    pub fn produces_file(self) -> bool {
        matches!(self, TaskKind::Download)
    }
}

/// A transport-level failure with the transport's native error triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFailure {
    pub code: i64,
    pub domain: String,
    pub message: String,
}

impl TransportFailure {
    pub fn new(code: i64, domain: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            domain: domain.into(),
            message: message.into(),
        }
    }

    pub fn io(err: &std::io::Error) -> Self {
        Self::new(
            err.raw_os_error().map_or(-1, i64::from),
            "io",
            err.to_string(),
        )
    }
}

impl From<TransportFailure> for RestError {
    fn from(failure: TransportFailure) -> Self {
        RestError::Transport {
            code: failure.code,
            domain: failure.domain,
            message: failure.message,
        }
    }
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error {}: {}", self.domain, self.code, self.message)
    }
}

/// Callbacks a running task reports through.
///
/// Implementations must tolerate being called from several threads at once
/// and for ids they no longer (or never) track.
pub trait TransportDelegate: Send + Sync {
    /// A chunk of response body arrived for a data or upload task.
    fn did_receive_data(&self, task: TaskId, data: &[u8]);

    /// Request body bytes went out. `total_expected` is the full body size.
    fn did_send_body_data(&self, task: TaskId, bytes_sent: u64, total_expected: u64);

    /// A download task wrote bytes to its file. `total_expected` is 0 when unknown.
    fn did_write_data(&self, task: TaskId, bytes_written: u64, total_expected: u64);

    /// A download task finished writing its file. The file may be deleted as
    /// soon as this returns.
    fn did_finish_downloading(&self, task: TaskId, location: &Path, status: i32);

    /// The task ended, successfully or not. Always the last event for a task.
    fn did_complete(&self, task: TaskId, status: i32, error: Option<TransportFailure>);
}

/// A created but not yet started transport task.
pub trait TransportTask: Send {
    fn id(&self) -> TaskId;

    fn kind(&self) -> TaskKind;

    /// Start the task. Events flow to the delegate from here on.
    fn resume(self: Box<Self>);
}

/// Creates transport tasks.
pub trait Transport: Send + Sync {
    fn data_task(
        &self,
        request: PreparedRequest,
        delegate: Arc<dyn TransportDelegate>,
    ) -> Box<dyn TransportTask>;

    /// `body` is the staged file holding the request body.
    fn upload_task(
        &self,
        request: PreparedRequest,
        body: PathBuf,
        delegate: Arc<dyn TransportDelegate>,
    ) -> Box<dyn TransportTask>;

    fn download_task(
        &self,
        request: PreparedRequest,
        delegate: Arc<dyn TransportDelegate>,
    ) -> Box<dyn TransportTask>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_ids_are_unique() {
        assert_ne!(TaskId::new(), TaskId::new());
    }

    #[test]
    fn failure_converts_to_transport_error() {
        let err: RestError = TransportFailure::new(7, "ureq", "reset").into();
        assert_eq!(err.code(), 7);
        assert_eq!(err.domain(), "ureq");
    }

    #[test]
    fn only_downloads_produce_files() {
        assert!(TaskKind::Download.produces_file());
        assert!(!TaskKind::Upload.produces_file());
        assert!(!TaskKind::Data.produces_file());
    }
}
