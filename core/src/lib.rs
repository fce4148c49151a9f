//! Asynchronous REST client core with task correlation, anti-forgery token
//! negotiation and cursor pagination.
//!
//! # Overview
//! A `Session` turns declarative request types into HTTP calls. Each call is
//! dispatched as a transport task, tracked in a `TaskRegistry` until the
//! transport reports back, then classified against the accepted status set,
//! decoded, and delivered to the caller's completion exactly once.
//!
//! # Design
//! - The transport is a trait (`Transport`) so the same pipeline runs over
//!   the network (`UreqTransport`) or a scripted `MockTransport`.
//! - Transport callbacks carry only a `TaskId`; the registry maps it back to
//!   the call's bookkeeping. Completions are `FnOnce` and leave the registry
//!   on resolution, so double delivery cannot happen.
//! - State-changing calls negotiate an anti-forgery token first and retry
//!   once if the server rejects it as expired.
//! - List calls follow `next` links page by page and deliver one list.
//! - Failures are `RestError` values paired with the best-known status code.

pub mod config;
pub mod csrf;
pub mod decode;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod pagination;
pub mod progress;
pub mod registry;
pub mod request;
pub mod session;
pub mod sink;
pub mod transport;

pub use config::SessionConfig;
pub use csrf::{extract_token, CsrfRequest, CsrfToken};
pub use dispatcher::{Dispatched, Dispatcher};
pub use error::{RestError, ERROR_DOMAIN};
pub use http::{AcceptedStatus, Completion, Decoded, HttpMethod, PreparedRequest, UNKNOWN_STATUS};
pub use pagination::{Page, PageCursor, PageMode};
pub use progress::Progress;
pub use registry::TaskRegistry;
pub use request::{
    Body, BodyEncoding, Discard, DownloadRequest, Endpoint, FileResponse, ListRequest, PayloadRequest,
    RestRequest, RestResponse, TextRequest, TextResponse,
};
pub use session::Session;
pub use sink::{ByteSink, TempDirSink};
pub use transport::mock::{MockReply, MockTransport};
pub use transport::net::UreqTransport;
pub use transport::{TaskId, TaskKind, Transport, TransportDelegate, TransportFailure, TransportTask};
