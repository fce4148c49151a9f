//! Response classification and decoding.
//!
//! # Design
//! Whatever the transport produced arrives here as a `RawOutcome`. A call's
//! result is then decided in a fixed order:
//! 1. A local or transport error is delivered as is.
//! 2. A status outside the accepted set is `BadStatusCode`; the body is
//!    never handed to a decoder.
//! 3. The body is decoded. For JSON that means the structured `Wire` decode
//!    (`DecoderFailure` if it fails mid-parse), then `from_wire`, then the
//!    `from_raw` fallback, then `UndecodableData`.
//!
//! Rejected calls dump the request and raw response to the debug channel.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::RestError;
use crate::http::{AcceptedStatus, Decoded, PreparedRequest, UNKNOWN_STATUS};
use crate::request::{FileResponse, RestResponse, TextResponse};

/// Marker the server puts in the body of an anti-forgery rejection.
const CSRF_MARKER: &str = "CSRF";
const FORBIDDEN: i32 = 403;

/// Response payload as the transport left it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawBody {
    Bytes(Vec<u8>),
    /// The transport's download location. Only valid until the completion
    /// returns; the decoder copies out what it keeps.
    File(PathBuf),
}

/// One finished attempt, before classification.
#[derive(Debug, Clone)]
pub struct RawOutcome {
    pub result: Result<RawBody, RestError>,
    pub status: i32,
    /// The request as sent, kept for the debug dump.
    pub request: Option<PreparedRequest>,
}

pub type RawCompletion = Box<dyn FnOnce(RawOutcome) + Send + 'static>;

impl RawOutcome {
    /// A call that never reached the transport.
    pub fn local_failure(error: RestError) -> Self {
        Self {
            result: Err(error),
            status: UNKNOWN_STATUS,
            request: None,
        }
    }

    pub fn body_text(&self) -> Option<Cow<'_, str>> {
        match &self.result {
            Ok(RawBody::Bytes(bytes)) => Some(String::from_utf8_lossy(bytes)),
            _ => None,
        }
    }

    /// Forbidden, with a body saying the anti-forgery token was rejected.
    pub fn is_csrf_rejection(&self) -> bool {
        self.status == FORBIDDEN && self.body_text().is_some_and(|body| body.contains(CSRF_MARKER))
    }
}

/// Classify `outcome` against `accepted` and run `decode` on an accepted body.
pub fn classify<T>(
    outcome: RawOutcome,
    accepted: &AcceptedStatus,
    decode: impl FnOnce(RawBody) -> Result<T, RestError>,
) -> Decoded<T> {
    let status = outcome.status;
    if !accepted.contains(status) || outcome.result.is_err() {
        dump(&outcome);
    }
    let body = match outcome.result {
        Ok(body) => body,
        Err(error) => return Decoded::failure(error, status),
    };
    if !accepted.contains(status) {
        return Decoded::failure(RestError::BadStatusCode(status), status);
    }
    match decode(body) {
        Ok(value) => Decoded::success(value, status),
        Err(error) => {
            debug!(status, error = %error, "response could not be decoded");
            Decoded::failure(error, status)
        }
    }
}

pub fn decode_json<R, T: RestResponse<R>>(data: &[u8], request: &R) -> Result<T, RestError> {
    // An empty body has nothing to parse; only the raw fallback can take it.
    if data.iter().all(u8::is_ascii_whitespace) {
        return T::from_raw(data, request).ok_or(RestError::UndecodableData);
    }
    let wire: T::Wire =
        serde_json::from_slice(data).map_err(|e| RestError::DecoderFailure(e.to_string()))?;
    T::from_wire(wire, request)
        .or_else(|| T::from_raw(data, request))
        .ok_or(RestError::UndecodableData)
}

/// `decode_json` for a value already parsed out of a larger document.
pub fn decode_json_value<R, T: RestResponse<R>>(
    value: &serde_json::Value,
    request: &R,
) -> Result<T, RestError> {
    let wire = T::Wire::deserialize(value).map_err(|e| RestError::DecoderFailure(e.to_string()))?;
    T::from_wire(wire, request)
        .or_else(|| {
            serde_json::to_vec(value)
                .ok()
                .and_then(|raw| T::from_raw(&raw, request))
        })
        .ok_or(RestError::UndecodableData)
}

pub fn decode_text<R, T: TextResponse<R>>(data: &[u8], request: &R) -> Result<T, RestError> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| T::from_text(text, request))
        .ok_or(RestError::UndecodableData)
}

pub fn decode_file<R, T: FileResponse<R>>(location: &Path, request: &R) -> Result<T, RestError> {
    T::from_file(location, request).ok_or(RestError::UndecodableData)
}

/// Expect bytes; a file body here means the wrong decoder was wired up.
pub fn expect_bytes(body: RawBody) -> Result<Vec<u8>, RestError> {
    match body {
        RawBody::Bytes(bytes) => Ok(bytes),
        RawBody::File(_) => Err(RestError::UndecodableData),
    }
}

pub fn expect_file(body: RawBody) -> Result<PathBuf, RestError> {
    match body {
        RawBody::File(path) => Ok(path),
        RawBody::Bytes(_) => Err(RestError::UndecodableData),
    }
}

fn dump(outcome: &RawOutcome) {
    if let Some(request) = &outcome.request {
        let headers: Vec<(&str, &str)> = request
            .headers
            .iter()
            .map(|(name, value)| (name.as_str(), redact(name, value)))
            .collect();
        let body = request
            .body
            .as_deref()
            .map(String::from_utf8_lossy)
            .unwrap_or(Cow::Borrowed("<no body>"));
        debug!(method = %request.method, url = %request.url, ?headers, %body, "rejected request");
    }
    match &outcome.result {
        Ok(RawBody::Bytes(bytes)) => {
            debug!(status = outcome.status, response = %String::from_utf8_lossy(bytes), "rejected response");
        }
        Ok(RawBody::File(path)) => {
            debug!(status = outcome.status, file = %path.display(), "rejected response");
        }
        Err(error) => debug!(status = outcome.status, %error, "no response"),
    }
}

fn redact<'a>(name: &str, value: &'a str) -> &'a str {
    let name = name.to_ascii_lowercase();
    if name == "authorization" || name.contains("csrf") {
        "<redacted>"
    } else {
        value
    }
}
