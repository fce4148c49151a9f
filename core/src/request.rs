//! Declarative request and response descriptions.
//!
//! # Design
//! A request type says where to go (`Endpoint`) and which response type it
//! produces; a response type says how to build itself from what came back.
//! The session does everything in between. Responses receive the request
//! they answer, so an adapter can carry request context into its result.
//!
//! JSON responses decode into a `Wire` model first and are then adapted with
//! `from_wire`; `from_raw` is the fallback when the adapter declines.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::RestError;
use crate::pagination::PageCursor;

/// Path and extra request data shared by every request kind.
pub trait Endpoint: Send + Sync + 'static {
    /// Path relative to the session base URL, e.g. `"example/user/"`.
    fn endpoint(&self) -> String;

    fn query_items(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Sent after the session-wide headers, overriding them by name.
    fn extra_headers(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

/// A request answered with JSON.
pub trait RestRequest: Endpoint + Sized {
    type Response: RestResponse<Self>;
}

/// How a typed payload is written into the request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyEncoding {
    #[default]
    Json,
    Form,
}

impl BodyEncoding {
    pub fn content_type(self) -> &'static str {
        match self {
            BodyEncoding::Json => "application/json",
            BodyEncoding::Form => "application/x-www-form-urlencoded",
        }
    }
}

/// An encoded request body and its content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Body {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

impl Body {
    pub fn encode<P: Serialize>(payload: &P, encoding: BodyEncoding) -> Result<Self, RestError> {
        let bytes = match encoding {
            BodyEncoding::Json => serde_json::to_vec(payload)
                .map_err(|e| RestError::Serialization(e.to_string()))?,
            BodyEncoding::Form => form_encode(payload)?.into_bytes(),
        };
        Ok(Self {
            bytes,
            content_type: encoding.content_type(),
        })
    }

    pub fn form(fields: &[(String, String)]) -> Self {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish();
        Self {
            bytes: encoded.into_bytes(),
            content_type: BodyEncoding::Form.content_type(),
        }
    }
}

/// Flatten a payload's top-level fields into `key=value` pairs. Nulls are
/// skipped; nested values are sent as their JSON text.
fn form_encode<P: Serialize>(payload: &P) -> Result<String, RestError> {
    let value = serde_json::to_value(payload).map_err(|e| RestError::Serialization(e.to_string()))?;
    let serde_json::Value::Object(fields) = value else {
        return Err(RestError::Serialization(
            "form bodies need a payload that serializes to an object".to_string(),
        ));
    };
    let mut out = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in fields {
        match value {
            serde_json::Value::Null => {}
            serde_json::Value::String(text) => {
                out.append_pair(&key, &text);
            }
            other => {
                out.append_pair(&key, &other.to_string());
            }
        }
    }
    Ok(out.finish())
}

/// A JSON request with a body, used by `create`, `replace` and `modify`.
pub trait PayloadRequest: RestRequest {
    type Payload: Serialize;

    fn payload(&self) -> &Self::Payload;

    fn encoding(&self) -> BodyEncoding {
        BodyEncoding::Json
    }
}

/// Adapts a decoded JSON body into a typed result.
pub trait RestResponse<R>: Sized + Send + 'static {
    type Wire: DeserializeOwned;

    /// `None` means "not mine"; the raw fallback is tried next.
    fn from_wire(wire: Self::Wire, request: &R) -> Option<Self>;

    fn from_raw(_data: &[u8], _request: &R) -> Option<Self> {
        None
    }
}

/// A response whose body is ignored. Accepts anything, including no body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Discard;

impl<R> RestResponse<R> for Discard {
    type Wire = serde::de::IgnoredAny;

    fn from_wire(_wire: Self::Wire, _request: &R) -> Option<Self> {
        Some(Discard)
    }

    fn from_raw(_data: &[u8], _request: &R) -> Option<Self> {
        Some(Discard)
    }
}

/// A request answered with plain text. Form fields, if any, are sent
/// URL-encoded by `create_text`.
pub trait TextRequest: Endpoint + Sized {
    type Response: TextResponse<Self>;

    fn form_fields(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

pub trait TextResponse<R>: Sized + Send + 'static {
    fn from_text(text: &str, request: &R) -> Option<Self>;
}

impl<R> TextResponse<R> for String {
    fn from_text(text: &str, _request: &R) -> Option<Self> {
        Some(text.to_string())
    }
}

/// A paginated list. Each element of the page's `results` array is decoded
/// as `Item`.
pub trait ListRequest: Endpoint + Sized {
    type Item: RestResponse<Self>;

    /// Cursor for the first page; later pages advance from it.
    fn first_page(&self) -> PageCursor {
        PageCursor::default()
    }
}

/// A request whose response is saved to a file.
pub trait DownloadRequest: Endpoint + Sized {
    type Response: FileResponse<Self>;
}

pub trait FileResponse<R>: Sized + Send + 'static {
    /// `location` is a stable copy owned by the caller.
    fn from_file(location: &Path, request: &R) -> Option<Self>;
}

impl<R> FileResponse<R> for PathBuf {
    fn from_file(location: &Path, _request: &R) -> Option<Self> {
        Some(location.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ping;

    impl Endpoint for Ping {
        fn endpoint(&self) -> String {
            "ping/".to_string()
        }
    }

    #[test]
    fn endpoint_defaults_are_empty() {
        assert!(Ping.query_items().is_empty());
        assert!(Ping.extra_headers().is_empty());
    }

    #[test]
    fn discard_accepts_anything() {
        let wire: serde::de::IgnoredAny = serde_json::from_str(r#"{"a":[1,2]}"#).unwrap();
        assert_eq!(<Discard as RestResponse<Ping>>::from_wire(wire, &Ping), Some(Discard));
        assert_eq!(<Discard as RestResponse<Ping>>::from_raw(b"", &Ping), Some(Discard));
    }

    #[derive(Serialize)]
    struct Note {
        title: String,
        pinned: bool,
        tag: Option<String>,
    }

    fn note() -> Note {
        Note {
            title: "a b&c".to_string(),
            pinned: true,
            tag: None,
        }
    }

    #[test]
    fn json_body() {
        let body = Body::encode(&note(), BodyEncoding::Json).unwrap();
        assert_eq!(body.content_type, "application/json");
        let value: serde_json::Value = serde_json::from_slice(&body.bytes).unwrap();
        assert_eq!(value["title"], "a b&c");
        assert_eq!(value["tag"], serde_json::Value::Null);
    }

    #[test]
    fn form_body_skips_nulls() {
        let body = Body::encode(&note(), BodyEncoding::Form).unwrap();
        assert_eq!(body.content_type, "application/x-www-form-urlencoded");
        assert_eq!(String::from_utf8(body.bytes).unwrap(), "pinned=true&title=a+b%26c");
    }

    #[test]
    fn form_body_needs_an_object() {
        let err = Body::encode(&vec![1, 2], BodyEncoding::Form).unwrap_err();
        assert!(matches!(err, RestError::Serialization(_)));
    }

    #[test]
    fn form_fields() {
        let body = Body::form(&[("q".to_string(), "x y".to_string())]);
        assert_eq!(body.bytes, b"q=x+y");
    }

    #[test]
    fn content_types() {
        assert_eq!(BodyEncoding::default(), BodyEncoding::Json);
        assert_eq!(BodyEncoding::Json.content_type(), "application/json");
        assert_eq!(BodyEncoding::Form.content_type(), "application/x-www-form-urlencoded");
    }
}
