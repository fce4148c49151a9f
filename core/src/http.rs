//! HTTP request and outcome types shared by every layer.
//!
//! # Design
//! A `PreparedRequest` is plain data: method, absolute URL, ordered headers
//! and optional body bytes. The session builds a fresh one for every attempt
//! (negotiation may rebuild it with a different anti-forgery token), and the
//! transport only ever reads it.
//!
//! Status codes are `i32` so that "no response at all" can be reported as
//! `UNKNOWN_STATUS` next to a transport failure.

use std::fmt;
use std::ops::RangeInclusive;

use url::Url;

use crate::error::RestError;

/// Status reported when the transport produced no HTTP response.
pub const UNKNOWN_STATUS: i32 = -1;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Methods the server guards with an anti-forgery token.
    pub fn is_state_changing(self) -> bool {
        !matches!(self, HttpMethod::Get)
    }

    /// Methods whose body is staged to disk and sent as an upload.
    pub fn carries_body(self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully-formed HTTP request, ready to hand to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl PreparedRequest {
    pub fn new(method: HttpMethod, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
        }
    }

    /// First value of `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replace every value of `name` with `value`.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.remove_header(name);
        self.headers.push((name.to_string(), value.into()));
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    /// Path plus query, as a server router would see it.
    pub fn path_and_query(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{query}", self.url.path()),
            None => self.url.path().to_string(),
        }
    }

    pub fn body_len(&self) -> u64 {
        self.body.as_ref().map_or(0, |b| b.len() as u64)
    }
}

/// Set of status codes a call treats as success.
///
/// Defaults to `200..=299`. Text verbs use `AcceptedStatus::only(200)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedStatus {
    ranges: Vec<RangeInclusive<i32>>,
}

impl AcceptedStatus {
    pub fn only(code: i32) -> Self {
        Self {
            ranges: vec![code..=code],
        }
    }

    pub fn range(range: RangeInclusive<i32>) -> Self {
        Self {
            ranges: vec![range],
        }
    }

    pub fn codes(codes: impl IntoIterator<Item = i32>) -> Self {
        Self {
            ranges: codes.into_iter().map(|c| c..=c).collect(),
        }
    }

    /// Default for text verbs: exactly `200`.
    pub fn text() -> Self {
        Self::only(200)
    }

    /// Also accept `code`.
    pub fn and(mut self, code: i32) -> Self {
        self.ranges.push(code..=code);
        self
    }

    pub fn contains(&self, status: i32) -> bool {
        self.ranges.iter().any(|r| r.contains(&status))
    }
}

impl Default for AcceptedStatus {
    fn default() -> Self {
        Self::range(200..=299)
    }
}

/// What a completion receives: a value or one typed error, plus the status.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded<T> {
    pub result: Result<T, RestError>,
    pub status: i32,
}

impl<T> Decoded<T> {
    pub fn success(value: T, status: i32) -> Self {
        Self {
            result: Ok(value),
            status,
        }
    }

    pub fn failure(error: RestError, status: i32) -> Self {
        Self {
            result: Err(error),
            status,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Decoded<U> {
        Decoded {
            result: self.result.map(f),
            status: self.status,
        }
    }
}

/// Boxed one-shot completion. `FnOnce` makes double delivery unrepresentable.
pub type Completion<T> = Box<dyn FnOnce(Decoded<T>) + Send + 'static>;

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PreparedRequest {
        PreparedRequest::new(
            HttpMethod::Get,
            Url::parse("https://api.test/items/?page=2").unwrap(),
        )
    }

    #[test]
    fn headers_are_case_insensitive_and_replaced() {
        let mut req = request();
        req.set_header("X-CSRFToken", "one");
        req.set_header("x-csrftoken", "two");
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.header("X-CSRFTOKEN"), Some("two"));
        req.remove_header("X-CsrfToken");
        assert!(req.header("X-CSRFToken").is_none());
    }

    #[test]
    fn path_and_query_includes_query() {
        assert_eq!(request().path_and_query(), "/items/?page=2");
    }

    #[test]
    fn default_accepted_is_2xx() {
        let accepted = AcceptedStatus::default();
        assert!(accepted.contains(200));
        assert!(accepted.contains(204));
        assert!(accepted.contains(299));
        assert!(!accepted.contains(300));
        assert!(!accepted.contains(UNKNOWN_STATUS));
    }

    #[test]
    fn only_and_codes() {
        assert!(AcceptedStatus::only(200).contains(200));
        assert!(!AcceptedStatus::only(200).contains(201));
        assert_eq!(AcceptedStatus::text(), AcceptedStatus::only(200));
        let set = AcceptedStatus::codes([200, 404]).and(410);
        assert!(set.contains(404));
        assert!(set.contains(410));
        assert!(!set.contains(500));
    }

    #[test]
    fn state_changing_methods() {
        assert!(!HttpMethod::Get.is_state_changing());
        assert!(HttpMethod::Delete.is_state_changing());
        assert!(!HttpMethod::Delete.carries_body());
        assert!(HttpMethod::Patch.carries_body());
    }

    #[test]
    fn decoded_map_keeps_status() {
        let d = Decoded::success(2, 201).map(|v| v * 2);
        assert_eq!(d.result, Ok(4));
        assert_eq!(d.status, 201);
    }
}
