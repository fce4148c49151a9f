//! Error types delivered to session completions.
//!
//! # Design
//! Every failure a call can hit is a value of `RestError`, handed to the
//! caller's completion next to the best-known status code. Nothing here is
//! ever raised across a transport callback. Each kind carries a stable
//! code/domain/description triple so it can be reported across process or
//! language boundaries without string matching on `Display`.
//!
//! Request/response dumps are never stored in an error; they go to the
//! `tracing` debug channel instead.

use thiserror::Error;

/// Domain reported for every error raised by this crate.
pub const ERROR_DOMAIN: &str = "restwire";

/// Errors returned through `Session` completions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RestError {
    /// The session has no usable base URL.
    #[error("session is not configured: {0}")]
    Configuration(String),

    /// The request URL or one of its query components could not be formed.
    #[error("could not form request URL: {0}")]
    UrlBuild(String),

    /// The typed payload could not be encoded into a request body.
    #[error("could not encode request body: {0}")]
    Serialization(String),

    /// The request body could not be staged to local storage.
    #[error("could not write task data: {0}")]
    WriteFailure(String),

    /// The response status was outside the accepted set. The body was not decoded.
    #[error("bad response code {0}")]
    BadStatusCode(i32),

    /// The body decoded, but no response adapter accepted it.
    #[error("the downloaded data is undecodable by the given response type")]
    UndecodableData,

    /// The structured decoder failed mid-parse.
    #[error("decoder failed: {0}")]
    DecoderFailure(String),

    /// A downloaded file could not be moved to a stable location.
    #[error("could not copy downloaded file: {0}")]
    FileSystemFailure(String),

    /// The transport itself failed (DNS, connection reset, TLS, ...).
    #[error("{domain} error {code}: {message}")]
    Transport {
        code: i64,
        domain: String,
        message: String,
    },
}

impl RestError {
    /// Stable numeric code for this error kind.
    pub fn code(&self) -> i64 {
        match self {
            RestError::UrlBuild(_) => 30001,
            RestError::Configuration(_) => 30003,
            RestError::WriteFailure(_) => 30101,
            RestError::UndecodableData => 30102,
            RestError::BadStatusCode(_) => 30103,
            RestError::DecoderFailure(_) => 30104,
            RestError::FileSystemFailure(_) => 30105,
            RestError::Serialization(_) => 30106,
            RestError::Transport { code, .. } => *code,
        }
    }

    /// Domain the code belongs to. Transport errors keep the transport's own domain.
    pub fn domain(&self) -> &str {
        match self {
            RestError::Transport { domain, .. } => domain,
            _ => ERROR_DOMAIN,
        }
    }

    /// Human-readable description, identical to `Display`.
    pub fn description(&self) -> String {
        self.to_string()
    }

    /// True when the error happened before any network I/O was attempted.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            RestError::Configuration(_)
                | RestError::UrlBuild(_)
                | RestError::Serialization(_)
                | RestError::WriteFailure(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_and_distinct() {
        let errors = [
            RestError::UrlBuild(String::new()),
            RestError::Configuration(String::new()),
            RestError::WriteFailure(String::new()),
            RestError::UndecodableData,
            RestError::BadStatusCode(400),
            RestError::DecoderFailure(String::new()),
            RestError::FileSystemFailure(String::new()),
            RestError::Serialization(String::new()),
        ];
        let mut codes: Vec<i64> = errors.iter().map(RestError::code).collect();
        assert_eq!(codes[0], 30001);
        assert_eq!(codes[4], 30103);
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(errors.iter().all(|e| e.domain() == ERROR_DOMAIN));
    }

    #[test]
    fn transport_error_keeps_native_triple() {
        let err = RestError::Transport {
            code: -1004,
            domain: "io".to_string(),
            message: "connection refused".to_string(),
        };
        assert_eq!(err.code(), -1004);
        assert_eq!(err.domain(), "io");
        assert_eq!(err.description(), "io error -1004: connection refused");
        assert!(!err.is_local());
    }

    #[test]
    fn local_errors_are_flagged() {
        assert!(RestError::UrlBuild("x".into()).is_local());
        assert!(RestError::WriteFailure("disk full".into()).is_local());
        assert!(!RestError::BadStatusCode(500).is_local());
    }
}
