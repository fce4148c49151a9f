//! Session configuration.
//!
//! # Design
//! `SessionConfig` is plain data handed to `Session::new`. It can be built in
//! code with the `with_*` methods or loaded from `RESTWIRE_*` environment
//! variables. A missing base URL is allowed here; the session reports it as a
//! `Configuration` error on the first call instead of inventing a URL.

use std::env;

use url::Url;

use crate::error::RestError;

pub const DEFAULT_TOKEN_NAME: &str = "Token";
pub const DEFAULT_CSRF_ENDPOINT: &str = "csrf/";
pub const DEFAULT_CSRF_HEADER: &str = "X-CSRFToken";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Root every endpoint path is joined onto. Must end in `/` for joins to
    /// keep its last path segment; `with_base_url` takes care of that.
    pub base_url: Option<Url>,
    /// Scheme word in the `Authorization` header.
    pub token_name: String,
    /// Send the bearer token base64-encoded instead of URL-encoded.
    pub encode_token_base64: bool,
    /// Negotiate an anti-forgery token before state-changing calls.
    pub requires_csrf: bool,
    pub csrf_endpoint: String,
    pub csrf_header: String,
    /// Sent with every request, before per-request headers.
    pub extra_headers: Vec<(String, String)>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            token_name: DEFAULT_TOKEN_NAME.to_string(),
            encode_token_base64: false,
            requires_csrf: true,
            csrf_endpoint: DEFAULT_CSRF_ENDPOINT.to_string(),
            csrf_header: DEFAULT_CSRF_HEADER.to_string(),
            extra_headers: Vec::new(),
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, RestError> {
        self.base_url = Some(parse_base_url(base_url)?);
        Ok(self)
    }

    pub fn with_token_name(mut self, name: impl Into<String>) -> Self {
        self.token_name = name.into();
        self
    }

    pub fn with_base64_token(mut self, enabled: bool) -> Self {
        self.encode_token_base64 = enabled;
        self
    }

    pub fn with_csrf(mut self, required: bool) -> Self {
        self.requires_csrf = required;
        self
    }

    pub fn with_csrf_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.csrf_endpoint = endpoint.into();
        self
    }

    pub fn with_csrf_header(mut self, header: impl Into<String>) -> Self {
        self.csrf_header = header.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    /// Load from `RESTWIRE_*` variables, falling back to defaults.
    ///
    /// - `RESTWIRE_BASE_URL`
    /// - `RESTWIRE_TOKEN_NAME`
    /// - `RESTWIRE_TOKEN_BASE64` (`1`/`true`/`yes`/`on`)
    /// - `RESTWIRE_REQUIRES_CSRF` (same truthy set; anything else disables)
    /// - `RESTWIRE_CSRF_ENDPOINT`
    pub fn from_env() -> Result<Self, RestError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RestError> {
        let mut config = Self::default();
        if let Some(url) = lookup("RESTWIRE_BASE_URL") {
            config.base_url = Some(parse_base_url(&url)?);
        }
        if let Some(name) = lookup("RESTWIRE_TOKEN_NAME") {
            config.token_name = name;
        }
        if let Some(flag) = lookup("RESTWIRE_TOKEN_BASE64") {
            config.encode_token_base64 = truthy(&flag);
        }
        if let Some(flag) = lookup("RESTWIRE_REQUIRES_CSRF") {
            config.requires_csrf = truthy(&flag);
        }
        if let Some(endpoint) = lookup("RESTWIRE_CSRF_ENDPOINT") {
            config.csrf_endpoint = endpoint;
        }
        Ok(config)
    }
}

/// Parse a base URL, adding the trailing slash `Url::join` needs.
pub fn parse_base_url(raw: &str) -> Result<Url, RestError> {
    let raw = raw.trim();
    let with_slash = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    let url = Url::parse(&with_slash)
        .map_err(|e| RestError::Configuration(format!("invalid base URL {raw:?}: {e}")))?;
    if url.cannot_be_a_base() {
        return Err(RestError::Configuration(format!("{raw:?} cannot be a base URL")));
    }
    Ok(url)
}

fn truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
