//! The session coordinator: one base URL, one bearer token, one anti-forgery
//! token, and a verb per HTTP method.
//!
//! # Design
//! Every verb follows the same path:
//! 1. Encode the body (if any). Failure completes immediately.
//! 2. Describe the call as an `Attempt` and run it through the anti-forgery
//!    `Negotiation`, which sends it one or more times via `TokenPipeline::send`.
//! 3. Each send builds a fresh `PreparedRequest` from the current session
//!    state (so a refreshed token is picked up), then hands it to the
//!    dispatcher as a data, upload or download task.
//! 4. The final `RawOutcome` is classified and decoded, and the caller's
//!    completion runs exactly once.
//!
//! Verbs return as soon as the first request is scheduled. Completions run
//! on the transport's callback thread; a call that fails before reaching the
//! transport completes on the caller's thread before the verb returns.
//!
//! Session state sits behind a `RwLock` that is never held while a
//! completion or transport call runs. Concurrent calls may both notice an
//! expired anti-forgery token and both fetch a new one; the later write wins.

use std::sync::Arc;

use base64::prelude::{Engine as _, BASE64_STANDARD};
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::{parse_base_url, SessionConfig};
use crate::csrf::{CsrfRequest, CsrfToken, Negotiation, TokenPipeline};
use crate::decode::{
    classify, decode_file, decode_json, decode_text, expect_bytes, expect_file, RawBody, RawCompletion,
    RawOutcome,
};
use crate::dispatcher::Dispatcher;
use crate::error::RestError;
use crate::http::{AcceptedStatus, Decoded, HttpMethod, PreparedRequest, UNKNOWN_STATUS};
use crate::pagination::{decode_page, Aggregator, PageCursor, PageDone, PageFetch, PageMode};
use crate::progress::Progress;
use crate::registry::{DataCompletion, TaskRegistry};
use crate::request::{
    Body, DownloadRequest, Endpoint, ListRequest, PayloadRequest, RestRequest, TextRequest,
};
use crate::sink::{ByteSink, TempDirSink};
use crate::transport::net::UreqTransport;
use crate::transport::Transport;

const AUTHORIZATION: &str = "Authorization";
const CONTENT_TYPE: &str = "Content-Type";
const REFERER: &str = "Referer";

/// Client-side session against one REST backend. Cheap to clone; clones
/// share state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    state: RwLock<SessionState>,
    dispatcher: Dispatcher,
}

struct SessionState {
    config: SessionConfig,
    auth_token: Option<String>,
    csrf_token: Option<String>,
}

/// Where an attempt is sent.
#[derive(Debug, Clone)]
enum Target {
    /// Joined onto the base URL, with query items appended.
    Endpoint {
        path: String,
        query: Vec<(String, String)>,
    },
    /// A server-provided URL, used as is.
    Absolute(Url),
}

/// Everything needed to build the request for one call, minus session state.
pub struct Attempt {
    method: HttpMethod,
    target: Target,
    headers: Vec<(String, String)>,
    body: Option<Body>,
    download: bool,
    negotiates: bool,
    progress: Arc<Progress>,
}

impl Attempt {
    fn new<E: Endpoint>(method: HttpMethod, request: &E, progress: Arc<Progress>) -> Self {
        Self {
            method,
            target: Target::Endpoint {
                path: request.endpoint(),
                query: request.query_items(),
            },
            headers: request.extra_headers(),
            body: None,
            download: false,
            negotiates: true,
            progress,
        }
    }

    fn with_body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }
}

impl Session {
    /// A session over the network transport, staging files in the temp dir.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_transport(config, Arc::new(UreqTransport::new()))
    }

    pub fn with_transport(config: SessionConfig, transport: Arc<dyn Transport>) -> Self {
        Self::with_parts(config, transport, Arc::new(TempDirSink::new()))
    }

    pub fn with_parts(config: SessionConfig, transport: Arc<dyn Transport>, sink: Arc<dyn ByteSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(SessionState {
                    config,
                    auth_token: None,
                    csrf_token: None,
                }),
                dispatcher: Dispatcher::new(transport, sink),
            }),
        }
    }

    pub fn from_env() -> Result<Self, RestError> {
        Ok(Self::new(SessionConfig::from_env()?))
    }

    // Configuration

    pub fn config(&self) -> SessionConfig {
        self.inner.state.read().config.clone()
    }

    pub fn base_url(&self) -> Option<Url> {
        self.inner.state.read().config.base_url.clone()
    }

    /// Set the base URL. Meant to be set once; later writes win but warn.
    pub fn set_base_url(&self, raw: &str) -> Result<(), RestError> {
        let url = parse_base_url(raw)?;
        let mut state = self.inner.state.write();
        if let Some(previous) = &state.config.base_url {
            warn!(%previous, new = %url, "base URL set more than once");
        }
        state.config.base_url = Some(url);
        Ok(())
    }

    pub fn set_auth_token(&self, token: impl Into<String>) {
        self.inner.state.write().auth_token = Some(token.into());
    }

    pub fn clear_auth_token(&self) {
        self.inner.state.write().auth_token = None;
    }

    pub fn has_auth_token(&self) -> bool {
        self.inner.state.read().auth_token.is_some()
    }

    /// Add or replace a header sent with every request.
    pub fn set_extra_header(&self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let mut state = self.inner.state.write();
        let headers = &mut state.config.extra_headers;
        headers.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        headers.push((name, value.into()));
    }

    pub fn csrf_token(&self) -> Option<String> {
        self.inner.state.read().csrf_token.clone()
    }

    pub fn clear_csrf_token(&self) {
        self.inner.state.write().csrf_token = None;
    }

    /// In-flight task bookkeeping, for inspection.
    pub fn registry(&self) -> &Arc<TaskRegistry> {
        self.inner.dispatcher.registry()
    }

    // Verbs

    /// GET a JSON resource.
    pub fn fetch<R: RestRequest>(
        &self,
        request: R,
        accepted: AcceptedStatus,
        completion: impl FnOnce(Decoded<R::Response>) + Send + 'static,
    ) -> Arc<Progress> {
        let progress = Progress::new();
        let attempt = Attempt::new(HttpMethod::Get, &request, Arc::clone(&progress));
        self.json_call(attempt, request, accepted, completion);
        progress
    }

    /// POST a payload.
    pub fn create<R: PayloadRequest>(
        &self,
        request: R,
        accepted: AcceptedStatus,
        completion: impl FnOnce(Decoded<R::Response>) + Send + 'static,
    ) -> Arc<Progress> {
        self.payload_call(HttpMethod::Post, request, accepted, completion)
    }

    /// PUT a payload.
    pub fn replace<R: PayloadRequest>(
        &self,
        request: R,
        accepted: AcceptedStatus,
        completion: impl FnOnce(Decoded<R::Response>) + Send + 'static,
    ) -> Arc<Progress> {
        self.payload_call(HttpMethod::Put, request, accepted, completion)
    }

    /// PATCH a payload.
    pub fn modify<R: PayloadRequest>(
        &self,
        request: R,
        accepted: AcceptedStatus,
        completion: impl FnOnce(Decoded<R::Response>) + Send + 'static,
    ) -> Arc<Progress> {
        self.payload_call(HttpMethod::Patch, request, accepted, completion)
    }

    /// DELETE a resource. Pair with `Discard` when the body does not matter.
    pub fn remove<R: RestRequest>(
        &self,
        request: R,
        accepted: AcceptedStatus,
        completion: impl FnOnce(Decoded<R::Response>) + Send + 'static,
    ) -> Arc<Progress> {
        let progress = Progress::new();
        let attempt = Attempt::new(HttpMethod::Delete, &request, Arc::clone(&progress));
        self.json_call(attempt, request, accepted, completion);
        progress
    }

    /// GET every page of a list (or only the first, per `mode`) and deliver
    /// the items once, in page order.
    pub fn fetch_list<R: ListRequest>(
        &self,
        request: R,
        mode: PageMode,
        accepted: AcceptedStatus,
        completion: impl FnOnce(Decoded<Vec<R::Item>>) + Send + 'static,
    ) -> Arc<Progress> {
        let progress = Progress::new();
        let first = request.first_page();
        let request = Arc::new(request);
        let session = self.clone();
        let shared = Arc::clone(&progress);
        let fetch: PageFetch<R::Item> = Arc::new(move |cursor: PageCursor, done: PageDone<R::Item>| {
            session.fetch_page(Arc::clone(&request), cursor, accepted.clone(), Arc::clone(&shared), done);
        });
        Aggregator::new(fetch, mode, Box::new(completion)).start(first);
        progress
    }

    /// GET into a file. The response type receives a stable copy of the
    /// download that the caller owns. Nothing is copied for a rejected status,
    /// and the copy is removed again if the response type refuses it.
    pub fn download_file<R: DownloadRequest>(
        &self,
        request: R,
        accepted: AcceptedStatus,
        completion: impl FnOnce(Decoded<R::Response>) + Send + 'static,
    ) -> Arc<Progress> {
        let progress = Progress::new();
        let mut attempt = Attempt::new(HttpMethod::Get, &request, Arc::clone(&progress));
        attempt.download = true;
        let sink = Arc::clone(self.inner.dispatcher.sink());
        self.perform(
            attempt,
            accepted,
            move |body| {
                // Runs inside the transport callback, before the transport
                // deletes its file.
                let copy = sink.persist(&expect_file(body)?)?;
                let decoded = decode_file(&copy, &request);
                if decoded.is_err() {
                    sink.discard(&copy);
                }
                decoded
            },
            completion,
        );
        progress
    }

    /// GET a plain-text resource. `AcceptedStatus::text()` is the usual set.
    pub fn fetch_text<R: TextRequest>(
        &self,
        request: R,
        accepted: AcceptedStatus,
        completion: impl FnOnce(Decoded<R::Response>) + Send + 'static,
    ) -> Arc<Progress> {
        let progress = Progress::new();
        let attempt = Attempt::new(HttpMethod::Get, &request, Arc::clone(&progress));
        self.text_call(attempt, request, accepted, completion);
        progress
    }

    /// POST form fields and read a plain-text response.
    pub fn create_text<R: TextRequest>(
        &self,
        request: R,
        accepted: AcceptedStatus,
        completion: impl FnOnce(Decoded<R::Response>) + Send + 'static,
    ) -> Arc<Progress> {
        let progress = Progress::new();
        let attempt = Attempt::new(HttpMethod::Post, &request, Arc::clone(&progress))
            .with_body(Body::form(&request.form_fields()));
        self.text_call(attempt, request, accepted, completion);
        progress
    }

    // Pipeline

    fn payload_call<R: PayloadRequest>(
        &self,
        method: HttpMethod,
        request: R,
        accepted: AcceptedStatus,
        completion: impl FnOnce(Decoded<R::Response>) + Send + 'static,
    ) -> Arc<Progress> {
        let progress = Progress::new();
        let body = match Body::encode(request.payload(), request.encoding()) {
            Ok(body) => body,
            Err(err) => {
                error!(%method, endpoint = %request.endpoint(), error = %err, "could not encode payload");
                completion(Decoded::failure(err, UNKNOWN_STATUS));
                return progress;
            }
        };
        let attempt = Attempt::new(method, &request, Arc::clone(&progress)).with_body(body);
        self.json_call(attempt, request, accepted, completion);
        progress
    }

    fn json_call<R: RestRequest>(
        &self,
        attempt: Attempt,
        request: R,
        accepted: AcceptedStatus,
        completion: impl FnOnce(Decoded<R::Response>) + Send + 'static,
    ) {
        self.perform(
            attempt,
            accepted,
            move |body| decode_json(&expect_bytes(body)?, &request),
            completion,
        );
    }

    fn text_call<R: TextRequest>(
        &self,
        attempt: Attempt,
        request: R,
        accepted: AcceptedStatus,
        completion: impl FnOnce(Decoded<R::Response>) + Send + 'static,
    ) {
        self.perform(
            attempt,
            accepted,
            move |body| decode_text(&expect_bytes(body)?, &request),
            completion,
        );
    }

    fn fetch_page<R: ListRequest>(
        &self,
        request: Arc<R>,
        cursor: PageCursor,
        accepted: AcceptedStatus,
        progress: Arc<Progress>,
        done: PageDone<R::Item>,
    ) {
        let mut attempt = Attempt::new(HttpMethod::Get, &*request, progress);
        attempt.target = match &cursor.next_url {
            Some(url) => Target::Absolute(url.clone()),
            None => {
                let mut query = request.query_items();
                query.extend(cursor.query_items());
                Target::Endpoint {
                    path: request.endpoint(),
                    query,
                }
            }
        };
        let base = self.base_url();
        self.perform(
            attempt,
            accepted,
            move |body| {
                let page = decode_page(&expect_bytes(body)?, &*request)?;
                let next = page
                    .next
                    .as_deref()
                    .map(|raw| resolve_next(base.as_ref(), raw))
                    .transpose()?;
                Ok((page, next))
            },
            done,
        );
    }

    fn perform<T: Send + 'static>(
        &self,
        attempt: Attempt,
        accepted: AcceptedStatus,
        decode: impl FnOnce(RawBody) -> Result<T, RestError> + Send + 'static,
        completion: impl FnOnce(Decoded<T>) + Send + 'static,
    ) {
        let deliver: RawCompletion = Box::new(move |outcome| completion(classify(outcome, &accepted, decode)));
        Negotiation::new(self.clone(), attempt, deliver).run();
    }

    /// Build the request for `attempt` from the current session state.
    fn prepare(&self, attempt: &Attempt) -> Result<PreparedRequest, RestError> {
        let state = self.inner.state.read();
        let config = &state.config;
        let Some(base) = &config.base_url else {
            error!("session has no base URL; set one before making requests");
            return Err(RestError::Configuration("base URL is not set".to_string()));
        };

        let url = match &attempt.target {
            Target::Endpoint { path, query } => endpoint_url(base, path, query)?,
            Target::Absolute(url) => url.clone(),
        };
        let mut request = PreparedRequest::new(attempt.method, url);

        if let Some(token) = &state.auth_token {
            let encoded = if config.encode_token_base64 {
                BASE64_STANDARD.encode(token)
            } else {
                url_encode(token)
            };
            request.set_header(AUTHORIZATION, format!("{} {encoded}", config.token_name));
        }
        if let Some(token) = &state.csrf_token {
            request.set_header(&config.csrf_header, url_encode(token));
        }
        for (name, value) in config.extra_headers.iter().chain(&attempt.headers) {
            request.set_header(name, value.as_str());
        }
        if let Some(body) = &attempt.body {
            request.set_header(CONTENT_TYPE, body.content_type);
            request.body = Some(body.bytes.clone());
        }
        request.set_header(REFERER, base.as_str());
        Ok(request)
    }
}

impl TokenPipeline for Session {
    type Attempt = Attempt;

    fn needs_token(&self, attempt: &Attempt) -> bool {
        attempt.negotiates && attempt.method.is_state_changing() && self.inner.state.read().config.requires_csrf
    }

    fn has_token(&self) -> bool {
        self.inner.state.read().csrf_token.is_some()
    }

    fn store_token(&self, token: String) {
        self.inner.state.write().csrf_token = Some(token);
    }

    fn clear_token(&self) {
        self.clear_csrf_token();
    }

    fn fetch_token(&self, done: Box<dyn FnOnce(Result<String, RestError>) + Send>) {
        let endpoint = self.inner.state.read().config.csrf_endpoint.clone();
        info!(%endpoint, "fetching anti-forgery token");
        let request = CsrfRequest::new(endpoint);
        let mut attempt = Attempt::new(HttpMethod::Get, &request, Progress::new());
        attempt.negotiates = false;
        self.text_call(attempt, request, AcceptedStatus::text(), move |decoded: Decoded<CsrfToken>| {
            done(decoded.result.map(|token| token.0));
        });
    }

    fn send(&self, attempt: &Attempt, done: RawCompletion) {
        let mut request = match self.prepare(attempt) {
            Ok(request) => request,
            Err(err) => return done(RawOutcome::local_failure(err)),
        };
        info!(method = %request.method, url = %request.url, "sending request");
        debug!(headers = request.headers.len(), body = request.body_len(), "request prepared");

        let dispatcher = &self.inner.dispatcher;
        let sent = request.clone();
        let progress = Arc::clone(&attempt.progress);

        if attempt.download {
            dispatcher.send_download_request(
                request,
                progress,
                Box::new(move |result, status| {
                    done(RawOutcome {
                        result: result.map(RawBody::File).map_err(RestError::from),
                        status,
                        request: Some(sent),
                    });
                }),
            );
        } else if attempt.method.carries_body() {
            let staged = match dispatcher.stage_body(&mut request) {
                Ok(staged) => staged,
                Err(err) => {
                    return done(RawOutcome {
                        result: Err(err),
                        status: UNKNOWN_STATUS,
                        request: Some(sent),
                    })
                }
            };
            dispatcher.send_upload_request(request, staged, progress, bytes_completion(sent, done));
        } else {
            dispatcher.send_data_request(request, progress, bytes_completion(sent, done));
        }
    }
}

fn bytes_completion(sent: PreparedRequest, done: RawCompletion) -> DataCompletion {
    Box::new(move |result, status| {
        done(RawOutcome {
            result: result.map(RawBody::Bytes).map_err(RestError::from),
            status,
            request: Some(sent),
        });
    })
}

/// `base` + `path` + `query`. A leading `/` on `path` is ignored so the base
/// URL's own path is kept.
fn endpoint_url(base: &Url, path: &str, query: &[(String, String)]) -> Result<Url, RestError> {
    let mut url = base
        .join(path.trim_start_matches('/'))
        .map_err(|e| RestError::UrlBuild(format!("{path:?}: {e}")))?;
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }
    Ok(url)
}

/// Resolve a page's `next` value. Absolute URLs are kept; relative ones are
/// joined onto the base URL.
fn resolve_next(base: Option<&Url>, raw: &str) -> Result<Url, RestError> {
    let resolved = match base {
        Some(base) => base.join(raw),
        None => Url::parse(raw),
    };
    resolved.map_err(|e| RestError::UrlBuild(format!("next page {raw:?}: {e}")))
}

/// Form-style encoding: spaces become `+`, only `*-._` and alphanumerics pass.
fn url_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
