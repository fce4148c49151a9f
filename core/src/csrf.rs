//! Anti-forgery token negotiation.
//!
//! # Design
//! Every call is driven through a small state machine:
//!
//! ```text
//! NoToken ──(token needed)──> Fetching ──> Attempting ──> Done
//!    │                                        │
//!    └──(cached / not needed)──> Attempting   └─(403 CSRF, first time)─> RetryingAfterExpiry ─> NoToken
//! ```
//!
//! `RetryingAfterExpiry` is reachable once per call, so a server that keeps
//! rejecting tokens gets exactly one retry and the second rejection is handed
//! back like any other response. A failed token fetch is not an error of its
//! own: the attempt goes ahead without a token and the server decides.
//!
//! The token fetch is itself a call through the same pipeline; attempts
//! flagged as not negotiating never enter `Fetching`, which keeps it from
//! recursing.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::decode::{RawCompletion, RawOutcome};
use crate::error::RestError;
use crate::request::{Endpoint, TextRequest, TextResponse};

/// The pieces of a session the negotiation drives.
pub trait TokenPipeline: Clone + Send + Sync + 'static {
    type Attempt: Send + Sync + 'static;

    /// Whether `attempt` has to carry a token at all.
    fn needs_token(&self, attempt: &Self::Attempt) -> bool;
    fn has_token(&self) -> bool;
    fn store_token(&self, token: String);
    fn clear_token(&self);
    fn fetch_token(&self, done: Box<dyn FnOnce(Result<String, RestError>) + Send>);
    /// Build and send one attempt with whatever token is cached right now.
    fn send(&self, attempt: &Self::Attempt, done: RawCompletion);
}

#[derive(Debug)]
pub enum CsrfState {
    NoToken,
    Fetching,
    Attempting,
    RetryingAfterExpiry,
    Done(RawOutcome),
}

/// One call's walk through the negotiation states.
pub struct Negotiation<P: TokenPipeline> {
    pipeline: P,
    attempt: Arc<P::Attempt>,
    retried: bool,
    deliver: RawCompletion,
}

impl<P: TokenPipeline> Negotiation<P> {
    pub fn new(pipeline: P, attempt: P::Attempt, deliver: RawCompletion) -> Self {
        Self {
            pipeline,
            attempt: Arc::new(attempt),
            retried: false,
            deliver,
        }
    }

    pub fn run(self) {
        self.advance(CsrfState::NoToken);
    }

    fn advance(mut self, state: CsrfState) {
        match state {
            CsrfState::NoToken => {
                if self.pipeline.needs_token(&self.attempt) && !self.pipeline.has_token() {
                    self.advance(CsrfState::Fetching);
                } else {
                    self.advance(CsrfState::Attempting);
                }
            }
            CsrfState::Fetching => {
                let pipeline = self.pipeline.clone();
                pipeline.fetch_token(Box::new(move |result| {
                    match result {
                        Ok(token) => {
                            info!("anti-forgery token acquired");
                            self.pipeline.store_token(token);
                        }
                        Err(error) => {
                            warn!(%error, "anti-forgery token fetch failed; sending without a token");
                        }
                    }
                    self.advance(CsrfState::Attempting);
                }));
            }
            CsrfState::Attempting => {
                let pipeline = self.pipeline.clone();
                let attempt = Arc::clone(&self.attempt);
                pipeline.send(
                    &attempt,
                    Box::new(move |outcome| {
                        if outcome.is_csrf_rejection() && !self.retried {
                            self.advance(CsrfState::RetryingAfterExpiry);
                        } else {
                            self.advance(CsrfState::Done(outcome));
                        }
                    }),
                );
            }
            CsrfState::RetryingAfterExpiry => {
                warn!("anti-forgery token rejected; retrying once with a fresh token");
                self.retried = true;
                self.pipeline.clear_token();
                self.advance(CsrfState::NoToken);
            }
            CsrfState::Done(outcome) => {
                debug!(status = outcome.status, retried = self.retried, "negotiation finished");
                (self.deliver)(outcome);
            }
        }
    }
}

/// Fetches the anti-forgery token from the configured endpoint.
#[derive(Debug, Clone)]
pub struct CsrfRequest {
    endpoint: String,
}

impl CsrfRequest {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

impl Endpoint for CsrfRequest {
    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

impl TextRequest for CsrfRequest {
    type Response = CsrfToken;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfToken(pub String);

impl TextResponse<CsrfRequest> for CsrfToken {
    fn from_text(text: &str, _request: &CsrfRequest) -> Option<Self> {
        extract_token(text).map(CsrfToken)
    }
}

/// Pull the token out of the endpoint's body.
///
/// Accepts a rendered hidden input (`value="..."` or `value='...'`) or a bare
/// token on its own.
pub fn extract_token(body: &str) -> Option<String> {
    if let Some(start) = body.find("value=") {
        let rest = &body[start + "value=".len()..];
        let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
        let rest = &rest[1..];
        let end = rest.find(quote)?;
        let token = &rest[..end];
        return (!token.is_empty()).then(|| token.to_string());
    }
    let bare = body.trim();
    let is_bare = !bare.is_empty() && !bare.contains(|c: char| c.is_whitespace() || c == '<' || c == '>');
    is_bare.then(|| bare.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::RawBody;
    use parking_lot::Mutex;

    #[test]
    fn extracts_from_hidden_input() {
        let html = r#"<input type="hidden" name="csrfmiddlewaretoken" value="abc123XYZ">"#;
        assert_eq!(extract_token(html).as_deref(), Some("abc123XYZ"));
        let single = "<input type='hidden' name='csrfmiddlewaretoken' value='tok'>";
        assert_eq!(extract_token(single).as_deref(), Some("tok"));
    }

    #[test]
    fn extracts_bare_token() {
        assert_eq!(extract_token("  tok3n\n").as_deref(), Some("tok3n"));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(extract_token(""), None);
        assert_eq!(extract_token("<html>no token here</html>"), None);
        assert_eq!(extract_token("value=unquoted"), None);
        assert_eq!(extract_token(r#"value="""#), None);
    }

    /// Scripted pipeline: `sends` are answered in order.
    #[derive(Clone)]
    struct Script {
        inner: Arc<ScriptState>,
    }

    struct ScriptState {
        needs: bool,
        token: Mutex<Option<String>>,
        fetch_results: Mutex<Vec<Result<String, RestError>>>,
        replies: Mutex<Vec<(i32, &'static str)>>,
        fetches: Mutex<usize>,
        sent_with: Mutex<Vec<Option<String>>>,
    }

    impl Script {
        fn new(needs: bool, fetches: Vec<Result<String, RestError>>, replies: Vec<(i32, &'static str)>) -> Self {
            Self {
                inner: Arc::new(ScriptState {
                    needs,
                    token: Mutex::new(None),
                    fetch_results: Mutex::new(fetches),
                    replies: Mutex::new(replies),
                    fetches: Mutex::new(0),
                    sent_with: Mutex::new(Vec::new()),
                }),
            }
        }
    }

    impl TokenPipeline for Script {
        type Attempt = ();

        fn needs_token(&self, _attempt: &()) -> bool {
            self.inner.needs
        }

        fn has_token(&self) -> bool {
            self.inner.token.lock().is_some()
        }

        fn store_token(&self, token: String) {
            *self.inner.token.lock() = Some(token);
        }

        fn clear_token(&self) {
            *self.inner.token.lock() = None;
        }

        fn fetch_token(&self, done: Box<dyn FnOnce(Result<String, RestError>) + Send>) {
            *self.inner.fetches.lock() += 1;
            let result = self.inner.fetch_results.lock().remove(0);
            done(result);
        }

        fn send(&self, _attempt: &(), done: RawCompletion) {
            self.inner.sent_with.lock().push(self.inner.token.lock().clone());
            let (status, body) = self.inner.replies.lock().remove(0);
            done(RawOutcome {
                result: Ok(RawBody::Bytes(body.as_bytes().to_vec())),
                status,
                request: None,
            });
        }
    }

    fn run(script: &Script) -> RawOutcome {
        let slot = Arc::new(Mutex::new(None));
        let out = Arc::clone(&slot);
        Negotiation::new(script.clone(), (), Box::new(move |o| *out.lock() = Some(o))).run();
        let outcome = slot.lock().take();
        outcome.expect("negotiation delivered nothing")
    }

    #[test]
    fn fetches_token_once_before_sending() {
        let script = Script::new(true, vec![Ok("t1".into())], vec![(201, "{}")]);
        let outcome = run(&script);
        assert_eq!(outcome.status, 201);
        assert_eq!(*script.inner.fetches.lock(), 1);
        assert_eq!(*script.inner.sent_with.lock(), vec![Some("t1".to_string())]);
    }

    #[test]
    fn cached_token_skips_fetch() {
        let script = Script::new(true, vec![], vec![(200, "{}")]);
        script.store_token("cached".into());
        run(&script);
        assert_eq!(*script.inner.fetches.lock(), 0);
    }

    #[test]
    fn not_needed_skips_fetch() {
        let script = Script::new(false, vec![], vec![(200, "{}")]);
        run(&script);
        assert_eq!(*script.inner.fetches.lock(), 0);
        assert_eq!(*script.inner.sent_with.lock(), vec![None]);
    }

    #[test]
    fn failed_fetch_sends_without_token() {
        let script = Script::new(true, vec![Err(RestError::BadStatusCode(500))], vec![(403, "forbidden")]);
        let outcome = run(&script);
        assert_eq!(outcome.status, 403);
        assert_eq!(*script.inner.sent_with.lock(), vec![None]);
    }

    #[test]
    fn expired_token_retried_once_with_fresh_token() {
        let script = Script::new(
            true,
            vec![Ok("fresh".into())],
            vec![(403, "CSRF verification failed"), (201, "{}")],
        );
        script.store_token("stale".into());
        let outcome = run(&script);
        assert_eq!(outcome.status, 201);
        assert_eq!(
            *script.inner.sent_with.lock(),
            vec![Some("stale".to_string()), Some("fresh".to_string())]
        );
    }

    #[test]
    fn second_rejection_is_surfaced() {
        let script = Script::new(
            true,
            vec![Ok("a".into()), Ok("b".into()), Ok("c".into())],
            vec![(403, "CSRF token missing"), (403, "CSRF token missing"), (201, "{}")],
        );
        let outcome = run(&script);
        assert_eq!(outcome.status, 403);
        assert_eq!(*script.inner.fetches.lock(), 2);
        assert_eq!(script.inner.sent_with.lock().len(), 2);
    }
}
