//! Cursor pagination.
//!
//! # Design
//! A list call is a loop over pages driven by completions: fetch a page,
//! decode its `results`, append, and either fetch the next page or deliver.
//! Page N+1 is only requested after page N decoded, so items always arrive
//! in page order. Any failure ends the whole call; partial lists are never
//! delivered.
//!
//! The aggregator does not know how a page is fetched. The session hands it
//! a `PageFetch` closure, which keeps the loop testable without a transport.

use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::decode::decode_json_value;
use crate::error::RestError;
use crate::http::{Completion, Decoded};
use crate::request::ListRequest;

pub const DEFAULT_PAGE_SIZE: u32 = 25;
pub const DEFAULT_SORT_KEY: &str = "id";

/// Position in a paginated list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    /// 1-based page number.
    pub page: u32,
    pub page_size: u32,
    pub sort_key: String,
    pub ascending: bool,
    /// Server-provided URL of this page. When set it is requested as is.
    pub next_url: Option<Url>,
}

impl Default for PageCursor {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            sort_key: DEFAULT_SORT_KEY.to_string(),
            ascending: true,
            next_url: None,
        }
    }
}

impl PageCursor {
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn sorted_by(mut self, key: impl Into<String>, ascending: bool) -> Self {
        self.sort_key = key.into();
        self.ascending = ascending;
        self
    }

    /// `sort_key`, prefixed with `-` when descending.
    pub fn ordering(&self) -> String {
        if self.ascending {
            self.sort_key.clone()
        } else {
            format!("-{}", self.sort_key)
        }
    }

    pub fn query_items(&self) -> Vec<(String, String)> {
        vec![
            ("page".to_string(), self.page.to_string()),
            ("page_size".to_string(), self.page_size.to_string()),
            ("ordering".to_string(), self.ordering()),
        ]
    }

    /// The following page: same size and ordering, reached through `next`.
    pub fn advance(&self, next: Url) -> Self {
        Self {
            page: self.page + 1,
            next_url: Some(next),
            ..self.clone()
        }
    }
}

/// Whether to keep following `next` links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageMode {
    #[default]
    FollowAll,
    FirstPageOnly,
}

/// One decoded page.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Raw `next` value; `None` when absent or null.
    pub next: Option<String>,
}

#[derive(Deserialize)]
struct PageWire {
    results: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    next: Option<String>,
}

/// Decode a page body. A missing `results` array is a hard failure, as is
/// any element the item type does not accept.
pub fn decode_page<R: ListRequest>(data: &[u8], request: &R) -> Result<Page<R::Item>, RestError> {
    let wire: PageWire =
        serde_json::from_slice(data).map_err(|e| RestError::DecoderFailure(e.to_string()))?;
    let results = wire.results.ok_or(RestError::UndecodableData)?;
    let items = results
        .iter()
        .map(|value| decode_json_value::<R, R::Item>(value, request))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Page {
        items,
        next: wire.next.filter(|n| !n.is_empty()),
    })
}

pub type PageDone<T> = Box<dyn FnOnce(Decoded<(Page<T>, Option<Url>)>) + Send>;
/// Fetch the page at a cursor. Delivers the page plus its resolved `next` URL.
pub type PageFetch<T> = Arc<dyn Fn(PageCursor, PageDone<T>) + Send + Sync>;

/// Accumulates items across pages and delivers them once.
pub struct Aggregator<T: Send + 'static> {
    fetch: PageFetch<T>,
    mode: PageMode,
    items: Vec<T>,
    pages: usize,
    completion: Completion<Vec<T>>,
}

impl<T: Send + 'static> Aggregator<T> {
    pub fn new(
        fetch: PageFetch<T>,
        mode: PageMode,
        completion: Completion<Vec<T>>,
    ) -> Self {
        Self {
            fetch,
            mode,
            items: Vec::new(),
            pages: 0,
            completion,
        }
    }

    pub fn start(self, cursor: PageCursor) {
        let fetch = Arc::clone(&self.fetch);
        fetch(cursor.clone(), Box::new(move |decoded| self.on_page(cursor, decoded)));
    }

    fn on_page(mut self, cursor: PageCursor, decoded: Decoded<(Page<T>, Option<Url>)>) {
        let status = decoded.status;
        let (page, next) = match decoded.result {
            Ok(page) => page,
            Err(error) => {
                debug!(page = cursor.page, status, %error, "page failed; list call aborted");
                (self.completion)(Decoded::failure(error, status));
                return;
            }
        };
        self.pages += 1;
        self.items.extend(page.items);
        debug!(page = cursor.page, total = self.items.len(), "page appended");

        match next {
            Some(next) if self.mode == PageMode::FollowAll => self.start(cursor.advance(next)),
            _ => {
                debug!(pages = self.pages, items = self.items.len(), "list complete");
                (self.completion)(Decoded::success(self.items, status));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Endpoint, RestResponse};
    use parking_lot::Mutex;

    struct Things;

    impl Endpoint for Things {
        fn endpoint(&self) -> String {
            "things/".to_string()
        }
    }

    #[derive(Debug, PartialEq)]
    struct Thing(u32);

    #[derive(Deserialize)]
    struct ThingWire {
        id: u32,
    }

    impl RestResponse<Things> for Thing {
        type Wire = ThingWire;

        fn from_wire(wire: ThingWire, _request: &Things) -> Option<Self> {
            (wire.id != 0).then_some(Thing(wire.id))
        }
    }

    impl ListRequest for Things {
        type Item = Thing;
    }

    #[test]
    fn cursor_query_and_ordering() {
        let cursor = PageCursor::default();
        assert_eq!(
            cursor.query_items(),
            vec![
                ("page".to_string(), "1".to_string()),
                ("page_size".to_string(), "25".to_string()),
                ("ordering".to_string(), "id".to_string()),
            ]
        );
        assert_eq!(cursor.sorted_by("created", false).ordering(), "-created");
    }

    #[test]
    fn advance_keeps_size_and_sort() {
        let next = Url::parse("https://api.test/things/?page=2").unwrap();
        let cursor = PageCursor::default().with_page_size(10).advance(next.clone());
        assert_eq!(cursor.page, 2);
        assert_eq!(cursor.page_size, 10);
        assert_eq!(cursor.next_url, Some(next));
    }

    #[test]
    fn decode_page_requires_results() {
        let page = decode_page(br#"{"results":[{"id":1},{"id":2}],"next":null}"#, &Things).unwrap();
        assert_eq!(page.items, vec![Thing(1), Thing(2)]);
        assert_eq!(page.next, None);

        let err = decode_page(br#"{"count":0}"#, &Things).unwrap_err();
        assert_eq!(err, RestError::UndecodableData);
    }

    #[test]
    fn one_bad_element_fails_the_page() {
        let err = decode_page(br#"{"results":[{"id":1},{"id":0}]}"#, &Things).unwrap_err();
        assert_eq!(err, RestError::UndecodableData);
        let err = decode_page(br#"{"results":[{"id":"x"}]}"#, &Things).unwrap_err();
        assert!(matches!(err, RestError::DecoderFailure(_)));
    }

    /// Serves `pages[n]` for page n+1, linking each to the next.
    fn scripted(pages: Vec<Vec<u32>>, calls: Arc<Mutex<Vec<u32>>>) -> PageFetch<u32> {
        Arc::new(move |cursor: PageCursor, done: PageDone<u32>| {
            calls.lock().push(cursor.page);
            let index = cursor.page as usize - 1;
            let next = (index + 1 < pages.len())
                .then(|| Url::parse(&format!("https://api.test/things/?page={}", cursor.page + 1)).unwrap());
            let page = Page {
                items: pages[index].clone(),
                next: next.as_ref().map(Url::to_string),
            };
            done(Decoded::success((page, next), 200));
        })
    }

    fn collect(fetch: PageFetch<u32>, mode: PageMode) -> Decoded<Vec<u32>> {
        let slot = Arc::new(Mutex::new(None));
        let out = Arc::clone(&slot);
        Aggregator::new(fetch, mode, Box::new(move |d| *out.lock() = Some(d))).start(PageCursor::default());
        let decoded = slot.lock().take();
        decoded.unwrap()
    }

    #[test]
    fn follows_every_page_in_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let pages = vec![(1..=25).collect(), (26..=35).collect()];
        let decoded = collect(scripted(pages, Arc::clone(&calls)), PageMode::FollowAll);
        assert_eq!(decoded.result.unwrap(), (1..=35).collect::<Vec<u32>>());
        assert_eq!(*calls.lock(), vec![1, 2]);
    }

    #[test]
    fn first_page_only_ignores_next() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let pages = vec![(1..=25).collect(), (26..=35).collect()];
        let decoded = collect(scripted(pages, Arc::clone(&calls)), PageMode::FirstPageOnly);
        assert_eq!(decoded.result.unwrap().len(), 25);
        assert_eq!(*calls.lock(), vec![1]);
    }

    #[test]
    fn failing_page_delivers_no_partial_list() {
        let fetch: PageFetch<u32> = Arc::new(|cursor: PageCursor, done: PageDone<u32>| {
            if cursor.page == 1 {
                let next = Url::parse("https://api.test/things/?page=2").unwrap();
                done(Decoded::success((Page { items: vec![1, 2], next: Some(next.to_string()) }, Some(next)), 200));
            } else {
                done(Decoded::failure(RestError::BadStatusCode(500), 500));
            }
        });
        let decoded = collect(fetch, PageMode::FollowAll);
        assert_eq!(decoded.result, Err(RestError::BadStatusCode(500)));
        assert_eq!(decoded.status, 500);
    }
}
