//! Test utilities: a scripted transport and HTML/schema fixtures.
//!
//! Handwritten mocks for dependency injection in unit tests. State lives
//! behind `Arc<Mutex<_>>` so clones handed to the pipeline can be inspected
//! afterwards.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::error::AppError;
use crate::identity::Identity;
use crate::traits::{FetchedPage, Fetcher};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockState {
    /// Per-URL queue; each call pops the front.
    scripted: HashMap<String, VecDeque<Result<FetchedPage, AppError>>>,
    /// Returned once a URL's queue is empty.
    sticky: HashMap<String, FetchedPage>,
    /// (url, user agent) per call, in call order.
    calls: Vec<(String, String)>,
}

/// Transport returning scripted responses per URL.
///
/// Unknown URLs answer HTTP 404.
#[derive(Clone, Default)]
pub struct MockFetcher {
    state: Arc<Mutex<MockState>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for `url`.
    pub fn with_page(self, url: &str, page: FetchedPage) -> Self {
        self.push(url, Ok(page));
        self
    }

    /// Queue a transport error for `url`.
    pub fn with_error(self, url: &str, error: AppError) -> Self {
        self.push(url, Err(error));
        self
    }

    /// Answer `url` with `page` whenever nothing is queued.
    pub fn always(self, url: &str, page: FetchedPage) -> Self {
        self.state
            .lock()
            .unwrap()
            .sticky
            .insert(url.to_string(), page);
        self
    }

    fn push(&self, url: &str, response: Result<FetchedPage, AppError>) {
        self.state
            .lock()
            .unwrap()
            .scripted
            .entry(url.to_string())
            .or_default()
            .push_back(response);
    }

    /// Every call as `(url, user_agent)`.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().calls.clone()
    }

    /// URLs in call order.
    pub fn urls(&self) -> Vec<String> {
        self.calls().into_iter().map(|(url, _)| url).collect()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(u, _)| u == url)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str, identity: &Identity) -> Result<FetchedPage, AppError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push((url.to_string(), identity.user_agent().to_string()));

        if let Some(response) = state.scripted.get_mut(url).and_then(VecDeque::pop_front) {
            return response;
        }
        Ok(state
            .sticky
            .get(url)
            .cloned()
            .unwrap_or_else(|| FetchedPage::with_status(404)))
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// JSON for a schema matching [`listing_html`], [`root_html`] and
/// [`detail_html`]. `overrides` replace individual field rules.
pub fn test_schema_json(overrides: &[(&str, serde_json::Value)]) -> String {
    let mut fields = serde_json::json!({
        "last_page": {"selector": "ul.pager li.last a", "cardinality": "first-of-list"},
        "date_posted": {"selector": "li.job span.date", "cardinality": "list"},
        "job_title": {"selector": "li.job h2", "cardinality": "list"},
        "company_name": {"selector": "li.job .company", "cardinality": "list"},
        "location": {"selector": "li.job .location", "cardinality": "list"},
        "detail_url": {
            "selector": "ul.jobs > li:nth-child({index}) a.more",
            "cardinality": "list",
            "value": {"attr": "href"},
            "probe_limit": 30
        },
        "description": {"selector": "div.description", "cardinality": "first-of-list", "value": "html"},
        "salary": {"selector": "span.salary", "cardinality": "single", "optional": true}
    });
    for (field, rule) in overrides {
        fields[*field] = rule.clone();
    }
    serde_json::json!({"name": "test", "version": "1", "fields": fields}).to_string()
}

/// A listing page with `count` complete entries. Detail links are
/// `/job/{page}-{i}` and titles `Job {page}-{i}`, 1-indexed.
pub fn listing_html(page: u32, count: usize) -> String {
    let items: String = (1..=count)
        .map(|i| {
            format!(
                r#"<li class="job"><a class="more" href="/job/{page}-{i}">more</a>
                   <span class="date">2021-0{m}-1{d}</span><h2>Job {page}-{i}</h2>
                   <span class="company">Company {i}</span><span class="location">City {i}</span></li>"#,
                m = (i % 9) + 1,
                d = i % 10,
            )
        })
        .collect();
    format!(r#"<html><body><ul class="jobs">{items}</ul></body></html>"#)
}

/// The listing root, declaring `last_page` in its pager.
pub fn root_html(last_page: u32) -> String {
    format!(
        r#"<html><body><ul class="pager"><li class="last"><a href="/jobs/page/{last_page}/">{last_page}</a></li></ul></body></html>"#
    )
}

/// A detail page. `salary: None` omits the salary element.
pub fn detail_html(description: &str, salary: Option<&str>) -> String {
    let salary = salary
        .map(|s| format!(r#"<span class="salary">{s}</span>"#))
        .unwrap_or_default();
    format!(
        r#"<html><body><div class="description"><p>{description}</p></div>{salary}</body></html>"#
    )
}
