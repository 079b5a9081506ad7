//! Paginated listing crawl.
//!
//! ```text
//! Discovering --[last page read]--> Iterating(current, last) --[past last / cancelled]--> Done
//! ```
//!
//! Pages are visited sequentially in ascending order so the record order is
//! page order, then document order within a page.

use crate::error::{AppError, FetchFailureKind};
use crate::events::{PipelineEvent, PipelineReporter};
use crate::extract::{ExtractionContext, RecordExtractor};
use crate::fetch::{FetchScope, PageFetchResult};
use crate::models::{FailureKind, FailureReport, JobRecord, Stage};
use crate::schema::SelectorSchema;
use crate::traits::Fetcher;

/// Placeholder substituted with the page number in page URLs.
pub const PAGE_PLACEHOLDER: &str = "{page}";

/// Where the listing lives and which pages to visit.
#[derive(Debug, Clone)]
pub struct PaginationConfig {
    /// Root of the listing; its pager declares the last page.
    pub listing_url: String,
    /// URL of page N, with `{page}` substituted.
    pub page_url_template: String,
    /// First page to visit. Resumed runs start past 1.
    pub start_page: u32,
    /// Optional cap below the discovered last page.
    pub end_page: Option<u32>,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            listing_url: "https://pinoyjobs.ph/jobs/".into(),
            page_url_template: "https://pinoyjobs.ph/jobs/page/{page}/".into(),
            start_page: 1,
            end_page: None,
        }
    }
}

impl PaginationConfig {
    pub fn new(listing_url: impl Into<String>, page_url_template: impl Into<String>) -> Self {
        Self {
            listing_url: listing_url.into(),
            page_url_template: page_url_template.into(),
            ..Default::default()
        }
    }

    pub fn with_start_page(mut self, page: u32) -> Self {
        self.start_page = page;
        self
    }

    pub fn with_end_page(mut self, page: u32) -> Self {
        self.end_page = Some(page);
        self
    }

    pub fn page_url(&self, page: u32) -> String {
        self.page_url_template
            .replace(PAGE_PLACEHOLDER, &page.to_string())
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if !self.page_url_template.contains(PAGE_PLACEHOLDER) {
            return Err(AppError::ConfigError(format!(
                "Page URL template '{}' has no {PAGE_PLACEHOLDER} placeholder",
                self.page_url_template
            )));
        }
        if self.start_page == 0 {
            return Err(AppError::ConfigError("Start page must be at least 1".into()));
        }
        if let Some(end) = self.end_page {
            if end < self.start_page {
                return Err(AppError::ConfigError(format!(
                    "End page {end} is before start page {}",
                    self.start_page
                )));
            }
        }
        Ok(())
    }
}

/// Current position of the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationState {
    Discovering,
    Iterating { current: u32, last: u32 },
    Done,
}

/// Everything the listing crawl produced.
#[derive(Debug, Clone, Default)]
pub struct PaginationOutcome {
    /// Page order, then document order.
    pub records: Vec<JobRecord>,
    pub last_page: u32,
    /// Pages visited, ascending.
    pub pages_visited: Vec<u32>,
    pub pages_fetched: u32,
    pub interrupted: bool,
}

impl PaginationOutcome {
    pub fn pages_attempted(&self) -> u32 {
        self.pages_visited.len() as u32
    }
}

/// Drives the fetcher and extractor across the listing pages.
pub struct PaginationDriver<'a> {
    config: &'a PaginationConfig,
    schema: &'a SelectorSchema,
    extractor: RecordExtractor,
    state: PaginationState,
}

impl<'a> PaginationDriver<'a> {
    pub fn new(
        config: &'a PaginationConfig,
        schema: &'a SelectorSchema,
        extractor: RecordExtractor,
    ) -> Self {
        Self {
            config,
            schema,
            extractor,
            state: PaginationState::Discovering,
        }
    }

    pub fn state(&self) -> PaginationState {
        self.state
    }

    /// Fetch the listing root and read the declared last page.
    ///
    /// Any failure here is fatal: nothing downstream can run without it.
    pub async fn discover<F: Fetcher>(&self, scope: &FetchScope<'_, F>) -> Result<u32, AppError> {
        let url = &self.config.listing_url;
        match scope.get(url).await {
            PageFetchResult::Success { body, .. } => {
                self.extractor.extract_last_page(&body, self.schema)
            }
            PageFetchResult::Failure {
                kind: FetchFailureKind::Cancelled,
                ..
            } => Err(AppError::Cancelled),
            PageFetchResult::Failure { kind, message, .. } => Err(AppError::DiscoveryError(
                format!("Listing root {url} could not be fetched ({kind}): {message}"),
            )),
        }
    }

    /// Discover, then visit `[start_page, last_page]` in ascending order.
    ///
    /// Page fetch failures are recorded and skipped. Cancellation stops the
    /// crawl and returns what was gathered so far.
    pub async fn run<F: Fetcher, R: PipelineReporter>(
        &mut self,
        scope: &FetchScope<'_, F>,
        report: &mut FailureReport,
        reporter: &R,
    ) -> Result<PaginationOutcome, AppError> {
        self.state = PaginationState::Discovering;
        let discovered = self.discover(scope).await?;

        let last = self
            .config
            .end_page
            .map_or(discovered, |end| end.min(discovered));
        let start = self.config.start_page;
        if start > last {
            return Err(AppError::ConfigError(format!(
                "Start page {start} is past the last page {last}"
            )));
        }
        reporter.report(PipelineEvent::LastPageDiscovered {
            last_page: discovered,
            start_page: start,
            end_page: last,
        });

        let mut outcome = PaginationOutcome {
            last_page: discovered,
            ..Default::default()
        };

        for page in start..=last {
            if scope.is_cancelled() {
                outcome.interrupted = true;
                break;
            }
            self.state = PaginationState::Iterating {
                current: page,
                last,
            };
            outcome.pages_visited.push(page);

            let url = self.config.page_url(page);
            match scope.get(&url).await {
                PageFetchResult::Success { body, .. } => {
                    outcome.pages_fetched += 1;
                    let context = ExtractionContext {
                        page,
                        page_url: &url,
                    };
                    let extraction = self.extractor.extract_listing(&body, self.schema, &context);

                    for warning in &extraction.warnings {
                        report.record(
                            Stage::Extraction,
                            page.to_string(),
                            FailureKind::FieldCountMismatch,
                            format!("{warning} (policy: {})", self.extractor.policy()),
                        );
                    }
                    if extraction.records.is_empty() && extraction.warnings.is_empty() {
                        report.record(
                            Stage::Extraction,
                            page.to_string(),
                            FailureKind::EmptyPage,
                            format!("No listings found at {url}"),
                        );
                    }

                    reporter.report(PipelineEvent::PageFetched {
                        page,
                        records: extraction.records.len(),
                    });
                    outcome.records.extend(extraction.records);
                }
                PageFetchResult::Failure {
                    kind: FetchFailureKind::Cancelled,
                    ..
                } => {
                    outcome.pages_visited.pop();
                    outcome.interrupted = true;
                    break;
                }
                PageFetchResult::Failure {
                    kind,
                    message,
                    attempts,
                    ..
                } => {
                    let error = format!("{kind} after {attempts} attempt(s): {message}");
                    reporter.report(PipelineEvent::PageFailed {
                        page,
                        error: &error,
                    });
                    report.record(
                        Stage::Pagination,
                        page.to_string(),
                        FailureKind::PageFetchFailed,
                        error,
                    );
                }
            }
        }

        if outcome.interrupted {
            reporter.report(PipelineEvent::Interrupted {
                stage: "pagination",
            });
            report.record(
                Stage::Pagination,
                self.config.listing_url.clone(),
                FailureKind::Cancelled,
                format!(
                    "Cancelled after {} of {} page(s)",
                    outcome.pages_attempted(),
                    last - start + 1
                ),
            );
        }

        self.state = PaginationState::Done;
        Ok(outcome)
    }
}
