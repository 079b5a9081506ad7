use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::enrich::DetailEnricher;
use crate::error::AppError;
use crate::events::{PipelineEvent, PipelineReporter};
use crate::extract::{MismatchPolicy, RecordExtractor};
use crate::fetch::{FetchScope, PageFetcher, RetryPolicy};
use crate::identity::IdentityPool;
use crate::models::{Dataset, FailureReport};
use crate::pagination::{PaginationConfig, PaginationDriver};
use crate::schema::SelectorSchema;
use crate::throttle::{RateLimiter, ThrottleConfig};
use crate::traits::Fetcher;

/// Maximum size of the detail worker pool.
pub const MAX_WORKERS: usize = 32;

/// Everything tunable about a run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub pagination: PaginationConfig,
    pub retry: RetryPolicy,
    pub throttle: ThrottleConfig,
    /// Concurrent detail fetches. Pagination is always sequential.
    pub workers: usize,
    pub mismatch_policy: MismatchPolicy,
    /// Skip the detail stage entirely when false.
    pub enrich_details: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pagination: PaginationConfig::default(),
            retry: RetryPolicy::default(),
            throttle: ThrottleConfig::default(),
            workers: 1,
            mismatch_policy: MismatchPolicy::default(),
            enrich_details: true,
        }
    }
}

impl PipelineConfig {
    pub fn new(pagination: PaginationConfig) -> Self {
        Self {
            pagination,
            ..Default::default()
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_throttle(mut self, throttle: ThrottleConfig) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_mismatch_policy(mut self, policy: MismatchPolicy) -> Self {
        self.mismatch_policy = policy;
        self
    }

    pub fn with_enrich_details(mut self, enrich: bool) -> Self {
        self.enrich_details = enrich;
        self
    }

    pub fn validate(&self) -> Result<(), AppError> {
        self.pagination.validate()?;
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(AppError::ConfigError(format!(
                "Workers must be between 1 and {MAX_WORKERS}, got {}",
                self.workers
            )));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(AppError::ConfigError(
                "Retry base delay exceeds the maximum delay".into(),
            ));
        }
        Ok(())
    }
}

/// Result of one run: the dataset plus a full account of its gaps.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dataset: Dataset,
    pub failures: FailureReport,
    /// Last page declared by the listing root.
    pub last_page: u32,
    pub pages_attempted: u32,
    pub pages_fetched: u32,
    pub interrupted: bool,
}

impl RunOutput {
    /// Completed, but with recorded failures or an early stop.
    pub fn is_degraded(&self) -> bool {
        self.interrupted || !self.failures.is_empty()
    }
}

/// Orchestrates a run: discover → paginate → enrich.
///
/// Owns the identity rotation and pacing policy; every request of the run,
/// from either stage, goes through the same [`RateLimiter`].
pub struct Pipeline<F: Fetcher> {
    fetcher: PageFetcher<F>,
    schema: SelectorSchema,
    identities: IdentityPool,
    limiter: RateLimiter,
    config: PipelineConfig,
}

impl<F: Fetcher> Pipeline<F> {
    pub fn new(
        transport: F,
        schema: SelectorSchema,
        identities: IdentityPool,
        config: PipelineConfig,
    ) -> Result<Self, AppError> {
        config.validate()?;
        Ok(Self {
            fetcher: PageFetcher::new(transport, config.retry.clone()),
            limiter: RateLimiter::new(config.throttle.clone()),
            schema,
            identities,
            config,
        })
    }

    fn extractor(&self) -> RecordExtractor {
        RecordExtractor::new(self.config.mismatch_policy)
    }

    /// Only read the declared last page from the listing root.
    pub async fn discover(&self, cancel: &CancellationToken) -> Result<u32, AppError> {
        let scope = FetchScope::new(&self.fetcher, &self.identities, &self.limiter, cancel);
        PaginationDriver::new(&self.config.pagination, &self.schema, self.extractor())
            .discover(&scope)
            .await
    }

    /// Run the whole pipeline.
    ///
    /// 1. Discover the last page (fatal on failure)
    /// 2. Visit each listing page in order, recording page failures
    /// 3. Enrich records from their detail pages, recording detail failures
    ///
    /// Zero fetched pages is fatal unless the run was cancelled; any other
    /// failure only degrades the output.
    pub async fn run<R: PipelineReporter>(
        &self,
        cancel: CancellationToken,
        reporter: &R,
    ) -> Result<RunOutput, AppError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let schema_id = self.schema.id();
        reporter.report(PipelineEvent::RunStarted {
            run_id,
            listing_url: &self.config.pagination.listing_url,
            schema: &schema_id,
        });

        let scope = FetchScope::new(&self.fetcher, &self.identities, &self.limiter, &cancel);
        let mut failures = FailureReport::new();

        // 1 & 2. Discover + paginate
        let mut driver =
            PaginationDriver::new(&self.config.pagination, &self.schema, self.extractor());
        let pages = driver.run(&scope, &mut failures, reporter).await?;

        let pages_attempted = pages.pages_attempted();
        if pages.pages_fetched == 0 && !pages.interrupted {
            return Err(AppError::NoPagesFetched {
                attempted: pages_attempted,
            });
        }

        // 3. Enrich
        let mut interrupted = pages.interrupted;
        let records = if self.config.enrich_details && !interrupted {
            let enricher =
                DetailEnricher::new(&self.schema, self.extractor(), self.config.workers);
            let enriched = enricher
                .enrich(pages.records, &scope, &mut failures, reporter)
                .await;
            interrupted |= enriched.interrupted;
            enriched.records
        } else {
            pages.records
        };

        let dataset = Dataset::new(records);
        reporter.report(PipelineEvent::RunFinished {
            run_id,
            records: dataset.len(),
            failures: failures.len(),
        });

        Ok(RunOutput {
            run_id,
            started_at,
            finished_at: Utc::now(),
            dataset,
            failures,
            last_page: pages.last_page,
            pages_attempted,
            pages_fetched: pages.pages_fetched,
            interrupted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullReporter;
    use crate::models::FailureKind;
    use crate::testutil::{MockFetcher, detail_html, listing_html, root_html, test_schema_json};
    use crate::traits::FetchedPage;

    const ROOT: &str = "https://jobs.example.com/jobs/";
    const TEMPLATE: &str = "https://jobs.example.com/jobs/page/{page}/";

    fn config() -> PipelineConfig {
        PipelineConfig::new(PaginationConfig::new(ROOT, TEMPLATE))
            .with_retry(RetryPolicy::immediate(1))
            .with_throttle(ThrottleConfig::none())
            .with_workers(2)
    }

    fn pipeline(mock: MockFetcher, config: PipelineConfig) -> Pipeline<MockFetcher> {
        Pipeline::new(
            mock,
            SelectorSchema::from_json(&test_schema_json(&[])).unwrap(),
            IdentityPool::from_user_agents(["ua-1", "ua-2"]).unwrap(),
            config,
        )
        .unwrap()
    }

    /// Two pages of two listings, every detail page present.
    fn site() -> MockFetcher {
        let cfg = config();
        let mut mock = MockFetcher::new().always(ROOT, FetchedPage::ok(root_html(2)));
        for page in 1..=2 {
            mock = mock.always(
                &cfg.pagination.page_url(page),
                FetchedPage::ok(listing_html(page, 2)),
            );
            for i in 1..=2 {
                mock = mock.always(
                    &format!("https://jobs.example.com/job/{page}-{i}"),
                    FetchedPage::ok(detail_html(&format!("About {page}-{i}"), Some("P1"))),
                );
            }
        }
        mock
    }

    #[tokio::test]
    async fn full_run_produces_ordered_enriched_dataset() {
        let mock = site();
        let output = pipeline(mock.clone(), config())
            .run(CancellationToken::new(), &NullReporter)
            .await
            .unwrap();

        assert!(!output.is_degraded());
        assert_eq!(output.pages_fetched, 2);
        assert_eq!(output.last_page, 2);
        let titles: Vec<_> = output
            .dataset
            .records()
            .iter()
            .map(|r| r.job_title.clone().unwrap())
            .collect();
        assert_eq!(titles, ["Job 1-1", "Job 1-2", "Job 2-1", "Job 2-2"]);
        assert!(output
            .dataset
            .records()
            .iter()
            .all(|r| r.description.is_some() && r.salary.as_deref() == Some("P1")));
        assert!(output.finished_at >= output.started_at);
        // root + 2 pages + 4 details
        assert_eq!(mock.total_calls(), 7);
        assert!(mock
            .calls()
            .iter()
            .all(|(_, ua)| ua == "ua-1" || ua == "ua-2"));
    }

    #[tokio::test]
    async fn partial_failures_degrade_but_succeed() {
        let cfg = config();
        let mock = site()
            .always(&cfg.pagination.page_url(2), FetchedPage::with_status(500))
            .always("https://jobs.example.com/job/1-2", FetchedPage::with_status(404));

        let output = pipeline(mock, cfg)
            .run(CancellationToken::new(), &NullReporter)
            .await
            .unwrap();

        assert!(output.is_degraded());
        assert_eq!(output.pages_attempted, 2);
        assert_eq!(output.pages_fetched, 1);
        assert_eq!(output.dataset.len(), 2);
        assert_eq!(output.failures.count(FailureKind::PageFetchFailed), 1);
        assert_eq!(output.failures.count(FailureKind::DetailFetchFailed), 1);
        assert_eq!(output.dataset.records()[1].description, None);
    }

    #[tokio::test]
    async fn no_fetched_pages_is_fatal() {
        let cfg = config();
        let mock = MockFetcher::new()
            .always(ROOT, FetchedPage::ok(root_html(2)))
            .always(&cfg.pagination.page_url(1), FetchedPage::with_status(503))
            .always(&cfg.pagination.page_url(2), FetchedPage::with_status(503));

        let err = pipeline(mock, cfg)
            .run(CancellationToken::new(), &NullReporter)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NoPagesFetched { attempted: 2 }));
    }

    #[tokio::test]
    async fn listing_only_run_skips_details() {
        let mock = site();
        let output = pipeline(mock.clone(), config().with_enrich_details(false))
            .run(CancellationToken::new(), &NullReporter)
            .await
            .unwrap();
        assert_eq!(output.dataset.len(), 4);
        assert_eq!(mock.total_calls(), 3);
        assert!(output.dataset.records().iter().all(|r| r.description.is_none()));
    }

    #[tokio::test]
    async fn discover_reads_last_page_only() {
        let mock = site();
        let last = pipeline(mock.clone(), config())
            .discover(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(last, 2);
        assert_eq!(mock.urls(), vec![ROOT.to_string()]);
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = pipeline(site(), config())
            .run(cancel, &NullReporter)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Cancelled));
    }

    #[test]
    fn config_validation() {
        assert!(config().validate().is_ok());
        assert!(config().with_workers(0).validate().is_err());
        assert!(config().with_workers(MAX_WORKERS + 1).validate().is_err());

        let bad = PipelineConfig::new(PaginationConfig::new(ROOT, ROOT));
        let result = Pipeline::new(
            MockFetcher::new(),
            SelectorSchema::from_json(&test_schema_json(&[])).unwrap(),
            IdentityPool::from_user_agents(["ua"]).unwrap(),
            bad,
        );
        assert!(matches!(result, Err(AppError::ConfigError(_))));
    }
}
