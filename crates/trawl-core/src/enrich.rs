//! Detail-page enrichment with a bounded worker pool.
//!
//! Workers pull record indices from one shared queue and share the run's
//! [`RateLimiter`](crate::throttle::RateLimiter) through the
//! [`FetchScope`], so the request rate does not grow with the worker count.
//! Results are applied in record order once every worker has stopped, so the
//! failure report reads the same whatever order fetches completed in.

use std::collections::VecDeque;

use futures::future::join_all;
use tokio::sync::Mutex;

use crate::error::FetchFailureKind;
use crate::events::{PipelineEvent, PipelineReporter};
use crate::extract::{DetailExtraction, RecordExtractor};
use crate::fetch::{FetchScope, PageFetchResult};
use crate::models::{ExtractionWarning, FailureKind, FailureReport, JobRecord, Stage};
use crate::schema::SelectorSchema;
use crate::traits::Fetcher;

/// Counts for one enrichment pass.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentOutcome {
    pub records: Vec<JobRecord>,
    pub enriched: usize,
    pub failed: usize,
    /// Records without a detail URL.
    pub skipped: usize,
    /// Details left unfetched because the run was cancelled.
    pub pending: usize,
    pub interrupted: bool,
}

enum DetailResult {
    Enriched(DetailExtraction),
    Failed(String),
}

/// Fills `description` and `salary` from each record's detail page.
pub struct DetailEnricher<'a> {
    schema: &'a SelectorSchema,
    extractor: RecordExtractor,
    workers: usize,
}

impl<'a> DetailEnricher<'a> {
    /// `workers` is clamped to at least 1.
    pub fn new(schema: &'a SelectorSchema, extractor: RecordExtractor, workers: usize) -> Self {
        Self {
            schema,
            extractor,
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Enrich `records` in place and hand them back, same length, same order.
    ///
    /// A failed detail fetch leaves the record's detail fields unset and adds
    /// one `DetailFetchFailed` entry. Records are never dropped.
    pub async fn enrich<F: Fetcher, R: PipelineReporter>(
        &self,
        mut records: Vec<JobRecord>,
        scope: &FetchScope<'_, F>,
        report: &mut FailureReport,
        reporter: &R,
    ) -> EnrichmentOutcome {
        let mut outcome = EnrichmentOutcome::default();

        let mut pending = VecDeque::new();
        for (index, record) in records.iter_mut().enumerate() {
            match &record.detail_url {
                Some(url) => pending.push_back((index, url.clone())),
                None => {
                    record.warn(ExtractionWarning::MissingDetailUrl);
                    outcome.skipped += 1;
                }
            }
        }

        let workers = self.workers.min(pending.len()).max(1);
        reporter.report(PipelineEvent::EnrichmentStarted {
            pending: pending.len(),
            skipped: outcome.skipped,
            workers,
        });

        let queue = Mutex::new(pending);
        let results = Mutex::new(Vec::new());

        join_all((0..workers).map(|worker| self.worker(worker, scope, &queue, &results))).await;

        let mut results = results.into_inner();
        results.sort_by_key(|(index, _, _)| *index);

        let mut done = vec![false; records.len()];
        for (index, url, result) in results {
            done[index] = true;
            let record = &mut records[index];
            match result {
                DetailResult::Enriched(detail) => {
                    record.description = detail.description;
                    record.salary = detail.salary;
                    for warning in detail.warnings {
                        record.warn(warning);
                    }
                    outcome.enriched += 1;
                }
                DetailResult::Failed(error) => {
                    reporter.report(PipelineEvent::DetailFailed {
                        url: &url,
                        error: &error,
                    });
                    report.record(
                        Stage::Enrichment,
                        url,
                        FailureKind::DetailFetchFailed,
                        error,
                    );
                    outcome.failed += 1;
                }
            }
        }

        outcome.pending = records.len() - outcome.enriched - outcome.failed - outcome.skipped;
        outcome.interrupted = scope.is_cancelled() && outcome.pending > 0;
        if outcome.interrupted {
            reporter.report(PipelineEvent::Interrupted {
                stage: "enrichment",
            });
            let first_unfetched = records
                .iter()
                .zip(&done)
                .filter(|(_, done)| !**done)
                .find_map(|(record, _)| record.detail_url.clone())
                .unwrap_or_default();
            report.record(
                Stage::Enrichment,
                first_unfetched,
                FailureKind::Cancelled,
                format!("Cancelled with {} detail page(s) not fetched", outcome.pending),
            );
        }

        outcome.records = records;
        outcome
    }

    async fn worker<F: Fetcher>(
        &self,
        worker: usize,
        scope: &FetchScope<'_, F>,
        queue: &Mutex<VecDeque<(usize, String)>>,
        results: &Mutex<Vec<(usize, String, DetailResult)>>,
    ) {
        loop {
            if scope.is_cancelled() {
                tracing::debug!(worker, "Enrichment worker cancelled");
                break;
            }
            let next = queue.lock().await.pop_front();
            let Some((index, url)) = next else {
                break;
            };

            let result = match scope.get(&url).await {
                PageFetchResult::Success { body, .. } => {
                    DetailResult::Enriched(self.extractor.extract_detail(&body, self.schema))
                }
                PageFetchResult::Failure {
                    kind: FetchFailureKind::Cancelled,
                    ..
                } => break,
                PageFetchResult::Failure {
                    kind,
                    message,
                    attempts,
                    ..
                } => DetailResult::Failed(format!("{kind} after {attempts} attempt(s): {message}")),
            };
            results.lock().await.push((index, url, result));
        }
    }
}
