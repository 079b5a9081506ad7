use uuid::Uuid;

/// Events emitted by the pipeline for monitoring/logging.
#[derive(Debug, Clone)]
pub enum PipelineEvent<'a> {
    RunStarted {
        run_id: Uuid,
        listing_url: &'a str,
        schema: &'a str,
    },
    LastPageDiscovered {
        last_page: u32,
        start_page: u32,
        end_page: u32,
    },
    PageFetched {
        page: u32,
        records: usize,
    },
    PageFailed {
        page: u32,
        error: &'a str,
    },
    EnrichmentStarted {
        pending: usize,
        skipped: usize,
        workers: usize,
    },
    DetailFailed {
        url: &'a str,
        error: &'a str,
    },
    Interrupted {
        stage: &'a str,
    },
    RunFinished {
        run_id: Uuid,
        records: usize,
        failures: usize,
    },
}

/// Trait for receiving pipeline events (decoupled logging).
pub trait PipelineReporter: Send + Sync {
    fn report(&self, event: PipelineEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl PipelineReporter for NullReporter {}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl PipelineReporter for TracingReporter {
    fn report(&self, event: PipelineEvent<'_>) {
        match event {
            PipelineEvent::RunStarted {
                run_id,
                listing_url,
                schema,
            } => {
                tracing::info!(%run_id, %listing_url, %schema, "Run started");
            }
            PipelineEvent::LastPageDiscovered {
                last_page,
                start_page,
                end_page,
            } => {
                tracing::info!(%last_page, %start_page, %end_page, "Discovered last page");
            }
            PipelineEvent::PageFetched { page, records } => {
                tracing::info!(%page, %records, "Page scraped");
            }
            PipelineEvent::PageFailed { page, error } => {
                tracing::warn!(%page, %error, "Page failed");
            }
            PipelineEvent::EnrichmentStarted {
                pending,
                skipped,
                workers,
            } => {
                tracing::info!(%pending, %skipped, %workers, "Enriching detail pages");
            }
            PipelineEvent::DetailFailed { url, error } => {
                tracing::warn!(%url, %error, "Detail page failed");
            }
            PipelineEvent::Interrupted { stage } => {
                tracing::warn!(%stage, "Run interrupted, keeping partial results");
            }
            PipelineEvent::RunFinished {
                run_id,
                records,
                failures,
            } => {
                tracing::info!(%run_id, %records, %failures, "Run finished");
            }
        }
    }
}
