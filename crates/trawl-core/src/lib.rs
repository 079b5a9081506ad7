pub mod enrich;
pub mod error;
pub mod events;
pub mod extract;
pub mod fetch;
pub mod identity;
pub mod models;
pub mod pagination;
pub mod pipeline;
pub mod schema;
pub mod sink;
pub mod throttle;
pub mod traits;

#[cfg(test)]
pub mod testutil;

pub use error::{AppError, FetchFailureKind};
pub use events::{NullReporter, PipelineEvent, PipelineReporter, TracingReporter};
pub use extract::{MismatchPolicy, RecordExtractor};
pub use fetch::{PageFetchResult, PageFetcher, RetryPolicy};
pub use identity::{Identity, IdentityPool};
pub use models::{Dataset, ExtractionWarning, FailureEntry, FailureKind, FailureReport, JobRecord};
pub use pagination::PaginationConfig;
pub use pipeline::{Pipeline, PipelineConfig, RunOutput};
pub use schema::{ResolvedSchema, SchemaResolver, SelectorSchema};
pub use throttle::{Lane, RateLimiter, ThrottleConfig};
pub use traits::{FetchedPage, Fetcher};
