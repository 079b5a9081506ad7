use std::future::Future;

use crate::error::AppError;
use crate::identity::Identity;

/// A raw HTTP response: any status, with its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub status: u16,
    pub body: String,
}

impl FetchedPage {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
        }
    }
}

/// Performs exactly one HTTP GET with the identity it is given.
///
/// Implementations must bound every call with a timeout. Non-2xx statuses
/// are returned as `Ok`; classification, pacing and retries belong to
/// [`PageFetcher`](crate::fetch::PageFetcher).
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(
        &self,
        url: &str,
        identity: &Identity,
    ) -> impl Future<Output = Result<FetchedPage, AppError>> + Send;
}
