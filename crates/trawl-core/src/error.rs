use std::fmt;

use thiserror::Error;

/// Why a single fetch did not produce a usable page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchFailureKind {
    /// The request exceeded the transport timeout.
    Timeout,
    /// Connection refused, reset, DNS failure and friends.
    Network,
    /// HTTP 429.
    RateLimited,
    /// HTTP 5xx.
    ServerError(u16),
    /// HTTP 4xx other than 429.
    ClientError(u16),
    /// The URL could not be parsed or uses an unsupported scheme.
    InvalidUrl,
    /// The run was cancelled before the fetch could complete.
    Cancelled,
}

impl FetchFailureKind {
    /// Classify an HTTP status code. Returns `None` for 2xx/3xx.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            429 => Some(Self::RateLimited),
            400..=499 => Some(Self::ClientError(status)),
            500..=599 => Some(Self::ServerError(status)),
            _ => None,
        }
    }

    /// Timeouts, 429 and 5xx are worth another attempt. Everything else is final.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Network | Self::RateLimited | Self::ServerError(_)
        )
    }
}

impl fmt::Display for FetchFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Network => write!(f, "network"),
            Self::RateLimited => write!(f, "rate limited (HTTP 429)"),
            Self::ServerError(code) => write!(f, "server error (HTTP {code})"),
            Self::ClientError(code) => write!(f, "client error (HTTP {code})"),
            Self::InvalidUrl => write!(f, "invalid url"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Application-wide error types for Trawl.
#[derive(Error, Debug)]
pub enum AppError {
    /// Selector schema could not be loaded or compiled. Fatal, raised at construction.
    #[error("Schema error: {0}")]
    SchemaError(String),

    /// Pipeline configuration is invalid. Fatal.
    #[error("Config error: {0}")]
    ConfigError(String),

    /// The listing root did not yield a usable last-page number. Fatal.
    #[error("Discovery error: {0}")]
    DiscoveryError(String),

    /// A single transport attempt failed.
    #[error("Fetch error ({kind}): {message}")]
    FetchError {
        kind: FetchFailureKind,
        retriable: bool,
        message: String,
    },

    /// Every listing page in range failed. Fatal.
    #[error("No listing pages could be fetched ({attempted} attempted)")]
    NoPagesFetched { attempted: u32 },

    /// The run was cancelled externally.
    #[error("Run cancelled")]
    Cancelled,

    /// Writing the dataset or failure log failed.
    #[error("Output error: {0}")]
    OutputError(String),
}

impl AppError {
    /// Build a transport error whose retry eligibility follows its kind.
    pub fn fetch(kind: FetchFailureKind, message: impl Into<String>) -> Self {
        AppError::FetchError {
            kind,
            retriable: kind.is_retriable(),
            message: message.into(),
        }
    }

    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::FetchError { retriable, .. } => *retriable,
            _ => false,
        }
    }
}

impl From<csv::Error> for AppError {
    fn from(e: csv::Error) -> Self {
        AppError::OutputError(e.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::OutputError(e.to_string())
    }
}
