use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One row of the dataset.
///
/// Created by the extractor from a listing page; only the detail enricher
/// fills `description` and `salary` afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobRecord {
    pub date_posted: Option<String>,
    pub job_title: Option<String>,
    pub company_name: Option<String>,
    pub location: Option<String>,
    pub detail_url: Option<String>,
    pub description: Option<String>,
    pub salary: Option<String>,
    pub source_page: u32,
    pub extraction_warnings: Vec<String>,
}

impl JobRecord {
    pub fn new(source_page: u32) -> Self {
        Self {
            source_page,
            ..Default::default()
        }
    }

    pub fn warn(&mut self, warning: ExtractionWarning) {
        self.extraction_warnings.push(warning.to_string());
    }

    /// True when all five listing fields are present.
    pub fn is_listing_complete(&self) -> bool {
        self.date_posted.is_some()
            && self.job_title.is_some()
            && self.company_name.is_some()
            && self.location.is_some()
            && self.detail_url.is_some()
    }

    /// Column names in output order.
    pub const COLUMNS: [&'static str; 9] = [
        "date_posted",
        "job_title",
        "company_name",
        "location",
        "detail_url",
        "description",
        "salary",
        "source_page",
        "extraction_warnings",
    ];

    /// Flatten into a CSV row matching [`Self::COLUMNS`].
    pub fn to_row(&self) -> [String; 9] {
        let cell = |v: &Option<String>| v.clone().unwrap_or_default();
        [
            cell(&self.date_posted),
            cell(&self.job_title),
            cell(&self.company_name),
            cell(&self.location),
            cell(&self.detail_url),
            cell(&self.description),
            cell(&self.salary),
            self.source_page.to_string(),
            self.extraction_warnings.join("; "),
        ]
    }
}

/// Non-fatal, field-level extraction problem. Always recorded, never aborts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionWarning {
    /// A selector matched nothing (or only empty text).
    NotFound { field: String },
    /// Listing field-lists on one page had different lengths.
    FieldCountMismatch { counts: Vec<(String, usize)> },
    /// The record has no detail URL so it could not be enriched.
    MissingDetailUrl,
}

impl fmt::Display for ExtractionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionWarning::NotFound { field } => write!(f, "NotFound: {field}"),
            ExtractionWarning::FieldCountMismatch { counts } => {
                let parts: Vec<String> = counts.iter().map(|(k, n)| format!("{k}={n}")).collect();
                write!(f, "FieldCountMismatch: {}", parts.join(", "))
            }
            ExtractionWarning::MissingDetailUrl => write!(f, "MissingDetailUrl"),
        }
    }
}

/// Pipeline stage a failure was recorded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pagination,
    Extraction,
    Enrichment,
}

/// What went wrong, as recorded in the failure log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    PageFetchFailed,
    DetailFetchFailed,
    FieldCountMismatch,
    EmptyPage,
    Cancelled,
}

/// One entry in the [`FailureReport`].
#[derive(Debug, Clone, Serialize)]
pub struct FailureEntry {
    pub stage: Stage,
    /// Page number or URL.
    pub identifier: String,
    pub kind: FailureKind,
    pub message: String,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only account of every gap in a run. Never cleared mid-run.
#[derive(Debug, Clone, Default)]
pub struct FailureReport {
    entries: Vec<FailureEntry>,
}

impl FailureReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        stage: Stage,
        identifier: impl Into<String>,
        kind: FailureKind,
        message: impl Into<String>,
    ) {
        self.entries.push(FailureEntry {
            stage,
            identifier: identifier.into(),
            kind,
            message: message.into(),
            recorded_at: Utc::now(),
        });
    }

    pub fn entries(&self) -> &[FailureEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, kind: FailureKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }
}

/// Ordered records: page order, then document order within a page.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    records: Vec<JobRecord>,
}

impl Dataset {
    pub fn new(records: Vec<JobRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[JobRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Caller-side filtering. The pipeline itself never drops records.
    pub fn retain(&mut self, f: impl FnMut(&JobRecord) -> bool) {
        self.records.retain(f);
    }
}
