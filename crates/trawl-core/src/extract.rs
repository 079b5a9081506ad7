//! Applies a [`SelectorSchema`] to fetched pages.
//!
//! Listing fields are selected independently and correlated by position.
//! Lists of different lengths are never silently zipped: the page gets a
//! `FieldCountMismatch` warning and the [`MismatchPolicy`] decides what to
//! emit.

use std::fmt;
use std::str::FromStr;

use scraper::Html;
use url::Url;

use crate::error::AppError;
use crate::models::{ExtractionWarning, JobRecord};
use crate::schema::{
    DETAIL_FIELDS, ExtractionOutcome, FIELD_COMPANY_NAME, FIELD_DATE_POSTED, FIELD_DESCRIPTION,
    FIELD_DETAIL_URL, FIELD_JOB_TITLE, FIELD_LAST_PAGE, FIELD_LOCATION, FIELD_SALARY,
    LISTING_FIELDS, SelectorSchema, ValueSource,
};

/// What to do with a listing page whose field-lists disagree in length.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MismatchPolicy {
    /// Emit no records for the page.
    #[default]
    Discard,
    /// Emit one record per entry of the longest list. Only columns of full
    /// length are filled; a short column cannot be aligned to its entries,
    /// so it stays unset on every record of the page. Every record is flagged.
    Zip,
}

impl MismatchPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MismatchPolicy::Discard => "discard",
            MismatchPolicy::Zip => "zip",
        }
    }
}

impl fmt::Display for MismatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MismatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "discard" => Ok(MismatchPolicy::Discard),
            "zip" => Ok(MismatchPolicy::Zip),
            _ => Err(format!("Unknown mismatch policy: {}", s)),
        }
    }
}

/// Where a listing page came from.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionContext<'a> {
    pub page: u32,
    /// Base for resolving relative detail URLs.
    pub page_url: &'a str,
}

/// Records and page-level warnings from one listing page.
#[derive(Debug, Clone, Default)]
pub struct ListingExtraction {
    pub records: Vec<JobRecord>,
    pub warnings: Vec<ExtractionWarning>,
}

impl ListingExtraction {
    pub fn has_mismatch(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, ExtractionWarning::FieldCountMismatch { .. }))
    }
}

/// Fields read from one detail page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetailExtraction {
    pub description: Option<String>,
    pub salary: Option<String>,
    pub warnings: Vec<ExtractionWarning>,
}

struct Column {
    field: &'static str,
    values: Vec<String>,
    /// Optional field that matched nothing; left unset on every record.
    absent: bool,
}

/// Turns parsed pages into partial [`JobRecord`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordExtractor {
    policy: MismatchPolicy,
}

impl RecordExtractor {
    pub fn new(policy: MismatchPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> MismatchPolicy {
        self.policy
    }

    /// Read the declared last page number from the listing root.
    pub fn extract_last_page(&self, html: &str, schema: &SelectorSchema) -> Result<u32, AppError> {
        let document = Html::parse_document(html);
        let outcome = schema.resolve(FIELD_LAST_PAGE, &document);
        let raw = outcome.first().ok_or_else(|| {
            AppError::DiscoveryError(format!(
                "Selector for '{FIELD_LAST_PAGE}' matched nothing on the listing root"
            ))
        })?;
        parse_page_number(raw)
    }

    /// Extract every listing entry on one page, in document order.
    pub fn extract_listing(
        &self,
        html: &str,
        schema: &SelectorSchema,
        context: &ExtractionContext<'_>,
    ) -> ListingExtraction {
        let document = Html::parse_document(html);

        let mut columns: Vec<Column> = LISTING_FIELDS
            .iter()
            .chain(std::iter::once(&FIELD_DETAIL_URL))
            .map(|&field| {
                let values = schema.resolve(field, &document).into_values();
                let optional = schema.rule(field).is_some_and(|r| r.optional);
                Column {
                    field,
                    absent: optional && values.is_empty(),
                    values,
                }
            })
            .collect();

        if let Some(urls) = columns.iter_mut().find(|c| c.field == FIELD_DETAIL_URL) {
            urls.values = urls
                .values
                .iter()
                .map(|href| absolutize(context.page_url, href))
                .collect();
        }

        let lengths: Vec<usize> = columns
            .iter()
            .filter(|c| !c.absent)
            .map(|c| c.values.len())
            .collect();
        let longest = lengths.iter().copied().max().unwrap_or(0);
        if longest == 0 {
            return ListingExtraction::default();
        }

        let mut extraction = ListingExtraction::default();
        let aligned = lengths.iter().all(|&n| n == longest);
        let mismatch = (!aligned).then(|| ExtractionWarning::FieldCountMismatch {
            counts: columns
                .iter()
                .map(|c| (c.field.to_string(), c.values.len()))
                .collect(),
        });

        if let Some(warning) = &mismatch {
            tracing::warn!(page = context.page, policy = %self.policy, "{warning}");
            extraction.warnings.push(warning.clone());
            if self.policy == MismatchPolicy::Discard {
                return extraction;
            }
        }

        for i in 0..longest {
            let mut record = JobRecord::new(context.page);
            if let Some(warning) = &mismatch {
                record.warn(warning.clone());
            }
            for column in &columns {
                let value = (column.values.len() == longest)
                    .then(|| column.values.get(i))
                    .flatten()
                    .filter(|v| !v.is_empty())
                    .cloned();
                if value.is_none() {
                    record.warn(ExtractionWarning::NotFound {
                        field: column.field.to_string(),
                    });
                }
                set_listing_field(&mut record, column.field, value);
            }
            extraction.records.push(record);
        }

        extraction
    }

    /// Extract description and salary from a detail page.
    pub fn extract_detail(&self, html: &str, schema: &SelectorSchema) -> DetailExtraction {
        let document = Html::parse_document(html);
        let mut detail = DetailExtraction::default();

        for field in DETAIL_FIELDS {
            let outcome = schema.resolve(field, &document);
            let is_html = schema
                .rule(field)
                .is_some_and(|r| r.value == ValueSource::Html);

            let value = match outcome {
                ExtractionOutcome::Found(values) => values.into_iter().next().map(|raw| {
                    let text = if is_html { strip_tags(&raw) } else { raw };
                    normalize(&text, schema.artifacts()).trim().to_string()
                }),
                ExtractionOutcome::NotFound => None,
            }
            .filter(|v| !v.is_empty());

            if value.is_none() {
                detail.warnings.push(ExtractionWarning::NotFound {
                    field: field.to_string(),
                });
            }

            match field {
                FIELD_DESCRIPTION => detail.description = value,
                FIELD_SALARY => detail.salary = value,
                _ => {}
            }
        }

        detail
    }
}

fn set_listing_field(record: &mut JobRecord, field: &str, value: Option<String>) {
    match field {
        FIELD_DATE_POSTED => record.date_posted = value,
        FIELD_JOB_TITLE => record.job_title = value,
        FIELD_COMPANY_NAME => record.company_name = value,
        FIELD_LOCATION => record.location = value,
        FIELD_DETAIL_URL => record.detail_url = value,
        _ => {}
    }
}

fn absolutize(page_url: &str, href: &str) -> String {
    Url::parse(page_url)
        .and_then(|base| base.join(href))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// Parse a pager label such as `"1,570"` into a page number.
pub fn parse_page_number(raw: &str) -> Result<u32, AppError> {
    let digits: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',' && *c != '.')
        .collect();
    match digits.parse::<u32>() {
        Ok(0) | Err(_) => Err(AppError::DiscoveryError(format!(
            "Last page label '{raw}' is not a positive page number"
        ))),
        Ok(n) => Ok(n),
    }
}

/// Remove markup tags, keeping only the text between them.
pub fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

/// Delete every artifact substring, in order. All other characters are kept.
pub fn normalize(text: &str, artifacts: &[String]) -> String {
    artifacts
        .iter()
        .fold(text.to_string(), |acc, artifact| acc.replace(artifact.as_str(), ""))
}
