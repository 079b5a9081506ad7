//! Selector schemas: the only place that knows about the target site's markup.
//!
//! A schema maps logical field names (`job_title`, `detail_url`, ...) to CSS
//! selectors plus a cardinality and an optional flag. Schemas are JSON files
//! compiled once at load time; an empty selector, an unknown cardinality or
//! invalid CSS fails here with [`AppError::SchemaError`], never during
//! extraction.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;

use crate::error::AppError;

pub const FIELD_LAST_PAGE: &str = "last_page";
pub const FIELD_DATE_POSTED: &str = "date_posted";
pub const FIELD_JOB_TITLE: &str = "job_title";
pub const FIELD_COMPANY_NAME: &str = "company_name";
pub const FIELD_LOCATION: &str = "location";
pub const FIELD_DETAIL_URL: &str = "detail_url";
pub const FIELD_DESCRIPTION: &str = "description";
pub const FIELD_SALARY: &str = "salary";

/// Listing fields selected independently and correlated by index.
pub const LISTING_FIELDS: [&str; 4] = [
    FIELD_DATE_POSTED,
    FIELD_JOB_TITLE,
    FIELD_COMPANY_NAME,
    FIELD_LOCATION,
];

/// Fields read from a job's detail page.
pub const DETAIL_FIELDS: [&str; 2] = [FIELD_DESCRIPTION, FIELD_SALARY];

const REQUIRED_FIELDS: [&str; 8] = [
    FIELD_LAST_PAGE,
    FIELD_DATE_POSTED,
    FIELD_JOB_TITLE,
    FIELD_COMPANY_NAME,
    FIELD_LOCATION,
    FIELD_DETAIL_URL,
    FIELD_DESCRIPTION,
    FIELD_SALARY,
];

/// Placeholder substituted with 1, 2, 3... when probing sequential candidates.
pub const INDEX_PLACEHOLDER: &str = "{index}";

/// Probe cap used when a probing rule does not declare its own.
pub const DEFAULT_PROBE_LIMIT: usize = 30;

/// Artifacts stripped from detail text when a schema declares none.
pub const DEFAULT_ARTIFACTS: [&str; 4] = ["&amp", "&nbsp;", "\u{a0}", "\u{feff}"];

const BUILTIN_PINOYJOBS: &str = include_str!("../schemas/pinoyjobs/1.0.0.json");

/// How many matches a selector is expected to yield.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// Exactly one match. Zero or several matches resolve to `NotFound`.
    Single,
    /// The first of any number of matches.
    FirstOfList,
    /// Every match, in document order.
    List,
}

impl Cardinality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cardinality::Single => "single",
            Cardinality::FirstOfList => "first-of-list",
            Cardinality::List => "list",
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Cardinality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single" => Ok(Cardinality::Single),
            "first-of-list" => Ok(Cardinality::FirstOfList),
            "list" => Ok(Cardinality::List),
            _ => Err(format!("Unknown cardinality: {}", s)),
        }
    }
}

/// What to read from a matched element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueSource {
    /// Text content with whitespace collapsed.
    #[default]
    Text,
    /// Inner HTML, left for the caller to strip.
    Html,
    /// The named attribute, e.g. `href`.
    Attr(String),
}

/// Result of resolving one field against a parsed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    /// One or more values. Never empty.
    Found(Vec<String>),
    NotFound,
}

impl ExtractionOutcome {
    fn from_values(values: Vec<String>) -> Self {
        if values.is_empty() {
            ExtractionOutcome::NotFound
        } else {
            ExtractionOutcome::Found(values)
        }
    }

    /// First value, if any.
    pub fn first(&self) -> Option<&str> {
        match self {
            ExtractionOutcome::Found(values) => values.first().map(String::as_str),
            ExtractionOutcome::NotFound => None,
        }
    }

    pub fn into_values(self) -> Vec<String> {
        match self {
            ExtractionOutcome::Found(values) => values,
            ExtractionOutcome::NotFound => Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    Css(Selector),
    /// One compiled selector per candidate index, tried in order until a miss.
    Probe(Vec<Selector>),
}

/// A compiled extraction rule for one field.
#[derive(Debug, Clone)]
pub struct FieldRule {
    pub field: String,
    pub selector: String,
    pub cardinality: Cardinality,
    pub optional: bool,
    pub value: ValueSource,
    matcher: Matcher,
}

impl FieldRule {
    fn compile(field: &str, raw: RawRule) -> Result<Self, AppError> {
        let selector = raw.selector.trim().to_string();
        if selector.is_empty() {
            return Err(AppError::SchemaError(format!(
                "Field '{field}' has an empty selector"
            )));
        }

        let cardinality: Cardinality = raw
            .cardinality
            .parse()
            .map_err(|e| AppError::SchemaError(format!("Field '{field}': {e}")))?;

        let matcher = if selector.contains(INDEX_PLACEHOLDER) {
            if cardinality != Cardinality::List {
                return Err(AppError::SchemaError(format!(
                    "Field '{field}' probes by {INDEX_PLACEHOLDER} and must use cardinality 'list'"
                )));
            }
            let limit = raw.probe_limit.unwrap_or(DEFAULT_PROBE_LIMIT);
            if limit == 0 {
                return Err(AppError::SchemaError(format!(
                    "Field '{field}' has probe_limit 0"
                )));
            }
            let selectors = (1..=limit)
                .map(|i| parse_selector(field, &selector.replace(INDEX_PLACEHOLDER, &i.to_string())))
                .collect::<Result<Vec<_>, _>>()?;
            Matcher::Probe(selectors)
        } else {
            if raw.probe_limit.is_some() {
                return Err(AppError::SchemaError(format!(
                    "Field '{field}' declares probe_limit without an {INDEX_PLACEHOLDER} placeholder"
                )));
            }
            Matcher::Css(parse_selector(field, &selector)?)
        };

        Ok(Self {
            field: field.to_string(),
            selector,
            cardinality,
            optional: raw.optional,
            value: raw.value,
            matcher,
        })
    }

    /// Maximum number of candidates a probing rule will try.
    pub fn probe_limit(&self) -> Option<usize> {
        match &self.matcher {
            Matcher::Probe(selectors) => Some(selectors.len()),
            Matcher::Css(_) => None,
        }
    }

    fn resolve(&self, document: &Html) -> ExtractionOutcome {
        match &self.matcher {
            Matcher::Css(selector) => {
                let mut matches = document.select(selector);
                match self.cardinality {
                    Cardinality::Single => {
                        let first = matches.next();
                        if matches.next().is_some() {
                            tracing::debug!(field = %self.field, "Single-valued selector is ambiguous");
                            return ExtractionOutcome::NotFound;
                        }
                        ExtractionOutcome::from_values(
                            first.map(|el| self.read(el)).into_iter().collect(),
                        )
                    }
                    Cardinality::FirstOfList => ExtractionOutcome::from_values(
                        matches.next().map(|el| self.read(el)).into_iter().collect(),
                    ),
                    Cardinality::List => {
                        ExtractionOutcome::from_values(matches.map(|el| self.read(el)).collect())
                    }
                }
            }
            Matcher::Probe(selectors) => {
                let mut values = Vec::new();
                for selector in selectors {
                    // A candidate without a usable value ends the scan.
                    let Some(value) = document
                        .select(selector)
                        .next()
                        .map(|el| self.read(el))
                        .filter(|v| !v.is_empty())
                    else {
                        break;
                    };
                    values.push(value);
                }
                ExtractionOutcome::from_values(values)
            }
        }
    }

    fn read(&self, element: ElementRef<'_>) -> String {
        match &self.value {
            ValueSource::Text => collapse_whitespace(&element.text().collect::<String>()),
            ValueSource::Html => element.inner_html(),
            ValueSource::Attr(name) => element
                .value()
                .attr(name)
                .map(|v| v.trim().to_string())
                .unwrap_or_default(),
        }
    }
}

fn parse_selector(field: &str, css: &str) -> Result<Selector, AppError> {
    Selector::parse(css).map_err(|e| {
        AppError::SchemaError(format!("Field '{field}' has invalid selector '{css}': {e}"))
    })
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Deserialize)]
struct RawRule {
    selector: String,
    cardinality: String,
    #[serde(default)]
    optional: bool,
    #[serde(default)]
    value: ValueSource,
    #[serde(default)]
    probe_limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawSchema {
    name: String,
    version: String,
    fields: BTreeMap<String, RawRule>,
    #[serde(default)]
    normalize: Option<Vec<String>>,
}

/// Versioned, immutable mapping from field name to compiled extraction rule.
#[derive(Debug, Clone)]
pub struct SelectorSchema {
    name: String,
    version: String,
    rules: HashMap<String, FieldRule>,
    artifacts: Vec<String>,
}

impl SelectorSchema {
    /// Parse and compile a schema from JSON text.
    pub fn from_json(json: &str) -> Result<Self, AppError> {
        let raw: RawSchema = serde_json::from_str(json)
            .map_err(|e| AppError::SchemaError(format!("Invalid schema JSON: {e}")))?;

        if raw.name.trim().is_empty() || raw.version.trim().is_empty() {
            return Err(AppError::SchemaError(
                "Schema must declare a non-empty name and version".into(),
            ));
        }

        for field in REQUIRED_FIELDS {
            if !raw.fields.contains_key(field) {
                return Err(AppError::SchemaError(format!(
                    "Schema {}@{} is missing field '{field}'",
                    raw.name, raw.version
                )));
            }
        }

        let mut rules = HashMap::with_capacity(raw.fields.len());
        for (field, rule) in raw.fields {
            let compiled = FieldRule::compile(&field, rule)?;
            rules.insert(field, compiled);
        }

        if rules[FIELD_DETAIL_URL].cardinality != Cardinality::List {
            return Err(AppError::SchemaError(format!(
                "Field '{FIELD_DETAIL_URL}' must use cardinality 'list'"
            )));
        }

        let artifacts = raw
            .normalize
            .unwrap_or_else(|| DEFAULT_ARTIFACTS.iter().map(|s| s.to_string()).collect());
        if artifacts.iter().any(String::is_empty) {
            return Err(AppError::SchemaError(
                "Normalization artifacts must be non-empty strings".into(),
            ));
        }

        Ok(Self {
            name: raw.name,
            version: raw.version,
            rules,
            artifacts,
        })
    }

    /// The embedded schema for pinoyjobs.ph listings.
    pub fn pinoyjobs() -> Result<Self, AppError> {
        Self::from_json(BUILTIN_PINOYJOBS)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// `name@version`.
    pub fn id(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }

    pub fn rule(&self, field: &str) -> Option<&FieldRule> {
        self.rules.get(field)
    }

    /// Substrings removed from detail-page text after tag stripping.
    pub fn artifacts(&self) -> &[String] {
        &self.artifacts
    }

    /// Resolve one field against a parsed document. Pure: no I/O, no state.
    pub fn resolve(&self, field: &str, document: &Html) -> ExtractionOutcome {
        match self.rules.get(field) {
            Some(rule) => rule.resolve(document),
            None => {
                tracing::debug!(%field, schema = %self.id(), "Unknown field requested");
                ExtractionOutcome::NotFound
            }
        }
    }
}

/// A fully resolved schema: where it came from, its canonical name, and the
/// compiled rules.
#[derive(Debug, Clone)]
pub struct ResolvedSchema {
    /// `None` for the embedded schema.
    pub path: Option<PathBuf>,
    pub name: String,
    pub schema: SelectorSchema,
}

/// Resolves schema references (file paths or `name@version` strings) to
/// compiled selector schemas.
pub struct SchemaResolver {
    schemas_dir: PathBuf,
}

impl SchemaResolver {
    pub fn new(schemas_dir: impl Into<PathBuf>) -> Self {
        Self {
            schemas_dir: schemas_dir.into(),
        }
    }

    /// Resolve a schema reference to a compiled [`ResolvedSchema`].
    ///
    /// Accepts:
    /// - A direct file path (e.g. `schemas/pinoyjobs/1.0.0.json`)
    /// - `name@version` (e.g. `pinoyjobs@1.0.0`)
    /// - `name@latest` (resolved via `registry.json`)
    ///
    /// `pinoyjobs`, `pinoyjobs@latest` and `pinoyjobs@1.0.0` fall back to the
    /// embedded schema when nothing is found on disk.
    pub fn resolve(&self, schema_ref: &str) -> Result<ResolvedSchema, AppError> {
        let (path, name) = match self.resolve_path(schema_ref) {
            Ok(found) => found,
            Err(e) => return Self::builtin(schema_ref).ok_or(e)?,
        };

        let json = std::fs::read_to_string(&path).map_err(|e| {
            AppError::SchemaError(format!(
                "Failed to read schema file {}: {e}",
                path.display()
            ))
        })?;
        let schema = SelectorSchema::from_json(&json)?;

        Ok(ResolvedSchema {
            path: Some(path),
            name,
            schema,
        })
    }

    fn builtin(schema_ref: &str) -> Option<Result<ResolvedSchema, AppError>> {
        match schema_ref {
            "pinoyjobs" | "pinoyjobs@latest" | "pinoyjobs@1.0.0" => {
                Some(SelectorSchema::pinoyjobs().map(|schema| ResolvedSchema {
                    path: None,
                    name: schema.id(),
                    schema,
                }))
            }
            _ => None,
        }
    }

    /// Resolve a schema reference to a `(path, name)` pair without reading the file.
    fn resolve_path(&self, schema_ref: &str) -> Result<(PathBuf, String), AppError> {
        let path_candidate = PathBuf::from(schema_ref);
        if path_candidate.is_file() {
            let name = self
                .structured_name(&path_candidate)
                .unwrap_or_else(|| derive_schema_name(&path_candidate));
            return Ok((path_candidate, name));
        }

        let (name, version) = schema_ref
            .split_once('@')
            .ok_or_else(|| AppError::SchemaError(format!("Schema not found: {schema_ref}")))?;
        if name.is_empty() || version.is_empty() {
            return Err(AppError::SchemaError(format!(
                "Schema must be in the form name@version, got: {schema_ref}"
            )));
        }

        let resolved_version = if version == "latest" {
            let registry = self.load_registry()?;
            registry.get(name).cloned().ok_or_else(|| {
                AppError::SchemaError(format!("No latest version for schema {name}"))
            })?
        } else {
            version.to_string()
        };

        let schema_path = self
            .schemas_dir
            .join(name)
            .join(format!("{resolved_version}.json"));
        if !schema_path.exists() {
            return Err(AppError::SchemaError(format!(
                "Schema file not found: {}",
                schema_path.display()
            )));
        }

        Ok((schema_path, format!("{name}@{resolved_version}")))
    }

    /// Try to extract a `name@version` identifier by stripping `schemas_dir`
    /// and expecting `{name}/{version}.json` underneath.
    fn structured_name(&self, path: &Path) -> Option<String> {
        let abs_path = path.canonicalize().ok()?;
        let abs_dir = self.schemas_dir.canonicalize().ok()?;
        let relative = abs_path.strip_prefix(&abs_dir).ok()?;
        let mut components = relative.components();
        let name = components.next()?.as_os_str().to_str()?;
        let file = components.next()?.as_os_str().to_str()?;
        if components.next().is_some() {
            return None;
        }
        let version = Path::new(file).file_stem()?.to_str()?;
        Some(format!("{name}@{version}"))
    }

    fn load_registry(&self) -> Result<HashMap<String, String>, AppError> {
        let registry_path = self.schemas_dir.join("registry.json");
        let registry_str = std::fs::read_to_string(&registry_path).map_err(|e| {
            AppError::SchemaError(format!(
                "Failed to read schema registry {}: {e}",
                registry_path.display()
            ))
        })?;
        serde_json::from_str(&registry_str)
            .map_err(|e| AppError::SchemaError(format!("Invalid JSON in schema registry: {e}")))
    }
}

/// Derive a schema name from a file path.
///
/// Example: `"schemas/jobs.json"` → `"jobs"`
pub fn derive_schema_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("default")
        .to_string()
}
