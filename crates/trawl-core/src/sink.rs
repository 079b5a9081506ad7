//! CSV output: the dataset and the failure log written next to it.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::AppError;
use crate::models::{Dataset, FailureReport, JobRecord};

/// Header of the failure log.
pub const FAILURE_COLUMNS: [&str; 5] = ["stage", "identifier", "kind", "message", "recorded_at"];

/// `jobs.csv` → `jobs.failures.csv`, in the same directory.
pub fn failure_log_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    output.with_file_name(format!("{stem}.failures.csv"))
}

/// Write records as CSV, header first, one row per record.
pub fn write_dataset_to<W: Write>(writer: W, dataset: &Dataset) -> Result<(), AppError> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(JobRecord::COLUMNS)?;
    for record in dataset.records() {
        csv.write_record(record.to_row())?;
    }
    csv.flush()?;
    Ok(())
}

/// Write one row per failure entry. The header is written even when empty.
pub fn write_failures_to<W: Write>(writer: W, report: &FailureReport) -> Result<(), AppError> {
    let mut csv = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    csv.write_record(FAILURE_COLUMNS)?;
    for entry in report.entries() {
        csv.serialize(entry)?;
    }
    csv.flush()?;
    Ok(())
}

pub fn write_dataset(path: &Path, dataset: &Dataset) -> Result<(), AppError> {
    let file = std::fs::File::create(path).map_err(|e| {
        AppError::OutputError(format!("Cannot create {}: {e}", path.display()))
    })?;
    write_dataset_to(file, dataset)?;
    tracing::info!(path = %path.display(), records = dataset.len(), "Wrote dataset");
    Ok(())
}

pub fn write_failure_log(path: &Path, report: &FailureReport) -> Result<(), AppError> {
    let file = std::fs::File::create(path).map_err(|e| {
        AppError::OutputError(format!("Cannot create {}: {e}", path.display()))
    })?;
    write_failures_to(file, report)?;
    tracing::info!(path = %path.display(), entries = report.len(), "Wrote failure log");
    Ok(())
}

/// Where a run's files ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenOutputs {
    pub dataset: PathBuf,
    pub failure_log: PathBuf,
}

/// Make sure the dataset and its failure log can be written before a run
/// starts: create the parent directory and open both files for appending.
/// Existing content is left alone.
pub fn prepare_output(output: &Path) -> Result<(), AppError> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            AppError::OutputError(format!("Cannot create {}: {e}", parent.display()))
        })?;
    }
    for path in [output.to_path_buf(), failure_log_path(output)] {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                AppError::OutputError(format!("Cannot write {}: {e}", path.display()))
            })?;
    }
    Ok(())
}

/// Write the dataset and the failure log next to `output`.
///
/// A file that cannot be written at its requested path goes to the system
/// temp directory instead, and the other file is attempted regardless. Errors
/// only when a file could be written nowhere.
pub fn write_outputs(
    output: &Path,
    dataset: &Dataset,
    report: &FailureReport,
) -> Result<WrittenOutputs, AppError> {
    let dataset_path = write_with_fallback(output, |p| write_dataset(p, dataset));
    let log_path = write_with_fallback(&failure_log_path(output), |p| {
        write_failure_log(p, report)
    });
    Ok(WrittenOutputs {
        dataset: dataset_path?,
        failure_log: log_path?,
    })
}

fn write_with_fallback(
    path: &Path,
    write: impl Fn(&Path) -> Result<(), AppError>,
) -> Result<PathBuf, AppError> {
    let Err(e) = write(path) else {
        return Ok(path.to_path_buf());
    };
    let fallback = fallback_path(path);
    tracing::warn!(
        path = %path.display(),
        fallback = %fallback.display(),
        error = %e,
        "Output not writable, using fallback"
    );
    write(&fallback).map_err(|fallback_err| {
        AppError::OutputError(format!("{e}; fallback {} also failed: {fallback_err}", fallback.display()))
    })?;
    Ok(fallback)
}

fn fallback_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output.csv".to_string());
    std::env::temp_dir().join(format!("trawl-{name}"))
}
