use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::app::ports::ReportRenderer;
use crate::error::{PipelineError, Result};
use crate::pipeline::processing::export::{ReportBook, Sheet};

/// Writes each sheet of a report book as `<sheet-slug>.csv` in the destination directory.
///
/// Dates are written `yyyy-mm-dd`, nulls as empty cells.
#[derive(Debug, Clone, Default)]
pub struct CsvReportRenderer;

impl CsvReportRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Lowercase ASCII alphanumerics, everything else collapsed to single underscores.
    pub fn slug(name: &str) -> String {
        let mut out = String::with_capacity(name.len());
        for ch in name.chars() {
            if ch.is_ascii_alphanumeric() {
                out.push(ch.to_ascii_lowercase());
            } else if !out.ends_with('_') && !out.is_empty() {
                out.push('_');
            }
        }
        out.trim_end_matches('_').to_string()
    }

    pub fn sheet_path(destination: &Path, sheet: &Sheet) -> PathBuf {
        destination.join(format!("{}.csv", Self::slug(&sheet.name)))
    }

    fn write_sheet(path: &Path, sheet: &Sheet) -> std::result::Result<(), csv::Error> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(sheet.table.columns())?;
        for row in sheet.table.rows() {
            writer.write_record(row.values().iter().map(|v| v.to_string()))?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl ReportRenderer for CsvReportRenderer {
    fn render(&self, book: &ReportBook, destination: &Path) -> Result<PathBuf> {
        fs::create_dir_all(destination).map_err(|e| PipelineError::Write {
            cause: format!("cannot create '{}': {}", destination.display(), e),
        })?;

        for sheet in &book.sheets {
            let path = Self::sheet_path(destination, sheet);
            Self::write_sheet(&path, sheet).map_err(|e| PipelineError::Write {
                cause: format!("cannot write '{}': {}", path.display(), e),
            })?;
            debug!("Wrote sheet '{}' ({} rows) to {}", sheet.name, sheet.table.len(), path.display());
        }
        Ok(destination.to_path_buf())
    }
}
