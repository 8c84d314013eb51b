//! One-row data profile of the loaded source restricted to the tracked jurisdictions.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::constants::{COL_DATE, COL_LOCATION, COL_NEW_CASES, COL_PEOPLE_VACCINATED};
use crate::error::{PipelineError, Result};
use crate::table::RecordSet;

pub const PROFILE_FILE: &str = "tabla_perfilado.csv";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileSummary {
    /// Column names in declared order
    pub columnas: String,
    /// `column: type` for each column, the type being the most common non-null cell type
    pub tipos: String,
    pub new_cases_min: Option<f64>,
    pub new_cases_max: Option<f64>,
    pub missing_new_cases_pct: f64,
    pub missing_people_vaccinated_pct: f64,
    pub fecha_min: Option<NaiveDate>,
    pub fecha_max: Option<NaiveDate>,
}

/// Profile the rows of `set` whose location is one of `jurisdictions`.
pub fn profile(set: &RecordSet, jurisdictions: &[String]) -> Result<ProfileSummary> {
    for col in [COL_LOCATION, COL_NEW_CASES, COL_PEOPLE_VACCINATED, COL_DATE] {
        set.column_index(col)?;
    }
    let tracked = set.filter(|row| {
        row.str(COL_LOCATION)
            .map_or(false, |l| jurisdictions.iter().any(|j| j == l))
    });
    info!("📊 Profiling {} rows for {:?}", tracked.len(), jurisdictions);

    let cases: Vec<f64> = tracked.column(COL_NEW_CASES)?.filter_map(|v| v.as_f64()).collect();
    let dates: Vec<NaiveDate> = tracked.column(COL_DATE)?.filter_map(|v| v.as_date()).collect();

    Ok(ProfileSummary {
        columnas: tracked.columns().join(", "),
        tipos: column_types(&tracked)?,
        new_cases_min: cases.iter().copied().reduce(f64::min),
        new_cases_max: cases.iter().copied().reduce(f64::max),
        missing_new_cases_pct: missing_pct(&tracked, COL_NEW_CASES)?,
        missing_people_vaccinated_pct: missing_pct(&tracked, COL_PEOPLE_VACCINATED)?,
        fecha_min: dates.iter().min().copied(),
        fecha_max: dates.iter().max().copied(),
    })
}

fn column_types(set: &RecordSet) -> Result<String> {
    let mut parts = Vec::with_capacity(set.columns().len());
    for col in set.columns() {
        let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
        for v in set.column(col)?.filter(|v| !v.is_null()) {
            *counts.entry(v.type_name()).or_default() += 1;
        }
        let dominant = counts
            .into_iter()
            .max_by_key(|(_, n)| *n)
            .map_or("null", |(t, _)| t);
        parts.push(format!("{col}: {dominant}"));
    }
    Ok(parts.join(", "))
}

/// Percentage of null cells; 0 for an empty set.
fn missing_pct(set: &RecordSet, column: &str) -> Result<f64> {
    if set.is_empty() {
        return Ok(0.0);
    }
    let missing = set.column(column)?.filter(|v| v.is_null()).count();
    Ok(missing as f64 / set.len() as f64 * 100.0)
}

/// Write the summary as a one-row CSV under `dir`.
pub fn write_profile(summary: &ProfileSummary, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| PipelineError::Write {
        cause: format!("cannot create '{}': {}", dir.display(), e),
    })?;
    let path = dir.join(PROFILE_FILE);
    let write = || -> std::result::Result<(), csv::Error> {
        let mut writer = csv::Writer::from_path(&path)?;
        writer.serialize(summary)?;
        writer.flush()?;
        Ok(())
    };
    write().map_err(|e| PipelineError::Write {
        cause: format!("cannot write '{}': {}", path.display(), e),
    })?;
    info!("💾 Profile written to {}", path.display());
    Ok(path)
}
