// Pipeline ingestion: turning the fetched snapshot into a typed record set

use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::constants::REQUIRED_SOURCE_COLUMNS;
use crate::error::{PipelineError, Result};
use crate::table::{RecordSet, Value};

/// Hex SHA-256 of the fetched text, recorded with every run.
pub fn snapshot_digest(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Parse delimited text into raw case records.
///
/// Only the required columns are kept. A missing required column is a
/// [`PipelineError::Schema`]; unparseable dates and numbers become nulls.
pub fn load(text: &str) -> Result<RecordSet> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader.headers()?.clone();
    let positions = REQUIRED_SOURCE_COLUMNS
        .iter()
        .map(|col| {
            headers
                .iter()
                .position(|h| h.trim() == *col)
                .ok_or_else(|| PipelineError::missing_column(col))
        })
        .collect::<Result<Vec<_>>>()?;
    debug!("Source header has {} columns", headers.len());

    let mut set = RecordSet::new(REQUIRED_SOURCE_COLUMNS);
    for record in reader.records() {
        let record = record?;
        let field = |i: usize| record.get(positions[i]).unwrap_or("");
        set.push_row(vec![
            Value::Str(title_case(field(0).trim())),
            parse_date(field(1)),
            parse_number(field(2)),
            parse_number(field(3)),
            parse_number(field(4)),
        ])?;
    }

    info!("✅ Loaded {} raw case records", set.len());
    Ok(set)
}

/// Capitalize the first letter of every alphabetic run and lowercase the rest.
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_alpha = false;
    for ch in s.chars() {
        if ch.is_alphabetic() {
            if prev_alpha {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(ch);
            prev_alpha = false;
        }
    }
    out
}

pub fn parse_date(raw: &str) -> Value {
    let raw = raw.trim();
    // Tolerate timestamps by looking at the calendar part only
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(day, "%Y/%m/%d"))
        .map(Value::Date)
        .unwrap_or(Value::Null)
}

pub fn parse_number(raw: &str) -> Value {
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Value::Float(v),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{COL_DATE, COL_LOCATION, COL_NEW_CASES, COL_PEOPLE_VACCINATED};

    #[test]
    fn test_load_trims_and_title_cases_locations() {
        let text = "iso_code,location,date,new_cases,people_vaccinated,population\n\
                    ECU,  ecuador ,2021-05-01,10,,17000000\n\
                    PER,PERU,not-a-date,5.5,100,33000000\n";
        let set = load(text).unwrap();
        assert_eq!(set.columns().len(), 5);
        assert_eq!(set.len(), 2);

        let first = set.row(0).unwrap();
        assert_eq!(first.str(COL_LOCATION), Some("Ecuador"));
        assert_eq!(first.date(COL_DATE), NaiveDate::from_ymd_opt(2021, 5, 1));
        assert!(first.get(COL_PEOPLE_VACCINATED).unwrap().is_null());

        let second = set.row(1).unwrap();
        assert_eq!(second.str(COL_LOCATION), Some("Peru"));
        assert!(second.get(COL_DATE).unwrap().is_null());
        assert_eq!(second.f64(COL_NEW_CASES), Some(5.5));
    }

    #[test]
    fn test_missing_population_is_schema_error() {
        let text = "location,date,new_cases,people_vaccinated\nPeru,2021-05-01,1,1\n";
        let err = load(text).unwrap_err();
        assert!(matches!(err, PipelineError::Schema(ref m) if m.contains("population")));
    }

    #[test]
    fn test_title_case_multiword() {
        assert_eq!(title_case("united STATES"), "United States");
        assert_eq!(title_case("côte d'ivoire"), "Côte D'Ivoire");
    }

    #[test]
    fn test_snapshot_digest_is_stable() {
        assert_eq!(snapshot_digest("abc"), snapshot_digest("abc"));
        assert_ne!(snapshot_digest("abc"), snapshot_digest("abd"));
        assert_eq!(snapshot_digest("").len(), 64);
    }
}
