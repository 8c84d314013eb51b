use tracing::{debug, info};

use crate::constants::{
    COL_DATE, COL_LOCATION, COL_NEW_CASES, COL_PEOPLE_VACCINATED, COL_POPULATION,
};
use crate::table::{RecordSet, Value};

/// Fixed column set of every normalized record set, in order
pub const NORMALIZED_COLUMNS: [&str; 5] = [
    COL_LOCATION,
    COL_DATE,
    COL_NEW_CASES,
    COL_PEOPLE_VACCINATED,
    COL_POPULATION,
];

/// Trait for cleaning raw case records into the canonical normalized shape
pub trait Normalizer {
    /// Never fails; an empty result is valid output.
    fn normalize(&self, raw: &RecordSet) -> RecordSet;
}

/// Restricts records to the jurisdictions of interest and makes
/// `(location, date)` unique.
#[derive(Debug, Clone)]
pub struct JurisdictionNormalizer {
    pub jurisdictions: Vec<String>,
}

impl JurisdictionNormalizer {
    pub fn new(jurisdictions: Vec<String>) -> Self {
        Self { jurisdictions }
    }

    fn tracked(&self, location: Option<&str>) -> bool {
        location.map_or(false, |l| self.jurisdictions.iter().any(|j| j == l))
    }
}

impl Normalizer for JurisdictionNormalizer {
    fn normalize(&self, raw: &RecordSet) -> RecordSet {
        // (a) jurisdictions, (b) required measurements
        let kept = raw.filter(|row| {
            self.tracked(row.str(COL_LOCATION))
                && row.get(COL_NEW_CASES).map_or(false, |v| !v.is_null())
                && row.get(COL_PEOPLE_VACCINATED).map_or(false, |v| !v.is_null())
        });

        // (d) projection; absent columns read as null
        let mut projected = RecordSet::new(NORMALIZED_COLUMNS);
        for row in kept.rows() {
            let cells = NORMALIZED_COLUMNS
                .iter()
                .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
                .collect();
            // widths match by construction
            let _ = projected.push_row(cells);
        }

        // (c) last occurrence of a repeated key wins, positions are source positions
        let normalized = projected
            .dedup_keep_last(&[COL_LOCATION, COL_DATE])
            .unwrap_or_else(|_| projected.empty_like());

        debug!(
            "Normalize: {} raw -> {} tracked -> {} unique",
            raw.len(),
            kept.len(),
            normalized.len()
        );
        info!("✅ Normalized {} records for {:?}", normalized.len(), self.jurisdictions);
        normalized
    }
}
