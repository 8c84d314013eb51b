use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::info;

use crate::constants::{
    COL_DATE, COL_GROWTH_7D, COL_INCIDENCE_7D, COL_LOCATION, COL_WEEKLY_CASES, SHEET_GROWTH,
    SHEET_INCIDENCE, WEEKLY_CASES_SUFFIX,
};
use crate::error::Result;
use crate::table::{RecordSet, Value};

/// One named table of the report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sheet {
    pub name: String,
    pub table: RecordSet,
}

/// The export artifact handed to a renderer. Sheets keep insertion order.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ReportBook {
    pub sheets: Vec<Sheet>,
}

impl ReportBook {
    pub fn push(&mut self, name: impl Into<String>, table: RecordSet) {
        self.sheets.push(Sheet {
            name: name.into(),
            table,
        });
    }

    pub fn sheet(&self, name: &str) -> Option<&RecordSet> {
        self.sheets.iter().find(|s| s.name == name).map(|s| &s.table)
    }
}

/// Pivots the metric series into per-jurisdiction columns.
#[derive(Debug, Clone)]
pub struct ReportExporter {
    /// Column priority; earlier jurisdictions come first
    priority: Vec<String>,
}

impl ReportExporter {
    pub fn new(priority: Vec<String>) -> Self {
        Self { priority }
    }

    pub fn export(&self, incidence: &RecordSet, growth: &RecordSet) -> Result<ReportBook> {
        let incidence_sheet = pivot_first(incidence, COL_INCIDENCE_7D, "")?;

        let factor = pivot_first(growth, COL_GROWTH_7D, "")?;
        let weekly = pivot_first(growth, COL_WEEKLY_CASES, WEEKLY_CASES_SUFFIX)?;
        let growth_sheet = left_join_on_date(&factor, &weekly)?;

        let mut book = ReportBook::default();
        book.push(SHEET_INCIDENCE, self.reorder_columns(&incidence_sheet)?);
        book.push(SHEET_GROWTH, self.reorder_columns(&growth_sheet)?);

        info!(
            "✅ Exported report: {} incidence dates, {} growth dates",
            incidence_sheet.len(),
            growth_sheet.len()
        );
        Ok(book)
    }

    /// `date`, then columns naming each jurisdiction in priority order, then the rest.
    pub fn reorder_columns(&self, set: &RecordSet) -> Result<RecordSet> {
        let mut order: Vec<&str> = Vec::with_capacity(set.columns().len());
        if set.has_column(COL_DATE) {
            order.push(COL_DATE);
        }
        for jurisdiction in &self.priority {
            for col in set.columns() {
                if col.contains(jurisdiction.as_str()) && !order.contains(&col.as_str()) {
                    order.push(col.as_str());
                }
            }
        }
        for col in set.columns() {
            if !order.contains(&col.as_str()) {
                order.push(col.as_str());
            }
        }
        set.select(&order)
    }
}

/// Pivot `values` into one column per location, indexed by ascending date.
///
/// Each cell takes the first non-null value seen for its (date, location).
/// Rows without a date or value are skipped; locations become columns in
/// lexical order, each suffixed with `suffix`.
pub fn pivot_first(set: &RecordSet, values: &str, suffix: &str) -> Result<RecordSet> {
    let date_idx = set.column_index(COL_DATE)?;
    let loc_idx = set.column_index(COL_LOCATION)?;
    let val_idx = set.column_index(values)?;

    let mut locations: BTreeSet<String> = BTreeSet::new();
    let mut cells: BTreeMap<NaiveDate, HashMap<String, f64>> = BTreeMap::new();
    for row in set.rows() {
        let v = row.values();
        let (Some(date), Some(loc), Some(value)) =
            (v[date_idx].as_date(), v[loc_idx].as_str(), v[val_idx].as_f64())
        else {
            continue;
        };
        locations.insert(loc.to_string());
        cells
            .entry(date)
            .or_default()
            .entry(loc.to_string())
            .or_insert(value);
    }

    let mut columns = vec![COL_DATE.to_string()];
    columns.extend(locations.iter().map(|l| format!("{l}{suffix}")));
    let mut out = RecordSet::new(columns);
    for (date, by_loc) in cells {
        let mut row = vec![Value::Date(date)];
        row.extend(locations.iter().map(|l| Value::from_f64(by_loc.get(l).copied())));
        out.push_row(row)?;
    }
    Ok(out)
}

/// Keep every row of `left`, appending the non-date columns of `right` where the
/// date matches, nulls otherwise.
pub fn left_join_on_date(left: &RecordSet, right: &RecordSet) -> Result<RecordSet> {
    let right_date = right.column_index(COL_DATE)?;
    let left_date = left.column_index(COL_DATE)?;
    let extra: Vec<usize> = (0..right.columns().len()).filter(|&i| i != right_date).collect();

    let mut index: HashMap<NaiveDate, usize> = HashMap::new();
    for (pos, row) in right.rows().enumerate() {
        if let Some(date) = row.values()[right_date].as_date() {
            index.entry(date).or_insert(pos);
        }
    }

    let mut columns: Vec<String> = left.columns().to_vec();
    columns.extend(extra.iter().map(|&i| right.columns()[i].clone()));
    let mut out = RecordSet::new(columns);
    for row in left.rows() {
        let mut cells = row.values().to_vec();
        let matched = row.values()[left_date]
            .as_date()
            .and_then(|d| index.get(&d))
            .and_then(|&pos| right.row(pos));
        match matched {
            Some(r) => cells.extend(extra.iter().map(|&i| r.values()[i].clone())),
            None => cells.extend(extra.iter().map(|_| Value::Null)),
        }
        out.push_row(cells)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::processing::rolling::{GROWTH_COLUMNS, INCIDENCE_COLUMNS};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 5, day).unwrap()
    }

    fn exporter() -> ReportExporter {
        ReportExporter::new(vec!["Ecuador".to_string(), "Peru".to_string()])
    }

    fn incidence() -> RecordSet {
        RecordSet::from_rows(
            INCIDENCE_COLUMNS,
            vec![
                vec![Value::Date(d(8)), Value::Str("Peru".into()), Value::Float(3.0)],
                vec![Value::Date(d(7)), Value::Str("Peru".into()), Value::Float(2.0)],
                vec![Value::Date(d(7)), Value::Str("Ecuador".into()), Value::Float(1.0)],
                vec![Value::Date(d(7)), Value::Str("Ecuador".into()), Value::Float(9.0)],
            ],
        )
        .unwrap()
    }

    fn growth() -> RecordSet {
        RecordSet::from_rows(
            GROWTH_COLUMNS,
            vec![
                vec![Value::Date(d(14)), Value::Str("Peru".into()), Value::Float(70.0), Value::Float(1.5)],
                vec![Value::Date(d(14)), Value::Str("Ecuador".into()), Value::Float(50.0), Value::Float(0.0)],
                vec![Value::Date(d(15)), Value::Str("Ecuador".into()), Value::Float(60.0), Value::Float(1.2)],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_incidence_pivot_takes_first_and_sorts_dates() {
        let pivot = pivot_first(&incidence(), COL_INCIDENCE_7D, "").unwrap();
        assert_eq!(pivot.columns(), &["date", "Ecuador", "Peru"].map(String::from));
        assert_eq!(pivot.len(), 2);
        let first = pivot.row(0).unwrap();
        assert_eq!(first.date(COL_DATE), Some(d(7)));
        assert_eq!(first.f64("Ecuador"), Some(1.0));
        assert_eq!(first.f64("Peru"), Some(2.0));
        let second = pivot.row(1).unwrap();
        assert!(second.get("Ecuador").unwrap().is_null());
    }

    #[test]
    fn test_growth_sheet_merges_weekly_cases() {
        let book = exporter().export(&incidence(), &growth()).unwrap();
        let sheet = book.sheet(SHEET_GROWTH).unwrap();
        assert_eq!(
            sheet.columns(),
            &["date", "Ecuador", "Ecuador_casos", "Peru", "Peru_casos"].map(String::from)
        );
        let first = sheet.row(0).unwrap();
        assert_eq!(first.f64("Ecuador"), Some(0.0));
        assert_eq!(first.f64("Peru_casos"), Some(70.0));
        let second = sheet.row(1).unwrap();
        assert!(second.get("Peru").unwrap().is_null());
        assert_eq!(second.f64("Ecuador_casos"), Some(60.0));
    }

    #[test]
    fn test_priority_controls_column_order() {
        let peru_first = ReportExporter::new(vec!["Peru".to_string(), "Ecuador".to_string()]);
        let book = peru_first.export(&incidence(), &growth()).unwrap();
        assert_eq!(
            book.sheet(SHEET_INCIDENCE).unwrap().columns(),
            &["date", "Peru", "Ecuador"].map(String::from)
        );
    }

    #[test]
    fn test_unknown_columns_go_last() {
        let set = RecordSet::new(["Chile", "Peru", "date", "Ecuador"]);
        let ordered = exporter().reorder_columns(&set).unwrap();
        assert_eq!(ordered.columns(), &["date", "Ecuador", "Peru", "Chile"].map(String::from));
    }

    #[test]
    fn test_sheet_order_and_date_first() {
        let book = exporter().export(&incidence(), &growth()).unwrap();
        let names: Vec<_> = book.sheets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec![SHEET_INCIDENCE, SHEET_GROWTH]);
        for sheet in &book.sheets {
            assert_eq!(sheet.table.columns()[0], COL_DATE);
        }
    }
}
