//! Per-jurisdiction rolling indicators: 7-day incidence and weekly growth factor.
//!
//! Each jurisdiction is an independent ordered series (dates ascending, ties in
//! source order). Nothing computed for one group can affect another.

use tracing::{debug, info};

use crate::config::MetricsConfig;
use crate::constants::{
    COL_DATE, COL_GROWTH_7D, COL_INCIDENCE_7D, COL_LOCATION, COL_NEW_CASES, COL_POPULATION,
    COL_WEEKLY_CASES,
};
use crate::error::Result;
use crate::table::{RecordSet, Value};

pub mod window;

use window::{trailing_means, trailing_sums};

pub const INCIDENCE_COLUMNS: [&str; 3] = [COL_DATE, COL_LOCATION, COL_INCIDENCE_7D];
pub const GROWTH_COLUMNS: [&str; 4] = [COL_DATE, COL_LOCATION, COL_WEEKLY_CASES, COL_GROWTH_7D];

const PER_100K: f64 = 100_000.0;

#[derive(Debug, Clone)]
pub struct RollingMetrics {
    window: usize,
    growth_range: (f64, f64),
}

impl RollingMetrics {
    pub fn new(window: usize, growth_range: (f64, f64)) -> Self {
        Self { window, growth_range }
    }

    pub fn from_config(config: &MetricsConfig) -> Self {
        Self::new(config.window, config.growth_range)
    }

    /// Trailing mean of daily cases per 100k, one row per (location, date) with a
    /// full window.
    pub fn incidence(&self, normalized: &RecordSet) -> Result<RecordSet> {
        let mut out = RecordSet::new(INCIDENCE_COLUMNS);
        for (location, group) in ordered_groups(normalized)? {
            let daily: Vec<Option<f64>> = group
                .rows()
                .map(|r| match (r.f64(COL_NEW_CASES), r.f64(COL_POPULATION)) {
                    (Some(cases), Some(pop)) => Some(cases / pop * PER_100K).filter(|v| v.is_finite()),
                    _ => None,
                })
                .collect();
            let means = trailing_means(&daily, self.window);

            let before = out.len();
            for (row, mean) in group.rows().zip(means) {
                if let (Some(date), Some(mean)) = (row.date(COL_DATE), mean) {
                    out.push_row(vec![
                        Value::Date(date),
                        location.clone(),
                        Value::Float(mean),
                    ])?;
                }
            }
            debug!("Incidence: {} -> {} rows", location, out.len() - before);
        }
        info!("✅ Computed {} incidence rows", out.len());
        Ok(out)
    }

    /// Weekly case total over the trailing window divided by the total of the
    /// window before it.
    ///
    /// A row needs both windows complete. An infinite or 0/0 ratio counts as 0,
    /// then rows outside the plausible range are dropped.
    pub fn growth(&self, normalized: &RecordSet) -> Result<RecordSet> {
        let (lo, hi) = self.growth_range;
        let mut out = RecordSet::new(GROWTH_COLUMNS);
        for (location, group) in ordered_groups(normalized)? {
            let cases: Vec<Option<f64>> = group.rows().map(|r| r.f64(COL_NEW_CASES)).collect();
            let current = trailing_sums(&cases, self.window);

            let before = out.len();
            for (i, row) in group.rows().enumerate() {
                let prior = i.checked_sub(self.window).and_then(|j| current[j]);
                let (Some(weekly), Some(prior)) = (current[i], prior) else {
                    continue;
                };
                let factor = growth_factor(weekly, prior);
                if factor < lo || factor > hi {
                    continue;
                }
                out.push_row(vec![
                    row.get(COL_DATE).cloned().unwrap_or(Value::Null),
                    location.clone(),
                    Value::Float(weekly),
                    Value::Float(factor),
                ])?;
            }
            debug!("Growth: {} -> {} rows", location, out.len() - before);
        }
        info!("✅ Computed {} growth rows", out.len());
        Ok(out)
    }
}

/// Ratio of the current to the prior weekly total. Undefined ratios map to 0,
/// which conflates "no prior cases" with "no growth".
pub fn growth_factor(weekly: f64, prior: f64) -> f64 {
    let ratio = weekly / prior;
    if ratio.is_finite() {
        ratio
    } else {
        0.0
    }
}

/// Split by location (first-appearance order) and sort each group by date.
fn ordered_groups(set: &RecordSet) -> Result<Vec<(Value, RecordSet)>> {
    set.group_by(&[COL_LOCATION])?
        .into_iter()
        .map(|(mut key, group)| {
            let location = key.pop().unwrap_or(Value::Null);
            Ok((location, group.sorted_by_date(COL_DATE)?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::COL_PEOPLE_VACCINATED;
    use crate::pipeline::processing::normalize::NORMALIZED_COLUMNS;
    use chrono::{Duration, NaiveDate};

    fn series(location: &str, cases: &[f64], population: f64) -> Vec<Vec<Value>> {
        let start = NaiveDate::from_ymd_opt(2021, 5, 1).unwrap();
        cases
            .iter()
            .enumerate()
            .map(|(i, c)| {
                vec![
                    Value::Str(location.to_string()),
                    Value::Date(start + Duration::days(i as i64)),
                    Value::Float(*c),
                    Value::Float(1.0),
                    Value::Float(population),
                ]
            })
            .collect()
    }

    fn normalized(rows: Vec<Vec<Value>>) -> RecordSet {
        RecordSet::from_rows(NORMALIZED_COLUMNS, rows).unwrap()
    }

    fn engine() -> RollingMetrics {
        RollingMetrics::from_config(&MetricsConfig::default())
    }

    #[test]
    fn test_eight_constant_days_give_two_incidence_rows() {
        let set = normalized(series("Ecuador", &[100.0; 8], 1_000_000.0));
        let out = engine().incidence(&set).unwrap();
        assert_eq!(out.columns(), &INCIDENCE_COLUMNS.map(String::from));
        assert_eq!(out.len(), 2);
        let days: Vec<_> = out.rows().map(|r| r.date(COL_DATE).unwrap()).collect();
        assert_eq!(days[0], NaiveDate::from_ymd_opt(2021, 5, 7).unwrap());
        assert_eq!(days[1], NaiveDate::from_ymd_opt(2021, 5, 8).unwrap());
        for row in out.rows() {
            assert!((row.f64(COL_INCIDENCE_7D).unwrap() - 10.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_short_group_yields_nothing_and_does_not_affect_others() {
        let mut rows = series("Peru", &[5.0; 6], 1_000.0);
        rows.extend(series("Ecuador", &[1.0; 14], 1_000.0));
        let set = normalized(rows);

        let incidence = engine().incidence(&set).unwrap();
        assert!(incidence.rows().all(|r| r.str(COL_LOCATION) == Some("Ecuador")));
        assert_eq!(incidence.len(), 8);

        let growth = engine().growth(&set).unwrap();
        assert!(growth.rows().all(|r| r.str(COL_LOCATION) == Some("Ecuador")));
        assert_eq!(growth.len(), 1);
        assert_eq!(growth.row(0).unwrap().f64(COL_GROWTH_7D), Some(1.0));
    }

    #[test]
    fn test_unsorted_input_is_ordered_within_group() {
        let mut rows = series("Peru", &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0], 100_000.0);
        rows.reverse();
        let out = engine().incidence(&normalized(rows)).unwrap();
        let values: Vec<_> = out.rows().map(|r| r.f64(COL_INCIDENCE_7D).unwrap()).collect();
        assert_eq!(values.len(), 2);
        assert!((values[0] - 4.0).abs() < 1e-9);
        assert!((values[1] - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_prior_week_maps_to_zero_and_is_kept() {
        let mut cases = vec![0.0; 13];
        cases.push(50.0);
        let out = engine().growth(&normalized(series("Ecuador", &cases, 1_000.0))).unwrap();
        assert_eq!(out.len(), 1);
        let row = out.row(0).unwrap();
        assert_eq!(row.f64(COL_WEEKLY_CASES), Some(50.0));
        assert_eq!(row.f64(COL_GROWTH_7D), Some(0.0));
    }

    #[test]
    fn test_zero_prior_week_after_fractional_cases_is_kept() {
        let mut cases = vec![7.9, 0.9, 0.3, 8.4, 4.3, 7.6, 0.0];
        cases.extend([0.0; 7]);
        cases.push(50.0);
        cases.extend([0.0; 6]);
        let out = engine().growth(&normalized(series("Peru", &cases, 1_000.0))).unwrap();

        let day_21 = NaiveDate::from_ymd_opt(2021, 5, 21).unwrap();
        let row = out.rows().find(|r| r.date(COL_DATE) == Some(day_21)).unwrap();
        assert_eq!(row.f64(COL_WEEKLY_CASES), Some(50.0));
        assert_eq!(row.f64(COL_GROWTH_7D), Some(0.0));
    }

    #[test]
    fn test_growth_outside_range_is_dropped() {
        // prior week 7 cases, current week 700: factor 100
        let mut cases = vec![1.0; 7];
        cases.extend([100.0; 7]);
        let out = engine().growth(&normalized(series("Peru", &cases, 1_000.0))).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_growth_rows_stay_in_range() {
        let cases: Vec<f64> = (0..40).map(|i| ((i * 37) % 11) as f64).collect();
        let out = engine().growth(&normalized(series("Peru", &cases, 1_000.0))).unwrap();
        assert!(!out.is_empty());
        for row in out.rows() {
            let f = row.f64(COL_GROWTH_7D).unwrap();
            assert!((0.0..=10.0).contains(&f));
        }
    }

    #[test]
    fn test_empty_input_without_population_column() {
        let set = RecordSet::from_rows(
            [COL_LOCATION, COL_DATE, COL_NEW_CASES, COL_PEOPLE_VACCINATED],
            vec![],
        )
        .unwrap();
        assert!(engine().growth(&set).is_ok());
        assert!(engine().incidence(&set).unwrap().is_empty());
    }

    #[test]
    fn test_growth_factor_edge_cases() {
        assert_eq!(growth_factor(50.0, 0.0), 0.0);
        assert_eq!(growth_factor(0.0, 0.0), 0.0);
        assert_eq!(growth_factor(-5.0, 0.0), 0.0);
        assert_eq!(growth_factor(20.0, 10.0), 2.0);
    }
}
