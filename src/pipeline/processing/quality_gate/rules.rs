//! Rule sets wired to the two pipeline gates.
//!
//! `chequeos_entrada` inspects the raw load and is advisory; `chequeos_salida_incidencia`
//! inspects the incidence series and is fatal when that series is empty.

use chrono::{Duration, Local, NaiveDate};
use std::collections::HashSet;

use super::{CheckResult, CheckRule, CheckRuleResult, GatePolicy, GateSpec};
use crate::constants::{
    yes_no, COL_DATE, COL_INCIDENCE_7D, COL_LOCATION, COL_NEW_CASES, COL_POPULATION,
};
use crate::table::RecordSet;

pub const INPUT_GATE: &str = "chequeos_entrada";
pub const OUTPUT_GATE: &str = "chequeos_salida_incidencia";

pub const RULE_MAX_DATE: &str = "fecha máxima razonable";
pub const RULE_UNIQUE_KEY: &str = "unicidad (location, date)";
pub const RULE_POPULATION_POSITIVE: &str = "population > 0";
pub const RULE_NEW_CASES_NON_NEGATIVE: &str = "new_cases ≥ 0";
pub const RULE_ROWS_PRESENT: &str = "filas presentes";
pub const RULE_VALID_RANGE: &str = "rango_valido";

pub fn column_present_rule_name(column: &str) -> String {
    format!("{column} presente")
}

pub fn jurisdictions_rule_name(jurisdictions: &[String]) -> String {
    format!("datos de {} presentes", jurisdictions.join(" y "))
}

/// Advisory gate over the loaded source records.
///
/// Without a `reference_date`, "today" is the local date at evaluation time.
pub fn input_gate(
    jurisdictions: &[String],
    reference_date: Option<NaiveDate>,
    max_future_days: i64,
) -> GateSpec {
    let mut rules: Vec<CheckRule> = [COL_LOCATION, COL_DATE, COL_NEW_CASES, COL_POPULATION]
        .into_iter()
        .map(column_present)
        .collect();
    rules.push(jurisdictions_present(jurisdictions.to_vec()));
    rules.push(max_date_reasonable(reference_date, max_future_days));
    rules.push(unique_location_date());
    rules.push(population_positive());
    rules.push(new_cases_non_negative());
    GateSpec::new(INPUT_GATE, rules, GatePolicy::Advisory)
}

/// Output gate over the incidence series: non-empty and inside the plausible range.
pub fn output_gate(range: (f64, f64)) -> GateSpec {
    let rules = vec![rows_present(), incidence_in_range(range)];
    GateSpec::new(OUTPUT_GATE, rules, GatePolicy::FatalWhenEmpty)
        .with_annotations(output_annotations)
}

fn output_annotations(set: &RecordSet, result: &CheckResult) -> Vec<(String, String)> {
    let out_of_range = result
        .rule(RULE_VALID_RANGE)
        .map(|r| r.affected_row_count)
        .unwrap_or(0);
    let mut notes = vec![
        (RULE_VALID_RANGE.to_string(), yes_no(result.overall_passed).to_string()),
        ("total_filas".to_string(), set.len().to_string()),
        ("fuera_de_rango".to_string(), out_of_range.to_string()),
    ];
    if set.is_empty() {
        notes.push(("error".to_string(), "conjunto vacío".to_string()));
    }
    notes
}

pub fn column_present(column: &'static str) -> CheckRule {
    let name = column_present_rule_name(column);
    CheckRule::new(name.clone(), move |set: &RecordSet| {
        Ok(CheckRuleResult::new(name.clone(), set.has_column(column), 0))
    })
}

/// Every configured jurisdiction contributes at least one row.
pub fn jurisdictions_present(jurisdictions: Vec<String>) -> CheckRule {
    let name = jurisdictions_rule_name(&jurisdictions);
    CheckRule::new(name.clone(), move |set: &RecordSet| {
        let seen: HashSet<&str> = set.column(COL_LOCATION)?.filter_map(|v| v.as_str()).collect();
        let missing = jurisdictions
            .iter()
            .filter(|j| !seen.contains(j.as_str()))
            .count();
        Ok(CheckRuleResult::new(name.clone(), missing == 0, missing))
    })
}

/// The newest date is at most `max_future_days` past today. No parseable dates at all fails.
pub fn max_date_reasonable(reference_date: Option<NaiveDate>, max_future_days: i64) -> CheckRule {
    CheckRule::new(RULE_MAX_DATE, move |set: &RecordSet| {
        let today = reference_date.unwrap_or_else(|| Local::now().date_naive());
        let limit = today + Duration::days(max_future_days);
        let dates: Vec<NaiveDate> = set.column(COL_DATE)?.filter_map(|v| v.as_date()).collect();
        let beyond = dates.iter().filter(|d| **d > limit).count();
        let passed = dates.iter().max().map_or(false, |max| *max <= limit);
        Ok(CheckRuleResult::new(RULE_MAX_DATE, passed, beyond))
    })
}

/// No (location, date) key repeats. Counts every occurrence after the first.
pub fn unique_location_date() -> CheckRule {
    CheckRule::new(RULE_UNIQUE_KEY, |set: &RecordSet| {
        let duplicated = set
            .duplicated(&[COL_LOCATION, COL_DATE])?
            .into_iter()
            .filter(|d| *d)
            .count();
        Ok(CheckRuleResult::new(RULE_UNIQUE_KEY, duplicated == 0, duplicated))
    })
}

/// Every row has a strictly positive population. Missing population fails.
pub fn population_positive() -> CheckRule {
    CheckRule::new(RULE_POPULATION_POSITIVE, |set: &RecordSet| {
        let bad = set
            .column(COL_POPULATION)?
            .filter(|v| !v.as_f64().map_or(false, |p| p > 0.0))
            .count();
        Ok(CheckRuleResult::new(RULE_POPULATION_POSITIVE, bad == 0, bad))
    })
}

/// No negative case counts. Missing counts are not negative.
pub fn new_cases_non_negative() -> CheckRule {
    CheckRule::new(RULE_NEW_CASES_NON_NEGATIVE, |set: &RecordSet| {
        let negative = set
            .column(COL_NEW_CASES)?
            .filter(|v| v.as_f64().map_or(false, |c| c < 0.0))
            .count();
        Ok(CheckRuleResult::new(RULE_NEW_CASES_NON_NEGATIVE, negative == 0, negative))
    })
}

pub fn rows_present() -> CheckRule {
    CheckRule::new(RULE_ROWS_PRESENT, |set: &RecordSet| {
        Ok(CheckRuleResult::new(RULE_ROWS_PRESENT, !set.is_empty(), 0))
    })
}

pub fn incidence_in_range((lo, hi): (f64, f64)) -> CheckRule {
    CheckRule::new(RULE_VALID_RANGE, move |set: &RecordSet| {
        let outside = set
            .column(COL_INCIDENCE_7D)?
            .filter(|v| !v.as_f64().map_or(false, |x| x >= lo && x <= hi))
            .count();
        Ok(CheckRuleResult::new(RULE_VALID_RANGE, outside == 0, outside))
    })
}
