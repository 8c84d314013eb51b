/// Column names and fixed labels shared across the pipeline stages.
/// Keep these in one place so gates, metrics and the exporter agree on spelling.

/// Canonical OWID dataset location
pub const DEFAULT_SOURCE_URL: &str =
    "https://raw.githubusercontent.com/owid/covid-19-data/master/public/data/owid-covid-data.csv";

// Source columns
pub const COL_LOCATION: &str = "location";
pub const COL_DATE: &str = "date";
pub const COL_NEW_CASES: &str = "new_cases";
pub const COL_PEOPLE_VACCINATED: &str = "people_vaccinated";
pub const COL_POPULATION: &str = "population";

/// Columns the loader requires from the fetched text, in output order
pub const REQUIRED_SOURCE_COLUMNS: [&str; 5] = [
    COL_LOCATION,
    COL_DATE,
    COL_NEW_CASES,
    COL_PEOPLE_VACCINATED,
    COL_POPULATION,
];

// Derived metric columns
pub const COL_INCIDENCE_7D: &str = "incidencia_7d";
pub const COL_WEEKLY_CASES: &str = "casos_semana";
pub const COL_GROWTH_7D: &str = "factor_crec_7d";

/// Suffix appended to pivoted weekly case columns in the growth sheet
pub const WEEKLY_CASES_SUFFIX: &str = "_casos";

// Report sheets
pub const SHEET_INCIDENCE: &str = "Incidencia 7D";
pub const SHEET_GROWTH: &str = "Factor Crecimiento";

// Audit labels
pub const YES: &str = "Sí";
pub const NO: &str = "No";
pub const NOTE_OK: &str = "OK";
pub const NOTE_CONTINUE_WITH_WARNING: &str = "Continuar con advertencia";
pub const NOTE_MISSING_COLUMN: &str = "rule inapplicable: missing column";
pub const SUMMARY_KEY: &str = "resumen";

pub fn yes_no(passed: bool) -> &'static str {
    if passed {
        YES
    } else {
        NO
    }
}
