use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use std::time::Duration as StdDuration;
use tempfile::tempdir;

use epi_report::app::ports::SourceFetcher;
use epi_report::config::Config;
use epi_report::constants::{COL_DATE, COL_LOCATION, COL_NEW_CASES, SHEET_GROWTH, SHEET_INCIDENCE};
use epi_report::error::{PipelineError, Result};
use epi_report::infra::report_renderer::CsvReportRenderer;
use epi_report::pipeline::processing::quality_gate::rules::{
    INPUT_GATE, OUTPUT_GATE, RULE_MAX_DATE, RULE_UNIQUE_KEY,
};
use epi_report::pipeline::run::{EXPORT, NORMALIZE, VALIDATE_OUTPUT};
use epi_report::pipeline::{NodeState, Pipeline, RunStatus};

const HEADER: &str = "iso_code,location,date,new_cases,people_vaccinated,population,total_deaths";

/// Serves a fixed body, or a network failure when there is none.
struct StubFetcher {
    body: Option<String>,
}

#[async_trait]
impl SourceFetcher for StubFetcher {
    async fn fetch(&self, url: &str, _timeout: StdDuration) -> Result<String> {
        self.body.clone().ok_or_else(|| PipelineError::Network {
            cause: format!("connection refused: {url}"),
        })
    }
}

fn series(location: &str, days: usize, cases: f64, population: f64) -> Vec<String> {
    let start = NaiveDate::from_ymd_opt(2021, 5, 1).unwrap();
    (0..days)
        .map(|i| {
            let date = start + Duration::days(i as i64);
            format!("XXX,{location},{date},{cases},{},{population},", 1000 + i)
        })
        .collect()
}

fn snapshot(rows: Vec<String>) -> String {
    let mut text = String::from(HEADER);
    for row in rows {
        text.push('\n');
        text.push_str(&row);
    }
    text.push('\n');
    text
}

fn two_weeks() -> Vec<String> {
    let mut rows = series("Ecuador", 14, 100.0, 1_000_000.0);
    rows.extend(series("Peru", 14, 50.0, 500_000.0));
    rows.push("CHL,Chile,2021-05-01,7,1,19000000,".to_string());
    rows
}

fn config(reference: (i32, u32, u32)) -> Config {
    let mut config = Config::default();
    config.gates.reference_date = NaiveDate::from_ymd_opt(reference.0, reference.1, reference.2);
    config
}

fn pipeline() -> Pipeline {
    Pipeline::new(config((2021, 6, 1))).unwrap()
}

#[test]
fn test_clean_snapshot_produces_both_sheets() {
    let run = pipeline().run_snapshot(&snapshot(two_weeks())).unwrap();
    assert_eq!(run.summary().status, RunStatus::Ok);
    assert_eq!(run.audit().len(), 2);
    assert_eq!(run.audit()[0].gate, INPUT_GATE);
    assert_eq!(run.audit()[1].gate, OUTPUT_GATE);

    let book = run.report().unwrap();
    let incidence = book.sheet(SHEET_INCIDENCE).unwrap();
    assert_eq!(incidence.columns(), &["date", "Ecuador", "Peru"].map(String::from));
    assert_eq!(incidence.len(), 8);
    for row in incidence.rows() {
        assert!((row.f64("Ecuador").unwrap() - 10.0).abs() < 1e-9);
        assert!((row.f64("Peru").unwrap() - 10.0).abs() < 1e-9);
    }

    let growth = book.sheet(SHEET_GROWTH).unwrap();
    assert_eq!(
        growth.columns(),
        &["date", "Ecuador", "Ecuador_casos", "Peru", "Peru_casos"].map(String::from)
    );
    assert_eq!(growth.len(), 1);
    let row = growth.row(0).unwrap();
    assert_eq!(row.date(COL_DATE), NaiveDate::from_ymd_opt(2021, 5, 14));
    assert_eq!(row.f64("Ecuador"), Some(1.0));
    assert_eq!(row.f64("Ecuador_casos"), Some(700.0));
    assert_eq!(row.f64("Peru_casos"), Some(350.0));
}

#[test]
fn test_duplicate_key_is_advisory_and_later_row_wins() {
    let mut rows = two_weeks();
    rows.push("ECU,Ecuador,2021-05-01,999,1,1000000,".to_string());
    let run = pipeline().run_snapshot(&snapshot(rows)).unwrap();

    let input = &run.audit()[0];
    let unique = input.result.rule(RULE_UNIQUE_KEY).unwrap();
    assert!(!unique.passed);
    assert_eq!(unique.affected_row_count, 1);
    assert!(!input.tripped);
    assert_eq!(input.result.metadata[RULE_UNIQUE_KEY], "No");

    let normalized = run
        .dag
        .output(NORMALIZE)
        .and_then(|o| o.artifact())
        .and_then(|a| a.records())
        .unwrap();
    let first_of_may: Vec<f64> = normalized
        .rows()
        .filter(|r| {
            r.str(COL_LOCATION) == Some("Ecuador")
                && r.date(COL_DATE) == NaiveDate::from_ymd_opt(2021, 5, 1)
        })
        .map(|r| r.f64(COL_NEW_CASES).unwrap())
        .collect();
    assert_eq!(first_of_may, vec![999.0]);

    assert!(run.report().is_some());
    assert_eq!(run.summary().status, RunStatus::Degraded);
}

#[test]
fn test_empty_incidence_trips_output_gate() {
    let mut rows = series("Ecuador", 5, 100.0, 1_000_000.0);
    rows.extend(series("Peru", 5, 50.0, 500_000.0));
    let run = pipeline().run_snapshot(&snapshot(rows)).unwrap();

    let output = run.audit().iter().find(|e| e.gate == OUTPUT_GATE).unwrap();
    assert!(!output.result.overall_passed);
    assert!(output.tripped);
    assert_eq!(output.result.metadata["fuera_de_rango"], "0");
    assert_eq!(output.result.metadata["total_filas"], "0");
    assert_eq!(output.result.metadata["error"], "conjunto vacío");

    assert!(run.is_fatal());
    assert!(matches!(run.dag.state(VALIDATE_OUTPUT), Some(NodeState::Failed { .. })));
    assert!(matches!(run.dag.state(EXPORT), Some(NodeState::Failed { .. })));

    let summary = run.summary();
    assert_eq!(summary.status, RunStatus::Failed);
    let failure = summary.failure.unwrap();
    assert_eq!(failure.kind, "PlausibilityGateFailure");
    assert_eq!(failure.stage, VALIDATE_OUTPUT.to_string());
    assert_eq!(run.dag.gate_failures[0].node, VALIDATE_OUTPUT);

    let dir = tempdir().unwrap();
    let err = Pipeline::render(&run, &CsvReportRenderer::new(), dir.path()).unwrap_err();
    assert!(matches!(err, PipelineError::PlausibilityGate { .. }));
}

#[tokio::test]
async fn test_missing_population_fails_at_load_with_empty_audit() {
    let text = "location,date,new_cases,people_vaccinated\nEcuador,2021-05-01,1,1\n";
    let fetcher = StubFetcher {
        body: Some(text.to_string()),
    };
    let failure = pipeline().run(&fetcher).await.unwrap_err();
    assert_eq!(failure.stage, "load");
    assert_eq!(failure.error.kind(), "SchemaError");
    assert!(failure.audit.is_empty());
}

#[tokio::test]
async fn test_network_failure_reports_fetch_stage() {
    let failure = pipeline().run(&StubFetcher { body: None }).await.unwrap_err();
    assert_eq!(failure.stage, "fetch");
    assert!(matches!(failure.error, PipelineError::Network { .. }));
    assert!(failure.audit.is_empty());
}

#[test]
fn test_advisory_gate_failure_does_not_change_data() {
    let text = snapshot(two_weeks());
    let passing = Pipeline::new(config((2021, 6, 1))).unwrap().run_snapshot(&text).unwrap();
    // Today pinned long before the data, so the newest date looks implausible
    let failing = Pipeline::new(config((2020, 1, 1))).unwrap().run_snapshot(&text).unwrap();

    assert!(passing.audit()[0].result.overall_passed);
    assert!(!failing.audit()[0].result.rule(RULE_MAX_DATE).unwrap().passed);
    assert_eq!(passing.report(), failing.report());
    assert_eq!(
        passing.dag.output(NORMALIZE).and_then(|o| o.artifact()),
        failing.dag.output(NORMALIZE).and_then(|o| o.artifact())
    );
}

#[test]
fn test_identical_snapshots_are_reproducible() {
    let text = snapshot(two_weeks());
    let pipeline = pipeline();
    let a = pipeline.run_snapshot(&text).unwrap();
    let b = pipeline.run_snapshot(&text).unwrap();
    assert_eq!(a.snapshot_digest, b.snapshot_digest);
    assert_eq!(a.snapshot_digest.len(), 64);
    assert_ne!(a.run_id, b.run_id);
    assert_eq!(a.report(), b.report());
}

#[tokio::test]
async fn test_fetch_run_and_render() {
    let fetcher = StubFetcher {
        body: Some(snapshot(two_weeks())),
    };
    let run = pipeline().run(&fetcher).await.unwrap();
    let dir = tempdir().unwrap();
    let out = Pipeline::render(&run, &CsvReportRenderer::new(), dir.path()).unwrap();
    let incidence = std::fs::read_to_string(out.join("incidencia_7d.csv")).unwrap();
    assert!(incidence.starts_with("date,Ecuador,Peru\n2021-05-07,"));
    assert!(out.join("factor_crecimiento.csv").exists());

    let json = serde_json::to_value(run.summary()).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["gates"][0]["metadata"]["resumen"].as_str().map(|s| s.starts_with("nombre_regla")), Some(true));
}
