use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::app::ports::{ReportRenderer, SourceFetcher};
use crate::config::Config;
use crate::error::{PipelineError, Result, RunFailure};
use crate::pipeline::dag::{Artifact, AuditEntry, Dag, DagRun, Node, NodeId};
use crate::pipeline::ingestion;
use crate::pipeline::processing::export::{ReportBook, ReportExporter};
use crate::pipeline::processing::normalize::{JurisdictionNormalizer, Normalizer};
use crate::pipeline::processing::quality_gate::rules::{input_gate, output_gate};
use crate::pipeline::processing::quality_gate::GatePolicy;
use crate::pipeline::processing::rolling::RollingMetrics;

pub const LOAD: NodeId = NodeId("load");
pub const VALIDATE_INPUT: NodeId = NodeId("validate_input");
pub const NORMALIZE: NodeId = NodeId("normalize");
pub const INCIDENCE: NodeId = NodeId("incidence");
pub const GROWTH: NodeId = NodeId("growth");
pub const VALIDATE_OUTPUT: NodeId = NodeId("validate_output");
pub const EXPORT: NodeId = NodeId("export");

/// Stage name reported when the source could not be fetched
pub const FETCH_STAGE: &str = "fetch";

impl Dag {
    /// The seven-node weekly indicator graph:
    /// load → validate_input → normalize → {incidence, growth} →
    /// validate_output(incidence) → export(validate_output, growth).
    pub fn standard(config: &Config) -> Result<Self> {
        config.validate()?;

        let normalizer = JurisdictionNormalizer::new(config.jurisdictions.clone());
        let incidence_engine = RollingMetrics::from_config(&config.metrics);
        let growth_engine = incidence_engine.clone();
        let exporter = ReportExporter::new(config.jurisdictions.clone());

        let nodes = vec![
            Node::compute(LOAD, vec![], |inputs| {
                ingestion::load(inputs.snapshot).map(Artifact::Records)
            }),
            Node::gate(
                VALIDATE_INPUT,
                LOAD,
                input_gate(
                    &config.jurisdictions,
                    config.gates.reference_date,
                    config.gates.max_future_days,
                ),
            ),
            Node::compute(NORMALIZE, vec![VALIDATE_INPUT], move |inputs| {
                Ok(Artifact::Records(normalizer.normalize(inputs.records(0)?)))
            }),
            Node::compute(INCIDENCE, vec![NORMALIZE], move |inputs| {
                incidence_engine.incidence(inputs.records(0)?).map(Artifact::Records)
            }),
            Node::compute(GROWTH, vec![NORMALIZE], move |inputs| {
                growth_engine.growth(inputs.records(0)?).map(Artifact::Records)
            }),
            Node::gate(
                VALIDATE_OUTPUT,
                INCIDENCE,
                output_gate(config.gates.incidence_range),
            ),
            Node::compute(EXPORT, vec![VALIDATE_OUTPUT, GROWTH], move |inputs| {
                exporter
                    .export(inputs.records(0)?, inputs.records(1)?)
                    .map(Artifact::Report)
            }),
        ];
        Dag::new(nodes)
    }
}

/// Outcome of one completed execution of the graph
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Hex SHA-256 of the snapshot the run consumed
    pub snapshot_digest: String,
    pub dag: DagRun,
}

impl PipelineRun {
    /// The export artifact, unless a fatal gate or short-circuit replaced it.
    pub fn report(&self) -> Option<&ReportBook> {
        self.dag
            .terminal()
            .and_then(|o| o.artifact())
            .and_then(Artifact::report)
    }

    /// A fatal gate tripped and the export was not produced.
    pub fn is_fatal(&self) -> bool {
        self.report().is_none()
    }

    /// Advisory gates reported failures but the export is complete.
    pub fn is_degraded(&self) -> bool {
        !self.is_fatal() && self.audit().iter().any(|e| !e.result.overall_passed)
    }

    pub fn audit(&self) -> &[AuditEntry] {
        &self.dag.audit
    }

    pub fn summary(&self) -> RunSummary {
        let status = if self.is_fatal() {
            RunStatus::Failed
        } else if self.is_degraded() {
            RunStatus::Degraded
        } else {
            RunStatus::Ok
        };
        let failure = self.dag.gate_failures.first().map(|trip| {
            let error = trip.to_error();
            FailureSummary {
                stage: trip.node.to_string(),
                kind: error.kind(),
                cause: error.to_string(),
            }
        });
        RunSummary {
            run_id: Some(self.run_id),
            started_at: Some(self.started_at),
            finished_at: Some(self.finished_at),
            snapshot_digest: Some(self.snapshot_digest.clone()),
            status,
            failure,
            gates: self.audit().iter().map(GateAudit::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Ok,
    Degraded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureSummary {
    pub stage: String,
    pub kind: &'static str,
    pub cause: String,
}

/// Per-gate audit metadata as exposed to callers
#[derive(Debug, Clone, Serialize)]
pub struct GateAudit {
    pub node: NodeId,
    pub gate: String,
    pub policy: GatePolicy,
    pub overall_passed: bool,
    pub tripped: bool,
    pub metadata: BTreeMap<String, String>,
}

impl From<&AuditEntry> for GateAudit {
    fn from(entry: &AuditEntry) -> Self {
        Self {
            node: entry.node,
            gate: entry.gate.clone(),
            policy: entry.policy,
            overall_passed: entry.result.overall_passed,
            tripped: entry.tripped,
            metadata: entry.result.metadata.clone(),
        }
    }
}

/// Serializable record of a run, successful or not
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub snapshot_digest: Option<String>,
    pub status: RunStatus,
    pub failure: Option<FailureSummary>,
    pub gates: Vec<GateAudit>,
}

impl From<&RunFailure> for RunSummary {
    fn from(failure: &RunFailure) -> Self {
        Self {
            run_id: None,
            started_at: None,
            finished_at: None,
            snapshot_digest: None,
            status: RunStatus::Failed,
            failure: Some(FailureSummary {
                stage: failure.stage.clone(),
                kind: failure.error.kind(),
                cause: failure.error.to_string(),
            }),
            gates: failure.audit.iter().map(GateAudit::from).collect(),
        }
    }
}

/// Runs the weekly indicator graph against fetched or supplied snapshots.
pub struct Pipeline {
    config: Config,
    dag: Dag,
}

impl Pipeline {
    pub fn new(config: Config) -> Result<Self> {
        let dag = Dag::standard(&config)?;
        Ok(Self { config, dag })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    /// Fetch the configured source, then run over the fetched text.
    #[instrument(skip(self, fetcher), fields(url = %self.config.source.url))]
    pub async fn run(&self, fetcher: &dyn SourceFetcher) -> std::result::Result<PipelineRun, RunFailure> {
        let timeout = Duration::from_secs(self.config.source.timeout_seconds);
        let snapshot = match fetcher.fetch(&self.config.source.url, timeout).await {
            Ok(text) => text,
            Err(e) => {
                error!("❌ Fetch failed: {}", e);
                crate::metrics::run_failed(FETCH_STAGE);
                return Err(RunFailure::at(FETCH_STAGE, e));
            }
        };
        info!("✅ Fetched snapshot of {} bytes", snapshot.len());
        self.run_snapshot(&snapshot)
    }

    /// Run over already-fetched text. Identical snapshots give identical artifacts.
    #[instrument(skip(self, snapshot), fields(bytes = snapshot.len()))]
    pub fn run_snapshot(&self, snapshot: &str) -> std::result::Result<PipelineRun, RunFailure> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let t0 = Instant::now();
        crate::metrics::run_started();

        let snapshot_digest = ingestion::snapshot_digest(snapshot);
        info!("🚀 Starting run {} over snapshot {}", run_id, snapshot_digest);

        let dag = self.dag.run(snapshot)?;
        let run = PipelineRun {
            run_id,
            started_at,
            finished_at: Utc::now(),
            snapshot_digest,
            dag,
        };

        if run.is_fatal() {
            warn!("🛑 Run {} finished without an export", run_id);
        } else {
            info!(
                "✅ Run {} finished in {:.2}s ({} gates audited)",
                run_id,
                t0.elapsed().as_secs_f64(),
                run.audit().len()
            );
        }
        Ok(run)
    }

    /// Hand the export to a renderer. A run without an export cannot be rendered.
    pub fn render(
        run: &PipelineRun,
        renderer: &dyn ReportRenderer,
        destination: &Path,
    ) -> Result<PathBuf> {
        let Some(book) = run.report() else {
            let gate = run
                .audit()
                .iter()
                .find(|e| e.tripped)
                .map(|e| e.gate.clone())
                .unwrap_or_default();
            return Err(PipelineError::PlausibilityGate {
                gate,
                metric: "export was not produced".to_string(),
            });
        };
        let path = renderer.render(book, destination)?;
        info!("💾 Report written to {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_graph_order() {
        let dag = Dag::standard(&Config::default()).unwrap();
        assert_eq!(
            dag.batches(),
            vec![
                vec![LOAD],
                vec![VALIDATE_INPUT],
                vec![NORMALIZE],
                vec![INCIDENCE, GROWTH],
                vec![VALIDATE_OUTPUT],
                vec![EXPORT],
            ]
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = Config::default();
        config.jurisdictions.clear();
        assert!(matches!(Pipeline::new(config), Err(PipelineError::Config(_))));
    }
}
