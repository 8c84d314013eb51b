// Data processing pipeline: ingestion, processing, and the graph that runs them

pub mod dag;
pub mod ingestion;
pub mod processing;
pub mod run;

// Re-export key types
pub use dag::{AuditEntry, Dag, DagRun, GateTrip, NodeId, NodeOutput, NodeState};
pub use run::{Pipeline, PipelineRun, RunStatus, RunSummary};
