use thiserror::Error;

use crate::pipeline::dag::AuditEntry;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Network error: {cause}")]
    Network { cause: String },

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Rule '{rule}' could not be evaluated: {cause}")]
    RuleEvaluation { rule: String, cause: String },

    #[error("Plausibility gate '{gate}' tripped: {metric}")]
    PlausibilityGate { gate: String, metric: String },

    #[error("Report write failed: {cause}")]
    Write { cause: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),
}

impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        PipelineError::Network { cause: e.to_string() }
    }
}

impl PipelineError {
    pub fn missing_column(column: &str) -> Self {
        PipelineError::Schema(format!("missing required column '{column}'"))
    }

    /// Short machine-friendly name of the error kind, used in audit output.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Network { .. } => "NetworkError",
            PipelineError::Schema(_) => "SchemaError",
            PipelineError::RuleEvaluation { .. } => "RuleEvaluationError",
            PipelineError::PlausibilityGate { .. } => "PlausibilityGateFailure",
            PipelineError::Write { .. } => "WriteError",
            PipelineError::Config(_) => "ConfigError",
            PipelineError::Io(_) => "IoError",
            PipelineError::Csv(_) => "CsvError",
            PipelineError::Json(_) => "JsonError",
            PipelineError::Toml(_) => "TomlError",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// A run aborted by an error. Carries the gate verdicts recorded before the failure.
#[derive(Error, Debug)]
#[error("stage '{stage}' failed: {error}")]
pub struct RunFailure {
    pub stage: String,
    pub audit: Vec<AuditEntry>,
    #[source]
    pub error: PipelineError,
}

impl RunFailure {
    pub fn at(stage: impl Into<String>, error: PipelineError) -> Self {
        Self {
            stage: stage.into(),
            audit: Vec::new(),
            error,
        }
    }
}
