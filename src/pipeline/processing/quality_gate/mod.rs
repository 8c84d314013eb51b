use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::constants::{
    yes_no, NOTE_CONTINUE_WITH_WARNING, NOTE_MISSING_COLUMN, NOTE_OK, SUMMARY_KEY,
};
use crate::error::{PipelineError, Result};
use crate::table::RecordSet;

pub mod rules;

/// Outcome of one rule against one record set
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckRuleResult {
    pub rule_name: String,
    pub passed: bool,
    pub affected_row_count: usize,
    pub note: String,
}

impl CheckRuleResult {
    /// Build a result with the standard note for its verdict.
    pub fn new(rule_name: impl Into<String>, passed: bool, affected_row_count: usize) -> Self {
        let note = if passed { NOTE_OK } else { NOTE_CONTINUE_WITH_WARNING };
        Self {
            rule_name: rule_name.into(),
            passed,
            affected_row_count,
            note: note.to_string(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }
}

/// One line of the rendered rule table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub nombre_regla: String,
    pub estado: String,
    pub filas_afectadas: usize,
    pub notas: String,
}

impl From<&CheckRuleResult> for SummaryRow {
    fn from(r: &CheckRuleResult) -> Self {
        Self {
            nombre_regla: r.rule_name.clone(),
            estado: yes_no(r.passed).to_string(),
            filas_afectadas: r.affected_row_count,
            notas: r.note.clone(),
        }
    }
}

/// Aggregate verdict of one gate. `overall_passed` is the AND of every rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    pub overall_passed: bool,
    pub rules: Vec<CheckRuleResult>,
    pub summary_table: Vec<SummaryRow>,
    /// Rule name to "Sí"/"No", the rendered table under `resumen`, plus any
    /// gate-specific annotations
    pub metadata: BTreeMap<String, String>,
}

impl CheckResult {
    pub fn rule(&self, name: &str) -> Option<&CheckRuleResult> {
        self.rules.iter().find(|r| r.rule_name == name)
    }

    pub fn failed_rules(&self) -> impl Iterator<Item = &CheckRuleResult> {
        self.rules.iter().filter(|r| !r.passed)
    }

    /// Render the summary as an aligned text table. Metadata only.
    pub fn render_summary(&self) -> String {
        render_table(&self.summary_table)
    }
}

type RuleFn = dyn Fn(&RecordSet) -> Result<CheckRuleResult> + Send + Sync;

/// A named, pure inspection of a record set.
///
/// Returning `Ok` with `passed = false` is the normal way to report a data
/// problem; `Err` is reserved for structural defects such as a missing column.
pub struct CheckRule {
    name: String,
    eval: Box<RuleFn>,
}

impl CheckRule {
    pub fn new<F>(name: impl Into<String>, eval: F) -> Self
    where
        F: Fn(&RecordSet) -> Result<CheckRuleResult> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            eval: Box::new(eval),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, set: &RecordSet) -> CheckRuleResult {
        match (self.eval)(set) {
            Ok(result) => result,
            Err(e) => {
                let cause = PipelineError::RuleEvaluation {
                    rule: self.name.clone(),
                    cause: e.to_string(),
                };
                warn!("{}", cause);
                let note = match e {
                    PipelineError::Schema(_) => NOTE_MISSING_COLUMN.to_string(),
                    other => format!("rule inapplicable: {other}"),
                };
                CheckRuleResult::new(self.name.clone(), false, 0).with_note(note)
            }
        }
    }
}

impl std::fmt::Debug for CheckRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckRule").field("name", &self.name).finish()
    }
}

/// Run every rule against the record set and aggregate the verdicts.
///
/// Never fails: a rule that cannot be evaluated is recorded as not passed.
pub fn evaluate(set: &RecordSet, rules: &[CheckRule]) -> CheckResult {
    let results: Vec<CheckRuleResult> = rules.iter().map(|rule| rule.run(set)).collect();
    let overall_passed = results.iter().all(|r| r.passed);
    let summary_table: Vec<SummaryRow> = results.iter().map(SummaryRow::from).collect();

    let mut metadata: BTreeMap<String, String> = results
        .iter()
        .map(|r| (r.rule_name.clone(), yes_no(r.passed).to_string()))
        .collect();
    metadata.insert(SUMMARY_KEY.to_string(), render_table(&summary_table));

    debug!(
        "Evaluated {} rules over {} rows: overall_passed={}",
        results.len(),
        set.len(),
        overall_passed
    );

    CheckResult {
        overall_passed,
        rules: results,
        summary_table,
        metadata,
    }
}

fn render_table(rows: &[SummaryRow]) -> String {
    let header = ["nombre_regla", "estado", "filas_afectadas", "notas"];
    let body: Vec<[String; 4]> = rows
        .iter()
        .map(|r| {
            [
                r.nombre_regla.clone(),
                r.estado.clone(),
                r.filas_afectadas.to_string(),
                r.notas.clone(),
            ]
        })
        .collect();

    let mut widths = header.map(|h| h.chars().count());
    for line in &body {
        for (w, cell) in widths.iter_mut().zip(line.iter()) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let fmt_line = |cells: [&str; 4]| {
        cells
            .iter()
            .zip(widths.iter())
            .map(|(c, w)| format!("{}{}", c, " ".repeat(*w - c.chars().count())))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut out = vec![fmt_line(header)];
    for line in &body {
        out.push(fmt_line([
            line[0].as_str(),
            line[1].as_str(),
            line[2].as_str(),
            line[3].as_str(),
        ]));
    }
    out.join("\n")
}

/// What the executor does when a gate does not pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GatePolicy {
    /// Record the failure, let the output flow downstream unchanged
    Advisory,
    /// Replace the output with a failure marker
    Fatal,
    /// Fatal only when the guarded output has no rows, advisory otherwise
    FatalWhenEmpty,
}

impl GatePolicy {
    pub fn trips(&self, result: &CheckResult, guarded: &RecordSet) -> bool {
        if result.overall_passed {
            return false;
        }
        match self {
            GatePolicy::Advisory => false,
            GatePolicy::Fatal => true,
            GatePolicy::FatalWhenEmpty => guarded.is_empty(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GatePolicy::Advisory => "advisory",
            GatePolicy::Fatal => "fatal",
            GatePolicy::FatalWhenEmpty => "fatal_when_empty",
        }
    }
}

type AnnotateFn = dyn Fn(&RecordSet, &CheckResult) -> Vec<(String, String)> + Send + Sync;

/// A named rule set plus its failure policy, attached to one pipeline node.
pub struct GateSpec {
    pub name: String,
    pub rules: Vec<CheckRule>,
    pub policy: GatePolicy,
    annotate: Option<Box<AnnotateFn>>,
}

impl GateSpec {
    pub fn new(name: impl Into<String>, rules: Vec<CheckRule>, policy: GatePolicy) -> Self {
        Self {
            name: name.into(),
            rules,
            policy,
            annotate: None,
        }
    }

    /// Attach extra metadata computed from the guarded output and the verdict.
    pub fn with_annotations<F>(mut self, annotate: F) -> Self
    where
        F: Fn(&RecordSet, &CheckResult) -> Vec<(String, String)> + Send + Sync + 'static,
    {
        self.annotate = Some(Box::new(annotate));
        self
    }

    pub fn assess(&self, set: &RecordSet) -> CheckResult {
        let mut result = evaluate(set, &self.rules);
        if let Some(annotate) = &self.annotate {
            for (k, v) in annotate(set, &result) {
                result.metadata.insert(k, v);
            }
        }
        result
    }
}

impl std::fmt::Debug for GateSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateSpec")
            .field("name", &self.name)
            .field("rules", &self.rules)
            .field("policy", &self.policy)
            .finish()
    }
}
