//! Explicit dependency graph of named pipeline nodes and its executor.
//!
//! Every node declares its upstream ids, a computation, and optionally a gate
//! that inspects the node's fresh output. Ordering comes from the declared
//! edges only.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{PipelineError, Result, RunFailure};
use crate::pipeline::processing::export::ReportBook;
use crate::pipeline::processing::quality_gate::{CheckResult, GatePolicy, GateSpec};
use crate::table::RecordSet;

/// Stable identifier of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub &'static str);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// What a node materializes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Artifact {
    Records(RecordSet),
    Report(ReportBook),
}

impl Artifact {
    pub fn records(&self) -> Option<&RecordSet> {
        match self {
            Artifact::Records(set) => Some(set),
            Artifact::Report(_) => None,
        }
    }

    pub fn report(&self) -> Option<&ReportBook> {
        match self {
            Artifact::Report(book) => Some(book),
            Artifact::Records(_) => None,
        }
    }

    fn row_count(&self) -> usize {
        match self {
            Artifact::Records(set) => set.len(),
            Artifact::Report(book) => book.sheets.iter().map(|s| s.table.len()).sum(),
        }
    }
}

/// A node's output as seen by its consumers
#[derive(Debug, Clone)]
pub enum NodeOutput {
    Materialized(Arc<Artifact>),
    /// Failure marker; replaces the output of a tripped or short-circuited node
    Failed { reason: String },
}

impl NodeOutput {
    pub fn artifact(&self) -> Option<&Artifact> {
        match self {
            NodeOutput::Materialized(a) => Some(a),
            NodeOutput::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, NodeOutput::Failed { .. })
    }
}

/// Final state of a node after a run. Nodes pass through `Running` only
/// transiently, so it is not recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum NodeState {
    Pending,
    Materialized,
    Failed { reason: String },
}

/// Inputs handed to a node's computation
pub struct NodeInputs<'a> {
    /// The raw snapshot the run was started with
    pub snapshot: &'a str,
    upstream: Vec<(NodeId, Arc<Artifact>)>,
}

impl<'a> NodeInputs<'a> {
    /// Record set produced by the upstream at `position` in the node's declaration.
    pub fn records(&self, position: usize) -> Result<&RecordSet> {
        let (id, artifact) = self.upstream.get(position).ok_or_else(|| {
            PipelineError::Config(format!("no upstream input at position {position}"))
        })?;
        artifact
            .records()
            .ok_or_else(|| PipelineError::Schema(format!("upstream '{id}' did not produce records")))
    }

    fn first(&self) -> Option<&Arc<Artifact>> {
        self.upstream.first().map(|(_, a)| a)
    }
}

type ComputeFn = dyn Fn(&NodeInputs<'_>) -> Result<Artifact> + Send + Sync;

pub enum NodeKind {
    Compute(Box<ComputeFn>),
    /// Forwards its single upstream output unchanged; used for gate stages
    PassThrough,
}

pub struct Node {
    pub id: NodeId,
    pub upstream: Vec<NodeId>,
    pub kind: NodeKind,
    pub gate: Option<GateSpec>,
    /// When set, a failed upstream reaches this node as an empty record set
    pub tolerates_failed_upstream: bool,
}

impl Node {
    pub fn compute<F>(id: NodeId, upstream: Vec<NodeId>, f: F) -> Self
    where
        F: Fn(&NodeInputs<'_>) -> Result<Artifact> + Send + Sync + 'static,
    {
        Self {
            id,
            upstream,
            kind: NodeKind::Compute(Box::new(f)),
            gate: None,
            tolerates_failed_upstream: false,
        }
    }

    pub fn gate(id: NodeId, upstream: NodeId, gate: GateSpec) -> Self {
        Self {
            id,
            upstream: vec![upstream],
            kind: NodeKind::PassThrough,
            gate: Some(gate),
            tolerates_failed_upstream: false,
        }
    }

    pub fn with_gate(mut self, gate: GateSpec) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn tolerant(mut self) -> Self {
        self.tolerates_failed_upstream = true;
        self
    }

    fn execute(&self, inputs: &NodeInputs<'_>) -> Result<Arc<Artifact>> {
        match &self.kind {
            NodeKind::Compute(f) => f(inputs).map(Arc::new),
            NodeKind::PassThrough => inputs.first().cloned().ok_or_else(|| {
                PipelineError::Config(format!("pass-through node '{}' has no upstream", self.id))
            }),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("upstream", &self.upstream)
            .field("gate", &self.gate.as_ref().map(|g| g.name.as_str()))
            .field("tolerates_failed_upstream", &self.tolerates_failed_upstream)
            .finish()
    }
}

/// One gate verdict in the run's audit trail
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub node: NodeId,
    pub gate: String,
    pub policy: GatePolicy,
    pub result: CheckResult,
    /// The gate failed under a fatal policy and replaced the node's output
    pub tripped: bool,
}

/// A fatal gate trip: which node's output was replaced, and why
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateTrip {
    pub node: NodeId,
    pub gate: String,
    pub metric: String,
}

impl GateTrip {
    pub fn to_error(&self) -> PipelineError {
        PipelineError::PlausibilityGate {
            gate: self.gate.clone(),
            metric: self.metric.clone(),
        }
    }
}

/// Everything one execution of the graph produced
#[derive(Debug, Clone)]
pub struct DagRun {
    pub order: Vec<NodeId>,
    pub states: HashMap<NodeId, NodeState>,
    pub outputs: HashMap<NodeId, NodeOutput>,
    pub audit: Vec<AuditEntry>,
    /// Fatal gate trips, in the order they happened
    pub gate_failures: Vec<GateTrip>,
    terminal: NodeId,
}

impl DagRun {
    pub fn state(&self, id: NodeId) -> Option<&NodeState> {
        self.states.get(&id)
    }

    pub fn output(&self, id: NodeId) -> Option<&NodeOutput> {
        self.outputs.get(&id)
    }

    pub fn terminal_id(&self) -> NodeId {
        self.terminal
    }

    /// Output of the node nothing depends on.
    pub fn terminal(&self) -> Option<&NodeOutput> {
        self.outputs.get(&self.terminal)
    }
}

/// Validated, ordered graph of nodes
#[derive(Debug)]
pub struct Dag {
    nodes: Vec<Node>,
    batches: Vec<Vec<usize>>,
    terminal: NodeId,
}

impl Dag {
    /// Check ids and edges, then derive execution batches.
    ///
    /// Exactly one node must have no dependents; it is the run's terminal artifact.
    pub fn new(nodes: Vec<Node>) -> Result<Self> {
        let mut index: HashMap<NodeId, usize> = HashMap::new();
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.id, i).is_some() {
                return Err(PipelineError::Config(format!("duplicate node id '{}'", node.id)));
            }
        }
        for node in &nodes {
            for up in &node.upstream {
                if !index.contains_key(up) {
                    return Err(PipelineError::Config(format!(
                        "node '{}' depends on unknown node '{}'",
                        node.id, up
                    )));
                }
            }
            if matches!(node.kind, NodeKind::PassThrough) && node.upstream.len() != 1 {
                return Err(PipelineError::Config(format!(
                    "pass-through node '{}' needs exactly one upstream",
                    node.id
                )));
            }
        }

        let batches = parallel_batches(&nodes, &index)?;

        let consumed: HashSet<NodeId> = nodes.iter().flat_map(|n| n.upstream.iter().copied()).collect();
        let sinks: Vec<NodeId> = nodes.iter().map(|n| n.id).filter(|id| !consumed.contains(id)).collect();
        let terminal = match sinks.as_slice() {
            [only] => *only,
            _ => {
                return Err(PipelineError::Config(format!(
                    "graph must have exactly one terminal node, found {:?}",
                    sinks
                )))
            }
        };

        Ok(Self {
            nodes,
            batches,
            terminal,
        })
    }

    /// Node ids in execution order.
    pub fn order(&self) -> Vec<NodeId> {
        self.batches
            .iter()
            .flat_map(|b| b.iter().map(|&i| self.nodes[i].id))
            .collect()
    }

    pub fn batches(&self) -> Vec<Vec<NodeId>> {
        self.batches
            .iter()
            .map(|b| b.iter().map(|&i| self.nodes[i].id).collect())
            .collect()
    }

    /// Execute every node once against `snapshot`.
    ///
    /// A computation error aborts the run with the audit trail collected so far.
    /// Gate failures never abort: advisory ones are only recorded, fatal ones
    /// replace the output with a failure marker that short-circuits dependents.
    pub fn run(&self, snapshot: &str) -> std::result::Result<DagRun, RunFailure> {
        let mut states: HashMap<NodeId, NodeState> =
            self.nodes.iter().map(|n| (n.id, NodeState::Pending)).collect();
        let mut outputs: HashMap<NodeId, NodeOutput> = HashMap::new();
        let mut audit: Vec<AuditEntry> = Vec::new();
        let mut gate_failures: Vec<GateTrip> = Vec::new();

        for batch in &self.batches {
            let mut runnable: Vec<(&Node, NodeInputs<'_>)> = Vec::new();
            for &i in batch {
                let node = &self.nodes[i];
                match self.gather_inputs(node, snapshot, &outputs) {
                    Ok(inputs) => runnable.push((node, inputs)),
                    Err(reason) => {
                        warn!("⏭️  Skipping node '{}': {}", node.id, reason);
                        states.insert(node.id, NodeState::Failed { reason: reason.clone() });
                        outputs.insert(node.id, NodeOutput::Failed { reason });
                    }
                }
            }

            for (node, result, secs) in execute_batch(runnable) {
                let artifact = match result {
                    Ok(artifact) => artifact,
                    Err(e) => {
                        error!("❌ Node '{}' failed: {}", node.id, e);
                        crate::metrics::run_failed(node.id.0);
                        return Err(RunFailure {
                            stage: node.id.to_string(),
                            audit,
                            error: e,
                        });
                    }
                };
                let rows = artifact.row_count();
                crate::metrics::node_materialized(node.id.0, rows, secs);
                info!("✅ Node '{}' materialized {} rows in {:.3}s", node.id, rows, secs);

                let mut output = NodeOutput::Materialized(artifact.clone());
                if let Some(gate) = &node.gate {
                    let empty = RecordSet::default();
                    let guarded = artifact.records().unwrap_or(&empty);
                    let result = gate.assess(guarded);
                    let tripped = gate.policy.trips(&result, guarded);
                    if !result.overall_passed {
                        crate::metrics::gate_failed(&gate.name, gate.policy.as_str());
                        let failed: Vec<&str> =
                            result.failed_rules().map(|r| r.rule_name.as_str()).collect();
                        warn!(
                            "⚠️  Gate '{}' on '{}' did not pass ({}): {:?}",
                            gate.name,
                            node.id,
                            gate.policy.as_str(),
                            failed
                        );
                    } else {
                        debug!("Gate '{}' on '{}' passed", gate.name, node.id);
                    }
                    if tripped {
                        let trip = GateTrip {
                            node: node.id,
                            gate: gate.name.clone(),
                            metric: format!(
                                "{} rows; failed rules: {}",
                                guarded.len(),
                                result
                                    .failed_rules()
                                    .map(|r| r.rule_name.as_str())
                                    .collect::<Vec<_>>()
                                    .join(", ")
                            ),
                        };
                        let reason = trip.to_error().to_string();
                        error!("🛑 {}", reason);
                        output = NodeOutput::Failed { reason };
                        gate_failures.push(trip);
                    }
                    audit.push(AuditEntry {
                        node: node.id,
                        gate: gate.name.clone(),
                        policy: gate.policy,
                        result,
                        tripped,
                    });
                }

                let state = match &output {
                    NodeOutput::Materialized(_) => NodeState::Materialized,
                    NodeOutput::Failed { reason } => NodeState::Failed {
                        reason: reason.clone(),
                    },
                };
                states.insert(node.id, state);
                outputs.insert(node.id, output);
            }
        }

        Ok(DagRun {
            order: self.order(),
            states,
            outputs,
            audit,
            gate_failures,
            terminal: self.terminal,
        })
    }

    /// Collect upstream artifacts, or the reason the node must not run.
    fn gather_inputs<'a>(
        &self,
        node: &Node,
        snapshot: &'a str,
        outputs: &HashMap<NodeId, NodeOutput>,
    ) -> std::result::Result<NodeInputs<'a>, String> {
        let mut upstream = Vec::with_capacity(node.upstream.len());
        for up in &node.upstream {
            match outputs.get(up) {
                Some(NodeOutput::Materialized(a)) => upstream.push((*up, a.clone())),
                Some(NodeOutput::Failed { .. }) if node.tolerates_failed_upstream => {
                    upstream.push((*up, Arc::new(Artifact::Records(RecordSet::default()))));
                }
                Some(NodeOutput::Failed { .. }) => {
                    return Err(format!("upstream '{up}' failed"));
                }
                None => return Err(format!("upstream '{up}' has not run")),
            }
        }
        Ok(NodeInputs { snapshot, upstream })
    }
}

type BatchResult<'n> = (&'n Node, Result<Arc<Artifact>>, f64);

fn run_timed<'n>(node: &'n Node, inputs: &NodeInputs<'_>) -> BatchResult<'n> {
    debug!("▶️  Running node '{}'", node.id);
    let t0 = Instant::now();
    let result = node.execute(inputs);
    (node, result, t0.elapsed().as_secs_f64())
}

/// Run a batch; more than one node runs on scoped threads. Results come back
/// in batch order regardless of completion order.
fn execute_batch<'n>(runnable: Vec<(&'n Node, NodeInputs<'_>)>) -> Vec<BatchResult<'n>> {
    if runnable.len() <= 1 {
        return runnable
            .iter()
            .map(|(node, inputs)| run_timed(*node, inputs))
            .collect();
    }

    std::thread::scope(|scope| {
        let handles: Vec<_> = runnable
            .iter()
            .map(|(node, inputs)| {
                let node: &'n Node = *node;
                (node, scope.spawn(move || run_timed(node, inputs)))
            })
            .collect();
        handles
            .into_iter()
            .map(|(node, handle)| {
                handle.join().unwrap_or_else(|_| {
                    (
                        node,
                        Err(PipelineError::Config(format!("node '{}' panicked", node.id))),
                        0.0,
                    )
                })
            })
            .collect()
    })
}

/// Group nodes into batches whose members only depend on earlier batches.
/// Members of a batch keep declaration order.
fn parallel_batches(nodes: &[Node], index: &HashMap<NodeId, usize>) -> Result<Vec<Vec<usize>>> {
    let mut batches = Vec::new();
    let mut done: HashSet<usize> = HashSet::new();

    while done.len() < nodes.len() {
        let ready: Vec<usize> = (0..nodes.len())
            .filter(|i| !done.contains(i))
            .filter(|&i| nodes[i].upstream.iter().all(|up| done.contains(&index[up])))
            .collect();

        if ready.is_empty() {
            let stuck: Vec<String> = (0..nodes.len())
                .filter(|i| !done.contains(i))
                .map(|i| nodes[i].id.to_string())
                .collect();
            return Err(PipelineError::Config(format!(
                "dependency cycle among nodes: {}",
                stuck.join(", ")
            )));
        }

        done.extend(ready.iter().copied());
        batches.push(ready);
    }

    Ok(batches)
}
