//! Workflow engine entry.
//!
//! The dispatcher and scheduler hand runs to this engine; node behavior
//! beyond graph plumbing lives in registered [`NodeHandler`]s, which are
//! external collaborators. Built in here: trigger nodes pass their input
//! through, `output` nodes publish the current value (feeding sync webhook
//! responses through a single-capacity channel), and `workflow_call` nodes
//! re-enter another workflow through the [`WorkflowLookup`] capability
//! with a bounded call depth, since workflows may call themselves
//! transitively.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::{Workflow, WorkflowNode};

/// Upper bound on node visits in one run. Bounds graphs with cycles wired
/// directly into their edges.
const MAX_NODE_VISITS: usize = 256;

/// Upper bound on nested `workflow_call` depth.
const MAX_CALL_DEPTH: usize = 8;

/// Resolves workflow IDs at run time, passed into the engine by reference
/// so `workflow_call` can follow references the graph names.
#[async_trait]
pub trait WorkflowLookup: Send + Sync {
    async fn lookup(&self, workflow_id: &str) -> anyhow::Result<Option<Workflow>>;
}

#[async_trait]
impl WorkflowLookup for crate::store::Store {
    async fn lookup(&self, workflow_id: &str) -> anyhow::Result<Option<Workflow>> {
        self.get_workflow(workflow_id).await
    }
}

/// One node behavior. Implementations live outside the core.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    async fn handle(&self, node: &WorkflowNode, input: Value) -> anyhow::Result<Value>;
}

/// Registry of node handlers by node type.
#[derive(Default)]
pub struct NodeRegistry {
    handlers: HashMap<String, Arc<dyn NodeHandler>>,
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("kinds", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: impl Into<String>, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(kind.into(), handler);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(kind).cloned()
    }
}

/// The graph runner.
pub struct Engine {
    handlers: Arc<NodeRegistry>,
    lookup: Arc<dyn WorkflowLookup>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish()
    }
}

impl Engine {
    pub fn new(handlers: Arc<NodeRegistry>, lookup: Arc<dyn WorkflowLookup>) -> Self {
        Self { handlers, lookup }
    }

    /// Execute one run. `output` receives the value of the first `output`
    /// node that fires; later sends are dropped by the capacity-1 channel.
    /// Cancellation is observed between nodes.
    pub async fn run(
        &self,
        workflow: &Workflow,
        input: Value,
        token: CancellationToken,
        output: Option<mpsc::Sender<Value>>,
    ) -> anyhow::Result<Value> {
        self.run_at_depth(workflow, input, token, output, 0).await
    }

    fn run_at_depth<'a>(
        &'a self,
        workflow: &'a Workflow,
        input: Value,
        token: CancellationToken,
        output: Option<mpsc::Sender<Value>>,
        depth: usize,
    ) -> futures::future::BoxFuture<'a, anyhow::Result<Value>> {
        Box::pin(async move {
            if depth > MAX_CALL_DEPTH {
                anyhow::bail!(
                    "workflow call depth exceeded {MAX_CALL_DEPTH} (cycle in workflow_call?)"
                );
            }

            let Some(entry) = find_entry(workflow) else {
                anyhow::bail!("workflow {} has no entry node", workflow.id);
            };

            let mut outputs = serde_json::Map::new();
            let mut visits = 0usize;
            // Depth-first walk carrying the running value.
            let mut stack: Vec<(String, Value)> = vec![(entry.id.clone(), input)];

            while let Some((node_id, value)) = stack.pop() {
                if token.is_cancelled() {
                    anyhow::bail!("run cancelled");
                }
                visits += 1;
                if visits > MAX_NODE_VISITS {
                    anyhow::bail!("workflow {} exceeded the node visit budget", workflow.id);
                }

                let Some(node) = workflow.graph.nodes.iter().find(|n| n.id == node_id) else {
                    continue;
                };

                let produced = self
                    .execute_node(workflow, node, value, &token, &output, &mut outputs, depth)
                    .await?;

                for next in workflow.graph.successors(&node.id) {
                    stack.push((next.id.clone(), produced.clone()));
                }
            }

            Ok(json!({ "outputs": outputs }))
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_node(
        &self,
        workflow: &Workflow,
        node: &WorkflowNode,
        value: Value,
        token: &CancellationToken,
        output: &Option<mpsc::Sender<Value>>,
        outputs: &mut serde_json::Map<String, Value>,
        depth: usize,
    ) -> anyhow::Result<Value> {
        match node.kind.as_str() {
            kind if kind.ends_with("_trigger") => Ok(value),
            "output" => {
                outputs.insert(node.id.clone(), value.clone());
                if let Some(tx) = output {
                    // Only the first output matters to a sync caller.
                    let _ = tx.try_send(value.clone());
                }
                Ok(value)
            }
            "workflow_call" => {
                let target_id = node
                    .config
                    .get("workflow_id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        anyhow::anyhow!("workflow_call node {} has no workflow_id", node.id)
                    })?;
                let target = self
                    .lookup
                    .lookup(target_id)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("workflow {target_id} not found"))?;
                self.run_at_depth(&target, value, token.clone(), None, depth + 1)
                    .await
            }
            kind => match self.handlers.get(kind) {
                Some(handler) => handler.handle(node, value).await,
                None => {
                    anyhow::bail!(
                        "workflow {} node {} has unknown type \"{kind}\"",
                        workflow.id,
                        node.id
                    )
                }
            },
        }
    }
}

/// Register and spawn a run on a background task. Returns the run ID and,
/// when requested, the single-capacity channel the first `output` node
/// writes to. The task owns the supervisor guard, so completion or panic
/// always clears the active-run table.
pub fn spawn_run(
    state: &crate::AppState,
    workflow: &Workflow,
    input: Value,
    source: crate::domain::RunSource,
    want_output: bool,
) -> (String, Option<mpsc::Receiver<Value>>) {
    let (run_id, token, guard) = state.runs.register(&workflow.id, source);

    let (tx, rx) = if want_output {
        let (tx, rx) = mpsc::channel(1);
        (Some(tx), Some(rx))
    } else {
        (None, None)
    };

    let engine = state.engine.clone();
    let workflow = workflow.clone();
    let task_run_id = run_id.clone();
    tokio::spawn(async move {
        let _guard = guard;
        if let Err(err) = engine.run(&workflow, input, token, tx).await {
            tracing::error!(
                workflow_id = %workflow.id,
                run_id = %task_run_id,
                error = %err,
                "workflow run failed"
            );
        }
    });

    (run_id, rx)
}

/// The entry node: a trigger node if present, otherwise the first node
/// without incoming edges.
fn find_entry(workflow: &Workflow) -> Option<&WorkflowNode> {
    workflow
        .graph
        .nodes
        .iter()
        .find(|n| n.kind.ends_with("_trigger"))
        .or_else(|| {
            workflow
                .graph
                .nodes
                .iter()
                .find(|n| !workflow.graph.edges.iter().any(|e| e.to == n.id))
        })
}
