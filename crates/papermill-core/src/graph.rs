//! Workflow graph — declarative step topology with explicit edge kinds.
//!
//! Each node names the adapter and intent it targets; each node carries one
//! outgoing edge. The revision loop is an explicit `BoundedLoop` edge
//! (predicate + counter) rather than a bare self-edge, so the bound can be
//! unit-tested without running the Supervisor.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::contract::{self, AgentId, Intent};
use crate::error::CoreError;
use crate::models::Task;

/// Steps of the paper-writing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepId {
    Literature,
    Stats,
    Write,
    Merge,
    Compliance,
    Revise,
}

impl StepId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Literature => "literature",
            Self::Stats => "stats",
            Self::Write => "write",
            Self::Merge => "merge",
            Self::Compliance => "compliance",
            Self::Revise => "revise",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "literature" => Some(Self::Literature),
            "stats" => Some(Self::Stats),
            "write" => Some(Self::Write),
            "merge" => Some(Self::Merge),
            "compliance" => Some(Self::Compliance),
            "revise" => Some(Self::Revise),
            _ => None,
        }
    }
}

/// Where an edge leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Step(StepId),
    End,
}

pub type Predicate = Arc<dyn Fn(&Task) -> bool + Send + Sync>;

/// Outgoing edge of a node.
pub enum Edge {
    /// Always proceed to the target.
    Always(Target),
    /// Route on a predicate over accumulated task state.
    Conditional {
        predicate: Predicate,
        on_true: Target,
        on_false: Target,
    },
    /// Loop back while the predicate holds, at most `max_rounds` times.
    /// Once the counter would pass the bound the loop is exhausted
    /// regardless of the predicate.
    BoundedLoop {
        predicate: Predicate,
        back_to: StepId,
        max_rounds: u32,
        exit: Target,
    },
}

/// A node: which adapter and intent this step invokes.
#[derive(Debug, Clone, Copy)]
pub struct StepNode {
    pub agent: AgentId,
    pub intent: Intent,
}

/// Routing decision for the Supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Proceed to a step over a plain or conditional edge.
    Step(StepId),
    /// Traverse a bounded loop edge; the Supervisor increments the
    /// revision counter.
    Loop(StepId),
    /// The loop bound is reached; the task needs manual intervention.
    LoopExhausted,
    End,
}

/// Static, versioned workflow definition.
pub struct WorkflowGraph {
    pub name: &'static str,
    pub version: &'static str,
    entry: StepId,
    nodes: HashMap<StepId, StepNode>,
    edges: HashMap<StepId, Edge>,
}

impl WorkflowGraph {
    /// Reference topology:
    /// literature → stats → write → merge → compliance →
    /// { End if score ≥ threshold, else bounded loop to revise } ;
    /// revise → write.
    pub fn imrad(compliance_threshold: f64, max_revision_rounds: u32) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            StepId::Literature,
            StepNode {
                agent: AgentId::Literature,
                intent: Intent::SearchLiterature,
            },
        );
        nodes.insert(
            StepId::Stats,
            StepNode {
                agent: AgentId::Statistics,
                intent: Intent::AnalyzeData,
            },
        );
        nodes.insert(
            StepId::Write,
            StepNode {
                agent: AgentId::Writing,
                intent: Intent::DraftSection,
            },
        );
        nodes.insert(
            StepId::Merge,
            StepNode {
                agent: AgentId::Writing,
                intent: Intent::ComposeManuscript,
            },
        );
        nodes.insert(
            StepId::Compliance,
            StepNode {
                agent: AgentId::Compliance,
                intent: Intent::EvaluateChecklist,
            },
        );
        nodes.insert(
            StepId::Revise,
            StepNode {
                agent: AgentId::Writing,
                intent: Intent::PlanRevision,
            },
        );

        let below_threshold: Predicate = Arc::new(move |task: &Task| {
            task.compliance_score()
                .map(|score| score < compliance_threshold)
                .unwrap_or(true)
        });

        let mut edges = HashMap::new();
        edges.insert(StepId::Literature, Edge::Always(Target::Step(StepId::Stats)));
        edges.insert(StepId::Stats, Edge::Always(Target::Step(StepId::Write)));
        edges.insert(StepId::Write, Edge::Always(Target::Step(StepId::Merge)));
        edges.insert(StepId::Merge, Edge::Always(Target::Step(StepId::Compliance)));
        edges.insert(
            StepId::Compliance,
            Edge::BoundedLoop {
                predicate: below_threshold,
                back_to: StepId::Revise,
                max_rounds: max_revision_rounds,
                exit: Target::End,
            },
        );
        edges.insert(StepId::Revise, Edge::Always(Target::Step(StepId::Write)));

        Self {
            name: "imrad",
            version: "1",
            entry: StepId::Literature,
            nodes,
            edges,
        }
    }

    pub fn entry(&self) -> StepId {
        self.entry
    }

    /// Qualified name persisted on tasks, e.g. `imrad@1`.
    pub fn qualified_name(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }

    pub fn node(&self, step: StepId) -> Option<&StepNode> {
        self.nodes.get(&step)
    }

    /// Evaluate the routing function for `current` over the task state.
    pub fn next(&self, current: StepId, task: &Task) -> Route {
        let Some(edge) = self.edges.get(&current) else {
            return Route::End;
        };
        match edge {
            Edge::Always(target) => Self::route(*target),
            Edge::Conditional {
                predicate,
                on_true,
                on_false,
            } => {
                if predicate(task) {
                    Self::route(*on_true)
                } else {
                    Self::route(*on_false)
                }
            }
            Edge::BoundedLoop {
                predicate,
                back_to,
                max_rounds,
                exit,
            } => {
                if !predicate(task) {
                    return Self::route(*exit);
                }
                if task.revision_round + 1 >= *max_rounds {
                    Route::LoopExhausted
                } else {
                    Route::Loop(*back_to)
                }
            }
        }
    }

    fn route(target: Target) -> Route {
        match target {
            Target::Step(step) => Route::Step(step),
            Target::End => Route::End,
        }
    }

    /// Static validation: every node's intent is registered for its agent,
    /// every edge points at an existing node, and the entry exists.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.nodes.contains_key(&self.entry) {
            return Err(CoreError::Internal(format!(
                "workflow {}: entry step {} has no node",
                self.name,
                self.entry.as_str()
            )));
        }
        for (step, node) in &self.nodes {
            if !contract::accepts(node.agent, node.intent) {
                return Err(CoreError::Internal(format!(
                    "workflow {}: step {} targets unregistered intent {} on {}",
                    self.name,
                    step.as_str(),
                    node.intent.as_str(),
                    node.agent.as_str()
                )));
            }
        }
        for (step, edge) in &self.edges {
            for target in edge_targets(edge) {
                if let Target::Step(next) = target {
                    if !self.nodes.contains_key(&next) {
                        return Err(CoreError::Internal(format!(
                            "workflow {}: edge from {} points at unknown step {}",
                            self.name,
                            step.as_str(),
                            next.as_str()
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

fn edge_targets(edge: &Edge) -> Vec<Target> {
    match edge {
        Edge::Always(t) => vec![*t],
        Edge::Conditional {
            on_true, on_false, ..
        } => vec![*on_true, *on_false],
        Edge::BoundedLoop { back_to, exit, .. } => vec![Target::Step(*back_to), *exit],
    }
}
