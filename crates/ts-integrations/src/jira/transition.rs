//! Status transition planner.
//!
//! Walks a ticket from its live status to a named target status over one of
//! two workflow graphs. Every hop is verified by re-reading the ticket, so a
//! transition that lands on an unexpected intermediate status is tolerated.

use std::collections::HashMap;

use thiserror::Error;
use ts_core::config::{WorkflowConfig, WorkflowGraphConfig};

use super::{JiraError, Tracker};

#[derive(Debug, Error)]
pub enum TransitionError {
    /// The target status name is not in the graph's status table.
    #[error("unknown target status '{status}'")]
    UnknownStatus { status: String },

    /// The ticket sits on a status with no outgoing edges.
    #[error("{key}: workflow graph has no edges leaving status {status_id}")]
    GraphIncomplete { key: String, status_id: u64 },

    #[error("{key}: '{target}' not reached after {steps} transitions")]
    StepLimitExceeded {
        key: String,
        target: String,
        steps: u32,
    },

    /// The tracker returned the ticket without a parseable status id.
    #[error("{key}: ticket has no status id")]
    MissingStatus { key: String },

    #[error(transparent)]
    Tracker(#[from] JiraError),
}

pub type Result<T> = std::result::Result<T, TransitionError>;

/// One outgoing edge: the status name it leads to and the transition id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub to: String,
    pub transition: u64,
}

/// A single workflow graph: status names to ids, and ordered edges per
/// status id.
#[derive(Debug, Clone, Default)]
pub struct WorkflowGraph {
    statuses: HashMap<String, u64>,
    edges: HashMap<u64, Vec<Edge>>,
    /// First status of the table, where new tickets start.
    entry: Option<u64>,
}

impl WorkflowGraph {
    pub fn from_config(config: &WorkflowGraphConfig) -> Self {
        let statuses = config
            .statuses
            .iter()
            .map(|s| (s.name.clone(), s.id))
            .collect();
        let mut edges: HashMap<u64, Vec<Edge>> = HashMap::new();
        for edge in &config.edges {
            edges.entry(edge.from).or_default().push(Edge {
                to: edge.to.clone(),
                transition: edge.transition,
            });
        }
        Self {
            statuses,
            edges,
            entry: config.statuses.first().map(|s| s.id),
        }
    }

    pub fn status_id(&self, name: &str) -> Option<u64> {
        self.statuses.get(name).copied()
    }

    pub fn edges_from(&self, status_id: u64) -> &[Edge] {
        self.edges.get(&status_id).map(Vec::as_slice).unwrap_or_default()
    }

    /// The direct edge to `target` when one exists, else the first edge
    /// leaving `current`.
    pub fn next_edge(&self, current: u64, target: &str) -> Option<&Edge> {
        let edges = self.edges_from(current);
        edges.iter().find(|e| e.to == target).or_else(|| edges.first())
    }

    pub fn next_transition(&self, current: u64, target: &str) -> Option<u64> {
        self.next_edge(current, target).map(|e| e.transition)
    }
}

/// Picks the graph by issue type and drives the walk against a [`Tracker`].
#[derive(Debug, Clone)]
pub struct TransitionPlanner {
    standard: WorkflowGraph,
    subtask: WorkflowGraph,
    subtask_type: String,
    max_steps: u32,
}

impl TransitionPlanner {
    pub fn from_config(workflow: &WorkflowConfig, subtask_type: &str) -> Self {
        Self {
            standard: WorkflowGraph::from_config(&workflow.standard),
            subtask: WorkflowGraph::from_config(&workflow.subtask),
            subtask_type: subtask_type.to_string(),
            max_steps: workflow.max_transition_steps,
        }
    }

    pub fn graph_for(&self, issue_type: Option<&str>) -> &WorkflowGraph {
        if issue_type == Some(self.subtask_type.as_str()) {
            &self.subtask
        } else {
            &self.standard
        }
    }

    /// Whether `status_id` lies on the walk from the graph's entry status to
    /// `target`, excluding `target` itself. Such a ticket was created but
    /// never finished its initial walk.
    pub fn precedes(&self, issue_type: Option<&str>, status_id: u64, target: &str) -> bool {
        let graph = self.graph_for(issue_type);
        let (Some(target_id), Some(mut current)) = (graph.status_id(target), graph.entry) else {
            return false;
        };
        for _ in 0..self.max_steps {
            if current == target_id {
                return false;
            }
            if current == status_id {
                return true;
            }
            match graph
                .next_edge(current, target)
                .and_then(|e| graph.status_id(&e.to))
            {
                Some(next) => current = next,
                None => return false,
            }
        }
        false
    }

    /// Transition `key` until its live status is `target`. Returns the
    /// number of transitions applied.
    pub async fn walk(&self, tracker: &dyn Tracker, key: &str, target: &str) -> Result<u32> {
        let mut ticket = tracker.get(key).await?;
        let graph = self.graph_for(ticket.issue_type());
        let target_id = graph
            .status_id(target)
            .ok_or_else(|| TransitionError::UnknownStatus {
                status: target.to_string(),
            })?;

        let mut steps = 0;
        loop {
            let current = ticket.status_id().ok_or_else(|| TransitionError::MissingStatus {
                key: key.to_string(),
            })?;
            if current == target_id {
                tracing::debug!(key, target, steps, "target status reached");
                return Ok(steps);
            }
            if steps >= self.max_steps {
                return Err(TransitionError::StepLimitExceeded {
                    key: key.to_string(),
                    target: target.to_string(),
                    steps,
                });
            }
            let transition = graph.next_transition(current, target).ok_or_else(|| {
                TransitionError::GraphIncomplete {
                    key: key.to_string(),
                    status_id: current,
                }
            })?;

            tracing::debug!(key, from = current, transition, "applying transition");
            tracker.transition(key, transition).await?;
            steps += 1;
            ticket = tracker.get(key).await?;
        }
    }
}
