//! Graph engine: drives a [`WorkflowState`] through the stage graph.
//!
//! Execution is strictly sequential — one stage at a time, merge the stage's
//! partial update, then consult the edge table for the next stage. The graph
//! contains cycles that are expected to terminate via judgment-driven
//! routing but are not provably bounded, so every run carries a step budget:
//! each stage visit costs one step, and exhausting the budget fails the run
//! with [`WorkflowError::RecursionLimitExceeded`] carrying the final state.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{CapabilityError, WorkflowError};
use crate::graph::{BuiltGraph, GraphBuildError, END};
use crate::state::{StateUpdate, WorkflowState};

/// What one stage visit produced: a partial state update, plus a route label
/// when the stage sits on conditional edges.
#[derive(Debug)]
pub struct StageOutcome {
    /// Fields the stage changed.
    pub update: StateUpdate,

    /// Route label selecting among the stage's conditional edges. `None` for
    /// stages with a single fixed successor.
    pub route: Option<String>,
}

impl StageOutcome {
    /// Outcome for a stage with an unconditional successor.
    pub fn update(update: StateUpdate) -> Self {
        Self {
            update,
            route: None,
        }
    }

    /// Outcome for a stage that selects its successor by label.
    pub fn routed(update: StateUpdate, label: impl Into<String>) -> Self {
        Self {
            update,
            route: Some(label.into()),
        }
    }
}

/// A named processing step over the workflow state.
///
/// Stages read the state and return a [`StageOutcome`]; they never mutate the
/// state in place. A capability fault propagates unless the stage defines its
/// own fallback.
#[async_trait]
pub trait Stage: Send + Sync {
    async fn run(&self, state: &WorkflowState) -> Result<StageOutcome, CapabilityError>;
}

/// Owns the stage registry and the edge table, and executes runs.
pub struct GraphEngine {
    graph: BuiltGraph,
    stages: HashMap<String, Box<dyn Stage>>,
}

impl GraphEngine {
    /// Create an engine for a built graph with an empty stage registry.
    pub fn new(graph: BuiltGraph) -> Self {
        Self {
            graph,
            stages: HashMap::new(),
        }
    }

    /// Register the implementation for a declared stage.
    pub fn register(mut self, name: impl Into<String>, stage: impl Stage + 'static) -> Self {
        self.stages.insert(name.into(), Box::new(stage));
        self
    }

    /// Check that every declared stage has a registered implementation.
    pub fn validate(&self) -> Result<(), GraphBuildError> {
        for name in self.graph.stage_names() {
            if !self.stages.contains_key(name) {
                return Err(GraphBuildError::UnknownStage(name.clone()));
            }
        }
        Ok(())
    }

    /// The graph topology this engine executes.
    pub fn graph(&self) -> &BuiltGraph {
        &self.graph
    }

    /// Run the workflow for a question under a step budget.
    pub async fn run(
        &self,
        question: impl Into<String>,
        step_budget: usize,
    ) -> Result<WorkflowState, WorkflowError> {
        self.run_with_cancellation(question, step_budget, CancellationToken::new())
            .await
    }

    /// Run the workflow, checking the cancellation token between stages.
    ///
    /// Cancelling an in-flight capability call is the capability client's
    /// responsibility; the engine only stops advancing.
    pub async fn run_with_cancellation(
        &self,
        question: impl Into<String>,
        step_budget: usize,
        cancel: CancellationToken,
    ) -> Result<WorkflowState, WorkflowError> {
        let mut state = WorkflowState::new(question);
        let mut current = self.graph.entry().to_string();
        let mut remaining = step_budget;

        info!(
            graph = self.graph.name(),
            entry = %current,
            step_budget,
            "starting workflow run"
        );

        loop {
            if cancel.is_cancelled() {
                return Err(WorkflowError::Cancelled {
                    state: Box::new(state),
                });
            }
            if remaining == 0 {
                return Err(WorkflowError::RecursionLimitExceeded {
                    limit: step_budget,
                    state: Box::new(state),
                });
            }
            remaining -= 1;

            let stage = self
                .stages
                .get(&current)
                .ok_or_else(|| WorkflowError::UnknownStage(current.clone()))?;

            debug!(stage = %current, remaining, "executing stage");

            let outcome = match stage.run(&state).await {
                Ok(outcome) => outcome,
                Err(fault) => {
                    return Err(WorkflowError::Capability {
                        stage: current,
                        source: fault,
                        state: Box::new(state),
                    });
                }
            };

            state.apply(outcome.update);

            let next = match outcome.route {
                Some(label) => {
                    let target = self.graph.route(&current, &label).ok_or_else(|| {
                        WorkflowError::UnknownRoute {
                            stage: current.clone(),
                            label: label.clone(),
                        }
                    })?;
                    debug!(stage = %current, route = %label, target, "conditional transition");
                    target.to_string()
                }
                None => self
                    .graph
                    .successor(&current)
                    .ok_or_else(|| WorkflowError::MissingEdge(current.clone()))?
                    .to_string(),
            };

            if next == END {
                info!(
                    graph = self.graph.name(),
                    steps_used = step_budget - remaining,
                    "workflow reached END"
                );
                return Ok(state);
            }
            current = next;
        }
    }
}
