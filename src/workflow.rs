//! Pre-built adaptive RAG workflow.
//!
//! Wires the five stages and their conditional edges into a [`GraphEngine`]
//! and exposes a question-in, state-out interface. Capability handles are
//! injected so tests (and alternative deployments) can swap any of the six
//! collaborators independently.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::capability::{
    AnswerGenerator, CoverageJudge, FaithfulnessJudge, RelevanceJudge, Retriever, WebSearch,
};
use crate::engine::GraphEngine;
use crate::error::WorkflowError;
use crate::graph::{GraphBuildError, WorkflowGraph, END};
use crate::stages::{
    CheckSolutionStage, EvaluateStage, GenerateAnswerStage, RetrieveStage, SearchOnlineStage,
    StageThresholds, CHECK_SOLUTION, EVALUATE, GENERATE_ANSWER, RETRIEVE, ROUTE_ANSWERS_QUESTION,
    ROUTE_GENERATE_ANSWER, ROUTE_HALLUCINATIONS, ROUTE_NOT_ADDRESSED, ROUTE_SEARCH_ONLINE,
    SEARCH_ONLINE,
};
use crate::state::WorkflowState;

/// Errors raised while assembling the workflow.
#[derive(Debug, Error)]
pub enum WorkflowSetupError {
    #[error("missing capability: {0}")]
    MissingCapability(&'static str),

    #[error(transparent)]
    Graph(#[from] GraphBuildError),
}

/// A ready-to-run adaptive RAG workflow.
pub struct RagWorkflow {
    engine: GraphEngine,
    step_budget: usize,
}

impl std::fmt::Debug for RagWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagWorkflow")
            .field("step_budget", &self.step_budget)
            .finish_non_exhaustive()
    }
}

impl RagWorkflow {
    /// Answer a question under the configured step budget.
    pub async fn answer(
        &self,
        question: impl Into<String>,
    ) -> Result<WorkflowState, WorkflowError> {
        self.engine.run(question, self.step_budget).await
    }

    /// Answer a question, checking the cancellation token between stages.
    pub async fn answer_with_cancellation(
        &self,
        question: impl Into<String>,
        cancel: CancellationToken,
    ) -> Result<WorkflowState, WorkflowError> {
        self.engine
            .run_with_cancellation(question, self.step_budget, cancel)
            .await
    }

    /// The underlying engine, for graph inspection or custom budgets.
    pub fn engine(&self) -> &GraphEngine {
        &self.engine
    }

    /// The step budget used by [`answer`](Self::answer).
    pub fn step_budget(&self) -> usize {
        self.step_budget
    }
}

/// Builder assembling the workflow from capability handles and knobs.
pub struct RagWorkflowBuilder {
    retriever: Option<Arc<dyn Retriever>>,
    relevance_judge: Option<Arc<dyn RelevanceJudge>>,
    web_search: Option<Arc<dyn WebSearch>>,
    answer_generator: Option<Arc<dyn AnswerGenerator>>,
    faithfulness_judge: Option<Arc<dyn FaithfulnessJudge>>,
    coverage_judge: Option<Arc<dyn CoverageJudge>>,
    step_budget: usize,
    search_results: usize,
    thresholds: StageThresholds,
}

impl Default for RagWorkflowBuilder {
    fn default() -> Self {
        Self {
            retriever: None,
            relevance_judge: None,
            web_search: None,
            answer_generator: None,
            faithfulness_judge: None,
            coverage_judge: None,
            step_budget: 10,
            search_results: 5,
            thresholds: StageThresholds::default(),
        }
    }
}

impl RagWorkflowBuilder {
    /// Create a builder with default knobs (budget 10, 5 web results,
    /// thresholds 0.75/0.65/0.65).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the local document retriever.
    pub fn retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Set the per-document relevance judge.
    pub fn relevance_judge(mut self, judge: Arc<dyn RelevanceJudge>) -> Self {
        self.relevance_judge = Some(judge);
        self
    }

    /// Set the live web search.
    pub fn web_search(mut self, search: Arc<dyn WebSearch>) -> Self {
        self.web_search = Some(search);
        self
    }

    /// Set the answer generator.
    pub fn answer_generator(mut self, generator: Arc<dyn AnswerGenerator>) -> Self {
        self.answer_generator = Some(generator);
        self
    }

    /// Set the faithfulness judge.
    pub fn faithfulness_judge(mut self, judge: Arc<dyn FaithfulnessJudge>) -> Self {
        self.faithfulness_judge = Some(judge);
        self
    }

    /// Set the question-coverage judge.
    pub fn coverage_judge(mut self, judge: Arc<dyn CoverageJudge>) -> Self {
        self.coverage_judge = Some(judge);
        self
    }

    /// Maximum stage visits per run. Default: 10.
    pub fn step_budget(mut self, budget: usize) -> Self {
        self.step_budget = budget;
        self
    }

    /// How many web results to fetch per online search. Default: 5.
    pub fn search_results(mut self, k: usize) -> Self {
        self.search_results = k;
        self
    }

    /// Override all three confidence thresholds at once.
    pub fn thresholds(mut self, thresholds: StageThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Relevance threshold for the evaluate stage. Default: 0.75.
    pub fn relevance_threshold(mut self, threshold: f64) -> Self {
        self.thresholds.relevance = threshold;
        self
    }

    /// Faithfulness threshold for the validation gate. Default: 0.65.
    pub fn faithfulness_threshold(mut self, threshold: f64) -> Self {
        self.thresholds.faithfulness = threshold;
        self
    }

    /// Coverage threshold for the validation gate. Default: 0.65.
    pub fn coverage_threshold(mut self, threshold: f64) -> Self {
        self.thresholds.coverage = threshold;
        self
    }

    /// Wire the stage graph and validate it.
    pub fn build(self) -> Result<RagWorkflow, WorkflowSetupError> {
        let retriever = self
            .retriever
            .ok_or(WorkflowSetupError::MissingCapability("retriever"))?;
        let relevance_judge = self
            .relevance_judge
            .ok_or(WorkflowSetupError::MissingCapability("relevance judge"))?;
        let web_search = self
            .web_search
            .ok_or(WorkflowSetupError::MissingCapability("web search"))?;
        let answer_generator = self
            .answer_generator
            .ok_or(WorkflowSetupError::MissingCapability("answer generator"))?;
        let faithfulness_judge = self
            .faithfulness_judge
            .ok_or(WorkflowSetupError::MissingCapability("faithfulness judge"))?;
        let coverage_judge = self
            .coverage_judge
            .ok_or(WorkflowSetupError::MissingCapability("coverage judge"))?;

        let graph = WorkflowGraph::new()
            .name("adaptive_rag")
            .stage(RETRIEVE)
            .stage(EVALUATE)
            .stage(SEARCH_ONLINE)
            .stage(GENERATE_ANSWER)
            .stage(CHECK_SOLUTION)
            .entry(RETRIEVE)
            .edge(RETRIEVE, EVALUATE)
            .conditional_edges(
                EVALUATE,
                vec![
                    (ROUTE_SEARCH_ONLINE, SEARCH_ONLINE),
                    (ROUTE_GENERATE_ANSWER, GENERATE_ANSWER),
                ],
            )
            .edge(SEARCH_ONLINE, GENERATE_ANSWER)
            .edge(GENERATE_ANSWER, CHECK_SOLUTION)
            .conditional_edges(
                CHECK_SOLUTION,
                vec![
                    (ROUTE_HALLUCINATIONS, GENERATE_ANSWER),
                    (ROUTE_ANSWERS_QUESTION, END),
                    (ROUTE_NOT_ADDRESSED, SEARCH_ONLINE),
                ],
            )
            .build()?;

        let engine = GraphEngine::new(graph)
            .register(RETRIEVE, RetrieveStage::new(retriever))
            .register(
                EVALUATE,
                EvaluateStage::new(relevance_judge, self.thresholds.relevance),
            )
            .register(
                SEARCH_ONLINE,
                SearchOnlineStage::new(web_search, self.search_results),
            )
            .register(GENERATE_ANSWER, GenerateAnswerStage::new(answer_generator))
            .register(
                CHECK_SOLUTION,
                CheckSolutionStage::new(faithfulness_judge, coverage_judge, self.thresholds),
            );
        engine.validate()?;

        Ok(RagWorkflow {
            engine,
            step_budget: self.step_budget,
        })
    }
}
