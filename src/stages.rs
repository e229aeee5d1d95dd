//! The five processing stages of the answering workflow.
//!
//! Stage graph, with route labels in brackets:
//!
//! ```text
//! Retrieve Documents ──▶ Evaluate Documents ──[Search Online]──▶ Search Online
//!                              │                                     │
//!                       [Generate Answer]                            ▼
//!                              └───────────────────────▶ Generate Answer
//!                                                              │
//!                                                              ▼
//!                                                       Check Solution
//!                        [Hallucinations detected] ─▶ Generate Answer
//!                        [Question not addressed]  ─▶ Search Online
//!                        [Answers Question]        ─▶ END
//! ```
//!
//! Each stage holds the capability handle it drives and returns a partial
//! [`StateUpdate`]; routing decisions are returned as labels resolved against
//! the engine's edge table.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::capability::{
    AnswerGenerator, CoverageJudge, FaithfulnessJudge, RelevanceJudge, Retriever, WebSearch,
};
use crate::engine::{Stage, StageOutcome};
use crate::error::CapabilityError;
use crate::state::{Document, StateUpdate, WorkflowState};

/// Stage names, as registered in the graph.
pub const RETRIEVE: &str = "Retrieve Documents";
pub const EVALUATE: &str = "Evaluate Documents";
pub const SEARCH_ONLINE: &str = "Search Online";
pub const GENERATE_ANSWER: &str = "Generate Answer";
pub const CHECK_SOLUTION: &str = "Check Solution";

/// Route labels on the conditional edges.
pub const ROUTE_SEARCH_ONLINE: &str = "Search Online";
pub const ROUTE_GENERATE_ANSWER: &str = "Generate Answer";
pub const ROUTE_HALLUCINATIONS: &str = "Hallucinations detected";
pub const ROUTE_ANSWERS_QUESTION: &str = "Answers Question";
pub const ROUTE_NOT_ADDRESSED: &str = "Question not addressed";

/// Minimum fraction of relevant documents below which the workflow falls
/// back to an online search.
pub const RELEVANT_RATIO_FLOOR: f64 = 0.7;

/// Confidence thresholds injected into the judgment-driven stages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageThresholds {
    /// A document counts as relevant at or above this confidence (inclusive).
    pub relevance: f64,

    /// An answer with faithfulness confidence at or below this is treated as
    /// hallucinated and regenerated.
    pub faithfulness: f64,

    /// An answer needs coverage confidence strictly above this to be
    /// released.
    pub coverage: f64,
}

impl Default for StageThresholds {
    fn default() -> Self {
        Self {
            relevance: 0.75,
            faithfulness: 0.65,
            coverage: 0.65,
        }
    }
}

/// Relevance router predicate: pure function of the post-evaluate state flag.
pub fn relevance_route(needs_web_search: bool) -> &'static str {
    if needs_web_search {
        ROUTE_SEARCH_ONLINE
    } else {
        ROUTE_GENERATE_ANSWER
    }
}

/// Fetches local evidence for the question.
///
/// The only stage with a built-in fallback: a retriever fault is treated as
/// "no local evidence" rather than a fatal error, so the run proceeds toward
/// the online search instead of halting.
pub struct RetrieveStage {
    retriever: Arc<dyn Retriever>,
}

impl RetrieveStage {
    pub fn new(retriever: Arc<dyn Retriever>) -> Self {
        Self { retriever }
    }
}

#[async_trait]
impl Stage for RetrieveStage {
    async fn run(&self, state: &WorkflowState) -> Result<StageOutcome, CapabilityError> {
        match self.retriever.fetch(&state.question).await {
            Ok(documents) => {
                debug!(count = documents.len(), "retrieved local documents");
                Ok(StageOutcome::update(
                    StateUpdate::empty().with_documents(documents),
                ))
            }
            Err(err) => {
                warn!(error = %err, "retrieval failed, continuing with empty evidence");
                Ok(StageOutcome::update(
                    StateUpdate::empty()
                        .with_documents(Vec::new())
                        .with_needs_web_search(true),
                ))
            }
        }
    }
}

/// Scores every candidate document and keeps the relevant subset.
///
/// Judgments are collected in document order and recorded pre-filter as an
/// audit trail; the retained subset replaces `documents`. The stage also
/// decides the relevance route: when fewer than [`RELEVANT_RATIO_FLOOR`] of
/// the candidates clear the relevance threshold, the workflow searches
/// online before answering.
pub struct EvaluateStage {
    judge: Arc<dyn RelevanceJudge>,
    relevance_threshold: f64,
}

impl EvaluateStage {
    pub fn new(judge: Arc<dyn RelevanceJudge>, relevance_threshold: f64) -> Self {
        Self {
            judge,
            relevance_threshold,
        }
    }
}

#[async_trait]
impl Stage for EvaluateStage {
    async fn run(&self, state: &WorkflowState) -> Result<StageOutcome, CapabilityError> {
        // Empty candidate set: ratio is 0 by definition, no judge calls.
        if state.documents.is_empty() {
            debug!("no candidate documents, forcing online search");
            return Ok(StageOutcome::routed(
                StateUpdate::empty()
                    .with_documents(Vec::new())
                    .with_document_judgments(Vec::new())
                    .with_needs_web_search(true),
                relevance_route(true),
            ));
        }

        let mut judgments = Vec::with_capacity(state.documents.len());
        let mut retained = Vec::new();

        for document in &state.documents {
            let judgment = self.judge.score(&state.question, document).await?;
            // Inclusive threshold: exactly at the boundary is retained.
            if judgment.valid && judgment.confidence >= self.relevance_threshold {
                retained.push(document.clone());
            }
            judgments.push(judgment);
        }

        let relevant = judgments
            .iter()
            .filter(|j| j.confidence >= self.relevance_threshold)
            .count();
        let ratio = relevant as f64 / judgments.len() as f64;
        let needs_web_search = ratio < RELEVANT_RATIO_FLOOR;

        debug!(
            total = judgments.len(),
            retained = retained.len(),
            ratio,
            needs_web_search,
            "evaluated candidate documents"
        );

        Ok(StageOutcome::routed(
            StateUpdate::empty()
                .with_documents(retained)
                .with_document_judgments(judgments)
                .with_needs_web_search(needs_web_search),
            relevance_route(needs_web_search),
        ))
    }
}

/// Searches the web and appends the results to the current evidence.
///
/// One [`Document`] per search result, content trimmed. Web results
/// supplement local evidence; they never replace it.
pub struct SearchOnlineStage {
    search: Arc<dyn WebSearch>,
    result_count: usize,
}

impl SearchOnlineStage {
    pub fn new(search: Arc<dyn WebSearch>, result_count: usize) -> Self {
        Self {
            search,
            result_count,
        }
    }
}

#[async_trait]
impl Stage for SearchOnlineStage {
    async fn run(&self, state: &WorkflowState) -> Result<StageOutcome, CapabilityError> {
        let results = self.search.search(&state.question, self.result_count).await?;
        debug!(count = results.len(), "fetched web results");

        let mut documents = state.documents.clone();
        documents.extend(results.into_iter().map(|doc| Document {
            content: doc.content.trim().to_string(),
            source: doc.source,
        }));

        Ok(StageOutcome::update(
            StateUpdate::empty().with_documents(documents),
        ))
    }
}

/// Generates a candidate answer from the question and the current evidence.
///
/// No fallback here: a generator fault is a hard failure of the run.
pub struct GenerateAnswerStage {
    generator: Arc<dyn AnswerGenerator>,
}

impl GenerateAnswerStage {
    pub fn new(generator: Arc<dyn AnswerGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl Stage for GenerateAnswerStage {
    async fn run(&self, state: &WorkflowState) -> Result<StageOutcome, CapabilityError> {
        let solution = self
            .generator
            .generate(&state.question, &state.documents)
            .await?;
        Ok(StageOutcome::update(
            StateUpdate::empty().with_solution(solution),
        ))
    }
}

/// Validation gate: checks the answer against the evidence and the question.
///
/// Faithfulness is checked first. An answer that is invalid or at or below
/// the faithfulness threshold short-circuits to regeneration without ever
/// invoking the coverage judge. A faithful answer is then checked for
/// question coverage: passing releases it (END), failing sends the run back
/// to the online search for more evidence. Judgments computed on the taken
/// branch are merged into state before the route is returned.
pub struct CheckSolutionStage {
    faithfulness: Arc<dyn FaithfulnessJudge>,
    coverage: Arc<dyn CoverageJudge>,
    thresholds: StageThresholds,
}

impl CheckSolutionStage {
    pub fn new(
        faithfulness: Arc<dyn FaithfulnessJudge>,
        coverage: Arc<dyn CoverageJudge>,
        thresholds: StageThresholds,
    ) -> Self {
        Self {
            faithfulness,
            coverage,
            thresholds,
        }
    }
}

#[async_trait]
impl Stage for CheckSolutionStage {
    async fn run(&self, state: &WorkflowState) -> Result<StageOutcome, CapabilityError> {
        // The graph guarantees a generation pass precedes this stage.
        let solution = state.solution.as_deref().unwrap_or_default();

        let faithfulness = self
            .faithfulness
            .score(&state.documents, solution)
            .await?;

        if !faithfulness.valid || faithfulness.confidence <= self.thresholds.faithfulness {
            debug!(
                valid = faithfulness.valid,
                confidence = faithfulness.confidence,
                "answer not grounded in evidence, regenerating"
            );
            return Ok(StageOutcome::routed(
                StateUpdate::empty().with_faithfulness(faithfulness),
                ROUTE_HALLUCINATIONS,
            ));
        }

        let coverage = self.coverage.score(&state.question, solution).await?;
        let label = if coverage.valid && coverage.confidence > self.thresholds.coverage {
            ROUTE_ANSWERS_QUESTION
        } else {
            ROUTE_NOT_ADDRESSED
        };

        debug!(
            faithfulness = faithfulness.confidence,
            coverage = coverage.confidence,
            route = label,
            "validated candidate answer"
        );

        Ok(StageOutcome::routed(
            StateUpdate::empty()
                .with_faithfulness(faithfulness)
                .with_coverage(coverage),
            label,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Judgment;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedRetriever(Vec<Document>);

    #[async_trait]
    impl Retriever for FixedRetriever {
        async fn fetch(&self, _question: &str) -> Result<Vec<Document>, CapabilityError> {
            Ok(self.0.clone())
        }
    }

    struct FaultingRetriever;

    #[async_trait]
    impl Retriever for FaultingRetriever {
        async fn fetch(&self, _question: &str) -> Result<Vec<Document>, CapabilityError> {
            Err(CapabilityError::Timeout)
        }
    }

    /// Judge that replays a fixed sequence of judgments and counts calls.
    struct ScriptedJudge {
        script: Vec<Judgment>,
        calls: AtomicUsize,
    }

    impl ScriptedJudge {
        fn new(script: Vec<Judgment>) -> Self {
            Self {
                script,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RelevanceJudge for ScriptedJudge {
        async fn score(
            &self,
            _question: &str,
            _document: &Document,
        ) -> Result<Judgment, CapabilityError> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.script[i % self.script.len()])
        }
    }

    struct FixedSearch(Vec<Document>);

    #[async_trait]
    impl WebSearch for FixedSearch {
        async fn search(
            &self,
            _question: &str,
            k: usize,
        ) -> Result<Vec<Document>, CapabilityError> {
            Ok(self.0.iter().take(k).cloned().collect())
        }
    }

    struct EchoGenerator;

    #[async_trait]
    impl AnswerGenerator for EchoGenerator {
        async fn generate(
            &self,
            question: &str,
            documents: &[Document],
        ) -> Result<String, CapabilityError> {
            Ok(format!("{question}: {} documents", documents.len()))
        }
    }

    struct FixedFaithfulness(Judgment);

    #[async_trait]
    impl FaithfulnessJudge for FixedFaithfulness {
        async fn score(
            &self,
            _documents: &[Document],
            _answer: &str,
        ) -> Result<Judgment, CapabilityError> {
            Ok(self.0)
        }
    }

    struct CountingCoverage {
        judgment: Judgment,
        calls: AtomicUsize,
    }

    impl CountingCoverage {
        fn new(judgment: Judgment) -> Self {
            Self {
                judgment,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CoverageJudge for CountingCoverage {
        async fn score(&self, _question: &str, _answer: &str) -> Result<Judgment, CapabilityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.judgment)
        }
    }

    fn docs(n: usize) -> Vec<Document> {
        (0..n).map(|i| Document::new(format!("doc {i}"))).collect()
    }

    #[tokio::test]
    async fn test_retrieve_replaces_documents() {
        let stage = RetrieveStage::new(Arc::new(FixedRetriever(docs(3))));
        let state = WorkflowState::new("q");

        let outcome = stage.run(&state).await.unwrap();

        assert_eq!(outcome.update.documents.unwrap().len(), 3);
        assert!(outcome.route.is_none());
        assert!(outcome.update.needs_web_search.is_none());
    }

    #[tokio::test]
    async fn test_retrieve_fault_falls_back_to_empty_evidence() {
        let stage = RetrieveStage::new(Arc::new(FaultingRetriever));
        let state = WorkflowState::new("q");

        let outcome = stage.run(&state).await.unwrap();

        assert_eq!(outcome.update.documents, Some(Vec::new()));
        assert_eq!(outcome.update.needs_web_search, Some(true));
    }

    #[tokio::test]
    async fn test_evaluate_empty_input_skips_judge() {
        let judge = Arc::new(ScriptedJudge::new(vec![Judgment::new(true, 1.0)]));
        let stage = EvaluateStage::new(judge.clone(), 0.75);
        let state = WorkflowState::new("q");

        let outcome = stage.run(&state).await.unwrap();

        assert_eq!(judge.calls(), 0);
        assert_eq!(outcome.update.needs_web_search, Some(true));
        assert_eq!(outcome.route.as_deref(), Some(ROUTE_SEARCH_ONLINE));
        assert_eq!(outcome.update.document_judgments, Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_evaluate_filter_boundary_is_inclusive() {
        let judge = Arc::new(ScriptedJudge::new(vec![
            Judgment::new(true, 0.75),
            Judgment::new(true, 0.7499),
        ]));
        let stage = EvaluateStage::new(judge, 0.75);
        let mut state = WorkflowState::new("q");
        state.documents = docs(2);

        let outcome = stage.run(&state).await.unwrap();

        let retained = outcome.update.documents.unwrap();
        assert_eq!(retained.len(), 1);
        assert_eq!(retained[0].content, "doc 0");
        // Judgment trail covers the pre-filter list.
        assert_eq!(outcome.update.document_judgments.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_evaluate_drops_invalid_even_at_high_confidence() {
        let judge = Arc::new(ScriptedJudge::new(vec![Judgment::new(false, 0.9)]));
        let stage = EvaluateStage::new(judge, 0.75);
        let mut state = WorkflowState::new("q");
        state.documents = docs(1);

        let outcome = stage.run(&state).await.unwrap();

        assert!(outcome.update.documents.unwrap().is_empty());
        // The ratio counts confidence only, so 1/1 >= 0.7: no web search.
        assert_eq!(outcome.update.needs_web_search, Some(false));
    }

    #[tokio::test]
    async fn test_evaluate_all_relevant_skips_web_search() {
        let judge = Arc::new(ScriptedJudge::new(vec![Judgment::new(true, 1.0)]));
        let stage = EvaluateStage::new(judge, 0.75);
        let mut state = WorkflowState::new("q");
        state.documents = docs(4);

        let outcome = stage.run(&state).await.unwrap();

        assert_eq!(outcome.update.needs_web_search, Some(false));
        assert_eq!(outcome.route.as_deref(), Some(ROUTE_GENERATE_ANSWER));
    }

    #[tokio::test]
    async fn test_evaluate_low_ratio_routes_to_search() {
        // 1 of 4 relevant: ratio 0.25 < 0.7.
        let judge = Arc::new(ScriptedJudge::new(vec![
            Judgment::new(true, 0.9),
            Judgment::new(true, 0.2),
            Judgment::new(true, 0.3),
            Judgment::new(true, 0.1),
        ]));
        let stage = EvaluateStage::new(judge, 0.75);
        let mut state = WorkflowState::new("q");
        state.documents = docs(4);

        let outcome = stage.run(&state).await.unwrap();

        assert_eq!(outcome.update.needs_web_search, Some(true));
        assert_eq!(outcome.route.as_deref(), Some(ROUTE_SEARCH_ONLINE));
    }

    #[tokio::test]
    async fn test_search_online_appends() {
        let results = vec![
            Document::new("  web one  "),
            Document::new("web two").with_source("https://b.example"),
        ];
        let stage = SearchOnlineStage::new(Arc::new(FixedSearch(results)), 5);
        let mut state = WorkflowState::new("q");
        state.documents = docs(2);

        let outcome = stage.run(&state).await.unwrap();

        let merged = outcome.update.documents.unwrap();
        assert_eq!(merged.len(), 4);
        // Local evidence first, web results after, trimmed.
        assert_eq!(merged[0].content, "doc 0");
        assert_eq!(merged[2].content, "web one");
        assert_eq!(merged[3].source.as_deref(), Some("https://b.example"));
    }

    #[tokio::test]
    async fn test_search_online_respects_result_count() {
        let stage = SearchOnlineStage::new(Arc::new(FixedSearch(docs(10))), 3);
        let state = WorkflowState::new("q");

        let outcome = stage.run(&state).await.unwrap();
        assert_eq!(outcome.update.documents.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_generate_answer_sets_solution() {
        let stage = GenerateAnswerStage::new(Arc::new(EchoGenerator));
        let mut state = WorkflowState::new("why");
        state.documents = docs(2);

        let outcome = stage.run(&state).await.unwrap();
        assert_eq!(outcome.update.solution.as_deref(), Some("why: 2 documents"));
    }

    #[tokio::test]
    async fn test_check_solution_short_circuits_on_hallucination() {
        // Invalid faithfulness even at high confidence must not reach the
        // coverage judge.
        let coverage = Arc::new(CountingCoverage::new(Judgment::new(true, 1.0)));
        let stage = CheckSolutionStage::new(
            Arc::new(FixedFaithfulness(Judgment::new(false, 0.9))),
            coverage.clone(),
            StageThresholds::default(),
        );
        let mut state = WorkflowState::new("q");
        state.solution = Some("made up".into());

        let outcome = stage.run(&state).await.unwrap();

        assert_eq!(outcome.route.as_deref(), Some(ROUTE_HALLUCINATIONS));
        assert_eq!(coverage.calls.load(Ordering::SeqCst), 0);
        assert!(outcome.update.faithfulness_judgment.is_some());
        assert!(outcome.update.coverage_judgment.is_none());
    }

    #[tokio::test]
    async fn test_check_solution_faithfulness_boundary_is_exclusive() {
        // Confidence exactly at the threshold still counts as hallucinated.
        let coverage = Arc::new(CountingCoverage::new(Judgment::new(true, 1.0)));
        let stage = CheckSolutionStage::new(
            Arc::new(FixedFaithfulness(Judgment::new(true, 0.65))),
            coverage,
            StageThresholds::default(),
        );
        let mut state = WorkflowState::new("q");
        state.solution = Some("borderline".into());

        let outcome = stage.run(&state).await.unwrap();
        assert_eq!(outcome.route.as_deref(), Some(ROUTE_HALLUCINATIONS));
    }

    #[tokio::test]
    async fn test_check_solution_releases_good_answer() {
        let stage = CheckSolutionStage::new(
            Arc::new(FixedFaithfulness(Judgment::new(true, 0.9))),
            Arc::new(CountingCoverage::new(Judgment::new(true, 0.9))),
            StageThresholds::default(),
        );
        let mut state = WorkflowState::new("q");
        state.solution = Some("good".into());

        let outcome = stage.run(&state).await.unwrap();

        assert_eq!(outcome.route.as_deref(), Some(ROUTE_ANSWERS_QUESTION));
        assert!(outcome.update.faithfulness_judgment.is_some());
        assert!(outcome.update.coverage_judgment.is_some());
    }

    #[tokio::test]
    async fn test_check_solution_uncovered_answer_searches_again() {
        // Faithful but coverage confidence not strictly above the threshold.
        let stage = CheckSolutionStage::new(
            Arc::new(FixedFaithfulness(Judgment::new(true, 0.9))),
            Arc::new(CountingCoverage::new(Judgment::new(true, 0.65))),
            StageThresholds::default(),
        );
        let mut state = WorkflowState::new("q");
        state.solution = Some("partial".into());

        let outcome = stage.run(&state).await.unwrap();
        assert_eq!(outcome.route.as_deref(), Some(ROUTE_NOT_ADDRESSED));
    }

    #[test]
    fn test_relevance_route() {
        assert_eq!(relevance_route(true), ROUTE_SEARCH_ONLINE);
        assert_eq!(relevance_route(false), ROUTE_GENERATE_ANSWER);
    }
}
