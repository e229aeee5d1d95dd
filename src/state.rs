//! Workflow state and partial updates.
//!
//! One [`WorkflowState`] is created per question, threaded through every
//! stage of the graph, and returned (or attached to the error) when the run
//! terminates. Stages never mutate the state directly: they return a
//! [`StateUpdate`] and the engine merges it field by field, so a stage only
//! touches the fields it actually produced.

use serde::{Deserialize, Serialize};

/// A unit of evidence: opaque text content plus optional provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// The document text.
    pub content: String,

    /// Where the document came from (URL, collection id), if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Document {
    /// Create a document from text content.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source: None,
        }
    }

    /// Attach provenance to the document.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Verdict returned by an external scoring capability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Judgment {
    /// Whether the evaluated artifact passed the check.
    pub valid: bool,

    /// How certain the evaluation is, in `[0, 1]`.
    pub confidence: f64,
}

impl Judgment {
    /// Create a judgment, clamping confidence into `[0, 1]`.
    pub fn new(valid: bool, confidence: f64) -> Self {
        Self {
            valid,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// The record threaded through every stage of one workflow run.
///
/// Single-owner by construction: the engine executing one question holds the
/// only copy, and exactly one stage runs at a time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowState {
    /// The user's question. Set once at entry, never mutated.
    pub question: String,

    /// Current candidate answer. Absent before the first generation pass;
    /// afterwards only replaced, never cleared.
    pub solution: Option<String>,

    /// Set by the evaluate stage, consumed by the relevance router.
    pub needs_web_search: bool,

    /// Current evidence. Replaced by retrieve/evaluate, appended to by the
    /// online search stage. Absence of evidence is the empty vec.
    pub documents: Vec<Document>,

    /// Audit trail of per-document relevance scores from the most recent
    /// evaluate pass, aligned to the *pre-filter* document list.
    pub document_judgments: Vec<Judgment>,

    /// Last faithfulness check of the candidate answer against the evidence.
    pub faithfulness_judgment: Option<Judgment>,

    /// Last check of whether the candidate answer addresses the question.
    pub coverage_judgment: Option<Judgment>,
}

impl WorkflowState {
    /// Create the initial state for a question.
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Default::default()
        }
    }

    /// Merge a partial update into the state. Fields the update does not
    /// carry are left untouched.
    pub fn apply(&mut self, update: StateUpdate) {
        if let Some(documents) = update.documents {
            self.documents = documents;
        }
        if let Some(solution) = update.solution {
            self.solution = Some(solution);
        }
        if let Some(needs_web_search) = update.needs_web_search {
            self.needs_web_search = needs_web_search;
        }
        if let Some(judgments) = update.document_judgments {
            self.document_judgments = judgments;
        }
        if let Some(judgment) = update.faithfulness_judgment {
            self.faithfulness_judgment = Some(judgment);
        }
        if let Some(judgment) = update.coverage_judgment {
            self.coverage_judgment = Some(judgment);
        }
    }
}

/// Partial update produced by one stage visit.
///
/// `None` means "leave the field alone"; `Some` replaces the field wholesale.
/// A stage that wants to append (the online search) reads the current list
/// from the state and returns the concatenation.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub documents: Option<Vec<Document>>,
    pub solution: Option<String>,
    pub needs_web_search: Option<bool>,
    pub document_judgments: Option<Vec<Judgment>>,
    pub faithfulness_judgment: Option<Judgment>,
    pub coverage_judgment: Option<Judgment>,
}

impl StateUpdate {
    /// An update that changes nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// True if merging this update would change nothing.
    pub fn is_empty(&self) -> bool {
        self.documents.is_none()
            && self.solution.is_none()
            && self.needs_web_search.is_none()
            && self.document_judgments.is_none()
            && self.faithfulness_judgment.is_none()
            && self.coverage_judgment.is_none()
    }

    /// Replace the document list.
    pub fn with_documents(mut self, documents: Vec<Document>) -> Self {
        self.documents = Some(documents);
        self
    }

    /// Replace the candidate answer.
    pub fn with_solution(mut self, solution: impl Into<String>) -> Self {
        self.solution = Some(solution.into());
        self
    }

    /// Set the web-search routing flag.
    pub fn with_needs_web_search(mut self, needs_web_search: bool) -> Self {
        self.needs_web_search = Some(needs_web_search);
        self
    }

    /// Replace the per-document judgment audit trail.
    pub fn with_document_judgments(mut self, judgments: Vec<Judgment>) -> Self {
        self.document_judgments = Some(judgments);
        self
    }

    /// Record a faithfulness judgment.
    pub fn with_faithfulness(mut self, judgment: Judgment) -> Self {
        self.faithfulness_judgment = Some(judgment);
        self
    }

    /// Record a coverage judgment.
    pub fn with_coverage(mut self, judgment: Judgment) -> Self {
        self.coverage_judgment = Some(judgment);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_judgment_clamps_confidence() {
        assert_eq!(Judgment::new(true, 1.5).confidence, 1.0);
        assert_eq!(Judgment::new(false, -0.1).confidence, 0.0);
        assert_eq!(Judgment::new(true, 0.75).confidence, 0.75);
    }

    #[test]
    fn test_initial_state() {
        let state = WorkflowState::new("What is RAG?");

        assert_eq!(state.question, "What is RAG?");
        assert!(state.solution.is_none());
        assert!(state.documents.is_empty());
        assert!(state.document_judgments.is_empty());
        assert!(!state.needs_web_search);
        assert!(state.faithfulness_judgment.is_none());
        assert!(state.coverage_judgment.is_none());
    }

    #[test]
    fn test_apply_merges_only_present_fields() {
        let mut state = WorkflowState::new("q");
        state.solution = Some("draft".to_string());
        state.documents = vec![Document::new("local evidence")];

        state.apply(StateUpdate::empty().with_needs_web_search(true));

        // Untouched fields survive the merge.
        assert_eq!(state.solution.as_deref(), Some("draft"));
        assert_eq!(state.documents.len(), 1);
        assert!(state.needs_web_search);
    }

    #[test]
    fn test_apply_replaces_documents_wholesale() {
        let mut state = WorkflowState::new("q");
        state.documents = vec![Document::new("a"), Document::new("b")];

        state.apply(StateUpdate::empty().with_documents(vec![Document::new("c")]));

        assert_eq!(state.documents.len(), 1);
        assert_eq!(state.documents[0].content, "c");
    }

    #[test]
    fn test_solution_is_replaced_not_cleared() {
        let mut state = WorkflowState::new("q");

        state.apply(StateUpdate::empty().with_solution("first"));
        assert_eq!(state.solution.as_deref(), Some("first"));

        // An update without a solution leaves the previous one in place.
        state.apply(StateUpdate::empty().with_needs_web_search(false));
        assert_eq!(state.solution.as_deref(), Some("first"));

        state.apply(StateUpdate::empty().with_solution("second"));
        assert_eq!(state.solution.as_deref(), Some("second"));
    }

    #[test]
    fn test_empty_update() {
        assert!(StateUpdate::empty().is_empty());
        assert!(!StateUpdate::empty().with_needs_web_search(false).is_empty());
    }

    #[test]
    fn test_document_builder() {
        let doc = Document::new("  text  ").with_source("https://example.com");
        assert_eq!(doc.source.as_deref(), Some("https://example.com"));
    }
}
