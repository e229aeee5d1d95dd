//! Capability interfaces consumed by the workflow core.
//!
//! The core does not know how documents are embedded, how the vector index is
//! built, or how prompts are phrased. It drives these six narrow interfaces —
//! one method each — and nothing more, which lets tests substitute
//! deterministic fakes for each capability independently.
//!
//! All methods are request/response. Any blocking (network I/O to a vector
//! store, an LLM server, a search engine) happens inside the implementation;
//! implementations used from concurrent runs must be safe for shared use.

use async_trait::async_trait;

use crate::error::CapabilityError;
use crate::state::{Document, Judgment};

/// Fetches locally indexed documents for a question.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn fetch(&self, question: &str) -> Result<Vec<Document>, CapabilityError>;
}

/// Scores how relevant a single document is to the question.
#[async_trait]
pub trait RelevanceJudge: Send + Sync {
    async fn score(
        &self,
        question: &str,
        document: &Document,
    ) -> Result<Judgment, CapabilityError>;
}

/// Live web search returning up to `k` result documents.
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, question: &str, k: usize) -> Result<Vec<Document>, CapabilityError>;
}

/// Generates a candidate answer from the question and the current evidence.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(
        &self,
        question: &str,
        documents: &[Document],
    ) -> Result<String, CapabilityError>;
}

/// Scores whether the answer is grounded in the evidence (no hallucinations).
#[async_trait]
pub trait FaithfulnessJudge: Send + Sync {
    async fn score(
        &self,
        documents: &[Document],
        answer: &str,
    ) -> Result<Judgment, CapabilityError>;
}

/// Scores whether the answer actually addresses the question.
#[async_trait]
pub trait CoverageJudge: Send + Sync {
    async fn score(&self, question: &str, answer: &str) -> Result<Judgment, CapabilityError>;
}
