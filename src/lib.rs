//! adaptive-rag: adaptive retrieval-augmented answering workflow
//!
//! Answers a question by retrieving supporting documents, judging their
//! relevance, optionally augmenting them with a live web search, generating a
//! candidate answer, and validating that answer against the evidence and the
//! question before releasing it. Validation failures loop back through
//! search/generation, bounded by a step budget.
//!
//! The crate is split into a workflow core and capability clients:
//!
//! - [`graph`] / [`engine`]: a small cyclic stage graph with data-driven
//!   conditional routing, executed sequentially against a [`WorkflowState`].
//! - [`stages`]: the five processing stages (retrieve, evaluate, search
//!   online, generate answer, check solution) and their router predicates.
//! - [`capability`]: the narrow interfaces the core consumes — retriever,
//!   relevance/faithfulness/coverage judges, web search, answer generator.
//! - [`clients`]: HTTP-backed implementations of those interfaces (Qdrant,
//!   OpenAI-compatible chat server, DuckDuckGo).
//!
//! # Example
//!
//! ```ignore
//! use adaptive_rag::RagWorkflowBuilder;
//!
//! let workflow = RagWorkflowBuilder::new()
//!     .retriever(retriever)
//!     .relevance_judge(judge.clone())
//!     .web_search(search)
//!     .answer_generator(generator)
//!     .faithfulness_judge(judge.clone())
//!     .coverage_judge(judge)
//!     .build()?;
//!
//! let result = workflow.answer("How can sustained immunity be generated?").await?;
//! println!("{}", result.solution.unwrap_or_default());
//! ```

pub mod capability;
pub mod clients;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod stages;
pub mod state;
pub mod workflow;

// Re-exports for convenience
pub use capability::{
    AnswerGenerator, CoverageJudge, FaithfulnessJudge, RelevanceJudge, Retriever, WebSearch,
};
pub use config::AppConfig;
pub use engine::{GraphEngine, Stage, StageOutcome};
pub use error::{CapabilityError, WorkflowError};
pub use graph::{BuiltGraph, GraphBuildError, WorkflowGraph, END};
pub use stages::{
    CheckSolutionStage, EvaluateStage, GenerateAnswerStage, RetrieveStage, SearchOnlineStage,
    StageThresholds,
};
pub use state::{Document, Judgment, StateUpdate, WorkflowState};
pub use workflow::{RagWorkflow, RagWorkflowBuilder, WorkflowSetupError};
