//! HTTP-backed implementations of the capability interfaces.
//!
//! The workflow core only knows the traits in [`crate::capability`]; this
//! module provides the production clients behind them:
//!
//! - [`openai`]: judges and answer generation against an OpenAI-compatible
//!   chat server, plus query embeddings.
//! - [`qdrant`]: local document retrieval from a Qdrant collection.
//! - [`search`]: live web search via DuckDuckGo's HTML endpoint.
//!
//! Every client applies a per-call timeout and reports faults through
//! [`crate::error::CapabilityError`].

pub mod openai;
pub mod qdrant;
pub mod search;

pub use openai::{
    ChatClient, OpenAiAnswerGenerator, OpenAiCoverageJudge, OpenAiEmbedder,
    OpenAiFaithfulnessJudge, OpenAiRelevanceJudge,
};
pub use qdrant::{QdrantRetriever, QueryEmbedder};
pub use search::DuckDuckGoSearch;
