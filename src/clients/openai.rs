//! Judges, answer generation, and query embeddings over an
//! OpenAI-compatible server.
//!
//! One [`ChatClient`] is shared by all four chat-backed capabilities. The
//! judges request a JSON object response and parse it into an evaluation
//! payload (`{"score": bool, "relevance_score": float}`); the generator
//! returns plain text. Works against api.openai.com as well as local
//! servers (llama.cpp, vLLM) that speak the same protocol.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::capability::{AnswerGenerator, CoverageJudge, FaithfulnessJudge, RelevanceJudge};
use crate::config::AppConfig;
use crate::error::CapabilityError;
use crate::state::{Document, Judgment};

const RELEVANCE_SYSTEM: &str = "\
You grade whether a retrieved document is relevant to a user question. \
Respond with a JSON object: {\"score\": <true if the document helps answer \
the question>, \"relevance_score\": <confidence between 0.0 and 1.0>}.";

const FAITHFULNESS_SYSTEM: &str = "\
You grade whether an answer is grounded in the provided documents. An answer \
that states facts not supported by the documents is not grounded. Respond \
with a JSON object: {\"score\": <true if grounded>, \"relevance_score\": \
<confidence between 0.0 and 1.0>}.";

const COVERAGE_SYSTEM: &str = "\
You grade whether an answer resolves the user's question. Respond with a \
JSON object: {\"score\": <true if the question is resolved>, \
\"relevance_score\": <confidence between 0.0 and 1.0>}.";

const GENERATION_SYSTEM: &str = "\
You answer the user's question using only the provided context documents. \
Be concise and factual; if the context is insufficient, say what is missing.";

/// Structured verdict emitted by the judge prompts.
#[derive(Debug, Deserialize)]
struct EvaluationPayload {
    score: bool,
    #[serde(default = "default_relevance_score")]
    relevance_score: f64,
}

fn default_relevance_score() -> f64 {
    0.5
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// Minimal chat-completions client for an OpenAI-compatible server.
pub struct ChatClient {
    http: Client,
    base_url: String,
    auth_header: String,
    model: String,
    timeout: Duration,
}

impl ChatClient {
    /// Create a client for the given server, key, and model.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_header: format!("Bearer {}", api_key.into()),
            model: model.into(),
            timeout,
        }
    }

    /// Create a client from application configuration.
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            &config.llm_base_url,
            &config.api_key,
            &config.model_name,
            config.request_timeout(),
        )
    }

    fn chat_completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    /// One chat completion. `json_mode` asks the server for a JSON object
    /// response (used by the judges).
    pub async fn complete(
        &self,
        system: &str,
        user: &str,
        json_mode: bool,
    ) -> Result<String, CapabilityError> {
        let mut body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": 0.0,
        });
        if json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }

        debug!(model = %self.model, json_mode, "chat completion request");

        let response = self
            .http
            .post(self.chat_completions_url())
            .header("Authorization", &self.auth_header)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(CapabilityError::from)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CapabilityError::http(status.as_u16(), message));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::malformed(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| CapabilityError::malformed("no choices in chat response"))
    }

    /// Run a judge prompt and parse the structured verdict.
    pub async fn evaluate(&self, system: &str, user: &str) -> Result<Judgment, CapabilityError> {
        let content = self.complete(system, user, true).await?;
        parse_evaluation(&content)
    }
}

/// Parse a judge response, tolerating markdown code fences around the JSON.
fn parse_evaluation(content: &str) -> Result<Judgment, CapabilityError> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|inner| inner.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let payload: EvaluationPayload = serde_json::from_str(body)
        .map_err(|e| CapabilityError::malformed(format!("evaluation payload: {e}")))?;
    Ok(Judgment::new(payload.score, payload.relevance_score))
}

/// Join document contents into a single context block.
fn format_context(documents: &[Document]) -> String {
    documents
        .iter()
        .map(|doc| doc.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

/// [`RelevanceJudge`] backed by the shared chat client.
pub struct OpenAiRelevanceJudge {
    chat: Arc<ChatClient>,
}

impl OpenAiRelevanceJudge {
    pub fn new(chat: Arc<ChatClient>) -> Self {
        Self { chat }
    }
}

#[async_trait]
impl RelevanceJudge for OpenAiRelevanceJudge {
    async fn score(
        &self,
        question: &str,
        document: &Document,
    ) -> Result<Judgment, CapabilityError> {
        let user = format!("Question:\n{question}\n\nDocument:\n{}", document.content);
        self.chat.evaluate(RELEVANCE_SYSTEM, &user).await
    }
}

/// [`FaithfulnessJudge`] backed by the shared chat client.
pub struct OpenAiFaithfulnessJudge {
    chat: Arc<ChatClient>,
}

impl OpenAiFaithfulnessJudge {
    pub fn new(chat: Arc<ChatClient>) -> Self {
        Self { chat }
    }
}

#[async_trait]
impl FaithfulnessJudge for OpenAiFaithfulnessJudge {
    async fn score(
        &self,
        documents: &[Document],
        answer: &str,
    ) -> Result<Judgment, CapabilityError> {
        let user = format!(
            "Documents:\n{}\n\nAnswer:\n{answer}",
            format_context(documents)
        );
        self.chat.evaluate(FAITHFULNESS_SYSTEM, &user).await
    }
}

/// [`CoverageJudge`] backed by the shared chat client.
pub struct OpenAiCoverageJudge {
    chat: Arc<ChatClient>,
}

impl OpenAiCoverageJudge {
    pub fn new(chat: Arc<ChatClient>) -> Self {
        Self { chat }
    }
}

#[async_trait]
impl CoverageJudge for OpenAiCoverageJudge {
    async fn score(&self, question: &str, answer: &str) -> Result<Judgment, CapabilityError> {
        let user = format!("Question:\n{question}\n\nAnswer:\n{answer}");
        self.chat.evaluate(COVERAGE_SYSTEM, &user).await
    }
}

/// [`AnswerGenerator`] backed by the shared chat client.
pub struct OpenAiAnswerGenerator {
    chat: Arc<ChatClient>,
}

impl OpenAiAnswerGenerator {
    pub fn new(chat: Arc<ChatClient>) -> Self {
        Self { chat }
    }
}

#[async_trait]
impl AnswerGenerator for OpenAiAnswerGenerator {
    async fn generate(
        &self,
        question: &str,
        documents: &[Document],
    ) -> Result<String, CapabilityError> {
        let user = format!(
            "Context:\n{}\n\nQuestion:\n{question}",
            format_context(documents)
        );
        self.chat.complete(GENERATION_SYSTEM, &user, false).await
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

/// Query embedder against the OpenAI-compatible `/v1/embeddings` endpoint.
pub struct OpenAiEmbedder {
    http: Client,
    base_url: String,
    auth_header: String,
    model: String,
    timeout: Duration,
}

impl OpenAiEmbedder {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_header: format!("Bearer {}", api_key.into()),
            model: model.into(),
            timeout,
        }
    }

    /// Create an embedder from application configuration.
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            &config.llm_base_url,
            &config.api_key,
            &config.embedding_model,
            config.request_timeout(),
        )
    }
}

#[async_trait]
impl crate::clients::qdrant::QueryEmbedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CapabilityError> {
        let body = json!({"model": self.model, "input": text});

        let response = self
            .http
            .post(format!("{}/v1/embeddings", self.base_url))
            .header("Authorization", &self.auth_header)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(CapabilityError::from)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CapabilityError::http(status.as_u16(), message));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::malformed(e.to_string()))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|item| item.embedding)
            .ok_or_else(|| CapabilityError::malformed("no embedding in response"))
    }
}
