//! Document retrieval from a Qdrant collection over its HTTP API.
//!
//! The question is embedded with a [`QueryEmbedder`] and sent to the
//! collection's `points/query` endpoint. Document text is read from the
//! point payload under the keys LangChain-style ingesters commonly use
//! (`page_content`, `content`, `text`).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::capability::Retriever;
use crate::config::AppConfig;
use crate::error::CapabilityError;
use crate::state::Document;

/// Turns a query string into an embedding vector.
#[async_trait]
pub trait QueryEmbedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CapabilityError>;
}

/// [`Retriever`] backed by a Qdrant collection.
pub struct QdrantRetriever {
    http: Client,
    base_url: String,
    collection: String,
    limit: usize,
    timeout: Duration,
    embedder: Arc<dyn QueryEmbedder>,
}

impl QdrantRetriever {
    pub fn new(
        base_url: impl Into<String>,
        collection: impl Into<String>,
        limit: usize,
        timeout: Duration,
        embedder: Arc<dyn QueryEmbedder>,
    ) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            limit,
            timeout,
            embedder,
        }
    }

    /// Create a retriever from application configuration.
    pub fn from_config(config: &AppConfig, embedder: Arc<dyn QueryEmbedder>) -> Self {
        Self::new(
            &config.qdrant_url,
            &config.collection_name,
            config.retrieval_limit,
            config.request_timeout(),
            embedder,
        )
    }

    fn query_url(&self) -> String {
        format!(
            "{}/collections/{}/points/query",
            self.base_url, self.collection
        )
    }
}

#[async_trait]
impl Retriever for QdrantRetriever {
    async fn fetch(&self, question: &str) -> Result<Vec<Document>, CapabilityError> {
        let vector = self.embedder.embed(question).await?;

        let body = json!({
            "query": vector,
            "limit": self.limit,
            "with_payload": true,
        });

        let response = self
            .http
            .post(self.query_url())
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

        let parsed: Value = response
            .json()
            .await
            .map_err(|e| CapabilityError::malformed(e.to_string()))?;

        let points = parsed
            .pointer("/result/points")
            .and_then(Value::as_array)
            .ok_or_else(|| CapabilityError::malformed("missing result.points in query response"))?;

        let documents: Vec<Document> = points.iter().filter_map(point_to_document).collect();
        debug!(count = documents.len(), collection = %self.collection, "retrieved documents");
        Ok(documents)
    }
}

/// Extract a document from a scored point, skipping points without text.
fn point_to_document(point: &Value) -> Option<Document> {
    let payload = point.get("payload")?;

    let content = ["page_content", "content", "text"]
        .iter()
        .find_map(|key| payload.get(key).and_then(Value::as_str))?
        .trim();
    if content.is_empty() {
        return None;
    }

    let source = payload
        .pointer("/metadata/source")
        .or_else(|| payload.get("source"))
        .and_then(Value::as_str);

    let mut document = Document::new(content);
    if let Some(source) = source {
        document = document.with_source(source);
    }
    Some(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FixedEmbedder;

    #[async_trait]
    impl QueryEmbedder for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, CapabilityError> {
            Ok(vec![0.1, 0.2, 0.3])
        }
    }

    #[test]
    fn test_point_to_document_page_content_and_nested_source() {
        let point = json!({
            "id": 1,
            "score": 0.9,
            "payload": {
                "page_content": "body text",
                "metadata": {"source": "docs/a.md"}
            }
        });
        let doc = point_to_document(&point).unwrap();
        assert_eq!(doc.content, "body text");
        assert_eq!(doc.source.as_deref(), Some("docs/a.md"));
    }

    #[test]
    fn test_point_to_document_falls_back_to_content_key() {
        let point = json!({"payload": {"content": "alt body", "source": "b.md"}});
        let doc = point_to_document(&point).unwrap();
        assert_eq!(doc.content, "alt body");
        assert_eq!(doc.source.as_deref(), Some("b.md"));
    }

    #[test]
    fn test_point_to_document_skips_empty_or_missing_text() {
        assert!(point_to_document(&json!({"payload": {"page_content": "   "}})).is_none());
        assert!(point_to_document(&json!({"payload": {"other": 1}})).is_none());
        assert!(point_to_document(&json!({"id": 2})).is_none());
    }

    #[tokio::test]
    async fn test_fetch_queries_collection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/domain_knowledge/points/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": {"points": [
                    {"payload": {"page_content": "first"}, "score": 0.8},
                    {"payload": {"text": "second"}, "score": 0.7},
                ]},
                "status": "ok",
                "time": 0.001
            })))
            .mount(&server)
            .await;

        let retriever = QdrantRetriever::new(
            server.uri(),
            "domain_knowledge",
            4,
            Duration::from_secs(5),
            Arc::new(FixedEmbedder),
        );
        let docs = retriever.fetch("question").await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].content, "first");
        assert_eq!(docs[1].content, "second");
    }

    #[tokio::test]
    async fn test_fetch_maps_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let retriever = QdrantRetriever::new(
            server.uri(),
            "domain_knowledge",
            4,
            Duration::from_secs(5),
            Arc::new(FixedEmbedder),
        );
        let err = retriever.fetch("question").await.unwrap_err();
        assert!(matches!(err, CapabilityError::Http { status: 503, .. }));
    }
}
