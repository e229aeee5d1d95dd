//! Web search via the DuckDuckGo HTML endpoint.
//!
//! The JSON API frequently returns empty result sets for ordinary queries, so
//! this client fetches `html.duckduckgo.com/html/` like a browser and scrapes
//! the result snippets out of the markup. Result links are redirect URLs with
//! the real target in the `uddg` query parameter.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::capability::WebSearch;
use crate::error::CapabilityError;
use crate::state::Document;

const SEARCH_ENDPOINT: &str = "https://html.duckduckgo.com/html/";
const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0";
const MAX_RETRIES: u32 = 2;
const INITIAL_BACKOFF_MS: u64 = 500;

/// [`WebSearch`] implementation scraping DuckDuckGo's HTML results page.
pub struct DuckDuckGoSearch {
    http: Client,
    timeout: Duration,
}

impl DuckDuckGoSearch {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: Client::new(),
            timeout,
        }
    }

    async fn fetch_page(&self, question: &str) -> Result<String, CapabilityError> {
        let url = format!("{SEARCH_ENDPOINT}?q={}", urlencoding::encode(question));

        let response = self
            .http
            .get(&url)
            .header("User-Agent", USER_AGENT)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(CapabilityError::from)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CapabilityError::http(status.as_u16(), message));
        }

        response
            .text()
            .await
            .map_err(|e| CapabilityError::malformed(e.to_string()))
    }
}

impl Default for DuckDuckGoSearch {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl WebSearch for DuckDuckGoSearch {
    async fn search(&self, question: &str, k: usize) -> Result<Vec<Document>, CapabilityError> {
        let mut backoff = Duration::from_millis(INITIAL_BACKOFF_MS);
        let mut attempt = 0;

        let html = loop {
            match self.fetch_page(question).await {
                Ok(html) => break html,
                Err(err) if err.is_transient() && attempt < MAX_RETRIES => {
                    attempt += 1;
                    warn!(attempt, error = %err, "search request failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(err) => return Err(err),
            }
        };

        let results = parse_results(&html, k);
        debug!(count = results.len(), "web search results");
        Ok(results)
    }
}

/// Pull up to `limit` result snippets out of the results page markup.
fn parse_results(html: &str, limit: usize) -> Vec<Document> {
    let mut documents = Vec::new();

    for chunk in html.split("result__snippet").skip(1) {
        if documents.len() >= limit {
            break;
        }

        // Snippet text sits between the anchor's closing '>' and '</a>'.
        let Some(open) = chunk.find('>') else { continue };
        let Some(close) = chunk.find("</a>") else { continue };
        if close <= open {
            continue;
        }

        let snippet = decode_entities(&strip_tags(&chunk[open + 1..close]));
        let snippet = snippet.trim();
        if snippet.is_empty() {
            continue;
        }

        let mut document = Document::new(snippet);
        if let Some(source) = extract_source(chunk) {
            document = document.with_source(source);
        }
        documents.push(document);
    }

    documents
}

/// Recover the target URL from the `uddg` redirect parameter.
fn extract_source(chunk: &str) -> Option<String> {
    let start = chunk.find("uddg=")? + "uddg=".len();
    let rest = &chunk[start..];
    let end = rest.find(['&', '"', '\'']).unwrap_or(rest.len());
    let decoded = urlencoding::decode(&rest[..end]).ok()?;
    let url = decoded.into_owned();
    url.starts_with("http").then_some(url)
}

fn strip_tags(fragment: &str) -> String {
    let mut out = String::with_capacity(fragment.len());
    let mut in_tag = false;
    for ch in fragment.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

// `&amp;` must decode last so nested escapes like `&amp;lt;` come out as
// `&lt;` rather than being decoded twice.
fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_PAGE: &str = r##"
        <div class="result">
          <a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fa&amp;rut=x">First</a>
          <a class="result__snippet" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fa&amp;rut=x">
            First snippet with <b>bold</b> text &amp; entities</a>
        </div>
        <div class="result">
          <a class="result__snippet" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fb&amp;rut=y">Second snippet</a>
        </div>
        <div class="result">
          <a class="result__snippet" href="#">   </a>
        </div>
    "##;

    #[test]
    fn test_parse_results_extracts_snippets_and_sources() {
        let results = parse_results(SAMPLE_PAGE, 10);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].content, "First snippet with bold text & entities");
        assert_eq!(results[0].source.as_deref(), Some("https://example.com/a"));
        assert_eq!(results[1].content, "Second snippet");
        assert_eq!(results[1].source.as_deref(), Some("https://example.com/b"));
    }

    #[test]
    fn test_parse_results_honors_limit() {
        let results = parse_results(SAMPLE_PAGE, 1);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "First snippet with bold text & entities");
    }

    #[test]
    fn test_parse_results_empty_page() {
        assert!(parse_results("<html><body>no results</body></html>", 5).is_empty());
    }

    #[test]
    fn test_strip_tags() {
        assert_eq!(strip_tags("a <b>bold</b> word"), "a bold word");
    }

    #[test]
    fn test_decode_entities() {
        assert_eq!(
            decode_entities("Tom &amp; Jerry&#x27;s &lt;show&gt;"),
            "Tom & Jerry's <show>"
        );
    }

    #[test]
    fn test_decode_entities_single_pass() {
        // A doubly-escaped entity decodes exactly one level.
        assert_eq!(decode_entities("&amp;lt;tag&amp;gt;"), "&lt;tag&gt;");
    }

    #[test]
    fn test_extract_source_requires_http() {
        assert_eq!(
            extract_source(r#"href="/l/?uddg=javascript%3Aalert(1)""#),
            None
        );
    }
}
