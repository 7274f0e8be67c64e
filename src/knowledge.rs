//! Knowledge base retrieval.
//!
//! Knowledge bases are vendor-hosted vector stores. The generation core
//! only needs [`Retriever::search`]; everything else here manages the
//! stores themselves (create, upload, attach, delete).
//!
//! Retrieval is an enrichment, never a precondition: [`lookup_context`]
//! turns any failure or empty result into `None` and logs a warning.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::{BackendConfig, KnowledgeConfig};
use crate::models::Snippet;

/// Options for [`Retriever::search`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    pub max_results: u32,
    /// Let the vendor rewrite the query for better recall.
    pub rewrite_query: bool,
}

impl From<&KnowledgeConfig> for SearchOptions {
    fn from(config: &KnowledgeConfig) -> Self {
        Self {
            max_results: config.max_results,
            rewrite_query: config.rewrite_query,
        }
    }
}

/// A searchable collection service.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Ranked snippets for `query` from the collection, possibly empty.
    async fn search(
        &self,
        collection_id: &str,
        query: &str,
        options: SearchOptions,
    ) -> Result<Vec<Snippet>>;
}

/// A retriever bound to one collection, passed to the orchestrator.
pub struct KnowledgeSource<'a> {
    pub retriever: &'a dyn Retriever,
    pub collection_id: String,
    pub options: SearchOptions,
}

impl KnowledgeSource<'_> {
    pub async fn lookup(&self, query: &str) -> Option<String> {
        lookup_context(self.retriever, &self.collection_id, query, self.options).await
    }
}

/// Search and format results as prompt context.
///
/// Never fails: errors and empty results yield `None`.
pub async fn lookup_context(
    retriever: &dyn Retriever,
    collection_id: &str,
    query: &str,
    options: SearchOptions,
) -> Option<String> {
    match retriever.search(collection_id, query, options).await {
        Ok(snippets) if snippets.is_empty() => {
            tracing::debug!(collection = collection_id, "knowledge search returned nothing");
            None
        }
        Ok(snippets) => Some(format_snippets(&snippets)),
        Err(e) => {
            tracing::warn!(collection = collection_id, error = %e, "knowledge search failed; continuing without context");
            None
        }
    }
}

/// Render snippets as `[filename] text` blocks separated by blank lines.
pub fn format_snippets(snippets: &[Snippet]) -> String {
    snippets
        .iter()
        .map(|s| format!("[{}] {}", s.filename, s.chunks.join("\n")))
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ============ OpenAI vector stores ============

/// Client for OpenAI vector stores and file uploads.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAiVectorStore {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    #[serde(default)]
    filename: String,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    content: Vec<SearchContent>,
}

#[derive(Deserialize)]
struct SearchContent {
    #[serde(default)]
    text: String,
}

impl OpenAiVectorStore {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body_text = response.text().await.unwrap_or_default();
        bail!("OpenAI API error {} while {}: {}", status, what, body_text);
    }

    /// Create an empty vector store and return its id.
    pub async fn create_store(&self, name: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/vector_stores", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await?;
        let created: IdResponse = Self::check(response, "creating vector store")
            .await?
            .json()
            .await?;
        Ok(created.id)
    }

    /// Upload a local file and return the vendor file id.
    pub async fn upload_file(&self, path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload".to_string());

        let form = reqwest::multipart::Form::new()
            .text("purpose", "assistants")
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes).file_name(filename),
            );

        let response = self
            .client
            .post(format!("{}/files", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;
        let uploaded: IdResponse = Self::check(response, "uploading file").await?.json().await?;
        Ok(uploaded.id)
    }

    /// Add an uploaded file to a vector store for indexing.
    pub async fn attach_file(&self, store_id: &str, file_id: &str) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/vector_stores/{}/files", self.base_url, store_id))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "file_id": file_id }))
            .send()
            .await?;
        Self::check(response, "attaching file").await?;
        Ok(())
    }

    pub async fn delete_store(&self, store_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/vector_stores/{}", self.base_url, store_id))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        Self::check(response, "deleting vector store").await?;
        Ok(())
    }
}

#[async_trait]
impl Retriever for OpenAiVectorStore {
    async fn search(
        &self,
        collection_id: &str,
        query: &str,
        options: SearchOptions,
    ) -> Result<Vec<Snippet>> {
        let response = self
            .client
            .post(format!(
                "{}/vector_stores/{}/search",
                self.base_url, collection_id
            ))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "query": query,
                "max_num_results": options.max_results,
                "rewrite_query": options.rewrite_query,
            }))
            .send()
            .await?;

        let parsed: SearchResponse = Self::check(response, "searching vector store")
            .await?
            .json()
            .await?;
        Ok(parse_hits(parsed))
    }
}

fn parse_hits(response: SearchResponse) -> Vec<Snippet> {
    let mut snippets: Vec<Snippet> = response
        .data
        .into_iter()
        .map(|hit| Snippet {
            filename: hit.filename,
            score: hit.score,
            chunks: hit
                .content
                .into_iter()
                .map(|c| c.text)
                .filter(|t| !t.trim().is_empty())
                .collect(),
        })
        .filter(|s| !s.chunks.is_empty())
        .collect();

    snippets.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    snippets
}

// ============ Scripted retriever ============

/// Test retriever returning a fixed result and recording queries.
pub struct ScriptedRetriever {
    result: std::result::Result<Vec<Snippet>, String>,
    queries: Mutex<Vec<String>>,
}

impl ScriptedRetriever {
    pub fn returning(snippets: Vec<Snippet>) -> Self {
        Self {
            result: Ok(snippets),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            result: Err(message.into()),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl Retriever for ScriptedRetriever {
    async fn search(
        &self,
        _collection_id: &str,
        query: &str,
        options: SearchOptions,
    ) -> Result<Vec<Snippet>> {
        self.queries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(query.to_string());
        match &self.result {
            Ok(snippets) => Ok(snippets
                .iter()
                .take(options.max_results as usize)
                .cloned()
                .collect()),
            Err(message) => bail!("{}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPTIONS: SearchOptions = SearchOptions {
        max_results: 5,
        rewrite_query: true,
    };

    fn snippet(name: &str, score: f64, text: &str) -> Snippet {
        Snippet {
            filename: name.to_string(),
            score,
            chunks: vec![text.to_string()],
        }
    }

    #[tokio::test]
    async fn test_lookup_formats_snippets() {
        let r = ScriptedRetriever::returning(vec![
            snippet("a.md", 0.9, "alpha"),
            snippet("b.md", 0.5, "beta"),
        ]);
        let ctx = lookup_context(&r, "vs_1", "query", OPTIONS).await.unwrap();
        assert_eq!(ctx, "[a.md] alpha\n\n[b.md] beta");
        assert_eq!(r.queries(), vec!["query".to_string()]);
    }

    #[tokio::test]
    async fn test_lookup_tolerates_failure_and_empty() {
        let failing = ScriptedRetriever::failing("503");
        assert!(lookup_context(&failing, "vs_1", "q", OPTIONS).await.is_none());

        let empty = ScriptedRetriever::returning(vec![]);
        assert!(lookup_context(&empty, "vs_1", "q", OPTIONS).await.is_none());
    }

    #[test]
    fn test_parse_hits_ranks_and_drops_empty() {
        let json = r#"{"object":"vector_store.search_results.page","data":[
            {"file_id":"f1","filename":"low.md","score":0.2,"content":[{"type":"text","text":"low"}]},
            {"file_id":"f2","filename":"high.md","score":0.8,"content":[{"type":"text","text":"high"},{"type":"text","text":"more"}]},
            {"file_id":"f3","filename":"blank.md","score":0.9,"content":[{"type":"text","text":"  "}]}
        ]}"#;
        let parsed: SearchResponse = serde_json::from_str(json).unwrap();
        let hits = parse_hits(parsed);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].filename, "high.md");
        assert_eq!(hits[0].chunks.len(), 2);
    }
}
