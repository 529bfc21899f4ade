use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// One retrieved document fragment with its similarity score.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub content: String,
    pub metadata: Value,
    pub similarity: f32,
}

/// Semantic retrieval collaborator (vector search).
///
/// Treated as an optional context enrichment step: failures degrade to
/// empty context rather than failing the enclosing request.
#[async_trait]
pub trait SemanticRetriever: Send + Sync {
    async fn similarity_search(
        &self,
        query: &str,
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<RetrievedChunk>>;
}

/// Text embedding provider backing the vector store.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}
