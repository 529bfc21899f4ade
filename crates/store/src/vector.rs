//! In-memory vector store backing the semantic retrieval collaborator.
//!
//! Cosine similarity over embedded documents. A reference implementation
//! good for tests and small deployments; retrieval failure anywhere in the
//! pipeline degrades to empty context, so swapping in a real vector
//! database is purely a deployment decision.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use modelflow_core::{
    traits::{Embedder, RetrievedChunk, SemanticRetriever},
    Result,
};

#[derive(Debug, Clone)]
struct StoredDocument {
    content: String,
    metadata: Value,
    embedding: Vec<f32>,
}

pub struct SimpleVectorStore {
    embedder: Arc<dyn Embedder>,
    documents: DashMap<String, StoredDocument>,
}

impl SimpleVectorStore {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            documents: DashMap::new(),
        }
    }

    /// Embed and store a document. Returns its id.
    pub async fn add_document(&self, content: &str, metadata: Value) -> Result<String> {
        let embedding = self.embedder.embed(content).await?;
        let id = Uuid::new_v4().to_string();
        self.documents.insert(
            id.clone(),
            StoredDocument {
                content: content.to_string(),
                metadata,
                embedding,
            },
        );
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() {
            return 0.0;
        }

        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

        if magnitude_a == 0.0 || magnitude_b == 0.0 {
            return 0.0;
        }

        dot / (magnitude_a * magnitude_b)
    }
}

#[async_trait]
impl SemanticRetriever for SimpleVectorStore {
    async fn similarity_search(
        &self,
        query: &str,
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<RetrievedChunk>> {
        let query_embedding = self.embedder.embed(query).await?;

        let mut scored: Vec<RetrievedChunk> = self
            .documents
            .iter()
            .map(|entry| {
                let doc = entry.value();
                RetrievedChunk {
                    content: doc.content.clone(),
                    metadata: doc.metadata.clone(),
                    similarity: Self::cosine_similarity(&query_embedding, &doc.embedding),
                }
            })
            .filter(|chunk| chunk.similarity >= threshold)
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);

        Ok(scored)
    }
}
