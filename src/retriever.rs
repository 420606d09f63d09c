//! Hybrid retrieval fusion (§4.9): merges semantic (cosine) and full-text
//! (BM25) matches by `(filepath, chunkId)`, ranks by similarity first, then
//! BM25, then original rank order, and truncates to the desired count.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::SupabaseConfig;
use crate::error::Result;
use crate::llm::embedding::EmbeddingClient;
use crate::types::SourceType;
use crate::vector_store::VectorStore;

#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub filepath: String,
    pub chunk_id: i32,
    pub chunk_title: String,
    pub content: String,
    pub contextual_text: String,
    pub source_type: SourceType,
    pub github_url: Option<String>,
    pub docs_url: Option<String>,
    pub start_line: Option<i32>,
    pub end_line: Option<i32>,
    pub similarity: Option<f32>,
    pub bm25_rank: Option<f32>,
    vector_rank: Option<usize>,
    bm25_order: Option<usize>,
}

pub struct Retriever {
    store: Arc<dyn VectorStore>,
    embedding: Arc<EmbeddingClient>,
}

impl Retriever {
    pub fn new(store: Arc<dyn VectorStore>, embedding: Arc<EmbeddingClient>) -> Self {
        Self { store, embedding }
    }

    /// Returns `[]` when neither source produced a row; callers render the
    /// "could not find relevant context" fallback themselves.
    pub async fn retrieve(
        &self,
        query: &str,
        config: &SupabaseConfig,
        cancel: &CancellationToken,
    ) -> Result<Vec<RetrievedChunk>> {
        let query_embedding = self.embedding.embed_query(query, cancel).await?;

        let semantic = self
            .store
            .match_documents(&query_embedding, config.match_count, config.similarity_threshold)
            .await?;

        let full_text = if config.enable_hybrid_search {
            self.store.search_documents_full_text(query, config.bm25_match_count).await?
        } else {
            vec![]
        };

        let mut merged: HashMap<(String, i32), RetrievedChunk> = HashMap::new();

        for (rank, doc) in semantic.into_iter().enumerate() {
            let key = (doc.filepath.clone(), doc.chunk_id);
            merged.insert(
                key,
                RetrievedChunk {
                    filepath: doc.filepath,
                    chunk_id: doc.chunk_id,
                    chunk_title: doc.chunk_title,
                    content: doc.content,
                    contextual_text: doc.contextual_text,
                    source_type: doc.source_type,
                    github_url: doc.github_url,
                    docs_url: doc.docs_url,
                    start_line: doc.start_line,
                    end_line: doc.end_line,
                    similarity: Some(doc.similarity),
                    bm25_rank: None,
                    vector_rank: Some(rank),
                    bm25_order: None,
                },
            );
        }

        for (rank, doc) in full_text.into_iter().enumerate() {
            let key = (doc.filepath.clone(), doc.chunk_id);
            merged
                .entry(key)
                .and_modify(|existing| {
                    existing.bm25_rank = Some(doc.bm25_rank);
                    existing.bm25_order = Some(rank);
                })
                .or_insert(RetrievedChunk {
                    filepath: doc.filepath,
                    chunk_id: doc.chunk_id,
                    chunk_title: doc.chunk_title,
                    content: doc.content,
                    contextual_text: doc.contextual_text,
                    source_type: doc.source_type,
                    github_url: doc.github_url,
                    docs_url: doc.docs_url,
                    start_line: doc.start_line,
                    end_line: doc.end_line,
                    similarity: None,
                    bm25_rank: Some(doc.bm25_rank),
                    vector_rank: None,
                    bm25_order: Some(rank),
                });
        }

        let mut results: Vec<RetrievedChunk> = merged.into_values().collect();
        results.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.bm25_rank.partial_cmp(&a.bm25_rank).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| a.vector_rank.unwrap_or(usize::MAX).cmp(&b.vector_rank.unwrap_or(usize::MAX)))
                .then_with(|| a.bm25_order.unwrap_or(usize::MAX).cmp(&b.bm25_order.unwrap_or(usize::MAX)))
        });

        results.truncate(config.match_count);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderLimits;
    use crate::llm::EmbeddingProvider;
    use crate::vector_store::InMemoryVectorStore;
    use async_trait::async_trait;

    struct FakeEmbedding;
    #[async_trait]
    impl EmbeddingProvider for FakeEmbedding {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.0]).collect())
        }
    }

    fn config() -> SupabaseConfig {
        SupabaseConfig {
            url: "postgres://x".to_string(),
            service_role_key: "key".to_string(),
            table: "docs".to_string(),
            similarity_threshold: 0.0,
            match_count: 10,
            bm25_match_count: 10,
            enable_hybrid_search: true,
        }
    }

    #[tokio::test]
    async fn empty_store_returns_no_results() {
        let store = Arc::new(InMemoryVectorStore::new());
        let embedding = Arc::new(EmbeddingClient::new(Arc::new(FakeEmbedding), &ProviderLimits::default()));
        let retriever = Retriever::new(store, embedding);
        let cancel = CancellationToken::new();
        let results = retriever.retrieve("anything", &config(), &cancel).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn truncates_to_match_count_even_when_bm25_match_count_is_larger() {
        let store = Arc::new(InMemoryVectorStore::new());
        for i in 0..5 {
            store.seed(crate::types::Chunk {
                filepath: format!("{i}.md"),
                chunk_id: 0,
                chunk_title: "T".to_string(),
                content: "hello world".to_string(),
                contextual_text: "hello world".to_string(),
                checksum: format!("c{i}"),
                embedding: Some(vec![0.1]),
                source_type: SourceType::Doc,
                entity_type: None,
                start_line: None,
                end_line: None,
                github_url: None,
                docs_url: None,
                final_url: None,
            });
        }
        let embedding = Arc::new(EmbeddingClient::new(Arc::new(FakeEmbedding), &ProviderLimits::default()));
        let retriever = Retriever::new(store, embedding);
        let cancel = CancellationToken::new();
        let mut cfg = config();
        cfg.match_count = 2;
        cfg.bm25_match_count = 10;
        let results = retriever.retrieve("hello", &cfg, &cancel).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn semantic_match_surfaces_seeded_chunk() {
        let store = Arc::new(InMemoryVectorStore::new());
        store.seed(crate::types::Chunk {
            filepath: "a.md".to_string(),
            chunk_id: 0,
            chunk_title: "A".to_string(),
            content: "hello world".to_string(),
            contextual_text: "hello world".to_string(),
            checksum: "c1".to_string(),
            embedding: Some(vec![0.1]),
            source_type: SourceType::Doc,
            entity_type: None,
            start_line: None,
            end_line: None,
            github_url: None,
            docs_url: None,
            final_url: None,
        });
        let embedding = Arc::new(EmbeddingClient::new(Arc::new(FakeEmbedding), &ProviderLimits::default()));
        let retriever = Retriever::new(store, embedding);
        let cancel = CancellationToken::new();
        let results = retriever.retrieve("hello", &config(), &cancel).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].filepath, "a.md");
    }
}
