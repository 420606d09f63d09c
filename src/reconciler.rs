//! The diff engine (§4.8): classifies a freshly computed desired chunk set
//! against what the store already holds, applies moves, deletes orphans,
//! then generates context + embeddings for genuinely new content and
//! upserts everything. This is the same stat-sweep → classify → parallel
//! read+hash → sequential embed+upsert shape the teacher's local incremental
//! index used, retargeted at a remote store and a checksum identity key
//! instead of a content hash cache.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::RepoScope;
use crate::error::Result;
use crate::llm::chat::ChatClient;
use crate::llm::embedding::EmbeddingClient;
use crate::tokenizer::truncate_to_token_limit;
use crate::types::{Chunk, ExistingChunkInfo, SourceType};
use crate::vector_store::{ChunkMove, VectorStore};

/// §4.6: context generation is prompted with the full file content, bounded
/// to this many tokens so a very large file doesn't blow out the prompt.
const MAX_DOCUMENT_CONTEXT_TOKENS: usize = 16_000;

#[derive(Debug, Clone, Default)]
pub struct ReconcileStats {
    pub unchanged_chunks: usize,
    pub moved_chunks: usize,
    pub new_chunks: usize,
    pub upserted_chunks: usize,
    pub deleted_chunks: usize,
}

enum Classification {
    Unchanged,
    Moved { existing_id: i64 },
    New,
}

/// One classified desired chunk, carrying enough to drive steps 4/7/8.
struct Classified {
    chunk: Chunk,
    classification: Classification,
}

pub struct Reconciler {
    store: Arc<dyn VectorStore>,
    chat: Arc<ChatClient>,
    embedding: Arc<EmbeddingClient>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn VectorStore>, chat: Arc<ChatClient>, embedding: Arc<EmbeddingClient>) -> Self {
        Self { store, chat, embedding }
    }

    /// Runs the full algorithm in §4.8 over one batch of freshly chunked
    /// content and the repo scopes that produced it. `file_contents` maps
    /// each chunk's `filepath` to the full fetched file content, used as the
    /// context-generation document (§4.6) instead of a single chunk excerpt.
    pub async fn reconcile(
        &self,
        desired: Vec<Chunk>,
        repos: &[RepoScope],
        file_contents: &HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<ReconcileStats> {
        let mut stats = ReconcileStats::default();

        // Step 1: build desired state, keyed by checksum, preserving
        // insertion order for the deterministic classification pass.
        let mut target_order: Vec<String> = Vec::new();
        let mut target_state: HashMap<String, Vec<Chunk>> = HashMap::new();
        for chunk in desired {
            let checksum = chunk.checksum.clone();
            if !target_state.contains_key(&checksum) {
                target_order.push(checksum.clone());
            }
            target_state.entry(checksum).or_default().push(chunk);
        }

        // Step 2: fetch existing rows for every desired checksum.
        let checksums: Vec<String> = target_order.clone();
        let existing_by_checksum = self.store.fetch_chunks_by_checksums(&checksums).await?;

        // Step 3: classify in deterministic target_order.
        let mut assigned_ids: HashSet<i64> = HashSet::new();
        let mut taken_loc_keys: HashSet<String> = HashSet::new();
        let mut classified: Vec<Classified> = Vec::new();

        for checksum in &target_order {
            let chunks = target_state.get(checksum).cloned().unwrap_or_default();
            let pool = existing_by_checksum.get(checksum).cloned().unwrap_or_default();

            for chunk in chunks {
                let loc_key = chunk.loc_key();
                if taken_loc_keys.contains(&loc_key) {
                    warn!(loc_key, "duplicate locKey in desired state, dropping");
                    continue;
                }

                let at_target = pool.iter().find(|e| {
                    e.filepath == chunk.filepath
                        && e.chunk_id == chunk.chunk_id
                        && source_type_compatible(e.source_type, chunk.source_type)
                        && !assigned_ids.contains(&e.id)
                });

                let classification = if let Some(existing) = at_target {
                    assigned_ids.insert(existing.id);
                    if existing.source_type == chunk.source_type {
                        Classification::Unchanged
                    } else {
                        Classification::Moved { existing_id: existing.id }
                    }
                } else if let Some(stranded) = pool
                    .iter()
                    .find(|e| e.filepath.starts_with(crate::vector_store::STRANDED_PREFIX) && !assigned_ids.contains(&e.id))
                    .or_else(|| pool.iter().find(|e| !assigned_ids.contains(&e.id)))
                {
                    assigned_ids.insert(stranded.id);
                    Classification::Moved { existing_id: stranded.id }
                } else {
                    Classification::New
                };

                taken_loc_keys.insert(loc_key);
                classified.push(Classified { chunk, classification });
            }
        }

        for c in &classified {
            match c.classification {
                Classification::Unchanged => stats.unchanged_chunks += 1,
                Classification::Moved { .. } => stats.moved_chunks += 1,
                Classification::New => stats.new_chunks += 1,
            }
        }

        // Step 4: apply moves before deletes and new inserts.
        let moves: Vec<ChunkMove> = classified
            .iter()
            .filter_map(|c| match c.classification {
                Classification::Moved { existing_id } => Some(ChunkMove {
                    id: existing_id,
                    new_filepath: c.chunk.filepath.clone(),
                    new_chunk_id: c.chunk.chunk_id,
                    new_source_type: c.chunk.source_type,
                }),
                _ => None,
            })
            .collect();
        if !moves.is_empty() {
            let outcome = self.store.move_chunks_atomic(&moves).await?;
            info!(moved = outcome.moved, stranded = outcome.stranded, "applied chunk moves");
        }

        // Step 5: compute active sets and repo scope identifiers.
        let active_checksums: Vec<String> = target_order.clone();
        let active_github_urls: Vec<String> = classified
            .iter()
            .filter_map(|c| c.chunk.github_url.clone())
            .collect();
        let repo_base_urls: Vec<String> = repos
            .iter()
            .map(|r| format!("https://github.com/{}/{}/blob/{}/", r.owner, r.repo, r.branch))
            .collect();
        let repo_identifiers: Vec<String> = repos.iter().map(|r| format!("{}/{}", r.owner, r.repo)).collect();

        // Step 6: delete orphans, skipped entirely with no repo scope.
        if !repo_base_urls.is_empty() {
            let orphans = self
                .store
                .find_orphaned_chunk_ids(&active_checksums, &repo_base_urls, &active_github_urls)
                .await?;
            let stranded = self
                .store
                .find_stranded_chunk_ids(&active_checksums, &repo_identifiers)
                .await?;
            let mut to_delete: HashSet<i64> = orphans.into_iter().collect();
            to_delete.extend(stranded);
            let ids: Vec<i64> = to_delete.into_iter().collect();
            if !ids.is_empty() {
                stats.deleted_chunks = self.store.delete_chunks_by_ids(&ids).await?;
            }
        }

        // Step 7: context + embed pass for new chunks, grouped by filepath.
        let mut pending: Vec<Chunk> = classified
            .into_iter()
            .filter(|c| matches!(c.classification, Classification::New))
            .map(|c| c.chunk)
            .collect();

        if !pending.is_empty() {
            self.generate_contexts(&mut pending, file_contents, cancel).await?;
            let texts: Vec<String> = pending.iter().map(|c| c.contextual_text.clone()).collect();
            let embeddings = self.embedding.embed_documents(&texts, cancel).await?;
            for (chunk, embedding) in pending.iter_mut().zip(embeddings) {
                chunk.embedding = Some(embedding);
            }
        }

        // Step 8: upsert fully-populated new rows in one call. Moved/
        // unchanged rows already carry correct content in the store.
        if !pending.is_empty() {
            self.store.upsert_chunks(&pending).await?;
            stats.upserted_chunks = pending.len();
        }

        Ok(stats)
    }

    async fn generate_contexts(
        &self,
        pending: &mut [Chunk],
        file_contents: &HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut by_filepath: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, chunk) in pending.iter().enumerate() {
            by_filepath.entry(chunk.filepath.clone()).or_default().push(i);
        }

        for (filepath, indices) in by_filepath {
            let full_content = file_contents.get(&filepath).cloned().unwrap_or_else(|| pending[indices[0]].content.clone());
            let document_content = truncate_to_token_limit(&full_content, MAX_DOCUMENT_CONTEXT_TOKENS);
            let is_code = pending[indices[0]].source_type == SourceType::Code;

            let contexts = if is_code {
                let descriptions: Vec<String> = indices.iter().map(|&i| pending[i].content.clone()).collect();
                self.chat.generate_entity_contexts(&document_content, &descriptions, cancel).await?
            } else {
                let excerpts: Vec<String> = indices.iter().map(|&i| pending[i].content.clone()).collect();
                self.chat.generate_file_chunk_contexts(&document_content, &excerpts, cancel).await?
            };

            for (&idx, context) in indices.iter().zip(contexts) {
                let chunk = &mut pending[idx];
                chunk.contextual_text = if is_code {
                    if context.is_empty() {
                        chunk.content.clone()
                    } else {
                        format!("{}\n---\n{}", context, chunk.content)
                    }
                } else {
                    format!("{}---{}", context, chunk.content)
                };
            }
            let _ = filepath;
        }
        Ok(())
    }
}

/// Alias equivalence per §4.8: `mdx↔doc`, `typescript/python/rust↔code`.
/// `SourceType` already folds these at the type level (`normalize`), so any
/// two `SourceType` values reaching this point are compatible by construction
/// — this only guards the case where `ExistingChunkInfo` carries the desired
/// category exactly.
fn source_type_compatible(existing: SourceType, desired: SourceType) -> bool {
    existing == desired || matches!((existing, desired), (SourceType::Doc, SourceType::Doc) | (SourceType::Code, SourceType::Code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatMessage, ChatProvider, CompletionDelta, CompletionOptions, EmbeddingProvider as EmbeddingProviderTrait};
    use crate::vector_store::InMemoryVectorStore;
    use async_trait::async_trait;
    use futures::stream::BoxStream;

    struct FakeEmbedding;
    #[async_trait]
    impl EmbeddingProviderTrait for FakeEmbedding {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| vec![t.len() as f32]).collect())
        }
    }

    struct FakeChat;
    #[async_trait]
    impl ChatProvider for FakeChat {
        async fn complete(&self, messages: &[ChatMessage], _options: &CompletionOptions) -> Result<String> {
            let _ = messages;
            Ok("1. ctx".to_string())
        }
        async fn stream(
            &self,
            _messages: &[ChatMessage],
            _options: &CompletionOptions,
        ) -> Result<BoxStream<'static, Result<CompletionDelta>>> {
            unimplemented!()
        }
    }

    fn make_reconciler() -> (Reconciler, Arc<InMemoryVectorStore>) {
        let store = Arc::new(InMemoryVectorStore::new());
        let limits = crate::config::ProviderLimits::default();
        let chat = Arc::new(ChatClient::new(Arc::new(FakeChat), &limits, CompletionOptions::default()));
        let embedding = Arc::new(EmbeddingClient::new(Arc::new(FakeEmbedding), &limits));
        let reconciler = Reconciler::new(store.clone(), chat, embedding);
        (reconciler, store)
    }

    fn doc_chunk(filepath: &str, chunk_id: i32, checksum: &str) -> Chunk {
        Chunk {
            filepath: filepath.to_string(),
            chunk_id,
            chunk_title: "title".to_string(),
            content: "hello world".to_string(),
            contextual_text: String::new(),
            checksum: checksum.to_string(),
            embedding: None,
            source_type: SourceType::Doc,
            entity_type: None,
            start_line: None,
            end_line: None,
            github_url: Some("https://github.com/acme/widgets/blob/main/a.md".to_string()),
            docs_url: None,
            final_url: None,
        }
    }

    #[tokio::test]
    async fn new_chunk_gets_embedded_and_upserted() {
        let (reconciler, store) = make_reconciler();
        let cancel = CancellationToken::new();
        let stats = reconciler.reconcile(vec![doc_chunk("a.md", 0, "c1")], &[], &HashMap::new(), &cancel).await.unwrap();

        assert_eq!(stats.new_chunks, 1);
        assert_eq!(stats.upserted_chunks, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn rerun_on_unchanged_corpus_produces_zero_deltas() {
        let (reconciler, store) = make_reconciler();
        let cancel = CancellationToken::new();
        reconciler.reconcile(vec![doc_chunk("a.md", 0, "c1")], &[], &HashMap::new(), &cancel).await.unwrap();

        let stats = reconciler.reconcile(vec![doc_chunk("a.md", 0, "c1")], &[], &HashMap::new(), &cancel).await.unwrap();
        assert_eq!(stats.unchanged_chunks, 1);
        assert_eq!(stats.new_chunks, 0);
        assert_eq!(stats.moved_chunks, 0);
        assert_eq!(stats.upserted_chunks, 0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn rename_with_unchanged_content_is_a_move() {
        let (reconciler, _store) = make_reconciler();
        let cancel = CancellationToken::new();
        reconciler.reconcile(vec![doc_chunk("a.md", 0, "c1")], &[], &HashMap::new(), &cancel).await.unwrap();

        let stats = reconciler.reconcile(vec![doc_chunk("docs/a.md", 0, "c1")], &[], &HashMap::new(), &cancel).await.unwrap();
        assert_eq!(stats.moved_chunks, 1);
        assert_eq!(stats.upserted_chunks, 0);
    }

    #[tokio::test]
    async fn duplicate_loc_key_in_desired_state_is_dropped() {
        let (reconciler, _store) = make_reconciler();
        let cancel = CancellationToken::new();
        let stats = reconciler
            .reconcile(vec![doc_chunk("a.md", 0, "c1"), doc_chunk("a.md", 0, "c2")], &[], &HashMap::new(), &cancel)
            .await
            .unwrap();
        assert_eq!(stats.new_chunks, 1);
    }

    #[tokio::test]
    async fn empty_repo_scope_skips_orphan_deletion() {
        let (reconciler, store) = make_reconciler();
        let cancel = CancellationToken::new();
        reconciler.reconcile(vec![doc_chunk("a.md", 0, "c1")], &[], &HashMap::new(), &cancel).await.unwrap();

        let stats = reconciler.reconcile(vec![], &[], &HashMap::new(), &cancel).await.unwrap();
        assert_eq!(stats.deleted_chunks, 0);
        assert_eq!(store.len(), 1);
    }

    struct CapturingChat {
        last_prompt: std::sync::Mutex<Option<String>>,
    }
    #[async_trait]
    impl ChatProvider for CapturingChat {
        async fn complete(&self, messages: &[ChatMessage], _options: &CompletionOptions) -> Result<String> {
            *self.last_prompt.lock().unwrap() = messages.first().map(|m| m.content.clone());
            Ok("1. ctx".to_string())
        }
        async fn stream(
            &self,
            _messages: &[ChatMessage],
            _options: &CompletionOptions,
        ) -> Result<BoxStream<'static, Result<CompletionDelta>>> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn context_generation_is_prompted_with_the_full_file_content() {
        let store = Arc::new(InMemoryVectorStore::new());
        let limits = crate::config::ProviderLimits::default();
        let capturing = Arc::new(CapturingChat { last_prompt: std::sync::Mutex::new(None) });
        let chat = Arc::new(ChatClient::new(capturing.clone(), &limits, CompletionOptions::default()));
        let embedding = Arc::new(EmbeddingClient::new(Arc::new(FakeEmbedding), &limits));
        let reconciler = Reconciler::new(store, chat, embedding);
        let cancel = CancellationToken::new();

        let full_file = "# Title\nhello world\nmuch more surrounding context than the chunk alone carries";
        let mut file_contents = HashMap::new();
        file_contents.insert("a.md".to_string(), full_file.to_string());

        reconciler.reconcile(vec![doc_chunk("a.md", 0, "c1")], &[], &file_contents, &cancel).await.unwrap();

        let prompt = capturing.last_prompt.lock().unwrap().clone().unwrap();
        assert!(prompt.contains(full_file));
    }

    #[tokio::test]
    async fn context_generation_falls_back_to_chunk_content_when_file_content_is_missing() {
        let (reconciler, _store) = make_reconciler();
        let cancel = CancellationToken::new();
        // No entry for "a.md" in the file_contents map; must not panic and
        // must still generate a context using the chunk's own content.
        let stats = reconciler.reconcile(vec![doc_chunk("a.md", 0, "c1")], &[], &HashMap::new(), &cancel).await.unwrap();
        assert_eq!(stats.upserted_chunks, 1);
    }
}
