//! Answer composition (§4.10): resolves canonical source links for each
//! retrieved chunk, maps model-declared citations back onto them, and
//! extracts incremental deltas for the streaming path.

use std::sync::Arc;

use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::llm::chat::ChatClient;
use crate::llm::{ChatMessage, CompletionDelta};
use crate::retriever::RetrievedChunk;
use crate::types::SourceType;

#[derive(Debug, Clone)]
pub struct Source {
    pub filepath: String,
    pub chunk_title: String,
    pub final_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<Source>,
}

/// §4.10 link-resolution rule. Doc chunks prefer `docsUrl`, then
/// `githubUrl`, then the bare `filepath`. Code chunks link straight to the
/// line range on GitHub, stripping any existing URL fragment first.
pub fn resolve_final_url(chunk: &RetrievedChunk) -> Option<String> {
    match chunk.source_type {
        SourceType::Doc => chunk
            .docs_url
            .clone()
            .or_else(|| chunk.github_url.clone())
            .or_else(|| Some(chunk.filepath.clone())),
        SourceType::Code => {
            if let Some(github_url) = &chunk.github_url {
                let base = github_url.split('#').next().unwrap_or(github_url);
                let fragment = match (chunk.start_line, chunk.end_line) {
                    (Some(start), Some(end)) if start != end => format!("#L{start}-L{end}"),
                    (Some(start), _) => format!("#L{start}"),
                    _ => String::new(),
                };
                Some(format!("{base}{fragment}"))
            } else {
                Some(chunk.filepath.clone())
            }
        }
    }
}

/// A model-declared citation, matched back onto retrieved chunks by
/// `(filepath, chunkTitle)`, falling back to filepath alone.
#[derive(Debug, Clone)]
pub struct Citation {
    pub filepath: String,
    pub chunk_title: Option<String>,
}

fn map_citations(citations: &[Citation], chunks: &[RetrievedChunk]) -> Vec<Source> {
    if citations.is_empty() {
        return chunks
            .iter()
            .map(|c| Source { filepath: c.filepath.clone(), chunk_title: c.chunk_title.clone(), final_url: resolve_final_url(c) })
            .collect();
    }

    let mut sources = Vec::new();
    for citation in citations {
        let matched = citation
            .chunk_title
            .as_ref()
            .and_then(|title| chunks.iter().find(|c| c.filepath == citation.filepath && &c.chunk_title == title))
            .or_else(|| chunks.iter().find(|c| c.filepath == citation.filepath));

        if let Some(chunk) = matched {
            sources.push(Source {
                filepath: chunk.filepath.clone(),
                chunk_title: chunk.chunk_title.clone(),
                final_url: resolve_final_url(chunk),
            });
        }
    }

    if sources.is_empty() {
        return chunks
            .iter()
            .map(|c| Source { filepath: c.filepath.clone(), chunk_title: c.chunk_title.clone(), final_url: resolve_final_url(c) })
            .collect();
    }
    sources
}

pub struct AnswerComposer {
    chat: Arc<ChatClient>,
}

impl AnswerComposer {
    pub fn new(chat: Arc<ChatClient>) -> Self {
        Self { chat }
    }

    fn build_prompt(question: &str, chunks: &[RetrievedChunk]) -> Vec<ChatMessage> {
        let mut context = String::new();
        for chunk in chunks {
            context.push_str(&format!("### {} ({})\n{}\n\n", chunk.chunk_title, chunk.filepath, chunk.content));
        }
        vec![
            ChatMessage {
                role: "system".to_string(),
                content: "Answer the question using only the provided context. Cite sources by filepath.".to_string(),
            },
            ChatMessage { role: "user".to_string(), content: format!("<context>\n{context}</context>\n\nQuestion: {question}") },
        ]
    }

    /// Non-streaming path: one shot completion, citations mapped with the
    /// all-chunks fallback policy.
    pub async fn compose(
        &self,
        question: &str,
        chunks: &[RetrievedChunk],
        citations: &[Citation],
        cancel: &CancellationToken,
    ) -> Result<Answer> {
        if chunks.is_empty() {
            return Ok(Answer {
                answer: "I could not find relevant context to answer this question.".to_string(),
                sources: vec![],
            });
        }
        let messages = Self::build_prompt(question, chunks);
        let answer = self.chat.generate_answer(&messages, cancel).await?;
        let sources = map_citations(citations, chunks);
        Ok(Answer { answer, sources })
    }

    /// Streaming path: yields only the incremental delta between successive
    /// cumulative completions, since providers may emit cumulative partials
    /// rather than true deltas.
    pub async fn compose_stream(
        &self,
        question: &str,
        chunks: &[RetrievedChunk],
        cancel: &CancellationToken,
    ) -> Result<BoxStream<'static, Result<CompletionDelta>>> {
        let messages = Self::build_prompt(question, chunks);
        self.chat.stream_answer(&messages, cancel).await
    }
}

/// Tracks cumulative `.answer` partials and emits only the new suffix each
/// call, per the streaming contract in §4.10.
#[derive(Default)]
pub struct DeltaTracker {
    previous: String,
}

impl DeltaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delta(&mut self, cumulative: &str) -> String {
        let delta = cumulative.strip_prefix(self.previous.as_str()).unwrap_or(cumulative).to_string();
        self.previous = cumulative.to_string();
        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(filepath: &str, title: &str, source_type: SourceType) -> RetrievedChunk {
        RetrievedChunk {
            filepath: filepath.to_string(),
            chunk_id: 0,
            chunk_title: title.to_string(),
            content: "content".to_string(),
            contextual_text: "content".to_string(),
            source_type,
            github_url: Some("https://github.com/acme/widgets/blob/main/src/a.rs".to_string()),
            docs_url: None,
            start_line: Some(10),
            end_line: Some(20),
            similarity: Some(0.9),
            bm25_rank: None,
            vector_rank: None,
            bm25_order: None,
        }
    }

    #[test]
    fn doc_link_prefers_docs_url() {
        let mut c = chunk("a.md", "A", SourceType::Doc);
        c.docs_url = Some("https://docs.acme.com/a".to_string());
        assert_eq!(resolve_final_url(&c).as_deref(), Some("https://docs.acme.com/a"));
    }

    #[test]
    fn doc_link_falls_back_to_github_then_filepath() {
        let mut c = chunk("a.md", "A", SourceType::Doc);
        c.github_url = None;
        assert_eq!(resolve_final_url(&c).as_deref(), Some("a.md"));
    }

    #[test]
    fn code_link_uses_line_range_fragment() {
        let c = chunk("src/a.rs", "fn a", SourceType::Code);
        assert_eq!(resolve_final_url(&c).as_deref(), Some("https://github.com/acme/widgets/blob/main/src/a.rs#L10-L20"));
    }

    #[test]
    fn code_link_single_line_has_no_range() {
        let mut c = chunk("src/a.rs", "fn a", SourceType::Code);
        c.end_line = Some(10);
        assert_eq!(resolve_final_url(&c).as_deref(), Some("https://github.com/acme/widgets/blob/main/src/a.rs#L10"));
    }

    #[test]
    fn citation_mapping_falls_back_to_all_chunks_when_none_declared() {
        let chunks = vec![chunk("a.md", "A", SourceType::Doc), chunk("b.md", "B", SourceType::Doc)];
        let sources = map_citations(&[], &chunks);
        assert_eq!(sources.len(), 2);
    }

    #[test]
    fn citation_mapping_matches_by_filepath_and_title() {
        let chunks = vec![chunk("a.md", "A", SourceType::Doc), chunk("b.md", "B", SourceType::Doc)];
        let citations = vec![Citation { filepath: "b.md".to_string(), chunk_title: Some("B".to_string()) }];
        let sources = map_citations(&citations, &chunks);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].filepath, "b.md");
    }

    #[test]
    fn delta_tracker_emits_only_suffix() {
        let mut tracker = DeltaTracker::new();
        assert_eq!(tracker.delta("Hello"), "Hello");
        assert_eq!(tracker.delta("Hello, world"), ", world");
    }
}
