//! Shared data model (§3). `Chunk` is the unit every later stage — the
//! reconciler, the vector store, the retriever, the answer composer —
//! operates on, whether it originated from a fresh chunking pass (desired
//! state) or was read back from the store (existing state).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Doc,
    Code,
}

impl SourceType {
    /// Legacy rows may carry a finer-grained type (`mdx`, `typescript`,
    /// `python`, `rust`); these are aliases of `doc`/`code` on read.
    pub fn normalize(raw: &str) -> Option<SourceType> {
        match raw {
            "doc" | "mdx" => Some(SourceType::Doc),
            "code" | "typescript" | "python" | "rust" | "go" | "java" | "csharp" | "php" => {
                Some(SourceType::Code)
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Doc => "doc",
            SourceType::Code => "code",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub filepath: String,
    pub chunk_id: i32,
    pub chunk_title: String,
    pub content: String,
    /// Populated once a context summary has been generated; `content` alone
    /// before that point.
    pub contextual_text: String,
    pub checksum: String,
    pub embedding: Option<Vec<f32>>,
    pub source_type: SourceType,
    pub entity_type: Option<String>,
    pub start_line: Option<i32>,
    pub end_line: Option<i32>,
    pub github_url: Option<String>,
    pub docs_url: Option<String>,
    pub final_url: Option<String>,
}

impl Chunk {
    pub fn loc_key(&self) -> String {
        format!("{}:{}:{}", self.filepath, self.chunk_id, self.source_type.as_str())
    }
}

/// A stored row's identity + location, as returned by
/// `fetchChunksByChecksums` (§4.7) — just enough to classify it without
/// paying for the full row (embedding, content) over the wire.
#[derive(Debug, Clone)]
pub struct ExistingChunkInfo {
    pub id: i64,
    pub filepath: String,
    pub chunk_id: i32,
    pub source_type: SourceType,
    pub checksum: String,
    pub github_url: Option<String>,
}

/// A fully-parsed code entity, the unit the code chunking path emits one
/// chunk per (§4.2 code path).
#[derive(Debug, Clone)]
pub struct CodeEntity {
    pub name: String,
    pub qualified_name: String,
    pub entity_type: String,
    pub start_line: i32,
    pub end_line: i32,
    pub docstring: Option<String>,
    pub parameters: Vec<String>,
    pub return_type: Option<String>,
    pub parent_context: Option<String>,
}

/// One fetched file, ready for chunking (§4.3 fetcher output).
#[derive(Debug, Clone)]
pub struct FetchedFile {
    pub path: String,
    pub relative_path: String,
    pub content: String,
    pub sha: String,
    pub size: u64,
    pub source_url: String,
}
