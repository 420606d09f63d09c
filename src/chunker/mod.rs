//! Chunking entry point (§4.2). Dispatches a fetched file to the markdown or
//! code path by its `SourceType`, and owns the token cap shared by both.

pub mod code;
pub mod markdown;

use crate::types::{Chunk, CodeEntity, FetchedFile, SourceType};

/// Default embedding token cap (§4.2). Chunks above this are sub-split.
pub const DEFAULT_TOKEN_CAP: usize = 8192;

/// Chunks a fetched documentation file.
pub fn chunk_doc(file: &FetchedFile, docs_url: Option<&str>) -> Vec<Chunk> {
    markdown::chunk_markdown(
        &file.relative_path,
        &file.content,
        DEFAULT_TOKEN_CAP,
        Some(&file.source_url),
        docs_url,
    )
}

/// Chunks a fetched code file, given its pre-extracted entities.
pub fn chunk_source(file: &FetchedFile, entities: &[CodeEntity]) -> Vec<Chunk> {
    code::chunk_code_file(
        &file.relative_path,
        &file.content,
        entities,
        DEFAULT_TOKEN_CAP,
        Some(&file.source_url),
    )
}

/// Chunks a fetched file according to its declared source type. `entities`
/// is ignored for `Doc` files and required (possibly empty) for `Code`.
pub fn chunk_file(
    file: &FetchedFile,
    source_type: SourceType,
    entities: &[CodeEntity],
    docs_url: Option<&str>,
) -> Vec<Chunk> {
    match source_type {
        SourceType::Doc => chunk_doc(file, docs_url),
        SourceType::Code => chunk_source(file, entities),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(relative_path: &str, content: &str) -> FetchedFile {
        FetchedFile {
            path: relative_path.to_string(),
            relative_path: relative_path.to_string(),
            content: content.to_string(),
            sha: "deadbeef".to_string(),
            size: content.len() as u64,
            source_url: format!("https://github.com/example/repo/blob/main/{relative_path}"),
        }
    }

    #[test]
    fn dispatches_doc_files_to_markdown_path() {
        let f = file("README.mdx", "# Title\nbody\n");
        let chunks = chunk_file(&f, SourceType::Doc, &[], None);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source_type, SourceType::Doc);
    }

    #[test]
    fn dispatches_code_files_to_code_path() {
        let f = file("lib.rs", "const X: u32 = 1;\n");
        let chunks = chunk_file(&f, SourceType::Code, &[], None);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source_type, SourceType::Code);
    }
}
