//! Ingestion orchestration: fetch → entity extraction → chunk → reconcile
//! (§4.3 through §4.8 end to end), invoked by both the CLI `ingest` command
//! and the `/ingest` and `/webhook/github` HTTP routes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{Config, RepoKind, RepoScope};
use crate::error::{MimirError, Result};
use crate::inspector;
use crate::reconciler::{Reconciler, ReconcileStats};
use crate::source_fetcher;
use crate::types::{Chunk, FetchedFile, SourceType};

#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub stats: ReconcileStats,
    pub duration_ms: u128,
    pub files_fetched: usize,
}

pub struct Pipeline {
    reconciler: Reconciler,
}

impl Pipeline {
    pub fn new(reconciler: Reconciler) -> Self {
        Self { reconciler }
    }

    /// Runs one full ingestion pass over every configured repo scope.
    pub async fn run(&self, config: &Config, cancel: &CancellationToken) -> Result<IngestOutcome> {
        let started = Instant::now();
        let mut files_fetched = 0usize;
        let mut desired: Vec<Chunk> = Vec::new();
        let mut file_contents: HashMap<String, String> = HashMap::new();

        for scope in &config.github.repos {
            if cancel.is_cancelled() {
                return Err(MimirError::Cancelled);
            }

            let files = source_fetcher::fetch_repo_files(scope, &config.exclude_patterns).await?;
            files_fetched += files.len();
            info!(owner = %scope.owner, repo = %scope.repo, files = files.len(), "fetched repo scope");

            for file in &files {
                file_contents.insert(file.relative_path.clone(), file.content.clone());
            }

            let chunks = chunk_scope(scope, files)?;
            desired.extend(chunks);
        }

        let stats = self.reconciler.reconcile(desired, &config.github.repos, &file_contents, cancel).await?;
        info!(
            unchanged = stats.unchanged_chunks,
            moved = stats.moved_chunks,
            new = stats.new_chunks,
            deleted = stats.deleted_chunks,
            "reconciliation complete"
        );

        Ok(IngestOutcome { stats, duration_ms: started.elapsed().as_millis(), files_fetched })
    }

    /// Runs ingestion over an already-checked-out local directory, bypassing
    /// the GitHub API entirely. Used by the CLI for local testing.
    pub async fn run_local(
        &self,
        local_path: &Path,
        scope: &RepoScope,
        exclude_patterns: &[String],
        repos: &[RepoScope],
        cancel: &CancellationToken,
    ) -> Result<IngestOutcome> {
        let started = Instant::now();
        let files = source_fetcher::fetch_local_files(local_path, &scope.include_directories, exclude_patterns, scope.kind)?;
        let files_fetched = files.len();
        let file_contents: HashMap<String, String> =
            files.iter().map(|f| (f.relative_path.clone(), f.content.clone())).collect();
        let chunks = chunk_scope(scope, files)?;
        let stats = self.reconciler.reconcile(chunks, repos, &file_contents, cancel).await?;
        Ok(IngestOutcome { stats, duration_ms: started.elapsed().as_millis(), files_fetched })
    }
}

/// Chunks every fetched file in one repo scope according to its kind,
/// running entity extraction and chunking in parallel via rayon since
/// neither touches the network or the store (§5 concurrency model).
fn chunk_scope(scope: &RepoScope, files: Vec<FetchedFile>) -> Result<Vec<Chunk>> {
    let source_type = match scope.kind {
        RepoKind::Docs => SourceType::Doc,
        RepoKind::Code => SourceType::Code,
    };

    let results: Vec<Result<Vec<Chunk>>> = files
        .par_iter()
        .map(|file| chunk_one_file(file, source_type))
        .collect();

    let mut desired = Vec::new();
    for result in results {
        desired.extend(result?);
    }
    Ok(desired)
}

fn chunk_one_file(file: &FetchedFile, source_type: SourceType) -> Result<Vec<Chunk>> {
    let entities = if source_type == SourceType::Code {
        let path = Path::new(&file.relative_path);
        if !inspector::is_source_file(path) {
            return Ok(vec![]);
        }
        inspector::extract_entities(path, &file.content).map_err(|e| MimirError::Chunk {
            path: file.relative_path.clone(),
            reason: e.to_string(),
        })?
    } else {
        vec![]
    };

    if source_type == SourceType::Code && entities.is_empty() {
        warn!(path = %file.relative_path, "no entities extracted, chunking as one module-level chunk");
    }

    Ok(crate::chunker::chunk_file(file, source_type, &entities, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepoKind;

    fn scope(kind: RepoKind) -> RepoScope {
        RepoScope {
            owner: "acme".to_string(),
            repo: "widgets".to_string(),
            branch: "main".to_string(),
            token: None,
            directory: None,
            include_directories: vec![],
            kind,
        }
    }

    fn file(path: &str, content: &str) -> FetchedFile {
        FetchedFile {
            path: path.to_string(),
            relative_path: path.to_string(),
            content: content.to_string(),
            sha: "abc".to_string(),
            size: content.len() as u64,
            source_url: format!("https://github.com/acme/widgets/blob/main/{path}"),
        }
    }

    #[test]
    fn chunks_doc_files_under_docs_scope() {
        let chunks = chunk_scope(&scope(RepoKind::Docs), vec![file("README.md", "# Title\nbody\n")]).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source_type, SourceType::Doc);
    }

    #[test]
    fn chunks_code_files_under_code_scope() {
        let chunks = chunk_scope(&scope(RepoKind::Code), vec![file("lib.rs", "fn add(a: i32, b: i32) -> i32 { a + b }\n")])
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source_type, SourceType::Code);
    }

    #[test]
    fn unrecognized_extension_yields_no_chunks() {
        let chunks = chunk_scope(&scope(RepoKind::Code), vec![file("notes.txt", "hello")]).unwrap();
        assert!(chunks.is_empty());
    }
}
