//! Repository content fetching (§4.3). Lists a repo's tree through the
//! GitHub Git Trees API, or walks a local checkout with `ignore::WalkBuilder`
//! when no token/network access is configured, then downloads raw file
//! content with bounded parallelism.

use std::path::Path;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::Semaphore;

use crate::config::{RepoKind, RepoScope};
use crate::error::{MimirError, Result};
use crate::types::FetchedFile;

const MAX_CONCURRENT_DOWNLOADS: usize = 8;
const USER_AGENT: &str = "mimir-ingest";

/// Doc-scope extensions recognized at fetch time (§4.3 step 2). Code-scope
/// filtering reuses `inspector::is_source_file`'s per-language driver table.
const DOC_EXTENSIONS: &[&str] = &["md", "mdx"];

/// Per-language/per-kind extension predicate applied before a blob is ever
/// downloaded, so binary or otherwise-unrecognized files never reach the
/// chunkers (§4.3 step 2).
fn matches_extension(relative_path: &str, kind: RepoKind) -> bool {
    match kind {
        RepoKind::Code => crate::inspector::is_source_file(Path::new(relative_path)),
        RepoKind::Docs => Path::new(relative_path)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| DOC_EXTENSIONS.iter().any(|doc_ext| doc_ext.eq_ignore_ascii_case(ext)))
            .unwrap_or(false),
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
    truncated: bool,
}

#[derive(Debug, Clone, serde::Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    sha: String,
    size: Option<u64>,
}

fn build_client(scope: &RepoScope) -> Result<reqwest::Client> {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(reqwest::header::USER_AGENT, USER_AGENT.parse().unwrap());
    headers.insert(
        reqwest::header::ACCEPT,
        "application/vnd.github+json".parse().unwrap(),
    );
    if let Some(token) = &scope.token {
        let value = format!("Bearer {token}");
        let mut header = reqwest::header::HeaderValue::from_str(&value)
            .map_err(|e| MimirError::Config(format!("invalid github token: {e}")))?;
        header.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, header);
    }
    reqwest::Client::builder()
        .default_headers(headers)
        .build()
        .map_err(|e| MimirError::Transport(e.to_string()))
}

fn matches_include(relative_path: &str, include_directories: &[String]) -> bool {
    if include_directories.is_empty() {
        return true;
    }
    include_directories
        .iter()
        .any(|dir| relative_path.starts_with(dir.trim_end_matches('/')))
}

/// §4.3's exclude dialect, deliberately simpler than a real glob: a leading
/// `*` matches by suffix, a trailing `*` matches by prefix, and anything else
/// matches as a substring of the path or an exact filename match.
fn matches_exclude(relative_path: &str, exclude_patterns: &[String]) -> bool {
    exclude_patterns.iter().any(|pattern| pattern_matches(relative_path, pattern))
}

fn pattern_matches(path: &str, pattern: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix('*') {
        path.ends_with(suffix)
    } else if let Some(prefix) = pattern.strip_suffix('*') {
        path.starts_with(prefix)
    } else {
        let filename = path.rsplit('/').next().unwrap_or(path);
        path.contains(pattern) || filename == pattern
    }
}

/// Lists the repo's git tree recursively via the GitHub API. Callers filter
/// by `include_directories`/`exclude_patterns` and by extension before
/// downloading blobs.
async fn list_tree_via_github(
    client: &reqwest::Client,
    scope: &RepoScope,
) -> Result<Vec<TreeEntry>> {
    let url = format!(
        "https://api.github.com/repos/{}/{}/git/trees/{}?recursive=1",
        scope.owner, scope.repo, scope.branch
    );
    let resp = client
        .get(&url)
        .send()
        .await
        .map_err(|e| MimirError::Transport(e.to_string()))?;

    if !resp.status().is_success() {
        return Err(MimirError::Provider {
            status: resp.status().as_u16(),
            message: format!("GitHub tree listing failed for {}/{}", scope.owner, scope.repo),
        });
    }

    let parsed: TreeResponse = resp.json().await.map_err(|e| MimirError::Transport(e.to_string()))?;
    if parsed.truncated {
        tracing::warn!(owner = %scope.owner, repo = %scope.repo, "github tree listing truncated, some files may be missed");
    }
    Ok(parsed.tree.into_iter().filter(|e| e.kind == "blob").collect())
}

/// Falls back to walking a local checkout (used in tests and for
/// already-cloned repos), honouring `.gitignore` the way the teacher's own
/// repo scanner does.
fn list_tree_via_local_walk(root: &Path) -> Vec<String> {
    use ignore::WalkBuilder;

    let mut out = Vec::new();
    for entry in WalkBuilder::new(root).hidden(false).build().flatten() {
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            if let Ok(rel) = entry.path().strip_prefix(root) {
                out.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    out
}

async fn download_blob(
    client: &reqwest::Client,
    scope: &RepoScope,
    entry: &TreeEntry,
) -> Result<FetchedFile> {
    let raw_url = format!(
        "https://raw.githubusercontent.com/{}/{}/{}/{}",
        scope.owner, scope.repo, scope.branch, entry.path
    );
    let resp = client
        .get(&raw_url)
        .send()
        .await
        .map_err(|e| MimirError::Transport(e.to_string()))?;

    if !resp.status().is_success() {
        return Err(MimirError::Provider {
            status: resp.status().as_u16(),
            message: format!("failed to download {}", entry.path),
        });
    }

    let content = resp.text().await.map_err(|e| MimirError::Transport(e.to_string()))?;
    let source_url = format!(
        "https://github.com/{}/{}/blob/{}/{}",
        scope.owner, scope.repo, scope.branch, entry.path
    );

    Ok(FetchedFile {
        path: entry.path.clone(),
        relative_path: scope
            .directory
            .as_deref()
            .and_then(|dir| entry.path.strip_prefix(dir.trim_end_matches('/')))
            .map(|p| p.trim_start_matches('/').to_string())
            .unwrap_or_else(|| entry.path.clone()),
        content,
        sha: entry.sha.clone(),
        size: entry.size.unwrap_or(0),
        source_url,
    })
}

/// Fetches every file under a local checkout directly off disk, skipping
/// the GitHub API entirely. Used when a repo scope has no network access
/// configured (e.g. an already-cloned working copy passed via `local_path`).
pub fn fetch_local_files(
    local_path: &Path,
    include_directories: &[String],
    exclude_patterns: &[String],
    kind: RepoKind,
) -> Result<Vec<FetchedFile>> {
    let mut out = Vec::new();
    for relative_path in list_tree_via_local_walk(local_path) {
        if !matches_include(&relative_path, include_directories)
            || matches_exclude(&relative_path, exclude_patterns)
            || !matches_extension(&relative_path, kind)
        {
            continue;
        }
        let full = local_path.join(&relative_path);
        let content = std::fs::read_to_string(&full)
            .map_err(|e| MimirError::Chunk { path: relative_path.clone(), reason: e.to_string() })?;
        let size = content.len() as u64;
        out.push(FetchedFile {
            path: relative_path.clone(),
            relative_path: relative_path.clone(),
            content,
            sha: crate::fingerprint::checksum(&relative_path),
            size,
            source_url: full.to_string_lossy().to_string(),
        });
    }
    Ok(out)
}

/// Fetches every file in `scope` matching its include directories and the
/// global exclude patterns, downloading raw content with bounded
/// parallelism.
pub async fn fetch_repo_files(scope: &RepoScope, exclude_patterns: &[String]) -> Result<Vec<FetchedFile>> {
    let client = build_client(scope)?;
    let entries = list_tree_via_github(&client, scope).await?;

    let filtered: Vec<TreeEntry> = entries
        .into_iter()
        .filter(|e| matches_include(&e.path, &scope.include_directories))
        .filter(|e| !matches_exclude(&e.path, exclude_patterns))
        .filter(|e| matches_extension(&e.path, scope.kind))
        .collect();

    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_DOWNLOADS));
    let client = Arc::new(client);
    let scope = Arc::new(scope.clone());

    let results = stream::iter(filtered.into_iter().map(|entry| {
        let semaphore = Arc::clone(&semaphore);
        let client = Arc::clone(&client);
        let scope = Arc::clone(&scope);
        async move {
            let _permit = semaphore.acquire().await.expect("semaphore not closed");
            download_blob(&client, &scope, &entry).await
        }
    }))
    .buffer_unordered(MAX_CONCURRENT_DOWNLOADS)
    .collect::<Vec<_>>()
    .await;

    results.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn include_directories_empty_matches_everything() {
        assert!(matches_include("src/lib.rs", &[]));
    }

    #[test]
    fn include_directories_filters_by_prefix() {
        let include = vec!["docs".to_string()];
        assert!(matches_include("docs/guide.md", &include));
        assert!(!matches_include("src/lib.rs", &include));
    }

    #[test]
    fn leading_star_pattern_matches_by_suffix_regardless_of_directory() {
        let exclude = vec!["*.lock".to_string()];
        assert!(matches_exclude("Cargo.lock", &exclude));
        assert!(matches_exclude("nested/dir/Cargo.lock", &exclude));
        assert!(!matches_exclude("Cargo.toml", &exclude));
    }

    #[test]
    fn trailing_star_pattern_matches_by_prefix() {
        let exclude = vec!["node_modules/*".to_string()];
        assert!(matches_exclude("node_modules/foo/bar.js", &exclude));
        assert!(!matches_exclude("src/node_modules.rs", &exclude));
    }

    #[test]
    fn bare_pattern_matches_substring_or_exact_filename() {
        let exclude = vec!["test".to_string()];
        assert!(matches_exclude("src/test_utils.rs", &exclude));
        assert!(matches_exclude("test", &exclude));
        assert!(!matches_exclude("src/lib.rs", &exclude));
    }

    #[test]
    fn code_scope_extension_filter_rejects_unrecognized_extensions() {
        assert!(matches_extension("src/lib.rs", RepoKind::Code));
        assert!(!matches_extension("assets/logo.png", RepoKind::Code));
    }

    #[test]
    fn docs_scope_extension_filter_only_admits_markdown() {
        assert!(matches_extension("README.md", RepoKind::Docs));
        assert!(matches_extension("guide.mdx", RepoKind::Docs));
        assert!(!matches_extension("assets/logo.png", RepoKind::Docs));
    }

    #[test]
    fn local_walk_finds_files_recursively() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn main() {}").unwrap();
        std::fs::write(dir.path().join("nested/b.rs"), "fn f() {}").unwrap();

        let files = list_tree_via_local_walk(dir.path());
        assert!(files.contains(&"a.rs".to_string()));
        assert!(files.contains(&"nested/b.rs".to_string()));
    }
}
