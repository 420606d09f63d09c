//! Environment-driven configuration. Every recognized `MIMIR_*` variable is
//! enumerated below; `load()` rejects any `MIMIR_`-prefixed variable it does
//! not recognize, the same "unknown keys are rejected at load time" contract
//! the teacher's JSON config used `#[serde(default)]` structs for, adapted
//! here from file-based to env-based loading.

use std::collections::HashSet;
use std::env;

use crate::error::{MimirError, Result};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub api_key: String,
    pub github_webhook_secret: Option<String>,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub service_role_key: String,
    pub table: String,
    pub similarity_threshold: f32,
    pub match_count: usize,
    pub bm25_match_count: usize,
    pub enable_hybrid_search: bool,
}

#[derive(Debug, Clone)]
pub struct RepoScope {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub token: Option<String>,
    pub directory: Option<String>,
    pub include_directories: Vec<String>,
    /// `doc` or `code` — which chunking path this scope feeds.
    pub kind: RepoKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoKind {
    Docs,
    Code,
}

#[derive(Debug, Clone)]
pub struct GithubConfig {
    pub output_dir: String,
    pub repos: Vec<RepoScope>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingProvider {
    OpenAi,
    Google,
    Mistral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatProvider {
    OpenAi,
    Google,
    Mistral,
    Anthropic,
}

#[derive(Debug, Clone)]
pub struct ProviderLimits {
    pub batch_size: usize,
    pub concurrency: usize,
    pub max_requests_per_minute: u32,
    pub max_tokens_per_minute: u32,
    pub retries: u32,
}

impl Default for ProviderLimits {
    fn default() -> Self {
        Self {
            batch_size: 100,
            concurrency: 4,
            max_requests_per_minute: 500,
            max_tokens_per_minute: 1_000_000,
            retries: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub model: String,
    pub api_key: String,
    pub base_url: Option<String>,
    pub limits: ProviderLimits,
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub provider: ChatProvider,
    pub model: String,
    pub api_key: String,
    pub base_url: Option<String>,
    pub temperature: f32,
    pub max_output_tokens: usize,
    pub limits: ProviderLimits,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub supabase: SupabaseConfig,
    pub github: GithubConfig,
    pub embedding: EmbeddingConfig,
    pub chat: ChatConfig,
    pub exclude_patterns: Vec<String>,
    pub log_level: String,
}

/// Every recognized `MIMIR_*` variable name, used to reject unrecognized ones.
/// Numbered `CODE_REPO_{N}_*` / `DOCS_REPO_{N}_*` keys are matched by prefix
/// since N is unbounded.
const RECOGNIZED_EXACT: &[&str] = &[
    "MIMIR_SERVER_API_KEY",
    "MIMIR_SERVER_GITHUB_WEBHOOK_SECRET",
    "MIMIR_SERVER_PORT",
    "MIMIR_SUPABASE_URL",
    "MIMIR_SUPABASE_SERVICE_ROLE_KEY",
    "MIMIR_SUPABASE_TABLE",
    "MIMIR_SUPABASE_SIMILARITY_THRESHOLD",
    "MIMIR_SUPABASE_MATCH_COUNT",
    "MIMIR_SUPABASE_BM25_MATCH_COUNT",
    "MIMIR_SUPABASE_ENABLE_HYBRID_SEARCH",
    "MIMIR_GITHUB_URL",
    "MIMIR_GITHUB_BRANCH",
    "MIMIR_GITHUB_TOKEN",
    "MIMIR_GITHUB_DIRECTORY",
    "MIMIR_GITHUB_INCLUDE_DIRECTORIES",
    "MIMIR_GITHUB_OUTPUT_DIR",
    "MIMIR_CODE_URL",
    "MIMIR_CODE_BRANCH",
    "MIMIR_CODE_TOKEN",
    "MIMIR_CODE_DIRECTORY",
    "MIMIR_CODE_INCLUDE_DIRECTORIES",
    "MIMIR_DOCS_URL",
    "MIMIR_DOCS_BRANCH",
    "MIMIR_DOCS_TOKEN",
    "MIMIR_DOCS_DIRECTORY",
    "MIMIR_DOCS_INCLUDE_DIRECTORIES",
    "MIMIR_LLM_EMBEDDING_PROVIDER",
    "MIMIR_LLM_EMBEDDING_MODEL",
    "MIMIR_LLM_EMBEDDING_API_KEY",
    "MIMIR_LLM_EMBEDDING_BASE_URL",
    "MIMIR_LLM_EMBEDDING_LIMITS_BATCH_SIZE",
    "MIMIR_LLM_EMBEDDING_LIMITS_CONCURRENCY",
    "MIMIR_LLM_EMBEDDING_LIMITS_MAX_REQUESTS_PER_MINUTE",
    "MIMIR_LLM_EMBEDDING_LIMITS_MAX_TOKENS_PER_MINUTE",
    "MIMIR_LLM_EMBEDDING_LIMITS_RETRIES",
    "MIMIR_LLM_CHAT_PROVIDER",
    "MIMIR_LLM_CHAT_MODEL",
    "MIMIR_LLM_CHAT_API_KEY",
    "MIMIR_LLM_CHAT_BASE_URL",
    "MIMIR_LLM_CHAT_TEMPERATURE",
    "MIMIR_LLM_CHAT_MAX_OUTPUT_TOKENS",
    "MIMIR_LLM_CHAT_LIMITS_BATCH_SIZE",
    "MIMIR_LLM_CHAT_LIMITS_CONCURRENCY",
    "MIMIR_LLM_CHAT_LIMITS_MAX_REQUESTS_PER_MINUTE",
    "MIMIR_LLM_CHAT_LIMITS_MAX_TOKENS_PER_MINUTE",
    "MIMIR_LLM_CHAT_LIMITS_RETRIES",
    "MIMIR_EXCLUDE_PATTERNS",
    "MIMIR_LOG_LEVEL",
];

const RECOGNIZED_PREFIXES: &[&str] = &["MIMIR_CODE_REPO_", "MIMIR_DOCS_REPO_"];

fn is_recognized(key: &str) -> bool {
    RECOGNIZED_EXACT.contains(&key) || RECOGNIZED_PREFIXES.iter().any(|p| key.starts_with(p))
}

fn reject_unknown_keys() -> Result<()> {
    for (key, _) in env::vars() {
        if key.starts_with("MIMIR_") && !is_recognized(&key) {
            return Err(MimirError::Config(format!("unrecognized configuration key: {key}")));
        }
    }
    Ok(())
}

fn require(key: &str) -> Result<String> {
    env::var(key).map_err(|_| MimirError::Config(format!("missing required env var {key}")))
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_default<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(v) if !v.is_empty() => v
            .parse::<T>()
            .map_err(|_| MimirError::Config(format!("invalid numeric value for {key}: {v}"))),
        _ => Ok(default),
    }
}

/// Test-path excludes applied regardless of `MIMIR_EXCLUDE_PATTERNS` (§6);
/// under the simple-glob dialect a bare pattern matches as a path substring,
/// so `"test"` alone already covers `tests/`, `__tests__/`, `test_foo.rs`.
const BUILTIN_EXCLUDE_PATTERNS: &[&str] = &["test", "spec", "__mocks__", "fixtures"];

fn split_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Seeds `BUILTIN_EXCLUDE_PATTERNS`, then appends the `MIMIR_EXCLUDE_PATTERNS`
/// csv list, if any (§6).
fn build_exclude_patterns(extra: Option<String>) -> Vec<String> {
    let mut patterns: Vec<String> = BUILTIN_EXCLUDE_PATTERNS.iter().map(|s| s.to_string()).collect();
    if let Some(extra) = extra {
        patterns.extend(split_csv(&extra));
    }
    patterns
}

fn embedding_provider(s: &str) -> Result<EmbeddingProvider> {
    match s {
        "openai" => Ok(EmbeddingProvider::OpenAi),
        "google" => Ok(EmbeddingProvider::Google),
        "mistral" => Ok(EmbeddingProvider::Mistral),
        other => Err(MimirError::Config(format!(
            "unsupported embedding provider '{other}' (expected openai|google|mistral)"
        ))),
    }
}

fn chat_provider(s: &str) -> Result<ChatProvider> {
    match s {
        "openai" => Ok(ChatProvider::OpenAi),
        "google" => Ok(ChatProvider::Google),
        "mistral" => Ok(ChatProvider::Mistral),
        "anthropic" => Ok(ChatProvider::Anthropic),
        other => Err(MimirError::Config(format!(
            "unsupported chat provider '{other}' (expected openai|google|mistral|anthropic)"
        ))),
    }
}

fn limits(prefix: &str) -> Result<ProviderLimits> {
    let defaults = ProviderLimits::default();
    Ok(ProviderLimits {
        batch_size: parse_default(&format!("{prefix}_LIMITS_BATCH_SIZE"), defaults.batch_size)?,
        concurrency: parse_default(&format!("{prefix}_LIMITS_CONCURRENCY"), defaults.concurrency)?,
        max_requests_per_minute: parse_default(
            &format!("{prefix}_LIMITS_MAX_REQUESTS_PER_MINUTE"),
            defaults.max_requests_per_minute,
        )?,
        max_tokens_per_minute: parse_default(
            &format!("{prefix}_LIMITS_MAX_TOKENS_PER_MINUTE"),
            defaults.max_tokens_per_minute,
        )?,
        retries: parse_default(&format!("{prefix}_LIMITS_RETRIES"), defaults.retries)?,
    })
}

fn repo_scope_from(prefix: &str, kind: RepoKind, default_branch: &str) -> Option<RepoScope> {
    let url = optional(&format!("{prefix}_URL"))?;
    let (owner, repo) = parse_owner_repo(&url)?;
    Some(RepoScope {
        owner,
        repo,
        branch: env::var(format!("{prefix}_BRANCH")).unwrap_or_else(|_| default_branch.to_string()),
        token: optional(&format!("{prefix}_TOKEN")),
        directory: optional(&format!("{prefix}_DIRECTORY")),
        include_directories: optional(&format!("{prefix}_INCLUDE_DIRECTORIES"))
            .map(|s| split_csv(&s))
            .unwrap_or_default(),
        kind,
    })
}

/// Accepts either a bare `owner/repo` or a full GitHub URL.
fn parse_owner_repo(url: &str) -> Option<(String, String)> {
    let trimmed = url.trim_end_matches('/');
    let tail = trimmed.rsplit("github.com/").next().unwrap_or(trimmed);
    let mut parts = tail.splitn(2, '/');
    let owner = parts.next()?.to_string();
    let repo = parts.next()?.trim_end_matches(".git").to_string();
    if owner.is_empty() || repo.is_empty() {
        None
    } else {
        Some((owner, repo))
    }
}

fn numbered_repo_scopes(prefix: &str, kind: RepoKind, default_branch: &str) -> Vec<RepoScope> {
    let mut out = Vec::new();
    let mut n = 1;
    loop {
        let key = format!("{prefix}_REPO_{n}_URL");
        match repo_scope_from(&format!("{prefix}_REPO_{n}"), kind, default_branch) {
            Some(scope) => out.push(scope),
            None => {
                if env::var(&key).is_err() {
                    break;
                }
            }
        }
        n += 1;
        if n > 256 {
            break; // backstop against a misconfigured infinite scan
        }
    }
    out
}

impl Config {
    pub fn load() -> Result<Self> {
        reject_unknown_keys()?;

        let default_branch = env::var("MIMIR_GITHUB_BRANCH").unwrap_or_else(|_| "main".to_string());

        let mut repos: Vec<RepoScope> = Vec::new();
        repos.extend(repo_scope_from("MIMIR_GITHUB", RepoKind::Code, &default_branch));
        repos.extend(repo_scope_from("MIMIR_CODE", RepoKind::Code, &default_branch));
        repos.extend(repo_scope_from("MIMIR_DOCS", RepoKind::Docs, &default_branch));
        repos.extend(numbered_repo_scopes("MIMIR_CODE", RepoKind::Code, &default_branch));
        repos.extend(numbered_repo_scopes("MIMIR_DOCS", RepoKind::Docs, &default_branch));

        // De-duplicate scopes with an identical (owner, repo, branch, directory) — a
        // repo declared through both the legacy MIMIR_GITHUB_* keys and an explicit
        // MIMIR_CODE_* block should not be ingested twice.
        let mut seen: HashSet<(String, String, String, Option<String>)> = HashSet::new();
        repos.retain(|r| {
            seen.insert((r.owner.clone(), r.repo.clone(), r.branch.clone(), r.directory.clone()))
        });

        Ok(Config {
            server: ServerConfig {
                api_key: require("MIMIR_SERVER_API_KEY")?,
                github_webhook_secret: optional("MIMIR_SERVER_GITHUB_WEBHOOK_SECRET"),
                port: parse_default("MIMIR_SERVER_PORT", 8080u16)?,
            },
            supabase: SupabaseConfig {
                url: require("MIMIR_SUPABASE_URL")?,
                service_role_key: require("MIMIR_SUPABASE_SERVICE_ROLE_KEY")?,
                table: env::var("MIMIR_SUPABASE_TABLE").unwrap_or_else(|_| "docs".to_string()),
                similarity_threshold: parse_default("MIMIR_SUPABASE_SIMILARITY_THRESHOLD", 0.2f32)?,
                match_count: parse_default("MIMIR_SUPABASE_MATCH_COUNT", 10usize)?,
                bm25_match_count: parse_default("MIMIR_SUPABASE_BM25_MATCH_COUNT", 10usize)?,
                enable_hybrid_search: parse_default("MIMIR_SUPABASE_ENABLE_HYBRID_SEARCH", true)?,
            },
            github: GithubConfig {
                output_dir: env::var("MIMIR_GITHUB_OUTPUT_DIR").unwrap_or_else(|_| ".mimir".to_string()),
                repos,
            },
            embedding: EmbeddingConfig {
                provider: embedding_provider(&require("MIMIR_LLM_EMBEDDING_PROVIDER")?)?,
                model: require("MIMIR_LLM_EMBEDDING_MODEL")?,
                api_key: require("MIMIR_LLM_EMBEDDING_API_KEY")?,
                base_url: optional("MIMIR_LLM_EMBEDDING_BASE_URL"),
                limits: limits("MIMIR_LLM_EMBEDDING")?,
            },
            chat: ChatConfig {
                provider: chat_provider(&require("MIMIR_LLM_CHAT_PROVIDER")?)?,
                model: require("MIMIR_LLM_CHAT_MODEL")?,
                api_key: require("MIMIR_LLM_CHAT_API_KEY")?,
                base_url: optional("MIMIR_LLM_CHAT_BASE_URL"),
                temperature: parse_default("MIMIR_LLM_CHAT_TEMPERATURE", 0.2f32)?,
                max_output_tokens: parse_default("MIMIR_LLM_CHAT_MAX_OUTPUT_TOKENS", 1024usize)?,
                limits: limits("MIMIR_LLM_CHAT")?,
            },
            exclude_patterns: build_exclude_patterns(optional("MIMIR_EXCLUDE_PATTERNS")),
            log_level: env::var("MIMIR_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_owner_repo_from_bare_form() {
        assert_eq!(
            parse_owner_repo("acme/widgets"),
            Some(("acme".to_string(), "widgets".to_string()))
        );
    }

    #[test]
    fn parses_owner_repo_from_full_url() {
        assert_eq!(
            parse_owner_repo("https://github.com/acme/widgets.git"),
            Some(("acme".to_string(), "widgets".to_string()))
        );
    }

    #[test]
    fn rejects_malformed_owner_repo() {
        assert_eq!(parse_owner_repo("not-a-repo-path"), None);
    }

    #[test]
    fn recognizes_numbered_repo_keys() {
        assert!(is_recognized("MIMIR_CODE_REPO_3_URL"));
        assert!(is_recognized("MIMIR_DOCS_REPO_12_BRANCH"));
        assert!(!is_recognized("MIMIR_TOTALLY_MADE_UP"));
    }

    #[test]
    fn exclude_patterns_seed_with_builtins_when_no_env_override() {
        let patterns = build_exclude_patterns(None);
        assert!(patterns.contains(&"test".to_string()));
        assert!(patterns.contains(&"spec".to_string()));
    }

    #[test]
    fn exclude_patterns_append_env_list_after_builtins() {
        let patterns = build_exclude_patterns(Some("vendor,*.snap".to_string()));
        assert_eq!(patterns[0], "test");
        assert!(patterns.contains(&"vendor".to_string()));
        assert!(patterns.contains(&"*.snap".to_string()));
    }
}
