//! Store-backed chunk persistence (§4.7). `VectorStore` is the seam the
//! reconciler and retriever code against; `PgVectorStore` is the
//! Postgres+pgvector implementation, `InMemoryVectorStore` a test fake.
//!
//! The JIT incremental refresh this module replaces tracked content by hash
//! and moved through stat-sweep → classify → parallel read+hash → sequential
//! embed+upsert phases against a flat JSON file. Here the store moves to
//! Postgres and classification moves to the reconciler; this module is left
//! holding just the persistence operations that classification consumes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use pgvector::Vector;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::error::{MimirError, Result};
use crate::types::{Chunk, ExistingChunkInfo, SourceType};

const FETCH_BATCH_SIZE: usize = 50;
const SCAN_PAGE_SIZE: i64 = 1000;
pub const STRANDED_PREFIX: &str = "__moving__";

/// One committed move: existing row `id` relocates to `(new_filepath,
/// new_chunk_id, new_source_type)`.
#[derive(Debug, Clone)]
pub struct ChunkMove {
    pub id: i64,
    pub new_filepath: String,
    pub new_chunk_id: i32,
    pub new_source_type: SourceType,
}

#[derive(Debug, Clone, Default)]
pub struct MoveOutcome {
    pub moved: usize,
    pub stranded: usize,
}

#[derive(Debug, Clone)]
pub struct MatchedDocument {
    pub id: i64,
    pub filepath: String,
    pub chunk_id: i32,
    pub content: String,
    pub contextual_text: String,
    pub chunk_title: String,
    pub source_type: SourceType,
    pub github_url: Option<String>,
    pub docs_url: Option<String>,
    pub start_line: Option<i32>,
    pub end_line: Option<i32>,
    pub similarity: f32,
}

#[derive(Debug, Clone)]
pub struct FullTextMatch {
    pub id: i64,
    pub filepath: String,
    pub chunk_id: i32,
    pub content: String,
    pub contextual_text: String,
    pub chunk_title: String,
    pub source_type: SourceType,
    pub github_url: Option<String>,
    pub docs_url: Option<String>,
    pub start_line: Option<i32>,
    pub end_line: Option<i32>,
    pub bm25_rank: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn verify_connection(&self) -> Result<()>;

    /// Returns `checksum -> existing rows`, querying in batches of at most
    /// `FETCH_BATCH_SIZE` checksums per round trip.
    async fn fetch_chunks_by_checksums(&self, checksums: &[String]) -> Result<HashMap<String, Vec<ExistingChunkInfo>>>;

    async fn upsert_chunks(&self, chunks: &[Chunk]) -> Result<()>;

    async fn move_chunks_atomic(&self, moves: &[ChunkMove]) -> Result<MoveOutcome>;

    async fn delete_chunks_by_ids(&self, ids: &[i64]) -> Result<usize>;

    /// `repo_base_urls` scopes the scan; an empty slice means "no repo
    /// scope", in which case orphan deletion is skipped entirely by the
    /// caller (the reconciler), not by this method.
    async fn find_orphaned_chunk_ids(
        &self,
        active_checksums: &[String],
        repo_base_urls: &[String],
        active_github_urls: &[String],
    ) -> Result<Vec<i64>>;

    async fn find_stranded_chunk_ids(&self, active_checksums: &[String], repo_ids: &[String]) -> Result<Vec<i64>>;

    async fn match_documents(&self, embedding: &[f32], k: usize, threshold: f32) -> Result<Vec<MatchedDocument>>;

    async fn search_documents_full_text(&self, query: &str, k: usize) -> Result<Vec<FullTextMatch>>;
}

pub struct PgVectorStore {
    pool: PgPool,
    table: String,
}

impl PgVectorStore {
    pub async fn connect(url: &str, table: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(|e| MimirError::Store(e.to_string()))?;
        Ok(Self { pool, table: table.to_string() })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| MimirError::Store(e.to_string()))
    }
}

fn normalize_github_url(url: &str) -> &str {
    url.split('#').next().unwrap_or(url)
}

fn extract_owner_repo(github_url: &str) -> Option<String> {
    let tail = github_url.split("github.com/").nth(1)?;
    let mut parts = tail.splitn(3, '/');
    let owner = parts.next()?;
    let repo = parts.next()?;
    Some(format!("{owner}/{repo}"))
}

#[async_trait]
impl VectorStore for PgVectorStore {
    async fn verify_connection(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| MimirError::Store(e.to_string()))?;
        Ok(())
    }

    async fn fetch_chunks_by_checksums(&self, checksums: &[String]) -> Result<HashMap<String, Vec<ExistingChunkInfo>>> {
        let mut out: HashMap<String, Vec<ExistingChunkInfo>> = HashMap::new();
        for batch in checksums.chunks(FETCH_BATCH_SIZE) {
            let query = format!(
                "SELECT id, filepath, chunk_id, source_type, checksum, github_url FROM {} WHERE checksum = ANY($1)",
                self.table
            );
            let rows = sqlx::query(&query)
                .bind(batch)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| MimirError::Store(e.to_string()))?;

            for row in rows {
                let checksum: String = row.try_get("checksum").map_err(|e| MimirError::Store(e.to_string()))?;
                let source_type_raw: String =
                    row.try_get("source_type").map_err(|e| MimirError::Store(e.to_string()))?;
                let Some(source_type) = SourceType::normalize(&source_type_raw) else { continue };
                out.entry(checksum).or_default().push(ExistingChunkInfo {
                    id: row.try_get("id").map_err(|e| MimirError::Store(e.to_string()))?,
                    filepath: row.try_get("filepath").map_err(|e| MimirError::Store(e.to_string()))?,
                    chunk_id: row.try_get("chunk_id").map_err(|e| MimirError::Store(e.to_string()))?,
                    source_type,
                    checksum: row.try_get("checksum").map_err(|e| MimirError::Store(e.to_string()))?,
                    github_url: row.try_get("github_url").map_err(|e| MimirError::Store(e.to_string()))?,
                });
            }
        }
        Ok(out)
    }

    async fn upsert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        for chunk in chunks {
            let embedding = chunk.embedding.clone().map(Vector::from);
            let query = format!(
                r#"INSERT INTO {} (filepath, chunk_id, chunk_title, content, contextual_text, checksum,
                       embedding, source_type, entity_type, start_line, end_line, github_url, docs_url, final_url)
                   VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                   ON CONFLICT (filepath, chunk_id)
                   DO UPDATE SET chunk_title = EXCLUDED.chunk_title, content = EXCLUDED.content,
                       contextual_text = EXCLUDED.contextual_text, checksum = EXCLUDED.checksum,
                       embedding = EXCLUDED.embedding, source_type = EXCLUDED.source_type,
                       entity_type = EXCLUDED.entity_type, start_line = EXCLUDED.start_line,
                       end_line = EXCLUDED.end_line, github_url = EXCLUDED.github_url,
                       docs_url = EXCLUDED.docs_url, final_url = EXCLUDED.final_url"#,
                self.table
            );
            sqlx::query(&query)
                .bind(&chunk.filepath)
                .bind(chunk.chunk_id)
                .bind(&chunk.chunk_title)
                .bind(&chunk.content)
                .bind(&chunk.contextual_text)
                .bind(&chunk.checksum)
                .bind(embedding)
                .bind(chunk.source_type.as_str())
                .bind(&chunk.entity_type)
                .bind(chunk.start_line)
                .bind(chunk.end_line)
                .bind(&chunk.github_url)
                .bind(&chunk.docs_url)
                .bind(&chunk.final_url)
                .execute(&self.pool)
                .await
                .map_err(|e| MimirError::Store(e.to_string()))?;
        }
        Ok(())
    }

    async fn move_chunks_atomic(&self, moves: &[ChunkMove]) -> Result<MoveOutcome> {
        let mut outcome = MoveOutcome::default();
        let mut seen_targets: std::collections::HashSet<(String, i32)> = std::collections::HashSet::new();

        let mut tx = self.pool.begin().await.map_err(|e| MimirError::Store(e.to_string()))?;

        for mv in moves {
            let target = (mv.new_filepath.clone(), mv.new_chunk_id);
            if !seen_targets.insert(target) {
                outcome.stranded += 1;
                continue;
            }

            let temp_path = format!("{}{}", STRANDED_PREFIX, mv.id);
            sqlx::query(&format!("UPDATE {} SET filepath = $1 WHERE id = $2", self.table))
                .bind(&temp_path)
                .bind(mv.id)
                .execute(&mut *tx)
                .await
                .map_err(|e| MimirError::Store(e.to_string()))?;

            let occupied_query = format!(
                "SELECT id FROM {} WHERE filepath = $1 AND chunk_id = $2 AND id != $3",
                self.table
            );
            let occupied = sqlx::query(&occupied_query)
                .bind(&mv.new_filepath)
                .bind(mv.new_chunk_id)
                .bind(mv.id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| MimirError::Store(e.to_string()))?;

            if occupied.is_some() {
                outcome.stranded += 1;
                continue;
            }

            let update_query = format!(
                "UPDATE {} SET filepath = $1, chunk_id = $2, source_type = $3 WHERE id = $4",
                self.table
            );
            sqlx::query(&update_query)
                .bind(&mv.new_filepath)
                .bind(mv.new_chunk_id)
                .bind(mv.new_source_type.as_str())
                .bind(mv.id)
                .execute(&mut *tx)
                .await
                .map_err(|e| MimirError::Store(e.to_string()))?;
            outcome.moved += 1;
        }

        tx.commit().await.map_err(|e| MimirError::Store(e.to_string()))?;
        Ok(outcome)
    }

    async fn delete_chunks_by_ids(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let query = format!("DELETE FROM {} WHERE id = ANY($1)", self.table);
        let result = sqlx::query(&query)
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(|e| MimirError::Store(e.to_string()))?;
        Ok(result.rows_affected() as usize)
    }

    async fn find_orphaned_chunk_ids(
        &self,
        active_checksums: &[String],
        repo_base_urls: &[String],
        active_github_urls: &[String],
    ) -> Result<Vec<i64>> {
        if repo_base_urls.is_empty() {
            return Ok(vec![]);
        }

        let active_checksum_set: std::collections::HashSet<&str> =
            active_checksums.iter().map(|s| s.as_str()).collect();
        let active_url_set: std::collections::HashSet<String> =
            active_github_urls.iter().map(|u| normalize_github_url(u).to_string()).collect();

        let mut orphans = Vec::new();
        let mut offset = 0i64;
        loop {
            let query = format!(
                "SELECT id, checksum, github_url FROM {} WHERE github_url LIKE ANY($1) ORDER BY id LIMIT $2 OFFSET $3",
                self.table
            );
            let like_patterns: Vec<String> = repo_base_urls.iter().map(|b| format!("{b}%")).collect();
            let rows = sqlx::query(&query)
                .bind(&like_patterns)
                .bind(SCAN_PAGE_SIZE)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| MimirError::Store(e.to_string()))?;

            if rows.is_empty() {
                break;
            }

            for row in &rows {
                let id: i64 = row.try_get("id").map_err(|e| MimirError::Store(e.to_string()))?;
                let checksum: String = row.try_get("checksum").map_err(|e| MimirError::Store(e.to_string()))?;
                let github_url: Option<String> =
                    row.try_get("github_url").map_err(|e| MimirError::Store(e.to_string()))?;
                let normalized = github_url.as_deref().map(normalize_github_url).unwrap_or("");

                if !active_url_set.contains(normalized) || !active_checksum_set.contains(checksum.as_str()) {
                    orphans.push(id);
                }
            }

            let fetched = rows.len() as i64;
            offset += fetched;
            if fetched < SCAN_PAGE_SIZE {
                break;
            }
        }

        Ok(orphans)
    }

    async fn find_stranded_chunk_ids(&self, active_checksums: &[String], repo_ids: &[String]) -> Result<Vec<i64>> {
        let active_checksum_set: std::collections::HashSet<&str> =
            active_checksums.iter().map(|s| s.as_str()).collect();

        let query = format!("SELECT id, checksum, github_url FROM {} WHERE filepath LIKE $1", self.table);
        let rows = sqlx::query(&query)
            .bind(format!("{STRANDED_PREFIX}%"))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MimirError::Store(e.to_string()))?;

        let mut stranded = Vec::new();
        for row in rows {
            let id: i64 = row.try_get("id").map_err(|e| MimirError::Store(e.to_string()))?;
            let checksum: String = row.try_get("checksum").map_err(|e| MimirError::Store(e.to_string()))?;
            let github_url: Option<String> = row.try_get("github_url").map_err(|e| MimirError::Store(e.to_string()))?;

            if active_checksum_set.contains(checksum.as_str()) {
                continue;
            }
            if !repo_ids.is_empty() {
                match github_url.as_deref().and_then(extract_owner_repo) {
                    Some(or) if repo_ids.contains(&or) => {}
                    _ => continue,
                }
            }
            stranded.push(id);
        }
        Ok(stranded)
    }

    async fn match_documents(&self, embedding: &[f32], k: usize, threshold: f32) -> Result<Vec<MatchedDocument>> {
        let vector = Vector::from(embedding.to_vec());
        let rows = sqlx::query("SELECT * FROM match_docs($1, $2, $3)")
            .bind(vector)
            .bind(k as i32)
            .bind(threshold)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MimirError::Store(e.to_string()))?;

        rows.into_iter()
            .map(|row| -> Result<MatchedDocument> {
                let source_type_raw: String =
                    row.try_get("source_type").map_err(|e| MimirError::Store(e.to_string()))?;
                Ok(MatchedDocument {
                    id: row.try_get("id").map_err(|e| MimirError::Store(e.to_string()))?,
                    filepath: row.try_get("filepath").map_err(|e| MimirError::Store(e.to_string()))?,
                    chunk_id: row.try_get("chunk_id").map_err(|e| MimirError::Store(e.to_string()))?,
                    content: row.try_get("content").map_err(|e| MimirError::Store(e.to_string()))?,
                    contextual_text: row.try_get("contextual_text").map_err(|e| MimirError::Store(e.to_string()))?,
                    chunk_title: row.try_get("chunk_title").map_err(|e| MimirError::Store(e.to_string()))?,
                    source_type: SourceType::normalize(&source_type_raw).unwrap_or(SourceType::Doc),
                    github_url: row.try_get("github_url").map_err(|e| MimirError::Store(e.to_string()))?,
                    docs_url: row.try_get("docs_url").map_err(|e| MimirError::Store(e.to_string()))?,
                    start_line: row.try_get("start_line").map_err(|e| MimirError::Store(e.to_string()))?,
                    end_line: row.try_get("end_line").map_err(|e| MimirError::Store(e.to_string()))?,
                    similarity: row.try_get("similarity").map_err(|e| MimirError::Store(e.to_string()))?,
                })
            })
            .collect()
    }

    async fn search_documents_full_text(&self, query_text: &str, k: usize) -> Result<Vec<FullTextMatch>> {
        let rows = sqlx::query("SELECT * FROM match_docs_bm25($1, $2)")
            .bind(query_text)
            .bind(k as i32)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MimirError::Store(e.to_string()))?;

        rows.into_iter()
            .map(|row| -> Result<FullTextMatch> {
                let source_type_raw: String =
                    row.try_get("source_type").map_err(|e| MimirError::Store(e.to_string()))?;
                Ok(FullTextMatch {
                    id: row.try_get("id").map_err(|e| MimirError::Store(e.to_string()))?,
                    filepath: row.try_get("filepath").map_err(|e| MimirError::Store(e.to_string()))?,
                    chunk_id: row.try_get("chunk_id").map_err(|e| MimirError::Store(e.to_string()))?,
                    content: row.try_get("content").map_err(|e| MimirError::Store(e.to_string()))?,
                    contextual_text: row.try_get("contextual_text").map_err(|e| MimirError::Store(e.to_string()))?,
                    chunk_title: row.try_get("chunk_title").map_err(|e| MimirError::Store(e.to_string()))?,
                    source_type: SourceType::normalize(&source_type_raw).unwrap_or(SourceType::Doc),
                    github_url: row.try_get("github_url").map_err(|e| MimirError::Store(e.to_string()))?,
                    docs_url: row.try_get("docs_url").map_err(|e| MimirError::Store(e.to_string()))?,
                    start_line: row.try_get("start_line").map_err(|e| MimirError::Store(e.to_string()))?,
                    end_line: row.try_get("end_line").map_err(|e| MimirError::Store(e.to_string()))?,
                    bm25_rank: row.try_get("bm25_rank").map_err(|e| MimirError::Store(e.to_string()))?,
                })
            })
            .collect()
    }
}

/// In-memory fake used by reconciler/retriever tests; mirrors the same
/// move/orphan/stranded semantics as `PgVectorStore` without a database.
#[derive(Default)]
pub struct InMemoryVectorStore {
    rows: Mutex<Vec<StoredRow>>,
    next_id: Mutex<i64>,
}

#[derive(Debug, Clone)]
struct StoredRow {
    id: i64,
    chunk: Chunk,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self { rows: Mutex::new(Vec::new()), next_id: Mutex::new(1) }
    }

    pub fn seed(&self, chunk: Chunk) -> i64 {
        let mut rows = self.rows.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();
        let id = *next_id;
        *next_id += 1;
        rows.push(StoredRow { id, chunk });
        id
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn verify_connection(&self) -> Result<()> {
        Ok(())
    }

    async fn fetch_chunks_by_checksums(&self, checksums: &[String]) -> Result<HashMap<String, Vec<ExistingChunkInfo>>> {
        let set: std::collections::HashSet<&str> = checksums.iter().map(|s| s.as_str()).collect();
        let rows = self.rows.lock().unwrap();
        let mut out: HashMap<String, Vec<ExistingChunkInfo>> = HashMap::new();
        for row in rows.iter() {
            if set.contains(row.chunk.checksum.as_str()) {
                out.entry(row.chunk.checksum.clone()).or_default().push(ExistingChunkInfo {
                    id: row.id,
                    filepath: row.chunk.filepath.clone(),
                    chunk_id: row.chunk.chunk_id,
                    source_type: row.chunk.source_type,
                    checksum: row.chunk.checksum.clone(),
                    github_url: row.chunk.github_url.clone(),
                });
            }
        }
        Ok(out)
    }

    async fn upsert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        for chunk in chunks {
            let mut rows = self.rows.lock().unwrap();
            let existing = rows
                .iter_mut()
                .find(|r| r.chunk.filepath == chunk.filepath && r.chunk.chunk_id == chunk.chunk_id);
            match existing {
                Some(row) => row.chunk = chunk.clone(),
                None => {
                    drop(rows);
                    self.seed(chunk.clone());
                }
            }
        }
        Ok(())
    }

    async fn move_chunks_atomic(&self, moves: &[ChunkMove]) -> Result<MoveOutcome> {
        let mut outcome = MoveOutcome::default();
        let mut rows = self.rows.lock().unwrap();
        let mut seen_targets: std::collections::HashSet<(String, i32)> = std::collections::HashSet::new();

        for mv in moves {
            let target = (mv.new_filepath.clone(), mv.new_chunk_id);
            if !seen_targets.insert(target) {
                outcome.stranded += 1;
                continue;
            }

            let occupied = rows
                .iter()
                .any(|r| r.id != mv.id && r.chunk.filepath == mv.new_filepath && r.chunk.chunk_id == mv.new_chunk_id);

            if occupied {
                if let Some(row) = rows.iter_mut().find(|r| r.id == mv.id) {
                    row.chunk.filepath = format!("{}{}", STRANDED_PREFIX, mv.id);
                }
                outcome.stranded += 1;
                continue;
            }

            if let Some(row) = rows.iter_mut().find(|r| r.id == mv.id) {
                row.chunk.filepath = mv.new_filepath.clone();
                row.chunk.chunk_id = mv.new_chunk_id;
                row.chunk.source_type = mv.new_source_type;
                outcome.moved += 1;
            }
        }
        Ok(outcome)
    }

    async fn delete_chunks_by_ids(&self, ids: &[i64]) -> Result<usize> {
        let set: std::collections::HashSet<i64> = ids.iter().copied().collect();
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|r| !set.contains(&r.id));
        Ok(before - rows.len())
    }

    async fn find_orphaned_chunk_ids(
        &self,
        active_checksums: &[String],
        repo_base_urls: &[String],
        active_github_urls: &[String],
    ) -> Result<Vec<i64>> {
        if repo_base_urls.is_empty() {
            return Ok(vec![]);
        }
        let active_checksum_set: std::collections::HashSet<&str> =
            active_checksums.iter().map(|s| s.as_str()).collect();
        let active_url_set: std::collections::HashSet<String> =
            active_github_urls.iter().map(|u| normalize_github_url(u).to_string()).collect();

        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .filter(|r| {
                let in_scope = r
                    .chunk
                    .github_url
                    .as_deref()
                    .map(|u| repo_base_urls.iter().any(|b| u.starts_with(b.as_str())))
                    .unwrap_or(false);
                if !in_scope {
                    return false;
                }
                let normalized = r.chunk.github_url.as_deref().map(normalize_github_url).unwrap_or("");
                !active_url_set.contains(normalized) || !active_checksum_set.contains(r.chunk.checksum.as_str())
            })
            .map(|r| r.id)
            .collect())
    }

    async fn find_stranded_chunk_ids(&self, active_checksums: &[String], repo_ids: &[String]) -> Result<Vec<i64>> {
        let active_checksum_set: std::collections::HashSet<&str> =
            active_checksums.iter().map(|s| s.as_str()).collect();
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .filter(|r| r.chunk.filepath.starts_with(STRANDED_PREFIX))
            .filter(|r| !active_checksum_set.contains(r.chunk.checksum.as_str()))
            .filter(|r| {
                if repo_ids.is_empty() {
                    return true;
                }
                r.chunk
                    .github_url
                    .as_deref()
                    .and_then(extract_owner_repo)
                    .map(|or| repo_ids.contains(&or))
                    .unwrap_or(false)
            })
            .map(|r| r.id)
            .collect())
    }

    async fn match_documents(&self, _embedding: &[f32], k: usize, _threshold: f32) -> Result<Vec<MatchedDocument>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .take(k)
            .map(|r| MatchedDocument {
                id: r.id,
                filepath: r.chunk.filepath.clone(),
                chunk_id: r.chunk.chunk_id,
                content: r.chunk.content.clone(),
                contextual_text: r.chunk.contextual_text.clone(),
                chunk_title: r.chunk.chunk_title.clone(),
                source_type: r.chunk.source_type,
                github_url: r.chunk.github_url.clone(),
                docs_url: r.chunk.docs_url.clone(),
                start_line: r.chunk.start_line,
                end_line: r.chunk.end_line,
                similarity: 1.0,
            })
            .collect())
    }

    async fn search_documents_full_text(&self, query: &str, k: usize) -> Result<Vec<FullTextMatch>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .filter(|r| r.chunk.content.to_lowercase().contains(&query.to_lowercase()))
            .take(k)
            .map(|r| FullTextMatch {
                id: r.id,
                filepath: r.chunk.filepath.clone(),
                chunk_id: r.chunk.chunk_id,
                content: r.chunk.content.clone(),
                contextual_text: r.chunk.contextual_text.clone(),
                chunk_title: r.chunk.chunk_title.clone(),
                source_type: r.chunk.source_type,
                github_url: r.chunk.github_url.clone(),
                docs_url: r.chunk.docs_url.clone(),
                start_line: r.chunk.start_line,
                end_line: r.chunk.end_line,
                bm25_rank: 1.0,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_chunk(filepath: &str, chunk_id: i32, checksum: &str) -> Chunk {
        Chunk {
            filepath: filepath.to_string(),
            chunk_id,
            chunk_title: "title".to_string(),
            content: "content".to_string(),
            contextual_text: "content".to_string(),
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
    async fn move_to_unoccupied_target_succeeds() {
        let store = InMemoryVectorStore::new();
        let id = store.seed(sample_chunk("a.md", 0, "c1"));

        let outcome = store
            .move_chunks_atomic(&[ChunkMove {
                id,
                new_filepath: "b.md".to_string(),
                new_chunk_id: 0,
                new_source_type: SourceType::Doc,
            }])
            .await
            .unwrap();

        assert_eq!(outcome.moved, 1);
        assert_eq!(outcome.stranded, 0);
    }

    #[tokio::test]
    async fn move_to_occupied_target_strands() {
        let store = InMemoryVectorStore::new();
        let moving_id = store.seed(sample_chunk("a.md", 0, "c1"));
        store.seed(sample_chunk("b.md", 0, "c2"));

        let outcome = store
            .move_chunks_atomic(&[ChunkMove {
                id: moving_id,
                new_filepath: "b.md".to_string(),
                new_chunk_id: 0,
                new_source_type: SourceType::Doc,
            }])
            .await
            .unwrap();

        assert_eq!(outcome.moved, 0);
        assert_eq!(outcome.stranded, 1);
    }

    #[tokio::test]
    async fn duplicate_target_keys_keep_first_strand_rest() {
        let store = InMemoryVectorStore::new();
        let id1 = store.seed(sample_chunk("a.md", 0, "c1"));
        let id2 = store.seed(sample_chunk("b.md", 0, "c2"));

        let outcome = store
            .move_chunks_atomic(&[
                ChunkMove { id: id1, new_filepath: "z.md".to_string(), new_chunk_id: 0, new_source_type: SourceType::Doc },
                ChunkMove { id: id2, new_filepath: "z.md".to_string(), new_chunk_id: 0, new_source_type: SourceType::Doc },
            ])
            .await
            .unwrap();

        assert_eq!(outcome.moved, 1);
        assert_eq!(outcome.stranded, 1);
    }

    #[tokio::test]
    async fn empty_repo_base_urls_skips_orphan_scan() {
        let store = InMemoryVectorStore::new();
        store.seed(sample_chunk("a.md", 0, "c1"));
        let orphans = store.find_orphaned_chunk_ids(&[], &[], &[]).await.unwrap();
        assert!(orphans.is_empty());
    }

    #[tokio::test]
    async fn orphan_detected_when_checksum_no_longer_active() {
        let store = InMemoryVectorStore::new();
        let id = store.seed(sample_chunk("a.md", 0, "stale"));
        let orphans = store
            .find_orphaned_chunk_ids(
                &["fresh".to_string()],
                &["https://github.com/acme/widgets".to_string()],
                &["https://github.com/acme/widgets/blob/main/a.md".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(orphans, vec![id]);
    }

    #[tokio::test]
    async fn stranded_rows_detected_by_prefix() {
        let store = InMemoryVectorStore::new();
        let mut chunk = sample_chunk("x", 0, "stale");
        chunk.filepath = format!("{}1", STRANDED_PREFIX);
        store.seed(chunk);
        let stranded = store.find_stranded_chunk_ids(&["fresh".to_string()], &[]).await.unwrap();
        assert_eq!(stranded.len(), 1);
    }

    #[test]
    fn extracts_owner_repo_from_github_url() {
        assert_eq!(
            extract_owner_repo("https://github.com/acme/widgets/blob/main/a.md"),
            Some("acme/widgets".to_string())
        );
    }
}
