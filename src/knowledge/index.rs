//! Hybrid Index - 청크 임베딩 저장 및 벡터/키워드 검색
//!
//! 저장 위치: <data_dir>/index.db
//!
//! - `embeddings`: 청크 텍스트, 벡터(BLOB), 메타데이터(JSON), 피드백 점수
//! - `embeddings_fts`: FTS5 외부 콘텐츠 테이블 (트리거로 동기화)
//! - `embedding_feedback`: 피드백 이벤트 (추가 전용)
//!
//! 벡터 검색은 전수 코사인 유사도, 키워드 검색은 FTS5 bm25 순위입니다.
//! FTS5 쿼리가 실패하면 부분 문자열 포함 점수로 폴백합니다.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;
use serde_json::{Map, Value};

use super::fusion::{apply_feedback, nudge_relevance};
use super::store::parse_datetime;
use super::vector::{decode_vector, encode_vector, similarity_score};
use crate::error::{RagError, RagResult};

/// 청크 메타데이터 (JSON 객체)
pub type Metadata = Map<String, Value>;

/// 메타데이터 필터 (키 → 값, 모두 일치해야 함)
///
/// 값은 JSON 값의 텍스트 표현과 비교합니다 (`7` ↔ `"7"`).
pub type MetadataFilter = BTreeMap<String, String>;

const FTS_SCHEMA: &str = r#"
    CREATE VIRTUAL TABLE IF NOT EXISTS embeddings_fts USING fts5(
        content,
        content=embeddings,
        content_rowid=seq
    );

    CREATE TRIGGER IF NOT EXISTS embeddings_ai AFTER INSERT ON embeddings BEGIN
        INSERT INTO embeddings_fts(rowid, content) VALUES (new.seq, new.content);
    END;

    CREATE TRIGGER IF NOT EXISTS embeddings_ad AFTER DELETE ON embeddings BEGIN
        INSERT INTO embeddings_fts(embeddings_fts, rowid, content)
        VALUES ('delete', old.seq, old.content);
    END;

    CREATE TRIGGER IF NOT EXISTS embeddings_au AFTER UPDATE OF content ON embeddings BEGIN
        INSERT INTO embeddings_fts(embeddings_fts, rowid, content)
        VALUES ('delete', old.seq, old.content);
        INSERT INTO embeddings_fts(rowid, content) VALUES (new.seq, new.content);
    END;
"#;

// ============================================================================
// Types
// ============================================================================

/// 기록할 청크 (임베딩 완료)
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub text: String,
    pub vector: Vec<f32>,
    pub metadata: Metadata,
}

/// 검색 결과 청크
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    /// 피드백 적용 전 점수 (0.0 ~ 1.0)
    pub raw_score: f64,
    /// 피드백 적용 후 점수 (0.0 ~ 1.0)
    pub score: f64,
    pub feedback_count: u32,
}

/// 임베딩 레코드 (벡터 제외)
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingRecord {
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
    pub relevance_score: f64,
    pub feedback_count: u32,
    pub created_at: DateTime<Utc>,
}

/// 피드백 입력
#[derive(Debug, Clone)]
pub struct FeedbackEvent {
    pub embedding_id: String,
    pub query: String,
    pub relevant: bool,
    pub user_id: Option<String>,
    pub comment: Option<String>,
}

/// 저장된 피드백
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackRecord {
    pub id: String,
    pub embedding_id: String,
    pub query: String,
    pub relevant: bool,
    pub user_id: Option<String>,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 인덱스 통계
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub embedding_count: usize,
    pub feedback_count: usize,
    pub fts_enabled: bool,
    pub db_path: PathBuf,
}

/// DB 행 (메타데이터 파싱 전)
struct RawRow {
    id: String,
    content: String,
    metadata: String,
    feedback_count: u32,
}

// ============================================================================
// SearchIndex Trait
// ============================================================================

/// 검색 인덱스 트레이트
///
/// 검색 에이전트가 사용하는 읽기 인터페이스입니다.
pub trait SearchIndex: Send + Sync {
    /// 벡터 유사도 검색
    fn vector_search(
        &self,
        query: &[f32],
        filters: &MetadataFilter,
        top_k: usize,
    ) -> RagResult<Vec<ScoredChunk>>;

    /// 키워드 검색
    fn lexical_search(
        &self,
        terms: &[String],
        filters: &MetadataFilter,
        top_k: usize,
    ) -> RagResult<Vec<ScoredChunk>>;
}

impl SearchIndex for HybridIndex {
    fn vector_search(
        &self,
        query: &[f32],
        filters: &MetadataFilter,
        top_k: usize,
    ) -> RagResult<Vec<ScoredChunk>> {
        HybridIndex::vector_search(self, query, filters, top_k)
    }

    fn lexical_search(
        &self,
        terms: &[String],
        filters: &MetadataFilter,
        top_k: usize,
    ) -> RagResult<Vec<ScoredChunk>> {
        HybridIndex::lexical_search(self, terms, filters, top_k)
    }
}

// ============================================================================
// HybridIndex
// ============================================================================

/// 하이브리드 인덱스 저장소
pub struct HybridIndex {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
    fts_enabled: bool,
}

impl HybridIndex {
    /// 인덱스 열기 (없으면 생성)
    pub fn open(path: &Path) -> RagResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    RagError::StoreUnavailable(format!("create {}: {}", parent.display(), e))
                })?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let fts_enabled = initialize(&conn)?;
        tracing::debug!("Hybrid index initialized at {:?} (fts={})", path, fts_enabled);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
            fts_enabled,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn fts_enabled(&self) -> bool {
        self.fts_enabled
    }

    fn lock(&self) -> RagResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RagError::StoreUnavailable(format!("lock poisoned: {}", e)))
    }

    /// 청크 저장
    ///
    /// # Returns
    /// 새 임베딩 레코드 ID (UUID v4)
    pub fn write(&self, text: &str, vector: &[f32], metadata: &Metadata) -> RagResult<String> {
        let conn = self.lock()?;
        insert_record(&conn, text, vector, metadata)
    }

    /// 문서의 청크 세트 교체
    ///
    /// `document_id` 메타데이터가 일치하는 레코드를 지우고 새 청크를 기록합니다.
    /// 하나의 트랜잭션에서 실행되므로 동시에 교체해도 문서당 청크 세트는 하나만 남고,
    /// 기록 중 실패하면 기존 청크가 그대로 유지됩니다.
    ///
    /// # Returns
    /// 삭제된 기존 레코드 수
    pub fn replace_document_chunks(&self, document_id: i64, chunks: &[NewChunk]) -> RagResult<usize> {
        let filters = MetadataFilter::from([("document_id".to_string(), document_id.to_string())]);
        let (clause, args) = filter_clause("metadata", &filters)?;
        let sql = format!("DELETE FROM embeddings WHERE {}", clause);

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let removed = tx.execute(&sql, params_from_iter(args))?;
        for chunk in chunks {
            insert_record(&tx, &chunk.text, &chunk.vector, &chunk.metadata)?;
        }
        tx.commit()?;

        tracing::debug!(
            "Replaced chunks for document {} ({} removed, {} written)",
            document_id,
            removed,
            chunks.len()
        );
        Ok(removed)
    }

    /// 벡터 유사도 검색
    ///
    /// 코사인 유사도 내림차순, 동점은 삽입 순서를 유지합니다.
    pub fn vector_search(
        &self,
        query: &[f32],
        filters: &MetadataFilter,
        top_k: usize,
    ) -> RagResult<Vec<ScoredChunk>> {
        if top_k == 0 || query.is_empty() {
            return Ok(vec![]);
        }

        let (clause, args) = filter_clause("metadata", filters)?;
        let sql = format!(
            "SELECT id, content, metadata, feedback_count, vector
             FROM embeddings WHERE {} ORDER BY seq",
            clause
        );

        let rows: Vec<(RawRow, Vec<u8>)> = {
            let conn = self.lock()?;
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(args), |row| {
                Ok((
                    RawRow {
                        id: row.get(0)?,
                        content: row.get(1)?,
                        metadata: row.get(2)?,
                        feedback_count: row.get(3)?,
                    },
                    row.get(4)?,
                ))
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut results = Vec::with_capacity(rows.len());
        for (raw, blob) in rows {
            let vector = decode_vector(&blob)?;
            let similarity = similarity_score(query, &vector);
            results.push(raw.into_scored(similarity)?);
        }

        sort_and_truncate(&mut results, top_k);
        Ok(results)
    }

    /// 키워드 검색 (검색어 OR 결합)
    ///
    /// FTS5를 사용할 수 없거나 쿼리가 실패하면 포함 위치 기반 점수로 폴백합니다.
    pub fn lexical_search(
        &self,
        terms: &[String],
        filters: &MetadataFilter,
        top_k: usize,
    ) -> RagResult<Vec<ScoredChunk>> {
        let terms = clean_terms(terms);
        if terms.is_empty() || top_k == 0 {
            return Ok(vec![]);
        }

        if self.fts_enabled {
            match self.search_fts(&terms, filters, top_k) {
                Ok(results) => return Ok(results),
                Err(RagError::InvalidInput(msg)) => return Err(RagError::InvalidInput(msg)),
                Err(e) => tracing::warn!("FTS5 search failed, falling back to substring: {}", e),
            }
        }

        self.search_substring(&terms, filters, top_k)
    }

    /// FTS5 bm25 검색
    fn search_fts(
        &self,
        terms: &[String],
        filters: &MetadataFilter,
        top_k: usize,
    ) -> RagResult<Vec<ScoredChunk>> {
        let match_query = terms
            .iter()
            .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(" OR ");

        let (clause, filter_args) = filter_clause("e.metadata", filters)?;
        let sql = format!(
            "SELECT e.id, e.content, e.metadata, e.feedback_count, bm25(embeddings_fts) AS rank
             FROM embeddings_fts
             JOIN embeddings e ON e.seq = embeddings_fts.rowid
             WHERE embeddings_fts MATCH ? AND {}
             ORDER BY rank, e.seq
             LIMIT ?",
            clause
        );

        let mut args = Vec::with_capacity(filter_args.len() + 2);
        args.push(SqlValue::Text(match_query));
        args.extend(filter_args);
        args.push(SqlValue::Integer(top_k as i64));

        let rows: Vec<(RawRow, f64)> = {
            let conn = self.lock()?;
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(args), |row| {
                Ok((
                    RawRow {
                        id: row.get(0)?,
                        content: row.get(1)?,
                        metadata: row.get(2)?,
                        feedback_count: row.get(3)?,
                    },
                    row.get(4)?,
                ))
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        rows.into_iter()
            .map(|(raw, rank)| raw.into_scored(normalize_bm25(rank)))
            .collect()
    }

    /// 부분 문자열 폴백 검색
    ///
    /// 점수: `0.5 + 0.5 * (1 - 위치 / 길이)` (검색어 중 최댓값)
    fn search_substring(
        &self,
        terms: &[String],
        filters: &MetadataFilter,
        top_k: usize,
    ) -> RagResult<Vec<ScoredChunk>> {
        tracing::debug!("Substring fallback search for {:?}", terms);

        let (clause, args) = filter_clause("metadata", filters)?;
        let sql = format!(
            "SELECT id, content, metadata, feedback_count FROM embeddings WHERE {} ORDER BY seq",
            clause
        );

        let rows: Vec<RawRow> = {
            let conn = self.lock()?;
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(args), |row| {
                Ok(RawRow {
                    id: row.get(0)?,
                    content: row.get(1)?,
                    metadata: row.get(2)?,
                    feedback_count: row.get(3)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut results = Vec::new();
        for raw in rows {
            if let Some(score) = containment_score(&raw.content, terms) {
                results.push(raw.into_scored(score)?);
            }
        }

        sort_and_truncate(&mut results, top_k);
        Ok(results)
    }

    /// 메타데이터 일치 레코드 삭제
    ///
    /// 빈 필터는 거부합니다 (전체 삭제 방지).
    pub fn delete_by_metadata(&self, filters: &MetadataFilter) -> RagResult<usize> {
        if filters.is_empty() {
            return Err(RagError::invalid(
                "delete_by_metadata requires at least one filter",
            ));
        }

        let (clause, args) = filter_clause("metadata", filters)?;
        let sql = format!("DELETE FROM embeddings WHERE {}", clause);

        let conn = self.lock()?;
        let deleted = conn.execute(&sql, params_from_iter(args))?;

        tracing::debug!("Deleted {} embedding records matching {:?}", deleted, filters);
        Ok(deleted)
    }

    /// 피드백 기록
    ///
    /// 이벤트를 추가하고 관련도 점수를 ±0.1 조정합니다 (0.1 ~ 2.0).
    /// 레코드가 없으면 `false`
    pub fn record_feedback(&self, event: &FeedbackEvent) -> RagResult<bool> {
        if event.embedding_id.trim().is_empty() {
            return Err(RagError::invalid("embedding id is required"));
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let current: Option<f64> = tx
            .query_row(
                "SELECT relevance_score FROM embeddings WHERE id = ?1",
                params![event.embedding_id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(current) = current else {
            tracing::debug!("Feedback for unknown embedding {}", event.embedding_id);
            return Ok(false);
        };

        tx.execute(
            "INSERT INTO embedding_feedback (id, embedding_id, query, relevant, user_id, comment, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                uuid::Uuid::new_v4().to_string(),
                event.embedding_id,
                event.query,
                event.relevant,
                event.user_id,
                event.comment,
                Utc::now().to_rfc3339()
            ],
        )?;

        tx.execute(
            "UPDATE embeddings
             SET relevance_score = ?1, feedback_count = feedback_count + 1
             WHERE id = ?2",
            params![nudge_relevance(current, event.relevant), event.embedding_id],
        )?;

        tx.commit()?;
        Ok(true)
    }

    /// 레코드 조회
    pub fn get_record(&self, id: &str) -> RagResult<Option<EmbeddingRecord>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, content, metadata, relevance_score, feedback_count, created_at
                 FROM embeddings WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, u32>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        row.map(
            |(id, content, metadata, relevance_score, feedback_count, created_at)| {
                Ok(EmbeddingRecord {
                    id,
                    content,
                    metadata: parse_metadata(&metadata)?,
                    relevance_score,
                    feedback_count,
                    created_at: parse_datetime(created_at),
                })
            },
        )
        .transpose()
    }

    /// 레코드의 피드백 이력 (오래된 순)
    pub fn list_feedback(&self, embedding_id: &str) -> RagResult<Vec<FeedbackRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, embedding_id, query, relevant, user_id, comment, created_at
             FROM embedding_feedback WHERE embedding_id = ?1 ORDER BY rowid",
        )?;

        let records = stmt
            .query_map(params![embedding_id], |row| {
                Ok(FeedbackRecord {
                    id: row.get(0)?,
                    embedding_id: row.get(1)?,
                    query: row.get(2)?,
                    relevant: row.get(3)?,
                    user_id: row.get(4)?,
                    comment: row.get(5)?,
                    created_at: parse_datetime(row.get::<_, String>(6)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// 임베딩 레코드 수
    pub fn count(&self) -> RagResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn stats(&self) -> RagResult<IndexStats> {
        let conn = self.lock()?;
        let embedding_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))?;
        let feedback_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM embedding_feedback", [], |row| row.get(0))?;

        Ok(IndexStats {
            embedding_count: embedding_count as usize,
            feedback_count: feedback_count as usize,
            fts_enabled: self.fts_enabled,
            db_path: self.db_path.clone(),
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 스키마 초기화, FTS5 사용 가능 여부 반환
fn initialize(conn: &Connection) -> RagResult<bool> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS embeddings (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            content TEXT NOT NULL,
            vector BLOB NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            relevance_score REAL NOT NULL DEFAULT 1.0,
            feedback_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS embedding_feedback (
            id TEXT PRIMARY KEY,
            embedding_id TEXT NOT NULL,
            query TEXT NOT NULL,
            relevant INTEGER NOT NULL,
            user_id TEXT,
            comment TEXT,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_feedback_embedding ON embedding_feedback(embedding_id);",
    )?;

    // source: https://www.sqlite.org/fts5.html#external_content_tables
    match conn.execute_batch(FTS_SCHEMA) {
        Ok(()) => Ok(true),
        Err(e) => {
            tracing::warn!("FTS5 not available, using substring search: {}", e);
            Ok(false)
        }
    }
}

impl RawRow {
    fn into_scored(self, raw_score: f64) -> RagResult<ScoredChunk> {
        let raw_score = raw_score.clamp(0.0, 1.0);
        Ok(ScoredChunk {
            metadata: parse_metadata(&self.metadata)?,
            id: self.id,
            text: self.content,
            raw_score,
            score: apply_feedback(raw_score, self.feedback_count),
            feedback_count: self.feedback_count,
        })
    }
}

fn parse_metadata(raw: &str) -> RagResult<Metadata> {
    Ok(serde_json::from_str(raw)?)
}

fn insert_record(
    conn: &Connection,
    text: &str,
    vector: &[f32],
    metadata: &Metadata,
) -> RagResult<String> {
    if text.trim().is_empty() {
        return Err(RagError::invalid("chunk text is required"));
    }
    if vector.is_empty() {
        return Err(RagError::invalid("embedding vector is empty"));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let metadata_json = serde_json::to_string(metadata)?;

    conn.execute(
        "INSERT INTO embeddings (id, content, vector, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            id,
            text,
            encode_vector(vector),
            metadata_json,
            Utc::now().to_rfc3339()
        ],
    )?;

    Ok(id)
}

/// 메타데이터 필터 → SQL 조건 + 바인딩 값
fn filter_clause(column: &str, filters: &MetadataFilter) -> RagResult<(String, Vec<SqlValue>)> {
    if filters.is_empty() {
        return Ok(("1 = 1".to_string(), vec![]));
    }

    let mut clauses = Vec::with_capacity(filters.len());
    let mut args = Vec::with_capacity(filters.len() * 2);

    for (key, value) in filters {
        if key.is_empty() || key.contains('"') {
            return Err(RagError::invalid(format!("invalid metadata key: {:?}", key)));
        }
        clauses.push(format!("CAST(json_extract({}, ?) AS TEXT) = ?", column));
        args.push(SqlValue::Text(format!("$.\"{}\"", key)));
        args.push(SqlValue::Text(value.clone()));
    }

    Ok((clauses.join(" AND "), args))
}

/// 검색어 정리 (소문자, 특수 문자 제거)
fn clean_terms(terms: &[String]) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::new();
    for term in terms {
        let t: String = term
            .to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if !t.is_empty() && !cleaned.contains(&t) {
            cleaned.push(t);
        }
    }
    cleaned
}

/// bm25 (음수, 작을수록 관련) → 0.0 ~ 1.0
fn normalize_bm25(rank: f64) -> f64 {
    let b = rank.abs();
    b / (1.0 + b)
}

/// 가장 앞쪽 일치 위치 기반 점수, 일치 없으면 None
fn containment_score(content: &str, terms: &[String]) -> Option<f64> {
    let lower = content.to_lowercase();
    let len = lower.chars().count();
    if len == 0 {
        return None;
    }

    terms
        .iter()
        .filter_map(|term| lower.find(term.as_str()))
        .map(|byte_pos| {
            let pos = lower[..byte_pos].chars().count();
            0.5 + 0.5 * (1.0 - pos as f64 / len as f64)
        })
        .fold(None, |best: Option<f64>, s| Some(best.map_or(s, |b| b.max(s))))
}

/// 원점수 내림차순 정렬 (안정 정렬) 후 상위 k개
fn sort_and_truncate(results: &mut Vec<ScoredChunk>, top_k: usize) {
    results.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results.truncate(top_k);
}

// ============================================================================
// Tests
// ============================================================================
