//! Document Store - rusqlite 기반 회의록 문서 저장소
//!
//! 원문 회의록과 처리 상태를 저장합니다.
//! 저장 위치: <data_dir>/knowledge.db
//!
//! 같은 내용(SHA-256 해시 일치)의 문서는 새로 만들지 않고 기존 ID를 반환합니다.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{RagError, RagResult};

const DOCUMENT_COLUMNS: &str =
    "id, title, content, content_hash, topic, source, user_id, processed, created_at, updated_at";

// ============================================================================
// Types
// ============================================================================

/// 저장된 문서
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub title: Option<String>,
    pub content: String,
    pub content_hash: String,
    pub topic: Option<String>,
    pub source: Option<String>,
    pub user_id: Option<String>,
    /// 청킹/임베딩 완료 여부
    pub processed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 새 문서 입력
#[derive(Debug, Clone, Default)]
pub struct NewDocument {
    pub title: Option<String>,
    pub content: String,
    pub topic: Option<String>,
    pub source: Option<String>,
    pub user_id: Option<String>,
}

impl NewDocument {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub document_count: usize,
    pub processed_count: usize,
    pub total_content_bytes: usize,
    pub db_path: PathBuf,
}

// ============================================================================
// KnowledgeStore
// ============================================================================

/// 문서 저장소
pub struct KnowledgeStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl KnowledgeStore {
    /// 저장소 열기 (없으면 생성)
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

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> RagResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RagError::StoreUnavailable(format!("lock poisoned: {}", e)))
    }

    /// 스키마 초기화
    fn initialize(&self) -> RagResult<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT,
                content TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                topic TEXT,
                source TEXT,
                user_id TEXT,
                processed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_documents_hash ON documents(content_hash);
            CREATE INDEX IF NOT EXISTS idx_documents_topic ON documents(topic);",
        )?;

        tracing::debug!("Document store initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 문서 저장
    ///
    /// # Returns
    /// `(id, created)` - 같은 내용의 문서가 이미 있으면 `created == false`
    pub fn add_document(&self, doc: NewDocument) -> RagResult<(i64, bool)> {
        if doc.content.trim().is_empty() {
            return Err(RagError::invalid("document content is required"));
        }

        let hash = content_hash(&doc.content);
        let conn = self.lock()?;

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM documents WHERE content_hash = ?1 ORDER BY id LIMIT 1",
                params![hash],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            tracing::info!("Duplicate content, reusing document id={}", id);
            return Ok((id, false));
        }

        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO documents (title, content, content_hash, topic, source, user_id,
                                    processed, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?7)",
            params![doc.title, doc.content, hash, doc.topic, doc.source, doc.user_id, now],
        )?;

        let id = conn.last_insert_rowid();
        tracing::info!(
            "Added document id={} ({})",
            id,
            doc.title.as_deref().unwrap_or("untitled")
        );

        Ok((id, true))
    }

    /// ID로 문서 조회
    pub fn get_document(&self, id: i64) -> RagResult<Option<Document>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM documents WHERE id = ?1", DOCUMENT_COLUMNS);
        Ok(conn.query_row(&sql, params![id], row_to_document).optional()?)
    }

    /// 문서 목록 조회 (최신순)
    pub fn list_documents(&self, limit: usize, topic: Option<&str>) -> RagResult<Vec<Document>> {
        let conn = self.lock()?;

        let docs = if let Some(topic) = topic {
            let sql = format!(
                "SELECT {} FROM documents WHERE topic = ?1 ORDER BY id DESC LIMIT ?2",
                DOCUMENT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![topic, limit as i64], row_to_document)?;
            rows.collect::<Result<Vec<_>, _>>()?
        } else {
            let sql = format!(
                "SELECT {} FROM documents ORDER BY id DESC LIMIT ?1",
                DOCUMENT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![limit as i64], row_to_document)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        Ok(docs)
    }

    /// 전체 문서 ID (오래된 순)
    pub fn document_ids(&self) -> RagResult<Vec<i64>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id FROM documents ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    /// 처리 상태 변경
    ///
    /// 문서가 없으면 `false`
    pub fn mark_processed(&self, id: i64, processed: bool) -> RagResult<bool> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE documents SET processed = ?1, updated_at = ?2 WHERE id = ?3",
            params![processed, Utc::now().to_rfc3339(), id],
        )?;
        Ok(rows > 0)
    }

    /// 문서 삭제
    pub fn delete_document(&self, id: i64) -> RagResult<bool> {
        let conn = self.lock()?;
        let rows = conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    /// 저장소 통계
    pub fn stats(&self) -> RagResult<StoreStats> {
        let conn = self.lock()?;

        let (count, processed, total_size): (i64, i64, i64) = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(processed), 0),
                    COALESCE(SUM(LENGTH(CAST(content AS BLOB))), 0)
             FROM documents",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        Ok(StoreStats {
            document_count: count as usize,
            processed_count: processed as usize,
            total_content_bytes: total_size as usize,
            db_path: self.db_path.clone(),
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 내용 SHA-256 해시 (hex)
pub fn content_hash(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

fn row_to_document(row: &Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        content_hash: row.get(3)?,
        topic: row.get(4)?,
        source: row.get(5)?,
        user_id: row.get(6)?,
        processed: row.get(7)?,
        created_at: parse_datetime(row.get::<_, String>(8)?),
        updated_at: parse_datetime(row.get::<_, String>(9)?),
    })
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
pub(crate) fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, KnowledgeStore) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test.db");
        let store = KnowledgeStore::open(&db_path).unwrap();
        (dir, store)
    }

    #[test]
    fn test_add_and_get_document() {
        let (_dir, store) = create_test_store();

        let doc = NewDocument::new("Budget review. Hiring plan.")
            .with_title("Weekly sync")
            .with_topic("planning")
            .with_user("u-1");

        let (id, created) = store.add_document(doc).unwrap();
        assert!(id > 0);
        assert!(created);

        let retrieved = store.get_document(id).unwrap().unwrap();
        assert_eq!(retrieved.title.as_deref(), Some("Weekly sync"));
        assert_eq!(retrieved.topic.as_deref(), Some("planning"));
        assert_eq!(retrieved.user_id.as_deref(), Some("u-1"));
        assert!(!retrieved.processed);
        assert_eq!(retrieved.content_hash, content_hash("Budget review. Hiring plan."));

        assert!(store.get_document(9999).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_content_returns_existing_id() {
        let (_dir, store) = create_test_store();

        let (first, created) = store
            .add_document(NewDocument::new("Same transcript").with_title("A"))
            .unwrap();
        assert!(created);

        let (second, created) = store
            .add_document(NewDocument::new("Same transcript").with_title("B"))
            .unwrap();
        assert!(!created);
        assert_eq!(first, second);
        assert_eq!(store.stats().unwrap().document_count, 1);

        let found = store.get_document(first).unwrap().unwrap();
        assert_eq!(found.title.as_deref(), Some("A"));
        assert_eq!(found.content_hash, content_hash("Same transcript"));
    }

    #[test]
    fn test_empty_content_rejected() {
        let (_dir, store) = create_test_store();
        let result = store.add_document(NewDocument::new("   "));
        assert!(matches!(result, Err(RagError::InvalidInput(_))));
    }

    #[test]
    fn test_list_documents() {
        let (_dir, store) = create_test_store();

        for i in 0..5 {
            let mut doc = NewDocument::new(format!("Content {}", i));
            if i % 2 == 0 {
                doc = doc.with_topic("finance");
            }
            store.add_document(doc).unwrap();
        }

        let list = store.list_documents(10, None).unwrap();
        assert_eq!(list.len(), 5);
        assert_eq!(list[0].content, "Content 4");

        let finance = store.list_documents(10, Some("finance")).unwrap();
        assert_eq!(finance.len(), 3);

        let limited = store.list_documents(2, None).unwrap();
        assert_eq!(limited.len(), 2);

        assert_eq!(store.document_ids().unwrap().len(), 5);
    }

    #[test]
    fn test_mark_processed() {
        let (_dir, store) = create_test_store();
        let (id, _) = store.add_document(NewDocument::new("Original")).unwrap();

        assert!(store.mark_processed(id, true).unwrap());
        assert!(store.get_document(id).unwrap().unwrap().processed);
        assert!(!store.mark_processed(424242, true).unwrap());

        assert!(store.mark_processed(id, false).unwrap());
        assert!(!store.get_document(id).unwrap().unwrap().processed);
    }

    #[test]
    fn test_delete_document() {
        let (_dir, store) = create_test_store();
        let (id, _) = store.add_document(NewDocument::new("To be deleted")).unwrap();

        assert!(store.delete_document(id).unwrap());
        assert!(store.get_document(id).unwrap().is_none());
        assert!(!store.delete_document(id).unwrap());
    }

    #[test]
    fn test_stats() {
        let (_dir, store) = create_test_store();

        let (id, _) = store.add_document(NewDocument::new("1234567890")).unwrap();
        store.add_document(NewDocument::new("abc")).unwrap();
        store.mark_processed(id, true).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.document_count, 2);
        assert_eq!(stats.processed_count, 1);
        assert_eq!(stats.total_content_bytes, 13);
    }
}
