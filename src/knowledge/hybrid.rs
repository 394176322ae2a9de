//! 하이브리드 검색기 - 저장소, 인덱스, 수집, 검색 통합 진입점
//!
//! 데이터 디렉토리 구성:
//! - `knowledge.db`: 원본 문서
//! - `index.db`: 임베딩 레코드 + FTS5 + 피드백
//!
//! 재청킹 중인 문서는 질의 결과에서 잠시 누락되거나 중복될 수 있습니다.
//! (`ingest` 모듈 참고)

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::config::RagConfig;
use crate::embedding::{create_embedder, EmbeddingProvider};
use crate::error::RagResult;

use super::agent::{blocking, QueryOptions, QueryResult, RetrievalAgent};
use super::chunker::ChunkConfig;
use super::fusion::FusedResult;
use super::index::{EmbeddingRecord, FeedbackEvent, FeedbackRecord, HybridIndex};
use super::ingest::{BatchReport, IngestOutcome, IngestPipeline};
use super::store::{Document, KnowledgeStore, NewDocument};

const STORE_FILE: &str = "knowledge.db";
const INDEX_FILE: &str = "index.db";

/// 통합 통계
#[derive(Debug, Clone, Serialize)]
pub struct HybridStats {
    pub document_count: usize,
    pub processed_count: usize,
    pub total_content_bytes: usize,
    pub embedding_count: usize,
    pub feedback_count: usize,
    pub fts_enabled: bool,
}

/// 하이브리드 검색기
pub struct HybridRetriever {
    config: RagConfig,
    store: Arc<KnowledgeStore>,
    index: Arc<HybridIndex>,
    pipeline: IngestPipeline,
    agent: RetrievalAgent,
}

impl HybridRetriever {
    /// 환경 변수 설정 + Gemini 임베딩으로 생성
    pub fn new() -> RagResult<Self> {
        Self::open(RagConfig::from_env()?)
    }

    /// 지정된 설정 + Gemini 임베딩으로 생성
    pub fn open(config: RagConfig) -> RagResult<Self> {
        let embedder = create_embedder()?;
        Self::with_embedder(config, Arc::new(embedder))
    }

    /// 임베딩 프로바이더를 직접 지정하여 생성
    pub fn with_embedder(config: RagConfig, embedder: Arc<dyn EmbeddingProvider>) -> RagResult<Self> {
        let (store, index) = open_stores(&config.data_dir)?;
        let store = Arc::new(store);
        let index = Arc::new(index);

        let pipeline = IngestPipeline::new(Arc::clone(&store), Arc::clone(&index), Arc::clone(&embedder))
            .with_retry(config.retry);
        let agent = RetrievalAgent::new(index.clone(), embedder).with_retry(config.retry);

        tracing::debug!("Opened retriever at {}", config.data_dir.display());

        Ok(Self {
            config,
            store,
            index,
            pipeline,
            agent,
        })
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Ingestion
    // ------------------------------------------------------------------------

    /// 기본 청킹 설정으로 수집
    pub async fn ingest(&self, doc: NewDocument) -> RagResult<IngestOutcome> {
        self.pipeline.ingest(doc, &self.config.chunking).await
    }

    pub async fn ingest_with(&self, doc: NewDocument, config: &ChunkConfig) -> RagResult<IngestOutcome> {
        self.pipeline.ingest(doc, config).await
    }

    /// 문서 재청킹 (문서가 없으면 `false`)
    pub async fn rechunk(&self, document_id: i64, config: &ChunkConfig) -> RagResult<bool> {
        self.pipeline.rechunk(document_id, config).await
    }

    pub async fn rechunk_all(&self, config: &ChunkConfig) -> RagResult<BatchReport> {
        self.pipeline.rechunk_all(config).await
    }

    /// 문서와 청크 삭제
    pub async fn delete_document(&self, document_id: i64) -> RagResult<bool> {
        self.pipeline.delete_document(document_id).await
    }

    // ------------------------------------------------------------------------
    // Retrieval
    // ------------------------------------------------------------------------

    /// 질의 (에러는 시스템 결과로 변환)
    pub async fn query(&self, text: &str, options: &QueryOptions) -> Vec<QueryResult> {
        self.agent.query(text, options).await
    }

    /// 질의 (에러 반환)
    pub async fn search(&self, text: &str, options: &QueryOptions) -> RagResult<Vec<FusedResult>> {
        self.agent.search(text, options).await
    }

    // ------------------------------------------------------------------------
    // Feedback
    // ------------------------------------------------------------------------

    /// 피드백 기록 (레코드가 없으면 `false`)
    pub async fn feedback(&self, event: FeedbackEvent) -> RagResult<bool> {
        let index = Arc::clone(&self.index);
        blocking(move || index.record_feedback(&event)).await
    }

    pub async fn list_feedback(&self, embedding_id: &str) -> RagResult<Vec<FeedbackRecord>> {
        let index = Arc::clone(&self.index);
        let id = embedding_id.to_string();
        blocking(move || index.list_feedback(&id)).await
    }

    pub async fn get_record(&self, embedding_id: &str) -> RagResult<Option<EmbeddingRecord>> {
        let index = Arc::clone(&self.index);
        let id = embedding_id.to_string();
        blocking(move || index.get_record(&id)).await
    }

    // ------------------------------------------------------------------------
    // Documents
    // ------------------------------------------------------------------------

    pub async fn get_document(&self, document_id: i64) -> RagResult<Option<Document>> {
        let store = Arc::clone(&self.store);
        blocking(move || store.get_document(document_id)).await
    }

    /// 문서 목록 (최신순)
    pub async fn list_documents(&self, limit: usize, topic: Option<&str>) -> RagResult<Vec<Document>> {
        let store = Arc::clone(&self.store);
        let topic = topic.map(str::to_string);
        blocking(move || store.list_documents(limit, topic.as_deref())).await
    }

    /// 통합 통계
    pub async fn stats(&self) -> RagResult<HybridStats> {
        let store = Arc::clone(&self.store);
        let index = Arc::clone(&self.index);
        blocking(move || collect_stats(&store, &index)).await
    }

    /// 내부 스토어 접근
    pub fn store(&self) -> &KnowledgeStore {
        &self.store
    }

    /// 내부 인덱스 접근
    pub fn index(&self) -> &HybridIndex {
        &self.index
    }
}

/// 데이터 디렉토리의 문서 저장소와 인덱스 열기 (임베딩 없이 조회/삭제용)
pub fn open_stores(data_dir: &Path) -> RagResult<(KnowledgeStore, HybridIndex)> {
    let store = KnowledgeStore::open(&data_dir.join(STORE_FILE))?;
    let index = HybridIndex::open(&data_dir.join(INDEX_FILE))?;
    Ok((store, index))
}

/// 통합 통계 계산
pub fn collect_stats(store: &KnowledgeStore, index: &HybridIndex) -> RagResult<HybridStats> {
    let store_stats = store.stats()?;
    let index_stats = index.stats()?;
    Ok(HybridStats {
        document_count: store_stats.document_count,
        processed_count: store_stats.processed_count,
        total_content_bytes: store_stats.total_content_bytes,
        embedding_count: index_stats.embedding_count,
        feedback_count: index_stats.feedback_count,
        fts_enabled: index_stats.fts_enabled,
    })
}

// ============================================================================
// Tests
// ============================================================================
