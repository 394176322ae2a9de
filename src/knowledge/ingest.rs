//! Ingestion Pipeline - 문서 저장, 청킹, 임베딩, 인덱싱
//!
//! 문서 1건의 처리 순서:
//! 1. 문서 저장 (내용 해시가 같으면 기존 ID 재사용)
//! 2. 청킹
//! 3. 청크 임베딩 (동시 요청 수 제한 + 재시도)
//! 4. 기존 청크 삭제 (`document_id` 메타데이터 기준) 후 새 청크 기록
//! 5. `processed = true`
//!
//! 실패하면 문서는 `processed = false`로 남고 `rechunk`로 다시 처리할 수 있습니다.
//!
//! 일관성: 4단계는 인덱스 트랜잭션 하나로 실행되므로 같은 문서를 동시에 재청킹해도
//! 마지막으로 기록된 청크 세트 하나만 남습니다.
//! 다만 이 보장은 질의에 대해서는 약속하지 않습니다. 재청킹과 동시에 실행된 질의는
//! 해당 문서의 청크를 0개 또는 중복으로 볼 수 있는 것으로 간주해야 합니다.

use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use serde_json::{json, Value};

use super::agent::blocking;
use super::chunker::{Chunk, ChunkConfig, Chunker, TranscriptChunker};
use super::index::{HybridIndex, Metadata, MetadataFilter, NewChunk};
use super::store::{Document, KnowledgeStore, NewDocument};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, RagResult};
use crate::retry::RetryPolicy;

// ============================================================================
// Types
// ============================================================================

/// 수집 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    pub document_id: i64,
    /// 새 문서 여부 (false면 같은 내용의 기존 문서)
    pub created: bool,
    /// 이번 호출에서 기록한 청크 수
    pub chunk_count: usize,
}

/// 일괄 처리 결과
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// (문서 ID, 에러 메시지)
    pub failures: Vec<(i64, String)>,
}

// ============================================================================
// IngestPipeline
// ============================================================================

/// 수집 파이프라인
pub struct IngestPipeline {
    store: Arc<KnowledgeStore>,
    index: Arc<HybridIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    retry: RetryPolicy,
    /// 지정하지 않으면 `EmbeddingProvider::max_concurrency`
    concurrency: Option<usize>,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<KnowledgeStore>,
        index: Arc<HybridIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            store,
            index,
            embedder,
            retry: RetryPolicy::default(),
            concurrency: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// 동시 임베딩 요청 수 지정
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency.max(1));
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
            .unwrap_or_else(|| self.embedder.max_concurrency())
            .max(1)
    }

    /// 문서 수집
    ///
    /// 같은 내용의 문서가 이미 처리되어 있으면 기존 ID만 반환합니다.
    pub async fn ingest(&self, doc: NewDocument, config: &ChunkConfig) -> RagResult<IngestOutcome> {
        let chunker = TranscriptChunker::new(config.clone())?;

        let store = Arc::clone(&self.store);
        let (document_id, created) = blocking(move || store.add_document(doc)).await?;

        let existing = self.load(document_id).await?;
        if !created && existing.processed {
            tracing::info!("Document {} already processed, skipping", document_id);
            return Ok(IngestOutcome {
                document_id,
                created,
                chunk_count: 0,
            });
        }

        let chunk_count = self.process(&existing, &chunker).await?;
        Ok(IngestOutcome {
            document_id,
            created,
            chunk_count,
        })
    }

    /// 문서 재청킹
    ///
    /// 문서가 없으면 `false`
    pub async fn rechunk(&self, document_id: i64, config: &ChunkConfig) -> RagResult<bool> {
        let chunker = TranscriptChunker::new(config.clone())?;

        let store = Arc::clone(&self.store);
        let Some(doc) = blocking(move || store.get_document(document_id)).await? else {
            tracing::warn!("Rechunk requested for unknown document {}", document_id);
            return Ok(false);
        };

        let store = Arc::clone(&self.store);
        blocking(move || store.mark_processed(document_id, false)).await?;

        self.process(&doc, &chunker).await?;
        Ok(true)
    }

    /// 전체 문서 재청킹 (개별 실패는 집계 후 계속 진행)
    pub async fn rechunk_all(&self, config: &ChunkConfig) -> RagResult<BatchReport> {
        config.validate()?;

        let store = Arc::clone(&self.store);
        let ids = blocking(move || store.document_ids()).await?;

        let mut report = BatchReport {
            total: ids.len(),
            ..BatchReport::default()
        };

        for id in ids {
            match self.rechunk(id, config).await {
                Ok(true) => report.succeeded += 1,
                Ok(false) => {
                    report.failed += 1;
                    report.failures.push((id, "document not found".to_string()));
                }
                Err(e) => {
                    tracing::warn!("Rechunk failed for document {}: {}", id, e);
                    report.failed += 1;
                    report.failures.push((id, e.to_string()));
                }
            }
        }

        tracing::info!(
            "Rechunked {} documents ({} succeeded, {} failed)",
            report.total,
            report.succeeded,
            report.failed
        );
        Ok(report)
    }

    /// 문서와 청크 삭제
    pub async fn delete_document(&self, document_id: i64) -> RagResult<bool> {
        let store = Arc::clone(&self.store);
        let index = Arc::clone(&self.index);
        blocking(move || remove_document(&store, &index, document_id)).await
    }

    async fn load(&self, document_id: i64) -> RagResult<Document> {
        let store = Arc::clone(&self.store);
        blocking(move || store.get_document(document_id))
            .await?
            .ok_or_else(|| RagError::NotFound(format!("document {}", document_id)))
    }

    /// 청킹 → 임베딩 → 기존 청크 교체 → 처리 완료 표시
    async fn process(&self, doc: &Document, chunker: &TranscriptChunker) -> RagResult<usize> {
        let texts = chunker.chunk(&doc.content);
        let chunks = Chunk::from_texts(doc.id, texts, chunker.config());
        tracing::debug!("Document {} split into {} chunks", doc.id, chunks.len());

        let inputs: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let retry = self.retry;
        let embedder = Arc::clone(&self.embedder);
        let vectors: Vec<Vec<f32>> = stream::iter(inputs)
            .map(|text| {
                let embedder = Arc::clone(&embedder);
                async move { retry.run("chunk embedding", || embedder.embed(&text)).await }
            })
            .buffered(self.concurrency())
            .try_collect()
            .await?;

        let records: Vec<NewChunk> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| NewChunk {
                text: chunk.text.clone(),
                vector,
                metadata: chunk_metadata(doc, chunk),
            })
            .collect();
        let count = records.len();

        let index = Arc::clone(&self.index);
        let document_id = doc.id;
        let removed = blocking(move || index.replace_document_chunks(document_id, &records)).await?;
        if removed > 0 {
            tracing::debug!("Removed {} stale chunks for document {}", removed, document_id);
        }

        let store = Arc::clone(&self.store);
        blocking(move || store.mark_processed(document_id, true)).await?;

        tracing::info!("Indexed document {} with {} chunks", document_id, count);
        Ok(count)
    }
}

/// 문서와 청크 삭제 (동기 버전, 임베딩 불필요)
///
/// 청크를 먼저 지우므로 중간에 실패해도 문서 없는 청크는 남지 않습니다.
pub fn remove_document(
    store: &KnowledgeStore,
    index: &HybridIndex,
    document_id: i64,
) -> RagResult<bool> {
    let removed = index.delete_by_metadata(&document_filter(document_id))?;
    let deleted = store.delete_document(document_id)?;

    if deleted {
        tracing::info!("Deleted document {} ({} chunks)", document_id, removed);
    }
    Ok(deleted)
}

fn document_filter(document_id: i64) -> MetadataFilter {
    MetadataFilter::from([("document_id".to_string(), document_id.to_string())])
}

/// 청크 메타데이터
fn chunk_metadata(doc: &Document, chunk: &Chunk) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("document_id".to_string(), json!(chunk.document_id));
    metadata.insert("chunk_index".to_string(), json!(chunk.index));
    metadata.insert("total_chunks".to_string(), json!(chunk.total));
    metadata.insert(
        "chunking_strategy".to_string(),
        json!(chunk.strategy.as_str()),
    );
    metadata.insert("chunk_overlap".to_string(), json!(chunk.overlap));

    let optional = [
        ("topic", &doc.topic),
        ("source", &doc.source),
        ("title", &doc.title),
        ("user_id", &doc.user_id),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            metadata.insert(key.to_string(), Value::String(value.clone()));
        }
    }

    metadata
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::chunker::ChunkStrategy;
    use crate::knowledge::test_support::{FailingEmbedder, FakeEmbedder};
    use crate::knowledge::test_support::{bag_of_words, DIM};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    const TRANSCRIPT: &str = "John opened the meeting. Marketing reported growth. \
        Sales were flat. The budget was approved. Sarah owns vendor follow-up. \
        Hiring is paused until Q4.";

    struct Fixture {
        _dir: TempDir,
        store: Arc<KnowledgeStore>,
        index: Arc<HybridIndex>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(KnowledgeStore::open(&dir.path().join("knowledge.db")).unwrap());
        let index = Arc::new(HybridIndex::open(&dir.path().join("index.db")).unwrap());
        Fixture {
            _dir: dir,
            store,
            index,
        }
    }

    fn pipeline(fx: &Fixture, embedder: Arc<dyn EmbeddingProvider>) -> IngestPipeline {
        IngestPipeline::new(Arc::clone(&fx.store), Arc::clone(&fx.index), embedder)
            .with_retry(RetryPolicy::new(1, Duration::ZERO))
    }

    fn sentences(unit_size: usize, overlap: usize) -> ChunkConfig {
        ChunkConfig::new(ChunkStrategy::Sentence, unit_size, overlap, 2000)
    }

    fn chunks_of(index: &HybridIndex, document_id: i64) -> Vec<Metadata> {
        let filter = document_filter(document_id);
        index
            .vector_search(&bag_of_words("x"), &filter, 100)
            .unwrap()
            .into_iter()
            .map(|c| c.metadata)
            .collect()
    }

    /// 특정 문구가 포함된 텍스트만 실패
    struct SelectiveEmbedder;

    #[async_trait]
    impl EmbeddingProvider for SelectiveEmbedder {
        async fn embed(&self, text: &str) -> RagResult<Vec<f32>> {
            if text.contains("FAIL") {
                Err(RagError::EmbeddingUnavailable("timeout".into()))
            } else {
                Ok(vec![1.0, 0.5])
            }
        }

        fn dimension(&self) -> usize {
            2
        }

        fn name(&self) -> &str {
            "selective"
        }
    }

    /// 동시에 처리 중인 요청 수의 최대값을 기록
    struct TrackingEmbedder {
        hint: usize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl TrackingEmbedder {
        fn new(hint: usize) -> Self {
            Self {
                hint,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }

        fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EmbeddingProvider for TrackingEmbedder {
        async fn embed(&self, text: &str) -> RagResult<Vec<f32>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(bag_of_words(text))
        }

        fn dimension(&self) -> usize {
            DIM
        }

        fn name(&self) -> &str {
            "tracking"
        }

        fn max_concurrency(&self) -> usize {
            self.hint
        }
    }

    fn long_transcript(sentences: usize) -> String {
        (0..sentences)
            .map(|i| format!("Speaker {} raised agenda item {}.", i % 3, i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[tokio::test]
    async fn test_ingest_writes_chunks_with_metadata() {
        let fx = fixture();
        let pipeline = pipeline(&fx, Arc::new(FakeEmbedder::default()));

        let doc = NewDocument::new(TRANSCRIPT)
            .with_title("Planning")
            .with_topic("planning")
            .with_source("zoom");
        let outcome = pipeline.ingest(doc, &sentences(2, 0)).await.unwrap();

        assert!(outcome.created);
        assert_eq!(outcome.chunk_count, 3);
        assert!(fx.store.get_document(outcome.document_id).unwrap().unwrap().processed);

        let mut metas = chunks_of(&fx.index, outcome.document_id);
        assert_eq!(metas.len(), 3);
        metas.sort_by_key(|m| m["chunk_index"].as_u64());
        for (i, meta) in metas.iter().enumerate() {
            assert_eq!(meta["chunk_index"], json!(i));
            assert_eq!(meta["total_chunks"], json!(3));
            assert_eq!(meta["chunking_strategy"], "sentence");
            assert_eq!(meta["chunk_overlap"], json!(0));
            assert_eq!(meta["topic"], "planning");
            assert_eq!(meta["source"], "zoom");
            assert_eq!(meta["title"], "Planning");
            assert!(meta.get("user_id").is_none());
        }
    }

    #[tokio::test]
    async fn test_duplicate_ingest_returns_existing_id() {
        let fx = fixture();
        let embedder = Arc::new(FakeEmbedder::default());
        let pipeline = pipeline(&fx, embedder.clone());

        let first = pipeline
            .ingest(NewDocument::new(TRANSCRIPT), &sentences(2, 0))
            .await
            .unwrap();
        let calls = embedder.calls();

        let second = pipeline
            .ingest(NewDocument::new(TRANSCRIPT), &sentences(2, 0))
            .await
            .unwrap();

        assert_eq!(first.document_id, second.document_id);
        assert!(!second.created);
        assert_eq!(second.chunk_count, 0);
        assert_eq!(embedder.calls(), calls);
        assert_eq!(fx.index.count().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_rechunk_replaces_chunk_set() {
        let fx = fixture();
        let pipeline = pipeline(&fx, Arc::new(FakeEmbedder::default()));

        let outcome = pipeline
            .ingest(NewDocument::new(TRANSCRIPT), &sentences(2, 0))
            .await
            .unwrap();
        assert_eq!(fx.index.count().unwrap(), 3);

        assert!(pipeline.rechunk(outcome.document_id, &sentences(3, 1)).await.unwrap());
        let metas = chunks_of(&fx.index, outcome.document_id);
        assert_eq!(metas.len(), 3);
        assert!(metas.iter().all(|m| m["chunk_overlap"] == json!(1)));
        assert_eq!(fx.index.count().unwrap(), 3);

        // 같은 설정으로 다시 실행해도 청크 수는 그대로
        assert!(pipeline.rechunk(outcome.document_id, &sentences(3, 1)).await.unwrap());
        assert_eq!(fx.index.count().unwrap(), 3);

        assert!(!pipeline.rechunk(9999, &sentences(3, 1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_embedding_failure_leaves_document_unprocessed() {
        let fx = fixture();
        let pipeline = pipeline(&fx, Arc::new(FailingEmbedder::default()));

        let result = pipeline
            .ingest(NewDocument::new(TRANSCRIPT), &sentences(2, 0))
            .await;
        assert!(matches!(result, Err(RagError::EmbeddingUnavailable(_))));

        let docs = fx.store.list_documents(10, None).unwrap();
        assert_eq!(docs.len(), 1);
        assert!(!docs[0].processed);
        assert_eq!(fx.index.count().unwrap(), 0);

        // 임베딩이 복구되면 같은 내용 재수집으로 처리 완료
        let recovered = IngestPipeline::new(
            Arc::clone(&fx.store),
            Arc::clone(&fx.index),
            Arc::new(FakeEmbedder::default()),
        );
        let outcome = recovered
            .ingest(NewDocument::new(TRANSCRIPT), &sentences(2, 0))
            .await
            .unwrap();
        assert!(!outcome.created);
        assert_eq!(outcome.chunk_count, 3);
    }

    #[tokio::test]
    async fn test_rechunk_all_continues_past_failures() {
        let fx = fixture();
        let pipeline = pipeline(&fx, Arc::new(SelectiveEmbedder));

        fx.store.add_document(NewDocument::new("Alpha notes. Beta notes.")).unwrap();
        let (bad, _) = fx.store.add_document(NewDocument::new("This will FAIL.")).unwrap();
        fx.store.add_document(NewDocument::new("Gamma notes.")).unwrap();

        let report = pipeline.rechunk_all(&sentences(1, 0)).await.unwrap();
        assert_eq!(report.total, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].0, bad);
        assert_eq!(fx.index.count().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_before_storing() {
        let fx = fixture();
        let pipeline = pipeline(&fx, Arc::new(FakeEmbedder::default()));

        let result = pipeline
            .ingest(NewDocument::new(TRANSCRIPT), &sentences(2, 2))
            .await;
        assert!(matches!(result, Err(RagError::InvalidInput(_))));
        assert_eq!(fx.store.stats().unwrap().document_count, 0);
    }

    #[tokio::test]
    async fn test_delete_document_removes_chunks() {
        let fx = fixture();
        let pipeline = pipeline(&fx, Arc::new(FakeEmbedder::default()));

        let keep = pipeline
            .ingest(NewDocument::new("Keep this one. It matters."), &sentences(1, 0))
            .await
            .unwrap();
        let drop = pipeline
            .ingest(NewDocument::new(TRANSCRIPT), &sentences(2, 0))
            .await
            .unwrap();

        assert!(pipeline.delete_document(drop.document_id).await.unwrap());
        assert_eq!(fx.index.count().unwrap(), 2);
        assert_eq!(chunks_of(&fx.index, keep.document_id).len(), 2);
        assert!(!pipeline.delete_document(drop.document_id).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_rechunks_keep_one_chunk_set() {
        let fx = fixture();
        let pipeline = Arc::new(pipeline(&fx, Arc::new(TrackingEmbedder::new(4))));
        let config = sentences(1, 0);

        let outcome = pipeline
            .ingest(NewDocument::new(long_transcript(60)), &config)
            .await
            .unwrap();
        assert_eq!(outcome.chunk_count, 60);
        let document_id = outcome.document_id;

        for _ in 0..5 {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let pipeline = Arc::clone(&pipeline);
                    let config = config.clone();
                    tokio::spawn(async move { pipeline.rechunk(document_id, &config).await })
                })
                .collect();
            for handle in handles {
                assert!(handle.await.unwrap().unwrap());
            }
            assert_eq!(fx.index.count().unwrap(), 60);
        }
    }

    #[tokio::test]
    async fn test_ingest_runs_on_spawned_tasks() {
        let fx = fixture();
        let pipeline = Arc::new(pipeline(&fx, Arc::new(FakeEmbedder::default())));

        let handles: Vec<_> = ["Alpha notes. Beta notes.", "Gamma notes."]
            .into_iter()
            .map(|text| {
                let pipeline = Arc::clone(&pipeline);
                tokio::spawn(async move {
                    pipeline
                        .ingest(NewDocument::new(text), &sentences(1, 0))
                        .await
                })
            })
            .collect();

        let mut chunk_count = 0;
        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            assert!(outcome.created);
            chunk_count += outcome.chunk_count;
        }
        assert_eq!(chunk_count, 3);
        assert_eq!(fx.index.count().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_embedding_concurrency_limit() {
        let fx = fixture();
        let transcript = long_transcript(8);

        // 기본값은 프로바이더가 알려준 동시 요청 수
        let serial = Arc::new(TrackingEmbedder::new(1));
        let pipeline_serial = pipeline(&fx, serial.clone());
        assert_eq!(pipeline_serial.concurrency(), 1);
        pipeline_serial
            .ingest(NewDocument::new(transcript.clone()), &sentences(1, 0))
            .await
            .unwrap();
        assert_eq!(serial.peak(), 1);

        let parallel = Arc::new(TrackingEmbedder::new(1));
        let pipeline_parallel = pipeline(&fx, parallel.clone()).with_concurrency(3);
        assert_eq!(pipeline_parallel.concurrency(), 3);
        let outcome = pipeline_parallel
            .ingest(NewDocument::new(format!("{} Closing remarks.", transcript)), &sentences(1, 0))
            .await
            .unwrap();
        assert_eq!(outcome.chunk_count, 9);
        assert_eq!(parallel.peak(), 3);

        assert_eq!(pipeline(&fx, serial).with_concurrency(0).concurrency(), 1);
    }
}
