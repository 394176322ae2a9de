//! Knowledge 모듈 - 회의록 하이브리드 RAG 지식 저장소
//!
//! - Store: 원본 문서 저장 (내용 해시 중복 제거)
//! - Chunker: 문장/문단/섹션 전략 텍스트 분할
//! - Index: 임베딩 레코드 + FTS5 키워드 검색 + 피드백
//! - Fusion: 가중 합산 + 피드백 부스트
//! - Agent: 질의 모드별 검색 계획과 결과 변환
//! - Ingest: 수집 / 재청킹 파이프라인

mod agent;
mod chunker;
mod fusion;
mod hybrid;
mod index;
mod ingest;
mod keywords;
mod store;
mod vector;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports
pub use agent::{QueryMode, QueryOptions, QueryResult, RetrievalAgent, SYSTEM_SOURCE};
pub use chunker::{
    analyze_quality, chunk_text, compare_strategies, estimate_tokens, hard_wrap, split_sentences,
    Chunk, ChunkConfig, ChunkQuality, ChunkStrategy, Chunker, QualityIssue, StrategyReport,
    TokenEstimate, TranscriptChunker,
};
pub use fusion::{
    apply_feedback, feedback_boost, fuse, fuse_with, nudge_relevance, rank_single, FusedResult,
    SearchMethod,
};
pub use hybrid::{collect_stats, open_stores, HybridRetriever, HybridStats};
pub use index::{
    EmbeddingRecord, FeedbackEvent, FeedbackRecord, HybridIndex, IndexStats, Metadata,
    MetadataFilter, NewChunk, ScoredChunk, SearchIndex,
};
pub use ingest::{remove_document, BatchReport, IngestOutcome, IngestPipeline};
pub use keywords::{KeywordExtractor, LengthRankedKeywords};
pub use store::{content_hash, Document, KnowledgeStore, NewDocument, StoreStats};
pub use vector::cosine_similarity;
