//! transcript-rag - 회의록 하이브리드 RAG 엔진
//!
//! 벡터 검색 + SQLite FTS5 키워드 검색을 가중 합산하고
//! 사용자 피드백으로 순위를 보정하는 회의록 검색 엔진입니다.

pub mod cli;
pub mod collector;
pub mod config;
pub mod embedding;
pub mod error;
pub mod knowledge;
pub mod retry;

// Re-exports
pub use config::{get_data_dir, RagConfig};
pub use embedding::{create_embedder, get_api_key, has_api_key, EmbeddingProvider, GeminiEmbedding};
pub use error::{RagError, RagResult};
pub use knowledge::{
    ChunkConfig, ChunkStrategy, Chunker, Document, FeedbackEvent, FusedResult, HybridIndex,
    HybridRetriever, HybridStats, IngestOutcome, KnowledgeStore, NewDocument, QueryMode,
    QueryOptions, QueryResult, RetrievalAgent, SearchMethod, TranscriptChunker,
};
pub use retry::RetryPolicy;
