//! Retrieval Agent - 질의 처리 진입점
//!
//! 질의 → 키워드 추출 → (임베딩 ∥ 키워드 검색) → 통합 → 임계값 필터 → 응답
//!
//! 검색 계획은 질의마다 한 번 결정합니다.
//! 임베딩이 실패하면 키워드 검색만으로 응답하고,
//! 그 밖의 실패는 `source == "system"`인 결과 하나로 변환합니다.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;

use super::fusion::{fuse_with, rank_single, FusedResult, SearchMethod};
use super::index::{MetadataFilter, ScoredChunk, SearchIndex};
use super::keywords::{KeywordExtractor, LengthRankedKeywords};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, RagResult};
use crate::retry::RetryPolicy;

/// 시스템 결과의 source
pub const SYSTEM_SOURCE: &str = "system";
const INVALID_QUERY_MESSAGE: &str = "Please provide a valid query.";

// ============================================================================
// Query Options
// ============================================================================

/// 검색 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    /// 벡터 + 키워드 통합
    #[default]
    Hybrid,
    /// 벡터 검색만
    Semantic,
    /// 추출 키워드로 키워드 검색만
    Keyword,
    /// 질의 원문 단어로 키워드 검색만
    Naive,
}

impl QueryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryMode::Hybrid => "hybrid",
            QueryMode::Semantic => "semantic",
            QueryMode::Keyword => "keyword",
            QueryMode::Naive => "naive",
        }
    }
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hybrid" => Ok(QueryMode::Hybrid),
            "semantic" => Ok(QueryMode::Semantic),
            "keyword" => Ok(QueryMode::Keyword),
            "naive" => Ok(QueryMode::Naive),
            other => Err(format!(
                "unknown query mode '{}' (expected hybrid, semantic, keyword or naive)",
                other
            )),
        }
    }
}

/// 질의 옵션
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    pub mode: QueryMode,
    /// `metadata.topic` 일치 필터
    pub topic: Option<String>,
    pub max_results: usize,
    /// 통합 후 이 점수 미만 결과 제외
    pub score_threshold: f64,
    pub use_feedback: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            mode: QueryMode::Hybrid,
            topic: None,
            max_results: 5,
            score_threshold: 0.0,
            use_feedback: true,
        }
    }
}

// ============================================================================
// Query Result
// ============================================================================

/// 질의 응답 항목
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    /// 임베딩 레코드 ID (시스템 결과는 None)
    pub id: Option<String>,
    pub text: String,
    pub score: f64,
    pub topic: Option<String>,
    pub source: String,
    pub method: Option<SearchMethod>,
}

impl QueryResult {
    /// 시스템 메시지 결과 (점수 0.0)
    pub fn system(message: impl Into<String>) -> Self {
        Self {
            id: None,
            text: message.into(),
            score: 0.0,
            topic: None,
            source: SYSTEM_SOURCE.to_string(),
            method: None,
        }
    }

    pub fn is_system(&self) -> bool {
        self.id.is_none() && self.source == SYSTEM_SOURCE
    }
}

impl From<FusedResult> for QueryResult {
    fn from(result: FusedResult) -> Self {
        Self {
            topic: result.metadata_str("topic").map(str::to_string),
            id: Some(result.id),
            text: result.text,
            score: result.score,
            source: result.source,
            method: Some(result.method),
        }
    }
}

// ============================================================================
// Retrieval Plan
// ============================================================================

/// 질의당 한 번 결정되는 검색 계획
#[derive(Debug)]
enum RetrievalPlan {
    Fused(Vec<f32>),
    SemanticOnly(Vec<f32>),
    LexicalOnly,
}

impl RetrievalPlan {
    fn select(mode: QueryMode, embedding: Option<RagResult<Vec<f32>>>) -> Self {
        match (mode, embedding) {
            (QueryMode::Keyword | QueryMode::Naive, _) | (_, None) => RetrievalPlan::LexicalOnly,
            (_, Some(Err(e))) => {
                tracing::warn!("Query embedding unavailable, using keyword search only: {}", e);
                RetrievalPlan::LexicalOnly
            }
            (QueryMode::Semantic, Some(Ok(vector))) => RetrievalPlan::SemanticOnly(vector),
            (QueryMode::Hybrid, Some(Ok(vector))) => RetrievalPlan::Fused(vector),
        }
    }
}

// ============================================================================
// RetrievalAgent
// ============================================================================

/// 검색 에이전트
pub struct RetrievalAgent {
    index: Arc<dyn SearchIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    keywords: Arc<dyn KeywordExtractor>,
    retry: RetryPolicy,
}

impl RetrievalAgent {
    pub fn new(index: Arc<dyn SearchIndex>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            index,
            embedder,
            keywords: Arc::new(LengthRankedKeywords::default()),
            retry: RetryPolicy::default(),
        }
    }

    /// 키워드 추출기 교체
    pub fn with_keywords(mut self, keywords: Arc<dyn KeywordExtractor>) -> Self {
        self.keywords = keywords;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// 질의 처리
    ///
    /// 항상 비어 있지 않은 결과 목록을 반환합니다.
    /// 결과가 없거나 실패하면 시스템 결과 하나를 반환합니다.
    pub async fn query(&self, text: &str, options: &QueryOptions) -> Vec<QueryResult> {
        if text.trim().is_empty() {
            return vec![QueryResult::system(INVALID_QUERY_MESSAGE)];
        }

        match self.search(text, options).await {
            Ok(results) if results.is_empty() => vec![QueryResult::system(no_results_message(
                text,
                options.topic.as_deref(),
            ))],
            Ok(results) => results.into_iter().map(QueryResult::from).collect(),
            Err(e) => {
                tracing::warn!("Query failed: {}", e);
                vec![QueryResult::system(format!("Error processing query: {}", e))]
            }
        }
    }

    /// 검색 실행 (임계값 적용 후 결과, 빈 목록 가능)
    pub async fn search(&self, text: &str, options: &QueryOptions) -> RagResult<Vec<FusedResult>> {
        let text = text.trim();
        if text.is_empty() {
            return Err(RagError::invalid("query text is required"));
        }
        if options.max_results == 0 {
            return Err(RagError::invalid("max_results must be at least 1"));
        }

        let mut filters = MetadataFilter::new();
        if let Some(topic) = options.topic.as_deref().filter(|t| !t.trim().is_empty()) {
            filters.insert("topic".to_string(), topic.to_string());
        }

        let terms = self.terms_for(text, options.mode);
        let top_k = options.max_results;
        let candidates = match options.mode {
            QueryMode::Hybrid => top_k * 2,
            _ => top_k,
        };

        tracing::debug!(
            "Query mode={} terms={:?} filters={:?}",
            options.mode,
            terms,
            filters
        );

        // 임베딩과 키워드 검색은 서로 독립적이므로 동시에 실행
        let wants_vector = matches!(options.mode, QueryMode::Hybrid | QueryMode::Semantic);
        let wants_lexical = options.mode != QueryMode::Semantic;

        let embedding_fut = async {
            if wants_vector {
                Some(self.embed_query(text).await)
            } else {
                None
            }
        };
        let lexical_fut = async {
            if wants_lexical {
                Some(self.lexical_search(&terms, &filters, candidates).await)
            } else {
                None
            }
        };
        let (embedding, lexical) = tokio::join!(embedding_fut, lexical_fut);

        let plan = RetrievalPlan::select(options.mode, embedding);

        let mut results = match plan {
            RetrievalPlan::Fused(vector) => {
                let semantic = self.vector_search(vector, &filters, candidates).await?;
                let lexical = match lexical {
                    Some(result) => result?,
                    None => vec![],
                };
                fuse_with(semantic, lexical, top_k, options.use_feedback)
            }
            RetrievalPlan::SemanticOnly(vector) => {
                let semantic = self.vector_search(vector, &filters, candidates).await?;
                rank_single(semantic, SearchMethod::Semantic, top_k, options.use_feedback)
            }
            RetrievalPlan::LexicalOnly => {
                let lexical = match lexical {
                    Some(result) => result?,
                    // semantic 모드에서 임베딩 실패
                    None => self.lexical_search(&terms, &filters, top_k).await?,
                };
                rank_single(lexical, SearchMethod::Lexical, top_k, options.use_feedback)
            }
        };

        // 임계값은 통합 이후에만 적용
        results.retain(|r| r.score >= options.score_threshold);
        Ok(results)
    }

    /// 모드별 키워드 검색어
    fn terms_for(&self, text: &str, mode: QueryMode) -> Vec<String> {
        let raw_terms = || {
            text.split_whitespace()
                .map(|w| w.to_lowercase())
                .collect::<Vec<_>>()
        };

        match mode {
            QueryMode::Naive => raw_terms(),
            _ => {
                let keywords = self.keywords.extract(text);
                if keywords.is_empty() {
                    raw_terms()
                } else {
                    keywords
                }
            }
        }
    }

    async fn embed_query(&self, text: &str) -> RagResult<Vec<f32>> {
        self.retry
            .run("query embedding", || self.embedder.embed_query(text))
            .await
    }

    async fn vector_search(
        &self,
        vector: Vec<f32>,
        filters: &MetadataFilter,
        top_k: usize,
    ) -> RagResult<Vec<ScoredChunk>> {
        let vector = Arc::new(vector);
        self.retry
            .run("vector search", || {
                let index = Arc::clone(&self.index);
                let vector = Arc::clone(&vector);
                let filters = filters.clone();
                blocking(move || index.vector_search(&vector, &filters, top_k))
            })
            .await
    }

    async fn lexical_search(
        &self,
        terms: &[String],
        filters: &MetadataFilter,
        top_k: usize,
    ) -> RagResult<Vec<ScoredChunk>> {
        self.retry
            .run("lexical search", || {
                let index = Arc::clone(&self.index);
                let terms = terms.to_vec();
                let filters = filters.clone();
                blocking(move || index.lexical_search(&terms, &filters, top_k))
            })
            .await
    }
}

/// 동기 저장소 호출을 블로킹 스레드에서 실행
pub(crate) async fn blocking<T, F>(f: F) -> RagResult<T>
where
    F: FnOnce() -> RagResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RagError::StoreUnavailable(format!("blocking task failed: {}", e)))?
}

fn no_results_message(query: &str, topic: Option<&str>) -> String {
    match topic.filter(|t| !t.trim().is_empty()) {
        Some(topic) => format!(
            "No information found on '{}' related to topic '{}'.",
            query, topic
        ),
        None => format!("No information found on '{}'.", query),
    }
}

// ============================================================================
// Tests
// ============================================================================
