//! 임베딩 모듈 - 텍스트 벡터화 게이트웨이
//!
//! 텍스트(질의 또는 청크)를 고정 차원 벡터로 변환합니다.
//! 게이트웨이는 한 번만 시도하고, 재시도는 호출자가 `RetryPolicy`로 처리합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = create_embedder()?;
//! let vector = embedder.embed("Budget review").await?;
//! ```

mod gemini;

pub use gemini::{GeminiEmbedding, DEFAULT_DIMENSION};

use async_trait::async_trait;

use crate::error::{RagError, RagResult};

/// API 키 환경변수 (우선순위 순)
pub const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "GOOGLE_AI_API_KEY"];

/// 기본 동시 임베딩 요청 수
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 전송/서비스 장애는 `RagError::EmbeddingUnavailable`로 반환합니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 문서(청크) 임베딩
    async fn embed(&self, text: &str) -> RagResult<Vec<f32>>;

    /// 검색 질의 임베딩 (기본 구현: `embed`)
    async fn embed_query(&self, text: &str) -> RagResult<Vec<f32>> {
        self.embed(text).await
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;

    /// 동시에 보낼 수 있는 요청 수
    fn max_concurrency(&self) -> usize {
        DEFAULT_MAX_CONCURRENCY
    }
}

// ============================================================================
// API Key Management
// ============================================================================

/// API 키 로드 (환경변수에서)
///
/// 우선순위: `GEMINI_API_KEY` > `GOOGLE_AI_API_KEY`
pub fn get_api_key() -> RagResult<String> {
    api_key_from(|key| std::env::var(key).ok())
}

/// 임의의 조회 함수로 API 키 로드
pub fn api_key_from<F>(lookup: F) -> RagResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    for var in API_KEY_VARS {
        if let Some(key) = lookup(var).filter(|k| !k.trim().is_empty()) {
            tracing::debug!("Using API key from {}", var);
            return Ok(key);
        }
    }

    Err(RagError::invalid(
        "API key not found. Set GEMINI_API_KEY or GOOGLE_AI_API_KEY environment variable. \
         Get your API key at: https://aistudio.google.com/app/apikey",
    ))
}

/// API 키 존재 여부 확인
pub fn has_api_key() -> bool {
    get_api_key().is_ok()
}

// ============================================================================
// Factory Function
// ============================================================================

/// 임베딩 프로바이더 생성 (Gemini API)
pub fn create_embedder() -> RagResult<GeminiEmbedding> {
    let embedder = GeminiEmbedding::new(get_api_key()?)?;
    tracing::info!(
        "Using Gemini API embedding (dimension: {})",
        embedder.dimension()
    );
    Ok(embedder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_priority() {
        let key = api_key_from(|var| match var {
            "GEMINI_API_KEY" => Some("primary".to_string()),
            "GOOGLE_AI_API_KEY" => Some("fallback".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(key, "primary");

        let key = api_key_from(|var| match var {
            "GEMINI_API_KEY" => Some("  ".to_string()),
            "GOOGLE_AI_API_KEY" => Some("fallback".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(key, "fallback");
    }

    #[test]
    fn test_missing_api_key() {
        let result = api_key_from(|_| None);
        assert!(matches!(result, Err(RagError::InvalidInput(_))));
    }
}
