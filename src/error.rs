//! 에러 타입 - 코어 라이브러리 공통 에러 분류
//!
//! - `InvalidInput`: 잘못된 입력 (재시도 안 함, 즉시 반환)
//! - `EmbeddingUnavailable`: 임베딩 서비스 장애 (재시도 후 키워드 검색으로 폴백)
//! - `StoreUnavailable`: 저장소 장애 (재시도 후 실패 반환)
//! - `NotFound`: 참조 대상 없음

use thiserror::Error;

/// 코어 작업 결과 타입
pub type RagResult<T> = std::result::Result<T, RagError>;

/// 코어 에러
#[derive(Debug, Error)]
pub enum RagError {
    /// 잘못된 입력 또는 필수 필드 누락
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// 임베딩 게이트웨이 전송/서비스 오류
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// 인덱스/문서 저장소 연결 오류
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// 문서 또는 임베딩 레코드 없음
    #[error("not found: {0}")]
    NotFound(String),
}

impl RagError {
    /// 재시도 대상 여부 (일시적 장애)
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RagError::EmbeddingUnavailable(_) | RagError::StoreUnavailable(_)
        )
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        RagError::InvalidInput(msg.into())
    }
}

impl From<rusqlite::Error> for RagError {
    fn from(e: rusqlite::Error) -> Self {
        RagError::StoreUnavailable(e.to_string())
    }
}

impl From<reqwest::Error> for RagError {
    fn from(e: reqwest::Error) -> Self {
        RagError::EmbeddingUnavailable(e.to_string())
    }
}

impl From<serde_json::Error> for RagError {
    fn from(e: serde_json::Error) -> Self {
        RagError::StoreUnavailable(format!("metadata decode: {}", e))
    }
}
