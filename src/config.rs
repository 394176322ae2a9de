//! 설정 모듈 - 환경변수 기반 설정
//!
//! 모든 값은 기본값을 가지며 환경변수로 덮어쓸 수 있습니다.
//!
//! | 환경변수 | 기본값 |
//! |----------|--------|
//! | `TRANSCRIPT_RAG_DATA_DIR` | `<local data dir>/.transcript-rag` |
//! | `TRANSCRIPT_RAG_CHUNK_STRATEGY` | `sentence` |
//! | `TRANSCRIPT_RAG_CHUNK_SIZE` | `5` |
//! | `TRANSCRIPT_RAG_CHUNK_OVERLAP` | `1` |
//! | `TRANSCRIPT_RAG_MAX_CHARS` | `2000` |
//! | `TRANSCRIPT_RAG_MAX_RETRIES` | `3` |
//! | `TRANSCRIPT_RAG_BACKOFF_MS` | `500` |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{RagError, RagResult};
use crate::knowledge::{ChunkConfig, ChunkStrategy};
use crate::retry::RetryPolicy;

pub const ENV_DATA_DIR: &str = "TRANSCRIPT_RAG_DATA_DIR";
pub const ENV_CHUNK_STRATEGY: &str = "TRANSCRIPT_RAG_CHUNK_STRATEGY";
pub const ENV_CHUNK_SIZE: &str = "TRANSCRIPT_RAG_CHUNK_SIZE";
pub const ENV_CHUNK_OVERLAP: &str = "TRANSCRIPT_RAG_CHUNK_OVERLAP";
pub const ENV_MAX_CHARS: &str = "TRANSCRIPT_RAG_MAX_CHARS";
pub const ENV_MAX_RETRIES: &str = "TRANSCRIPT_RAG_MAX_RETRIES";
pub const ENV_BACKOFF_MS: &str = "TRANSCRIPT_RAG_BACKOFF_MS";

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로
///
/// `TRANSCRIPT_RAG_DATA_DIR`가 있으면 우선 사용합니다.
pub fn get_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }

    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".transcript-rag")
}

// ============================================================================
// RagConfig
// ============================================================================

/// 런타임 설정
#[derive(Debug, Clone)]
pub struct RagConfig {
    pub data_dir: PathBuf,
    /// 기본 청킹 설정 (ingest/rechunk 명령의 기본값)
    pub chunking: ChunkConfig,
    /// 네트워크/저장소 호출 재시도 정책
    pub retry: RetryPolicy,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            data_dir: get_data_dir(),
            chunking: ChunkConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl RagConfig {
    /// 환경변수에서 설정 로드
    pub fn from_env() -> RagResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 임의의 키 조회 함수로 설정 구성 (테스트용으로 분리)
    pub fn from_lookup<F>(lookup: F) -> RagResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|d| !d.trim().is_empty()) {
            config.data_dir = PathBuf::from(dir);
        }

        if let Some(raw) = lookup(ENV_CHUNK_STRATEGY) {
            config.chunking.strategy = raw
                .parse::<ChunkStrategy>()
                .map_err(|e| RagError::invalid(format!("{}: {}", ENV_CHUNK_STRATEGY, e)))?;
        }
        if let Some(v) = parse_var::<usize>(&lookup, ENV_CHUNK_SIZE)? {
            config.chunking.unit_size = v;
        }
        if let Some(v) = parse_var::<usize>(&lookup, ENV_CHUNK_OVERLAP)? {
            config.chunking.overlap = v;
        }
        if let Some(v) = parse_var::<usize>(&lookup, ENV_MAX_CHARS)? {
            config.chunking.max_chars = v;
        }
        if let Some(v) = parse_var::<u32>(&lookup, ENV_MAX_RETRIES)? {
            config.retry.max_retries = v;
        }
        if let Some(v) = parse_var::<u64>(&lookup, ENV_BACKOFF_MS)? {
            config.retry.initial_backoff = Duration::from_millis(v);
        }

        config.chunking.validate()?;
        Ok(config)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> RagResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| RagError::invalid(format!("{}={:?}: {}", key, raw, e))),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RagConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.chunking.strategy, ChunkStrategy::Sentence);
        assert_eq!(config.chunking.unit_size, 5);
        assert_eq!(config.chunking.overlap, 1);
        assert_eq!(config.chunking.max_chars, 2000);
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn test_overrides() {
        let config = RagConfig::from_lookup(lookup_from(&[
            (ENV_DATA_DIR, "/tmp/rag-data"),
            (ENV_CHUNK_STRATEGY, "paragraph"),
            (ENV_CHUNK_SIZE, "3"),
            (ENV_CHUNK_OVERLAP, "0"),
            (ENV_MAX_RETRIES, "1"),
            (ENV_BACKOFF_MS, "10"),
        ]))
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/rag-data"));
        assert_eq!(config.chunking.strategy, ChunkStrategy::Paragraph);
        assert_eq!(config.chunking.unit_size, 3);
        assert_eq!(config.chunking.overlap, 0);
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.retry.initial_backoff, Duration::from_millis(10));
    }

    #[test]
    fn test_malformed_number_rejected() {
        let result = RagConfig::from_lookup(lookup_from(&[(ENV_CHUNK_SIZE, "five")]));
        let err = result.unwrap_err();
        assert!(matches!(err, RagError::InvalidInput(_)));
        assert!(err.to_string().contains(ENV_CHUNK_SIZE));
    }

    #[test]
    fn test_overlap_must_be_below_unit_size() {
        let result = RagConfig::from_lookup(lookup_from(&[
            (ENV_CHUNK_SIZE, "2"),
            (ENV_CHUNK_OVERLAP, "2"),
        ]));
        assert!(matches!(result, Err(RagError::InvalidInput(_))));
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let result = RagConfig::from_lookup(lookup_from(&[(ENV_CHUNK_STRATEGY, "semantic")]));
        assert!(matches!(result, Err(RagError::InvalidInput(_))));
    }
}
