//! 재시도 정책 - 지수 백오프
//!
//! 임베딩 게이트웨이와 저장소 호출에 사용됩니다.
//! 일시적 에러(`RagError::is_transient`)만 재시도하고,
//! 재시도 소진 시 마지막 에러를 그대로 반환합니다.

use std::future::Future;
use std::time::Duration;

use crate::error::RagResult;

/// 기본 최대 재시도 횟수
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// 기본 초기 백오프 (ms)
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 500;
/// 백오프 상한
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// 재시도 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 최초 시도 이후 추가 시도 횟수
    pub max_retries: u32,
    /// 첫 재시도 전 대기 시간 (이후 2배씩 증가)
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
        }
    }

    /// 재시도 없음 (1회 시도)
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// n번째 재시도 전 대기 시간
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }

    /// 작업 실행 (일시적 에러 시 재시도)
    ///
    /// # Arguments
    /// * `op` - 로그에 표시할 작업 이름
    /// * `f` - 매 시도마다 새 future를 만드는 클로저
    pub async fn run<T, F, Fut>(&self, op: &str, mut f: F) -> RagResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RagResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let backoff = self.backoff(attempt);
                    tracing::warn!(
                        "{} failed: {}, retrying in {:?} (attempt {}/{})",
                        op,
                        e,
                        backoff,
                        attempt + 1,
                        self.max_retries
                    );
                    if !backoff.is_zero() {
                        tokio::time::sleep(backoff).await;
                    }
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        tracing::warn!("{} failed after {} retries: {}", op, attempt, e);
                    }
                    return Err(e);
                }
            }
        }
    }
}
