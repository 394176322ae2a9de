//! 결과 통합 및 피드백 랭킹
//!
//! 벡터 검색과 키워드 검색 결과를 가중 합으로 통합합니다.
//!
//! ```text
//! combined = 0.7 * semantic + 0.3 * lexical
//! boost    = min(feedback_count / 10, 0.2)
//! final    = min(combined * (1 + boost), 1.0)
//! ```
//!
//! 통합 점수는 입력의 원점수(`raw_score`)로 계산하고,
//! 피드백 가중치는 레코드당 한 번만 적용합니다.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use super::index::{Metadata, ScoredChunk};

/// 의미 검색 가중치
pub const SEMANTIC_WEIGHT: f64 = 0.7;
/// 키워드 검색 가중치
pub const LEXICAL_WEIGHT: f64 = 0.3;
/// 피드백 가중치 상한
pub const MAX_FEEDBACK_BOOST: f64 = 0.2;
/// 메타데이터에 source가 없을 때 기본값
pub const DEFAULT_SOURCE: &str = "knowledge_base";

const FEEDBACK_DIVISOR: f64 = 10.0;
const RELEVANCE_STEP: f64 = 0.1;
const MIN_RELEVANCE: f64 = 0.1;
const MAX_RELEVANCE: f64 = 2.0;

// ============================================================================
// Feedback
// ============================================================================

/// 피드백 가중치 `min(count / 10, 0.2)`
pub fn feedback_boost(feedback_count: u32) -> f64 {
    (feedback_count as f64 / FEEDBACK_DIVISOR).min(MAX_FEEDBACK_BOOST)
}

/// 점수에 피드백 가중치 적용 (상한 1.0)
pub fn apply_feedback(score: f64, feedback_count: u32) -> f64 {
    (score * (1.0 + feedback_boost(feedback_count))).min(1.0)
}

/// 관련도 점수 ±0.1 조정 (0.1 ~ 2.0)
pub fn nudge_relevance(current: f64, relevant: bool) -> f64 {
    let next = if relevant {
        current + RELEVANCE_STEP
    } else {
        current - RELEVANCE_STEP
    };
    // 0.1 단위 유지
    ((next * 10.0).round() / 10.0).clamp(MIN_RELEVANCE, MAX_RELEVANCE)
}

// ============================================================================
// Types
// ============================================================================

/// 검색 방법
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    /// 벡터 검색만 일치
    Semantic,
    /// 키워드 검색만 일치
    Lexical,
    /// 양쪽 모두 일치
    Hybrid,
}

/// 통합 결과
#[derive(Debug, Clone, Serialize)]
pub struct FusedResult {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    /// 최종 점수
    pub score: f64,
    pub semantic_score: f64,
    pub lexical_score: f64,
    pub feedback_count: u32,
    pub method: SearchMethod,
    pub source: String,
}

impl FusedResult {
    /// 메타데이터의 문자열 값
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

// ============================================================================
// Fusion
// ============================================================================

/// 두 결과 목록 통합 (피드백 적용)
pub fn fuse(semantic: Vec<ScoredChunk>, lexical: Vec<ScoredChunk>, top_k: usize) -> Vec<FusedResult> {
    fuse_with(semantic, lexical, top_k, true)
}

/// 두 결과 목록 통합
///
/// 한쪽에만 있는 레코드는 다른 쪽 점수를 0.0으로 봅니다.
/// 동점이면 의미 검색 순위를 따릅니다 (키워드 전용 결과는 그 뒤).
pub fn fuse_with(
    semantic: Vec<ScoredChunk>,
    lexical: Vec<ScoredChunk>,
    top_k: usize,
    use_feedback: bool,
) -> Vec<FusedResult> {
    struct Entry {
        chunk: ScoredChunk,
        semantic: Option<f64>,
        lexical: Option<f64>,
    }

    let mut entries: Vec<Entry> = Vec::with_capacity(semantic.len() + lexical.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for chunk in semantic {
        if let Some(&pos) = positions.get(&chunk.id) {
            let entry = &mut entries[pos];
            entry.semantic = Some(entry.semantic.unwrap_or(0.0).max(chunk.raw_score));
            continue;
        }
        positions.insert(chunk.id.clone(), entries.len());
        entries.push(Entry {
            semantic: Some(chunk.raw_score),
            lexical: None,
            chunk,
        });
    }

    for chunk in lexical {
        match positions.get(&chunk.id) {
            Some(&pos) => {
                let entry = &mut entries[pos];
                entry.lexical = Some(entry.lexical.unwrap_or(0.0).max(chunk.raw_score));
            }
            None => {
                positions.insert(chunk.id.clone(), entries.len());
                entries.push(Entry {
                    semantic: None,
                    lexical: Some(chunk.raw_score),
                    chunk,
                });
            }
        }
    }

    let mut results: Vec<FusedResult> = entries
        .into_iter()
        .map(|entry| {
            let semantic_score = entry.semantic.unwrap_or(0.0);
            let lexical_score = entry.lexical.unwrap_or(0.0);
            let combined = SEMANTIC_WEIGHT * semantic_score + LEXICAL_WEIGHT * lexical_score;

            let method = match (entry.semantic.is_some(), entry.lexical.is_some()) {
                (true, true) => SearchMethod::Hybrid,
                (false, true) => SearchMethod::Lexical,
                _ => SearchMethod::Semantic,
            };

            into_result(entry.chunk, combined, semantic_score, lexical_score, method, use_feedback)
        })
        .collect();

    sort_by_score(&mut results);
    results.truncate(top_k);
    results
}

/// 단일 검색 결과를 그대로 순위화 (semantic/keyword 모드)
pub fn rank_single(
    chunks: Vec<ScoredChunk>,
    method: SearchMethod,
    top_k: usize,
    use_feedback: bool,
) -> Vec<FusedResult> {
    let mut results: Vec<FusedResult> = chunks
        .into_iter()
        .map(|chunk| {
            let raw = chunk.raw_score;
            let (semantic, lexical) = match method {
                SearchMethod::Lexical => (0.0, raw),
                _ => (raw, 0.0),
            };
            into_result(chunk, raw, semantic, lexical, method, use_feedback)
        })
        .collect();

    sort_by_score(&mut results);
    results.truncate(top_k);
    results
}

fn into_result(
    chunk: ScoredChunk,
    combined: f64,
    semantic_score: f64,
    lexical_score: f64,
    method: SearchMethod,
    use_feedback: bool,
) -> FusedResult {
    let score = if use_feedback {
        apply_feedback(combined, chunk.feedback_count)
    } else {
        combined.min(1.0)
    };

    let source = chunk
        .metadata
        .get("source")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SOURCE)
        .to_string();

    FusedResult {
        id: chunk.id,
        text: chunk.text,
        metadata: chunk.metadata,
        score,
        semantic_score,
        lexical_score,
        feedback_count: chunk.feedback_count,
        method,
        source,
    }
}

/// 점수 내림차순 (안정 정렬)
fn sort_by_score(results: &mut [FusedResult]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

// ============================================================================
// Tests
// ============================================================================
