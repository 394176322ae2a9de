//! 벡터 유틸리티 - 유사도 계산 및 BLOB 직렬화
//!
//! 임베딩 벡터는 SQLite BLOB(f32 little-endian)으로 저장하고
//! 검색 시 전수 코사인 유사도로 비교합니다.

use crate::error::{RagError, RagResult};

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위입니다.
/// 길이가 다르거나 영벡터면 0.0을 반환합니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// 유사도를 검색 점수(0.0 ~ 1.0)로 변환
pub fn similarity_score(a: &[f32], b: &[f32]) -> f64 {
    (cosine_similarity(a, b) as f64).clamp(0.0, 1.0)
}

/// 벡터 → BLOB
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// BLOB → 벡터
pub fn decode_vector(bytes: &[u8]) -> RagResult<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(RagError::StoreUnavailable(format!(
            "corrupt vector blob ({} bytes)",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}
