//! 질의 키워드 추출
//!
//! 키워드 검색에 사용할 단어를 질의에서 고릅니다.
//! 추출 방식은 `KeywordExtractor` 트레이트로 교체할 수 있습니다.

use std::collections::HashSet;

/// 기본 최대 키워드 수
pub const DEFAULT_MAX_KEYWORDS: usize = 5;

/// 2글자 이하 단어는 항상 제외
const MIN_KEYWORD_CHARS: usize = 3;

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "if", "then", "else", "when", "at", "from", "by",
    "on", "off", "for", "in", "out", "over", "to", "into", "with", "about", "against",
    "between", "through", "during", "before", "after", "above", "below", "up", "down", "of",
    "is", "are", "was", "were", "be", "been", "being", "have", "has", "had", "having", "do",
    "does", "did", "doing", "what", "which", "who", "whom", "this", "that", "these", "those",
    "am", "can", "will", "just", "should", "now", "how", "why", "where", "there", "here",
    "all", "any", "both", "each", "few", "more", "most", "other", "some", "such", "than",
    "too", "very", "not", "only", "own", "same", "so", "i", "me", "my", "we", "our", "you",
    "your", "he", "him", "his", "she", "her", "it", "its", "they", "them", "their", "tell",
    "please", "could", "would",
];

/// 키워드 추출 트레이트
pub trait KeywordExtractor: Send + Sync {
    /// 질의에서 키워드 추출 (중요도 순)
    fn extract(&self, query: &str) -> Vec<String>;

    fn name(&self) -> &'static str;
}

/// 길이 기반 키워드 추출
///
/// 소문자화 → 단어 분리 → 불용어/짧은 단어 제거 → 긴 단어 우선으로 최대 N개.
/// 같은 길이는 질의 내 등장 순서를 유지합니다.
#[derive(Debug)]
pub struct LengthRankedKeywords {
    max_keywords: usize,
    stop_words: HashSet<&'static str>,
}

impl LengthRankedKeywords {
    pub fn new(max_keywords: usize) -> Self {
        Self {
            max_keywords,
            stop_words: STOP_WORDS.iter().copied().collect(),
        }
    }
}

impl Default for LengthRankedKeywords {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_KEYWORDS)
    }
}

impl KeywordExtractor for LengthRankedKeywords {
    fn extract(&self, query: &str) -> Vec<String> {
        let lower = query.to_lowercase();
        let mut keywords: Vec<String> = Vec::new();

        for token in lower.split(|c: char| !(c.is_alphanumeric() || c == '_')) {
            if token.chars().count() < MIN_KEYWORD_CHARS || self.stop_words.contains(token) {
                continue;
            }
            if !keywords.iter().any(|k| k == token) {
                keywords.push(token.to_string());
            }
        }

        keywords.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));
        keywords.truncate(self.max_keywords);
        keywords
    }

    fn name(&self) -> &'static str {
        "length-ranked"
    }
}
