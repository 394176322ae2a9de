//! Text Chunking Module
//!
//! 회의록 텍스트를 검색 단위(청크)로 분할합니다.
//!
//! - sentence: 문장 단위 윈도우 (unit_size 문장씩, overlap 문장 중첩)
//! - paragraph: 빈 줄 기준 문단을 max_chars 이하로 묶음
//! - section: 헤딩 기준 섹션, 큰 섹션은 sentence 전략으로 재분할
//!
//! 모든 전략 공통: 어떤 청크도 `max_chars`(문자 수)를 넘지 않습니다.
//! 넘치면 단어 경계에서 다시 자르고, 단어 하나가 더 길면 문자 단위로 자릅니다.

use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::Serialize;

use crate::error::{RagError, RagResult};

/// 문장 경계로 취급하지 않는 호칭 약어
const TITLE_ABBREVIATIONS: &[&str] = &[
    "Mr", "Dr", "Mrs", "Ms", "Prof", "Gen", "Col", "Maj", "St", "Sr", "Jr", "Ph.D",
];

/// 기본 섹션 헤딩 패턴 (Markdown `#`~`###`, `Section`/`Chapter` 접두어)
pub const DEFAULT_HEADING_PATTERNS: &[&str] = &[r"^#{1,3}\s", r"^(Section|Chapter)\b"];

/// 토큰 추정 비율 (문자 4개 ≈ 토큰 1개)
const CHARS_PER_TOKEN: usize = 4;

// 품질 진단 임계값
const MAX_LENGTH_CV: f64 = 0.5;
const MIN_RECOMMENDED_LEN: usize = 50;
const MAX_RECOMMENDED_LEN: usize = 3000;

// ============================================================================
// Chunk Strategy
// ============================================================================

/// 청킹 전략
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    Sentence,
    Paragraph,
    Section,
}

impl ChunkStrategy {
    pub const ALL: [ChunkStrategy; 3] = [
        ChunkStrategy::Sentence,
        ChunkStrategy::Paragraph,
        ChunkStrategy::Section,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStrategy::Sentence => "sentence",
            ChunkStrategy::Paragraph => "paragraph",
            ChunkStrategy::Section => "section",
        }
    }
}

impl fmt::Display for ChunkStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sentence" => Ok(ChunkStrategy::Sentence),
            "paragraph" => Ok(ChunkStrategy::Paragraph),
            "section" => Ok(ChunkStrategy::Section),
            other => Err(format!(
                "unknown chunking strategy '{}' (expected sentence, paragraph or section)",
                other
            )),
        }
    }
}

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkConfig {
    pub strategy: ChunkStrategy,
    /// 청크당 단위 수 (sentence 전략: 문장 수)
    pub unit_size: usize,
    /// 연속 청크 간 공유 단위 수 (`unit_size` 미만)
    pub overlap: usize,
    /// 청크 최대 길이 (문자 수)
    pub max_chars: usize,
    /// 섹션 헤딩 정규식 (줄 단위 매칭)
    pub heading_patterns: Vec<String>,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            strategy: ChunkStrategy::Sentence,
            unit_size: 5,
            overlap: 1,
            max_chars: 2000,
            heading_patterns: DEFAULT_HEADING_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl ChunkConfig {
    pub fn new(strategy: ChunkStrategy, unit_size: usize, overlap: usize, max_chars: usize) -> Self {
        Self {
            strategy,
            unit_size,
            overlap,
            max_chars,
            ..Self::default()
        }
    }

    /// 설정 검증
    pub fn validate(&self) -> RagResult<()> {
        if self.unit_size == 0 {
            return Err(RagError::invalid("unit_size must be at least 1"));
        }
        if self.overlap >= self.unit_size {
            return Err(RagError::invalid(format!(
                "overlap ({}) must be smaller than unit_size ({})",
                self.overlap, self.unit_size
            )));
        }
        if self.max_chars == 0 {
            return Err(RagError::invalid("max_chars must be greater than 0"));
        }
        Ok(())
    }
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할
    fn chunk(&self, text: &str) -> Vec<String>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// TranscriptChunker
// ============================================================================

/// 회의록 청커
///
/// 생성 시 설정을 검증하고 헤딩 정규식을 컴파일합니다.
/// 같은 입력과 설정에 대해 항상 같은 결과를 반환합니다.
#[derive(Debug)]
pub struct TranscriptChunker {
    config: ChunkConfig,
    headings: Vec<Regex>,
}

impl TranscriptChunker {
    /// 설정으로 생성
    pub fn new(config: ChunkConfig) -> RagResult<Self> {
        config.validate()?;

        let headings = config
            .heading_patterns
            .iter()
            .map(|p| {
                Regex::new(p)
                    .map_err(|e| RagError::invalid(format!("heading pattern '{}': {}", p, e)))
            })
            .collect::<RagResult<Vec<_>>>()?;

        Ok(Self { config, headings })
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    fn is_heading(&self, line: &str) -> bool {
        self.headings.iter().any(|re| re.is_match(line))
    }

    /// 문장 윈도우 청킹
    fn chunk_sentences(&self, text: &str) -> Vec<String> {
        let sentences = split_sentences(text);
        sliding_windows(&sentences, self.config.unit_size, self.config.overlap, " ")
    }

    /// 문단 패킹 청킹
    fn chunk_paragraphs(&self, text: &str) -> Vec<String> {
        let max = self.config.max_chars;
        let mut packer = Packer::new(max, "\n\n");

        for para in split_paragraphs(text) {
            if char_len(&para) > max {
                // 긴 문단은 단독으로 내보낸 뒤 다시 자름
                packer.flush();
                for piece in hard_wrap(&para, max) {
                    packer.emit(piece);
                }
            } else {
                packer.push(&para);
            }
        }

        packer.finish()
    }

    /// 헤딩 기준 섹션 분할
    fn split_sections(&self, text: &str) -> Vec<String> {
        let mut sections = Vec::new();
        let mut current = String::new();
        let mut in_code_block = false;

        for line in text.lines() {
            if line.trim_start().starts_with("```") {
                in_code_block = !in_code_block;
            }

            if !in_code_block && self.is_heading(line) && !current.trim().is_empty() {
                sections.push(current.trim().to_string());
                current.clear();
            }

            current.push_str(line);
            current.push('\n');
        }

        if !current.trim().is_empty() {
            sections.push(current.trim().to_string());
        }

        sections
    }

    /// 섹션 청킹
    fn chunk_sections(&self, text: &str) -> Vec<String> {
        if !text.lines().any(|line| self.is_heading(line)) {
            return hard_wrap(text, self.config.max_chars);
        }

        let mut chunks = Vec::new();
        for section in self.split_sections(text) {
            if char_len(&section) <= self.config.max_chars {
                chunks.push(section);
            } else {
                chunks.extend(self.chunk_sentences(&section));
            }
        }
        chunks
    }
}

impl Chunker for TranscriptChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return vec![];
        }

        let raw = match self.config.strategy {
            ChunkStrategy::Sentence => self.chunk_sentences(text),
            ChunkStrategy::Paragraph => self.chunk_paragraphs(text),
            ChunkStrategy::Section => self.chunk_sections(text),
        };

        // 최종 크기 보장
        raw.iter()
            .flat_map(|c| hard_wrap(c, self.config.max_chars))
            .collect()
    }

    fn name(&self) -> &'static str {
        "TranscriptChunker"
    }
}

/// 텍스트 청킹 (설정 검증 포함)
pub fn chunk_text(text: &str, config: &ChunkConfig) -> RagResult<Vec<String>> {
    let chunker = TranscriptChunker::new(config.clone())?;
    Ok(chunker.chunk(text))
}

// ============================================================================
// Chunk
// ============================================================================

/// 문서에서 파생된 청크
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    pub document_id: i64,
    /// 문서 내 순번 (0부터 연속)
    pub index: usize,
    /// 문서의 전체 청크 수
    pub total: usize,
    pub strategy: ChunkStrategy,
    pub overlap: usize,
    pub text: String,
}

impl Chunk {
    /// 청크 문자열 목록에 순번을 매김
    pub fn from_texts(document_id: i64, texts: Vec<String>, config: &ChunkConfig) -> Vec<Chunk> {
        let total = texts.len();
        texts
            .into_iter()
            .enumerate()
            .map(|(index, text)| Chunk {
                document_id,
                index,
                total,
                strategy: config.strategy,
                overlap: config.overlap,
                text,
            })
            .collect()
    }
}

// ============================================================================
// Splitting Helpers
// ============================================================================

/// 문장 분할
///
/// `.`/`!`/`?` 뒤에 공백과 대문자가 오면 경계로 봅니다.
/// 호칭 약어(Mr., Dr. 등) 뒤의 마침표는 경계가 아닙니다.
pub fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];
        if matches!(c, '.' | '!' | '?') {
            let mut next = i + 1;
            while next < chars.len() && chars[next].1.is_whitespace() {
                next += 1;
            }

            let boundary = next > i + 1
                && next < chars.len()
                && chars[next].1.is_uppercase()
                && !(c == '.' && ends_with_abbreviation(&text[start..pos]));

            if boundary {
                let sentence = text[start..pos + c.len_utf8()].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence.to_string());
                }
                start = chars[next].0;
                i = next;
                continue;
            }
        }
        i += 1;
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }

    sentences
}

fn ends_with_abbreviation(before: &str) -> bool {
    let word = before.rsplit(char::is_whitespace).next().unwrap_or("");
    let word = word.trim_start_matches(|c: char| !c.is_alphanumeric());
    TITLE_ABBREVIATIONS
        .iter()
        .any(|abbr| abbr.eq_ignore_ascii_case(word))
}

/// 빈 줄 기준 문단 분할
fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.trim().is_empty() {
                paragraphs.push(current.trim().to_string());
            }
            current.clear();
        } else {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
        }
    }

    if !current.trim().is_empty() {
        paragraphs.push(current.trim().to_string());
    }

    paragraphs
}

/// 단위 목록을 슬라이딩 윈도우로 묶음
///
/// 윈도우 시작은 `max(1, unit_size - overlap)`씩 전진하므로 항상 종료됩니다.
fn sliding_windows(units: &[String], unit_size: usize, overlap: usize, sep: &str) -> Vec<String> {
    let size = unit_size.max(1);
    let step = size.saturating_sub(overlap).max(1);
    let mut windows = Vec::new();
    let mut start = 0;

    while start < units.len() {
        let end = (start + size).min(units.len());
        windows.push(units[start..end].join(sep));

        if end >= units.len() {
            break;
        }
        start += step;
    }

    windows
}

/// `max_chars` 이하 조각으로 강제 분할
///
/// 문장 경계 → 단어 경계 → 문자 단위 순으로 자릅니다.
pub fn hard_wrap(text: &str, max_chars: usize) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return vec![];
    }
    let max_chars = max_chars.max(1);
    if char_len(text) <= max_chars {
        return vec![text.to_string()];
    }

    let mut packer = Packer::new(max_chars, " ");

    for sentence in split_sentences(text) {
        if char_len(&sentence) <= max_chars {
            packer.push(&sentence);
            continue;
        }

        for word in sentence.split_whitespace() {
            if char_len(word) <= max_chars {
                packer.push(word);
            } else {
                packer.flush();
                for piece in cut_chars(word, max_chars) {
                    packer.push(&piece);
                }
            }
        }
    }

    packer.finish()
}

/// 문자 단위로 자르기 (UTF-8 안전)
fn cut_chars(word: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    chars
        .chunks(max_chars.max(1))
        .map(|piece| piece.iter().collect())
        .collect()
}

#[inline]
fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// 길이 제한 내에서 조각을 이어붙이는 버퍼
struct Packer {
    max_chars: usize,
    sep: &'static str,
    chunks: Vec<String>,
    current: String,
    current_len: usize,
}

impl Packer {
    fn new(max_chars: usize, sep: &'static str) -> Self {
        Self {
            max_chars,
            sep,
            chunks: Vec::new(),
            current: String::new(),
            current_len: 0,
        }
    }

    /// 조각 추가 (조각 길이는 `max_chars` 이하여야 함)
    fn push(&mut self, piece: &str) {
        let len = char_len(piece);
        let sep_len = char_len(self.sep);

        if !self.current.is_empty() && self.current_len + sep_len + len > self.max_chars {
            self.flush();
        }

        if !self.current.is_empty() {
            self.current.push_str(self.sep);
            self.current_len += sep_len;
        }
        self.current.push_str(piece);
        self.current_len += len;
    }

    /// 버퍼를 비우고 완성된 청크를 그대로 추가
    fn emit(&mut self, chunk: String) {
        self.flush();
        self.chunks.push(chunk);
    }

    fn flush(&mut self) {
        if !self.current.is_empty() {
            self.chunks.push(std::mem::take(&mut self.current));
        }
        self.current_len = 0;
    }

    fn finish(mut self) -> Vec<String> {
        self.flush();
        self.chunks
    }
}

// ============================================================================
// Quality Diagnostics
// ============================================================================

/// 청킹 품질 문제
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QualityIssue {
    NoChunks,
    HighVariability { coefficient_of_variation: f64 },
    VeryShortChunks { min_len: usize },
    OversizedChunks { max_len: usize },
    TooFewChunks,
}

impl fmt::Display for QualityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityIssue::NoChunks => write!(f, "No chunks found"),
            QualityIssue::HighVariability {
                coefficient_of_variation,
            } => write!(
                f,
                "High variability in chunk lengths (CV {:.2})",
                coefficient_of_variation
            ),
            QualityIssue::VeryShortChunks { min_len } => {
                write!(f, "Some chunks are very small (min {} chars)", min_len)
            }
            QualityIssue::OversizedChunks { max_len } => write!(
                f,
                "Some chunks exceed recommended size (max {} > {} chars)",
                max_len, MAX_RECOMMENDED_LEN
            ),
            QualityIssue::TooFewChunks => write!(f, "Too few chunks for effective retrieval"),
        }
    }
}

/// 청킹 품질 통계
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkQuality {
    pub count: usize,
    pub avg_len: f64,
    pub min_len: usize,
    pub max_len: usize,
    pub std_dev: f64,
    pub issues: Vec<QualityIssue>,
}

/// 청킹 결과 품질 분석 (관측용, 제어 흐름에 사용하지 않음)
pub fn analyze_quality(chunks: &[String]) -> ChunkQuality {
    if chunks.is_empty() {
        return ChunkQuality {
            count: 0,
            avg_len: 0.0,
            min_len: 0,
            max_len: 0,
            std_dev: 0.0,
            issues: vec![QualityIssue::NoChunks],
        };
    }

    let lengths: Vec<usize> = chunks.iter().map(|c| char_len(c)).collect();
    let count = lengths.len();
    let avg_len = lengths.iter().sum::<usize>() as f64 / count as f64;
    let min_len = lengths.iter().copied().min().unwrap_or(0);
    let max_len = lengths.iter().copied().max().unwrap_or(0);
    let variance = lengths
        .iter()
        .map(|&l| {
            let d = l as f64 - avg_len;
            d * d
        })
        .sum::<f64>()
        / count as f64;
    let std_dev = variance.sqrt();

    let mut issues = Vec::new();
    if avg_len > 0.0 && std_dev / avg_len > MAX_LENGTH_CV {
        issues.push(QualityIssue::HighVariability {
            coefficient_of_variation: std_dev / avg_len,
        });
    }
    if min_len < MIN_RECOMMENDED_LEN {
        issues.push(QualityIssue::VeryShortChunks { min_len });
    }
    if max_len > MAX_RECOMMENDED_LEN {
        issues.push(QualityIssue::OversizedChunks { max_len });
    }
    if count < 2 {
        issues.push(QualityIssue::TooFewChunks);
    }

    ChunkQuality {
        count,
        avg_len,
        min_len,
        max_len,
        std_dev,
        issues,
    }
}

/// 임베딩 토큰 추정
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenEstimate {
    pub chunk_count: usize,
    pub total_chars: usize,
    pub estimated_tokens: usize,
}

pub fn estimate_tokens(chunks: &[String]) -> TokenEstimate {
    let total_chars: usize = chunks.iter().map(|c| char_len(c)).sum();
    TokenEstimate {
        chunk_count: chunks.len(),
        total_chars,
        estimated_tokens: total_chars / CHARS_PER_TOKEN,
    }
}

/// 전략별 비교 결과
#[derive(Debug, Clone, Serialize)]
pub struct StrategyReport {
    pub strategy: ChunkStrategy,
    pub quality: ChunkQuality,
    pub tokens: TokenEstimate,
}

/// 같은 크기 설정으로 모든 전략을 실행해 비교
pub fn compare_strategies(text: &str, base: &ChunkConfig) -> RagResult<Vec<StrategyReport>> {
    ChunkStrategy::ALL
        .iter()
        .map(|&strategy| {
            let config = ChunkConfig {
                strategy,
                ..base.clone()
            };
            let chunks = chunk_text(text, &config)?;
            Ok(StrategyReport {
                strategy,
                quality: analyze_quality(&chunks),
                tokens: estimate_tokens(&chunks),
            })
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const MEETING: &str = "# Meeting Notes: Strategic Planning

## Introduction
John Smith opened the meeting at 10:00 AM. All department heads were present. \
The purpose of the meeting was to discuss Q3 planning.

## Key Discussion Points
Marketing reported a 15% increase in lead generation. Sales figures showed 7% growth. \
Dr. Lee approved the August release.

## Action Items
Sarah will finalize budget allocations by Friday. Michael will coordinate with vendors.";

    fn sentence_config(unit_size: usize, overlap: usize) -> ChunkConfig {
        ChunkConfig::new(ChunkStrategy::Sentence, unit_size, overlap, 2000)
    }

    #[test]
    fn test_chunker_empty() {
        let chunks = chunk_text("", &ChunkConfig::default()).unwrap();
        assert!(chunks.is_empty());

        let chunks = chunk_text("   \n\n  ", &ChunkConfig::default()).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_sentence_windows_no_overlap() {
        let text = "Sentence one. Sentence two. Sentence three. Sentence four.";
        let chunks = chunk_text(text, &sentence_config(2, 0)).unwrap();
        assert_eq!(
            chunks,
            vec!["Sentence one. Sentence two.", "Sentence three. Sentence four."]
        );
    }

    #[test]
    fn test_sentence_windows_with_overlap() {
        let text = "One. Two. Three. Four. Five. Six.";
        let chunks = chunk_text(text, &sentence_config(3, 1)).unwrap();
        assert_eq!(
            chunks,
            vec!["One. Two. Three.", "Three. Four. Five.", "Five. Six."]
        );
    }

    #[test]
    fn test_sentence_split_abbreviations() {
        let sentences = split_sentences("Mr. Smith met Dr. Jones. They talked! Did it go well? Yes.");
        assert_eq!(
            sentences,
            vec![
                "Mr. Smith met Dr. Jones.",
                "They talked!",
                "Did it go well?",
                "Yes."
            ]
        );

        let sentences = split_sentences("She has a Ph.D. From Oxford. Prof. Kim agreed.");
        assert_eq!(sentences, vec!["She has a Ph.D. From Oxford.", "Prof. Kim agreed."]);
    }

    #[test]
    fn test_sentence_split_requires_uppercase() {
        let sentences = split_sentences("Version 2. then we moved on. Next topic.");
        assert_eq!(sentences, vec!["Version 2. then we moved on.", "Next topic."]);
    }

    #[test]
    fn test_no_sentence_boundary_returns_whole_text() {
        let text = "just a fragment without punctuation";
        let chunks = chunk_text(text, &sentence_config(3, 1)).unwrap();
        assert_eq!(chunks, vec![text]);
    }

    #[test]
    fn test_sentence_coverage_in_order() {
        let sentences: Vec<String> = (1..=11).map(|i| format!("Item {} here.", i)).collect();
        let text = sentences.join(" ");

        for unit_size in 1..5 {
            for overlap in 0..unit_size {
                let chunks = chunk_text(&text, &sentence_config(unit_size, overlap)).unwrap();

                // 각 청크를 문장으로 되돌려 중복 제거 후 원문 순서와 비교
                let mut covered: Vec<String> = Vec::new();
                for chunk in &chunks {
                    for s in split_sentences(chunk) {
                        if !covered.contains(&s) {
                            covered.push(s);
                        }
                    }
                }
                assert_eq!(covered, sentences, "unit_size={} overlap={}", unit_size, overlap);
            }
        }
    }

    #[test]
    fn test_max_chars_invariant_all_strategies() {
        let long_word = "x".repeat(150);
        let text = format!(
            "{}\n\nSection 9 {} tail words here. Another Sentence follows.\n\n{}",
            MEETING, long_word, MEETING
        );

        for strategy in ChunkStrategy::ALL {
            for max_chars in [20, 60, 100, 400] {
                let config = ChunkConfig::new(strategy, 3, 1, max_chars);
                let chunks = chunk_text(&text, &config).unwrap();
                assert!(!chunks.is_empty());
                for chunk in &chunks {
                    assert!(
                        chunk.chars().count() <= max_chars,
                        "{} max={} chunk={:?}",
                        strategy,
                        max_chars,
                        chunk
                    );
                    assert!(!chunk.trim().is_empty());
                }
            }
        }
    }

    #[test]
    fn test_chunking_is_deterministic() {
        for strategy in ChunkStrategy::ALL {
            let config = ChunkConfig::new(strategy, 2, 1, 120);
            let first = chunk_text(MEETING, &config).unwrap();
            let second = chunk_text(MEETING, &config).unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_paragraph_packing() {
        let text = "First paragraph.\n\nSecond paragraph.\n\n\nThird paragraph.";
        let config = ChunkConfig::new(ChunkStrategy::Paragraph, 1, 0, 40);
        let chunks = chunk_text(text, &config).unwrap();
        assert_eq!(
            chunks,
            vec!["First paragraph.\n\nSecond paragraph.", "Third paragraph."]
        );
    }

    #[test]
    fn test_paragraph_oversized_flushed_alone() {
        let big = "Alpha beta gamma. Delta epsilon zeta. Eta theta iota.";
        let text = format!("Short intro.\n\n{}\n\nShort outro.", big);
        let config = ChunkConfig::new(ChunkStrategy::Paragraph, 1, 0, 30);
        let chunks = chunk_text(&text, &config).unwrap();

        assert_eq!(chunks.first().map(String::as_str), Some("Short intro."));
        assert_eq!(chunks.last().map(String::as_str), Some("Short outro."));
        assert!(chunks.len() >= 4);
        assert!(chunks.iter().all(|c| c.chars().count() <= 30));
    }

    #[test]
    fn test_section_split_by_headings() {
        let config = ChunkConfig::new(ChunkStrategy::Section, 3, 1, 2000);
        let chunks = chunk_text(MEETING, &config).unwrap();

        assert_eq!(chunks.len(), 4);
        assert!(chunks[0].starts_with("# Meeting Notes"));
        assert!(chunks[1].starts_with("## Introduction"));
        assert!(chunks[3].starts_with("## Action Items"));
    }

    #[test]
    fn test_section_literal_prefixes() {
        let text = "Preamble line.\nSection 1\nBudget talk.\nChapter 2\nHiring talk.";
        let config = ChunkConfig::new(ChunkStrategy::Section, 3, 1, 2000);
        let chunks = chunk_text(text, &config).unwrap();
        assert_eq!(
            chunks,
            vec!["Preamble line.", "Section 1\nBudget talk.", "Chapter 2\nHiring talk."]
        );
    }

    #[test]
    fn test_section_oversized_uses_sentences() {
        let body = "Point one is here. Point two is here. Point three is here. Point four is here.";
        let text = format!("# Notes\n{}", body);
        let config = ChunkConfig::new(ChunkStrategy::Section, 2, 0, 50);
        let chunks = chunk_text(&text, &config).unwrap();

        assert!(chunks.len() >= 2);
        assert!(chunks.iter().any(|c| c.contains("Point four is here.")));
        assert!(chunks.iter().all(|c| c.chars().count() <= 50));
    }

    #[test]
    fn test_section_without_headings_is_single_chunk() {
        let text = "No headings at all. Just talk.";
        let config = ChunkConfig::new(ChunkStrategy::Section, 2, 0, 2000);
        assert_eq!(chunk_text(text, &config).unwrap(), vec![text]);
    }

    #[test]
    fn test_custom_heading_pattern() {
        let mut config = ChunkConfig::new(ChunkStrategy::Section, 2, 0, 2000);
        config.heading_patterns = vec![r"^Speaker \d+:".to_string()];
        let text = "Speaker 1: hello there.\nSpeaker 2: hi back.";
        let chunks = chunk_text(text, &config).unwrap();
        assert_eq!(chunks, vec!["Speaker 1: hello there.", "Speaker 2: hi back."]);
    }

    #[test]
    fn test_hard_wrap_long_word_and_unicode() {
        let pieces = hard_wrap("회의록회의록회의록", 4);
        assert_eq!(pieces, vec!["회의록회", "의록회의", "록"]);

        let pieces = hard_wrap("aa bb cc dd", 5);
        assert_eq!(pieces, vec!["aa bb", "cc dd"]);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(matches!(
            chunk_text("x", &sentence_config(0, 0)),
            Err(RagError::InvalidInput(_))
        ));
        assert!(matches!(
            chunk_text("x", &sentence_config(2, 2)),
            Err(RagError::InvalidInput(_))
        ));
        assert!(matches!(
            chunk_text("x", &ChunkConfig::new(ChunkStrategy::Sentence, 2, 0, 0)),
            Err(RagError::InvalidInput(_))
        ));

        let mut config = ChunkConfig::default();
        config.heading_patterns = vec!["(unclosed".to_string()];
        assert!(TranscriptChunker::new(config).is_err());
    }

    #[test]
    fn test_chunk_indices_contiguous() {
        let config = sentence_config(2, 0);
        let texts = chunk_text(MEETING, &config).unwrap();
        let chunks = Chunk::from_texts(7, texts.clone(), &config);

        assert_eq!(chunks.len(), texts.len());
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert_eq!(chunk.total, texts.len());
            assert_eq!(chunk.document_id, 7);
        }
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("Sentence".parse::<ChunkStrategy>(), Ok(ChunkStrategy::Sentence));
        assert_eq!(" section ".parse::<ChunkStrategy>(), Ok(ChunkStrategy::Section));
        assert!("semantic".parse::<ChunkStrategy>().is_err());
        assert_eq!(ChunkStrategy::Paragraph.to_string(), "paragraph");
    }

    #[test]
    fn test_analyze_quality() {
        let empty = analyze_quality(&[]);
        assert_eq!(empty.count, 0);
        assert_eq!(empty.issues, vec![QualityIssue::NoChunks]);

        let chunks = vec!["a".repeat(10), "b".repeat(200), "c".repeat(3500)];
        let quality = analyze_quality(&chunks);
        assert_eq!(quality.count, 3);
        assert_eq!(quality.min_len, 10);
        assert_eq!(quality.max_len, 3500);
        assert!((quality.avg_len - 1236.666).abs() < 0.01);
        assert!(quality
            .issues
            .iter()
            .any(|i| matches!(i, QualityIssue::HighVariability { .. })));
        assert!(quality
            .issues
            .contains(&QualityIssue::VeryShortChunks { min_len: 10 }));
        assert!(quality
            .issues
            .contains(&QualityIssue::OversizedChunks { max_len: 3500 }));

        let uniform = vec!["x".repeat(100), "y".repeat(100)];
        let quality = analyze_quality(&uniform);
        assert_eq!(quality.std_dev, 0.0);
        assert!(quality.issues.is_empty());

        let single = analyze_quality(&["z".repeat(100)]);
        assert_eq!(single.issues, vec![QualityIssue::TooFewChunks]);
    }

    #[test]
    fn test_estimate_tokens() {
        let estimate = estimate_tokens(&["a".repeat(40), "b".repeat(4)]);
        assert_eq!(estimate.chunk_count, 2);
        assert_eq!(estimate.total_chars, 44);
        assert_eq!(estimate.estimated_tokens, 11);
    }

    #[test]
    fn test_compare_strategies() {
        let reports = compare_strategies(MEETING, &ChunkConfig::default()).unwrap();
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].strategy, ChunkStrategy::Sentence);
        assert!(reports.iter().all(|r| r.quality.count > 0));
    }
}
