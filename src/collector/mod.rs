//! 파일 수집 모듈
//!
//! 로컬 폴더에서 회의록 파일을 수집합니다.
//! .gitignore 패턴을 존중하고, 지원하는 확장자만 수집합니다.
//!
//! 자막 파일(WebVTT, SRT)은 타임코드를 제거하고 발화 텍스트만 남깁니다.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use ignore::WalkBuilder;

// ============================================================================
// Transcript Formats
// ============================================================================

/// 지원하는 회의록 형식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptFormat {
    /// 일반 텍스트
    PlainText,
    /// 마크다운 회의록
    Markdown,
    /// WebVTT 자막
    WebVtt,
    /// SubRip 자막
    Srt,
}

impl TranscriptFormat {
    /// 확장자로 형식 결정
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "txt" => Some(TranscriptFormat::PlainText),
            "md" | "markdown" => Some(TranscriptFormat::Markdown),
            "vtt" => Some(TranscriptFormat::WebVtt),
            "srt" => Some(TranscriptFormat::Srt),
            _ => None,
        }
    }

    /// 파일 경로에서 형식 결정
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    pub fn is_caption(&self) -> bool {
        matches!(self, TranscriptFormat::WebVtt | TranscriptFormat::Srt)
    }
}

// ============================================================================
// Collected File
// ============================================================================

/// 수집된 파일 정보
#[derive(Debug, Clone)]
pub struct CollectedFile {
    /// 파일 절대 경로
    pub path: PathBuf,
    pub format: TranscriptFormat,
    /// 파일 크기 (바이트)
    pub size: u64,
    /// 수정 시간
    pub modified_at: Option<SystemTime>,
}

impl CollectedFile {
    /// 파일에서 CollectedFile 생성
    pub fn from_path(path: PathBuf) -> Result<Option<Self>> {
        let format = match TranscriptFormat::from_path(&path) {
            Some(format) => format,
            None => return Ok(None), // 지원하지 않는 확장자
        };

        let metadata = std::fs::metadata(&path)
            .with_context(|| format!("Failed to read metadata: {:?}", path))?;

        if !metadata.is_file() {
            return Ok(None);
        }

        Ok(Some(Self {
            path,
            format,
            size: metadata.len(),
            modified_at: metadata.modified().ok(),
        }))
    }

    /// 문서 제목 (파일 이름, 확장자 제외)
    pub fn title(&self) -> String {
        self.path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// 회의록 본문 읽기 (자막은 텍스트만 추출)
    pub fn read_text(&self) -> Result<String> {
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read file: {:?}", self.path))?;

        if self.format.is_caption() {
            Ok(caption_text(&raw))
        } else {
            Ok(raw)
        }
    }
}

// ============================================================================
// Caption Parsing
// ============================================================================

/// 자막 큐에서 발화 텍스트만 추출
///
/// 빈 줄로 구분된 블록 중 `-->` 타임코드 줄이 있는 블록만 사용합니다.
/// (WEBVTT 헤더, NOTE/STYLE 블록, SRT 순번은 버림)
/// `<v 이름>` 태그는 `이름: `으로 바꾸고 나머지 태그는 제거합니다.
/// 직전 큐와 같은 텍스트는 한 번만 남깁니다.
pub fn caption_text(raw: &str) -> String {
    let raw = raw.replace("\r\n", "\n");
    let mut cues: Vec<String> = Vec::new();

    for block in raw.split("\n\n") {
        let mut lines = block.lines().map(str::trim).skip_while(|line| !line.contains("-->"));
        if lines.next().is_none() {
            continue;
        }

        let text = lines
            .filter(|line| !line.is_empty())
            .map(strip_tags)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        if text.is_empty() || cues.last() == Some(&text) {
            continue;
        }
        cues.push(text);
    }

    cues.join("\n")
}

fn strip_tags(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;

    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        let Some(close) = rest[open..].find('>') else {
            out.push_str(&rest[open..]);
            rest = "";
            break;
        };

        let tag = &rest[open + 1..open + close];
        if tag.starts_with("v ") || tag.starts_with("v.") {
            // <v.loud Anna> 같은 클래스 표기는 이름만 사용
            let speaker = tag.split_once(' ').map(|(_, name)| name.trim()).unwrap_or("");
            if !speaker.is_empty() {
                out.push_str(speaker);
                out.push_str(": ");
            }
        }
        rest = &rest[open + close + 1..];
    }
    out.push_str(rest);

    out.trim().to_string()
}

// ============================================================================
// File Collector
// ============================================================================

/// 파일 수집기 설정
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// .gitignore 패턴 존중 여부
    pub respect_gitignore: bool,
    /// 숨김 파일 포함 여부
    pub include_hidden: bool,
    /// 최대 파일 크기 (바이트, 0이면 제한 없음)
    pub max_file_size: u64,
    /// 특정 확장자만 수집 (비어있으면 모든 지원 확장자)
    pub extensions: Vec<String>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            respect_gitignore: true,
            include_hidden: false,
            max_file_size: 10 * 1024 * 1024, // 10MB
            extensions: vec![],
        }
    }
}

/// 파일 수집기
pub struct FileCollector {
    config: CollectorConfig,
}

impl FileCollector {
    pub fn new(config: CollectorConfig) -> Self {
        Self { config }
    }

    /// 기본 설정으로 수집기 생성
    pub fn with_defaults() -> Self {
        Self::new(CollectorConfig::default())
    }

    /// 단일 파일 수집
    pub fn collect_file(&self, path: &Path) -> Result<Option<CollectedFile>> {
        let abs_path = absolute(path)?;

        if !abs_path.is_file() {
            anyhow::bail!("File not found: {:?}", abs_path);
        }

        let file = CollectedFile::from_path(abs_path)?;
        Ok(file.filter(|f| self.should_include(f)))
    }

    /// 폴더 재귀 수집 (경로 순 정렬)
    pub fn collect_directory(&self, path: &Path) -> Result<Vec<CollectedFile>> {
        let abs_path = absolute(path)?;

        if !abs_path.is_dir() {
            anyhow::bail!("Directory not found: {:?}", abs_path);
        }

        let mut files = Vec::new();

        // ignore 크레이트로 .gitignore 지원 (git 저장소 밖에서도 적용)
        let walker = WalkBuilder::new(&abs_path)
            .hidden(!self.config.include_hidden)
            .git_ignore(self.config.respect_gitignore)
            .git_global(self.config.respect_gitignore)
            .git_exclude(self.config.respect_gitignore)
            .require_git(false)
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("Failed to read entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }

            match CollectedFile::from_path(entry.path().to_path_buf()) {
                Ok(Some(file)) => {
                    if self.should_include(&file) {
                        files.push(file);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("Failed to collect file: {}", e);
                }
            }
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        tracing::info!("Collected {} transcripts from {:?}", files.len(), abs_path);
        Ok(files)
    }

    /// 파일이 필터 조건을 만족하는지 확인
    fn should_include(&self, file: &CollectedFile) -> bool {
        if self.config.max_file_size > 0 && file.size > self.config.max_file_size {
            tracing::debug!("Skipping large file: {:?} ({} bytes)", file.path, file.size);
            return false;
        }

        if file.size == 0 {
            tracing::debug!("Skipping empty file: {:?}", file.path);
            return false;
        }

        if self.config.extensions.is_empty() {
            return true;
        }

        file.path
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                self.config
                    .extensions
                    .iter()
                    .any(|e| e.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// 수집 통계
#[derive(Debug, Default)]
pub struct CollectionStats {
    pub total_files: usize,
    pub text_files: usize,
    pub caption_files: usize,
    pub total_size: u64,
}

impl CollectionStats {
    /// 수집된 파일 목록에서 통계 계산
    pub fn from_files(files: &[CollectedFile]) -> Self {
        let mut stats = Self::default();

        for file in files {
            stats.total_files += 1;
            stats.total_size += file.size;

            if file.format.is_caption() {
                stats.caption_files += 1;
            } else {
                stats.text_files += 1;
            }
        }

        stats
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const VTT: &str = "WEBVTT\n\nNOTE recorded by zoom\n\n1\n00:00:01.000 --> 00:00:04.000\n<v Anna>The release slipped a week.</v>\n\n2\n00:00:04.000 --> 00:00:06.000\n<v Ben>QA found <b>two</b> crashes.</v>\n\n3\n00:00:06.000 --> 00:00:07.000\n<v Ben>QA found <b>two</b> crashes.</v>\n";

    const SRT: &str = "1\r\n00:00:01,000 --> 00:00:03,000\r\nBudget approved.\r\n\r\n2\r\n00:00:03,000 --> 00:00:05,000\r\nMarketing grows\r\nten percent.\r\n";

    fn write(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(TranscriptFormat::from_extension("txt"), Some(TranscriptFormat::PlainText));
        assert_eq!(TranscriptFormat::from_extension("MD"), Some(TranscriptFormat::Markdown));
        assert_eq!(TranscriptFormat::from_extension("vtt"), Some(TranscriptFormat::WebVtt));
        assert_eq!(TranscriptFormat::from_extension("srt"), Some(TranscriptFormat::Srt));
        assert_eq!(TranscriptFormat::from_extension("pdf"), None);
    }

    #[test]
    fn test_caption_text_vtt() {
        assert_eq!(
            caption_text(VTT),
            "Anna: The release slipped a week.\nBen: QA found two crashes."
        );
    }

    #[test]
    fn test_caption_text_srt() {
        assert_eq!(caption_text(SRT), "Budget approved.\nMarketing grows ten percent.");
    }

    #[test]
    fn test_caption_text_without_cues() {
        assert_eq!(caption_text("WEBVTT\n\nNOTE nothing here\n"), "");
    }

    #[test]
    fn test_collect_directory_respects_gitignore() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "standup.txt", "Release slipped.");
        write(dir.path(), "nested/planning.md", "# Budget\nApproved.");
        write(dir.path(), "nested/call.vtt", VTT);
        write(dir.path(), "slides.pdf", "binary");
        write(dir.path(), "empty.txt", "");
        write(dir.path(), "drafts/skip.txt", "ignored");
        write(dir.path(), ".gitignore", "drafts/\n");

        let files = FileCollector::with_defaults()
            .collect_directory(dir.path())
            .unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["call.vtt", "planning.md", "standup.txt"]);

        let stats = CollectionStats::from_files(&files);
        assert_eq!(stats.total_files, 3);
        assert_eq!(stats.caption_files, 1);
        assert_eq!(stats.text_files, 2);
    }

    #[test]
    fn test_collect_file_reads_caption_text() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "weekly.srt", SRT);

        let file = FileCollector::with_defaults()
            .collect_file(&dir.path().join("weekly.srt"))
            .unwrap()
            .unwrap();
        assert_eq!(file.title(), "weekly");
        assert_eq!(
            file.read_text().unwrap(),
            "Budget approved.\nMarketing grows ten percent."
        );

        let missing = FileCollector::with_defaults().collect_file(&dir.path().join("nope.txt"));
        assert!(missing.is_err());
    }

    #[test]
    fn test_extension_filter() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.txt", "Alpha.");
        write(dir.path(), "b.srt", SRT);

        let collector = FileCollector::new(CollectorConfig {
            extensions: vec!["srt".to_string()],
            ..CollectorConfig::default()
        });
        let files = collector.collect_directory(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].format, TranscriptFormat::Srt);
    }
}
