//! CLI 모듈
//!
//! transcript-rag CLI 명령어 정의 및 구현

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::collector::{CollectionStats, FileCollector};
use crate::config::RagConfig;
use crate::embedding::has_api_key;
use crate::knowledge::{
    collect_stats, compare_strategies, open_stores, remove_document, ChunkConfig, ChunkStrategy,
    FeedbackEvent, HybridRetriever, NewDocument, QueryMode, QueryOptions,
};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "transcript-rag")]
#[command(version, about = "회의록 하이브리드 RAG 엔진", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// 청킹 옵션 (지정하지 않은 값은 환경 설정 기본값 사용)
#[derive(Args, Debug, Clone, Default)]
pub struct ChunkArgs {
    /// 청킹 전략 (sentence, paragraph, section)
    #[arg(long)]
    pub strategy: Option<ChunkStrategy>,

    /// 청크당 단위 수 (sentence 전략의 문장 수)
    #[arg(long)]
    pub size: Option<usize>,

    /// 인접 청크 간 겹치는 단위 수
    #[arg(long)]
    pub overlap: Option<usize>,

    /// 청크 최대 글자 수
    #[arg(long)]
    pub max_chars: Option<usize>,
}

impl ChunkArgs {
    /// 기본 설정에 옵션 덮어쓰기
    pub fn apply(&self, base: &ChunkConfig) -> ChunkConfig {
        let mut config = base.clone();
        if let Some(strategy) = self.strategy {
            config.strategy = strategy;
        }
        if let Some(size) = self.size {
            config.unit_size = size;
        }
        if let Some(overlap) = self.overlap {
            config.overlap = overlap;
        }
        if let Some(max_chars) = self.max_chars {
            config.max_chars = max_chars;
        }
        config
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// 텍스트, 파일, 또는 폴더의 회의록을 수집
    Ingest {
        /// 직접 입력할 텍스트
        #[arg(short, long)]
        text: Option<String>,

        /// 수집할 파일 경로 (txt, md, vtt, srt)
        #[arg(long)]
        file: Option<PathBuf>,

        /// 수집할 폴더 경로 (재귀)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// 문서 제목 (파일 수집 시 파일 이름)
        #[arg(long)]
        title: Option<String>,

        /// 주제 태그
        #[arg(long)]
        topic: Option<String>,

        /// 출처 (예: zoom, teams)
        #[arg(long)]
        source: Option<String>,

        /// 작성자 ID
        #[arg(long)]
        user: Option<String>,

        #[command(flatten)]
        chunking: ChunkArgs,
    },

    /// 회의록 검색
    Query {
        /// 검색 쿼리
        query: String,

        /// 검색 모드 (hybrid, semantic, keyword, naive)
        #[arg(short, long, default_value = "hybrid")]
        mode: QueryMode,

        /// 주제 필터
        #[arg(long)]
        topic: Option<String>,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "5")]
        limit: usize,

        /// 최소 점수
        #[arg(long, default_value = "0.0")]
        threshold: f64,

        /// 피드백 부스트 비활성화
        #[arg(long)]
        no_feedback: bool,

        /// JSON 출력
        #[arg(long)]
        json: bool,
    },

    /// 저장된 문서를 새 설정으로 다시 청킹
    Rechunk {
        /// 문서 ID
        #[arg(long, conflicts_with = "all")]
        id: Option<i64>,

        /// 모든 문서
        #[arg(long)]
        all: bool,

        #[command(flatten)]
        chunking: ChunkArgs,
    },

    /// 검색 결과에 관련도 피드백 기록
    Feedback {
        /// 임베딩 레코드 ID (query 결과의 ID)
        id: String,

        /// 피드백 대상 질의
        #[arg(short, long)]
        query: String,

        /// 관련 없음으로 기록
        #[arg(long)]
        not_relevant: bool,

        /// 작성자 ID
        #[arg(long)]
        user: Option<String>,

        /// 코멘트
        #[arg(long)]
        comment: Option<String>,
    },

    /// 레코드의 피드백 이력
    History {
        /// 임베딩 레코드 ID
        id: String,
    },

    /// 저장된 문서 목록
    List {
        /// 주제 필터
        #[arg(long)]
        topic: Option<String>,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// 문서와 청크 삭제
    Delete {
        /// 삭제할 문서 ID
        #[arg(short, long)]
        id: i64,
    },

    /// 청킹 전략 비교 (임베딩 없음)
    Analyze {
        /// 분석할 텍스트
        #[arg(short, long)]
        text: Option<String>,

        /// 분석할 파일 경로
        #[arg(long)]
        file: Option<PathBuf>,

        #[command(flatten)]
        chunking: ChunkArgs,

        /// JSON 출력
        #[arg(long)]
        json: bool,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = RagConfig::from_env().context("설정 읽기 실패")?;

    match cli.command {
        Commands::Ingest {
            text,
            file,
            dir,
            title,
            topic,
            source,
            user,
            chunking,
        } => {
            let template = NewDocument {
                title,
                topic,
                source,
                user_id: user,
                ..NewDocument::default()
            };
            let chunk_config = chunking.apply(&config.chunking);

            match (text, file, dir) {
                (Some(text), None, None) => cmd_ingest_text(config, text, template, &chunk_config).await,
                (None, file, dir) if file.is_some() || dir.is_some() => {
                    cmd_ingest_files(config, file, dir, template, &chunk_config).await
                }
                _ => bail!("--text, --file, --dir 중 하나만 지정해야 합니다"),
            }
        }
        Commands::Query {
            query,
            mode,
            topic,
            limit,
            threshold,
            no_feedback,
            json,
        } => {
            let options = QueryOptions {
                mode,
                topic,
                max_results: limit,
                score_threshold: threshold,
                use_feedback: !no_feedback,
            };
            cmd_query(config, &query, &options, json).await
        }
        Commands::Rechunk { id, all, chunking } => {
            let chunk_config = chunking.apply(&config.chunking);
            cmd_rechunk(config, id, all, &chunk_config).await
        }
        Commands::Feedback {
            id,
            query,
            not_relevant,
            user,
            comment,
        } => {
            let event = FeedbackEvent {
                embedding_id: id,
                query,
                relevant: !not_relevant,
                user_id: user,
                comment,
            };
            cmd_feedback(&config, event)
        }
        Commands::History { id } => cmd_history(&config, &id),
        Commands::List { topic, limit } => cmd_list(&config, topic, limit),
        Commands::Delete { id } => cmd_delete(&config, id),
        Commands::Analyze {
            text,
            file,
            chunking,
            json,
        } => cmd_analyze(text, file, &chunking.apply(&config.chunking), json),
        Commands::Status => cmd_status(&config),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 임베딩이 필요한 명령어용 검색기 생성
fn open_retriever(config: RagConfig) -> Result<HybridRetriever> {
    if !has_api_key() {
        bail!(
            "API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export GEMINI_API_KEY=your-api-key\n  \
             또는\n  \
             export GOOGLE_AI_API_KEY=your-api-key\n\n\
             API 키 발급: https://aistudio.google.com/app/apikey"
        );
    }

    HybridRetriever::open(config).context("HybridRetriever 초기화 실패")
}

/// 텍스트 수집 명령어
async fn cmd_ingest_text(
    config: RagConfig,
    text: String,
    template: NewDocument,
    chunk_config: &ChunkConfig,
) -> Result<()> {
    let retriever = open_retriever(config)?;

    println!("[*] 문서 저장 및 임베딩 생성 중... ({})", chunk_config.strategy);

    let doc = NewDocument {
        content: text,
        source: template.source.clone().or_else(|| Some("direct-input".to_string())),
        ..template
    };

    let outcome = retriever
        .ingest_with(doc, chunk_config)
        .await
        .context("문서 추가 실패")?;

    if outcome.created {
        println!(
            "[OK] 문서가 추가되었습니다 (ID: {}, 청크: {})",
            outcome.document_id, outcome.chunk_count
        );
    } else {
        println!("[OK] 이미 저장된 문서입니다 (ID: {})", outcome.document_id);
    }

    Ok(())
}

/// 파일/폴더 수집 명령어
async fn cmd_ingest_files(
    config: RagConfig,
    file: Option<PathBuf>,
    dir: Option<PathBuf>,
    template: NewDocument,
    chunk_config: &ChunkConfig,
) -> Result<()> {
    chunk_config.validate().context("청킹 설정 오류")?;

    let collector = FileCollector::with_defaults();

    let files = if let Some(ref file_path) = file {
        match collector.collect_file(file_path)? {
            Some(f) => vec![f],
            None => {
                println!("[!] 지원하지 않는 파일 형식: {:?}", file_path);
                return Ok(());
            }
        }
    } else if let Some(ref dir_path) = dir {
        collector.collect_directory(dir_path)?
    } else {
        bail!("--file 또는 --dir를 지정해야 합니다");
    };

    if files.is_empty() {
        println!("[!] 수집할 파일이 없습니다.");
        return Ok(());
    }

    let retriever = open_retriever(config)?;

    let stats = CollectionStats::from_files(&files);
    println!("[*] 수집 대상: {} 파일", stats.total_files);
    println!(
        "    텍스트: {}, 자막: {}",
        stats.text_files, stats.caption_files
    );
    println!("    총 크기: {}", format_bytes(stats.total_size as usize));
    println!();

    let mut created_count = 0;
    let mut duplicate_count = 0;
    let mut error_count = 0;

    for (i, collected) in files.iter().enumerate() {
        let file_name = collected
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown");

        print!("[{}/{}] {}... ", i + 1, files.len(), file_name);

        let content = match collected.read_text() {
            Ok(c) if !c.trim().is_empty() => c,
            Ok(_) => {
                println!("건너뜀 (내용 없음)");
                continue;
            }
            Err(e) => {
                println!("실패: {}", e);
                error_count += 1;
                continue;
            }
        };

        let doc = NewDocument {
            content,
            title: template.title.clone().or_else(|| Some(collected.title())),
            source: template
                .source
                .clone()
                .or_else(|| Some(format!("file://{}", collected.path.display()))),
            ..template.clone()
        };

        match retriever.ingest_with(doc, chunk_config).await {
            Ok(outcome) if outcome.created => {
                println!("완료 (ID: {}, 청크: {})", outcome.document_id, outcome.chunk_count);
                created_count += 1;
            }
            Ok(outcome) => {
                println!("중복 (ID: {})", outcome.document_id);
                duplicate_count += 1;
            }
            Err(e) => {
                println!("실패: {}", e);
                error_count += 1;
            }
        }
    }

    println!();
    println!(
        "[OK] 완료: 추가 {}, 중복 {}, 실패 {}",
        created_count, duplicate_count, error_count
    );

    Ok(())
}

/// 검색 명령어 (query)
async fn cmd_query(config: RagConfig, query: &str, options: &QueryOptions, json: bool) -> Result<()> {
    let retriever = open_retriever(config)?;

    if !json {
        println!("[*] 검색 중: \"{}\" ({})", query, options.mode);
    }

    let results = retriever.query(query, options).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if let [only] = results.as_slice() {
        if only.is_system() {
            println!("\n[!] {}", only.text);
            return Ok(());
        }
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", results.len());

    for (i, result) in results.iter().enumerate() {
        let method_str = result
            .method
            .map(|m| match m {
                crate::knowledge::SearchMethod::Semantic => "SEM",
                crate::knowledge::SearchMethod::Lexical => "LEX",
                crate::knowledge::SearchMethod::Hybrid => "HYB",
            })
            .unwrap_or("-");

        println!(
            "{}. [{}] [점수: {:.4}] {}",
            i + 1,
            method_str,
            result.score,
            result.id.as_deref().unwrap_or("-")
        );
        println!(
            "   주제: {} | 출처: {}",
            result.topic.as_deref().unwrap_or("-"),
            result.source
        );
        println!("   내용: {}", truncate_text(&result.text, 200));
        println!();
    }

    Ok(())
}

/// 재청킹 명령어 (rechunk)
async fn cmd_rechunk(
    config: RagConfig,
    id: Option<i64>,
    all: bool,
    chunk_config: &ChunkConfig,
) -> Result<()> {
    chunk_config.validate().context("청킹 설정 오류")?;
    let retriever = open_retriever(config)?;

    println!(
        "[*] 재청킹: {} (단위 {}, 겹침 {}, 최대 {}자)",
        chunk_config.strategy, chunk_config.unit_size, chunk_config.overlap, chunk_config.max_chars
    );

    if all {
        let report = retriever
            .rechunk_all(chunk_config)
            .await
            .context("재청킹 실패")?;

        println!(
            "[OK] 완료: 전체 {}, 성공 {}, 실패 {}",
            report.total, report.succeeded, report.failed
        );
        for (doc_id, error) in &report.failures {
            println!("     #{}: {}", doc_id, error);
        }
        return Ok(());
    }

    let Some(doc_id) = id else {
        bail!("--id 또는 --all 중 하나를 지정해야 합니다");
    };

    if retriever
        .rechunk(doc_id, chunk_config)
        .await
        .context("재청킹 실패")?
    {
        println!("[OK] 문서 #{} 재청킹 완료", doc_id);
    } else {
        bail!("ID {}인 문서를 찾을 수 없습니다", doc_id);
    }

    Ok(())
}

/// 피드백 명령어 (feedback)
fn cmd_feedback(config: &RagConfig, event: FeedbackEvent) -> Result<()> {
    let (_, index) = open_stores(&config.data_dir).context("인덱스 열기 실패")?;

    let relevant = event.relevant;
    if !index
        .record_feedback(&event)
        .context("피드백 기록 실패")?
    {
        bail!("ID {}인 레코드를 찾을 수 없습니다", event.embedding_id);
    }

    let record = index.get_record(&event.embedding_id)?;
    println!(
        "[OK] 피드백 기록됨 ({})",
        if relevant { "관련 있음" } else { "관련 없음" }
    );
    if let Some(record) = record {
        println!(
            "     관련도: {:.1} | 피드백: {} 건",
            record.relevance_score, record.feedback_count
        );
    }

    Ok(())
}

/// 피드백 이력 명령어 (history)
fn cmd_history(config: &RagConfig, id: &str) -> Result<()> {
    let (_, index) = open_stores(&config.data_dir).context("인덱스 열기 실패")?;

    let events = index.list_feedback(id).context("피드백 조회 실패")?;
    if events.is_empty() {
        println!("[!] 피드백이 없습니다.");
        return Ok(());
    }

    println!("[OK] 피드백 이력 ({} 건):\n", events.len());
    for event in events {
        println!(
            "  {} [{}] \"{}\" ({})",
            event.created_at.format("%Y-%m-%d %H:%M"),
            if event.relevant { "+" } else { "-" },
            truncate_text(&event.query, 60),
            event.user_id.as_deref().unwrap_or("-")
        );
        if let Some(comment) = event.comment {
            println!("        {}", truncate_text(&comment, 80));
        }
    }

    Ok(())
}

/// 목록 명령어 (list)
fn cmd_list(config: &RagConfig, topic: Option<String>, limit: usize) -> Result<()> {
    let (store, _) = open_stores(&config.data_dir).context("저장소 열기 실패")?;

    let docs = store
        .list_documents(limit, topic.as_deref())
        .context("문서 목록 조회 실패")?;

    if docs.is_empty() {
        println!("[!] 저장된 문서가 없습니다.");
        return Ok(());
    }

    println!("[OK] 저장된 문서 ({} 건):\n", docs.len());

    for doc in docs {
        let topic = doc.topic.as_deref().unwrap_or("-");
        let title_display = doc
            .title
            .as_ref()
            .map(|t| truncate_text(t, 40))
            .unwrap_or_else(|| "-".to_string());
        let state = if doc.processed { "indexed" } else { "pending" };

        println!("  #{:<4} [{}] {} ({})", doc.id, topic, title_display, state);
        if let Some(ref source) = doc.source {
            println!("        출처: {}", source);
        }
        println!(
            "        {} | {} chars",
            doc.created_at.format("%Y-%m-%d %H:%M"),
            doc.content.chars().count()
        );
        println!();
    }

    Ok(())
}

/// 삭제 명령어 (delete)
fn cmd_delete(config: &RagConfig, id: i64) -> Result<()> {
    let (store, index) = open_stores(&config.data_dir).context("저장소 열기 실패")?;

    if remove_document(&store, &index, id).context("문서 삭제 실패")? {
        println!("[OK] 문서 #{} 삭제됨", id);
    } else {
        bail!("ID {}인 문서를 찾을 수 없습니다", id);
    }

    Ok(())
}

/// 분석 명령어 (analyze)
fn cmd_analyze(
    text: Option<String>,
    file: Option<PathBuf>,
    chunk_config: &ChunkConfig,
    json: bool,
) -> Result<()> {
    let text = match (text, file) {
        (Some(text), None) => text,
        (None, Some(path)) => read_transcript(&path)?,
        _ => bail!("--text 또는 --file 중 하나를 지정해야 합니다"),
    };

    let reports = compare_strategies(&text, chunk_config).context("청킹 분석 실패")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    println!(
        "[*] 청킹 전략 비교 (단위 {}, 겹침 {}, 최대 {}자)\n",
        chunk_config.unit_size, chunk_config.overlap, chunk_config.max_chars
    );

    for report in reports {
        let marker = if report.strategy == chunk_config.strategy { "*" } else { " " };
        let quality = &report.quality;
        println!(
            "{} {:<10} 청크 {:>3} | 평균 {:>7.1} | 최소 {:>5} | 최대 {:>5} | ~{} tokens",
            marker,
            report.strategy.as_str(),
            quality.count,
            quality.avg_len,
            quality.min_len,
            quality.max_len,
            report.tokens.estimated_tokens
        );
        for issue in &quality.issues {
            println!("    [!] {}", issue);
        }
    }

    Ok(())
}

/// 상태 명령어 (status)
fn cmd_status(config: &RagConfig) -> Result<()> {
    println!("transcript-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", config.data_dir.display());
    println!(
        "[*] 기본 청킹: {} (단위 {}, 겹침 {}, 최대 {}자)",
        config.chunking.strategy,
        config.chunking.unit_size,
        config.chunking.overlap,
        config.chunking.max_chars
    );

    if has_api_key() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정");
        println!("    설정: export GEMINI_API_KEY=your-key");
    }

    match open_stores(&config.data_dir).and_then(|(store, index)| collect_stats(&store, &index)) {
        Ok(stats) => {
            println!(
                "[OK] 저장된 문서: {} 건 (인덱싱 완료 {} 건)",
                stats.document_count, stats.processed_count
            );
            println!(
                "     총 콘텐츠: {}",
                format_bytes(stats.total_content_bytes)
            );
            println!("[OK] 인덱스: {} 청크", stats.embedding_count);
            println!("     피드백: {} 건", stats.feedback_count);
            if !stats.fts_enabled {
                println!("[!] FTS5 사용 불가: 키워드 검색은 부분 문자열 방식으로 동작합니다");
            }
        }
        Err(e) => {
            println!("[!] 저장소 열기 실패: {}", e);
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 회의록 파일 읽기 (자막 형식 처리 포함)
fn read_transcript(path: &Path) -> Result<String> {
    match FileCollector::with_defaults().collect_file(path)? {
        Some(file) => file.read_text(),
        None => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read file: {:?}", path)),
    }
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================
