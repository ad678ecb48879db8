//! Pipeline configuration.
//!
//! Everything is read from the environment (a `.env` file is loaded by the
//! binary before this runs). Every key has a default so a bare environment
//! still produces a runnable, if provider-less, configuration.

pub mod env;
pub mod heuristics;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use heuristics::{ClassificationRule, ContentType, HeuristicConfig, RenderAs};

use crate::gateway::RetryConfig;
use crate::recovery::RecoveryConfig;

/// Which topic-structuring branch runs.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum PipelineMode {
    /// Discover topics from the timeline.
    #[default]
    Auto,
    /// Map supplied agenda lines onto extracted topics.
    Agenda,
}

/// Report layout variant.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum ReportLayout {
    #[default]
    Current,
    /// Adds the department filter bar and collapsible contents.
    #[serde(alias = "react_official")]
    #[strum(to_string = "official", serialize = "react_official")]
    Official,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum ImageEmbedMode {
    #[default]
    Base64,
    Path,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    #[default]
    Ollama,
    #[strum(to_string = "openai", serialize = "vllm")]
    OpenAi,
}

/// Chat model settings.
#[derive(Debug, Clone, Serialize)]
pub struct LlmConfig {
    /// OpenAI-compatible endpoint of the primary provider; `None` disables it.
    pub base_url: Option<String>,
    #[serde(skip)]
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    /// `max_tokens` is never halved below this.
    pub token_floor: u32,
    pub temperature: f32,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Full provider cycles per call.
    pub max_retries: u32,
    pub retry: RetryConfig,
    pub allow_ollama_chat_fallback: bool,
    pub ollama_base_url: String,
    pub ollama_chat_model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            model: "typhoon-v2.1-12b-instruct".to_string(),
            max_tokens: 8192,
            token_floor: 1024,
            temperature: 0.1,
            timeout: Duration::from_secs(120),
            max_retries: 3,
            retry: RetryConfig::default(),
            allow_ollama_chat_fallback: false,
            ollama_base_url: "http://localhost:11434".to_string(),
            ollama_chat_model: "qwen2.5:7b".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderKind,
    pub base_url: String,
    pub model: String,
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::Ollama,
            base_url: "http://localhost:11434".to_string(),
            model: "bge-m3".to_string(),
            api_key: None,
        }
    }
}

/// Chunk sizes and context windows for the map stages.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkingConfig {
    pub align_chunk_size: usize,
    pub align_overlap: usize,
    pub knowledge_chunk_size: usize,
    pub image_chunk_size: usize,
    /// Captures within this many seconds of a chunk are sent with it.
    pub align_capture_window_sec: f64,
    pub align_max_captures: usize,
    pub ocr_snippet_chars: usize,
    /// Rows without slide context pick the nearest slide within this window.
    pub slide_context_window_sec: f64,
    pub knowledge_slide_window_sec: f64,
    pub summary_margin_sec: f64,
    pub discovery_sample_rows: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            align_chunk_size: 120,
            align_overlap: 1,
            knowledge_chunk_size: 160,
            image_chunk_size: 12,
            align_capture_window_sec: 60.0,
            align_max_captures: 3,
            ocr_snippet_chars: 220,
            slide_context_window_sec: 60.0,
            knowledge_slide_window_sec: 120.0,
            summary_margin_sec: 120.0,
            discovery_sample_rows: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageConfig {
    pub include_ocr: bool,
    pub insert_enabled: bool,
    pub max_per_topic: usize,
    pub min_file_size_kb: u64,
    pub embed_mode: ImageEmbedMode,
    /// Relative capture paths are resolved against this directory first.
    pub base_dir: Option<PathBuf>,
    pub similarity_threshold: f32,
    /// OCR text sent for embedding is cut to this many characters.
    pub embed_text_chars: usize,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            include_ocr: true,
            insert_enabled: true,
            max_per_topic: 4,
            min_file_size_kb: 30,
            embed_mode: ImageEmbedMode::Base64,
            base_dir: None,
            similarity_threshold: 0.65,
            embed_text_chars: 800,
        }
    }
}

/// Fallback metadata used when the model leaves fields empty.
#[derive(Debug, Clone, Serialize)]
pub struct ReportDefaults {
    pub title: String,
    pub platform: String,
    pub company: String,
}

impl Default for ReportDefaults {
    fn default() -> Self {
        Self {
            title: "Monthly Meeting Report".to_string(),
            platform: "ZOOM".to_string(),
            company: String::new(),
        }
    }
}

/// Input and output locations of one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunPaths {
    pub transcript: PathBuf,
    pub config: PathBuf,
    pub captures: Option<PathBuf>,
    pub output_html: PathBuf,
    pub artifacts_root: PathBuf,
    pub resume_artifact_dir: Option<PathBuf>,
}

/// Complete configuration of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineConfig {
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub chunking: ChunkingConfig,
    pub recovery: RecoveryConfig,
    pub images: ImageConfig,
    pub report: ReportDefaults,
    #[serde(skip)]
    pub heuristics: HeuristicConfig,
    pub heuristics_path: Option<PathBuf>,
    pub mode: PipelineMode,
    pub layout: ReportLayout,
    pub save_intermediate: bool,
    pub paths: RunPaths,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            chunking: ChunkingConfig::default(),
            recovery: RecoveryConfig::default(),
            images: ImageConfig::default(),
            report: ReportDefaults::default(),
            heuristics: HeuristicConfig::default(),
            heuristics_path: None,
            mode: PipelineMode::Auto,
            layout: ReportLayout::Current,
            save_intermediate: true,
            paths: RunPaths {
                transcript: PathBuf::from("transcript.json"),
                config: PathBuf::from("config.json"),
                captures: Some(PathBuf::from("capture_ocr_results.json")),
                output_html: PathBuf::from("meeting_report.html"),
                artifacts_root: PathBuf::from("artifacts"),
                resume_artifact_dir: None,
            },
        }
    }
}

impl PipelineConfig {
    /// Build the configuration from environment variables.
    ///
    /// Heuristic overrides named by `HEURISTICS_PATH` are loaded separately by
    /// [`PipelineConfig::load_heuristics`].
    pub fn from_env() -> Self {
        let mut config = Self::default();

        let llm = &mut config.llm;
        llm.base_url = env::string("LLM_PROVIDER_BASE_URL");
        llm.api_key = env::string("LLM_PROVIDER_API_KEY");
        llm.model = env::string_or("LLM_PROVIDER_MODEL", &llm.model);
        llm.max_tokens = env::parse_or("LLM_MAX_TOKENS", llm.max_tokens).max(256);
        llm.token_floor = env::parse_or("LLM_TOKEN_FLOOR", llm.token_floor).max(1);
        llm.temperature = env::parse_or("LLM_TEMPERATURE", llm.temperature);
        llm.timeout = Duration::from_secs(env::parse_or("LLM_TIMEOUT_SEC", 120u64).max(1));
        llm.max_retries = env::parse_or("LLM_MAX_RETRIES", llm.max_retries).max(1);
        llm.retry.initial_delay_ms = env::parse_or("LLM_RETRY_DELAY_MS", 500);
        llm.allow_ollama_chat_fallback = env::bool_or("ALLOW_OLLAMA_CHAT_FALLBACK", false);
        llm.ollama_base_url = env::string_or("OLLAMA_BASE_URL", &llm.ollama_base_url);
        llm.ollama_chat_model = env::string_or("OLLAMA_CHAT_MODEL", &llm.ollama_chat_model);

        let emb = &mut config.embedding;
        emb.provider = env::parse_or("EMBEDDING_PROVIDER", emb.provider);
        emb.base_url = env::string("EMBEDDING_BASE_URL").unwrap_or_else(|| match emb.provider {
            EmbeddingProviderKind::Ollama => config.llm.ollama_base_url.clone(),
            EmbeddingProviderKind::OpenAi => "http://localhost:8000/v1".to_string(),
        });
        emb.model = env::string_or("EMBEDDING_MODEL", &emb.model);
        emb.api_key = env::string("EMBEDDING_API_KEY");

        let chunking = &mut config.chunking;
        chunking.align_chunk_size = env::usize_min("AGENT1_CHUNK_SIZE", 120, 1);
        chunking.align_overlap = env::parse_or("AGENT1_CHUNK_OVERLAP", 1);
        chunking.knowledge_chunk_size = env::usize_min("AGENT2_CHUNK_SIZE", 160, 1);
        chunking.image_chunk_size = env::usize_min("IMAGE_CHUNK_SIZE", 12, 1);
        chunking.align_capture_window_sec = env::parse_or("ALIGN_CAPTURE_WINDOW_SEC", 60.0);
        chunking.align_max_captures = env::parse_or("ALIGN_MAX_CAPTURES", 3);
        chunking.ocr_snippet_chars = env::usize_min("OCR_SNIPPET_CHARS", 220, 120);
        chunking.summary_margin_sec = env::parse_or("SUMMARY_MARGIN_SEC", 120.0);
        chunking.discovery_sample_rows = env::usize_min("DISCOVERY_SAMPLE_ROWS", 300, 1);

        let recovery = &mut config.recovery;
        recovery.max_concurrency = env::usize_min("PIPELINE_MAX_CONCURRENCY", 4, 1);
        recovery.min_unit_size = env::usize_min("RECOVERY_MIN_UNIT", 1, 1);
        recovery.max_depth = env::parse_or("RECOVERY_MAX_DEPTH", recovery.max_depth);

        let images = &mut config.images;
        images.include_ocr = env::bool_or("INCLUDE_OCR", true);
        images.insert_enabled = env::bool_or("IMAGE_INSERT_ENABLED", true);
        images.max_per_topic = env::usize_min("IMAGE_MAX_PER_TOPIC", 4, 1);
        images.min_file_size_kb = env::parse_or("IMAGE_MIN_FILE_SIZE_KB", 30);
        images.embed_mode = env::parse_or("IMAGE_EMBED_MODE", ImageEmbedMode::Base64);
        images.base_dir = env::string("IMAGE_BASE_DIR").map(PathBuf::from);
        images.similarity_threshold = env::parse_or("IMAGE_SIMILARITY_THRESHOLD", 0.65);

        let report = &mut config.report;
        report.title = env::string_or("REPORT_DEFAULT_TITLE", &report.title);
        report.platform = env::string_or("REPORT_DEFAULT_PLATFORM", &report.platform);
        report.company = env::string_or("REPORT_DEFAULT_COMPANY", &report.company);

        config.heuristics_path = env::string("HEURISTICS_PATH").map(PathBuf::from);
        config.mode = env::parse_or("SUMMARIZE_MODE", PipelineMode::Auto);
        config.layout = env::parse_or("REPORT_LAYOUT_MODE", ReportLayout::Current);
        config.save_intermediate = env::bool_or("SAVE_INTERMEDIATE", true);

        let paths = &mut config.paths;
        if let Some(p) = env::string("TRANSCRIPT_PATH") {
            paths.transcript = PathBuf::from(p);
        }
        if let Some(p) = env::string("CONFIG_PATH") {
            paths.config = PathBuf::from(p);
        }
        if let Some(p) = env::string("OCR_PATH") {
            paths.captures = Some(PathBuf::from(p));
        }
        if let Some(p) = env::string("OUTPUT_HTML_PATH") {
            paths.output_html = PathBuf::from(p);
        }
        if let Some(p) = env::string("ARTIFACTS_ROOT") {
            paths.artifacts_root = PathBuf::from(p);
        }
        paths.resume_artifact_dir = env::string("RESUME_ARTIFACT_DIR").map(PathBuf::from);

        config
    }

    /// Replace the compiled-in heuristic tables with the configured override file.
    pub async fn load_heuristics(&mut self) -> crate::Result<()> {
        self.heuristics = HeuristicConfig::load(self.heuristics_path.as_deref()).await?;
        Ok(())
    }

    /// Minimum image size in bytes for insertion into the report.
    pub fn min_image_bytes(&self) -> u64 {
        self.images.min_file_size_kb * 1024
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_secs())
    }
}
