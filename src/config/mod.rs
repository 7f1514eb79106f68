//! Configuration management for docent
//!
//! Handles loading, saving, and validating configuration from TOML files.
//! Every field has an environment-variable-backed default so the service
//! runs without a config file (see `defaults.rs` for the recognized keys).

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Embedding backend configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Generation backend configuration
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Chunking configuration
    #[serde(default)]
    pub chunk: ChunkConfig,

    /// Ingestion configuration
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Retrieval and routing configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Embedding backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Backend base URL (OpenAI-compatible /v1/embeddings)
    #[serde(default = "default_emb_url")]
    pub url: String,

    /// Model identifier sent to the backend
    #[serde(default = "default_emb_model")]
    pub model: String,

    /// Embedding dimension (must match the model)
    #[serde(default = "default_emb_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_emb_timeout_secs")]
    pub timeout_secs: u64,
}

/// Generation backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Backend base URL (OpenAI-compatible /v1/chat/completions)
    #[serde(default = "default_llm_url")]
    pub url: String,

    /// Model identifier sent to the backend
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,

    /// Default maximum tokens per answer
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: u32,

    /// Default sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Default nucleus sampling cutoff
    #[serde(default = "default_top_p")]
    pub top_p: f32,
}

/// Chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Window size in tokens
    #[serde(default = "default_chunk_size_tokens")]
    pub size_tokens: usize,

    /// Overlap between consecutive windows in tokens
    #[serde(default = "default_chunk_overlap_tokens")]
    pub overlap_tokens: usize,

    /// Cap on chunks embedded per upload (0 = unlimited)
    #[serde(default = "default_max_chunks_emb")]
    pub max_chunks_emb: usize,

    /// Optional HuggingFace tokenizer.json for exact tokenization
    #[serde(default = "default_tokenizer_json")]
    pub tokenizer_json: Option<PathBuf>,
}

/// Ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Fast mode: no row/caption embeddings, chunk cap forced to 24
    #[serde(default = "default_fast_mode")]
    pub fast_mode: bool,

    /// Rasterize PDF pages under the upload tree
    #[serde(default = "default_render_pages")]
    pub render_pages: bool,

    /// Rasterization DPI
    #[serde(default = "default_render_dpi")]
    pub render_dpi: u32,

    /// Index tables (assets, bodies, row fragments)
    #[serde(default = "default_enable_table_index")]
    pub enable_table_index: bool,

    /// Per-table cap on embedded rows (0 disables row embedding)
    #[serde(default = "default_max_table_rows_emb")]
    pub max_table_rows_emb: usize,

    /// Last page on which captions are still embedded
    #[serde(default = "default_max_caption_pages")]
    pub max_caption_pages: i64,

    /// Optional HWP-to-text converter executable
    #[serde(default = "default_hwp2txt_exe")]
    pub hwp2txt_exe: Option<String>,

    /// Parser subprocess interpreter
    #[serde(default = "default_parser_python")]
    pub parser_python: String,

    /// Parser subprocess script
    #[serde(default = "default_parser_script")]
    pub parser_script: String,

    /// Parser subprocess deadline in seconds
    #[serde(default = "default_parser_timeout_secs")]
    pub parser_timeout_secs: u64,

    /// Concurrent fragment inserts per ingestion
    #[serde(default = "default_insert_concurrency")]
    pub insert_concurrency: usize,
}

/// Retrieval and routing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Similarity floor shared by all retrieval slices
    #[serde(default = "default_retrieve_min")]
    pub retrieve_min: f32,

    /// Single-hit confidence threshold for document mode
    #[serde(default = "default_use_as_ctx_min")]
    pub use_as_ctx_min: f32,

    /// Top-3 average threshold for document mode
    #[serde(default = "default_min_top3_avg")]
    pub min_top3_avg: f32,

    /// Prose slice size
    #[serde(default = "default_text_k")]
    pub text_k: usize,

    /// Table-row slice size
    #[serde(default = "default_table_k")]
    pub table_k: usize,

    /// Image-caption slice size
    #[serde(default = "default_image_k")]
    pub image_k: usize,

    /// Per-fragment character budget in composed context
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,

    /// Total character budget of composed context
    #[serde(default = "default_max_ctx_chars")]
    pub max_ctx_chars: usize,

    /// Conversation turns kept when generating
    #[serde(default = "default_history_max_turns")]
    pub history_max_turns: usize,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Upload size limit in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Question length limit in characters
    #[serde(default = "default_max_question_chars")]
    pub max_question_chars: usize,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for docent data
    pub base_dir: PathBuf,

    /// Path to SQLite database
    pub db_file: PathBuf,

    /// Root of the upload tree
    pub uploads_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            chunk: ChunkConfig::default(),
            ingest: IngestConfig::default(),
            retrieval: RetrievalConfig::default(),
            server: ServerConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: default_emb_url(),
            model: default_emb_model(),
            dimension: default_emb_dimension(),
            timeout_secs: default_emb_timeout_secs(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            url: default_llm_url(),
            model: default_llm_model(),
            timeout_secs: default_llm_timeout_secs(),
            max_new_tokens: default_max_new_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
        }
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            size_tokens: default_chunk_size_tokens(),
            overlap_tokens: default_chunk_overlap_tokens(),
            max_chunks_emb: default_max_chunks_emb(),
            tokenizer_json: default_tokenizer_json(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            fast_mode: default_fast_mode(),
            render_pages: default_render_pages(),
            render_dpi: default_render_dpi(),
            enable_table_index: default_enable_table_index(),
            max_table_rows_emb: default_max_table_rows_emb(),
            max_caption_pages: default_max_caption_pages(),
            hwp2txt_exe: default_hwp2txt_exe(),
            parser_python: default_parser_python(),
            parser_script: default_parser_script(),
            parser_timeout_secs: default_parser_timeout_secs(),
            insert_concurrency: default_insert_concurrency(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            retrieve_min: default_retrieve_min(),
            use_as_ctx_min: default_use_as_ctx_min(),
            min_top3_avg: default_min_top3_avg(),
            text_k: default_text_k(),
            table_k: default_table_k(),
            image_k: default_image_k(),
            snippet_chars: default_snippet_chars(),
            max_ctx_chars: default_max_ctx_chars(),
            history_max_turns: default_history_max_turns(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_upload_bytes: default_max_upload_bytes(),
            max_question_chars: default_max_question_chars(),
        }
    }
}

impl Config {
    /// Get the default base directory for docent (~/.docent)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".docent")
    }

    /// Initialize paths configuration
    pub fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = PathsConfig {
            db_file: base.join("docent.db"),
            uploads_dir: base.join("uploads"),
            base_dir: base,
        };
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.init_paths(Some(base));

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a base directory, falling back to defaults
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        let config_file = base.join("config.toml");

        let mut config = if config_file.exists() {
            debug!("Loading config from {:?}", config_file);
            let content = std::fs::read_to_string(&config_file)?;
            toml::from_str(&content)?
        } else {
            debug!("No config file found, using defaults");
            Config::default()
        };

        config.init_paths(Some(base));
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to `config.toml` under the base directory
    pub fn save(&self) -> Result<()> {
        std::fs::create_dir_all(&self.paths.base_dir)?;
        let content = toml::to_string_pretty(self)?;
        let path = self.paths.base_dir.join("config.toml");
        std::fs::write(&path, content)?;
        info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.chunk.overlap_tokens >= self.chunk.size_tokens {
            return Err(Error::Config(
                "chunk.overlap_tokens must be < chunk.size_tokens".to_string(),
            ));
        }

        if self.embedding.dimension == 0 {
            return Err(Error::Config(
                "embedding.dimension must be positive".to_string(),
            ));
        }

        for (name, v) in [
            ("retrieval.retrieve_min", self.retrieval.retrieve_min),
            ("retrieval.use_as_ctx_min", self.retrieval.use_as_ctx_min),
            ("retrieval.min_top3_avg", self.retrieval.min_top3_avg),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(Error::Config(format!(
                    "{} must be between 0.0 and 1.0",
                    name
                )));
            }
        }

        if self.ingest.insert_concurrency == 0 {
            return Err(Error::Config(
                "ingest.insert_concurrency must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Effective chunk cap for one ingestion
    pub fn effective_chunk_cap(&self) -> usize {
        if self.ingest.fast_mode {
            fast_mode_chunk_cap()
        } else {
            self.chunk.max_chunks_emb
        }
    }

    /// Effective per-table row-embedding cap
    pub fn effective_row_cap(&self) -> usize {
        if self.ingest.fast_mode {
            0
        } else {
            self.ingest.max_table_rows_emb
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.embedding.dimension, 1024);
        assert_eq!(config.chunk.size_tokens, 800);
        assert_eq!(config.chunk.overlap_tokens, 120);
        assert_eq!(config.retrieval.text_k, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_save_load() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        config.retrieval.table_k = 17;

        config.save().unwrap();
        let loaded = Config::load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(loaded.retrieval.table_k, 17);
        assert_eq!(loaded.paths.db_file, tmp.path().join("docent.db"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        // Invalid: overlap >= window
        config.chunk.overlap_tokens = config.chunk.size_tokens;
        assert!(config.validate().is_err());

        config.chunk.overlap_tokens = 120;
        assert!(config.validate().is_ok());

        config.retrieval.use_as_ctx_min = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fast_mode_caps() {
        let mut config = Config::default();
        config.chunk.max_chunks_emb = 100;
        config.ingest.max_table_rows_emb = 50;
        assert_eq!(config.effective_chunk_cap(), 100);
        assert_eq!(config.effective_row_cap(), 50);

        config.ingest.fast_mode = true;
        assert_eq!(config.effective_chunk_cap(), 24);
        assert_eq!(config.effective_row_cap(), 0);
    }
}
