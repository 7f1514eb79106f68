//! Default values for configuration
//!
//! Every recognized environment variable is read here so that a bare
//! `docent serve` picks up the deployment environment without a config file.

use std::path::PathBuf;

fn env_or(key: &str, fallback: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| fallback.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

fn env_flag(key: &str, fallback: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => fallback,
    }
}

/// Default embedding backend URL
pub fn default_emb_url() -> String {
    env_or("EMB_URL", "http://127.0.0.1:8001")
}

/// Default embedding model identifier
pub fn default_emb_model() -> String {
    env_or("EMB_MODEL", "BAAI/bge-m3")
}

/// Default embedding dimension (bge-m3)
pub fn default_emb_dimension() -> usize {
    env_parse("EMB_DIM", 1024)
}

/// Default embedding request timeout in seconds
pub fn default_emb_timeout_secs() -> u64 {
    30
}

/// Default generation backend URL
pub fn default_llm_url() -> String {
    env_or("LLM_URL", "http://127.0.0.1:8002")
}

/// Default generation model identifier
pub fn default_llm_model() -> String {
    env_or("LLM_MODEL", "llama31-8b-instruct")
}

/// Default generation request timeout in seconds
pub fn default_llm_timeout_secs() -> u64 {
    120
}

/// Default maximum generated tokens per answer
pub fn default_max_new_tokens() -> u32 {
    env_parse("MAX_NEW_TOKENS", 600)
}

/// Default sampling temperature
pub fn default_temperature() -> f32 {
    0.2
}

/// Default nucleus sampling cutoff
pub fn default_top_p() -> f32 {
    0.9
}

/// Default chunk window in tokens
pub fn default_chunk_size_tokens() -> usize {
    env_parse("CHUNK_SIZE_TOKENS", 800)
}

/// Default chunk overlap in tokens
pub fn default_chunk_overlap_tokens() -> usize {
    env_parse("CHUNK_OVERLAP_TOKENS", 120)
}

/// Default cap on chunks embedded per upload (0 = unlimited)
pub fn default_max_chunks_emb() -> usize {
    env_parse("MAX_CHUNKS_EMB", 0)
}

/// Optional HuggingFace tokenizer.json path for the chunker
pub fn default_tokenizer_json() -> Option<PathBuf> {
    std::env::var("TOKENIZER_JSON").ok().map(PathBuf::from)
}

/// Default: fast mode disabled
pub fn default_fast_mode() -> bool {
    env_flag("FAST_MODE", false)
}

/// Default: page rasterization disabled
pub fn default_render_pages() -> bool {
    env_flag("RENDER_PAGES", false)
}

/// Default rasterization DPI
pub fn default_render_dpi() -> u32 {
    env_parse("RENDER_DPI", 144)
}

/// Default: table indexing enabled
pub fn default_enable_table_index() -> bool {
    env_flag("ENABLE_TABLE_INDEX", true)
}

/// Default per-table cap on embedded rows (0 disables row embedding)
pub fn default_max_table_rows_emb() -> usize {
    env_parse("MAX_TABLE_ROWS_EMB", 200)
}

/// Default last page on which captions are still embedded
pub fn default_max_caption_pages() -> i64 {
    env_parse("MAX_CAPTION_PAGES", 30)
}

/// Chunk cap applied when fast mode is on
pub fn fast_mode_chunk_cap() -> usize {
    24
}

/// Optional external HWP-to-text converter
pub fn default_hwp2txt_exe() -> Option<String> {
    std::env::var("HWP2TXT_EXE").ok()
}

/// Default parser subprocess interpreter
pub fn default_parser_python() -> String {
    env_or("PARSER_PYTHON", "python3")
}

/// Default parser subprocess script
pub fn default_parser_script() -> String {
    env_or("PARSER_SCRIPT", "parser/extract.py")
}

/// Default parser subprocess deadline in seconds
pub fn default_parser_timeout_secs() -> u64 {
    env_parse("PARSER_TIMEOUT_SECS", 120)
}

/// Default retrieval floor shared by all slices
pub fn default_retrieve_min() -> f32 {
    env_parse("RETRIEVE_MIN", 0.35)
}

/// Default single-hit confidence threshold for document mode
pub fn default_use_as_ctx_min() -> f32 {
    env_parse("USE_AS_CTX_MIN", 0.60)
}

/// Default top-3 average threshold for document mode
pub fn default_min_top3_avg() -> f32 {
    env_parse("MIN_TOP3_AVG", 0.55)
}

/// Default prose slice size
pub fn default_text_k() -> usize {
    env_parse("TEXT_K", 5)
}

/// Default table-row slice size
pub fn default_table_k() -> usize {
    env_parse("TABLE_K", 10)
}

/// Default image-caption slice size
pub fn default_image_k() -> usize {
    env_parse("IMAGE_K", 4)
}

/// Per-fragment character budget in composed context
pub fn default_snippet_chars() -> usize {
    1600
}

/// Total character budget of composed context
pub fn default_max_ctx_chars() -> usize {
    4000
}

/// Conversation turns kept when generating
pub fn default_history_max_turns() -> usize {
    50
}

/// Default bind host
pub fn default_host() -> String {
    env_or("HOST", "0.0.0.0")
}

/// Default bind port
pub fn default_port() -> u16 {
    env_parse("PORT", 8000)
}

/// Default upload size limit (100 MB)
pub fn default_max_upload_bytes() -> usize {
    100 * 1024 * 1024
}

/// Default question length limit
pub fn default_max_question_chars() -> usize {
    8000
}

/// Concurrent fragment inserts per ingestion
pub fn default_insert_concurrency() -> usize {
    8
}
