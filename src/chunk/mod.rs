//! Token-window chunking
//!
//! Splits cleaned prose into overlapping token-bounded spans. Tokenization
//! is pluggable: a HuggingFace tokenizer file when configured, otherwise a
//! deterministic whitespace tokenizer whose decode exactly reproduces the
//! token stream.

use crate::config::ChunkConfig;
use crate::error::{Error, Result};

/// One chunk with its token-span provenance
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSpan {
    pub text: String,
    pub start_tok: usize,
    pub end_tok: usize,
}

/// Tokenizer backing the chunker
pub enum ChunkTokenizer {
    Whitespace,
    HuggingFace(Box<tokenizers::Tokenizer>),
}

enum TokenStream<'a> {
    Words(Vec<&'a str>),
    Ids(Vec<u32>),
}

impl TokenStream<'_> {
    fn len(&self) -> usize {
        match self {
            TokenStream::Words(w) => w.len(),
            TokenStream::Ids(ids) => ids.len(),
        }
    }
}

impl ChunkTokenizer {
    /// Build the tokenizer the config names, falling back to whitespace.
    pub fn from_config(config: &ChunkConfig) -> Result<Self> {
        match &config.tokenizer_json {
            Some(path) => {
                let tokenizer = tokenizers::Tokenizer::from_file(path).map_err(|e| {
                    Error::Config(format!(
                        "Failed to load tokenizer {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Ok(ChunkTokenizer::HuggingFace(Box::new(tokenizer)))
            }
            None => Ok(ChunkTokenizer::Whitespace),
        }
    }

    fn encode<'a>(&self, text: &'a str) -> Result<TokenStream<'a>> {
        match self {
            ChunkTokenizer::Whitespace => Ok(TokenStream::Words(text.split_whitespace().collect())),
            ChunkTokenizer::HuggingFace(tokenizer) => {
                let encoding = tokenizer
                    .encode(text, false)
                    .map_err(|e| Error::Parse(format!("tokenizer encode failed: {}", e)))?;
                Ok(TokenStream::Ids(encoding.get_ids().to_vec()))
            }
        }
    }

    fn decode(&self, stream: &TokenStream<'_>, start: usize, end: usize) -> Result<String> {
        match (self, stream) {
            (ChunkTokenizer::Whitespace, TokenStream::Words(words)) => {
                Ok(words[start..end].join(" "))
            }
            (ChunkTokenizer::HuggingFace(tokenizer), TokenStream::Ids(ids)) => tokenizer
                .decode(&ids[start..end], true)
                .map_err(|e| Error::Parse(format!("tokenizer decode failed: {}", e))),
            _ => unreachable!("token stream produced by a different tokenizer"),
        }
    }

    /// Count tokens in a text.
    pub fn count(&self, text: &str) -> Result<usize> {
        Ok(self.encode(text)?.len())
    }

    /// Split text into `[start, start+max_tokens)` windows advancing by
    /// `max_tokens - overlap`. Empty decoded slices are discarded.
    pub fn chunk(&self, text: &str, max_tokens: usize, overlap: usize) -> Result<Vec<ChunkSpan>> {
        if max_tokens == 0 {
            return Err(Error::Config("max_tokens must be positive".to_string()));
        }
        if overlap >= max_tokens {
            return Err(Error::Config(format!(
                "overlap ({}) must be < max_tokens ({})",
                overlap, max_tokens
            )));
        }

        let stream = self.encode(text)?;
        let n = stream.len();
        if n == 0 {
            return Ok(Vec::new());
        }

        let step = max_tokens - overlap;
        let mut spans = Vec::new();
        let mut start = 0;

        while start < n {
            let end = usize::min(start + max_tokens, n);
            let decoded = self.decode(&stream, start, end)?;
            let trimmed = decoded.trim();
            if !trimmed.is_empty() {
                spans.push(ChunkSpan {
                    text: trimmed.to_string(),
                    start_tok: start,
                    end_tok: end,
                });
            }
            if end == n {
                break;
            }
            start += step;
        }

        Ok(spans)
    }
}
