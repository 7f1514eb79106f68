//! Embedding generation
//!
//! A trait over embedding backends plus the production HTTP implementation
//! against an OpenAI-compatible `/v1/embeddings` endpoint. Outputs are not
//! assumed unit-norm; the store normalizes on insert and the router
//! normalizes before search.

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Whether a text is embedded as a stored passage or as a search query.
/// Forwarded to the backend, which applies the matching instruction prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedMode {
    Passage,
    Query,
}

impl std::fmt::Display for EmbedMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbedMode::Passage => write!(f, "passage"),
            EmbedMode::Query => write!(f, "query"),
        }
    }
}

/// Trait for embedding providers
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text
    async fn embed_one(&self, text: &str, mode: EmbedMode) -> Result<Vec<f32>>;

    /// Embed a batch of texts; output order and cardinality match the input
    async fn embed_batch(&self, texts: &[String], mode: EmbedMode) -> Result<Vec<Vec<f32>>>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

#[derive(Debug, Clone, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
    mode: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// HTTP embedder against an OpenAI-compatible backend
pub struct HttpEmbedder {
    client: Client,
    base_url: Url,
    model: String,
    dimension: usize,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base_url = Url::parse(&config.url)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url,
            model: config.model.clone(),
            dimension: config.dimension,
        })
    }

    fn endpoint(&self) -> Result<Url> {
        self.base_url
            .join("/v1/embeddings")
            .map_err(|e| Error::Config(format!("Invalid embedding backend URL: {}", e)))
    }

    fn validate_shape(&self, requested: usize, embeddings: &[Vec<f32>]) -> Result<()> {
        if embeddings.len() != requested {
            return Err(Error::EmbeddingShape(format!(
                "requested {} embeddings, backend returned {}",
                requested,
                embeddings.len()
            )));
        }
        if let Some(mismatch) = embeddings.iter().find(|v| v.len() != self.dimension) {
            return Err(Error::EmbeddingShape(format!(
                "expected dimension {}, got {}",
                self.dimension,
                mismatch.len()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed_one(&self, text: &str, mode: EmbedMode) -> Result<Vec<f32>> {
        let texts = vec![text.to_string()];
        let mut vectors = self.embed_batch(&texts, mode).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::EmbeddingShape("backend returned no embedding".to_string()))
    }

    async fn embed_batch(&self, texts: &[String], mode: EmbedMode) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mode = mode.to_string();
        let request = EmbeddingsRequest {
            model: &self.model,
            input: texts,
            mode: &mode,
        };

        let response = self
            .client
            .post(self.endpoint()?)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::EmbeddingBackend(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::EmbeddingBackend(format!(
                "backend returned {}: {}",
                status, body
            )));
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| Error::EmbeddingBackend(format!("unparsable response: {}", e)))?;

        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
        self.validate_shape(texts.len(), &vectors)?;
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_embedder(dim: usize) -> HttpEmbedder {
        let config = EmbeddingConfig {
            url: "http://127.0.0.1:9".to_string(),
            model: "test".to_string(),
            dimension: dim,
            timeout_secs: 1,
        };
        HttpEmbedder::new(&config).unwrap()
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(EmbedMode::Passage.to_string(), "passage");
        assert_eq!(EmbedMode::Query.to_string(), "query");
    }

    #[test]
    fn test_validate_shape_cardinality() {
        let embedder = test_embedder(3);
        let err = embedder
            .validate_shape(2, &[vec![0.0, 0.0, 0.0]])
            .unwrap_err();
        assert!(matches!(err, Error::EmbeddingShape(_)));
    }

    #[test]
    fn test_validate_shape_dimension() {
        let embedder = test_embedder(3);
        let err = embedder
            .validate_shape(1, &[vec![0.0, 0.0]])
            .unwrap_err();
        assert!(matches!(err, Error::EmbeddingShape(_)));
        assert!(embedder.validate_shape(1, &[vec![0.0; 3]]).is_ok());
    }

    #[tokio::test]
    async fn test_empty_batch_skips_network() {
        // An unroutable backend URL: this only passes because no call is made.
        let embedder = test_embedder(3);
        let out = embedder.embed_batch(&[], EmbedMode::Passage).await.unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{"data":[{"embedding":[0.1,0.2]},{"embedding":[0.3,0.4]}]}"#;
        let parsed: EmbeddingsResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.data.len(), 2);
        assert_eq!(parsed.data[1].embedding, vec![0.3, 0.4]);
    }
}
