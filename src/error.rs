//! Custom error types for docent

use thiserror::Error;

/// Main error type for docent operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    Input(String),

    #[error("Payload too large: {0}")]
    TooLarge(String),

    #[error("Unsupported document type: {0}")]
    UnsupportedType(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Embedding backend error: {0}")]
    EmbeddingBackend(String),

    #[error("Embedding shape error: {0}")]
    EmbeddingShape(String),

    #[error("Generation error (status {status}): {body}")]
    Generation { status: u16, body: String },

    #[error("Insert error: {0}")]
    Insert(String),

    #[error("Ingestion failed at stage '{stage}': {source}")]
    Ingest {
        stage: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Error {
    /// Tag an error with the ingestion stage it surfaced in.
    pub fn at_stage(self, stage: &str) -> Error {
        match self {
            already @ Error::Ingest { .. } => already,
            other => Error::Ingest {
                stage: stage.to_string(),
                source: Box::new(other),
            },
        }
    }
}

/// Result type alias for docent
pub type Result<T> = std::result::Result<T, Error>;
