use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeckError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Document extraction error: {0}")]
    Extraction(String),

    #[error("Translation error: {0}")]
    Translation(String),

    #[error("Job processing error: {0}")]
    Job(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Document error: {0}")]
    Document(String),

    #[error("Job not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, DeckError>;
