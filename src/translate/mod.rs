// Batched translation over an external backend.
//
// The backend seam is a single trait so the batch layer can be tested
// against canned responses: the backend receives one prompt per batch
// and returns the raw model payload, the batch layer owns prompt
// construction, response parsing, and per-unit fallback.

pub mod batch;
pub mod openai;

pub use batch::{BatchTranslation, BatchTranslator, BatchUsage, TranslationOutcome};
pub use openai::OpenAiBackend;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, DeckError};
use crate::job::TargetLanguage;

/// One unit inside a batch request. Ids follow the `text_<index>`
/// scheme, index being the unit's position in the pre-filter input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchItem {
    pub id: String,
    pub text: String,
}

/// A single backend call: the batch's items plus the rendered prompt.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub items: Vec<BatchItem>,
    pub target: TargetLanguage,
    pub prompt: String,
}

/// External translation backend. Implementations return the raw text
/// payload of the model response; parsing happens in the batch layer.
#[async_trait]
pub trait TranslationBackend: Send + Sync {
    async fn translate_batch(&self, request: &BatchRequest) -> Result<String>;
}

/// Check that the backend endpoint is reachable and the key accepted.
pub async fn check_backend_availability(endpoint: &str, api_key: &str) -> Result<()> {
    let client = Client::new();
    let url = format!("{}/models", endpoint.trim_end_matches('/'));

    let response = client
        .get(&url)
        .bearer_auth(api_key)
        .send()
        .await
        .map_err(|e| DeckError::Translation(format!("Failed to connect to backend: {}", e)))?;

    if response.status().is_success() {
        info!("Translation backend at '{}' is available", endpoint);
        Ok(())
    } else {
        Err(DeckError::Translation(format!(
            "Translation backend rejected the request: {}",
            response.status()
        )))
    }
}
