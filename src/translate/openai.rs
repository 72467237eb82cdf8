use std::time::Duration;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::TranslateConfig;
use crate::error::{Result, DeckError};
use crate::translate::{BatchRequest, TranslationBackend};

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// Translation backend speaking the OpenAI chat-completions protocol.
/// Works against api.openai.com or any compatible endpoint.
pub struct OpenAiBackend {
    client: Client,
    config: TranslateConfig,
    api_key: String,
}

impl OpenAiBackend {
    /// Build a backend reading the API key from `OPENAI_API_KEY`.
    pub fn from_env(config: TranslateConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| DeckError::Config("OPENAI_API_KEY is not set".to_string()))?;
        Ok(Self::new(config, api_key))
    }

    pub fn new(config: TranslateConfig, api_key: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("HTTP client creation should not fail");

        Self { client, config, api_key }
    }
}

#[async_trait]
impl TranslationBackend for OpenAiBackend {
    async fn translate_batch(&self, request: &BatchRequest) -> Result<String> {
        let body = json!({
            "model": self.config.model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "user", "content": request.prompt }
            ],
        });

        let url = format!(
            "{}/chat/completions",
            self.config.endpoint.trim_end_matches('/')
        );

        debug!("Sending batch of {} units to {}", request.items.len(), url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| DeckError::Translation(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(DeckError::Translation(format!(
                "Backend API error {}: {}",
                status, error_text
            )));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| DeckError::Translation(format!("Failed to parse response: {}", e)))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(DeckError::Translation(
                "Empty translation response received".to_string(),
            ));
        }

        Ok(content)
    }
}
