use std::collections::HashMap;
use std::sync::Arc;
use futures::future::join_all;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::job::TargetLanguage;
use crate::translate::{BatchItem, BatchRequest, TranslationBackend};
use crate::usage::TokenCounter;

/// Expected shape of a batch response payload.
#[derive(Debug, Deserialize)]
struct TranslationList {
    translations: Vec<TranslationItem>,
}

#[derive(Debug, Deserialize)]
struct TranslationItem {
    id: String,
    translated: String,
}

/// Per-unit result. A fallback carries the original source text, so a
/// failed batch degrades to a no-op instead of losing content.
#[derive(Debug, Clone, PartialEq)]
pub enum TranslationOutcome {
    Translated(String),
    Fallback(String),
}

impl TranslationOutcome {
    pub fn into_text(self) -> String {
        match self {
            Self::Translated(text) | Self::Fallback(text) => text,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }
}

/// Token usage accumulated across all batches of one translation run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatchUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Full result of translating one unit list.
#[derive(Debug, Clone)]
pub struct BatchTranslation {
    /// Same length as the input; originally-empty entries stay empty.
    pub texts: Vec<String>,
    pub fallback_count: usize,
    pub usage: BatchUsage,
}

/// Partitions unit lists into fixed-size batches, fans the batches out
/// to the backend concurrently, and reassembles results in the
/// original input order.
pub struct BatchTranslator {
    backend: Arc<dyn TranslationBackend>,
    batch_size: usize,
    counter: TokenCounter,
}

impl BatchTranslator {
    pub fn new(backend: Arc<dyn TranslationBackend>, batch_size: usize, model: &str) -> Self {
        Self {
            backend,
            batch_size: batch_size.max(1),
            counter: TokenCounter::new(model),
        }
    }

    /// Translate every non-empty entry of `texts`. Never fails: a
    /// backend error or unusable response falls back to the source
    /// text for the affected units only.
    pub async fn translate_all(
        &self,
        texts: &[String],
        target: TargetLanguage,
    ) -> BatchTranslation {
        if texts.is_empty() {
            return BatchTranslation {
                texts: Vec::new(),
                fallback_count: 0,
                usage: BatchUsage::default(),
            };
        }

        // Ids are assigned before batching, from the pre-filter index.
        let mut items = Vec::new();
        let mut original_indices = Vec::new();
        for (index, text) in texts.iter().enumerate() {
            if !text.trim().is_empty() {
                items.push(BatchItem {
                    id: format!("text_{}", index),
                    text: text.trim().to_string(),
                });
                original_indices.push(index);
            }
        }

        let mut result = vec![String::new(); texts.len()];
        if items.is_empty() {
            return BatchTranslation {
                texts: result,
                fallback_count: 0,
                usage: BatchUsage::default(),
            };
        }

        let batches: Vec<Vec<BatchItem>> = items
            .chunks(self.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();

        debug!("Translating {} units in {} batches", items.len(), batches.len());

        let batch_results = join_all(
            batches
                .into_iter()
                .map(|batch| self.translate_batch(batch, target)),
        )
        .await;

        let mut usage = BatchUsage::default();
        let mut fallback_count = 0;
        let mut outcomes = Vec::with_capacity(items.len());
        for (batch_outcomes, batch_usage) in batch_results {
            usage.input_tokens += batch_usage.input_tokens;
            usage.output_tokens += batch_usage.output_tokens;
            outcomes.extend(batch_outcomes);
        }

        for (outcome, &index) in outcomes.into_iter().zip(original_indices.iter()) {
            if outcome.is_fallback() {
                fallback_count += 1;
            }
            result[index] = outcome.into_text();
        }

        BatchTranslation {
            texts: result,
            fallback_count,
            usage,
        }
    }

    async fn translate_batch(
        &self,
        items: Vec<BatchItem>,
        target: TargetLanguage,
    ) -> (Vec<TranslationOutcome>, BatchUsage) {
        let prompt = build_batch_prompt(&items, target);
        let mut usage = BatchUsage {
            input_tokens: self.counter.count_messages(&[("user", &prompt)]),
            output_tokens: 0,
        };

        let request = BatchRequest { items, target, prompt };

        match self.backend.translate_batch(&request).await {
            Ok(raw) => {
                usage.output_tokens = self.counter.count(&raw);
                (resolve_outcomes(&request.items, &raw), usage)
            }
            Err(e) => {
                warn!("Batch translation failed, keeping source text: {}", e);
                let outcomes = request
                    .items
                    .iter()
                    .map(|item| TranslationOutcome::Fallback(item.text.clone()))
                    .collect();
                (outcomes, usage)
            }
        }
    }
}

/// Map each unit to its translation from a raw payload. Any unit the
/// payload does not cover, or covers with blank text, falls back.
fn resolve_outcomes(items: &[BatchItem], raw: &str) -> Vec<TranslationOutcome> {
    match parse_translation_payload(raw) {
        Some(by_id) => items
            .iter()
            .map(|item| match by_id.get(&item.id) {
                Some(translated) if !translated.trim().is_empty() => {
                    TranslationOutcome::Translated(translated.trim().to_string())
                }
                _ => TranslationOutcome::Fallback(item.text.clone()),
            })
            .collect(),
        None => {
            warn!("Unusable translation payload, keeping source text for the batch");
            items
                .iter()
                .map(|item| TranslationOutcome::Fallback(item.text.clone()))
                .collect()
        }
    }
}

fn parse_translation_payload(raw: &str) -> Option<HashMap<String, String>> {
    let cleaned = strip_code_fences(raw.trim());
    let list: TranslationList = serde_json::from_str(cleaned).ok()?;
    Some(
        list.translations
            .into_iter()
            .map(|item| (item.id, item.translated))
            .collect(),
    )
}

/// Models sometimes wrap JSON in markdown fences despite instructions.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

fn build_batch_prompt(items: &[BatchItem], target: TargetLanguage) -> String {
    let items_json = json!(items).to_string();

    format!(
        "You are a professional translator. Please translate each text in the following list to {}. \
         Return the result as a strict JSON object.\n\
         The output format must be:\n\
         {{\n  \"translations\": [\n    {{\"id\": \"text_0\", \"translated\": \"Translated text 1\"}},\n    {{\"id\": \"text_1\", \"translated\": \"Translated text 2\"}},\n    ...\n  ]\n}}\n\
         Do not include any explanations or extra text. Only output the JSON object in the specified format.\n\
         Here is the list of items to translate (as JSON):\n{}\n",
        target.display_name(),
        items_json
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::error::{Result, DeckError};

    /// Backend that answers every unit by uppercasing its text, with
    /// the mapping emitted in reverse id order per batch.
    struct UppercaseBackend;

    #[async_trait]
    impl TranslationBackend for UppercaseBackend {
        async fn translate_batch(&self, request: &BatchRequest) -> Result<String> {
            let translations: Vec<serde_json::Value> = request
                .items
                .iter()
                .rev()
                .map(|item| json!({ "id": item.id, "translated": item.text.to_uppercase() }))
                .collect();
            Ok(json!({ "translations": translations }).to_string())
        }
    }

    /// Backend that returns a fixed payload for every batch.
    struct CannedBackend {
        payload: String,
    }

    #[async_trait]
    impl TranslationBackend for CannedBackend {
        async fn translate_batch(&self, _request: &BatchRequest) -> Result<String> {
            Ok(self.payload.clone())
        }
    }

    /// Backend that fails for batches containing a marker text.
    struct FlakyBackend {
        marker: String,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl TranslationBackend for FlakyBackend {
        async fn translate_batch(&self, request: &BatchRequest) -> Result<String> {
            *self.calls.lock().unwrap() += 1;
            if request.items.iter().any(|i| i.text == self.marker) {
                return Err(DeckError::Translation("backend unavailable".to_string()));
            }
            let translations: Vec<serde_json::Value> = request
                .items
                .iter()
                .map(|item| json!({ "id": item.id, "translated": item.text.to_uppercase() }))
                .collect();
            Ok(json!({ "translations": translations }).to_string())
        }
    }

    fn translator(backend: Arc<dyn TranslationBackend>, batch_size: usize) -> BatchTranslator {
        BatchTranslator::new(backend, batch_size, "gpt-4o-mini")
    }

    fn strings(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    #[tokio::test]
    async fn preserves_order_across_batches_and_shuffled_responses() {
        let translator = translator(Arc::new(UppercaseBackend), 2);
        let input = strings(&["alpha", "beta", "gamma", "delta", "epsilon"]);

        let result = translator.translate_all(&input, TargetLanguage::En).await;

        assert_eq!(
            result.texts,
            strings(&["ALPHA", "BETA", "GAMMA", "DELTA", "EPSILON"])
        );
        assert_eq!(result.fallback_count, 0);
        assert!(result.usage.input_tokens > 0);
        assert!(result.usage.output_tokens > 0);
    }

    #[tokio::test]
    async fn empty_entries_map_to_empty_outputs() {
        let translator = translator(Arc::new(UppercaseBackend), 10);
        let input = strings(&["one", "", "  ", "two"]);

        let result = translator.translate_all(&input, TargetLanguage::Ja).await;

        assert_eq!(result.texts, strings(&["ONE", "", "", "TWO"]));
    }

    #[tokio::test]
    async fn all_empty_input_is_not_sent_to_backend() {
        let translator = translator(
            Arc::new(CannedBackend { payload: "should never be parsed".to_string() }),
            10,
        );
        let input = strings(&["", "   "]);

        let result = translator.translate_all(&input, TargetLanguage::En).await;

        assert_eq!(result.texts, strings(&["", ""]));
        assert_eq!(result.usage, BatchUsage::default());
    }

    #[tokio::test]
    async fn invalid_json_payload_falls_back_to_source() {
        let translator = translator(
            Arc::new(CannedBackend { payload: "{ not json".to_string() }),
            10,
        );
        let input = strings(&["keep me", "and me"]);

        let result = translator.translate_all(&input, TargetLanguage::En).await;

        assert_eq!(result.texts, strings(&["keep me", "and me"]));
        assert_eq!(result.fallback_count, 2);
    }

    #[tokio::test]
    async fn missing_or_blank_ids_fall_back_per_unit() {
        let payload = json!({
            "translations": [
                { "id": "text_0", "translated": "TRANSLATED" },
                { "id": "text_1", "translated": "   " }
            ]
        })
        .to_string();
        let translator = translator(Arc::new(CannedBackend { payload }), 10);
        let input = strings(&["first", "second", "third"]);

        let result = translator.translate_all(&input, TargetLanguage::En).await;

        assert_eq!(result.texts, strings(&["TRANSLATED", "second", "third"]));
        assert_eq!(result.fallback_count, 2);
    }

    #[tokio::test]
    async fn one_failing_batch_does_not_affect_the_others() {
        let backend = Arc::new(FlakyBackend {
            marker: "poison".to_string(),
            calls: Mutex::new(0),
        });
        let translator = translator(backend.clone(), 2);
        let input = strings(&["a", "b", "poison", "d", "e"]);

        let result = translator.translate_all(&input, TargetLanguage::En).await;

        assert_eq!(result.texts, strings(&["A", "B", "poison", "d", "E"]));
        assert_eq!(result.fallback_count, 2);
        assert_eq!(*backend.calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn tolerates_code_fenced_payloads() {
        let payload = format!(
            "```json\n{}\n```",
            json!({ "translations": [ { "id": "text_0", "translated": "OK" } ] })
        );
        let translator = translator(Arc::new(CannedBackend { payload }), 10);
        let input = strings(&["source"]);

        let result = translator.translate_all(&input, TargetLanguage::En).await;

        assert_eq!(result.texts, strings(&["OK"]));
    }

    #[test]
    fn outcome_exposes_fallback_at_the_type_level() {
        let outcome = TranslationOutcome::Fallback("orig".to_string());
        assert!(outcome.is_fallback());
        assert_eq!(outcome.into_text(), "orig");
    }
}
