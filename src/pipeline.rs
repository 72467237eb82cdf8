use std::sync::Arc;
use async_trait::async_trait;
use tracing::info;

use crate::collector::collect_units;
use crate::config::TranslateConfig;
use crate::document::DocumentStore;
use crate::error::Result;
use crate::job::JobRequest;
use crate::translate::{BatchTranslator, TranslationBackend};
use crate::usage::UsageMetrics;

/// What a finished pipeline run reports back to the scheduler.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub pages: usize,
    pub text_count: usize,
    pub usage: UsageMetrics,
}

/// The work done for one admitted job. A trait seam so the scheduler
/// can be exercised without documents or a backend.
#[async_trait]
pub trait JobPipeline: Send + Sync {
    async fn run(&self, request: &JobRequest) -> Result<PipelineOutput>;
}

/// Production pipeline: load, collect, translate, write back, save.
pub struct TranslationPipeline {
    store: Arc<dyn DocumentStore>,
    translator: BatchTranslator,
    model: String,
}

impl TranslationPipeline {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        backend: Arc<dyn TranslationBackend>,
        config: &TranslateConfig,
    ) -> Self {
        Self {
            store,
            translator: BatchTranslator::new(backend, config.batch_size, &config.model),
            model: config.model.clone(),
        }
    }
}

#[async_trait]
impl JobPipeline for TranslationPipeline {
    async fn run(&self, request: &JobRequest) -> Result<PipelineOutput> {
        let mut document = self.store.load(&request.input_path)?;
        let pages = document.page_count();
        let units = collect_units(&document);

        if units.is_empty() {
            info!("Document has no translatable text, saving unchanged copy");
            self.store.save(&document, &request.output_path)?;
            return Ok(PipelineOutput {
                pages,
                text_count: 0,
                usage: UsageMetrics::zero(&self.model),
            });
        }

        let texts: Vec<String> = units.iter().map(|unit| unit.text.clone()).collect();
        let translation = self
            .translator
            .translate_all(&texts, request.target_lang)
            .await;

        // Blank results never blank a slot; slots keep their source text.
        let mut applied = 0;
        for (unit, translated) in units.iter().zip(translation.texts.iter()) {
            if !translated.trim().is_empty() {
                document.set_slot_text(&unit.slot, translated.clone())?;
                applied += 1;
            }
        }

        info!(
            "Applied {}/{} translations ({} fallbacks) across {} pages",
            applied, units.len(), translation.fallback_count, pages
        );

        self.store.save(&document, &request.output_path)?;

        Ok(PipelineOutput {
            pages,
            text_count: applied,
            usage: UsageMetrics::from_counts(
                &self.model,
                translation.usage.input_tokens,
                translation.usage.output_tokens,
            ),
        })
    }
}
