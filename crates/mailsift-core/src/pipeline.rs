use serde::Serialize;

use mailsift_contacts::{ContactRecord, Deduplicator};
use mailsift_llm::any::AnyProvider;
use mailsift_llm::compatible::CompatibleProvider;
use mailsift_llm::extractor::{
    EmailMeta, ExtractionResult, FallbackExtractor, ProviderHealth, ProviderSpec,
};

use crate::config::Config;

/// Extraction output plus the deduplicated contact list.
#[derive(Clone, Debug, Serialize)]
pub struct PipelineReport {
    pub extraction: ExtractionResult,
    pub contacts: Vec<ContactRecord>,
}

/// Extract-then-deduplicate wiring over one extractor instance.
///
/// A pipeline is single-consumer: run several emails through one instance
/// sequentially, or give each worker its own pipeline.
pub struct Pipeline {
    extractor: FallbackExtractor,
    dedup: Deduplicator,
}

impl Pipeline {
    /// Build a pipeline from loaded configuration.
    ///
    /// Providers whose API key env var is unset are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error when no configured provider has a usable API key.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let timeout = config.extraction.request_timeout();
        let mut providers = Vec::new();
        for entry in &config.providers {
            let Ok(api_key) = std::env::var(&entry.api_key_env) else {
                tracing::warn!(
                    provider = %entry.id,
                    env = %entry.api_key_env,
                    "api key env var not set, provider skipped"
                );
                continue;
            };
            let provider = CompatibleProvider::new(
                entry.id.clone(),
                api_key,
                entry.base_url.clone(),
                entry.model.clone(),
                entry.max_tokens,
                timeout,
            );
            providers.push((
                ProviderSpec {
                    id: entry.id.clone(),
                    priority: entry.priority,
                    max_failures_before_skip: entry.max_failures_before_skip,
                },
                AnyProvider::Compatible(provider),
            ));
        }
        anyhow::ensure!(
            !providers.is_empty(),
            "no usable providers: set at least one of the configured api key env vars"
        );
        tracing::info!(providers = providers.len(), "pipeline ready");

        Ok(Self {
            extractor: FallbackExtractor::new(
                providers,
                &config.pacing.to_pacing(),
                config.extraction.chunking(),
            ),
            dedup: Deduplicator::new(config.dedup.to_dedup()),
        })
    }

    /// Assemble a pipeline from already-built parts. Used by tests and by
    /// callers that construct providers themselves.
    #[must_use]
    pub fn from_parts(extractor: FallbackExtractor, dedup: Deduplicator) -> Self {
        Self { extractor, dedup }
    }

    /// Run one email text through extraction and deduplication.
    pub async fn process(&mut self, text: &str, meta: Option<&EmailMeta>) -> PipelineReport {
        let extraction = self.extractor.extract(text, meta).await;
        let contacts = self.dedup.deduplicate(extraction.contacts.clone());
        PipelineReport {
            extraction,
            contacts,
        }
    }

    /// Deduplicate an externally produced record list (CLI `dedup`).
    #[must_use]
    pub fn deduplicate(&self, records: Vec<ContactRecord>) -> Vec<ContactRecord> {
        self.dedup.deduplicate(records)
    }

    #[must_use]
    pub fn health(&self) -> ProviderHealth {
        self.extractor.provider_health()
    }

    pub fn reset_system_state(&mut self) {
        self.extractor.reset_system_state();
    }
}
