//! Provider-fallback contact extraction.
//!
//! An ordered list of providers is tried by priority. Each provider owns its
//! own pacer; persistent failures degrade a provider until it is skipped, and
//! only an explicit system reset brings it back. One extraction issues calls
//! strictly sequentially.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use mailsift_contacts::ContactRecord;

use crate::any::AnyProvider;
use crate::chunk::{self, ChunkConfig};
use crate::error::LlmError;
use crate::pacing::{OutcomeKind, PacingConfig, PacingStats, RateLimiter};
use crate::provider::ChatProvider;

const SYSTEM_PROMPT: &str = "You extract contact and commercial-offer data from email text. \
Reply with a single JSON object and nothing else. \
Use empty strings for fields you cannot find; never invent values. \
The reply must match this schema:";

/// Per-extraction metadata. Its presence is the production switch: a call
/// without metadata is a dry run and never reaches a provider.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailMeta {
    pub from: String,
    pub subject: String,
    pub date: String,
    pub thread_id: String,
}

/// What the model is asked to produce. `contacts` is required: a response
/// without it is a parse error and takes the same fallback path as a failed
/// call.
#[derive(Debug, Deserialize, JsonSchema)]
struct ExtractionPayload {
    contacts: Vec<ContactRecord>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ExtractionResult {
    pub success: bool,
    pub contacts: Vec<ContactRecord>,
    pub provider_used: String,
    pub text_length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Static description of one configured provider.
#[derive(Clone, Debug)]
pub struct ProviderSpec {
    pub id: String,
    /// Lower value means tried first.
    pub priority: u32,
    pub max_failures_before_skip: u32,
}

struct ProviderSlot {
    id: String,
    priority: u32,
    active: bool,
    failure_count: u32,
    max_failures: u32,
    limiter: RateLimiter,
    provider: AnyProvider,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderState {
    Healthy,
    Degraded,
    Skipped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallHealth {
    Healthy,
    Degraded,
    Critical,
}

#[derive(Clone, Debug, Serialize)]
pub struct ProviderStatus {
    pub id: String,
    pub status: ProviderState,
    pub failure_count: u32,
    pub active: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct ProviderHealth {
    pub overall: OverallHealth,
    pub providers: Vec<ProviderStatus>,
    pub recommendations: Vec<String>,
}

pub struct FallbackExtractor {
    slots: Vec<ProviderSlot>,
    chunking: ChunkConfig,
}

impl FallbackExtractor {
    /// Build an extractor over `providers`, each paced independently with
    /// `pacing`. Providers are tried in ascending priority order.
    #[must_use]
    pub fn new(
        providers: Vec<(ProviderSpec, AnyProvider)>,
        pacing: &PacingConfig,
        chunking: ChunkConfig,
    ) -> Self {
        let mut slots: Vec<ProviderSlot> = providers
            .into_iter()
            .map(|(spec, provider)| ProviderSlot {
                id: spec.id,
                priority: spec.priority,
                active: true,
                failure_count: 0,
                max_failures: spec.max_failures_before_skip.max(1),
                limiter: RateLimiter::new(pacing.clone()),
                provider,
            })
            .collect();
        slots.sort_by_key(|s| s.priority);
        Self { slots, chunking }
    }

    #[must_use]
    pub fn provider_count(&self) -> usize {
        self.slots.len()
    }

    /// Extract contacts from `text`.
    ///
    /// Without metadata this is a dry run: the call short-circuits to a
    /// canned result tagged `Test Mode` and no provider is contacted. Long
    /// texts are chunked and the per-chunk contact lists concatenated.
    pub async fn extract(&mut self, text: &str, metadata: Option<&EmailMeta>) -> ExtractionResult {
        let text_length = text.chars().count();
        let Some(meta) = metadata else {
            return Self::test_mode_result(text_length);
        };

        let chunks = chunk::split_text(text, &self.chunking);
        if chunks.len() > 1 {
            tracing::info!(chunks = chunks.len(), text_length, "text split for extraction");
        }

        let mut contacts = Vec::new();
        let mut provider_used = String::new();
        for chunk_text in &chunks {
            match self.extract_chunk(chunk_text, meta).await {
                Ok((mut found, provider)) => {
                    contacts.append(&mut found);
                    provider_used = provider;
                }
                Err(e) => {
                    return ExtractionResult {
                        success: false,
                        contacts: Vec::new(),
                        provider_used: String::new(),
                        text_length,
                        error: Some(e.to_string()),
                    };
                }
            }
        }

        ExtractionResult {
            success: true,
            contacts,
            provider_used,
            text_length,
            error: None,
        }
    }

    /// Run one chunk through the provider chain.
    ///
    /// Attempts are hard-bounded by the summed failure budgets, so two
    /// providers configured to fail every call cost at most
    /// `2 × max_failures_before_skip` requests before the terminal error.
    async fn extract_chunk(
        &mut self,
        text: &str,
        meta: &EmailMeta,
    ) -> Result<(Vec<ContactRecord>, String), LlmError> {
        let system = system_prompt();
        let user = render_user_message(meta, text);
        let attempt_budget: u32 = self.slots.iter().map(|s| s.max_failures).sum();

        for _ in 0..attempt_budget.max(1) {
            let Some(idx) = self.current_slot() else {
                return Err(LlmError::NoProviders);
            };

            let slot = &mut self.slots[idx];
            slot.limiter.wait_if_needed().await;

            match slot.provider.complete(&system, &user).await {
                Ok(body) => match parse_payload(&body) {
                    Ok(payload) => {
                        slot.limiter.record_for(OutcomeKind::Success, Some(&slot.id));
                        tracing::info!(
                            provider = %slot.id,
                            contacts = payload.contacts.len(),
                            "extraction succeeded"
                        );
                        return Ok((payload.contacts, slot.id.clone()));
                    }
                    Err(e) => {
                        tracing::warn!(provider = %slot.id, error = %e, "payload rejected");
                        self.note_failure(idx, OutcomeKind::Failure);
                    }
                },
                Err(LlmError::RateLimited) => {
                    tracing::warn!(provider = %self.slots[idx].id, "rate limited");
                    self.note_failure(idx, OutcomeKind::RateLimited);
                }
                Err(LlmError::Timeout) => {
                    tracing::warn!(provider = %self.slots[idx].id, "request timed out");
                    self.note_failure(idx, OutcomeKind::Timeout);
                }
                Err(e) => {
                    tracing::warn!(provider = %self.slots[idx].id, error = %e, "request failed");
                    self.note_failure(idx, OutcomeKind::Failure);
                }
            }
        }

        Err(LlmError::NoProviders)
    }

    /// Index of the current provider: lowest priority value, still active.
    fn current_slot(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.active)
    }

    fn note_failure(&mut self, idx: usize, kind: OutcomeKind) {
        let slot = &mut self.slots[idx];
        slot.limiter.record_for(kind, Some(&slot.id));
        slot.failure_count += 1;
        if slot.failure_count >= slot.max_failures {
            slot.active = false;
            tracing::warn!(
                provider = %slot.id,
                failures = slot.failure_count,
                "provider skipped, falling back"
            );
        }
    }

    /// Reactivate every provider, zero failure counts, and reset the pacers.
    /// The highest-priority provider becomes current again. Takes `&mut
    /// self`, so it cannot interleave with an in-flight extraction.
    pub fn reset_system_state(&mut self) {
        for slot in &mut self.slots {
            slot.active = true;
            slot.failure_count = 0;
            slot.limiter.reset();
        }
        tracing::info!("provider state reset");
    }

    /// Read-only projection of provider state for operators. Never consulted
    /// by the fallback logic itself.
    #[must_use]
    pub fn provider_health(&self) -> ProviderHealth {
        let providers: Vec<ProviderStatus> = self
            .slots
            .iter()
            .map(|s| ProviderStatus {
                id: s.id.clone(),
                status: if !s.active {
                    ProviderState::Skipped
                } else if s.failure_count > 0 {
                    ProviderState::Degraded
                } else {
                    ProviderState::Healthy
                },
                failure_count: s.failure_count,
                active: s.active,
            })
            .collect();

        let active = providers.iter().filter(|p| p.active).count();
        let overall = if active == 0 {
            OverallHealth::Critical
        } else if providers.iter().all(|p| p.status == ProviderState::Healthy) {
            OverallHealth::Healthy
        } else {
            OverallHealth::Degraded
        };

        let mut recommendations = Vec::new();
        if active == 0 {
            recommendations
                .push("all providers exhausted: check credentials and quotas, then reset".into());
        }
        for p in &providers {
            if p.status == ProviderState::Skipped {
                recommendations.push(format!(
                    "provider {} is skipped and stays skipped until a system reset",
                    p.id
                ));
            }
        }

        ProviderHealth {
            overall,
            providers,
            recommendations,
        }
    }

    /// Pacing statistics per provider, in priority order.
    #[must_use]
    pub fn pacing_stats(&self) -> Vec<(String, PacingStats)> {
        self.slots
            .iter()
            .map(|s| (s.id.clone(), s.limiter.statistics()))
            .collect()
    }

    fn test_mode_result(text_length: usize) -> ExtractionResult {
        ExtractionResult {
            success: true,
            contacts: vec![ContactRecord {
                name: "Тестовый Контакт".into(),
                email: "test@example.com".into(),
                confidence: 1.0,
                source: "test-mode".into(),
                ..ContactRecord::default()
            }],
            provider_used: "Test Mode".into(),
            text_length,
            error: None,
        }
    }
}

fn system_prompt() -> String {
    let schema = schemars::schema_for!(ExtractionPayload);
    let schema_json =
        serde_json::to_string(&schema).unwrap_or_else(|_| r#"{"contacts": []}"#.to_owned());
    format!("{SYSTEM_PROMPT}\n{schema_json}")
}

fn render_user_message(meta: &EmailMeta, text: &str) -> String {
    format!(
        "From: {}\nSubject: {}\nDate: {}\n\n{}",
        meta.from, meta.subject, meta.date, text
    )
}

/// Parse a model response into the extraction payload.
///
/// Models occasionally wrap the object in prose or code fences; a bare
/// first-to-last-brace slice is retried before giving up.
fn parse_payload(body: &str) -> Result<ExtractionPayload, LlmError> {
    match serde_json::from_str::<ExtractionPayload>(body) {
        Ok(payload) => Ok(payload),
        Err(first_err) => {
            if let (Some(start), Some(end)) = (body.find('{'), body.rfind('}'))
                && start < end
                && let Ok(payload) = serde_json::from_str::<ExtractionPayload>(&body[start..=end])
            {
                return Ok(payload);
            }
            Err(LlmError::InvalidPayload(first_err.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::mock::{MockProvider, MockReply};

    fn fast_pacing() -> PacingConfig {
        PacingConfig {
            initial_delay: Duration::from_millis(1),
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..PacingConfig::default()
        }
    }

    fn spec(id: &str, priority: u32, max_failures: u32) -> ProviderSpec {
        ProviderSpec {
            id: id.into(),
            priority,
            max_failures_before_skip: max_failures,
        }
    }

    fn meta() -> EmailMeta {
        EmailMeta {
            from: "ivan@x.ru".into(),
            subject: "Коммерческое предложение".into(),
            date: "2024-03-01".into(),
            thread_id: "t-1".into(),
        }
    }

    fn payload_with(name: &str, email: &str) -> String {
        format!(r#"{{"contacts": [{{"name": "{name}", "email": "{email}", "confidence": 0.9}}]}}"#)
    }

    fn extractor_with(providers: Vec<(ProviderSpec, AnyProvider)>) -> FallbackExtractor {
        FallbackExtractor::new(providers, &fast_pacing(), ChunkConfig::default())
    }

    #[tokio::test]
    async fn missing_metadata_short_circuits_to_test_mode() {
        let mock = MockProvider::default();
        let counter = mock.clone();
        let mut extractor =
            extractor_with(vec![(spec("p1", 0, 3), AnyProvider::Mock(mock))]);

        let result = extractor.extract("any text", None).await;
        assert!(result.success);
        assert_eq!(result.provider_used, "Test Mode");
        assert_eq!(counter.call_count(), 0);
    }

    #[tokio::test]
    async fn happy_path_returns_contacts_and_provider() {
        let mock = MockProvider::with_replies(vec![MockReply::Text(payload_with(
            "Иван Петров",
            "ivan@x.ru",
        ))]);
        let mut extractor =
            extractor_with(vec![(spec("openrouter", 0, 3), AnyProvider::Mock(mock))]);

        let result = extractor.extract("письмо", Some(&meta())).await;
        assert!(result.success);
        assert_eq!(result.provider_used, "openrouter");
        assert_eq!(result.contacts.len(), 1);
        assert_eq!(result.contacts[0].email, "ivan@x.ru");
        assert_eq!(result.text_length, 6);
    }

    #[tokio::test]
    async fn providers_tried_in_priority_order_not_config_order() {
        let low = MockProvider::with_replies(vec![MockReply::Text(payload_with("A", "a@x.ru"))])
            .named("low");
        let high = MockProvider::default().named("high");
        let high_counter = high.clone();
        let mut extractor = extractor_with(vec![
            (spec("high", 5, 3), AnyProvider::Mock(high)),
            (spec("low", 0, 3), AnyProvider::Mock(low)),
        ]);

        let result = extractor.extract("text", Some(&meta())).await;
        assert_eq!(result.provider_used, "low");
        assert_eq!(high_counter.call_count(), 0);
    }

    #[tokio::test]
    async fn parse_error_falls_back_to_next_provider() {
        let garbled = MockProvider::with_replies(vec![MockReply::Text("not json at all".into())]);
        let healthy = MockProvider::with_replies(vec![MockReply::Text(payload_with(
            "Анна",
            "anna@y.ru",
        ))]);
        let mut extractor = extractor_with(vec![
            (spec("first", 0, 1), AnyProvider::Mock(garbled)),
            (spec("second", 1, 1), AnyProvider::Mock(healthy)),
        ]);

        let result = extractor.extract("text", Some(&meta())).await;
        assert!(result.success);
        assert_eq!(result.provider_used, "second");

        let health = extractor.provider_health();
        assert_eq!(health.overall, OverallHealth::Degraded);
        assert_eq!(health.providers[0].status, ProviderState::Skipped);
        assert_eq!(health.providers[1].status, ProviderState::Healthy);
    }

    #[tokio::test]
    async fn missing_contacts_key_is_a_parse_error() {
        let wrong_shape =
            MockProvider::with_replies(vec![MockReply::Text(r#"{"people": []}"#.into())]);
        let healthy = MockProvider::default();
        let mut extractor = extractor_with(vec![
            (spec("first", 0, 1), AnyProvider::Mock(wrong_shape)),
            (spec("second", 1, 1), AnyProvider::Mock(healthy)),
        ]);

        let result = extractor.extract("text", Some(&meta())).await;
        assert!(result.success);
        assert_eq!(result.provider_used, "second");
    }

    #[tokio::test]
    async fn provider_survives_failures_below_threshold() {
        let flaky = MockProvider::with_replies(vec![
            MockReply::RateLimited,
            MockReply::Timeout,
            MockReply::Text(payload_with("Иван", "ivan@x.ru")),
        ]);
        let counter = flaky.clone();
        let mut extractor = extractor_with(vec![(spec("only", 0, 5), AnyProvider::Mock(flaky))]);

        let result = extractor.extract("text", Some(&meta())).await;
        assert!(result.success);
        assert_eq!(result.provider_used, "only");
        assert_eq!(counter.call_count(), 3);
    }

    #[tokio::test]
    async fn exhaustion_returns_error_result_within_attempt_bound() {
        let dead_a = MockProvider::failing().named("a");
        let dead_b = MockProvider::failing().named("b");
        let count_a = dead_a.clone();
        let count_b = dead_b.clone();
        let mut extractor = extractor_with(vec![
            (spec("a", 0, 2), AnyProvider::Mock(dead_a)),
            (spec("b", 1, 2), AnyProvider::Mock(dead_b)),
        ]);

        let result = extractor.extract("text", Some(&meta())).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("no active providers"));
        assert!(result.contacts.is_empty());
        assert_eq!(count_a.call_count() + count_b.call_count(), 4);

        let health = extractor.provider_health();
        assert_eq!(health.overall, OverallHealth::Critical);
        assert!(!health.recommendations.is_empty());
    }

    #[tokio::test]
    async fn no_providers_configured_is_fatal_for_the_call() {
        let mut extractor = extractor_with(Vec::new());
        let result = extractor.extract("text", Some(&meta())).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("no active providers"));
    }

    #[tokio::test]
    async fn reset_reactivates_skipped_providers() {
        let dead = MockProvider::failing();
        let mut extractor = extractor_with(vec![(spec("only", 0, 1), AnyProvider::Mock(dead))]);

        let result = extractor.extract("text", Some(&meta())).await;
        assert!(!result.success);
        assert_eq!(extractor.provider_health().overall, OverallHealth::Critical);

        extractor.reset_system_state();
        let health = extractor.provider_health();
        assert_eq!(health.overall, OverallHealth::Healthy);
        assert!(health.providers[0].active);
        assert_eq!(health.providers[0].failure_count, 0);
    }

    #[tokio::test]
    async fn rate_limit_outcome_widens_that_providers_delay() {
        let flaky = MockProvider::with_replies(vec![
            MockReply::RateLimited,
            MockReply::Text(payload_with("Иван", "ivan@x.ru")),
        ]);
        let mut extractor = extractor_with(vec![(spec("only", 0, 5), AnyProvider::Mock(flaky))]);

        extractor.extract("text", Some(&meta())).await;
        let stats = extractor.pacing_stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].1.total_requests, 2);
    }

    #[tokio::test]
    async fn chunked_text_concatenates_contact_lists() {
        let mock = MockProvider::with_replies(vec![
            MockReply::Text(payload_with("Иван", "ivan@x.ru")),
            MockReply::Text(payload_with("Анна", "anna@y.ru")),
        ]);
        let chunking = ChunkConfig {
            max_tokens_per_chunk: 10,
            overlap_tokens: 0,
            max_chunks_per_text: 2,
        };
        let mut extractor = FallbackExtractor::new(
            vec![(spec("only", 0, 3), AnyProvider::Mock(mock))],
            &fast_pacing(),
            chunking,
        );

        let text = "x".repeat(80);
        let result = extractor.extract(&text, Some(&meta())).await;
        assert!(result.success);
        assert_eq!(result.contacts.len(), 2);
        assert_eq!(result.contacts[0].name, "Иван");
        assert_eq!(result.contacts[1].name, "Анна");
    }

    #[test]
    fn parse_payload_accepts_fenced_json() {
        let body = "Here you go:\n```json\n{\"contacts\": []}\n```";
        assert!(parse_payload(body).is_ok());
    }

    #[test]
    fn parse_payload_rejects_json_without_contacts() {
        assert!(matches!(
            parse_payload(r#"{"items": []}"#),
            Err(LlmError::InvalidPayload(_))
        ));
    }

    #[test]
    fn system_prompt_embeds_payload_schema() {
        let prompt = system_prompt();
        assert!(prompt.contains("contacts"));
        assert!(prompt.contains("confidence"));
    }

    #[test]
    fn user_message_carries_metadata_header() {
        let rendered = render_user_message(&meta(), "тело письма");
        assert!(rendered.starts_with("From: ivan@x.ru\n"));
        assert!(rendered.contains("Subject: Коммерческое предложение"));
        assert!(rendered.ends_with("тело письма"));
    }
}
