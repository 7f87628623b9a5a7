use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use mailsift_contacts::DedupConfig;
use mailsift_llm::chunk::ChunkConfig;
use mailsift_llm::pacing::PacingConfig;

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub extraction: ExtractionSettings,
    pub pacing: PacingSettings,
    pub dedup: DedupSettings,
    pub providers: Vec<ProviderEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    pub request_timeout_secs: u64,
    pub max_tokens_per_chunk: usize,
    pub overlap_tokens: usize,
    pub max_chunks_per_text: usize,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        let chunking = ChunkConfig::default();
        Self {
            request_timeout_secs: 30,
            max_tokens_per_chunk: chunking.max_tokens_per_chunk,
            overlap_tokens: chunking.overlap_tokens,
            max_chunks_per_text: chunking.max_chunks_per_text,
        }
    }
}

impl ExtractionSettings {
    #[must_use]
    pub fn chunking(&self) -> ChunkConfig {
        ChunkConfig {
            max_tokens_per_chunk: self.max_tokens_per_chunk,
            overlap_tokens: self.overlap_tokens,
            max_chunks_per_text: self.max_chunks_per_text,
        }
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PacingSettings {
    pub initial_delay_secs: f64,
    pub min_delay_secs: f64,
    pub max_delay_secs: f64,
    pub increase_factor: f64,
    pub decrease_factor: f64,
    pub stable_period: u32,
}

impl Default for PacingSettings {
    fn default() -> Self {
        Self {
            initial_delay_secs: 30.0,
            min_delay_secs: 10.0,
            max_delay_secs: 120.0,
            increase_factor: 1.5,
            decrease_factor: 0.8,
            stable_period: 5,
        }
    }
}

impl PacingSettings {
    #[must_use]
    pub fn to_pacing(&self) -> PacingConfig {
        PacingConfig {
            initial_delay: Duration::from_secs_f64(self.initial_delay_secs),
            min_delay: Duration::from_secs_f64(self.min_delay_secs),
            max_delay: Duration::from_secs_f64(self.max_delay_secs),
            increase_factor: self.increase_factor,
            decrease_factor: self.decrease_factor,
            stable_period: self.stable_period,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DedupSettings {
    pub similarity_threshold: f64,
    pub name_weight: f64,
    pub organization_weight: f64,
    pub position_weight: f64,
}

impl Default for DedupSettings {
    fn default() -> Self {
        let config = DedupConfig::default();
        Self {
            similarity_threshold: config.similarity_threshold,
            name_weight: config.name_weight,
            organization_weight: config.organization_weight,
            position_weight: config.position_weight,
        }
    }
}

impl DedupSettings {
    #[must_use]
    pub fn to_dedup(&self) -> DedupConfig {
        DedupConfig {
            similarity_threshold: self.similarity_threshold,
            name_weight: self.name_weight,
            organization_weight: self.organization_weight,
            position_weight: self.position_weight,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEntry {
    pub id: String,
    #[serde(default)]
    pub priority: u32,
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key. Keys never
    /// appear in the config file itself.
    pub api_key_env: String,
    #[serde(default = "default_max_failures")]
    pub max_failures_before_skip: u32,
    #[serde(default = "default_provider_max_tokens")]
    pub max_tokens: u32,
}

fn default_max_failures() -> u32 {
    3
}

fn default_provider_max_tokens() -> u32 {
    4096
}

impl Default for Config {
    fn default() -> Self {
        Self {
            extraction: ExtractionSettings::default(),
            pacing: PacingSettings::default(),
            dedup: DedupSettings::default(),
            providers: vec![
                ProviderEntry {
                    id: "openrouter".into(),
                    priority: 0,
                    base_url: "https://openrouter.ai/api/v1".into(),
                    model: "meta-llama/llama-3.3-70b-instruct".into(),
                    api_key_env: "MAILSIFT_OPENROUTER_API_KEY".into(),
                    max_failures_before_skip: 3,
                    max_tokens: 4096,
                },
                ProviderEntry {
                    id: "groq".into(),
                    priority: 1,
                    base_url: "https://api.groq.com/openai/v1".into(),
                    model: "llama-3.3-70b-versatile".into(),
                    api_key_env: "MAILSIFT_GROQ_API_KEY".into(),
                    max_failures_before_skip: 3,
                    max_tokens: 4096,
                },
            ],
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to built-in defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("MAILSIFT_MODEL") {
            for provider in &mut self.providers {
                provider.model.clone_from(&v);
            }
        }
        if let Ok(v) = std::env::var("MAILSIFT_BASE_URL") {
            for provider in &mut self.providers {
                provider.base_url.clone_from(&v);
            }
        }
        if let Ok(v) = std::env::var("MAILSIFT_SIMILARITY_THRESHOLD")
            && let Ok(threshold) = v.parse::<f64>()
        {
            self.dedup.similarity_threshold = threshold;
        }
        if let Ok(v) = std::env::var("MAILSIFT_REQUEST_TIMEOUT_SECS")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.extraction.request_timeout_secs = secs;
        }
    }

    /// Sanity-check value ranges before any provider is built.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting found.
    pub fn validate(&self) -> anyhow::Result<()> {
        let p = &self.pacing;
        anyhow::ensure!(
            p.min_delay_secs > 0.0 && p.min_delay_secs <= p.max_delay_secs,
            "pacing delays must satisfy 0 < min <= max"
        );
        anyhow::ensure!(
            p.initial_delay_secs >= p.min_delay_secs && p.initial_delay_secs <= p.max_delay_secs,
            "pacing initial delay must lie between min and max"
        );
        anyhow::ensure!(
            p.increase_factor > 1.0,
            "pacing increase_factor must be greater than 1"
        );
        anyhow::ensure!(
            p.decrease_factor > 0.0 && p.decrease_factor < 1.0,
            "pacing decrease_factor must lie in (0, 1)"
        );
        anyhow::ensure!(p.stable_period > 0, "pacing stable_period must be positive");

        let d = &self.dedup;
        anyhow::ensure!(
            (0.0..=1.0).contains(&d.similarity_threshold),
            "dedup similarity_threshold must lie in [0, 1]"
        );
        anyhow::ensure!(
            d.name_weight >= 0.0
                && d.organization_weight >= 0.0
                && d.position_weight >= 0.0
                && d.name_weight + d.organization_weight + d.position_weight > 0.0,
            "dedup weights must be non-negative with a positive sum"
        );

        anyhow::ensure!(
            self.extraction.max_tokens_per_chunk > 0,
            "extraction max_tokens_per_chunk must be positive"
        );
        anyhow::ensure!(
            self.extraction.max_chunks_per_text > 0,
            "extraction max_chunks_per_text must be positive"
        );
        anyhow::ensure!(!self.providers.is_empty(), "at least one provider required");
        Ok(())
    }
}
