use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct CueConfig {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub ring: RingConfig,
    #[serde(default)]
    pub facts: FactsConfig,
    #[serde(default)]
    pub cards: CardsConfig,
    #[serde(default)]
    pub salience: SalienceConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Realtime agent-session provider endpoint and per-agent-type models.
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub transcript_model: String,
    pub cards_model: String,
    pub facts_model: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Long-poll wait passed to the provider's event endpoint.
    #[serde(default = "default_poll_wait_seconds")]
    pub poll_wait_seconds: u64,
}

fn default_max_retries() -> usize {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_poll_wait_seconds() -> u64 {
    25
}

#[derive(Debug, Deserialize, Clone)]
pub struct RingConfig {
    pub capacity: usize,
    pub max_age_ms: i64,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            capacity: 200,
            max_age_ms: 600_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FactsConfig {
    pub capacity: usize,
    /// Confidence assumed when the provider omits one.
    pub default_confidence: f32,
    /// Quiet period after the last final chunk before the facts pass runs.
    pub debounce_ms: u64,
}

impl Default for FactsConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            default_confidence: 0.7,
            debounce_ms: 25_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CardsConfig {
    pub capacity: usize,
    /// Window within which a concept counts as "recently shown".
    pub freshness_ms: i64,
}

impl Default for CardsConfig {
    fn default() -> Self {
        Self {
            capacity: 50,
            freshness_ms: 300_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SalienceConfig {
    pub base_weight: f32,
    pub first_mention_bonus: f32,
    pub repeat_mention_cap: u32,
    pub question_cue_bonus: f32,
    pub glossary_bonus: f32,
    pub fact_bonus: f32,
    pub recency_penalty_last: f32,
    pub recency_penalty_window: f32,
    pub suppression_penalty: f32,
    pub threshold: f32,
    /// How many recent cards the weak recency penalty looks at.
    pub recent_card_window: usize,
    pub interrogatives: Vec<String>,
}

impl Default for SalienceConfig {
    fn default() -> Self {
        Self {
            base_weight: 1.0,
            first_mention_bonus: 1.0,
            repeat_mention_cap: 2,
            question_cue_bonus: 1.0,
            glossary_bonus: 0.5,
            fact_bonus: 0.5,
            recency_penalty_last: 3.0,
            recency_penalty_window: 1.5,
            suppression_penalty: 0.0,
            threshold: 2.5,
            recent_card_window: 5,
            interrogatives: [
                "what", "why", "how", "when", "where", "who", "explain",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    pub min_interval_ms: i64,
    pub window_ms: i64,
    pub max_per_window: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 30_000,
            window_ms: 120_000,
            max_per_window: 1,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    /// Upper bound on rows fetched by a single replay pass.
    pub replay_limit: i64,
    /// Upper bound on mid-run agents rebuilt at startup.
    pub resume_limit: i64,
    pub status_push_interval_ms: u64,
    pub recent_log_capacity: usize,
    /// Max age of session rows accepted by a testing start.
    pub testing_session_max_age_seconds: i64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            replay_limit: 500,
            resume_limit: 50,
            status_push_interval_ms: 5_000,
            recent_log_capacity: 50,
            testing_session_max_age_seconds: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    pub token_warning_threshold: u64,
    pub token_critical_threshold: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            token_warning_threshold: 50_000,
            token_critical_threshold: 100_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8790,
        }
    }
}

impl CueConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .build()?;
        s.try_deserialize()
    }
}
