use agents::{RequestLimits, RetryPolicy};
use anyhow::{Context, Result};
use pipeline::Pricing;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use syllabus::SyllabusPaths;

const ENV_PREFIX: &str = "EXAMPREP_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub retry: RetryConfig,
    pub pricing: Pricing,
    pub limits: RequestLimits,
    pub syllabus: SyllabusPaths,
    pub cache: CacheConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    pub model: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig {
                base_url: "http://localhost:11434".to_string(),
                model: "llama3".to_string(),
                request_timeout_secs: 120,
            },
            retry: RetryConfig {
                max_retries: 3,
                initial_backoff_ms: 1000,
                max_backoff_ms: 10000,
            },
            pricing: Pricing::default(),
            limits: RequestLimits::default(),
            syllabus: SyllabusPaths::default(),
            cache: CacheConfig {
                enabled: true,
                max_entries: 1000,
            },
            server: ServerConfig {
                bind_addr: "0.0.0.0:3000".to_string(),
            },
        }
    }
}

fn override_with<T, F>(lookup: &F, key: &str, target: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let name = format!("{}{}", ENV_PREFIX, key);
    if let Some(raw) = lookup(&name) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("Invalid value for {}: {:?}", name, raw))?;
    }
    Ok(())
}

impl AppConfig {
    /// Defaults, overridden by `EXAMPREP_*` variables (a `.env` file is honoured).
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        override_with(&lookup, "BACKEND_URL", &mut config.backend.base_url)?;
        override_with(&lookup, "MODEL", &mut config.backend.model)?;
        override_with(&lookup, "TIMEOUT_SECS", &mut config.backend.request_timeout_secs)?;

        override_with(&lookup, "MAX_RETRIES", &mut config.retry.max_retries)?;
        override_with(&lookup, "INITIAL_BACKOFF_MS", &mut config.retry.initial_backoff_ms)?;
        override_with(&lookup, "MAX_BACKOFF_MS", &mut config.retry.max_backoff_ms)?;

        override_with(&lookup, "INPUT_RATE_PER_1K", &mut config.pricing.input_rate_per_1k)?;
        override_with(&lookup, "OUTPUT_RATE_PER_1K", &mut config.pricing.output_rate_per_1k)?;
        override_with(&lookup, "CURRENCY_RATE", &mut config.pricing.currency_conversion_rate)?;

        override_with(&lookup, "MIN_SOURCE_CHARS", &mut config.limits.min_source_chars)?;
        override_with(&lookup, "MAX_SOURCE_CHARS", &mut config.limits.max_source_chars)?;

        override_with::<PathBuf, _>(&lookup, "PRELIMS_SYLLABUS", &mut config.syllabus.prelims_path)?;
        override_with::<PathBuf, _>(&lookup, "MAINS_SYLLABUS", &mut config.syllabus.mains_path)?;

        override_with(&lookup, "CACHE_ENABLED", &mut config.cache.enabled)?;
        override_with(&lookup, "CACHE_MAX_ENTRIES", &mut config.cache.max_entries)?;

        override_with(&lookup, "BIND_ADDR", &mut config.server.bind_addr)?;

        if config.limits.min_source_chars > config.limits.max_source_chars {
            anyhow::bail!(
                "{}MIN_SOURCE_CHARS ({}) exceeds {}MAX_SOURCE_CHARS ({})",
                ENV_PREFIX,
                config.limits.min_source_chars,
                ENV_PREFIX,
                config.limits.max_source_chars
            );
        }

        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_retries,
            self.retry.initial_backoff_ms,
            self.retry.max_backoff_ms,
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.request_timeout_secs)
    }
}
