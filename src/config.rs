//! Startup configuration: parses the TOML source registry and runtime
//! tunables into the types the rest of the crate consumes.

use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::executor::ExecutorConfig;
use crate::rate_limit::RateLimit;
use crate::retry::RetryPolicy;
use crate::source::{Capability, SchemaSummary, Source, SourceKind, SourceStatus};

#[derive(Debug, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub kind: SourceKind,
    pub uri: String,
    #[serde(default)]
    pub caps: HashSet<Capability>,
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct RateLimitConfig {
    pub burst_capacity: u32,
    pub refill_per_sec: f64,
}

impl From<RateLimitConfig> for RateLimit {
    fn from(c: RateLimitConfig) -> Self {
        RateLimit { burst_capacity: c.burst_capacity, refill_per_sec: c.refill_per_sec }
    }
}

#[derive(Debug, Deserialize)]
pub struct ExecutorSettings {
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: usize,
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_retry_cap_ms")]
    pub retry_cap_ms: u64,
    #[serde(default = "default_per_kind_ceiling_secs")]
    pub per_kind_ceiling_secs: u64,
}

fn default_max_parallelism() -> usize {
    8
}
fn default_grace_period_ms() -> u64 {
    2_000
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    100
}
fn default_retry_cap_ms() -> u64 {
    10_000
}
fn default_per_kind_ceiling_secs() -> u64 {
    30
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_parallelism: default_max_parallelism(),
            grace_period_ms: default_grace_period_ms(),
            max_attempts: default_max_attempts(),
            retry_base_ms: default_retry_base_ms(),
            retry_cap_ms: default_retry_cap_ms(),
            per_kind_ceiling_secs: default_per_kind_ceiling_secs(),
        }
    }
}

impl From<&ExecutorSettings> for ExecutorConfig {
    fn from(s: &ExecutorSettings) -> Self {
        ExecutorConfig {
            max_parallelism: s.max_parallelism,
            grace_period: Duration::from_millis(s.grace_period_ms),
            retry: RetryPolicy {
                max_attempts: s.max_attempts,
                base: Duration::from_millis(s.retry_base_ms),
                cap: Duration::from_millis(s.retry_cap_ms),
            },
            per_kind_ceiling: Duration::from_secs(s.per_kind_ceiling_secs),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OrchestratorConfig {
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub executor: ExecutorSettings,
}

impl OrchestratorConfig {
    /// # Errors
    /// Returns [`Error::ConfigInvalid`] if the document is not valid TOML
    /// for this shape. Duplicate ids or empty `uri` surface later, from
    /// [`crate::source::SourceRegistry::new`], not here.
    pub fn parse(toml_text: &str) -> Result<Self> {
        toml::from_str(toml_text).map_err(|e| Error::ConfigInvalid(e.to_string()))
    }

    #[must_use]
    pub fn sources(&self) -> Vec<Source> {
        self.sources
            .iter()
            .map(|s| Source {
                id: s.id.clone(),
                kind: s.kind,
                uri: s.uri.clone(),
                schema_summary: SchemaSummary::default(),
                caps: s.caps.clone(),
                status: SourceStatus::Unknown,
            })
            .collect()
    }
}
