//! TOML configuration surface.
//!
//! Mirrors the recognized options of the orchestrator: symbol universe,
//! benchmark, per-horizon cache TTL overrides and the bounds on errors,
//! memoization and history. Everything is optional; absent values fall
//! back to the defaults baked into [`OrchestratorConfig`].

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;

use crate::core::types::Horizon;
use crate::orchestrator::OrchestratorConfig;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    pub symbols: Option<Vec<String>>,
    pub benchmark: Option<String>,
    pub cache: Option<CacheConfig>,
    pub limits: Option<LimitsConfig>,
}

/// Per-horizon result-cache TTLs in milliseconds.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct CacheConfig {
    pub ttl_1m_ms: Option<u64>,
    pub ttl_5m_ms: Option<u64>,
    pub ttl_15m_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LimitsConfig {
    pub max_errors: Option<u64>,
    pub max_cache_size: Option<usize>,
    pub max_history_size: Option<usize>,
}

/// Load the base configuration from `config/base.toml`.
pub fn load_base() -> Result<AppConfig> {
    let s = fs::read_to_string("config/base.toml").context("reading config/base.toml")?;
    let cfg: AppConfig = toml::from_str(&s).context("parsing config/base.toml")?;
    Ok(cfg)
}

impl AppConfig {
    /// Fold the file values over the built-in defaults.
    pub fn into_orchestrator_config(self) -> OrchestratorConfig {
        let defaults = OrchestratorConfig::default();
        let mut ttl_overrides = HashMap::new();
        if let Some(cache) = &self.cache {
            if let Some(ttl) = cache.ttl_1m_ms {
                ttl_overrides.insert(Horizon::OneMinute, ttl);
            }
            if let Some(ttl) = cache.ttl_5m_ms {
                ttl_overrides.insert(Horizon::FiveMinute, ttl);
            }
            if let Some(ttl) = cache.ttl_15m_ms {
                ttl_overrides.insert(Horizon::FifteenMinute, ttl);
            }
        }
        let limits = self.limits.unwrap_or_default();
        OrchestratorConfig {
            symbols: self.symbols.unwrap_or_default(),
            benchmark: self.benchmark.unwrap_or(defaults.benchmark),
            ttl_overrides,
            max_errors: limits.max_errors.unwrap_or(defaults.max_errors),
            max_cache_size: limits.max_cache_size.unwrap_or(defaults.max_cache_size),
            max_history_size: limits.max_history_size.unwrap_or(defaults.max_history_size),
        }
    }
}
