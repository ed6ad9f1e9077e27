use arc_swap::ArcSwap;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use strainer_cache::{CacheEngine, EngineConfig};

use crate::proxy::build_engine;
use crate::upstream::UpstreamOrigin;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    pub url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Lifetime for cacheable responses that carry none. Absent disables it.
    #[serde(default = "default_ttl")]
    pub default_ttl_seconds: Option<u64>,
    #[serde(default = "default_max_body_size")]
    pub max_body_size_bytes: usize,
    #[serde(default = "default_max_store_attempts")]
    pub max_store_attempts: usize,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Config {
            server: ServerConfig::default(),
            upstream: UpstreamConfig {
                url: "http://127.0.0.1:3000".to_string(),
                timeout_ms: default_timeout_ms(),
            },
            cache: CacheConfig::default(),
        }
    }
}

impl CacheConfig {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            default_ttl: self.default_ttl_seconds.map(Duration::from_secs),
            max_store_attempts: self.max_store_attempts,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            metrics_addr: default_metrics_addr(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: default_ttl(),
            max_body_size_bytes: default_max_body_size(),
            max_store_attempts: default_max_store_attempts(),
        }
    }
}

/// Compare old and new config, apply safe changes, reject unsafe ones.
///
/// - Engine settings or upstream changed → rebuild the engine over the same
///   stores (nothing cached is lost)
/// - Listen addresses or body limit changed → WARN log, ignore (restart required)
pub fn diff_and_apply(old: &Config, new: &Config, engine: &ArcSwap<CacheEngine>) {
    if old.server.listen_addr != new.server.listen_addr
        || old.server.metrics_addr != new.server.metrics_addr
    {
        tracing::warn!("listen address change detected, ignoring. Restart to rebind");
    }
    if old.cache.max_body_size_bytes != new.cache.max_body_size_bytes {
        tracing::warn!(
            old = old.cache.max_body_size_bytes,
            new = new.cache.max_body_size_bytes,
            "body size limit change detected, ignoring. Restart to apply"
        );
    }

    let engine_changed = old.cache.default_ttl_seconds != new.cache.default_ttl_seconds
        || old.cache.max_store_attempts != new.cache.max_store_attempts;
    let upstream_changed =
        old.upstream.url != new.upstream.url || old.upstream.timeout_ms != new.upstream.timeout_ms;

    if engine_changed || upstream_changed {
        let current = engine.load();
        let rebuilt = build_engine(
            UpstreamOrigin::new(&new.upstream),
            new.cache.engine_config(),
            current.meta_store().clone(),
            current.entity_store().clone(),
        );
        engine.store(std::sync::Arc::new(rebuilt));
        tracing::info!(
            old_ttl = ?old.cache.default_ttl_seconds,
            new_ttl = ?new.cache.default_ttl_seconds,
            upstream = %new.upstream.url,
            "config reloaded: engine rebuilt, cache kept"
        );
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}
fn default_timeout_ms() -> u64 {
    5000
}
fn default_ttl() -> Option<u64> {
    None
}
fn default_max_body_size() -> usize {
    1_048_576
}
fn default_max_store_attempts() -> usize {
    16
}
