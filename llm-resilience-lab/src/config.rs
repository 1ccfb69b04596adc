use anyhow::Result;
use config::{Config as ConfigLoader, Environment, File};
use llm_resilience_core::domain::duration::secs;
use llm_resilience_engine::observability::LogConfig;
use llm_resilience_engine::ResilienceSettings;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

/// A dependency polled over HTTP.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ServiceSettings {
    pub name: String,
    pub url: String,
    /// Status the endpoint must answer with; any 2xx when unset
    #[serde(default)]
    pub expected_status: Option<u16>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log: LogConfig,
    /// Prometheus scrape endpoint; disabled when unset
    pub metrics_addr: Option<SocketAddr>,
    /// How often expired error signatures are pruned
    #[serde(with = "secs")]
    pub prune_interval: Duration,
    pub services: Vec<ServiceSettings>,
    pub resilience: ResilienceSettings,
}

impl Settings {
    pub fn load() -> Result<Self> {
        let config = ConfigLoader::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("LLM_RESILIENCE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log: LogConfig::default(),
            metrics_addr: None,
            prune_interval: Duration::from_secs(3600),
            services: Vec::new(),
            resilience: ResilienceSettings::default(),
        }
    }
}
