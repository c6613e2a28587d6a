//! Controller configuration

use anyhow::{Context, Result};
use optimizer_lib::EngineConfig;
use serde::Deserialize;
use std::time::Duration;

/// Environment prefix, e.g. `K20S_API_PORT=9000`
pub const ENV_PREFIX: &str = "K20S";

/// Controller configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ControllerConfig {
    /// Base URL of the Prometheus server
    #[serde(default = "default_prometheus_url")]
    pub prometheus_url: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Re-evaluation interval in seconds
    #[serde(default = "default_evaluation_interval")]
    pub evaluation_interval_secs: u64,

    /// Timeout of one Prometheus query in seconds
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,

    /// Only watch profiles in this namespace; all namespaces when unset
    #[serde(default)]
    pub watch_namespace: Option<String>,
}

fn default_prometheus_url() -> String {
    // Honour the unprefixed variable deployments already set.
    std::env::var("PROMETHEUS_URL")
        .unwrap_or_else(|_| "http://prometheus-k8s.monitoring.svc.cluster.local:9090".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_evaluation_interval() -> u64 {
    300
}

fn default_query_timeout() -> u64 {
    30
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            prometheus_url: default_prometheus_url(),
            api_port: default_api_port(),
            evaluation_interval_secs: default_evaluation_interval(),
            query_timeout_secs: default_query_timeout(),
            watch_namespace: None,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from `K20S_*` environment variables
    pub fn load() -> Result<Self> {
        Self::from_source(config::Environment::with_prefix(ENV_PREFIX))
    }

    fn from_source<S>(source: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config = config::Config::builder()
            .add_source(source)
            .build()
            .context("Failed to read configuration")?;

        let loaded: Self = config
            .try_deserialize()
            .context("Invalid controller configuration")?;
        loaded.validate()?;
        Ok(loaded)
    }

    fn validate(&self) -> Result<()> {
        if self.evaluation_interval_secs == 0 {
            anyhow::bail!("evaluation_interval_secs must be greater than zero");
        }
        if self.query_timeout_secs == 0 {
            anyhow::bail!("query_timeout_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    /// Engine defaults derived from this configuration
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            evaluation_interval: Duration::from_secs(self.evaluation_interval_secs),
            ..EngineConfig::default()
        }
    }
}
