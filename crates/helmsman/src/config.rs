//! Configuration management for Helmsman.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use helmsman_common::ElectionIdentity;
use helmsman_common::constants::{
    DEFAULT_LEASE_DURATION_SECS, DEFAULT_LISTEN_ADDR, LEASE_BACKEND_ENV_PREFIX,
};

use crate::selector::EnvironmentProbe;
use crate::timing::ElectionTiming;
use crate::view::GossipConfig;

/// Overrides applied on top of the file configuration (usually from the CLI)
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub redis_url: Option<String>,
    pub listen_addr: Option<String>,
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub identity: Option<String>,
    pub node_id: Option<String>,
}

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Redis connection URL; no lease backend when unset
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Status server listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// This node's contender ID (auto-generated if not set)
    #[serde(default = "generate_node_id")]
    pub node_id: String,

    /// What we are electing a leader for
    #[serde(default)]
    pub election: ElectionConfig,

    /// Lease backend availability probe
    #[serde(default)]
    pub lease_probe: ProbeConfig,

    /// Gossip membership configuration
    #[serde(default)]
    pub gossip: GossipConfig,
}

/// Election identity and timing
#[derive(Debug, Clone, Deserialize)]
pub struct ElectionConfig {
    #[serde(default)]
    pub namespace: String,

    #[serde(default = "default_election_name")]
    pub name: String,

    #[serde(default)]
    pub identity: String,

    /// Lease duration in milliseconds
    #[serde(default = "default_lease_duration_ms")]
    pub lease_duration_ms: u64,

    /// Renew deadline in milliseconds (set together with `retry_interval_ms`)
    #[serde(default)]
    pub renew_deadline_ms: Option<u64>,

    /// Retry interval in milliseconds (set together with `renew_deadline_ms`)
    #[serde(default)]
    pub retry_interval_ms: Option<u64>,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            name: default_election_name(),
            identity: String::new(),
            lease_duration_ms: default_lease_duration_ms(),
            renew_deadline_ms: None,
            retry_interval_ms: None,
        }
    }
}

impl ElectionConfig {
    pub fn identity(&self) -> ElectionIdentity {
        ElectionIdentity::new(&self.namespace, &self.name, &self.identity)
    }

    /// Explicit policy when both optional bounds are set, derived otherwise
    pub fn timing(&self) -> Result<ElectionTiming> {
        let lease = Duration::from_millis(self.lease_duration_ms);
        let timing = match (self.renew_deadline_ms, self.retry_interval_ms) {
            (Some(renew), Some(retry)) => ElectionTiming::new(
                lease,
                Duration::from_millis(renew),
                Duration::from_millis(retry),
            ),
            (None, None) => ElectionTiming::from_lease_duration(lease),
            _ => anyhow::bail!(
                "election.renew_deadline_ms and election.retry_interval_ms must be set together"
            ),
        };

        timing.context("Invalid election timing")
    }
}

/// Lease backend probe configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    /// Environment variable prefix marking a configured backend
    #[serde(default = "default_env_prefix")]
    pub env_prefix: String,

    #[serde(default = "default_true")]
    pub check_environment: bool,

    #[serde(default = "default_true")]
    pub check_endpoint: bool,

    /// Endpoint read timeout in milliseconds
    #[serde(default = "default_probe_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            env_prefix: default_env_prefix(),
            check_environment: true,
            check_endpoint: true,
            timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl ProbeConfig {
    pub fn probe(&self) -> EnvironmentProbe {
        EnvironmentProbe {
            env_prefix: self.env_prefix.clone(),
            check_environment: self.check_environment,
            check_endpoint: self.check_endpoint,
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }
}

// Default value functions
fn default_listen_addr() -> String { DEFAULT_LISTEN_ADDR.to_string() }
fn default_election_name() -> String { "helmsman".to_string() }
fn default_lease_duration_ms() -> u64 { DEFAULT_LEASE_DURATION_SECS * 1000 }
fn default_env_prefix() -> String { LEASE_BACKEND_ENV_PREFIX.to_string() }
fn default_probe_timeout_ms() -> u64 { 2000 }
fn default_true() -> bool { true }

fn generate_node_id() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    format!("node-{:08x}", rng.random::<u32>())
}

impl AppConfig {
    /// Load configuration from file, with overrides
    pub fn load(config_path: &str, overrides: &Overrides) -> Result<Self> {
        let mut config = if Path::new(config_path).exists() {
            let settings = config::Config::builder()
                .add_source(config::File::with_name(config_path))
                .build()
                .context("Failed to load config file")?;

            settings
                .try_deserialize()
                .context("Failed to parse config")?
        } else {
            // Use defaults if config file doesn't exist
            tracing::warn!(path = %config_path, "Config file not found, using defaults");
            Self::default()
        };

        config.apply(overrides);
        Ok(config)
    }

    fn apply(&mut self, overrides: &Overrides) {
        if let Some(ref redis_url) = overrides.redis_url {
            self.redis_url = Some(redis_url.clone());
        }
        if let Some(ref listen) = overrides.listen_addr {
            self.listen_addr = listen.clone();
        }
        if let Some(ref namespace) = overrides.namespace {
            self.election.namespace = namespace.clone();
        }
        if let Some(ref name) = overrides.name {
            self.election.name = name.clone();
        }
        if let Some(ref identity) = overrides.identity {
            self.election.identity = identity.clone();
        }
        if let Some(ref node_id) = overrides.node_id {
            self.node_id = node_id.clone();
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            listen_addr: default_listen_addr(),
            node_id: generate_node_id(),
            election: ElectionConfig::default(),
            lease_probe: ProbeConfig::default(),
            gossip: GossipConfig::default(),
        }
    }
}
