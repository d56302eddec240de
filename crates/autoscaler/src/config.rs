//! Autoscaler configuration

use anyhow::{Context, Result};
use autoscaler_lib::{
    models::resources, pricing, DiscoveryOptions, ManagerConfig, NodeGroupConfig, ResourceLimiter,
    RestConfig, WrapperConfig,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Autoscaler configuration, read from `AUTOSCALER_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct AutoscalerConfig {
    /// Base URL of the cloud REST surface
    #[serde(default = "default_cloud_endpoint")]
    pub cloud_endpoint: String,

    /// `;`-separated static node-group specs, `min:max:name`
    #[serde(default)]
    pub nodes: String,

    /// `;`-separated auto-discovery specs, `asg:tag=k1,k2=v`
    #[serde(default)]
    pub node_group_auto_discovery: String,

    /// Control-loop tick in seconds
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,

    /// Full instance-index rebuild period in seconds
    #[serde(default = "default_index_regeneration_interval")]
    pub index_regeneration_interval_secs: u64,

    /// Deadline for every cloud request in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Window in which concurrent node deletions are batched
    #[serde(default = "default_delete_batching_delay")]
    pub delete_batching_delay_ms: u64,

    /// Skip instance-type discovery and use the built-in table
    #[serde(default)]
    pub use_static_instance_list: bool,

    /// `;`-separated hourly group prices, `group=usd`
    #[serde(default)]
    pub group_prices: String,

    #[serde(default = "default_max_cores_total")]
    pub max_cores_total: i64,

    #[serde(default = "default_max_memory_gib_total")]
    pub max_memory_gib_total: i64,
}

fn default_cloud_endpoint() -> String {
    "http://localhost:4566".to_string()
}

fn default_scan_interval() -> u64 {
    10
}

fn default_index_regeneration_interval() -> u64 {
    3600
}

fn default_request_timeout() -> u64 {
    30
}

fn default_delete_batching_delay() -> u64 {
    2000
}

fn default_max_cores_total() -> i64 {
    320_000
}

fn default_max_memory_gib_total() -> i64 {
    6_400_000
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        Self {
            cloud_endpoint: default_cloud_endpoint(),
            nodes: String::new(),
            node_group_auto_discovery: String::new(),
            scan_interval_secs: default_scan_interval(),
            index_regeneration_interval_secs: default_index_regeneration_interval(),
            request_timeout_secs: default_request_timeout(),
            delete_batching_delay_ms: default_delete_batching_delay(),
            use_static_instance_list: false,
            group_prices: String::new(),
            max_cores_total: default_max_cores_total(),
            max_memory_gib_total: default_max_memory_gib_total(),
        }
    }
}

impl AutoscalerConfig {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self> {
        Self::from_environment(config::Environment::with_prefix("AUTOSCALER"))
    }

    pub fn from_environment(environment: config::Environment) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(environment.try_parsing(true))
            .build()?;

        config
            .try_deserialize()
            .context("invalid AUTOSCALER_* configuration")
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs.max(1))
    }

    pub fn discovery_options(&self) -> Result<DiscoveryOptions> {
        let nodes = split_list(&self.nodes);
        let auto_discovery = split_list(&self.node_group_auto_discovery);
        if nodes.is_empty() && auto_discovery.is_empty() {
            anyhow::bail!("no node groups configured: set AUTOSCALER_NODES or AUTOSCALER_NODE_GROUP_AUTO_DISCOVERY");
        }
        DiscoveryOptions::parse(&nodes, &auto_discovery, true).context("invalid node group configuration")
    }

    pub fn group_prices(&self) -> Result<HashMap<String, f64>> {
        pricing::parse_group_prices(&self.group_prices).context("invalid AUTOSCALER_GROUP_PRICES")
    }

    pub fn rest_config(&self) -> RestConfig {
        RestConfig {
            endpoint: self.cloud_endpoint.clone(),
            ..Default::default()
        }
    }

    pub fn wrapper_config(&self) -> WrapperConfig {
        WrapperConfig {
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            ..Default::default()
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            index_regeneration_interval: Duration::from_secs(self.index_regeneration_interval_secs),
            ..Default::default()
        }
    }

    pub fn node_group_config(&self) -> NodeGroupConfig {
        NodeGroupConfig {
            delete_batching_delay: Duration::from_millis(self.delete_batching_delay_ms),
            ..Default::default()
        }
    }

    pub fn resource_limiter(&self) -> ResourceLimiter {
        ResourceLimiter::new(
            HashMap::new(),
            HashMap::from([
                (resources::CPU.to_string(), self.max_cores_total),
                (resources::MEMORY.to_string(), self.max_memory_gib_total),
            ]),
        )
    }
}
