//! Core data models for the cloud provider

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Well-known orchestrator label keys written on template nodes
pub mod labels {
    pub const ARCH: &str = "kubernetes.io/arch";
    pub const OS: &str = "kubernetes.io/os";
    pub const HOSTNAME: &str = "kubernetes.io/hostname";
    pub const INSTANCE_TYPE: &str = "node.kubernetes.io/instance-type";
    pub const REGION: &str = "topology.kubernetes.io/region";
    pub const ZONE: &str = "topology.kubernetes.io/zone";

    /// Pool name on nodes of tagged-machine pools
    pub const POOL: &str = "pool";

    /// Label carrying the accelerator type on GPU nodes
    pub const GPU: &str = "k8s.amazonaws.com/accelerator";

    pub const ROLE_MASTER: &str = "node-role.kubernetes.io/master";
    pub const ROLE_CONTROL_PLANE: &str = "node-role.kubernetes.io/control-plane";

    /// Labels ignored when deciding whether two nodes are equivalent
    pub const IGNORED: &[&str] = &[
        "alpha.eksctl.io/instance-id",
        "alpha.eksctl.io/nodegroup-name",
        "eks.amazonaws.com/nodegroup",
        "k8s.amazonaws.com/eniConfig",
        "lifecycle",
        "topology.ebs.csi.aws.com/zone",
    ];
}

/// Resource names used in capacity lists and limiter maps
pub mod resources {
    pub const CPU: &str = "cpu";
    pub const MEMORY: &str = "memory";
    pub const PODS: &str = "pods";
    pub const GPU: &str = "nvidia.com/gpu";
}

pub const ARCH_AMD64: &str = "amd64";
pub const ARCH_ARM64: &str = "arm64";

/// One row of the instance-type catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceType {
    pub instance_type: String,
    pub vcpu: i64,
    pub memory_mb: i64,
    pub gpu: i64,
    pub architecture: String,
}

/// Lifecycle state of a group member as reported by `NodeGroup::nodes`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceState {
    Running,
    Creating,
    Deleting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub state: InstanceState,
}

/// A group member rendered for the scaling algorithm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Provider ID, `cloud:///<zone>/<id>`
    pub id: String,
    pub status: Option<InstanceStatus>,
}

/// Per-group overrides of the global scale-down behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeGroupAutoscalingOptions {
    pub scale_down_utilization_threshold: f64,
    pub scale_down_gpu_utilization_threshold: f64,
    pub scale_down_unneeded_time: Duration,
    pub scale_down_unready_time: Duration,
    pub ignore_daemonsets_utilization: bool,
}

impl Default for NodeGroupAutoscalingOptions {
    fn default() -> Self {
        Self {
            scale_down_utilization_threshold: 0.5,
            scale_down_gpu_utilization_threshold: 0.5,
            scale_down_unneeded_time: Duration::from_secs(10 * 60),
            scale_down_unready_time: Duration::from_secs(20 * 60),
            ignore_daemonsets_utilization: false,
        }
    }
}

/// Everything needed to synthesise a node for a group with no live members
#[derive(Debug, Clone, PartialEq)]
pub struct AsgTemplate {
    pub instance_type: InstanceType,
    pub region: String,
    pub zone: String,
    pub tags: BTreeMap<String, String>,
}

/// Cluster-wide minimum and maximum per resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimiter {
    min_limits: HashMap<String, i64>,
    max_limits: HashMap<String, i64>,
}

impl ResourceLimiter {
    pub fn new(min_limits: HashMap<String, i64>, max_limits: HashMap<String, i64>) -> Self {
        Self {
            min_limits,
            max_limits,
        }
    }

    /// Minimum for `resource`, zero when unset
    pub fn min(&self, resource: &str) -> i64 {
        self.min_limits.get(resource).copied().unwrap_or(0)
    }

    /// Maximum for `resource`, unbounded when unset
    pub fn max(&self, resource: &str) -> i64 {
        self.max_limits.get(resource).copied().unwrap_or(i64::MAX)
    }

    pub fn resources(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .min_limits
            .keys()
            .chain(self.max_limits.keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_limiter_defaults() {
        let limiter = ResourceLimiter::new(
            HashMap::from([(resources::CPU.to_string(), 2)]),
            HashMap::from([(resources::MEMORY.to_string(), 1024)]),
        );
        assert_eq!(limiter.min(resources::CPU), 2);
        assert_eq!(limiter.min(resources::MEMORY), 0);
        assert_eq!(limiter.max(resources::MEMORY), 1024);
        assert_eq!(limiter.max(resources::GPU), i64::MAX);
        assert_eq!(limiter.resources(), vec!["cpu", "memory"]);
    }
}
