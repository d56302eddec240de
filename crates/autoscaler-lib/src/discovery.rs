//! Node-group discovery options
//!
//! Two sources are supported:
//! - static specs `<min>:<max>:<name>` naming one group each
//! - auto-discovery specs `asg:tag=<k1>[=<v1>],<k2>...` selecting every group
//!   carrying all of the listed tags

use crate::error::{CloudError, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

const AUTO_DISCOVERER_KIND: &str = "asg";
const TAG_FILTER_KEY: &str = "tag";

/// Operator-provided static group definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeGroupSpec {
    pub name: String,
    pub min_size: i64,
    pub max_size: i64,
}

impl NodeGroupSpec {
    /// Parse `<min>:<max>:<name>`. `min` may be zero only when the backend
    /// supports scaling to zero.
    pub fn parse(value: &str, scale_to_zero_supported: bool) -> Result<Self> {
        let tokens: Vec<&str> = value.splitn(3, ':').collect();
        let [min, max, name] = tokens.as_slice() else {
            return Err(CloudError::Config(format!(
                "wrong nodes configuration: {value:?}, expected <min>:<max>:<name>"
            )));
        };

        let min_size: i64 = min
            .parse()
            .map_err(|_| CloudError::Config(format!("failed to set min size: {min:?}")))?;
        let max_size: i64 = max
            .parse()
            .map_err(|_| CloudError::Config(format!("failed to set max size: {max:?}")))?;

        let floor = if scale_to_zero_supported { 0 } else { 1 };
        if min_size < floor {
            return Err(CloudError::Config(format!(
                "min size must be >= {floor}, got {min_size}"
            )));
        }
        if max_size < min_size {
            return Err(CloudError::Config(format!(
                "max size must be >= min size, got {min_size}:{max_size}"
            )));
        }
        if name.is_empty() {
            return Err(CloudError::Config(format!("empty group name in {value:?}")));
        }

        Ok(Self {
            name: name.to_string(),
            min_size,
            max_size,
        })
    }
}

impl fmt::Display for NodeGroupSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.min_size, self.max_size, self.name)
    }
}

/// Tag filter for auto-discovered groups. An empty value matches any value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AutoDiscoveryConfig {
    pub tags: BTreeMap<String, String>,
}

impl FromStr for AutoDiscoveryConfig {
    type Err = CloudError;

    fn from_str(spec: &str) -> Result<Self> {
        let (kind, rest) = spec.split_once(':').ok_or_else(|| {
            CloudError::Config(format!("invalid node group auto discovery spec: {spec:?}"))
        })?;
        if kind != AUTO_DISCOVERER_KIND {
            return Err(CloudError::Config(format!(
                "unsupported discoverer {kind:?}, expected {AUTO_DISCOVERER_KIND:?}"
            )));
        }

        let (key, filter) = rest.split_once('=').ok_or_else(|| {
            CloudError::Config(format!("invalid key=value pair in {spec:?}"))
        })?;
        if key != TAG_FILTER_KEY {
            return Err(CloudError::Config(format!(
                "unsupported filter key {key:?}, expected {TAG_FILTER_KEY:?}"
            )));
        }
        if filter.is_empty() {
            return Err(CloudError::Config(format!("empty tag list in {spec:?}")));
        }

        let mut tags = BTreeMap::new();
        for entry in filter.split(',') {
            let (k, v) = entry.split_once('=').unwrap_or((entry, ""));
            if k.is_empty() {
                return Err(CloudError::Config(format!("empty tag key in {spec:?}")));
            }
            tags.insert(k.to_string(), v.to_string());
        }

        Ok(Self { tags })
    }
}

/// Parsed discovery configuration handed to the manager
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOptions {
    pub node_group_specs: Vec<NodeGroupSpec>,
    pub auto_discovery: Vec<AutoDiscoveryConfig>,
}

impl DiscoveryOptions {
    pub fn parse<S: AsRef<str>>(
        node_group_specs: &[S],
        auto_discovery_specs: &[S],
        scale_to_zero_supported: bool,
    ) -> Result<Self> {
        let node_group_specs = node_group_specs
            .iter()
            .map(|s| NodeGroupSpec::parse(s.as_ref(), scale_to_zero_supported))
            .collect::<Result<Vec<_>>>()?;
        let auto_discovery = auto_discovery_specs
            .iter()
            .map(|s| s.as_ref().parse())
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            node_group_specs,
            auto_discovery,
        })
    }

    pub fn uses_auto_discovery(&self) -> bool {
        !self.auto_discovery.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_static_spec() {
        let spec = NodeGroupSpec::parse("1:5:workers", false).unwrap();
        assert_eq!(spec.min_size, 1);
        assert_eq!(spec.max_size, 5);
        assert_eq!(spec.name, "workers");
        assert_eq!(spec.to_string(), "1:5:workers");
    }

    #[test]
    fn test_zero_min_requires_scale_to_zero() {
        assert!(NodeGroupSpec::parse("0:3:g", false).is_err());
        assert_eq!(NodeGroupSpec::parse("0:3:g", true).unwrap().min_size, 0);
    }

    #[test]
    fn test_rejects_bad_static_specs() {
        for bad in ["5:1:g", "x:1:g", "1:y:g", "1:2", "1:2:", "-1:2:g", ""] {
            assert!(
                matches!(NodeGroupSpec::parse(bad, true), Err(CloudError::Config(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_group_name_may_contain_colons() {
        let spec = NodeGroupSpec::parse("1:2:a:b", true).unwrap();
        assert_eq!(spec.name, "a:b");
    }

    #[test]
    fn test_parse_auto_discovery() {
        let cfg: AutoDiscoveryConfig = "asg:tag=k8s.io/cluster-autoscaler/enabled,team=infra"
            .parse()
            .unwrap();
        assert_eq!(cfg.tags.len(), 2);
        assert_eq!(cfg.tags["k8s.io/cluster-autoscaler/enabled"], "");
        assert_eq!(cfg.tags["team"], "infra");
    }

    #[test]
    fn test_rejects_bad_auto_discovery() {
        for bad in ["asg:tag=", "asg", "mig:tag=a", "asg:label=a", "asg:tag=a,,b", "asg:tag==v"] {
            assert!(bad.parse::<AutoDiscoveryConfig>().is_err(), "{bad}");
        }
    }

    #[test]
    fn test_discovery_options() {
        let opts = DiscoveryOptions::parse(&["1:3:a"], &["asg:tag=x"], false).unwrap();
        assert_eq!(opts.node_group_specs.len(), 1);
        assert!(opts.uses_auto_discovery());
        assert!(DiscoveryOptions::parse(&["0:3:a"], &[], false).is_err());
    }
}
