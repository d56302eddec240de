//! Provider IDs of the form `cloud:///<zone>/<instance-id>`

use crate::error::{CloudError, Result};
use k8s_openapi::api::core::v1::Node;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

pub const PROVIDER_ID_SCHEME: &str = "cloud://";

/// Prefix of synthetic members standing in for desired-but-missing capacity
pub const PLACEHOLDER_PREFIX: &str = "i-placeholder";

static VALID_ID: OnceLock<Regex> = OnceLock::new();

fn valid_id() -> &'static Regex {
    VALID_ID.get_or_init(|| {
        Regex::new(r"^cloud:///([-0-9a-z]+)/([-0-9a-z]+|i-placeholder-[-0-9A-Za-z_]+)$")
            .unwrap_or_else(|e| panic!("provider id pattern: {e}"))
    })
}

/// Reference to one cloud instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceRef {
    pub provider_id: String,
    /// Bare instance ID, e.g. `i-0123abcd`
    pub name: String,
    pub zone: String,
}

impl InstanceRef {
    pub fn new(zone: impl Into<String>, name: impl Into<String>) -> Self {
        let zone = zone.into();
        let name = name.into();
        Self {
            provider_id: format!("{PROVIDER_ID_SCHEME}/{zone}/{name}"),
            name,
            zone,
        }
    }

    /// Parse a provider ID. Rejects anything outside the canonical grammar.
    pub fn from_provider_id(provider_id: &str) -> Result<Self> {
        let caps = valid_id().captures(provider_id).ok_or_else(|| {
            CloudError::InvalidArgument(format!("wrong provider id format: {provider_id:?}"))
        })?;
        Ok(Self {
            provider_id: provider_id.to_string(),
            zone: caps[1].to_string(),
            name: caps[2].to_string(),
        })
    }

    pub fn is_placeholder(&self) -> bool {
        is_placeholder(&self.name)
    }
}

impl fmt::Display for InstanceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.provider_id)
    }
}

/// Parse the provider ID recorded on `node`
pub fn from_node(node: &Node) -> Result<InstanceRef> {
    let provider_id = node
        .spec
        .as_ref()
        .and_then(|s| s.provider_id.as_deref())
        .ok_or_else(|| {
            CloudError::InvalidArgument(format!(
                "node {} has no provider id",
                node.metadata.name.as_deref().unwrap_or_default()
            ))
        })?;
    InstanceRef::from_provider_id(provider_id)
}

pub fn is_placeholder(instance_id: &str) -> bool {
    instance_id.starts_with(PLACEHOLDER_PREFIX)
}

/// Placeholder ID for the `index`-th missing member of `group`
pub fn placeholder_name(group: &str, index: usize) -> String {
    format!("{PLACEHOLDER_PREFIX}-{group}-{index}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let r = InstanceRef::new("us-east-1a", "i-0123abcd");
        assert_eq!(r.provider_id, "cloud:///us-east-1a/i-0123abcd");
        let parsed = InstanceRef::from_provider_id(&r.provider_id).unwrap();
        assert_eq!(parsed, r);
        assert_eq!(parsed.to_string(), r.provider_id);
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in [
            "",
            "cloud://us-east-1a/i-1",
            "cloud:///us-east-1a",
            "cloud:///us-east-1a/",
            "aws:///us-east-1a/i-1",
            "cloud:///US-EAST-1A/i-1",
            "cloud:///us-east-1a/i-1/extra",
            "cloud:///z/i-placeholder-a/b",
            "cloud:///z/i-placeholder-a b",
        ] {
            assert!(InstanceRef::from_provider_id(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_from_node() {
        use k8s_openapi::api::core::v1::NodeSpec;

        let mut node = Node::default();
        assert!(matches!(from_node(&node), Err(CloudError::InvalidArgument(_))));
        node.spec = Some(NodeSpec {
            provider_id: Some("cloud:///us-east-1a/test-instance-id".into()),
            ..Default::default()
        });
        assert_eq!(from_node(&node).unwrap().name, "test-instance-id");
    }

    #[test]
    fn test_placeholder_ids_parse() {
        let name = placeholder_name("Workers_A", 3);
        assert_eq!(name, "i-placeholder-Workers_A-3");
        let r = InstanceRef::new("eu-west-1b", &name);
        let parsed = InstanceRef::from_provider_id(&r.provider_id).unwrap();
        assert!(parsed.is_placeholder());
        assert_eq!(parsed.name, name);
        assert!(!InstanceRef::new("a", "i-1").is_placeholder());
    }
}
