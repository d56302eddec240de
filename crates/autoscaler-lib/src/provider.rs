//! Cloud-provider facade over the auto-scaling group manager

use crate::error::{CloudError, Result};
use crate::manager::AsgManager;
use crate::models::{labels, ResourceLimiter};
use crate::node_group::{AsgBackend, AsgNodeGroup, NodeGroup, NodeGroupConfig};
use crate::pricing::PricingModel;
use crate::provider_id;
use async_trait::async_trait;
use dashmap::DashMap;
use k8s_openapi::api::core::v1::Node;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Name reported by `CloudProvider::name` and attached to every log event
pub const PROVIDER_NAME: &str = "cloud";

/// Node annotation opting a node out of autoscaling
pub const SCALE_DISABLED_ANNOTATION: &str = "k8s.io/cluster-autoscaler-enabled";

#[async_trait]
pub trait CloudProvider: Send + Sync {
    fn name(&self) -> &str;

    fn node_groups(&self) -> Vec<Arc<dyn NodeGroup>>;

    /// Group owning `node`. Control-plane nodes never belong to a group.
    async fn node_group_for_node(&self, node: &Node) -> Result<Option<Arc<dyn NodeGroup>>>;

    async fn has_instance(&self, node: &Node) -> Result<bool>;

    fn pricing(&self) -> Result<Arc<dyn PricingModel>>;

    fn get_available_machine_types(&self) -> Result<Vec<String>> {
        Err(CloudError::NotImplemented)
    }

    fn new_node_group(
        &self,
        _machine_type: &str,
        _labels: &BTreeMap<String, String>,
    ) -> Result<Arc<dyn NodeGroup>> {
        Err(CloudError::NotImplemented)
    }

    fn get_resource_limiter(&self) -> Result<ResourceLimiter>;

    fn gpu_label(&self) -> &str;

    fn get_available_gpu_types(&self) -> Vec<String>;

    async fn refresh(&self) -> Result<()>;

    async fn cleanup(&self) -> Result<()>;
}

fn is_control_plane(node: &Node) -> bool {
    node.metadata.labels.as_ref().is_some_and(|l| {
        l.contains_key(labels::ROLE_MASTER) || l.contains_key(labels::ROLE_CONTROL_PLANE)
    })
}

fn has_provider_id(node: &Node) -> bool {
    node.spec
        .as_ref()
        .and_then(|s| s.provider_id.as_deref())
        .is_some_and(|id| !id.is_empty())
}

/// Provider backed by auto-scaling groups
pub struct AsgCloudProvider {
    manager: Arc<AsgManager>,
    groups: DashMap<String, Arc<AsgNodeGroup>>,
    pricing: Arc<dyn PricingModel>,
    resource_limiter: ResourceLimiter,
    node_group_config: NodeGroupConfig,
}

impl AsgCloudProvider {
    /// Must be called within a tokio runtime; each node group spawns its
    /// delete worker.
    pub fn new(
        manager: Arc<AsgManager>,
        pricing: Arc<dyn PricingModel>,
        resource_limiter: ResourceLimiter,
        node_group_config: NodeGroupConfig,
    ) -> Self {
        let provider = Self {
            manager,
            groups: DashMap::new(),
            pricing,
            resource_limiter,
            node_group_config,
        };
        provider.sync_node_groups();
        provider
    }

    pub fn manager(&self) -> &Arc<AsgManager> {
        &self.manager
    }

    /// Mirror the manager's registry. Groups whose `Asg` object is
    /// unchanged keep their node group and its pending delete batch.
    fn sync_node_groups(&self) {
        let asgs = self.manager.asgs();
        self.groups
            .retain(|name, _| asgs.iter().any(|a| a.name() == name.as_str()));

        let backend: Arc<dyn AsgBackend> = self.manager.clone();
        for asg in asgs {
            let current = self
                .groups
                .get(asg.name())
                .is_some_and(|g| Arc::ptr_eq(g.asg(), &asg));
            if !current {
                debug!(group = %asg.name(), "Creating node group");
                let group = AsgNodeGroup::new(asg.clone(), backend.clone(), self.node_group_config.clone());
                self.groups.insert(asg.name().to_string(), Arc::new(group));
            }
        }
    }

    fn group(&self, name: &str) -> Option<Arc<dyn NodeGroup>> {
        self.groups
            .get(name)
            .map(|g| g.value().clone() as Arc<dyn NodeGroup>)
    }
}

#[async_trait]
impl CloudProvider for AsgCloudProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn node_groups(&self) -> Vec<Arc<dyn NodeGroup>> {
        let mut groups: Vec<Arc<AsgNodeGroup>> =
            self.groups.iter().map(|g| g.value().clone()).collect();
        groups.sort_by(|a, b| a.id().cmp(b.id()));
        groups
            .into_iter()
            .map(|g| g as Arc<dyn NodeGroup>)
            .collect()
    }

    async fn node_group_for_node(&self, node: &Node) -> Result<Option<Arc<dyn NodeGroup>>> {
        if is_control_plane(node) {
            return Ok(None);
        }
        if !has_provider_id(node) {
            warn!(
                node = node.metadata.name.as_deref().unwrap_or_default(),
                "Node has no provider id"
            );
            return Ok(None);
        }
        let instance = provider_id::from_node(node)?;
        let Some(asg) = self.manager.asg_for_instance(&instance).await else {
            return Ok(None);
        };
        Ok(self.group(asg.name()))
    }

    async fn has_instance(&self, node: &Node) -> Result<bool> {
        let disabled = node
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(SCALE_DISABLED_ANNOTATION))
            .is_some_and(|v| v == "false");
        if disabled {
            return Ok(false);
        }
        let instance = provider_id::from_node(node)?;
        Ok(self.manager.has_instance(&instance).await)
    }

    fn pricing(&self) -> Result<Arc<dyn PricingModel>> {
        Ok(self.pricing.clone())
    }

    fn get_resource_limiter(&self) -> Result<ResourceLimiter> {
        Ok(self.resource_limiter.clone())
    }

    fn gpu_label(&self) -> &str {
        labels::GPU
    }

    fn get_available_gpu_types(&self) -> Vec<String> {
        self.manager.instance_types().gpu_types()
    }

    async fn refresh(&self) -> Result<()> {
        self.manager.refresh().await?;
        self.sync_node_groups();
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        self.manager.cleanup().await;
        self.groups.clear();
        Ok(())
    }
}
