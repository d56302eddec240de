//! Node groups exposed to the scaling algorithm
//!
//! Every mutation of one group is serialised by its update mutex. Deletes
//! are funnelled through a per-group worker: concurrent `delete_nodes`
//! callers land in one channel, the worker waits out a short debounce
//! window, drains everything queued and executes it as a single batch, then
//! replies to each caller with the batch outcome.

use crate::asg::Asg;
use crate::error::{CloudError, Result};
use crate::models::{Instance, NodeGroupAutoscalingOptions};
use crate::observability::StructuredLogger;
use crate::provider_id::{self, InstanceRef};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info};

/// Debounce window letting concurrent delete callers join one batch
pub const DEFAULT_DELETE_BATCHING_DELAY: Duration = Duration::from_secs(2);

/// Maximum age of the cached group size used to validate delete batches
pub const DEFAULT_SIZE_CACHE_MAX_AGE: Duration = Duration::from_secs(10);

/// Capabilities a node group needs from its owner
#[async_trait]
pub trait AsgBackend: Send + Sync {
    /// Backend desired capacity; refreshes the group's cached size
    async fn get_asg_size(&self, asg: &Asg) -> Result<i64>;
    async fn set_asg_size(&self, asg: &Asg, size: i64) -> Result<()>;
    async fn get_asg_nodes(&self, asg: &Asg) -> Result<Vec<Instance>>;
    async fn delete_instances(&self, instances: &[InstanceRef]) -> Result<()>;
    async fn group_for_instance(&self, instance: &InstanceRef) -> Option<String>;
    async fn template_node(&self, asg: &Asg) -> Result<Node>;
    fn autoscaling_options(&self, asg: &Asg) -> NodeGroupAutoscalingOptions;
}

/// Contract between the scaling algorithm and one resizable pool
#[async_trait]
pub trait NodeGroup: Send + Sync {
    fn id(&self) -> &str;
    fn debug(&self) -> String;
    fn min_size(&self) -> i64;
    fn max_size(&self) -> i64;

    /// Last locally intended size
    async fn target_size(&self) -> Result<i64>;

    async fn increase_size(&self, delta: i64) -> Result<()>;

    async fn delete_nodes(&self, nodes: &[Node]) -> Result<()>;

    /// Lower the intended size without removing any registered node
    async fn decrease_target_size(&self, delta: i64) -> Result<()>;

    async fn belongs(&self, node: &Node) -> Result<bool>;

    async fn nodes(&self) -> Result<Vec<Instance>>;

    async fn template_node_info(&self) -> Result<Node>;

    fn get_options(&self) -> Result<NodeGroupAutoscalingOptions>;

    fn exist(&self) -> bool {
        true
    }

    fn autoprovisioned(&self) -> bool {
        false
    }

    async fn create(&self) -> Result<Arc<dyn NodeGroup>> {
        Err(CloudError::NotImplemented)
    }

    async fn delete(&self) -> Result<()> {
        Err(CloudError::NotImplemented)
    }
}

#[derive(Debug, Clone)]
pub struct NodeGroupConfig {
    pub delete_batching_delay: Duration,
    pub size_cache_max_age: Duration,
}

impl Default for NodeGroupConfig {
    fn default() -> Self {
        Self {
            delete_batching_delay: DEFAULT_DELETE_BATCHING_DELAY,
            size_cache_max_age: DEFAULT_SIZE_CACHE_MAX_AGE,
        }
    }
}

struct DeleteRequest {
    instances: Vec<InstanceRef>,
    reply: oneshot::Sender<Result<()>>,
}

/// State shared by the node group and its delete worker
struct GroupCore {
    asg: Arc<Asg>,
    backend: Arc<dyn AsgBackend>,
    update_lock: Mutex<()>,
    config: NodeGroupConfig,
    logger: StructuredLogger,
}

impl GroupCore {
    async fn delete_batch(&self, instances: &[InstanceRef]) -> Result<()> {
        let asg = &self.asg;
        let size = match asg.cached_size(self.config.size_cache_max_age) {
            Some(size) => size,
            None => self.backend.get_asg_size(asg).await?,
        };

        let count = instances.len() as i64;
        if size - count < asg.min_size() {
            self.logger
                .log_delete_rejected(asg.name(), size, instances.len(), asg.min_size());
            return Err(CloudError::CapacityConstraint(format!(
                "deleting {count} nodes from {} would leave {} below min size {}",
                asg.name(),
                size - count,
                asg.min_size()
            )));
        }

        self.backend.delete_instances(instances).await?;

        match self.backend.get_asg_size(asg).await {
            Ok(_) => Ok(()),
            Err(e) => {
                asg.set_target_size(size - count);
                Err(e)
            }
        }
    }
}

async fn run_delete_worker(core: Arc<GroupCore>, mut requests: mpsc::UnboundedReceiver<DeleteRequest>) {
    while let Some(first) = requests.recv().await {
        if !core.config.delete_batching_delay.is_zero() {
            tokio::time::sleep(core.config.delete_batching_delay).await;
        }

        let mut batch = vec![first];
        while let Ok(next) = requests.try_recv() {
            batch.push(next);
        }

        let mut seen = BTreeSet::new();
        let instances: Vec<InstanceRef> = batch
            .iter()
            .flat_map(|r| r.instances.iter())
            .filter(|i| seen.insert(i.name.clone()))
            .cloned()
            .collect();

        debug!(
            group = %core.asg.name(),
            callers = batch.len(),
            instances = instances.len(),
            "Executing delete batch"
        );

        let result = {
            let _guard = core.update_lock.lock().await;
            core.delete_batch(&instances).await
        };

        for request in batch {
            let _ = request.reply.send(result.clone());
        }
    }
    debug!(group = %core.asg.name(), "Delete worker stopped");
}

/// Node group backed by one auto-scaling group
pub struct AsgNodeGroup {
    core: Arc<GroupCore>,
    deletes: mpsc::UnboundedSender<DeleteRequest>,
}

impl AsgNodeGroup {
    /// Must be called within a tokio runtime; spawns the delete worker,
    /// which stops when the group is dropped.
    pub fn new(asg: Arc<Asg>, backend: Arc<dyn AsgBackend>, config: NodeGroupConfig) -> Self {
        let core = Arc::new(GroupCore {
            asg,
            backend,
            update_lock: Mutex::new(()),
            config,
            logger: StructuredLogger::new(crate::provider::PROVIDER_NAME),
        });
        let (deletes, requests) = mpsc::unbounded_channel();
        tokio::spawn(run_delete_worker(core.clone(), requests));
        Self { core, deletes }
    }

    pub fn asg(&self) -> &Arc<Asg> {
        &self.core.asg
    }

    fn backend(&self) -> &dyn AsgBackend {
        self.core.backend.as_ref()
    }
}

#[async_trait]
impl NodeGroup for AsgNodeGroup {
    fn id(&self) -> &str {
        self.core.asg.name()
    }

    fn debug(&self) -> String {
        format!("{} ({}:{})", self.id(), self.min_size(), self.max_size())
    }

    fn min_size(&self) -> i64 {
        self.core.asg.min_size()
    }

    fn max_size(&self) -> i64 {
        self.core.asg.max_size()
    }

    async fn target_size(&self) -> Result<i64> {
        match self.core.asg.target_size() {
            Some(size) => Ok(size),
            None => self.backend().get_asg_size(&self.core.asg).await,
        }
    }

    async fn increase_size(&self, delta: i64) -> Result<()> {
        if delta <= 0 {
            return Err(CloudError::InvalidArgument(format!(
                "size increase must be positive, got {delta}"
            )));
        }
        let asg = &self.core.asg;
        let _guard = self.core.update_lock.lock().await;

        let size = self.backend().get_asg_size(asg).await?;
        if size + delta > asg.max_size() {
            info!(group = %asg.name(), size, delta, max = asg.max_size(), "Rejecting size increase");
            return Err(CloudError::CapacityConstraint(format!(
                "size increase too large: desired {} max {}",
                size + delta,
                asg.max_size()
            )));
        }

        self.backend().set_asg_size(asg, size + delta).await?;
        asg.record_size(size + delta);
        Ok(())
    }

    async fn delete_nodes(&self, nodes: &[Node]) -> Result<()> {
        let mut instances = Vec::with_capacity(nodes.len());
        for node in nodes {
            let instance = provider_id::from_node(node)?;
            match self.backend().group_for_instance(&instance).await {
                Some(group) if group == self.id() => instances.push(instance),
                Some(group) => {
                    return Err(CloudError::GroupMismatch {
                        instance: instance.provider_id,
                        expected: self.id().to_string(),
                        found: group,
                    })
                }
                None => {
                    return Err(CloudError::NotFound(format!(
                        "group for instance {instance}"
                    )))
                }
            }
        }
        if instances.is_empty() {
            return Ok(());
        }

        let (reply, outcome) = oneshot::channel();
        self.deletes
            .send(DeleteRequest { instances, reply })
            .map_err(|_| CloudError::backend("delete worker stopped"))?;
        outcome
            .await
            .map_err(|_| CloudError::backend("delete worker dropped the request"))?
    }

    async fn decrease_target_size(&self, delta: i64) -> Result<()> {
        if delta >= 0 {
            return Err(CloudError::InvalidArgument(format!(
                "size decrease must be negative, got {delta}"
            )));
        }
        let asg = &self.core.asg;
        let _guard = self.core.update_lock.lock().await;

        let size = self.backend().get_asg_size(asg).await?;
        let registered = self
            .backend()
            .get_asg_nodes(asg)
            .await?
            .iter()
            .filter(|i| {
                InstanceRef::from_provider_id(&i.id)
                    .map(|r| !r.is_placeholder())
                    .unwrap_or(true)
            })
            .count() as i64;

        let target = size + delta;
        if target < registered {
            info!(group = %asg.name(), size, delta, registered, "Rejecting target size decrease");
            return Err(CloudError::CapacityConstraint(format!(
                "attempt to delete existing nodes: target {target} registered {registered}"
            )));
        }
        if target < asg.min_size() {
            return Err(CloudError::CapacityConstraint(format!(
                "target {target} below min size {}",
                asg.min_size()
            )));
        }

        self.backend().set_asg_size(asg, target).await?;
        asg.record_size(target);
        Ok(())
    }

    async fn belongs(&self, node: &Node) -> Result<bool> {
        let instance = provider_id::from_node(node)?;
        Ok(self
            .backend()
            .group_for_instance(&instance)
            .await
            .is_some_and(|g| g == self.id()))
    }

    async fn nodes(&self) -> Result<Vec<Instance>> {
        self.backend().get_asg_nodes(&self.core.asg).await
    }

    async fn template_node_info(&self) -> Result<Node> {
        self.backend().template_node(&self.core.asg).await
    }

    fn get_options(&self) -> Result<NodeGroupAutoscalingOptions> {
        Ok(self.backend().autoscaling_options(&self.core.asg))
    }
}

#[cfg(test)]
mod tests;
