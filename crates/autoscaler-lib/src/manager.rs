//! Auto-scaling group manager
//!
//! Owns the cloud wrapper, the group registry, the launch-shape cache, the
//! instance index and the instance-type catalog. Node groups reach it only
//! through the `AsgBackend` capability trait.

use crate::asg::Asg;
use crate::cloud::{AutoScalingGroup, CloudWrapper};
use crate::discovery::DiscoveryOptions;
use crate::error::{CloudError, Result};
use crate::index::InstanceIndex;
use crate::instance_types::InstanceTypeCatalog;
use crate::launch_shape::{LaunchShape, LaunchShapeCache, LaunchShapeCacheConfig};
use crate::models::{
    AsgTemplate, Instance, InstanceState, InstanceStatus, NodeGroupAutoscalingOptions,
};
use crate::node_group::AsgBackend;
use crate::observability::{CloudMetrics, StructuredLogger};
use crate::provider_id::{placeholder_name, InstanceRef};
use crate::template;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Backend status of a group that is being torn down
const GROUP_DELETE_IN_PROGRESS: &str = "Delete in progress";

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Minimum spacing between auto-discovery reconciliations
    pub refresh_interval: Duration,
    /// Period of the full instance-index rebuild
    pub index_regeneration_interval: Duration,
    pub shape_cache: LaunchShapeCacheConfig,
    /// Options applied where a group carries no option tags
    pub default_options: NodeGroupAutoscalingOptions,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(60),
            index_regeneration_interval: Duration::from_secs(60 * 60),
            shape_cache: LaunchShapeCacheConfig::default(),
            default_options: NodeGroupAutoscalingOptions::default(),
        }
    }
}

pub struct AsgManager {
    service: CloudWrapper,
    discovery: DiscoveryOptions,
    registry: RwLock<BTreeMap<String, Arc<Asg>>>,
    index: InstanceIndex,
    shapes: LaunchShapeCache,
    instance_types: Arc<InstanceTypeCatalog>,
    config: ManagerConfig,
    last_refresh: Mutex<Option<Instant>>,
    last_index_regeneration: Mutex<Option<Instant>>,
    logger: StructuredLogger,
    metrics: CloudMetrics,
}

/// Real members of `group` followed by placeholders for desired-but-missing capacity
fn group_members(group: &AutoScalingGroup) -> Vec<(InstanceRef, InstanceState)> {
    let mut members: Vec<(InstanceRef, InstanceState)> = group
        .instances
        .iter()
        .map(|i| {
            let state = match i.lifecycle_state.as_str() {
                s if s.starts_with("Pending") => InstanceState::Creating,
                s if s.starts_with("Terminating") || s == "Terminated" => InstanceState::Deleting,
                _ => InstanceState::Running,
            };
            (InstanceRef::new(&i.availability_zone, &i.instance_id), state)
        })
        .collect();

    let missing = group.desired_capacity - members.len() as i64;
    if missing > 0 {
        let zone = group.availability_zones.first().cloned().unwrap_or_default();
        for n in 0..missing as usize {
            let name = placeholder_name(&group.auto_scaling_group_name, n);
            members.push((InstanceRef::new(&zone, name), InstanceState::Creating));
        }
    }
    members
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl AsgManager {
    /// Register static groups and discover tagged ones. Fails when the
    /// initial describe fails.
    pub async fn new(
        service: CloudWrapper,
        discovery: DiscoveryOptions,
        instance_types: Arc<InstanceTypeCatalog>,
        config: ManagerConfig,
    ) -> Result<Self> {
        let manager = Self::without_refresh(service, discovery, instance_types, config);
        manager.force_refresh().await?;
        Ok(manager)
    }

    /// Build with static groups registered but nothing described yet
    pub fn without_refresh(
        service: CloudWrapper,
        discovery: DiscoveryOptions,
        instance_types: Arc<InstanceTypeCatalog>,
        config: ManagerConfig,
    ) -> Self {
        let shapes = LaunchShapeCache::new(service.clone(), config.shape_cache.clone());
        let manager = Self {
            service,
            discovery,
            registry: RwLock::new(BTreeMap::new()),
            index: InstanceIndex::new(),
            shapes,
            instance_types,
            config,
            last_refresh: Mutex::new(None),
            last_index_regeneration: Mutex::new(None),
            logger: StructuredLogger::new(crate::provider::PROVIDER_NAME),
            metrics: CloudMetrics::new(),
        };
        for spec in &manager.discovery.node_group_specs {
            manager.register_asg(Arc::new(Asg::from_spec(spec)));
        }
        manager
    }

    pub fn discovery(&self) -> &DiscoveryOptions {
        &self.discovery
    }

    pub fn instance_types(&self) -> &Arc<InstanceTypeCatalog> {
        &self.instance_types
    }

    /// Add or replace a group. Does not touch the instance index; the next
    /// lookup miss regenerates it.
    pub fn register_asg(&self, asg: Arc<Asg>) {
        let mut registry = self.registry.write().unwrap_or_else(|p| p.into_inner());
        self.logger
            .log_group_registered(asg.name(), asg.min_size(), asg.max_size());
        registry.insert(asg.name().to_string(), asg);
        self.metrics.set_node_groups(registry.len());
    }

    pub fn unregister_asg(&self, name: &str) -> Option<Arc<Asg>> {
        let mut registry = self.registry.write().unwrap_or_else(|p| p.into_inner());
        let removed = registry.remove(name);
        if removed.is_some() {
            self.logger.log_group_unregistered(name);
            self.shapes.invalidate(name);
        }
        self.metrics.set_node_groups(registry.len());
        removed
    }

    /// Snapshot of registered groups ordered by name
    pub fn asgs(&self) -> Vec<Arc<Asg>> {
        self.registry
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn get_asg(&self, name: &str) -> Option<Arc<Asg>> {
        self.registry
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
            .cloned()
    }

    fn asg_names(&self) -> Vec<String> {
        self.registry
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Reconcile auto-discovered groups at most once per refresh interval.
    /// Static-only configurations have nothing to reconcile.
    pub async fn refresh(&self) -> Result<()> {
        if !self.discovery.uses_auto_discovery() {
            return Ok(());
        }
        let due = lock(&self.last_refresh)
            .map(|at| at.elapsed() >= self.config.refresh_interval)
            .unwrap_or(true);
        if !due {
            debug!("Skipping refresh, last one is recent");
            return Ok(());
        }
        self.force_refresh().await
    }

    /// Describe every static and tagged group, reconcile the registry, warm
    /// the launch-shape cache and rebuild the instance index.
    pub async fn force_refresh(&self) -> Result<()> {
        let explicit: Vec<String> = self
            .asgs()
            .iter()
            .filter(|a| a.is_explicit())
            .map(|a| a.name().to_string())
            .collect();
        let mut described = if explicit.is_empty() {
            Vec::new()
        } else {
            self.service.describe_groups(&explicit).await?
        };

        let mut discovered_names = BTreeSet::new();
        for cfg in &self.discovery.auto_discovery {
            for group in self.service.describe_groups_by_tags(&cfg.tags).await? {
                if group.status.as_deref() == Some(GROUP_DELETE_IN_PROGRESS) {
                    debug!(group = %group.auto_scaling_group_name, "Skipping group being deleted");
                    continue;
                }
                if discovered_names.insert(group.auto_scaling_group_name.clone()) {
                    described.push(group);
                }
            }
        }

        let mut seen = BTreeSet::new();
        for group in &described {
            let name = &group.auto_scaling_group_name;
            if !seen.insert(name.clone()) {
                continue;
            }
            match self.get_asg(name) {
                Some(existing)
                    if existing.is_explicit()
                        || (existing.min_size() == group.min_size
                            && existing.max_size() == group.max_size) =>
                {
                    if let Err(e) = existing.update_from_cloud(group) {
                        warn!(group = %name, error = %e, "Ignoring invalid group");
                    }
                }
                _ => match Asg::from_cloud(group) {
                    Ok(asg) => self.register_asg(Arc::new(asg)),
                    Err(e) => warn!(group = %name, error = %e, "Ignoring invalid group"),
                },
            }
        }

        for asg in self.asgs() {
            if asg.is_explicit() {
                if !seen.contains(asg.name()) {
                    warn!(group = %asg.name(), "Configured group not found in cloud");
                }
            } else if !discovered_names.contains(asg.name()) {
                self.unregister_asg(asg.name());
            }
        }

        let shapes: Vec<(String, LaunchShape)> = self
            .asgs()
            .iter()
            .filter_map(|a| a.shape().map(|s| (a.name().to_string(), s)))
            .collect();
        if let Err(e) = self.shapes.populate(&shapes).await {
            warn!(error = %e, "Failed to warm launch shape cache");
        }

        let registered: BTreeSet<String> = self.asg_names().into_iter().collect();
        let positive = described
            .iter()
            .filter(|g| registered.contains(&g.auto_scaling_group_name))
            .flat_map(|g| {
                group_members(g)
                    .into_iter()
                    .map(|(r, _)| (r.name, g.auto_scaling_group_name.clone()))
            })
            .collect::<HashMap<_, _>>();
        self.install_index(positive, registered.len()).await;

        *lock(&self.last_refresh) = Some(Instant::now());
        Ok(())
    }

    async fn install_index(&self, positive: HashMap<String, String>, groups: usize) {
        let instances = positive.len();
        self.index.replace(positive).await;
        *lock(&self.last_index_regeneration) = Some(Instant::now());
        let (pos, neg) = self.index.sizes().await;
        self.metrics.set_index_sizes(pos, neg);
        self.logger.log_index_regenerated(instances, groups, true);
    }

    /// Instance ID → group name for every registered group, including
    /// placeholders. Refreshes each group's cached state on the way.
    async fn list_members(&self) -> Result<HashMap<String, String>> {
        let names = self.asg_names();
        if names.is_empty() {
            return Ok(HashMap::new());
        }
        let groups = self.service.describe_groups(&names).await?;
        let mut positive = HashMap::new();
        for group in &groups {
            let Some(asg) = self.get_asg(&group.auto_scaling_group_name) else {
                continue;
            };
            if let Err(e) = asg.update_from_cloud(group) {
                warn!(group = %asg.name(), error = %e, "Ignoring invalid group");
            }
            for (r, _) in group_members(group) {
                positive.insert(r.name, asg.name().to_string());
            }
        }
        Ok(positive)
    }

    /// Full index rebuild. On failure the previous mapping stays in place.
    pub async fn regenerate_index(&self) -> Result<()> {
        match self.list_members().await {
            Ok(positive) => {
                let groups = self.asg_names().len();
                self.install_index(positive, groups).await;
                Ok(())
            }
            Err(e) => {
                self.logger
                    .log_index_regenerated(0, self.asg_names().len(), false);
                Err(e)
            }
        }
    }

    /// Periodic housekeeping driven by the control loop: rebuild the index
    /// when its period has elapsed and drop expired launch shapes.
    pub async fn tick(&self) {
        let due = lock(&self.last_index_regeneration)
            .map(|at| at.elapsed() >= self.config.index_regeneration_interval)
            .unwrap_or(true);
        if due {
            if let Err(e) = self.regenerate_index().await {
                warn!(error = %e, "Periodic instance index regeneration failed");
            }
        }
        let swept = self.shapes.sweep();
        if swept > 0 {
            debug!(swept, "Expired launch shape cache entries");
        }
    }

    /// Group owning `instance`, regenerating the index on an unexplained miss
    pub async fn asg_for_instance(&self, instance: &InstanceRef) -> Option<Arc<Asg>> {
        let name = self
            .index
            .find_for_instance(&instance.name, || self.list_members())
            .await?;
        self.get_asg(&name)
    }

    /// Index lookup that never hits the backend
    pub async fn has_instance(&self, instance: &InstanceRef) -> bool {
        self.index.get(&instance.name).await.is_some()
    }

    async fn describe_one(&self, asg: &Asg) -> Result<AutoScalingGroup> {
        self.service
            .describe_groups(&[asg.name().to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CloudError::NotFound(format!("auto scaling group {}", asg.name())))
    }

    /// Backend desired capacity
    pub async fn get_asg_size(&self, asg: &Asg) -> Result<i64> {
        let group = self.describe_one(asg).await?;
        asg.update_from_cloud(&group)?;
        Ok(group.desired_capacity)
    }

    pub async fn set_asg_size(&self, asg: &Asg, size: i64) -> Result<()> {
        let from = asg.target_size().unwrap_or_default();
        self.logger.log_resize(asg.name(), from, size);
        self.service.set_desired_capacity(asg.name(), size).await
    }

    /// Current members rendered with provider IDs
    pub async fn get_asg_nodes(&self, asg: &Asg) -> Result<Vec<Instance>> {
        let group = self.describe_one(asg).await?;
        asg.update_from_cloud(&group)?;
        Ok(group_members(&group)
            .into_iter()
            .map(|(r, state)| Instance {
                id: r.provider_id,
                status: Some(InstanceStatus { state }),
            })
            .collect())
    }

    /// Terminate `instances`, which must all belong to one group. Nothing is
    /// terminated on a mismatch; the first termination failure aborts.
    /// Placeholders shrink desired capacity instead of terminating.
    pub async fn delete_instances(&self, instances: &[InstanceRef]) -> Result<()> {
        let Some(first) = instances.first() else {
            return Ok(());
        };
        let asg = self
            .asg_for_instance(first)
            .await
            .ok_or_else(|| CloudError::NotFound(format!("group for instance {first}")))?;

        for instance in instances {
            let owner = self
                .asg_for_instance(instance)
                .await
                .ok_or_else(|| CloudError::NotFound(format!("group for instance {instance}")))?;
            if owner.name() != asg.name() {
                return Err(CloudError::GroupMismatch {
                    instance: instance.provider_id.clone(),
                    expected: asg.name().to_string(),
                    found: owner.name().to_string(),
                });
            }
        }

        let (placeholders, real): (Vec<&InstanceRef>, Vec<&InstanceRef>) =
            instances.iter().partition(|i| i.is_placeholder());

        let mut terminated = Vec::with_capacity(real.len());
        let mut outcome = Ok(());
        for instance in real {
            if let Err(e) = self.service.terminate_instance(&instance.name).await {
                outcome = Err(e);
                break;
            }
            terminated.push(instance.name.clone());
        }

        if outcome.is_ok() && !placeholders.is_empty() {
            outcome = match self.get_asg_size(&asg).await {
                Ok(size) => {
                    let target = (size - placeholders.len() as i64).max(0);
                    self.set_asg_size(&asg, target).await
                }
                Err(e) => Err(e),
            };
        }

        asg.invalidate_size();
        self.index.invalidate().await;
        self.logger
            .log_instances_terminated(asg.name(), &terminated, placeholders.len());
        outcome
    }

    /// Everything needed to build a template node for `asg`
    pub async fn get_asg_template(&self, asg: &Asg) -> Result<AsgTemplate> {
        let shape = match asg.shape() {
            Some(shape) => shape,
            None => {
                self.get_asg_size(asg).await?;
                asg.shape().ok_or_else(|| {
                    CloudError::NotFound(format!("launch shape of group {}", asg.name()))
                })?
            }
        };
        let instance_type_name = self.shapes.instance_type(asg.name(), &shape).await?;
        let instance_type = self.instance_types.get(&instance_type_name).ok_or_else(|| {
            CloudError::NotFound(format!("instance type {instance_type_name}"))
        })?;

        let zone = asg.zones().into_iter().next().ok_or_else(|| {
            CloudError::NotFound(format!("availability zone of group {}", asg.name()))
        })?;

        Ok(AsgTemplate {
            instance_type,
            region: template::region_of(&zone),
            zone,
            tags: asg.tags(),
        })
    }

    pub fn build_node_from_template(&self, asg: &Asg, template: &AsgTemplate) -> Node {
        template::build_node_from_template(asg.name(), template)
    }

    pub fn autoscaling_options(&self, asg: &Asg) -> NodeGroupAutoscalingOptions {
        template::extract_autoscaling_options(&asg.tags(), &self.config.default_options)
    }

    pub async fn cleanup(&self) {
        info!("Cleaning up cloud provider manager");
        self.index.replace(HashMap::new()).await;
    }
}

#[async_trait]
impl AsgBackend for AsgManager {
    async fn get_asg_size(&self, asg: &Asg) -> Result<i64> {
        AsgManager::get_asg_size(self, asg).await
    }

    async fn set_asg_size(&self, asg: &Asg, size: i64) -> Result<()> {
        AsgManager::set_asg_size(self, asg, size).await
    }

    async fn get_asg_nodes(&self, asg: &Asg) -> Result<Vec<Instance>> {
        AsgManager::get_asg_nodes(self, asg).await
    }

    async fn delete_instances(&self, instances: &[InstanceRef]) -> Result<()> {
        AsgManager::delete_instances(self, instances).await
    }

    async fn group_for_instance(&self, instance: &InstanceRef) -> Option<String> {
        self.asg_for_instance(instance)
            .await
            .map(|a| a.name().to_string())
    }

    async fn template_node(&self, asg: &Asg) -> Result<Node> {
        let template = self.get_asg_template(asg).await?;
        Ok(self.build_node_from_template(asg, &template))
    }

    fn autoscaling_options(&self, asg: &Asg) -> NodeGroupAutoscalingOptions {
        AsgManager::autoscaling_options(self, asg)
    }
}
