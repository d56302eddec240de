//! Launch shapes and the group → instance-type cache
//!
//! A group launches machines from exactly one of a launch configuration, a
//! launch template, or a mixed-instances policy wrapping a template.

use crate::cache::{ExpirationCache, DEFAULT_JITTER_MAX, DEFAULT_JITTER_MIN, DEFAULT_TTL};
use crate::cloud::{AutoScalingGroup, CloudWrapper, LaunchTemplateSpecification};
use crate::error::{CloudError, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LaunchTemplate {
    pub name: String,
    /// Empty means the template's default version
    pub version: String,
}

impl From<&LaunchTemplateSpecification> for LaunchTemplate {
    fn from(spec: &LaunchTemplateSpecification) -> Self {
        Self {
            name: spec.launch_template_name.clone(),
            version: spec.version.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LaunchShape {
    LaunchConfiguration(String),
    LaunchTemplate(LaunchTemplate),
    MixedInstances {
        template: LaunchTemplate,
        /// Instance-type overrides in priority order
        overrides: Vec<String>,
    },
}

impl LaunchShape {
    /// Pick the shape a described group launches from. A group naming none
    /// of the three is invalid.
    pub fn from_group(group: &AutoScalingGroup) -> Result<Self> {
        if let Some(name) = group
            .launch_configuration_name
            .as_ref()
            .filter(|n| !n.is_empty())
        {
            return Ok(Self::LaunchConfiguration(name.clone()));
        }
        if let Some(spec) = &group.launch_template {
            return Ok(Self::LaunchTemplate(spec.into()));
        }
        if let Some(policy) = &group.mixed_instances_policy {
            return Ok(Self::MixedInstances {
                template: (&policy.launch_template).into(),
                overrides: policy.overrides.clone(),
            });
        }
        Err(CloudError::Config(format!(
            "group {} has no launch configuration, launch template or mixed instances policy",
            group.auto_scaling_group_name
        )))
    }
}

impl fmt::Display for LaunchShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LaunchConfiguration(name) => write!(f, "launch-configuration/{name}"),
            Self::LaunchTemplate(t) => write!(f, "launch-template/{}:{}", t.name, t.version),
            Self::MixedInstances { template, overrides } => write!(
                f,
                "mixed-instances/{}:{} {:?}",
                template.name, template.version, overrides
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LaunchShapeCacheConfig {
    pub ttl: std::time::Duration,
    pub jitter_min: std::time::Duration,
    pub jitter_max: std::time::Duration,
}

impl Default for LaunchShapeCacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            jitter_min: DEFAULT_JITTER_MIN,
            jitter_max: DEFAULT_JITTER_MAX,
        }
    }
}

/// Group name → (shape, resolved instance type)
pub struct LaunchShapeCache {
    service: CloudWrapper,
    entries: Mutex<ExpirationCache<String, (LaunchShape, String)>>,
}

impl LaunchShapeCache {
    pub fn new(service: CloudWrapper, config: LaunchShapeCacheConfig) -> Self {
        Self {
            service,
            entries: Mutex::new(ExpirationCache::new(
                config.ttl,
                config.jitter_min,
                config.jitter_max,
            )),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ExpirationCache<String, (LaunchShape, String)>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn cached(&self, group: &str, shape: &LaunchShape) -> Option<String> {
        self.lock()
            .get(&group.to_string(), Instant::now())
            .filter(|(cached_shape, _)| cached_shape == shape)
            .map(|(_, instance_type)| instance_type)
    }

    /// Instance type a group launches. Served from cache within the TTL.
    pub async fn instance_type(&self, group: &str, shape: &LaunchShape) -> Result<String> {
        if let Some(instance_type) = self.cached(group, shape) {
            return Ok(instance_type);
        }

        let instance_type = self.resolve(shape).await?;
        debug!(group, shape = %shape, instance_type = %instance_type, "Resolved launch shape");
        self.lock().insert(
            group.to_string(),
            (shape.clone(), instance_type.clone()),
            Instant::now(),
        );
        Ok(instance_type)
    }

    async fn resolve(&self, shape: &LaunchShape) -> Result<String> {
        match shape {
            LaunchShape::LaunchConfiguration(name) => self
                .service
                .launch_configuration_instance_types(std::slice::from_ref(name))
                .await?
                .remove(name)
                .ok_or_else(|| CloudError::NotFound(format!("launch configuration {name}"))),
            LaunchShape::LaunchTemplate(t) => {
                self.service
                    .launch_template_instance_type(&t.name, &t.version)
                    .await
            }
            LaunchShape::MixedInstances {
                template,
                overrides,
            } => match overrides.first() {
                Some(first) => Ok(first.clone()),
                None => {
                    self.service
                        .launch_template_instance_type(&template.name, &template.version)
                        .await
                }
            },
        }
    }

    /// Resolve many groups at once with jittered expiry. Launch
    /// configurations share batched describe calls.
    pub async fn populate(&self, groups: &[(String, LaunchShape)]) -> Result<()> {
        let missing: Vec<&(String, LaunchShape)> = groups
            .iter()
            .filter(|(name, shape)| self.cached(name, shape).is_none())
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        let mut lc_names: Vec<String> = missing
            .iter()
            .filter_map(|(_, shape)| match shape {
                LaunchShape::LaunchConfiguration(name) => Some(name.clone()),
                _ => None,
            })
            .collect();
        lc_names.sort();
        lc_names.dedup();
        let lc_types: HashMap<String, String> = if lc_names.is_empty() {
            HashMap::new()
        } else {
            self.service
                .launch_configuration_instance_types(&lc_names)
                .await?
        };

        let mut resolved = Vec::with_capacity(missing.len());
        for (group, shape) in missing {
            let instance_type = match shape {
                LaunchShape::LaunchConfiguration(name) => match lc_types.get(name) {
                    Some(t) => t.clone(),
                    None => {
                        debug!(group = %group, launch_configuration = %name, "Launch configuration not found");
                        continue;
                    }
                },
                _ => self.resolve(shape).await?,
            };
            resolved.push((group.clone(), (shape.clone(), instance_type)));
        }

        let now = Instant::now();
        let mut entries = self.lock();
        entries.set_jitter(true);
        for (group, value) in resolved {
            entries.insert(group, value, now);
        }
        entries.set_jitter(false);
        Ok(())
    }

    pub fn invalidate(&self, group: &str) {
        self.lock().remove(&group.to_string());
    }

    /// Drop expired entries; called from the control-loop tick
    pub fn sweep(&self) -> usize {
        self.lock().sweep(Instant::now())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
