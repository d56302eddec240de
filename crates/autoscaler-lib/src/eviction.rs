//! Eviction budget for replicated pods
//!
//! Used by the companion updater before evicting a pod to apply new
//! resource requests: a replica set may only lose as many running pods as
//! its eviction tolerance allows.

use crate::error::{CloudError, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

const PHASE_PENDING: &str = "Pending";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OwnerKind {
    ReplicationController,
    StatefulSet,
    ReplicaSet,
    DaemonSet,
    Job,
}

impl OwnerKind {
    fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            "ReplicationController" => Some(Self::ReplicationController),
            "StatefulSet" => Some(Self::StatefulSet),
            "ReplicaSet" => Some(Self::ReplicaSet),
            "DaemonSet" => Some(Self::DaemonSet),
            "Job" => Some(Self::Job),
            _ => None,
        }
    }
}

/// Controller that created a set of replicas
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Owner {
    pub namespace: String,
    pub name: String,
    pub kind: OwnerKind,
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Managing controller of `pod`, if it is one we know how to count
pub fn owner_of(pod: &Pod) -> Option<Owner> {
    let controller = pod
        .metadata
        .owner_references
        .as_ref()?
        .iter()
        .find(|r| r.controller == Some(true))?;
    Some(Owner {
        namespace: pod.metadata.namespace.clone().unwrap_or_default(),
        name: controller.name.clone(),
        kind: OwnerKind::from_kind(&controller.kind)?,
    })
}

fn pod_key(pod: &Pod) -> String {
    format!(
        "{}/{}",
        pod.metadata.namespace.as_deref().unwrap_or_default(),
        pod.metadata.name.as_deref().unwrap_or_default()
    )
}

fn is_pending(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|p| p == PHASE_PENDING)
}

/// Source of configured replica counts and owned pods
#[async_trait]
pub trait ScaleSource: Send + Sync {
    /// Configured replica count of `owner`
    async fn get_scale(&self, owner: &Owner) -> Result<i64>;
    async fn list_owned_pods(&self, owner: &Owner) -> Result<Vec<Pod>>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct GroupStats {
    configured: i64,
    pending: i64,
    running: i64,
    tolerance: i64,
    evicted: i64,
}

impl GroupStats {
    fn can_evict_running(&self) -> bool {
        let should_be_alive = self.configured - self.tolerance;
        let actually_alive = self.running - self.evicted;
        if actually_alive > should_be_alive {
            return true;
        }
        // Single-replica style sets with no tolerance may lose one pod at a time.
        self.running == self.configured && self.tolerance == 0 && self.evicted == 0
    }
}

/// Eviction budget over a snapshot of pods
#[derive(Debug, Default)]
pub struct EvictionRestriction {
    pod_owners: HashMap<String, Owner>,
    stats: HashMap<Owner, GroupStats>,
}

impl EvictionRestriction {
    pub fn can_evict(&self, pod: &Pod) -> bool {
        let Some(owner) = self.pod_owners.get(&pod_key(pod)) else {
            return false;
        };
        if is_pending(pod) {
            return true;
        }
        self.stats
            .get(owner)
            .is_some_and(|stats| stats.can_evict_running())
    }

    /// Record an eviction of `pod` against its owner's budget
    pub fn evict(&mut self, pod: &Pod) -> Result<()> {
        let key = pod_key(pod);
        let Some(owner) = self.pod_owners.get(&key).cloned() else {
            return Err(CloudError::InvalidArgument(format!(
                "pod not suitable for eviction {key}: not in replicated pods map"
            )));
        };
        if !self.can_evict(pod) {
            return Err(CloudError::CapacityConstraint(format!(
                "cannot evict pod {key}: eviction budget exceeded"
            )));
        }
        if !is_pending(pod) {
            let stats = self.stats.get_mut(&owner).ok_or_else(|| {
                CloudError::NotFound(format!("eviction stats for {owner}"))
            })?;
            stats.evicted += 1;
        }
        debug!(pod = %key, owner = %owner, "Recorded pod eviction");
        Ok(())
    }

    pub fn is_tracked(&self, pod: &Pod) -> bool {
        self.pod_owners.contains_key(&pod_key(pod))
    }
}

/// Builds eviction budgets from live pods and configured replica counts
pub struct EvictionRestrictionFactory {
    source: Arc<dyn ScaleSource>,
    min_replicas: i64,
    tolerance_fraction: f64,
}

impl EvictionRestrictionFactory {
    pub fn new(source: Arc<dyn ScaleSource>, min_replicas: i64, tolerance_fraction: f64) -> Self {
        Self {
            source,
            min_replicas,
            tolerance_fraction,
        }
    }

    /// Budget over `pods`. Pods without a known controller are not evictable;
    /// owners with fewer than `min_replicas` live pods are skipped.
    pub async fn build(&self, pods: &[Pod]) -> EvictionRestriction {
        let mut live: HashMap<Owner, Vec<&Pod>> = HashMap::new();
        for pod in pods {
            match owner_of(pod) {
                Some(owner) => live.entry(owner).or_default().push(pod),
                None => debug!(pod = %pod_key(pod), "Pod is not managed by a known controller"),
            }
        }

        let mut restriction = EvictionRestriction::default();
        for (owner, replicas) in live {
            let actual = replicas.len() as i64;
            if actual < self.min_replicas {
                debug!(owner = %owner, live = actual, required = self.min_replicas, "Too few replicas");
                continue;
            }
            let configured = if owner.kind == OwnerKind::Job {
                actual
            } else {
                match self.source.get_scale(&owner).await {
                    Ok(n) => n,
                    Err(e) => {
                        warn!(owner = %owner, error = %e, "Failed to read replica count");
                        continue;
                    }
                }
            };

            let pending = replicas.iter().filter(|p| is_pending(p)).count() as i64;
            let stats = GroupStats {
                configured,
                pending,
                running: actual - pending,
                tolerance: (configured as f64 * self.tolerance_fraction) as i64,
                evicted: 0,
            };
            for pod in replicas {
                restriction.pod_owners.insert(pod_key(pod), owner.clone());
            }
            restriction.stats.insert(owner, stats);
        }
        restriction
    }

    /// Budget over the pods currently owned by `owner`
    pub async fn build_for_owner(&self, owner: &Owner) -> Result<EvictionRestriction> {
        let pods = self.source.list_owned_pods(owner).await?;
        Ok(self.build(&pods).await)
    }
}
