//! Registered auto-scaling group state
//!
//! Name and size bounds are fixed for the lifetime of an `Asg`; the shadow
//! target size, cached backend size, zones, launch shape and tags are
//! refreshed from describe results.

use crate::cloud::AutoScalingGroup;
use crate::discovery::NodeGroupSpec;
use crate::error::Result;
use crate::launch_shape::LaunchShape;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct AsgState {
    /// Last locally intended desired capacity
    target_size: Option<i64>,
    /// Last backend desired capacity and when it was read
    cached_size: Option<(i64, Instant)>,
    zones: Vec<String>,
    shape: Option<LaunchShape>,
    tags: BTreeMap<String, String>,
}

#[derive(Debug)]
pub struct Asg {
    name: String,
    min_size: i64,
    max_size: i64,
    /// Configured by a static spec rather than discovered by tags
    explicit: bool,
    state: Mutex<AsgState>,
}

impl Asg {
    pub fn new(name: impl Into<String>, min_size: i64, max_size: i64, explicit: bool) -> Self {
        Self {
            name: name.into(),
            min_size,
            max_size,
            explicit,
            state: Mutex::new(AsgState::default()),
        }
    }

    pub fn from_spec(spec: &NodeGroupSpec) -> Self {
        Self::new(spec.name.clone(), spec.min_size, spec.max_size, true)
    }

    /// Discovered group taking its bounds from the backend
    pub fn from_cloud(group: &AutoScalingGroup) -> Result<Self> {
        let asg = Self::new(
            group.auto_scaling_group_name.clone(),
            group.min_size,
            group.max_size,
            false,
        );
        asg.update_from_cloud(group)?;
        Ok(asg)
    }

    fn state(&self) -> MutexGuard<'_, AsgState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Refresh mutable state from a describe result
    pub fn update_from_cloud(&self, group: &AutoScalingGroup) -> Result<()> {
        let shape = LaunchShape::from_group(group)?;
        let mut state = self.state();
        state.shape = Some(shape);
        state.zones = group.availability_zones.clone();
        state.tags = group
            .tags
            .iter()
            .map(|t| (t.key.clone(), t.value.clone()))
            .collect();
        state.target_size = Some(group.desired_capacity);
        state.cached_size = Some((group.desired_capacity, Instant::now()));
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn min_size(&self) -> i64 {
        self.min_size
    }

    pub fn max_size(&self) -> i64 {
        self.max_size
    }

    pub fn is_explicit(&self) -> bool {
        self.explicit
    }

    pub fn target_size(&self) -> Option<i64> {
        self.state().target_size
    }

    pub fn set_target_size(&self, size: i64) {
        self.state().target_size = Some(size);
    }

    /// Backend size if read within `max_age`
    pub fn cached_size(&self, max_age: Duration) -> Option<i64> {
        self.state()
            .cached_size
            .filter(|(_, read_at)| read_at.elapsed() <= max_age)
            .map(|(size, _)| size)
    }

    /// Record a fresh backend read; also corrects the shadow
    pub fn record_size(&self, size: i64) {
        let mut state = self.state();
        state.cached_size = Some((size, Instant::now()));
        state.target_size = Some(size);
    }

    pub fn invalidate_size(&self) {
        self.state().cached_size = None;
    }

    pub fn zones(&self) -> Vec<String> {
        self.state().zones.clone()
    }

    pub fn shape(&self) -> Option<LaunchShape> {
        self.state().shape.clone()
    }

    pub fn tags(&self) -> BTreeMap<String, String> {
        self.state().tags.clone()
    }
}
