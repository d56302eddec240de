//! Instance → group index with a negative cache
//!
//! The positive map and the negative set are always disjoint. The negative
//! set is only cleared by a full regeneration.

use crate::error::Result;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct IndexState {
    /// Instance ID → group name
    positive: HashMap<String, String>,
    /// Instance IDs known not to belong to any registered group
    negative: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct InstanceIndex {
    state: Mutex<IndexState>,
}

impl InstanceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `instance_id`, regenerating the positive map on a miss that is
    /// not already cached as unmanaged. A regeneration failure keeps the
    /// previous map and the lookup reports no group.
    pub async fn find_for_instance<F, Fut>(&self, instance_id: &str, regenerate: F) -> Option<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<HashMap<String, String>>>,
    {
        let mut state = self.state.lock().await;
        if let Some(group) = state.positive.get(instance_id) {
            return Some(group.clone());
        }
        if state.negative.contains(instance_id) {
            return None;
        }

        match regenerate().await {
            Ok(positive) => Self::install(&mut state, positive),
            Err(e) => {
                warn!(instance = %instance_id, error = %e, "Failed to regenerate instance index");
                return None;
            }
        }

        match state.positive.get(instance_id) {
            Some(group) => Some(group.clone()),
            None => {
                debug!(instance = %instance_id, "Instance does not belong to any registered group");
                state.negative.insert(instance_id.to_string());
                None
            }
        }
    }

    /// Positive-map lookup that never triggers a regeneration
    pub async fn get(&self, instance_id: &str) -> Option<String> {
        self.state.lock().await.positive.get(instance_id).cloned()
    }

    /// Install a freshly listed positive map, clearing the negative set
    pub async fn replace(&self, positive: HashMap<String, String>) {
        let mut state = self.state.lock().await;
        Self::install(&mut state, positive);
    }

    fn install(state: &mut IndexState, positive: HashMap<String, String>) {
        state.positive = positive;
        state.negative.clear();
    }

    /// Force the next miss to regenerate even for cached negatives
    pub async fn invalidate(&self) {
        self.state.lock().await.negative.clear();
    }

    /// (positive entries, negative entries)
    pub async fn sizes(&self) -> (usize, usize) {
        let state = self.state.lock().await;
        (state.positive.len(), state.negative.len())
    }

    /// Instance IDs mapped to `group`
    #[cfg(test)]
    async fn members(&self, group: &str) -> Vec<String> {
        let state = self.state.lock().await;
        let mut ids: Vec<String> = state
            .positive
            .iter()
            .filter(|(_, g)| g.as_str() == group)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}
