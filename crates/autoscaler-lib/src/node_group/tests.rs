use super::*;
use crate::models::{InstanceState, InstanceStatus};
use k8s_openapi::api::core::v1::NodeSpec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;

/// Backend keeping one group's size and membership in memory
#[derive(Default)]
struct RecordingBackend {
    size: StdMutex<i64>,
    owners: HashMap<String, String>,
    members: Vec<String>,
    deletes: StdMutex<Vec<Vec<String>>>,
    sets: StdMutex<Vec<i64>>,
    fail_reads_after_delete: AtomicBool,
}

impl RecordingBackend {
    fn new(size: i64) -> Self {
        Self {
            size: StdMutex::new(size),
            ..Default::default()
        }
    }

    fn owning(mut self, group: &str, ids: &[&str]) -> Self {
        for id in ids {
            self.owners.insert(id.to_string(), group.to_string());
            self.members.push(InstanceRef::new("us-east-1a", *id).provider_id);
        }
        self
    }

    fn deletes(&self) -> Vec<Vec<String>> {
        self.deletes.lock().unwrap().clone()
    }

    fn size(&self) -> i64 {
        *self.size.lock().unwrap()
    }
}

#[async_trait]
impl AsgBackend for RecordingBackend {
    async fn get_asg_size(&self, asg: &Asg) -> Result<i64> {
        if self.fail_reads_after_delete.load(Ordering::SeqCst) && !self.deletes().is_empty() {
            return Err(CloudError::backend("describe failed"));
        }
        let size = self.size();
        asg.record_size(size);
        Ok(size)
    }

    async fn set_asg_size(&self, _asg: &Asg, size: i64) -> Result<()> {
        *self.size.lock().unwrap() = size;
        self.sets.lock().unwrap().push(size);
        Ok(())
    }

    async fn get_asg_nodes(&self, _asg: &Asg) -> Result<Vec<Instance>> {
        Ok(self
            .members
            .iter()
            .map(|id| Instance {
                id: id.clone(),
                status: Some(InstanceStatus {
                    state: InstanceState::Running,
                }),
            })
            .collect())
    }

    async fn delete_instances(&self, instances: &[InstanceRef]) -> Result<()> {
        self.deletes
            .lock()
            .unwrap()
            .push(instances.iter().map(|i| i.name.clone()).collect());
        *self.size.lock().unwrap() -= instances.len() as i64;
        Ok(())
    }

    async fn group_for_instance(&self, instance: &InstanceRef) -> Option<String> {
        self.owners.get(&instance.name).cloned()
    }

    async fn template_node(&self, _asg: &Asg) -> Result<Node> {
        Err(CloudError::NotFound("template".into()))
    }

    fn autoscaling_options(&self, _asg: &Asg) -> NodeGroupAutoscalingOptions {
        NodeGroupAutoscalingOptions::default()
    }
}

fn node(id: &str) -> Node {
    Node {
        spec: Some(NodeSpec {
            provider_id: Some(InstanceRef::new("us-east-1a", id).provider_id),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn group(backend: Arc<RecordingBackend>, min: i64, max: i64) -> AsgNodeGroup {
    let asg = Arc::new(Asg::new("workers", min, max, true));
    AsgNodeGroup::new(asg, backend, NodeGroupConfig::default())
}

#[tokio::test]
async fn test_identity_and_defaults() {
    let ng = group(Arc::new(RecordingBackend::new(1)), 1, 5);
    assert_eq!(ng.id(), "workers");
    assert_eq!(ng.debug(), "workers (1:5)");
    assert!(ng.exist());
    assert!(!ng.autoprovisioned());
    assert_eq!(ng.create().await.err(), Some(CloudError::NotImplemented));
    assert_eq!(ng.delete().await, Err(CloudError::NotImplemented));
    assert_eq!(ng.get_options().unwrap(), NodeGroupAutoscalingOptions::default());
}

#[tokio::test]
async fn test_target_size_reads_backend_until_shadow_set() {
    let backend = Arc::new(RecordingBackend::new(3));
    let ng = group(backend.clone(), 1, 5);
    assert_eq!(ng.target_size().await.unwrap(), 3);

    ng.asg().set_target_size(4);
    assert_eq!(ng.target_size().await.unwrap(), 4);
}

#[tokio::test]
async fn test_increase_size() {
    let backend = Arc::new(RecordingBackend::new(2));
    let ng = group(backend.clone(), 1, 5);

    assert!(matches!(ng.increase_size(0).await, Err(CloudError::InvalidArgument(_))));
    assert!(matches!(ng.increase_size(-1).await, Err(CloudError::InvalidArgument(_))));
    assert!(matches!(
        ng.increase_size(4).await,
        Err(CloudError::CapacityConstraint(_))
    ));
    assert!(backend.sets.lock().unwrap().is_empty());

    ng.increase_size(3).await.unwrap();
    assert_eq!(backend.size(), 5);
    assert_eq!(ng.target_size().await.unwrap(), 5);
}

#[tokio::test]
async fn test_decrease_target_size_keeps_registered_nodes() {
    let backend = Arc::new(RecordingBackend::new(4).owning("workers", &["i-1", "i-2"]));
    let ng = group(backend.clone(), 1, 5);

    assert!(matches!(
        ng.decrease_target_size(1).await,
        Err(CloudError::InvalidArgument(_))
    ));
    assert!(matches!(
        ng.decrease_target_size(-3).await,
        Err(CloudError::CapacityConstraint(_))
    ));
    assert_eq!(backend.size(), 4);

    ng.decrease_target_size(-2).await.unwrap();
    assert_eq!(backend.size(), 2);
    assert_eq!(ng.target_size().await.unwrap(), 2);
}

#[tokio::test]
async fn test_decrease_target_size_respects_min() {
    let backend = Arc::new(RecordingBackend::new(3));
    let ng = group(backend.clone(), 2, 5);
    assert!(matches!(
        ng.decrease_target_size(-2).await,
        Err(CloudError::CapacityConstraint(_))
    ));
    ng.decrease_target_size(-1).await.unwrap();
    assert_eq!(backend.size(), 2);
}

#[tokio::test]
async fn test_belongs() {
    let backend = Arc::new(
        RecordingBackend::new(2)
            .owning("workers", &["i-1"])
            .owning("other", &["i-2"]),
    );
    let ng = group(backend, 1, 5);
    assert!(ng.belongs(&node("i-1")).await.unwrap());
    assert!(!ng.belongs(&node("i-2")).await.unwrap());
    assert!(!ng.belongs(&node("i-3")).await.unwrap());
    assert!(ng.belongs(&Node::default()).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_deletes_share_one_batch() {
    let backend = Arc::new(RecordingBackend::new(4).owning("workers", &["i-1", "i-2", "i-3"]));
    let ng = group(backend.clone(), 1, 5);

    let first = [node("i-1")];
    let second = [node("i-2"), node("i-1")];
    let (a, b) = tokio::join!(ng.delete_nodes(&first), ng.delete_nodes(&second));
    a.unwrap();
    b.unwrap();

    let deletes = backend.deletes();
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0], vec!["i-1".to_string(), "i-2".to_string()]);
    assert_eq!(backend.size(), 2);
    assert_eq!(ng.target_size().await.unwrap(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_delete_waits_for_batching_delay() {
    let backend = Arc::new(RecordingBackend::new(3).owning("workers", &["i-1"]));
    let ng = group(backend.clone(), 1, 5);

    let start = tokio::time::Instant::now();
    ng.delete_nodes(&[node("i-1")]).await.unwrap();
    assert!(start.elapsed() >= DEFAULT_DELETE_BATCHING_DELAY);
}

#[tokio::test(start_paused = true)]
async fn test_delete_below_min_is_rejected() {
    let backend = Arc::new(RecordingBackend::new(2).owning("workers", &["i-1", "i-2"]));
    let ng = group(backend.clone(), 1, 5);

    let err = ng
        .delete_nodes(&[node("i-1"), node("i-2")])
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::CapacityConstraint(_)));
    assert!(backend.deletes().is_empty());
    assert_eq!(backend.size(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_delete_foreign_or_unknown_instance() {
    let backend = Arc::new(
        RecordingBackend::new(3)
            .owning("workers", &["i-1"])
            .owning("other", &["i-2"]),
    );
    let ng = group(backend.clone(), 0, 5);

    let err = ng
        .delete_nodes(&[node("i-1"), node("i-2")])
        .await
        .unwrap_err();
    assert_eq!(
        err,
        CloudError::GroupMismatch {
            instance: "cloud:///us-east-1a/i-2".into(),
            expected: "workers".into(),
            found: "other".into(),
        }
    );
    assert!(matches!(
        ng.delete_nodes(&[node("i-9")]).await,
        Err(CloudError::NotFound(_))
    ));
    assert!(backend.deletes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_size_read_after_delete_adjusts_shadow() {
    let backend = Arc::new(RecordingBackend::new(3).owning("workers", &["i-1", "i-2"]));
    backend.fail_reads_after_delete.store(true, Ordering::SeqCst);
    let ng = group(backend.clone(), 0, 5);

    let err = ng
        .delete_nodes(&[node("i-1"), node("i-2")])
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::Backend { .. }));
    assert_eq!(backend.deletes().len(), 1);
    assert_eq!(ng.asg().target_size(), Some(1));
}
