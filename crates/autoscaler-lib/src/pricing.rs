//! Hourly price model for nodes and pods
//!
//! Nodes are priced per group from an operator-supplied table; pods are
//! priced from their container requests at fixed per-resource rates. Both
//! bill whole started minutes.

use crate::error::{CloudError, Result};
use crate::manager::AsgManager;
use crate::models::resources;
use crate::provider_id;
use crate::quantity;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Node, Pod};
use std::collections::HashMap;
use std::sync::Arc;

/// Annotation naming the group a node belongs to; checked before the index
pub const NODE_GROUP_ANNOTATION: &str = "cluster-autoscaler.kubernetes.io/node-group";

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Per-resource hourly rates in USD
#[derive(Debug, Clone, PartialEq)]
pub struct PriceConfig {
    pub cpu_per_hour: f64,
    pub memory_gib_per_hour: f64,
    pub gpu_per_hour: f64,
}

impl Default for PriceConfig {
    fn default() -> Self {
        // Half of the reference instance price covers vCPUs, half memory.
        let cpu_per_hour = 0.02775;
        let memory_gib_per_hour = 0.006938;

        // GPU reference shape: p2.xlarge, 4 vCPU, 61 GiB, 1 GPU at $0.90/h.
        let (price, vcpus, memory_gib, gpus) = (0.9, 4.0, 61.0, 1.0);
        let base = vcpus * cpu_per_hour + memory_gib * memory_gib_per_hour;
        let gpu_per_hour = (price - 0.2 * base) / gpus;

        Self {
            cpu_per_hour,
            memory_gib_per_hour,
            gpu_per_hour,
        }
    }
}

/// Billable hours between `start` and `end`, rounded up to whole minutes
pub fn hours(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let millis = (end - start).num_milliseconds().max(0);
    let minutes = (millis + 59_999) / 60_000;
    minutes as f64 / 60.0
}

/// Parse a `;`-separated `group=usd_per_hour` price table
pub fn parse_group_prices(raw: &str) -> Result<HashMap<String, f64>> {
    raw.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (group, price) = entry.split_once('=').ok_or_else(|| {
                CloudError::Config(format!("group price {entry:?} is not group=usd"))
            })?;
            let group = group.trim();
            if group.is_empty() {
                return Err(CloudError::Config(format!("empty group name in {entry:?}")));
            }
            let price: f64 = price
                .trim()
                .parse()
                .map_err(|_| CloudError::Config(format!("invalid price in {entry:?}")))?;
            Ok((group.to_string(), price))
        })
        .collect()
}

#[async_trait]
pub trait PricingModel: Send + Sync {
    async fn node_price(&self, node: &Node, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<f64>;
    fn pod_price(&self, pod: &Pod, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<f64>;
}

/// Resolves the node group a node belongs to
#[async_trait]
pub trait GroupResolver: Send + Sync {
    async fn group_for_node(&self, node: &Node) -> Option<String>;
}

#[async_trait]
impl GroupResolver for AsgManager {
    async fn group_for_node(&self, node: &Node) -> Option<String> {
        let instance = provider_id::from_node(node).ok()?;
        self.asg_for_instance(&instance)
            .await
            .map(|asg| asg.name().to_string())
    }
}

/// Price model keyed by auto-scaling group name
pub struct AsgPriceModel {
    resolver: Arc<dyn GroupResolver>,
    group_prices: HashMap<String, f64>,
    rates: PriceConfig,
}

impl AsgPriceModel {
    pub fn new(
        resolver: Arc<dyn GroupResolver>,
        group_prices: HashMap<String, f64>,
        rates: PriceConfig,
    ) -> Self {
        Self {
            resolver,
            group_prices,
            rates,
        }
    }

    pub fn rates(&self) -> &PriceConfig {
        &self.rates
    }

    async fn group_of(&self, node: &Node) -> Option<String> {
        let annotated = node
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(NODE_GROUP_ANNOTATION))
            .filter(|g| !g.is_empty())
            .cloned();
        match annotated {
            Some(group) => Some(group),
            None => self.resolver.group_for_node(node).await,
        }
    }

    /// Hourly cost of the resources requested by `pod`
    pub fn pod_hourly_price(&self, pod: &Pod) -> Result<f64> {
        let containers = pod.spec.as_ref().map(|s| s.containers.as_slice()).unwrap_or_default();
        let mut price = 0.0;
        for container in containers {
            let Some(requests) = container.resources.as_ref().and_then(|r| r.requests.as_ref()) else {
                continue;
            };
            if let Some(cpu) = requests.get(resources::CPU) {
                let milli = quantity::milli_value(cpu).ok_or_else(|| {
                    CloudError::InvalidArgument(format!("cpu request {:?}", cpu.0))
                })?;
                price += milli as f64 / 1000.0 * self.rates.cpu_per_hour;
            }
            if let Some(memory) = requests.get(resources::MEMORY) {
                let bytes = quantity::value(memory).ok_or_else(|| {
                    CloudError::InvalidArgument(format!("memory request {:?}", memory.0))
                })?;
                price += bytes as f64 / GIB * self.rates.memory_gib_per_hour;
            }
            if let Some(gpu) = requests.get(resources::GPU) {
                let milli = quantity::milli_value(gpu).ok_or_else(|| {
                    CloudError::InvalidArgument(format!("gpu request {:?}", gpu.0))
                })?;
                price += milli as f64 / 1000.0 * self.rates.gpu_per_hour;
            }
        }
        Ok(price)
    }
}

#[async_trait]
impl PricingModel for AsgPriceModel {
    async fn node_price(&self, node: &Node, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<f64> {
        let node_name = node.metadata.name.as_deref().unwrap_or_default();
        let group = self
            .group_of(node)
            .await
            .ok_or_else(|| CloudError::NotFound(format!("node group for node {node_name}")))?;
        let hourly = self
            .group_prices
            .get(&group)
            .ok_or_else(|| CloudError::NotFound(format!("price for node group {group}")))?;
        Ok(hourly * hours(start, end))
    }

    fn pod_price(&self, pod: &Pod, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<f64> {
        Ok(self.pod_hourly_price(pod)? * hours(start, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use k8s_openapi::api::core::v1::{Container, PodSpec, ResourceRequirements};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use std::collections::BTreeMap;

    struct NoResolver;

    #[async_trait]
    impl GroupResolver for NoResolver {
        async fn group_for_node(&self, _node: &Node) -> Option<String> {
            None
        }
    }

    struct StaticResolver(&'static str);

    #[async_trait]
    impl GroupResolver for StaticResolver {
        async fn group_for_node(&self, _node: &Node) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    fn annotated_node(group: &str) -> Node {
        let mut node = Node::default();
        node.metadata.name = Some("n1".into());
        node.metadata.annotations = Some(BTreeMap::from([(
            NODE_GROUP_ANNOTATION.to_string(),
            group.to_string(),
        )]));
        node
    }

    fn model(resolver: Arc<dyn GroupResolver>) -> AsgPriceModel {
        AsgPriceModel::new(
            resolver,
            HashMap::from([("k8s-AutoscalingGroupWorker-AAAAAA".to_string(), 0.111)]),
            PriceConfig::default(),
        )
    }

    fn pod(cpu: &str, memory: &str, gpu: Option<&str>) -> Pod {
        let mut requests = BTreeMap::from([
            (resources::CPU.to_string(), Quantity(cpu.into())),
            (resources::MEMORY.to_string(), Quantity(memory.into())),
        ]);
        if let Some(gpu) = gpu {
            requests.insert(resources::GPU.to_string(), Quantity(gpu.into()));
        }
        Pod {
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "main".into(),
                    resources: Some(ResourceRequirements {
                        requests: Some(requests),
                        ..Default::default()
                    }),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_hours_round_up_to_minutes() {
        let t0 = Utc::now();
        assert_eq!(hours(t0, t0), 0.0);
        assert_eq!(hours(t0, t0 + Duration::hours(1)), 1.0);
        assert_eq!(hours(t0, t0 + Duration::seconds(1)), 1.0 / 60.0);
        assert_eq!(hours(t0, t0 + Duration::seconds(61)), 2.0 / 60.0);
        assert_eq!(hours(t0, t0 + Duration::milliseconds(60_500)), 2.0 / 60.0);
        assert_eq!(hours(t0, t0 + Duration::milliseconds(1)), 1.0 / 60.0);
        assert_eq!(hours(t0 + Duration::hours(1), t0), 0.0);
    }

    #[test]
    fn test_parse_group_prices() {
        let prices = parse_group_prices("a=0.1; b = 0.25 ;").unwrap();
        assert_eq!(prices.len(), 2);
        assert_eq!(prices["b"], 0.25);
        assert!(parse_group_prices("").unwrap().is_empty());
        assert!(matches!(parse_group_prices("a"), Err(CloudError::Config(_))));
        assert!(parse_group_prices("a=x").is_err());
        assert!(parse_group_prices("=1").is_err());
    }

    #[test]
    fn test_gpu_rate_derivation() {
        let rates = PriceConfig::default();
        let base = 4.0 * 0.02775 + 61.0 * 0.006938;
        assert!(close(rates.gpu_per_hour, 0.9 - 0.2 * base));
    }

    #[tokio::test]
    async fn test_node_price_for_annotated_group() {
        let model = model(Arc::new(NoResolver));
        let node = annotated_node("k8s-AutoscalingGroupWorker-AAAAAA");
        let t0 = Utc::now();
        let price = model
            .node_price(&node, t0, t0 + Duration::hours(1))
            .await
            .unwrap();
        assert!(close(price, 0.111));
    }

    #[tokio::test]
    async fn test_node_price_lookup_failures() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::hours(1);

        let unpriced = model(Arc::new(NoResolver));
        let err = unpriced
            .node_price(&annotated_node("unpriced-group"), t0, t1)
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let err = unpriced
            .node_price(&Node::default(), t0, t1)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_node_price_falls_back_to_resolver() {
        let model = model(Arc::new(StaticResolver("k8s-AutoscalingGroupWorker-AAAAAA")));
        let t0 = Utc::now();
        let price = model
            .node_price(&Node::default(), t0, t0 + Duration::minutes(30))
            .await
            .unwrap();
        assert!(close(price, 0.0555));
    }

    #[tokio::test]
    async fn test_node_price_idempotent_and_linear() {
        let model = model(Arc::new(NoResolver));
        let node = annotated_node("k8s-AutoscalingGroupWorker-AAAAAA");
        let t0 = Utc::now();
        let t1 = t0 + Duration::minutes(17);
        let t2 = t1 + Duration::minutes(43);

        assert_eq!(model.node_price(&node, t0, t0).await.unwrap(), 0.0);
        let split = model.node_price(&node, t0, t1).await.unwrap()
            + model.node_price(&node, t1, t2).await.unwrap();
        let whole = model.node_price(&node, t0, t2).await.unwrap();
        assert!(close(split, whole));
    }

    #[test]
    fn test_pod_price() {
        let model = model(Arc::new(NoResolver));
        let rates = PriceConfig::default();
        let t0 = Utc::now();
        let t1 = t0 + Duration::hours(2);

        let price = model.pod_price(&pod("500m", "2Gi", None), t0, t1).unwrap();
        assert!(close(price, 2.0 * (0.5 * rates.cpu_per_hour + 2.0 * rates.memory_gib_per_hour)));

        let gpu = model.pod_price(&pod("1", "1Gi", Some("1")), t0, t1).unwrap();
        assert!(close(
            gpu,
            2.0 * (rates.cpu_per_hour + rates.memory_gib_per_hour + rates.gpu_per_hour)
        ));

        assert_eq!(model.pod_price(&Pod::default(), t0, t1).unwrap(), 0.0);
        assert!(model.pod_price(&pod("lots", "1Gi", None), t0, t1).is_err());
    }
}
