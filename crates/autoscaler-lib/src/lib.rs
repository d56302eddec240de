//! Cloud-provider core for the cluster autoscaler
//!
//! This crate provides:
//! - A cloud SDK adapter with batching, paging, timeouts and request metrics
//! - Instance-type catalog and launch-shape resolution with a jittered TTL cache
//! - An instance→group index with a negative cache
//! - The auto-scaling group manager and the node groups built on it
//! - The provider facade, pricing, discovery parsing and eviction budgets

pub mod asg;
pub mod cache;
pub mod cloud;
pub mod discovery;
pub mod error;
pub mod eviction;
pub mod index;
pub mod instance_types;
pub mod launch_shape;
pub mod manager;
pub mod models;
pub mod node_group;
pub mod observability;
pub mod pricing;
pub mod provider;
pub mod provider_id;
pub mod quantity;
pub mod template;

#[cfg(test)]
mod tests;

pub use cloud::{AutoScalingApi, CloudWrapper, RestAutoScalingApi, RestConfig, WrapperConfig};
pub use discovery::{AutoDiscoveryConfig, DiscoveryOptions, NodeGroupSpec};
pub use error::{CloudError, Result};
pub use instance_types::InstanceTypeCatalog;
pub use manager::{AsgManager, ManagerConfig};
pub use models::*;
pub use node_group::{AsgNodeGroup, NodeGroup, NodeGroupConfig};
pub use observability::{CloudMetrics, StructuredLogger};
pub use pricing::{AsgPriceModel, PriceConfig, PricingModel};
pub use provider::{AsgCloudProvider, CloudProvider, PROVIDER_NAME};
pub use provider_id::InstanceRef;
