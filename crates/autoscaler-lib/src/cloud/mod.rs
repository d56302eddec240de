//! Cloud auto-scaling API surface
//!
//! This module provides:
//! - `AutoScalingApi`: the raw per-request calls a cloud backend must serve
//! - `CloudWrapper`: batching, paging, tag AND-filtering, deadlines and metrics
//!   on top of any `AutoScalingApi`
//! - `RestAutoScalingApi`: a JSON-over-HTTP implementation

mod rest;
mod wrapper;

#[cfg(test)]
pub(crate) mod fake;

pub use rest::{RestAutoScalingApi, RestConfig};
pub use wrapper::{CloudWrapper, WrapperConfig, DEFAULT_VERSION};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An auto-scaling group as described by the backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AutoScalingGroup {
    pub auto_scaling_group_name: String,
    pub min_size: i64,
    pub max_size: i64,
    pub desired_capacity: i64,
    #[serde(default)]
    pub availability_zones: Vec<String>,
    #[serde(default)]
    pub launch_configuration_name: Option<String>,
    #[serde(default)]
    pub launch_template: Option<LaunchTemplateSpecification>,
    #[serde(default)]
    pub mixed_instances_policy: Option<MixedInstancesPolicy>,
    #[serde(default)]
    pub instances: Vec<GroupInstance>,
    #[serde(default)]
    pub tags: Vec<TagDescription>,
    /// Set while the group is being deleted
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LaunchTemplateSpecification {
    pub launch_template_name: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MixedInstancesPolicy {
    pub launch_template: LaunchTemplateSpecification,
    /// Instance-type overrides in priority order
    #[serde(default)]
    pub overrides: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GroupInstance {
    pub instance_id: String,
    pub availability_zone: String,
    #[serde(default)]
    pub lifecycle_state: String,
    #[serde(default)]
    pub health_status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TagDescription {
    pub resource_id: String,
    pub key: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LaunchConfiguration {
    pub launch_configuration_name: String,
    pub instance_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LaunchTemplateVersion {
    pub launch_template_name: String,
    #[serde(default)]
    pub instance_type: Option<String>,
}

/// Server-side filter; rows matching any filter are returned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Filter {
    pub name: String,
    pub values: Vec<String>,
}

impl Filter {
    pub fn key(key: &str) -> Self {
        Self {
            name: "key".to_string(),
            values: vec![key.to_string()],
        }
    }

    pub fn value(value: &str) -> Self {
        Self {
            name: "value".to_string(),
            values: vec![value.to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GpuDeviceInfo {
    pub count: i64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceTypeInfo {
    pub instance_type: String,
    pub vcpus: i64,
    pub memory_mib: i64,
    #[serde(default)]
    pub gpus: Vec<GpuDeviceInfo>,
    #[serde(default)]
    pub supported_architectures: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeGroupsRequest {
    pub auto_scaling_group_names: Vec<String>,
    pub max_records: usize,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeGroupsPage {
    #[serde(default)]
    pub auto_scaling_groups: Vec<AutoScalingGroup>,
    #[serde(default)]
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeTagsRequest {
    pub filters: Vec<Filter>,
    pub max_records: usize,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeTagsPage {
    #[serde(default)]
    pub tags: Vec<TagDescription>,
    #[serde(default)]
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SetDesiredCapacityRequest {
    pub auto_scaling_group_name: String,
    pub desired_capacity: i64,
    pub honor_cooldown: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TerminateInstanceRequest {
    pub instance_id: String,
    pub should_decrement_desired_capacity: bool,
}

/// Scaling activity started by a termination
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScalingActivity {
    #[serde(default)]
    pub activity_id: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeInstanceTypesPage {
    #[serde(default)]
    pub instance_types: Vec<InstanceTypeInfo>,
    #[serde(default)]
    pub next_token: Option<String>,
}

/// Raw cloud auto-scaling calls, one backend request each
#[async_trait]
pub trait AutoScalingApi: Send + Sync {
    async fn describe_auto_scaling_groups(
        &self,
        request: DescribeGroupsRequest,
    ) -> Result<DescribeGroupsPage>;

    async fn describe_launch_configurations(
        &self,
        names: Vec<String>,
    ) -> Result<Vec<LaunchConfiguration>>;

    async fn describe_launch_template_versions(
        &self,
        name: String,
        version: String,
    ) -> Result<Vec<LaunchTemplateVersion>>;

    async fn describe_tags(&self, request: DescribeTagsRequest) -> Result<DescribeTagsPage>;

    async fn set_desired_capacity(&self, request: SetDesiredCapacityRequest) -> Result<()>;

    async fn terminate_instance_in_auto_scaling_group(
        &self,
        request: TerminateInstanceRequest,
    ) -> Result<ScalingActivity>;

    async fn describe_instance_types(
        &self,
        next_token: Option<String>,
    ) -> Result<DescribeInstanceTypesPage>;
}
