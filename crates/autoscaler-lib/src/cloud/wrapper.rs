//! Batching, paging and instrumentation over the raw cloud API
//!
//! Every call is bounded by `WrapperConfig::request_timeout` and reported to
//! the request-duration histogram as `(endpoint, status)`.

use super::{
    AutoScalingApi, AutoScalingGroup, DescribeGroupsRequest, DescribeTagsRequest, Filter,
    InstanceTypeInfo, SetDesiredCapacityRequest, TagDescription, TerminateInstanceRequest,
};
use crate::error::{CloudError, Result};
use crate::observability::CloudMetrics;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Version token sent when a launch template does not pin a version
pub const DEFAULT_VERSION: &str = "$Default";

/// Backend limit on group names per describe call
const MAX_GROUP_NAMES_PER_DESCRIBE: usize = 50;

/// Page size requested from paged describe calls
const MAX_RECORDS_PER_PAGE: usize = 100;

#[derive(Debug, Clone)]
pub struct WrapperConfig {
    /// Group (and launch configuration) names per describe request
    pub describe_batch_size: usize,
    pub max_records: usize,
    /// Deadline applied to every individual cloud request
    pub request_timeout: Duration,
}

impl Default for WrapperConfig {
    fn default() -> Self {
        Self {
            describe_batch_size: MAX_GROUP_NAMES_PER_DESCRIBE,
            max_records: MAX_RECORDS_PER_PAGE,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Instrumented, batching facade over an `AutoScalingApi`
#[derive(Clone)]
pub struct CloudWrapper {
    api: Arc<dyn AutoScalingApi>,
    config: WrapperConfig,
    metrics: CloudMetrics,
}

impl CloudWrapper {
    pub fn new(api: Arc<dyn AutoScalingApi>, config: WrapperConfig) -> Self {
        Self {
            api,
            config,
            metrics: CloudMetrics::new(),
        }
    }

    pub fn config(&self) -> &WrapperConfig {
        &self.config
    }

    async fn call<T, F>(&self, endpoint: &'static str, request: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let result = match tokio::time::timeout(self.config.request_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(CloudError::Timeout {
                operation: endpoint,
                after: self.config.request_timeout,
            }),
        };

        let status = match &result {
            Ok(_) => "success".to_string(),
            Err(e) => e.status_label(),
        };
        self.metrics.observe_request(endpoint, &status, start);

        if let Err(e) = &result {
            if e.is_not_found() {
                debug!(endpoint, error = %e, "Cloud request returned not found");
            } else {
                warn!(endpoint, error = %e, "Cloud request failed");
            }
        }
        result
    }

    /// Describe the named groups, `describe_batch_size` names per request,
    /// following pagination within each batch.
    pub async fn describe_groups(&self, names: &[String]) -> Result<Vec<AutoScalingGroup>> {
        let mut groups = Vec::new();
        for batch in names.chunks(self.config.describe_batch_size.max(1)) {
            let mut next_token = None;
            loop {
                let request = DescribeGroupsRequest {
                    auto_scaling_group_names: batch.to_vec(),
                    max_records: self.config.max_records,
                    next_token: next_token.take(),
                };
                let page = self
                    .call(
                        "DescribeAutoScalingGroupsPages",
                        self.api.describe_auto_scaling_groups(request),
                    )
                    .await?;
                groups.extend(page.auto_scaling_groups);
                match page.next_token {
                    Some(token) if !token.is_empty() => next_token = Some(token),
                    _ => break,
                }
            }
        }
        Ok(groups)
    }

    /// Instance type for each named launch configuration
    pub async fn launch_configuration_instance_types(
        &self,
        names: &[String],
    ) -> Result<HashMap<String, String>> {
        let mut types = HashMap::new();
        for batch in names.chunks(self.config.describe_batch_size.max(1)) {
            let configurations = self
                .call(
                    "DescribeLaunchConfigurations",
                    self.api.describe_launch_configurations(batch.to_vec()),
                )
                .await?;
            for lc in configurations {
                types.insert(lc.launch_configuration_name, lc.instance_type);
            }
        }
        Ok(types)
    }

    /// Instance type of one launch template version. An empty version means
    /// the template's default version.
    pub async fn launch_template_instance_type(&self, name: &str, version: &str) -> Result<String> {
        let version = if version.is_empty() {
            DEFAULT_VERSION
        } else {
            version
        };
        let versions = self
            .call(
                "DescribeLaunchTemplateVersions",
                self.api
                    .describe_launch_template_versions(name.to_string(), version.to_string()),
            )
            .await?;

        versions
            .into_iter()
            .next()
            .ok_or_else(|| {
                CloudError::NotFound(format!("launch template {name} version {version}"))
            })?
            .instance_type
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                CloudError::NotFound(format!(
                    "instance type for launch template {name} version {version}"
                ))
            })
    }

    /// All tag rows matching `filters`, following pagination.
    pub async fn describe_tags_by_filter(&self, filters: Vec<Filter>) -> Result<Vec<TagDescription>> {
        let mut tags = Vec::new();
        let mut next_token = None;
        loop {
            let request = DescribeTagsRequest {
                filters: filters.clone(),
                max_records: self.config.max_records,
                next_token: next_token.take(),
            };
            let page = self
                .call("DescribeTagsPages", self.api.describe_tags(request))
                .await?;
            tags.extend(page.tags);
            match page.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }
        Ok(tags)
    }

    /// Names of groups carrying every tag in `tags`. Empty values match any value.
    ///
    /// The backend ORs filters together, so the intersection is computed here
    /// by counting matched keys per resource.
    pub async fn group_names_by_tags(&self, tags: &BTreeMap<String, String>) -> Result<Vec<String>> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }

        let mut filters = Vec::new();
        for (key, value) in tags {
            filters.push(Filter::key(key));
            if !value.is_empty() {
                filters.push(Filter::value(value));
            }
        }

        let rows = self.describe_tags_by_filter(filters).await?;

        let mut matched: HashMap<&str, HashSet<&str>> = HashMap::new();
        for row in &rows {
            let Some(wanted) = tags.get(&row.key) else {
                continue;
            };
            if wanted.is_empty() || *wanted == row.value {
                matched
                    .entry(row.resource_id.as_str())
                    .or_default()
                    .insert(row.key.as_str());
            }
        }

        let mut names: Vec<String> = matched
            .into_iter()
            .filter(|(_, keys)| keys.len() == tags.len())
            .map(|(name, _)| name.to_string())
            .collect();
        names.sort();
        Ok(names)
    }

    /// Describe every group matching all `tags`
    pub async fn describe_groups_by_tags(
        &self,
        tags: &BTreeMap<String, String>,
    ) -> Result<Vec<AutoScalingGroup>> {
        let names = self.group_names_by_tags(tags).await?;
        if names.is_empty() {
            return Ok(Vec::new());
        }
        self.describe_groups(&names).await
    }

    /// Set desired capacity, bypassing the group's cooldown
    pub async fn set_desired_capacity(&self, group: &str, desired: i64) -> Result<()> {
        let request = SetDesiredCapacityRequest {
            auto_scaling_group_name: group.to_string(),
            desired_capacity: desired,
            honor_cooldown: false,
        };
        self.call("SetDesiredCapacity", self.api.set_desired_capacity(request))
            .await
    }

    /// Terminate one instance and shrink its group's desired capacity with it
    pub async fn terminate_instance(&self, instance_id: &str) -> Result<()> {
        let request = TerminateInstanceRequest {
            instance_id: instance_id.to_string(),
            should_decrement_desired_capacity: true,
        };
        let activity = self
            .call(
                "TerminateInstanceInAutoScalingGroup",
                self.api.terminate_instance_in_auto_scaling_group(request),
            )
            .await?;
        info!(
            instance = %instance_id,
            activity = %activity.description,
            "Terminated instance"
        );
        Ok(())
    }

    /// Every instance type the backend offers, following pagination
    pub async fn describe_instance_types(&self) -> Result<Vec<InstanceTypeInfo>> {
        let mut types = Vec::new();
        let mut next_token = None;
        loop {
            let page = self
                .call(
                    "DescribeInstanceTypesPages",
                    self.api.describe_instance_types(next_token.take()),
                )
                .await?;
            types.extend(page.instance_types);
            match page.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }
        Ok(types)
    }
}
