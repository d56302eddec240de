//! In-memory `AutoScalingApi` that records every request

use super::*;
use crate::error::CloudError;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// One recorded backend request
#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    DescribeGroups(Vec<String>),
    DescribeLaunchConfigurations(Vec<String>),
    DescribeLaunchTemplateVersions(String, String),
    DescribeTags(Vec<Filter>),
    SetDesiredCapacity(String, i64, bool),
    Terminate(String, bool),
    DescribeInstanceTypes,
}

#[derive(Default)]
struct FakeState {
    groups: BTreeMap<String, AutoScalingGroup>,
    launch_configurations: HashMap<String, String>,
    launch_templates: HashMap<(String, String), String>,
    instance_types: Vec<InstanceTypeInfo>,
    calls: Vec<ApiCall>,
    failures: VecDeque<CloudError>,
    delay: Option<Duration>,
}

#[derive(Default)]
pub struct FakeAutoScalingApi {
    state: Mutex<FakeState>,
}

impl AutoScalingGroup {
    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.push(TagDescription {
            resource_id: self.auto_scaling_group_name.clone(),
            key: key.to_string(),
            value: value.to_string(),
        });
        self
    }

    pub fn with_instances(mut self, ids: &[&str]) -> Self {
        let zone = self
            .availability_zones
            .first()
            .cloned()
            .unwrap_or_default();
        for id in ids {
            self.instances.push(GroupInstance {
                instance_id: id.to_string(),
                availability_zone: zone.clone(),
                lifecycle_state: "InService".to_string(),
                health_status: "Healthy".to_string(),
            });
        }
        self
    }

    pub fn with_launch_configuration(mut self, name: &str) -> Self {
        self.launch_configuration_name = Some(name.to_string());
        self
    }

    pub fn with_launch_template(mut self, name: &str, version: &str) -> Self {
        self.launch_template = Some(LaunchTemplateSpecification {
            launch_template_name: name.to_string(),
            version: (!version.is_empty()).then(|| version.to_string()),
        });
        self
    }
}

impl FakeAutoScalingApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// A group in zone `us-east-1a` launched from configuration `<name>-lc`
    pub fn group(name: &str, min: i64, max: i64, desired: i64) -> AutoScalingGroup {
        AutoScalingGroup {
            auto_scaling_group_name: name.to_string(),
            min_size: min,
            max_size: max,
            desired_capacity: desired,
            availability_zones: vec!["us-east-1a".to_string()],
            launch_configuration_name: Some(format!("{name}-lc")),
            ..Default::default()
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn add_group(&self, group: AutoScalingGroup) {
        self.lock()
            .groups
            .insert(group.auto_scaling_group_name.clone(), group);
    }

    pub fn remove_group(&self, name: &str) {
        self.lock().groups.remove(name);
    }

    pub fn add_launch_configuration(&self, name: &str, instance_type: &str) {
        self.lock()
            .launch_configurations
            .insert(name.to_string(), instance_type.to_string());
    }

    pub fn add_launch_template(&self, name: &str, version: &str, instance_type: &str) {
        self.lock().launch_templates.insert(
            (name.to_string(), version.to_string()),
            instance_type.to_string(),
        );
    }

    pub fn add_instance_type(&self, info: InstanceTypeInfo) {
        self.lock().instance_types.push(info);
    }

    /// Fail the next request of any kind with `err`
    pub fn fail_next(&self, err: CloudError) {
        self.lock().failures.push_back(err);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.lock().delay = Some(delay);
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn count(&self, pred: impl Fn(&ApiCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn desired(&self, name: &str) -> Option<i64> {
        self.lock().groups.get(name).map(|g| g.desired_capacity)
    }

    pub fn group_snapshot(&self, name: &str) -> Option<AutoScalingGroup> {
        self.lock().groups.get(name).cloned()
    }

    async fn begin(&self, call: ApiCall) -> Result<()> {
        let (delay, failure) = {
            let mut state = self.lock();
            state.calls.push(call);
            (state.delay, state.failures.pop_front())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn page<T: Clone>(items: &[T], max_records: usize, next_token: Option<String>) -> (Vec<T>, Option<String>) {
    let start: usize = next_token.and_then(|t| t.parse().ok()).unwrap_or(0);
    let end = (start + max_records.max(1)).min(items.len());
    let next = (end < items.len()).then(|| end.to_string());
    (items[start.min(end)..end].to_vec(), next)
}

#[async_trait]
impl AutoScalingApi for FakeAutoScalingApi {
    async fn describe_auto_scaling_groups(
        &self,
        request: DescribeGroupsRequest,
    ) -> Result<DescribeGroupsPage> {
        self.begin(ApiCall::DescribeGroups(request.auto_scaling_group_names.clone()))
            .await?;
        let state = self.lock();
        let matching: Vec<AutoScalingGroup> = request
            .auto_scaling_group_names
            .iter()
            .filter_map(|n| state.groups.get(n).cloned())
            .collect();
        let (groups, next_token) = page(&matching, request.max_records, request.next_token);
        Ok(DescribeGroupsPage {
            auto_scaling_groups: groups,
            next_token,
        })
    }

    async fn describe_launch_configurations(
        &self,
        names: Vec<String>,
    ) -> Result<Vec<LaunchConfiguration>> {
        self.begin(ApiCall::DescribeLaunchConfigurations(names.clone()))
            .await?;
        let state = self.lock();
        Ok(names
            .into_iter()
            .filter_map(|n| {
                state
                    .launch_configurations
                    .get(&n)
                    .map(|t| LaunchConfiguration {
                        launch_configuration_name: n.clone(),
                        instance_type: t.clone(),
                    })
            })
            .collect())
    }

    async fn describe_launch_template_versions(
        &self,
        name: String,
        version: String,
    ) -> Result<Vec<LaunchTemplateVersion>> {
        self.begin(ApiCall::DescribeLaunchTemplateVersions(
            name.clone(),
            version.clone(),
        ))
        .await?;
        let state = self.lock();
        Ok(state
            .launch_templates
            .get(&(name.clone(), version))
            .map(|t| {
                vec![LaunchTemplateVersion {
                    launch_template_name: name,
                    instance_type: Some(t.clone()),
                }]
            })
            .unwrap_or_default())
    }

    async fn describe_tags(&self, request: DescribeTagsRequest) -> Result<DescribeTagsPage> {
        self.begin(ApiCall::DescribeTags(request.filters.clone()))
            .await?;
        let state = self.lock();
        let rows: Vec<TagDescription> = state
            .groups
            .values()
            .flat_map(|g| g.tags.iter().cloned())
            .filter(|t| {
                request.filters.iter().any(|f| match f.name.as_str() {
                    "key" => f.values.contains(&t.key),
                    "value" => f.values.contains(&t.value),
                    _ => false,
                })
            })
            .collect();
        let (tags, next_token) = page(&rows, request.max_records, request.next_token);
        Ok(DescribeTagsPage { tags, next_token })
    }

    async fn set_desired_capacity(&self, request: SetDesiredCapacityRequest) -> Result<()> {
        self.begin(ApiCall::SetDesiredCapacity(
            request.auto_scaling_group_name.clone(),
            request.desired_capacity,
            request.honor_cooldown,
        ))
        .await?;
        let mut state = self.lock();
        let group = state
            .groups
            .get_mut(&request.auto_scaling_group_name)
            .ok_or_else(|| CloudError::NotFound(request.auto_scaling_group_name.clone()))?;
        group.desired_capacity = request.desired_capacity;
        Ok(())
    }

    async fn terminate_instance_in_auto_scaling_group(
        &self,
        request: TerminateInstanceRequest,
    ) -> Result<ScalingActivity> {
        self.begin(ApiCall::Terminate(
            request.instance_id.clone(),
            request.should_decrement_desired_capacity,
        ))
        .await?;
        let mut state = self.lock();
        for group in state.groups.values_mut() {
            if let Some(pos) = group
                .instances
                .iter()
                .position(|i| i.instance_id == request.instance_id)
            {
                group.instances.remove(pos);
                if request.should_decrement_desired_capacity {
                    group.desired_capacity -= 1;
                }
                return Ok(ScalingActivity {
                    activity_id: format!("act-{}", request.instance_id),
                    description: format!("Terminating instance: {}", request.instance_id),
                });
            }
        }
        Err(CloudError::NotFound(request.instance_id))
    }

    async fn describe_instance_types(
        &self,
        next_token: Option<String>,
    ) -> Result<DescribeInstanceTypesPage> {
        self.begin(ApiCall::DescribeInstanceTypes).await?;
        let state = self.lock();
        let (instance_types, next_token) = page(&state.instance_types, 100, next_token);
        Ok(DescribeInstanceTypesPage {
            instance_types,
            next_token,
        })
    }
}
