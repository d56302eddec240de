//! Template nodes for groups that have no live members
//!
//! Group tags under `k8s.io/cluster-autoscaler/node-template/` add labels,
//! taints, extra resources and per-group autoscaling options on top of the
//! generic labels derived from the instance type and zone.

use crate::models::{
    labels, resources, AsgTemplate, NodeGroupAutoscalingOptions, InstanceType,
};
use crate::quantity;
use k8s_openapi::api::core::v1::{Node, NodeCondition, NodeSpec, NodeStatus, Taint};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

pub const LABEL_TAG_PREFIX: &str = "k8s.io/cluster-autoscaler/node-template/label/";
pub const TAINT_TAG_PREFIX: &str = "k8s.io/cluster-autoscaler/node-template/taint/";
pub const RESOURCES_TAG_PREFIX: &str = "k8s.io/cluster-autoscaler/node-template/resources/";
pub const OPTIONS_TAG_PREFIX: &str = "k8s.io/cluster-autoscaler/node-template/autoscaling-options/";

/// Tag prefixes marking instances of tagged-machine pools
pub const CLUSTER_TAG_PREFIX: &str = "k8s-cluster-";
pub const NODEPOOL_TAG_PREFIX: &str = "k8s-nodepool-";

/// Pod slots advertised by every template node
pub const MAX_PODS_PER_NODE: i64 = 110;

const TAINT_EFFECTS: &[&str] = &["NoSchedule", "PreferNoSchedule", "NoExecute"];

const OPT_SCALE_DOWN_UTILIZATION: &str = "scaledownutilizationthreshold";
const OPT_SCALE_DOWN_GPU_UTILIZATION: &str = "scaledowngpuutilizationthreshold";
const OPT_SCALE_DOWN_UNNEEDED_TIME: &str = "scaledownunneededtime";
const OPT_SCALE_DOWN_UNREADY_TIME: &str = "scaledownunreadytime";
const OPT_IGNORE_DAEMONSETS_UTILIZATION: &str = "ignoredaemonsetsutilization";

/// Region of a zone such as `us-east-1a`: the zone without its last character
pub fn region_of(zone: &str) -> String {
    let mut chars = zone.chars();
    chars.next_back();
    chars.as_str().to_string()
}

pub fn extract_labels_from_tags(tags: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    tags.iter()
        .filter_map(|(k, v)| {
            k.strip_prefix(LABEL_TAG_PREFIX)
                .filter(|label| !label.is_empty())
                .map(|label| (label.to_string(), v.clone()))
        })
        .collect()
}

/// Taints from `<prefix><key>` tags valued `<value>:<effect>`. Malformed
/// values and unknown effects are skipped.
pub fn extract_taints_from_tags(tags: &BTreeMap<String, String>) -> Vec<Taint> {
    let mut taints = Vec::new();
    for (k, v) in tags {
        let Some(key) = k.strip_prefix(TAINT_TAG_PREFIX).filter(|k| !k.is_empty()) else {
            continue;
        };
        let Some((value, effect)) = v.rsplit_once(':') else {
            debug!(tag = %k, value = %v, "Ignoring malformed taint tag");
            continue;
        };
        if !TAINT_EFFECTS.contains(&effect) {
            debug!(tag = %k, effect = %effect, "Ignoring taint tag with unknown effect");
            continue;
        }
        taints.push(Taint {
            key: key.to_string(),
            value: (!value.is_empty()).then(|| value.to_string()),
            effect: effect.to_string(),
            time_added: None,
        });
    }
    taints
}

/// Extra capacity entries; unparsable quantities are skipped
pub fn extract_resources_from_tags(tags: &BTreeMap<String, String>) -> BTreeMap<String, Quantity> {
    tags.iter()
        .filter_map(|(k, v)| {
            let name = k.strip_prefix(RESOURCES_TAG_PREFIX)?;
            if name.is_empty() || quantity::parse(v).is_none() {
                debug!(tag = %k, value = %v, "Ignoring resource tag");
                return None;
            }
            Some((name.to_string(), Quantity(v.clone())))
        })
        .collect()
}

/// Apply option tags over `defaults`; unparsable values keep the default
pub fn extract_autoscaling_options(
    tags: &BTreeMap<String, String>,
    defaults: &NodeGroupAutoscalingOptions,
) -> NodeGroupAutoscalingOptions {
    let mut options = defaults.clone();
    for (k, v) in tags {
        let Some(option) = k.strip_prefix(OPTIONS_TAG_PREFIX) else {
            continue;
        };
        let applied = match option {
            OPT_SCALE_DOWN_UTILIZATION => v
                .parse()
                .map(|f| options.scale_down_utilization_threshold = f)
                .is_ok(),
            OPT_SCALE_DOWN_GPU_UTILIZATION => v
                .parse()
                .map(|f| options.scale_down_gpu_utilization_threshold = f)
                .is_ok(),
            OPT_SCALE_DOWN_UNNEEDED_TIME => parse_duration(v)
                .map(|d| options.scale_down_unneeded_time = d)
                .is_some(),
            OPT_SCALE_DOWN_UNREADY_TIME => parse_duration(v)
                .map(|d| options.scale_down_unready_time = d)
                .is_some(),
            OPT_IGNORE_DAEMONSETS_UTILIZATION => v
                .parse()
                .map(|b| options.ignore_daemonsets_utilization = b)
                .is_ok(),
            _ => false,
        };
        if !applied {
            debug!(tag = %k, value = %v, "Ignoring autoscaling option tag");
        }
    }
    options
}

/// Parse durations like `10m`, `1h30m`, `45s`, `1.5h`
pub fn parse_duration(s: &str) -> Option<Duration> {
    if s.is_empty() {
        return None;
    }
    let mut total = 0f64;
    let mut number = String::new();
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
            continue;
        }
        let unit = match c {
            'h' => 3600.0,
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                0.001
            }
            'm' => 60.0,
            's' => 1.0,
            _ => return None,
        };
        let n: f64 = number.parse().ok()?;
        total += n * unit;
        number.clear();
    }
    if !number.is_empty() || !total.is_finite() || total < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(total).ok()
}

/// Labels every node of `template` carries regardless of tags
pub fn build_generic_labels(template: &AsgTemplate, node_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (labels::OS.to_string(), "linux".to_string()),
        (
            labels::ARCH.to_string(),
            template.instance_type.architecture.clone(),
        ),
        (
            labels::INSTANCE_TYPE.to_string(),
            template.instance_type.instance_type.clone(),
        ),
        (labels::REGION.to_string(), template.region.clone()),
        (labels::ZONE.to_string(), template.zone.clone()),
        (labels::HOSTNAME.to_string(), node_name.to_string()),
    ])
}

fn capacity(instance_type: &InstanceType) -> BTreeMap<String, Quantity> {
    BTreeMap::from([
        (resources::CPU.to_string(), quantity::from_count(instance_type.vcpu)),
        (
            resources::MEMORY.to_string(),
            quantity::from_mebibytes(instance_type.memory_mb),
        ),
        (resources::PODS.to_string(), quantity::from_count(MAX_PODS_PER_NODE)),
        (resources::GPU.to_string(), quantity::from_count(instance_type.gpu)),
    ])
}

/// Synthesise a Ready node for `group` from its template
pub fn build_node_from_template(group: &str, template: &AsgTemplate) -> Node {
    let node_name = format!("{group}-asg-{}", rand::random::<u32>());

    let mut capacity = capacity(&template.instance_type);
    capacity.extend(extract_resources_from_tags(&template.tags));

    let mut node_labels = build_generic_labels(template, &node_name);
    if let Some((_, pool)) = pool_membership(&template.tags) {
        node_labels.insert(labels::POOL.to_string(), pool);
    }
    node_labels.extend(extract_labels_from_tags(&template.tags));

    let taints = extract_taints_from_tags(&template.tags);

    Node {
        metadata: ObjectMeta {
            name: Some(node_name.clone()),
            labels: Some(node_labels),
            ..Default::default()
        },
        spec: Some(NodeSpec {
            taints: (!taints.is_empty()).then_some(taints),
            ..Default::default()
        }),
        status: Some(NodeStatus {
            allocatable: Some(capacity.clone()),
            capacity: Some(capacity),
            conditions: Some(ready_conditions()),
            ..Default::default()
        }),
    }
}

fn ready_conditions() -> Vec<NodeCondition> {
    let condition = |type_: &str, status: &str| NodeCondition {
        type_: type_.to_string(),
        status: status.to_string(),
        ..Default::default()
    };
    vec![
        condition("Ready", "True"),
        condition("NetworkUnavailable", "False"),
        condition("DiskPressure", "False"),
        condition("MemoryPressure", "False"),
        condition("PIDPressure", "False"),
    ]
}

/// (cluster, pool) for a machine carrying both pool tags
pub fn pool_membership(tags: &BTreeMap<String, String>) -> Option<(String, String)> {
    let find = |prefix: &str| {
        tags.keys()
            .find_map(|k| k.strip_prefix(prefix).filter(|s| !s.is_empty()))
            .map(str::to_string)
    };
    Some((find(CLUSTER_TAG_PREFIX)?, find(NODEPOOL_TAG_PREFIX)?))
}
