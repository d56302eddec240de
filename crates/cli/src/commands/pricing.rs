//! Price estimate commands

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use autoscaler_lib::models::resources;
use autoscaler_lib::pricing::{parse_group_prices, GroupResolver, NODE_GROUP_ANNOTATION};
use autoscaler_lib::{template, AsgPriceModel, PriceConfig, PricingModel};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Container, Node, Pod, PodSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::output::{format_usd, print_json, OutputFormat};

/// Offline resolver: groups come only from the node annotation
struct AnnotationOnly;

#[async_trait]
impl GroupResolver for AnnotationOnly {
    async fn group_for_node(&self, _node: &Node) -> Option<String> {
        None
    }
}

#[derive(Serialize)]
struct Estimate {
    subject: String,
    hours: f64,
    price_usd: f64,
}

fn window(duration: &str) -> Result<chrono::Duration> {
    let d = template::parse_duration(duration)
        .ok_or_else(|| anyhow!("invalid duration {duration:?}, expected e.g. 1h30m"))?;
    chrono::Duration::from_std(d).context("duration out of range")
}

/// Billing window of `duration` starting now
fn billing_window(duration: &str) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let start = Utc::now();
    let end = start
        .checked_add_signed(window(duration)?)
        .ok_or_else(|| anyhow!("duration {duration:?} out of range"))?;
    Ok((start, end))
}

fn print_estimate(estimate: &Estimate, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(estimate),
        OutputFormat::Table => println!(
            "{}: {} for {:.2}h",
            estimate.subject,
            format_usd(estimate.price_usd),
            estimate.hours
        ),
    }
}

fn model(prices: HashMap<String, f64>) -> AsgPriceModel {
    AsgPriceModel::new(Arc::new(AnnotationOnly), prices, PriceConfig::default())
}

/// Price a single-container pod with the given requests
pub fn pod_price(
    cpu: &str,
    memory: &str,
    gpu: Option<&str>,
    duration: &str,
    format: OutputFormat,
) -> Result<()> {
    let mut requests = BTreeMap::from([
        (resources::CPU.to_string(), Quantity(cpu.to_string())),
        (resources::MEMORY.to_string(), Quantity(memory.to_string())),
    ]);
    if let Some(gpu) = gpu {
        requests.insert(resources::GPU.to_string(), Quantity(gpu.to_string()));
    }
    let pod = Pod {
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "estimate".to_string(),
                resources: Some(ResourceRequirements {
                    requests: Some(requests),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            ..Default::default()
        }),
        ..Default::default()
    };

    let (start, end) = billing_window(duration)?;
    let price = model(HashMap::new()).pod_price(&pod, start, end)?;

    print_estimate(
        &Estimate {
            subject: format!("pod cpu={cpu} memory={memory}"),
            hours: autoscaler_lib::pricing::hours(start, end),
            price_usd: price,
        },
        format,
    );
    Ok(())
}

/// Price a node of `group` from the hourly price table
pub async fn node_price(group: &str, prices: &str, duration: &str, format: OutputFormat) -> Result<()> {
    let mut node = Node::default();
    node.metadata.name = Some(format!("{group}-estimate"));
    node.metadata.annotations = Some(BTreeMap::from([(
        NODE_GROUP_ANNOTATION.to_string(),
        group.to_string(),
    )]));

    let (start, end) = billing_window(duration)?;
    let price = model(parse_group_prices(prices)?)
        .node_price(&node, start, end)
        .await?;

    print_estimate(
        &Estimate {
            subject: format!("node of {group}"),
            hours: autoscaler_lib::pricing::hours(start, end),
            price_usd: price,
        },
        format,
    );
    Ok(())
}
