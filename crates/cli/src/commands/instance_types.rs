//! Instance-type catalog commands

use anyhow::{anyhow, Result};
use autoscaler_lib::{template, AsgTemplate, InstanceType, InstanceTypeCatalog};
use colored::Colorize;
use serde::Serialize;
use std::collections::BTreeMap;
use tabled::Tabled;

use crate::output::{format_mebibytes, print_info, print_json, print_table, OutputFormat};

/// Row for instance type table
#[derive(Tabled, Serialize)]
struct InstanceTypeRow {
    #[tabled(rename = "Type")]
    instance_type: String,
    #[tabled(rename = "vCPU")]
    vcpu: i64,
    #[tabled(rename = "Memory")]
    #[serde(skip)]
    memory: String,
    #[tabled(skip)]
    memory_mb: i64,
    #[tabled(rename = "GPU")]
    gpu: i64,
    #[tabled(rename = "Arch")]
    architecture: String,
}

impl From<InstanceType> for InstanceTypeRow {
    fn from(t: InstanceType) -> Self {
        Self {
            memory: format_mebibytes(t.memory_mb),
            instance_type: t.instance_type,
            vcpu: t.vcpu,
            memory_mb: t.memory_mb,
            gpu: t.gpu,
            architecture: t.architecture,
        }
    }
}

/// Template capacity a group of this type would advertise
#[derive(Serialize)]
struct TemplatePreview {
    instance_type: InstanceType,
    capacity: BTreeMap<String, String>,
    labels: BTreeMap<String, String>,
}

/// List the built-in catalog
pub fn list(gpu_only: bool, arch: Option<&str>, format: OutputFormat) {
    let rows: Vec<InstanceTypeRow> = InstanceTypeCatalog::from_static()
        .list()
        .into_iter()
        .filter(|t| !gpu_only || t.gpu > 0)
        .filter(|t| arch.map_or(true, |a| t.architecture == a))
        .map(InstanceTypeRow::from)
        .collect();
    print_table(&rows, format);
}

/// Show one catalog entry with its template capacity
pub fn show(name: &str, format: OutputFormat) -> Result<()> {
    let instance_type = InstanceTypeCatalog::from_static()
        .get(name)
        .ok_or_else(|| anyhow!("unknown instance type {name:?}"))?;

    let preview_template = AsgTemplate {
        instance_type: instance_type.clone(),
        region: "preview-1".to_string(),
        zone: "preview-1a".to_string(),
        tags: BTreeMap::new(),
    };
    let node = template::build_node_from_template("preview", &preview_template);
    let capacity = node
        .status
        .and_then(|s| s.capacity)
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, v.0))
        .collect();
    let labels = node.metadata.labels.unwrap_or_default();

    let preview = TemplatePreview {
        instance_type,
        capacity,
        labels,
    };

    match format {
        OutputFormat::Json => print_json(&preview),
        OutputFormat::Table => {
            println!("{}", preview.instance_type.instance_type.bold());
            println!("{}", "=".repeat(40));
            println!("vCPU:          {}", preview.instance_type.vcpu);
            println!("Memory:        {}", format_mebibytes(preview.instance_type.memory_mb));
            println!("GPU:           {}", preview.instance_type.gpu);
            println!("Architecture:  {}", preview.instance_type.architecture.cyan());
            println!();
            println!("{}", "Template capacity".bold());
            println!("{}", "-".repeat(40));
            for (resource, quantity) in &preview.capacity {
                println!("{:<14} {}", format!("{resource}:"), quantity);
            }
            print_info("labels and taints from group tags are added on top of this capacity");
        }
    }
    Ok(())
}
