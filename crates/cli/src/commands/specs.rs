//! Configuration and provider-ID validation commands

use anyhow::{bail, Result};
use autoscaler_lib::{AutoDiscoveryConfig, InstanceRef, NodeGroupSpec};
use serde::Serialize;
use tabled::Tabled;

use crate::output::{color_verdict, print_error, print_success, print_table, OutputFormat};

/// Row for node-group spec validation
#[derive(Tabled, Serialize)]
struct SpecRow {
    #[tabled(rename = "Spec")]
    spec: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Min")]
    min_size: String,
    #[tabled(rename = "Max")]
    max_size: String,
    #[tabled(rename = "Result")]
    #[serde(skip)]
    verdict: String,
    #[tabled(skip)]
    valid: bool,
    #[tabled(skip)]
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Row for auto-discovery spec validation
#[derive(Tabled, Serialize)]
struct DiscoveryRow {
    #[tabled(rename = "Spec")]
    spec: String,
    #[tabled(rename = "Tags")]
    tags: String,
    #[tabled(rename = "Result")]
    #[serde(skip)]
    verdict: String,
    #[tabled(skip)]
    valid: bool,
    #[tabled(skip)]
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Row for provider-ID parsing
#[derive(Tabled, Serialize)]
struct ProviderIdRow {
    #[tabled(rename = "Provider ID")]
    provider_id: String,
    #[tabled(rename = "Zone")]
    zone: String,
    #[tabled(rename = "Instance")]
    instance: String,
    #[tabled(rename = "Placeholder")]
    placeholder: bool,
}

fn report(invalid: &[(String, String)], total: usize, what: &str, format: OutputFormat) -> Result<()> {
    if invalid.is_empty() {
        if matches!(format, OutputFormat::Table) {
            print_success(&format!("{total} {what} valid"));
        }
        return Ok(());
    }
    for (spec, error) in invalid {
        print_error(&format!("{spec}: {error}"));
    }
    bail!("{} of {total} {what} invalid", invalid.len())
}

/// Validate static node-group specs
pub fn validate_node_group_specs(
    specs: &[String],
    scale_to_zero_supported: bool,
    format: OutputFormat,
) -> Result<()> {
    let rows: Vec<SpecRow> = specs
        .iter()
        .map(|spec| match NodeGroupSpec::parse(spec, scale_to_zero_supported) {
            Ok(parsed) => SpecRow {
                spec: spec.clone(),
                name: parsed.name,
                min_size: parsed.min_size.to_string(),
                max_size: parsed.max_size.to_string(),
                verdict: color_verdict(true),
                valid: true,
                error: None,
            },
            Err(e) => SpecRow {
                spec: spec.clone(),
                name: "-".to_string(),
                min_size: "-".to_string(),
                max_size: "-".to_string(),
                verdict: color_verdict(false),
                valid: false,
                error: Some(e.to_string()),
            },
        })
        .collect();

    print_table(&rows, format);

    let invalid: Vec<(String, String)> = rows
        .iter()
        .filter_map(|r| r.error.clone().map(|e| (r.spec.clone(), e)))
        .collect();
    report(&invalid, rows.len(), "node group specs", format)
}

/// Validate auto-discovery specs
pub fn validate_discovery_specs(specs: &[String], format: OutputFormat) -> Result<()> {
    let rows: Vec<DiscoveryRow> = specs
        .iter()
        .map(|spec| match spec.parse::<AutoDiscoveryConfig>() {
            Ok(parsed) => DiscoveryRow {
                spec: spec.clone(),
                tags: parsed
                    .tags
                    .iter()
                    .map(|(k, v)| if v.is_empty() { k.clone() } else { format!("{k}={v}") })
                    .collect::<Vec<_>>()
                    .join("\n"),
                verdict: color_verdict(true),
                valid: true,
                error: None,
            },
            Err(e) => DiscoveryRow {
                spec: spec.clone(),
                tags: "-".to_string(),
                verdict: color_verdict(false),
                valid: false,
                error: Some(e.to_string()),
            },
        })
        .collect();

    print_table(&rows, format);

    let invalid: Vec<(String, String)> = rows
        .iter()
        .filter_map(|r| r.error.clone().map(|e| (r.spec.clone(), e)))
        .collect();
    report(&invalid, rows.len(), "auto-discovery specs", format)
}

/// Parse provider IDs; fails on the first malformed one
pub fn parse_provider_ids(ids: &[String], format: OutputFormat) -> Result<()> {
    let rows = ids
        .iter()
        .map(|id| {
            let parsed = InstanceRef::from_provider_id(id)?;
            Ok(ProviderIdRow {
                placeholder: parsed.is_placeholder(),
                provider_id: parsed.provider_id,
                zone: parsed.zone,
                instance: parsed.name,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    print_table(&rows, format);
    Ok(())
}
