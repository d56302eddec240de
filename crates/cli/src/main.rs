//! Cluster Autoscaler CLI
//!
//! An offline operator tool for validating node-group configuration,
//! inspecting provider IDs and the instance-type catalog, and estimating
//! node and pod prices.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{instance_types, pricing, specs};

/// Cluster Autoscaler CLI
#[derive(Parser)]
#[command(name = "ca")]
#[command(author, version, about = "Operator CLI for the Cluster Autoscaler cloud provider", long_about = None)]
pub struct Cli {
    /// Output format
    #[arg(long, short, global = true, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Static node-group specs (`min:max:name`)
    #[command(subcommand)]
    Spec(SpecCommands),

    /// Auto-discovery specs (`asg:tag=k1,k2=v`)
    #[command(subcommand)]
    Discovery(DiscoveryCommands),

    /// Provider IDs (`cloud:///<zone>/<instance-id>`)
    #[command(subcommand)]
    ProviderId(ProviderIdCommands),

    /// Built-in instance-type catalog
    #[command(subcommand)]
    InstanceTypes(InstanceTypeCommands),

    /// Price estimates
    #[command(subcommand)]
    Price(PriceCommands),
}

#[derive(Subcommand)]
pub enum SpecCommands {
    /// Validate node-group specs
    Validate {
        /// Specs to validate
        #[arg(required = true)]
        specs: Vec<String>,

        /// Reject groups with a minimum size of zero
        #[arg(long)]
        no_scale_to_zero: bool,
    },
}

#[derive(Subcommand)]
pub enum DiscoveryCommands {
    /// Validate auto-discovery specs
    Validate {
        /// Specs to validate
        #[arg(required = true)]
        specs: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum ProviderIdCommands {
    /// Split provider IDs into zone and instance
    Parse {
        /// Provider IDs to parse
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum InstanceTypeCommands {
    /// List catalog entries
    List {
        /// Only show types with GPUs
        #[arg(long)]
        gpu_only: bool,

        /// Filter by architecture (amd64, arm64)
        #[arg(long)]
        arch: Option<String>,
    },

    /// Show one instance type and the template capacity it produces
    Show {
        /// Instance type name, e.g. m5.large
        name: String,
    },
}

#[derive(Subcommand)]
pub enum PriceCommands {
    /// Price a pod from its resource requests
    Pod {
        /// CPU request, e.g. 500m
        #[arg(long, default_value = "0")]
        cpu: String,

        /// Memory request, e.g. 2Gi
        #[arg(long, default_value = "0")]
        memory: String,

        /// GPU request
        #[arg(long)]
        gpu: Option<String>,

        /// Billing window, e.g. 1h30m
        #[arg(long, default_value = "1h")]
        duration: String,
    },

    /// Price a node of a group from an hourly price table
    Node {
        /// Node group name
        #[arg(long)]
        group: String,

        /// Hourly group prices, `group=usd;...`
        #[arg(long, env = "AUTOSCALER_GROUP_PRICES")]
        prices: String,

        /// Billing window, e.g. 1h30m
        #[arg(long, default_value = "1h")]
        duration: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Execute command
    match cli.command {
        Commands::Spec(SpecCommands::Validate {
            specs,
            no_scale_to_zero,
        }) => {
            specs::validate_node_group_specs(&specs, !no_scale_to_zero, cli.format)?;
        }
        Commands::Discovery(DiscoveryCommands::Validate { specs }) => {
            specs::validate_discovery_specs(&specs, cli.format)?;
        }
        Commands::ProviderId(ProviderIdCommands::Parse { ids }) => {
            specs::parse_provider_ids(&ids, cli.format)?;
        }
        Commands::InstanceTypes(cmd) => match cmd {
            InstanceTypeCommands::List { gpu_only, arch } => {
                instance_types::list(gpu_only, arch.as_deref(), cli.format);
            }
            InstanceTypeCommands::Show { name } => {
                instance_types::show(&name, cli.format)?;
            }
        },
        Commands::Price(cmd) => match cmd {
            PriceCommands::Pod {
                cpu,
                memory,
                gpu,
                duration,
            } => {
                pricing::pod_price(&cpu, &memory, gpu.as_deref(), &duration, cli.format)?;
            }
            PriceCommands::Node {
                group,
                prices,
                duration,
            } => {
                pricing::node_price(&group, &prices, &duration, cli.format).await?;
            }
        },
    }

    Ok(())
}
