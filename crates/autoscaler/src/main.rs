//! Cluster autoscaler - cloud provider daemon
//!
//! Bootstraps the auto-scaling group provider from environment
//! configuration and runs the control loop until interrupted.

use anyhow::{Context, Result};
use autoscaler_lib::{
    AsgCloudProvider, AsgManager, AsgPriceModel, CloudProvider, CloudWrapper,
    InstanceTypeCatalog, PriceConfig, RestAutoScalingApi, StructuredLogger, PROVIDER_NAME,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod controller;

const AUTOSCALER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting cluster-autoscaler");

    let config = config::AutoscalerConfig::load()?;
    let discovery = config.discovery_options()?;
    let group_prices = config.group_prices()?;
    info!(
        endpoint = %config.cloud_endpoint,
        static_groups = discovery.node_group_specs.len(),
        auto_discovery = discovery.uses_auto_discovery(),
        "Autoscaler configured"
    );

    let api = RestAutoScalingApi::new(config.rest_config()).context("creating cloud client")?;
    let wrapper = CloudWrapper::new(Arc::new(api), config.wrapper_config());

    let catalog = if config.use_static_instance_list {
        InstanceTypeCatalog::from_static()
    } else {
        InstanceTypeCatalog::discover(&wrapper).await
    };

    let auto_discovery = discovery.uses_auto_discovery();
    let manager = Arc::new(
        AsgManager::new(wrapper, discovery, Arc::new(catalog), config.manager_config())
            .await
            .context("bootstrapping auto-scaling group manager")?,
    );

    let pricing = AsgPriceModel::new(manager.clone(), group_prices, PriceConfig::default());
    let provider = Arc::new(AsgCloudProvider::new(
        manager,
        Arc::new(pricing),
        config.resource_limiter(),
        config.node_group_config(),
    ));

    let logger = StructuredLogger::new(PROVIDER_NAME);
    logger.log_startup(AUTOSCALER_VERSION, provider.node_groups().len(), auto_discovery);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let control = controller::ControlLoop::new(provider.clone(), config.scan_interval());
    let control_handle = tokio::spawn(control.run(shutdown_rx));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");

    let _ = shutdown_tx.send(());
    control_handle.await.context("control loop panicked")?;
    provider.cleanup().await?;
    info!("Shutdown complete");

    Ok(())
}
