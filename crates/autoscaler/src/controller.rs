//! Control loop
//!
//! A single timer drives provider refresh (auto-discovery reconciliation)
//! and the manager's periodic housekeeping: the hourly instance-index
//! rebuild and the launch-shape cache sweep.

use autoscaler_lib::{AsgCloudProvider, CloudProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub struct ControlLoop {
    provider: Arc<AsgCloudProvider>,
    scan_interval: Duration,
}

impl ControlLoop {
    pub fn new(provider: Arc<AsgCloudProvider>, scan_interval: Duration) -> Self {
        Self {
            provider,
            scan_interval,
        }
    }

    /// Run until `shutdown` fires
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.scan_interval.as_secs(),
            "Starting control loop"
        );

        let mut ticker = interval(self.scan_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let start = Instant::now();
                    self.tick().await;
                    ticks += 1;
                    debug!(
                        tick = ticks,
                        node_groups = self.provider.node_groups().len(),
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Control loop tick complete"
                    );
                }
                _ = shutdown.recv() => {
                    info!("Shutting down control loop");
                    break;
                }
            }
        }
    }

    pub async fn tick(&self) {
        if let Err(e) = self.provider.refresh().await {
            warn!(error = %e, "Node group refresh failed");
        }
        self.provider.manager().tick().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoscaler_lib::{
        AsgManager, AsgPriceModel, CloudWrapper, DiscoveryOptions, InstanceTypeCatalog,
        ManagerConfig, NodeGroupConfig, PriceConfig, ResourceLimiter, RestAutoScalingApi,
        RestConfig, WrapperConfig,
    };
    use std::collections::HashMap;

    fn offline_provider() -> Arc<AsgCloudProvider> {
        let api = RestAutoScalingApi::new(RestConfig {
            endpoint: "http://127.0.0.1:9".to_string(),
            connect_timeout: Duration::from_millis(100),
        })
        .unwrap();
        let wrapper = CloudWrapper::new(
            Arc::new(api),
            WrapperConfig {
                request_timeout: Duration::from_millis(500),
                ..Default::default()
            },
        );
        let discovery = DiscoveryOptions::parse(&["1:3:workers"], &[], true).unwrap();
        let manager = Arc::new(AsgManager::without_refresh(
            wrapper,
            discovery,
            Arc::new(InstanceTypeCatalog::from_static()),
            ManagerConfig::default(),
        ));
        let pricing = AsgPriceModel::new(manager.clone(), HashMap::new(), PriceConfig::default());
        Arc::new(AsgCloudProvider::new(
            manager,
            Arc::new(pricing),
            ResourceLimiter::default(),
            NodeGroupConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_tick_survives_unreachable_cloud() {
        let provider = offline_provider();
        let control = ControlLoop::new(provider.clone(), Duration::from_secs(10));
        control.tick().await;
        assert_eq!(provider.node_groups().len(), 1);
    }

    #[tokio::test]
    async fn test_loop_stops_on_shutdown() {
        let provider = offline_provider();
        let control = ControlLoop::new(provider, Duration::from_secs(3600));
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(control.run(rx));
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
