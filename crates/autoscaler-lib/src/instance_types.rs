//! Instance-type catalog
//!
//! A compiled-in table covers the common families; dynamic discovery from
//! the backend overrides it, and static rows fill whatever discovery missed.

use crate::cloud::{CloudWrapper, InstanceTypeInfo};
use crate::models::{InstanceType, ARCH_AMD64, ARCH_ARM64};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{info, warn};

/// (name, vCPU, memory MiB, GPUs, architecture)
const STATIC_INSTANCE_TYPES: &[(&str, i64, i64, i64, &str)] = &[
    ("c5.large", 2, 4096, 0, ARCH_AMD64),
    ("c5.xlarge", 4, 8192, 0, ARCH_AMD64),
    ("c5.2xlarge", 8, 16384, 0, ARCH_AMD64),
    ("c5.4xlarge", 16, 32768, 0, ARCH_AMD64),
    ("c5.9xlarge", 36, 73728, 0, ARCH_AMD64),
    ("c5.18xlarge", 72, 147456, 0, ARCH_AMD64),
    ("c6g.large", 2, 4096, 0, ARCH_ARM64),
    ("c6g.xlarge", 4, 8192, 0, ARCH_ARM64),
    ("c6g.2xlarge", 8, 16384, 0, ARCH_ARM64),
    ("g4dn.xlarge", 4, 16384, 1, ARCH_AMD64),
    ("g4dn.2xlarge", 8, 32768, 1, ARCH_AMD64),
    ("g4dn.12xlarge", 48, 196608, 4, ARCH_AMD64),
    ("g4dn.metal", 96, 393216, 8, ARCH_AMD64),
    ("m5.large", 2, 8192, 0, ARCH_AMD64),
    ("m5.xlarge", 4, 16384, 0, ARCH_AMD64),
    ("m5.2xlarge", 8, 32768, 0, ARCH_AMD64),
    ("m5.4xlarge", 16, 65536, 0, ARCH_AMD64),
    ("m5.8xlarge", 32, 131072, 0, ARCH_AMD64),
    ("m5.12xlarge", 48, 196608, 0, ARCH_AMD64),
    ("m5.16xlarge", 64, 262144, 0, ARCH_AMD64),
    ("m5.24xlarge", 96, 393216, 0, ARCH_AMD64),
    ("m6g.medium", 1, 4096, 0, ARCH_ARM64),
    ("m6g.large", 2, 8192, 0, ARCH_ARM64),
    ("m6g.xlarge", 4, 16384, 0, ARCH_ARM64),
    ("m6g.2xlarge", 8, 32768, 0, ARCH_ARM64),
    ("m6g.4xlarge", 16, 65536, 0, ARCH_ARM64),
    ("mac1.metal", 12, 32768, 0, ARCH_AMD64),
    ("p2.xlarge", 4, 62464, 1, ARCH_AMD64),
    ("p2.8xlarge", 32, 499712, 8, ARCH_AMD64),
    ("p2.16xlarge", 64, 749568, 16, ARCH_AMD64),
    ("p3.2xlarge", 8, 62464, 1, ARCH_AMD64),
    ("p3.8xlarge", 32, 249856, 4, ARCH_AMD64),
    ("p3.16xlarge", 64, 499712, 8, ARCH_AMD64),
    ("r5.large", 2, 16384, 0, ARCH_AMD64),
    ("r5.xlarge", 4, 32768, 0, ARCH_AMD64),
    ("r5.2xlarge", 8, 65536, 0, ARCH_AMD64),
    ("r5.4xlarge", 16, 131072, 0, ARCH_AMD64),
    ("r6g.large", 2, 16384, 0, ARCH_ARM64),
    ("r6g.xlarge", 4, 32768, 0, ARCH_ARM64),
    ("t3.nano", 2, 512, 0, ARCH_AMD64),
    ("t3.micro", 2, 1024, 0, ARCH_AMD64),
    ("t3.small", 2, 2048, 0, ARCH_AMD64),
    ("t3.medium", 2, 4096, 0, ARCH_AMD64),
    ("t3.large", 2, 8192, 0, ARCH_AMD64),
    ("t3.xlarge", 4, 16384, 0, ARCH_AMD64),
    ("t3.2xlarge", 8, 32768, 0, ARCH_AMD64),
    ("t4g.medium", 2, 4096, 0, ARCH_ARM64),
    ("t4g.large", 2, 8192, 0, ARCH_ARM64),
];

/// The compiled-in table keyed by instance-type name
pub fn static_instance_types() -> HashMap<String, InstanceType> {
    STATIC_INSTANCE_TYPES
        .iter()
        .map(|(name, vcpu, memory_mb, gpu, arch)| {
            (
                name.to_string(),
                InstanceType {
                    instance_type: name.to_string(),
                    vcpu: *vcpu,
                    memory_mb: *memory_mb,
                    gpu: *gpu,
                    architecture: arch.to_string(),
                },
            )
        })
        .collect()
}

/// Map a backend architecture name onto the orchestrator's `kubernetes.io/arch` value
pub fn normalize_architecture(arch: &str) -> &'static str {
    match arch {
        "arm64" => ARCH_ARM64,
        "x86_64" | "x86_64_mac" => ARCH_AMD64,
        _ => ARCH_AMD64,
    }
}

/// Convert one discovery row. GPU count is the sum over all GPU devices.
pub fn from_instance_type_info(info: &InstanceTypeInfo) -> InstanceType {
    InstanceType {
        instance_type: info.instance_type.clone(),
        vcpu: info.vcpus,
        memory_mb: info.memory_mib,
        gpu: info.gpus.iter().map(|g| g.count).sum(),
        architecture: info
            .supported_architectures
            .first()
            .map(|a| normalize_architecture(a))
            .unwrap_or(ARCH_AMD64)
            .to_string(),
    }
}

/// Lookup table consulted by template building and pricing
pub struct InstanceTypeCatalog {
    types: RwLock<HashMap<String, InstanceType>>,
}

impl Default for InstanceTypeCatalog {
    fn default() -> Self {
        Self::from_static()
    }
}

impl InstanceTypeCatalog {
    pub fn from_static() -> Self {
        Self {
            types: RwLock::new(static_instance_types()),
        }
    }

    /// Build from backend discovery, falling back to the static table on
    /// failure and for any type discovery did not return.
    pub async fn discover(service: &CloudWrapper) -> Self {
        let catalog = Self::from_static();
        match service.describe_instance_types().await {
            Ok(infos) => {
                let discovered = infos.len();
                catalog.merge(infos.iter().map(from_instance_type_info));
                info!(
                    discovered,
                    total = catalog.len(),
                    "Loaded instance types from cloud"
                );
            }
            Err(e) => {
                warn!(error = %e, "Failed to discover instance types, using static list");
            }
        }
        catalog
    }

    /// Insert or override rows
    pub fn merge(&self, types: impl IntoIterator<Item = InstanceType>) {
        let mut table = self.types.write().unwrap_or_else(|p| p.into_inner());
        for t in types {
            table.insert(t.instance_type.clone(), t);
        }
    }

    pub fn get(&self, name: &str) -> Option<InstanceType> {
        self.types
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.types.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All rows sorted by name
    pub fn list(&self) -> Vec<InstanceType> {
        let mut all: Vec<InstanceType> = self
            .types
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.instance_type.cmp(&b.instance_type));
        all
    }

    /// Distinct accelerator-bearing instance types
    pub fn gpu_types(&self) -> Vec<String> {
        self.list()
            .into_iter()
            .filter(|t| t.gpu > 0)
            .map(|t| t.instance_type)
            .collect()
    }
}
