//! CLI command implementations

pub mod instance_types;
pub mod pricing;
pub mod specs;
