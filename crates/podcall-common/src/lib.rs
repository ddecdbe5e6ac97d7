//! Common types, errors, and configuration for podcall.
//!
//! This crate provides shared functionality used across the podcall workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures and the TOML configuration file
//! - The data model shared by the orchestrator and the router

pub mod config;
pub mod config_file;
pub mod error;
pub mod model;

pub use config::{
    Backend, CacheKeyStrategy, DockerConfig, KubernetesConfig, OrchestratorConfig,
    RegistryConfig, RegistryKind, RouterConfig, RuntimeConfig,
};
pub use config_file::{ConfigFile, MethodEntry, ReturnKind};
pub use error::{OrchestratorError, RegistryProbeError, RouterError};
pub use model::{ArtifactRef, ContainerizationPolicy, ExecutionUnit, MethodIdentity};
