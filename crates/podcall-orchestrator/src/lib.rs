//! Execution unit orchestration for podcall.
//!
//! This crate builds images for packaged methods and runs them as execution
//! units on one of two interchangeable backends:
//! - [`SingleHostOrchestrator`]: Local container engine, one container per unit
//! - [`ClusterOrchestrator`]: Kubernetes pods behind one service per method,
//!   built remotely by a privileged build agent
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  dyn Orchestrator                       │
//! │  start / stop / cleanup                                 │
//! └─────────────────────────────────────────────────────────┘
//!              │                              │
//!              ▼                              ▼
//! ┌─────────────────────────┐  ┌────────────────────────────┐
//! │ SingleHostOrchestrator  │  │   ClusterOrchestrator      │
//! │  - dyn ContainerEngine  │  │  - dyn ClusterApi          │
//! │  - port allocation      │  │  - dyn TagRegistry         │
//! └─────────────────────────┘  │  - BuildAgentProtocol      │
//!                              │  - readiness watches       │
//!                              └────────────────────────────┘
//! ```

pub mod build_agent;
pub mod cache_key;
pub mod cluster;
pub mod clustered;
pub mod docker_engine;
pub mod engine;
pub mod kube_cluster;
pub mod orchestrator;
pub mod readiness;
pub mod registry;
pub mod single_host;

pub use build_agent::{BuildAgent, BuildAgentProtocol, CommandOutput, Completion};
pub use cache_key::CacheKey;
pub use cluster::{ClusterApi, ExecSession, ServiceSpec, WorkloadSpec};
pub use clustered::ClusterOrchestrator;
pub use docker_engine::DockerEngine;
pub use engine::{ContainerEngine, ContainerSpec};
pub use kube_cluster::KubeCluster;
pub use orchestrator::{Orchestrator, StartRequest, connect};
pub use registry::{ImageCoordinates, RegistryClient, TagRegistry};
pub use single_host::SingleHostOrchestrator;
