//! Sidecar orchestration for container-backed MCP servers.
//!
//! A sidecar is a single-replica workload plus a service, created in a
//! dedicated namespace from an adapter's parsed launch command. The
//! orchestrator owns idempotence, rollback and teardown; strategies only
//! perform single resource operations.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                         SidecarOrchestrator                          │
//! │                                                                      │
//! │   deploy(adapter, launch, env)        status / logs / teardown       │
//! │         │                                      │                     │
//! │         ▼                                      ▼                     │
//! │   ┌────────────┐   ┌──────────────────┐   ┌──────────────────────┐   │
//! │   │ Translator │──▶│ per-name lock    │──▶│ dyn DeploymentStrategy│  │
//! │   └────────────┘   └──────────────────┘   └──────────┬───────────┘   │
//! │                                                      │               │
//! │                                   ┌──────────────────┴────────┐      │
//! │                                   ▼                           ▼      │
//! │                           ┌──────────────┐          ┌──────────────┐ │
//! │                           │ KubeStrategy │          │   Kubectl    │ │
//! │                           │ (typed API)  │          │ (CLI + fwd)  │ │
//! │                           └──────────────┘          └──────────────┘ │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`detect::select_strategy`] picks the strategy once at startup.

pub mod detect;
pub mod error;
pub mod kube_api;
pub mod kubectl;
pub mod manifest;
pub mod orchestrator;
pub mod ports;
pub mod strategy;

pub use detect::select_strategy;
pub use error::{Result, SidecarError};
pub use orchestrator::{DeployAction, SidecarOrchestrator, SidecarState};
pub use strategy::{
    DeploymentStrategy, ServiceState, SidecarReport, SidecarStatus, WorkloadState,
};
