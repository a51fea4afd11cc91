//! Library for the pod restart collector
//!
//! This crate provides the core functionality for:
//! - Detecting container restarts from pod watch updates
//! - Deduplicated, rate-limited work queueing per pod
//! - Muting repeated alerts for the same pod
//! - Assembling restart diagnostics and dispatching them to Slack
//! - Health checks and observability

pub mod cluster;
pub mod controller;
pub mod diagnostics;
pub mod error;
pub mod filter;
pub mod health;
pub mod ledger;
pub mod models;
pub mod observability;
pub mod queue;
pub mod reconciler;
pub mod slack;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::StructuredLogger;
