//! Pod restart agent
//!
//! Configuration and the health API of the `pod-restart-agent` binary.

pub mod api;
pub mod config;
