//! Correlation core services.
//!
//! Pure decision logic (`cel` aside) lives in `dedup`, `correlation`,
//! `topology`, and the matching half of `maintenance`; the `*_service`
//! and processor modules own persistence and lifecycle.

pub mod correlation;
pub mod correlation_service;
pub mod dedup;
pub mod dedup_service;
pub mod maintenance;
pub mod pipeline;
pub mod tenant_config;
pub mod topology;
pub mod topology_processor;
pub mod workflow;
