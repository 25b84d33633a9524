//! Shared configuration, error types, IDs, and observability primitives for RSF crates.
//!
//! Architecture role:
//! - defines fetch-pipeline configuration passed across layers
//! - provides common [`RsfError`] / [`Result`] contracts
//! - hosts the Prometheus metrics registry shared by pipeline instances
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]
//! - [`metrics`]

pub mod config;
pub mod error;
pub mod ids;
pub mod metrics;

pub use config::FetchConf;
pub use error::{Result, RsfError};
pub use ids::*;
pub use metrics::{MetricsRegistry, global_metrics};
