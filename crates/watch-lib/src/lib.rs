//! Library for IQR-based metric anomaly detection and alerting
//!
//! This crate provides the core functionality for:
//! - Fetching bucketed metric series from ClickHouse
//! - Estimating expected ranges and classifying the latest bucket
//! - Rendering charts and delivering alerts to Telegram
//! - Orchestrating evaluation runs
//! - Health checks and observability

pub mod anomaly;
pub mod error;
pub mod health;
pub mod models;
pub mod notify;
pub mod observability;
pub mod pipeline;
pub mod source;

pub use error::{DeliveryError, SeriesError, SourceError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{StructuredLogger, WatchMetrics};
pub use pipeline::{DispatchMode, Pipeline, PipelineConfig, RetryPolicy, RunReport};
