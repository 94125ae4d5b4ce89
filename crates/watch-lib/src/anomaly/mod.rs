//! Anomaly detection for bucketed engagement metrics
//!
//! This module provides:
//! - Dynamic bounds from trailing interquartile range
//! - Classification of the latest bucket against those bounds
//! - Alert message composition

mod classifier;
mod composer;
mod estimator;

pub use classifier::{classify_point, AnomalyClassifier, AnomalyEvent, Breach, Deviation, Verdict};
pub use composer::compose_alert;
pub use estimator::{quantile, BoundEstimator, DEFAULT_IQR_MULTIPLIER, DEFAULT_TRAILING_WINDOW};
