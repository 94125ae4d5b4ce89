//! Metric watcher agent: configuration, scheduling and the HTTP API

pub mod api;
pub mod config;
pub mod scheduler;
