//! Streaming agronomic advisory service.
//!
//! Readings arrive on `sensor-data`, threshold patches on `system-settings`.
//! For every reading the [`analyzer`] runs the feature [`features::Pipeline`]
//! once, asks the rule and statistical [`strategy`] implementations for each
//! target, and publishes one [`models::AdvisoryPacket`] on `system-advice`.
//! The [`alerts`] aggregator turns rising edges in that stream into debounced
//! notifications delivered through a [`notify::NotificationSink`].

pub mod alerts;
pub mod analyzer;
pub mod bus;
pub mod config;
pub mod dataset;
pub mod error;
pub mod features;
pub mod models;
pub mod notify;
pub mod routes;
pub mod settings;
pub mod source;
pub mod strategy;
pub mod training;

pub use config::Config;
pub use error::{AdvisorError, Result};
