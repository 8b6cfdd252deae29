//! Personnel RAKF - Robust Adaptive Kalman Filter localization service
//!
//! Fuses per-tag UWB position and IMU velocity telemetry into smoothed
//! position estimates using an independent scalar filter per spatial axis,
//! coordinated by `RakfLocalizer` and driven by the async service loop in
//! `service`.

#![warn(unused_extern_crates)]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod estimator;
pub mod persistence;
pub mod service;
pub mod telemetry;
pub mod transport;

pub use coordinator::{CoordinatorConfig, EstimateRecord, RakfLocalizer, TelemetryRecord};
pub use error::ServiceError;
pub use estimator::{ModelType, Rakf1D, RakfConfig};
