// coordinator.rs

// Composes up to three independent scalar RAKF filters (one per spatial
// axis) and fans out incoming telemetry records to them, assembling a
// merged output record for downstream publishing.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, FilterError};
use crate::estimator::{AxisState, ModelType, Rakf1D, RakfConfig};

/// Per-axis tuning, keyed by x/y/z so a single `algorithm.*` config block can
/// carry three independent sets of filter parameters.
#[derive(Debug, Clone)]
pub struct AxisParams {
    pub model_coeff: f64,
    pub model_variance: f64,
    pub meas_variance: f64,
    pub initial_variance: f64,
    pub residual_threshold: f64,
    pub adaptive_threshold: f64,
    pub gamma: f64,
}

/// Construction-time configuration for a `RakfLocalizer`.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub dim: usize,
    pub window: usize,
    pub model_type: ModelType,
    pub x: AxisParams,
    pub y: AxisParams,
    pub z: AxisParams,
    /// Gates a real `*_imu_acc` field; forced to zero when `false`, matching
    /// the historical contract.
    pub use_imu_acc: bool,
}

/// A telemetry record after schema validation (see `crate::telemetry`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub id: String,
    pub data_aggregator_id: String,
    pub timestamp: i64,
    pub x_uwb_pos: f64,
    pub y_uwb_pos: f64,
    pub z_uwb_pos: f64,
    pub x_imu_vel: f64,
    pub y_imu_vel: f64,
    pub z_imu_vel: f64,
    #[serde(default)]
    pub x_imu_acc: f64,
    #[serde(default)]
    pub y_imu_acc: f64,
    #[serde(default)]
    pub z_imu_acc: f64,
}

/// Output record published downstream: the input merged with estimates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimateRecord {
    #[serde(flatten)]
    pub input: TelemetryRecord,
    pub dimension: usize,
    pub x_est_pos: f64,
    pub y_est_pos: f64,
    pub z_est_pos: f64,
}

/// Snapshot of all active axes, keyed the way the persistence layer expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalizerState {
    pub x: Option<AxisState>,
    pub y: Option<AxisState>,
    pub z: Option<AxisState>,
}

fn build_axis(params: &AxisParams, window: usize, model_type: ModelType) -> Result<Rakf1D, ConfigError> {
    Rakf1D::new(
        0.0,
        RakfConfig {
            model_coeff: params.model_coeff,
            model_variance: params.model_variance,
            meas_variance: params.meas_variance,
            initial_variance: params.initial_variance,
            residual_threshold: params.residual_threshold,
            adaptive_threshold: params.adaptive_threshold,
            gamma: params.gamma,
            window,
            model_type,
        },
    )
}

/// Holds up to three `Rakf1D` instances and routes telemetry fields to them.
pub struct RakfLocalizer {
    tag_id: String,
    dim: usize,
    model_type: ModelType,
    use_imu_acc: bool,
    x: Option<Rakf1D>,
    y: Option<Rakf1D>,
    z: Option<Rakf1D>,
}

impl RakfLocalizer {
    pub fn new(tag_id: String, config: CoordinatorConfig) -> Result<Self, ConfigError> {
        if config.dim == 0 || config.dim > 3 {
            return Err(ConfigError::UnsupportedDimension(config.dim));
        }
        let x = Some(build_axis(&config.x, config.window, config.model_type)?);
        let y = if config.dim >= 2 {
            Some(build_axis(&config.y, config.window, config.model_type)?)
        } else {
            None
        };
        let z = if config.dim >= 3 {
            Some(build_axis(&config.z, config.window, config.model_type)?)
        } else {
            None
        };
        Ok(RakfLocalizer {
            tag_id,
            dim: config.dim,
            model_type: config.model_type,
            use_imu_acc: config.use_imu_acc,
            x,
            y,
            z,
        })
    }

    pub fn tag_id(&self) -> &str {
        &self.tag_id
    }

    /// Steps every active axis from one telemetry record, falling back to
    /// the raw kinematic prediction for any axis whose step fails.
    pub fn update(&mut self, record: &TelemetryRecord) -> EstimateRecord {
        let x_est_pos = self.step_axis(
            self.x.as_mut(),
            record.x_uwb_pos,
            record.timestamp,
            record.x_imu_vel,
            if self.use_imu_acc { record.x_imu_acc } else { 0.0 },
        );
        let y_est_pos = self.step_axis(
            self.y.as_mut(),
            record.y_uwb_pos,
            record.timestamp,
            record.y_imu_vel,
            if self.use_imu_acc { record.y_imu_acc } else { 0.0 },
        );
        let z_est_pos = self.step_axis(
            self.z.as_mut(),
            record.z_uwb_pos,
            record.timestamp,
            record.z_imu_vel,
            if self.use_imu_acc { record.z_imu_acc } else { 0.0 },
        );

        EstimateRecord {
            input: record.clone(),
            dimension: self.dim,
            x_est_pos,
            y_est_pos,
            z_est_pos,
        }
    }

    fn step_axis(
        &self,
        axis: Option<&mut Rakf1D>,
        measurement: f64,
        timestamp_ms: i64,
        velocity: f64,
        acceleration: f64,
    ) -> f64 {
        let velocity = match self.model_type {
            ModelType::UwbImu => velocity,
            ModelType::PositionOnly => 0.0,
        };
        match axis {
            None => 0.0,
            Some(filter) => match filter.step(measurement, timestamp_ms, velocity, acceleration) {
                Ok(x) => x,
                Err(FilterError::NumericalFailure(reason)) => {
                    warn!(
                        "axis step failed for tag {}, falling back to prediction: {reason}",
                        self.tag_id
                    );
                    filter.predict(timestamp_ms, velocity, acceleration)
                }
                Err(FilterError::InvalidInput(reason)) => {
                    warn!("axis step rejected invalid input for tag {}: {reason}", self.tag_id);
                    filter.x()
                }
            },
        }
    }

    pub fn state_to_dict(&self) -> LocalizerState {
        LocalizerState {
            x: self.x.as_ref().map(Rakf1D::state_to_dict),
            y: self.y.as_ref().map(Rakf1D::state_to_dict),
            z: self.z.as_ref().map(Rakf1D::state_to_dict),
        }
    }

    pub fn update_state(&mut self, state: LocalizerState) -> Result<(), String> {
        if let (Some(filter), Some(s)) = (self.x.as_mut(), state.x) {
            filter.update_state(s)?;
        }
        if let (Some(filter), Some(s)) = (self.y.as_mut(), state.y) {
            filter.update_state(s)?;
        }
        if let (Some(filter), Some(s)) = (self.z.as_mut(), state.z) {
            filter.update_state(s)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis_params() -> AxisParams {
        AxisParams {
            model_coeff: 1.0,
            model_variance: 0.01,
            meas_variance: 1.0,
            initial_variance: 1.0,
            residual_threshold: 3.0,
            adaptive_threshold: 0.5,
            gamma: 1.0,
        }
    }

    fn coordinator_config(dim: usize) -> CoordinatorConfig {
        CoordinatorConfig {
            dim,
            window: 1,
            model_type: ModelType::PositionOnly,
            x: axis_params(),
            y: axis_params(),
            z: axis_params(),
            use_imu_acc: false,
        }
    }

    fn record(x: f64, y: f64, z: f64, timestamp: i64) -> TelemetryRecord {
        TelemetryRecord {
            id: "tag-1".to_string(),
            data_aggregator_id: "agg-1".to_string(),
            timestamp,
            x_uwb_pos: x,
            y_uwb_pos: y,
            z_uwb_pos: z,
            x_imu_vel: 0.0,
            y_imu_vel: 0.0,
            z_imu_vel: 0.0,
            x_imu_acc: 0.0,
            y_imu_acc: 0.0,
            z_imu_acc: 0.0,
        }
    }

    #[test]
    fn rejects_dimension_above_three() {
        let mut cfg = coordinator_config(4);
        cfg.dim = 4;
        let err = RakfLocalizer::new("tag-1".to_string(), cfg).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedDimension(4)));
    }

    // S4: dim=3 routing produces three distinct posteriors.
    #[test]
    fn s4_three_axis_routing_produces_distinct_posteriors() {
        let mut loc = RakfLocalizer::new("tag-1".to_string(), coordinator_config(3)).unwrap();
        let est = loc.update(&record(1.0, 2.0, 3.0, 1000));
        assert!(est.x_est_pos > 0.0);
        assert!(est.y_est_pos > 0.0);
        assert!(est.z_est_pos > 0.0);
        assert_ne!(est.x_est_pos, est.y_est_pos);
        assert_eq!(est.dimension, 3);
    }

    #[test]
    fn inactive_axes_report_zero() {
        let mut loc = RakfLocalizer::new("tag-1".to_string(), coordinator_config(1)).unwrap();
        let est = loc.update(&record(1.0, 2.0, 3.0, 1000));
        assert!(est.x_est_pos > 0.0);
        assert_eq!(est.y_est_pos, 0.0);
        assert_eq!(est.z_est_pos, 0.0);
    }

    // Each axis reads its own measurement_error field rather than always x's.
    #[test]
    fn each_axis_uses_its_own_params() {
        let mut cfg = coordinator_config(3);
        cfg.y.meas_variance = 4.0;
        cfg.z.meas_variance = 9.0;
        let loc = RakfLocalizer::new("tag-1".to_string(), cfg).unwrap();
        assert_eq!(loc.x.as_ref().unwrap().config().meas_variance, 1.0);
        assert_eq!(loc.y.as_ref().unwrap().config().meas_variance, 4.0);
        assert_eq!(loc.z.as_ref().unwrap().config().meas_variance, 9.0);
    }

    // S6: snapshot/restore round-trips coordinator behavior.
    #[test]
    fn s6_snapshot_restore_round_trips() {
        let mut original = RakfLocalizer::new("tag-1".to_string(), coordinator_config(1)).unwrap();
        original.update(&record(0.5, 0.0, 0.0, 1000));
        original.update(&record(0.6, 0.0, 0.0, 2000));
        let snapshot = original.state_to_dict();

        let mut restored = RakfLocalizer::new("tag-1".to_string(), coordinator_config(1)).unwrap();
        restored.update_state(snapshot).unwrap();

        let e1 = original.update(&record(0.7, 0.0, 0.0, 3000));
        let e2 = restored.update(&record(0.7, 0.0, 0.0, 3000));
        assert!((e1.x_est_pos - e2.x_est_pos).abs() < 1e-12);
    }
}
