//! Scalar Robust Adaptive Kalman Filter (RAKF) for a single spatial axis.
//!
//! Combines a standard scalar Kalman recursion with an M-estimator residual
//! weight (down-weights outlier measurements) and an adaptive factor that
//! inflates the predicted covariance when a sliding-window WLS auxiliary
//! estimate disagrees strongly with the one-step prediction.

use serde::{Deserialize, Serialize};

use super::buffer::SlidingWindow;
use super::wls;
use crate::error::{ConfigError, FilterError};

/// Motion model governing whether velocity/acceleration augment the
/// prediction step and widen the WLS design matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    PositionOnly,
    UwbImu,
}

/// Immutable tuning parameters for one axis, fixed at construction.
#[derive(Debug, Clone)]
pub struct RakfConfig {
    /// `A`: state-transition coefficient.
    pub model_coeff: f64,
    /// `Q`: process noise variance.
    pub model_variance: f64,
    /// `R`: measurement noise variance. Must be > 0.
    pub meas_variance: f64,
    /// `P0`: initial state covariance.
    pub initial_variance: f64,
    /// `c`: residual threshold.
    pub residual_threshold: f64,
    /// `c0`: adaptive threshold.
    pub adaptive_threshold: f64,
    /// `gamma`: shared tuning scalar.
    pub gamma: f64,
    /// `N`: sliding window length for the WLS regressor. Must be >= 1.
    pub window: usize,
    pub model_type: ModelType,
}

impl RakfConfig {
    fn meas_sigma(&self) -> f64 {
        self.meas_variance.sqrt()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.meas_variance > 0.0) {
            return Err(ConfigError::InvalidParameter(
                "meas_variance must be > 0 (meas_sigma must be > 0)".to_string(),
            ));
        }
        if self.window < 1 {
            return Err(ConfigError::InvalidParameter(
                "window must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Flat, serializable snapshot of one axis's mutable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxisState {
    pub x: f64,
    #[serde(rename = "P")]
    pub p: f64,
    pub t_prev: Option<i64>,
    pub meas: Vec<f64>,
    pub pos: Vec<f64>,
    pub w: Vec<f64>,
    pub vel: Option<Vec<f64>>,
    pub acc: Option<Vec<f64>>,
}

/// A single-axis RAKF instance.
pub struct Rakf1D {
    config: RakfConfig,
    x: f64,
    p: f64,
    t_prev: Option<i64>,
    meas: SlidingWindow,
    pos: SlidingWindow,
    w: SlidingWindow,
    vel: Option<SlidingWindow>,
    acc: Option<SlidingWindow>,
}

impl Rakf1D {
    /// Constructs a filter with posterior initialized to `initial_state` (0
    /// in the reference service, since tags start with no prior fix).
    pub fn new(initial_state: f64, config: RakfConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let (vel, acc) = match config.model_type {
            ModelType::UwbImu => (
                Some(SlidingWindow::new(config.window)),
                Some(SlidingWindow::new(config.window)),
            ),
            ModelType::PositionOnly => (None, None),
        };
        let p0 = config.initial_variance;
        Ok(Rakf1D {
            x: initial_state,
            p: p0,
            t_prev: None,
            meas: SlidingWindow::new(config.window),
            pos: SlidingWindow::new(config.window),
            w: SlidingWindow::ones(config.window),
            vel,
            acc,
            config,
        })
    }

    pub fn config(&self) -> &RakfConfig {
        &self.config
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn p(&self) -> f64 {
        self.p
    }

    fn delta_t_seconds(&self, timestamp_ms: i64) -> f64 {
        match self.t_prev {
            None => 0.0,
            Some(prev) => (timestamp_ms - prev) as f64 / 1000.0,
        }
    }

    /// Pure one-step kinematic prediction from the current posterior,
    /// without touching any mutable state. Used both internally and by
    /// callers as the `NumericalFailure` fallback estimate.
    pub fn predict(&self, timestamp_ms: i64, velocity: f64, acceleration: f64) -> f64 {
        let dt = self.delta_t_seconds(timestamp_ms);
        self.config.model_coeff * self.x + velocity * dt + 0.5 * acceleration * dt * dt
    }

    fn predicted_variance(&self) -> f64 {
        self.config.model_coeff * self.p * self.config.model_coeff + self.config.model_variance
    }

    /// Runs one predict/update cycle. On success, mutates internal state and
    /// returns the new posterior. On [`FilterError`], internal state is left
    /// untouched; callers should fall back to [`Rakf1D::predict`].
    pub fn step(
        &mut self,
        measurement: f64,
        timestamp_ms: i64,
        velocity: f64,
        acceleration: f64,
    ) -> Result<f64, FilterError> {
        if ![measurement, velocity, acceleration]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(FilterError::InvalidInput(
                "measurement, velocity, and acceleration must all be finite".to_string(),
            ));
        }

        let meas_sigma = self.config.meas_sigma();
        let dt = self.delta_t_seconds(timestamp_ms);

        // ---- prediction ----
        let x_pred = self.config.model_coeff * self.x
            + velocity * dt
            + 0.5 * acceleration * dt * dt;
        let p_pred = self.predicted_variance();

        // ---- innovation ----
        let z_hat = x_pred;
        let residual = measurement - z_hat;
        let residual_norm = (residual / meas_sigma).abs();

        // ---- residual weight (M-estimator) ----
        let c = self.config.residual_threshold;
        let gamma = self.config.gamma;
        let weight = if residual_norm <= c {
            1.0 / meas_sigma
        } else {
            c / (residual_norm * 2.0 * gamma * meas_sigma)
        };
        if !weight.is_finite() || weight == 0.0 {
            return Err(FilterError::NumericalFailure(
                "residual weight is zero or non-finite".to_string(),
            ));
        }

        // ---- assemble sliding-window design matrix (candidate, not yet committed) ----
        let mut pos_candidate = self.pos.clone();
        pos_candidate.push(self.x);
        let mut meas_candidate = self.meas.clone();
        meas_candidate.push(measurement);
        let mut w_candidate = self.w.clone();

        let (vel_candidate, acc_candidate) = match self.config.model_type {
            ModelType::UwbImu => {
                let mut v = self.vel.clone().expect("uwb_imu config has vel buffer");
                v.push(velocity);
                let mut a = self.acc.clone().expect("uwb_imu config has acc buffer");
                a.push(acceleration);
                (Some(v), Some(a))
            }
            ModelType::PositionOnly => (None, None),
        };

        let design_rows: Vec<Vec<f64>> = match self.config.model_type {
            ModelType::PositionOnly => pos_candidate
                .as_slice()
                .iter()
                .map(|&p| vec![p])
                .collect(),
            ModelType::UwbImu => {
                let vel = vel_candidate.as_ref().unwrap();
                let acc = acc_candidate.as_ref().unwrap();
                (0..pos_candidate.len())
                    .map(|i| {
                        vec![
                            pos_candidate.as_slice()[i],
                            vel.as_slice()[i],
                            acc.as_slice()[i],
                        ]
                    })
                    .collect()
            }
        };

        // ---- auxiliary WLS estimate ----
        let x_hat = wls::fit_and_predict_last(
            &design_rows,
            meas_candidate.as_slice(),
            w_candidate.as_slice(), // weights lag one step, matching the reference buffer update order
        )?;

        // ---- adaptive factor ----
        if p_pred == 0.0 {
            return Err(FilterError::NumericalFailure(
                "predicted variance is zero; cannot compute adaptive factor".to_string(),
            ));
        }
        let delta = (x_hat - x_pred) / p_pred;
        let c0 = self.config.adaptive_threshold;
        let alpha = if delta < c0 {
            1.0
        } else if c0 < delta && delta < c {
            (c0 / delta) * gamma
        } else {
            delta * gamma
        };
        if !alpha.is_finite() || alpha == 0.0 {
            return Err(FilterError::NumericalFailure(
                "adaptive factor is zero or non-finite".to_string(),
            ));
        }

        // ---- gain and update ----
        let inflated_p = p_pred / alpha;
        let gain_denominator = inflated_p + 1.0 / weight;
        if gain_denominator == 0.0 {
            return Err(FilterError::NumericalFailure(
                "Kalman gain denominator is zero".to_string(),
            ));
        }
        let gain = inflated_p / gain_denominator;

        let x_new = x_pred + gain * residual;
        let p_new = (1.0 - gain) * p_pred;

        if !x_new.is_finite() || !p_new.is_finite() || p_new < 0.0 {
            return Err(FilterError::NumericalFailure(format!(
                "update produced invalid state (x={x_new}, P={p_new})"
            )));
        }

        w_candidate.push(weight);

        // ---- commit ----
        self.x = x_new;
        self.p = p_new;
        self.t_prev = Some(timestamp_ms);
        self.pos = pos_candidate;
        self.meas = meas_candidate;
        self.w = w_candidate;
        self.vel = vel_candidate;
        self.acc = acc_candidate;

        Ok(self.x)
    }

    /// Flattens the mutable state into a serializable record.
    pub fn state_to_dict(&self) -> AxisState {
        AxisState {
            x: self.x,
            p: self.p,
            t_prev: self.t_prev,
            meas: self.meas.as_slice().to_vec(),
            pos: self.pos.as_slice().to_vec(),
            w: self.w.as_slice().to_vec(),
            vel: self.vel.as_ref().map(|v| v.as_slice().to_vec()),
            acc: self.acc.as_ref().map(|a| a.as_slice().to_vec()),
        }
    }

    /// Atomically replaces all mutable state from a previously captured
    /// [`AxisState`]. Fails if buffer shapes don't match the configured
    /// window.
    pub fn update_state(&mut self, state: AxisState) -> Result<(), String> {
        let mut meas = SlidingWindow::new(self.config.window);
        meas.restore(state.meas)?;
        let mut pos = SlidingWindow::new(self.config.window);
        pos.restore(state.pos)?;
        let mut w = SlidingWindow::new(self.config.window);
        w.restore(state.w)?;

        let vel = match (self.config.model_type, state.vel) {
            (ModelType::UwbImu, Some(v)) => {
                let mut win = SlidingWindow::new(self.config.window);
                win.restore(v)?;
                Some(win)
            }
            (ModelType::UwbImu, None) => {
                return Err("uwb_imu config requires a velocity buffer".to_string())
            }
            (ModelType::PositionOnly, _) => None,
        };
        let acc = match (self.config.model_type, state.acc) {
            (ModelType::UwbImu, Some(a)) => {
                let mut win = SlidingWindow::new(self.config.window);
                win.restore(a)?;
                Some(win)
            }
            (ModelType::UwbImu, None) => {
                return Err("uwb_imu config requires an acceleration buffer".to_string())
            }
            (ModelType::PositionOnly, _) => None,
        };

        self.x = state.x;
        self.p = state.p;
        self.t_prev = state.t_prev;
        self.meas = meas;
        self.pos = pos;
        self.w = w;
        self.vel = vel;
        self.acc = acc;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position_only_config(c: f64, c0: f64, gamma: f64, window: usize) -> RakfConfig {
        RakfConfig {
            model_coeff: 1.0,
            model_variance: 0.01,
            meas_variance: 1.0,
            initial_variance: 1.0,
            residual_threshold: c,
            adaptive_threshold: c0,
            gamma,
            window,
            model_type: ModelType::PositionOnly,
        }
    }

    // Universal invariant 1: P >= 0 and x finite after any successful step.
    #[test]
    fn posterior_variance_stays_non_negative_and_state_finite() {
        let mut f = Rakf1D::new(0.0, position_only_config(3.0, 0.5, 1.0, 1)).unwrap();
        let x = f.step(0.5, 1000, 0.0, 0.0).unwrap();
        assert!(x.is_finite());
        assert!(f.p() >= 0.0);
    }

    // Universal invariant 3: buffers stay at configured length, last = newest.
    #[test]
    fn buffers_stay_fixed_length_with_newest_last() {
        let mut f = Rakf1D::new(0.0, position_only_config(3.0, 0.5, 1.0, 3)).unwrap();
        f.step(0.5, 1000, 0.0, 0.0).unwrap();
        f.step(0.6, 2000, 0.0, 0.0).unwrap();
        let state = f.state_to_dict();
        assert_eq!(state.meas.len(), 3);
        assert_eq!(*state.meas.last().unwrap(), 0.6);
    }

    // Universal invariant 4: c = +infinity reduces to a plain scalar Kalman update.
    #[test]
    fn infinite_residual_threshold_yields_nominal_weight_and_unit_alpha() {
        let mut f = Rakf1D::new(0.0, position_only_config(f64::INFINITY, 0.5, 1.0, 1)).unwrap();
        f.step(0.5, 1000, 0.0, 0.0).unwrap();
        let state = f.state_to_dict();
        assert!((state.w[0] - 1.0).abs() < 1e-12); // meas_sigma = sqrt(1) = 1
    }

    // Universal invariant 5: r = 0 implies x = x_pred and K in [0, 1].
    #[test]
    fn zero_residual_keeps_posterior_at_prediction() {
        let mut f = Rakf1D::new(0.5, position_only_config(3.0, 0.5, 1.0, 1)).unwrap();
        let x = f.step(0.5, 1000, 0.0, 0.0).unwrap();
        assert!((x - 0.5).abs() < 1e-9);
        assert!(f.p() >= 0.0 && f.p() <= 1.0 + 1e-9);
    }

    // Universal invariant 6: update_state(state_to_dict(s)) round-trips behavior.
    #[test]
    fn snapshot_restore_round_trips_behavior() {
        let mut original = Rakf1D::new(0.0, position_only_config(3.0, 0.5, 1.0, 1)).unwrap();
        original.step(0.5, 1000, 0.0, 0.0).unwrap();
        let snapshot = original.state_to_dict();

        let mut restored = Rakf1D::new(0.0, position_only_config(3.0, 0.5, 1.0, 1)).unwrap();
        restored.update_state(snapshot).unwrap();

        let x1 = original.step(0.6, 2000, 0.0, 0.0).unwrap();
        let x2 = restored.step(0.6, 2000, 0.0, 0.0).unwrap();
        assert!((x1 - x2).abs() < 1e-12);
        assert!((original.p() - restored.p()).abs() < 1e-12);
    }

    // S1: steady inlier sequence moves posterior monotonically toward z, P decreases.
    #[test]
    fn s1_steady_inlier_converges_toward_measurement() {
        let mut f = Rakf1D::new(0.0, position_only_config(3.0, 0.5, 1.0, 1)).unwrap();
        let p0 = f.p();
        let x1 = f.step(0.5, 1000, 0.0, 0.0).unwrap();
        let p1 = f.p();
        let x2 = f.step(0.6, 2000, 0.0, 0.0).unwrap();
        assert!(x1 > 0.0 && x1 < 0.5);
        assert!(x2 > x1 && x2 < 0.6);
        assert!(p1 < p0);
    }

    // S2: an extreme outlier is heavily down-weighted; posterior stays near the prior.
    #[test]
    fn s2_outlier_is_rejected() {
        let mut f = Rakf1D::new(0.0, position_only_config(3.0, 0.5, 1.0, 1)).unwrap();
        let x = f.step(100.0, 1000, 0.0, 0.0).unwrap();
        assert!(x.abs() < 20.0);
    }

    // S3: rapidly increasing measurements over a window drive the WLS estimate
    // away from the raw prediction, inflating alpha above 1 on the offending step.
    #[test]
    fn s3_adaptive_inflation_engages_on_divergent_window() {
        let cfg = position_only_config(3.0, 0.01, 1.0, 3);
        let mut f = Rakf1D::new(0.0, cfg.clone()).unwrap();
        f.step(1.0, 1000, 0.0, 0.0).unwrap();
        f.step(50.0, 2000, 0.0, 0.0).unwrap();
        let x_pred_before = f.predict(3000, 0.0, 0.0);
        let x3 = f.step(200.0, 3000, 0.0, 0.0).unwrap();
        // A strongly divergent auxiliary estimate pulls the gain (and hence the
        // posterior) further from x_pred than the non-adaptive update would.
        assert!((x3 - x_pred_before).abs() > 1e-6);
    }

    #[test]
    fn rejects_non_finite_input() {
        let mut f = Rakf1D::new(0.0, position_only_config(3.0, 0.5, 1.0, 1)).unwrap();
        let err = f.step(f64::NAN, 1000, 0.0, 0.0).unwrap_err();
        assert!(matches!(err, FilterError::InvalidInput(_)));
    }

    #[test]
    fn rejects_non_positive_measurement_variance_at_construction() {
        let mut cfg = position_only_config(3.0, 0.5, 1.0, 1);
        cfg.meas_variance = 0.0;
        assert!(Rakf1D::new(0.0, cfg).is_err());
    }

    #[test]
    fn uwb_imu_model_augments_prediction_with_kinematics() {
        let cfg = RakfConfig {
            model_type: ModelType::UwbImu,
            ..position_only_config(3.0, 0.5, 1.0, 2)
        };
        let mut f = Rakf1D::new(0.0, cfg).unwrap();
        f.step(0.0, 1000, 0.0, 0.0).unwrap();
        let x = f.step(1.0, 2000, 1.0, 0.0).unwrap();
        assert!(x.is_finite());
        let state = f.state_to_dict();
        assert_eq!(state.vel.unwrap().len(), 2);
        assert_eq!(state.acc.unwrap().len(), 2);
    }

    #[test]
    fn failed_step_leaves_state_untouched() {
        let mut f = Rakf1D::new(0.0, position_only_config(3.0, 0.5, 1.0, 1)).unwrap();
        let x_before = f.x();
        let p_before = f.p();
        let err = f.step(f64::NAN, 1000, 0.0, 0.0);
        assert!(err.is_err());
        assert_eq!(f.x(), x_before);
        assert_eq!(f.p(), p_before);
    }
}
