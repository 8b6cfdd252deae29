// config.rs

// Nested YAML configuration schema, deserialized directly via `serde` +
// `serde_yaml` into these structs. Loading never exits the process; the
// CLI binary is the only place a `ConfigError` becomes an exit code.

use std::fs::File;
use std::path::Path;

use serde::Deserialize;

use crate::coordinator::{AxisParams, CoordinatorConfig};
use crate::error::ConfigError;
use crate::estimator::ModelType;

#[derive(Debug, Deserialize)]
pub struct RootConfig {
    pub localization: LocalizationConfig,
}

#[derive(Debug, Deserialize)]
pub struct LocalizationConfig {
    pub version: String,
    pub trackers: Vec<TrackerConfig>,
}

#[derive(Debug, Deserialize)]
pub struct TrackerConfig {
    pub id: String,
    pub algorithm: AlgorithmConfig,
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub in_mem_db: Option<InMemDbConfig>,
}

#[derive(Debug, Deserialize)]
pub struct AlgorithmConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub track_dimension: usize,
    pub interval: f64,
    pub model: ModelConfig,
    pub error: ErrorConfig,
    pub threshold: ThresholdConfig,
    pub estimator: EstimatorConfig,
}

#[derive(Debug, Deserialize)]
pub struct ModelConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub coefficient: Axes,
    #[serde(default)]
    pub use_imu_acc: bool,
}

#[derive(Debug, Deserialize)]
pub struct ErrorConfig {
    pub model: Axes,
    pub measurement: Axes,
    pub state_error_variance: Axes,
}

#[derive(Debug, Deserialize)]
pub struct ThresholdConfig {
    pub residual: Axes,
    pub adaptive: Axes,
    pub gamma: Axes,
}

#[derive(Debug, Deserialize)]
pub struct EstimatorConfig {
    pub parameter: EstimatorParameter,
}

#[derive(Debug, Deserialize)]
pub struct EstimatorParameter {
    pub count: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Axes {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Deserialize)]
pub struct ProtocolConfig {
    #[serde(default)]
    pub publishers: Vec<EndpointConfig>,
    #[serde(default)]
    pub subscribers: Vec<EndpointConfig>,
}

#[derive(Debug, Deserialize)]
pub struct EndpointConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub uri: String,
    pub exchange: String,
}

#[derive(Debug, Deserialize)]
pub struct InMemDbConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub credentials: Option<CredentialsConfig>,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct CredentialsConfig {
    pub password: String,
}

/// Loads and validates `path`. Only structural validation happens here
/// (required keys, supported algorithm/protocol kinds); per-tracker
/// construction failures surface later when `RakfLocalizer` is built.
pub fn load(path: &Path) -> Result<LocalizationConfig, ConfigError> {
    let file = File::open(path).map_err(|_| ConfigError::NotFound(path.display().to_string()))?;
    let root: RootConfig = serde_yaml::from_reader(file)?;

    for tracker in &root.localization.trackers {
        if tracker.algorithm.kind != "rakf" {
            return Err(ConfigError::UnsupportedAlgorithm(tracker.algorithm.kind.clone()));
        }
        if tracker.algorithm.track_dimension == 0 || tracker.algorithm.track_dimension > 3 {
            return Err(ConfigError::UnsupportedDimension(tracker.algorithm.track_dimension));
        }
        for endpoint in tracker.protocol.publishers.iter().chain(&tracker.protocol.subscribers) {
            if endpoint.kind != "amq" {
                return Err(ConfigError::UnsupportedProtocol(endpoint.kind.clone()));
            }
        }
    }

    Ok(root.localization)
}

fn model_type(kind: &str) -> Result<ModelType, ConfigError> {
    match kind {
        "position_only" => Ok(ModelType::PositionOnly),
        "uwb_imu" => Ok(ModelType::UwbImu),
        other => Err(ConfigError::UnsupportedAlgorithm(other.to_string())),
    }
}

fn axis_params(coeff: f64, model_variance: f64, meas_variance: f64, initial_variance: f64, c: f64, c0: f64, gamma: f64) -> AxisParams {
    AxisParams {
        model_coeff: coeff,
        model_variance,
        meas_variance,
        initial_variance,
        residual_threshold: c,
        adaptive_threshold: c0,
        gamma,
    }
}

/// Builds a `CoordinatorConfig` for one tracker, unpacking the per-axis
/// `Axes` blocks into independently-tunable `AxisParams`.
pub fn coordinator_config(tracker: &TrackerConfig) -> Result<CoordinatorConfig, ConfigError> {
    let algo = &tracker.algorithm;
    let model_type = model_type(&algo.model.kind)?;
    let window = algo.estimator.parameter.count;

    let x = axis_params(
        algo.model.coefficient.x,
        algo.error.model.x,
        algo.error.measurement.x,
        algo.error.state_error_variance.x,
        algo.threshold.residual.x,
        algo.threshold.adaptive.x,
        algo.threshold.gamma.x,
    );
    let y = axis_params(
        algo.model.coefficient.y,
        algo.error.model.y,
        algo.error.measurement.y,
        algo.error.state_error_variance.y,
        algo.threshold.residual.y,
        algo.threshold.adaptive.y,
        algo.threshold.gamma.y,
    );
    let z = axis_params(
        algo.model.coefficient.z,
        algo.error.model.z,
        algo.error.measurement.z,
        algo.error.state_error_variance.z,
        algo.threshold.residual.z,
        algo.threshold.adaptive.z,
        algo.threshold.gamma.z,
    );

    Ok(CoordinatorConfig {
        dim: algo.track_dimension,
        window,
        model_type,
        x,
        y,
        z,
        use_imu_acc: algo.model.use_imu_acc,
    })
}
