//! Scalar RAKF estimator: sliding-window buffer, WLS auxiliary solve, and
//! the single-axis filter built on top of them.

mod buffer;
mod rakf1d;
mod wls;

pub use buffer::SlidingWindow;
pub use rakf1d::{AxisState, ModelType, Rakf1D, RakfConfig};
