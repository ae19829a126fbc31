//! Mathematical utilities for the pairs-trading core.
//!
//! This module provides statistical and mathematical primitives: Kalman
//! filtering for dynamic hedge ratio estimation and the small regressions
//! the discovery tests are built on.

pub mod kalman;
pub mod linalg;

pub use kalman::{KalmanConfig, KalmanError, KalmanHedgeRatio, KalmanState, KalmanUpdate};
