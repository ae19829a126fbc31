//! Risk Management Module
//!
//! Gates every position change: per-pair exposure, open-pair cap and a
//! drawdown kill-switch with hysteresis.

mod drawdown;
mod manager;

pub use drawdown::{DrawdownGuard, DrawdownStatus};
pub use manager::{ProposedDelta, RejectReason, RiskConfig, RiskDecision, RiskManager};
