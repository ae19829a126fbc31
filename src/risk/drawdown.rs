//! Drawdown Kill-Switch
//!
//! Portfolio-level drawdown limit with hysteresis.
//!
//! # Architecture
//!
//! - Observes the drawdown from the equity high-water mark
//! - Halts new entries once the drawdown reaches `max_drawdown_pct`
//! - Re-enables entries only after the drawdown falls below
//!   `resume_drawdown_pct`
//! - Exits are never blocked
//!
//! # Example
//!
//! ```ignore
//! use statarb::risk::{DrawdownGuard, DrawdownStatus};
//!
//! let mut guard = DrawdownGuard::new(0.15, 0.10);
//! assert_eq!(guard.observe(0.16), DrawdownStatus::Halted);
//! assert_eq!(guard.observe(0.12), DrawdownStatus::Halted);
//! assert_eq!(guard.observe(0.09), DrawdownStatus::Normal);
//! ```

use tracing::{error, info};

/// Status returned from drawdown checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawdownStatus {
    /// Entries allowed
    Normal,
    /// Kill-switch engaged, entries blocked
    Halted,
}

impl std::fmt::Display for DrawdownStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "Normal"),
            Self::Halted => write!(f, "Halted"),
        }
    }
}

/// Drawdown kill-switch state.
#[derive(Debug, Clone)]
pub struct DrawdownGuard {
    halt_at: f64,
    resume_below: f64,
    halted: bool,
    last_drawdown: f64,
}

impl DrawdownGuard {
    /// `resume_below` must not exceed `halt_at`; it is clamped if it does.
    pub fn new(halt_at: f64, resume_below: f64) -> Self {
        info!(
            max_drawdown = halt_at,
            resume_drawdown = resume_below,
            "DrawdownGuard initialized"
        );
        Self {
            halt_at,
            resume_below: resume_below.min(halt_at),
            halted: false,
            last_drawdown: 0.0,
        }
    }

    /// Record the current drawdown and return the resulting status.
    pub fn observe(&mut self, drawdown: f64) -> DrawdownStatus {
        self.last_drawdown = drawdown;

        if !self.halted && drawdown >= self.halt_at {
            self.halted = true;
            error!(
                drawdown = drawdown,
                max_drawdown = self.halt_at,
                "CRITICAL: DRAWDOWN LIMIT BREACHED - NEW ENTRIES HALTED"
            );
        } else if self.halted && drawdown < self.resume_below {
            self.halted = false;
            info!(
                drawdown = drawdown,
                resume_drawdown = self.resume_below,
                "Drawdown recovered - entries re-enabled"
            );
        }
        self.status()
    }

    #[must_use]
    pub fn status(&self) -> DrawdownStatus {
        if self.halted {
            DrawdownStatus::Halted
        } else {
            DrawdownStatus::Normal
        }
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    #[must_use]
    pub fn last_drawdown(&self) -> f64 {
        self.last_drawdown
    }
}
