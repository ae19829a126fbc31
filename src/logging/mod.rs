//! Logging setup and log-storm protection.
//!
//! - `init_tracing` - installs the global `tracing` subscriber
//! - `LogThrottle` - rate-limits repetitive warnings on the tick path

pub mod throttle;

pub use throttle::{LogThrottle, PairLogThrottler};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` overrides `level` when set;
/// `json` selects structured JSON lines instead of human-readable output.
pub fn init_tracing(level: &str, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .try_init()?;
    }
    Ok(())
}
