//! CLI command handlers.
//!
//! Each subcommand builds its components from an `AppConfig` and a
//! synthetic universe, then delegates to the library.

mod discover;
mod simulate;

pub use discover::run_discover;
pub use simulate::{run_simulate, SimulateOptions};
