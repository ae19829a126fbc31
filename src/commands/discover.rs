//! Pair discovery command handler.
//!
//! Implements the `discover` subcommand: scans a synthetic universe and
//! prints the ranked candidates.

use crate::config::AppConfig;
use crate::discovery::PairDiscoveryEngine;
use crate::sandbox::{SyntheticConfig, SyntheticUniverse};

use tracing::{error, info, warn};

/// Scan a generated universe and report every pair that passes.
///
/// # Errors
/// Returns error if the scan fails or the output file cannot be written.
pub fn run_discover(
    config: &AppConfig,
    synthetic: &SyntheticConfig,
    output_path: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let universe = SyntheticUniverse::generate(synthetic);
    let engine = PairDiscoveryEngine::new(config.discovery.clone())?;

    info!(
        instruments = universe.histories().len(),
        bars = universe.len(),
        method = ?config.discovery.method,
        "Starting discovery scan"
    );

    let (candidates, stats) = match engine.scan(&universe.histories()) {
        Ok(result) => result,
        Err(e) => {
            error!("Discovery failed: {}", e);
            return Err(e.into());
        }
    };

    if candidates.is_empty() {
        warn!(?stats, "No pairs found matching criteria");
        return Ok(());
    }

    println!(
        "\n{:<20} | {:>6} | {:>7} | {:>8} | {:>9} | {:>7} | {:>6}",
        "Pair", "Corr", "Beta", "HalfLife", "Coint p", "ADF p", "Score"
    );
    println!("{}", "-".repeat(80));
    for c in &candidates {
        println!(
            "{:<20} | {:>6.3} | {:>7.3} | {:>8.1} | {:>9.3} | {:>7.3} | {:>6.3}",
            c.pair.to_string(),
            c.correlation,
            c.hedge_ratio,
            c.half_life,
            c.cointegration_p_value,
            c.adf_p_value,
            c.score
        );
    }

    let planted: Vec<String> = universe
        .planted()
        .iter()
        .map(|p| p.pair.to_string())
        .collect();
    let recovered = candidates
        .iter()
        .filter(|c| planted.contains(&c.pair.to_string()))
        .count();
    info!(
        passed = stats.passed,
        considered = stats.pairs_considered,
        planted = planted.len(),
        recovered,
        "Discovery scan complete"
    );

    if let Some(path) = output_path {
        let json = serde_json::to_string_pretty(&candidates)?;
        std::fs::write(path, &json)?;
        info!(path, "Candidates written");
    }
    Ok(())
}
