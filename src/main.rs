use clap::Parser;
use statarb::cli::{Cli, Commands};
use statarb::commands::{run_discover, run_simulate, SimulateOptions};
use statarb::config::AppConfig;
use statarb::logging;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    logging::init_tracing(&cli.verbose, cli.json_logs)?;

    let config = match &cli.config {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration");
            AppConfig::from_json_file(path)?
        }
        None => AppConfig::default(),
    };

    match cli.command {
        Commands::Discover { universe, output } => {
            run_discover(&config, &universe.synthetic_config(), output.as_deref())?;
        }
        Commands::Simulate {
            universe,
            warmup_bars,
            state_dir,
            serve_metrics,
            flatten_on_exit,
        } => {
            let options = SimulateOptions {
                warmup_bars,
                state_dir,
                metrics_port: serve_metrics,
                flatten_on_exit,
            };
            run_simulate(config, &universe.synthetic_config(), options).await?;
        }
    }

    Ok(())
}
