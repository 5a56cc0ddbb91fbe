use anyhow::Context;
use clap::Parser;
use tradegate::cli::{Cli, Commands};
use tradegate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: Could not load config from {}: {}", cli.config, e);
            eprintln!("Using default configuration");
            toml::from_str(include_str!("../config.toml.example"))
                .context("Invalid built-in default config")?
        }
    };

    // Initialize telemetry
    tradegate::telemetry::init_telemetry(&config.telemetry)?;

    match cli.command {
        Commands::Run(args) => args.execute(&config).await?,
        Commands::Preview(args) => args.preview(&config).await?,
        Commands::Execute(args) => args.execute(&config).await?,
        Commands::Config => {
            println!("Current configuration:");
            println!("{}", toml::to_string_pretty(&config.bot)?);
            println!(
                "Monitor: session {}-{} UTC, poll every {}s",
                config.monitor.session_open_utc,
                config.monitor.session_close_utc,
                config.monitor.poll_interval_secs
            );
            println!(
                "Backtest pool: {} concurrent, {}s timeout",
                config.backtest.max_concurrent, config.backtest.run_timeout_secs
            );
        }
        Commands::Trades(args) => args.execute(&config).await?,
        Commands::Backtest(args) => args.execute(&config).await?,
    }

    Ok(())
}
