use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;

use hailstorm::config::Config;
use hailstorm::pipeline::{run_ingest, run_stage};
use hailstorm::tracing::init_tracing;

#[derive(Parser)]
#[command(name = "hailstorm", about = "Incremental trip ingest and staging pipeline", version)]
struct Cli {
    /// Path to the YAML configuration file. Defaults apply when the file
    /// does not exist.
    #[arg(short, long, default_value = "hailstorm.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch new rows from the upstream API into the raw store.
    Ingest,
    /// Rebuild the trailing window of staged partitions from raw.
    Stage,
    /// Run ingest followed by stage.
    Run,
}

fn load_config(path: &PathBuf) -> Result<Config, hailstorm::error::ConfigError> {
    if path.exists() {
        Config::from_path(path)
    } else {
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %cli.config.display(), error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Ingest => run_ingest(&config).await.map(|_| ()),
        Command::Stage => run_stage(&config).map(|_| ()),
        Command::Run => match run_ingest(&config).await {
            Ok(_) => run_stage(&config).map(|_| ()),
            Err(e) => Err(e),
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Pipeline run failed");
            ExitCode::FAILURE
        }
    }
}
