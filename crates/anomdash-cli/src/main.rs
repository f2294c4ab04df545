//! anomdash — turn one KQL time-series query into a Grafana anomaly
//! dashboard.
//!
//! # Usage
//!
//! ```text
//! anomdash generate --config anomdash.toml
//! anomdash generate --config anomdash.toml --dry-run --output dashboard.json
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

mod commands;

#[derive(Parser)]
#[command(
    name = "anomdash",
    about = "Generate Grafana anomaly dashboards from KQL time-series queries",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the dashboard for the configured base query and publish it.
    Generate(GenerateArgs),
}

#[derive(clap::Args)]
pub struct GenerateArgs {
    /// Path to anomdash.toml.
    #[arg(short, long, env = "ANOMDASH_CONFIG", default_value = "anomdash.toml")]
    pub config: PathBuf,

    /// Override `dashboard.base_query`.
    #[arg(short, long)]
    pub query: Option<String>,

    /// Override `dashboard.title`.
    #[arg(short, long)]
    pub title: Option<String>,

    /// Override the `make-series` step (e.g. `1h`, `15m`).
    #[arg(long)]
    pub step: Option<String>,

    /// Build and render the dashboard without publishing it.
    #[arg(long)]
    pub dry_run: bool,

    /// Also write the Grafana save request body to this file.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    #[arg(long, env = "ANOMDASH_TENANT_ID")]
    pub tenant_id: Option<String>,

    #[arg(long, env = "ANOMDASH_CLIENT_ID")]
    pub client_id: Option<String>,

    #[arg(long, env = "ANOMDASH_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    #[arg(long, env = "ANOMDASH_GRAFANA_TOKEN", hide_env_values = true)]
    pub grafana_token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn,anomdash=info"));
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }

    match cli.command {
        Commands::Generate(args) => commands::generate::run(args).await,
    }
}
