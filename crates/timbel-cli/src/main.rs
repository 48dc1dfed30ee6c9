//! Timbel CLI entrypoint.

use clap::Parser;
use timbel_trace::{TracingConfig, init_tracer, shutdown_tracer};

mod client;
mod commands;
mod config;
mod handlers;
mod serve;
mod settings;

use commands::{Commands, ConfigCommands};
use config::CliConfig;
use settings::ServerConfig;

#[derive(Parser)]
#[command(name = "timbel")]
#[command(author, version, about = "Timbel pipeline monitor", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(err) = dotenvy::dotenv()
        && !err.not_found()
    {
        eprintln!("Warning: failed to load .env file: {err}");
    }

    match Cli::parse().command {
        Commands::Serve { config } => {
            let settings = ServerConfig::load(config.as_deref())?;
            init_tracer(&settings.tracing)?;
            let result = serve::run(settings).await;
            shutdown_tracer();
            result
        }
        command => run_command(command).await,
    }
}

async fn run_command(command: Commands) -> anyhow::Result<()> {
    init_tracer(&TracingConfig {
        filter: "warn".to_string(),
        ..Default::default()
    })?;
    let config = CliConfig::load().unwrap_or_default();

    match command {
        Commands::Serve { .. } => {}
        Commands::Status { pipeline_id } => handlers::status(&config, &pipeline_id).await?,
        Commands::Active => handlers::active(&config).await?,
        Commands::Cancel {
            pipeline_id,
            reason,
        } => handlers::cancel(&config, &pipeline_id, reason).await?,
        Commands::Restart {
            pipeline_id,
            from_stage,
        } => handlers::restart(&config, &pipeline_id, from_stage).await?,
        Commands::Logs {
            pipeline_id,
            stage,
            after,
        } => handlers::logs(&config, &pipeline_id, stage, after).await?,
        Commands::History(args) => handlers::history(&config, &args).await?,
        Commands::Token {
            subject,
            name,
            ttl_hours,
            config: path,
        } => handlers::token(path.as_deref(), &subject, name, ttl_hours)?,
        Commands::Schema => handlers::schema()?,
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config(&config)?,
            ConfigCommands::Set { key, value } => handlers::set_config(&key, &value)?,
        },
    }

    Ok(())
}
