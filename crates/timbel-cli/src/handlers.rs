//! Command handlers.

use anyhow::Context;
use chrono::Duration;
use console::{StyledObject, style};
use schemars::schema_for;
use serde::Serialize;
use std::path::Path;
use timbel_auth::{Claims, TokenResponse, TokenSigner};
use timbel_core::events::Event;
use timbel_core::logs::{LogEntry, LogLevel};
use timbel_core::pipeline::{Pipeline, PipelineStatus};
use timbel_core::stage::StageStatus;

use crate::client::ApiClient;
use crate::commands::HistoryArgs;
use crate::config::{CliConfig, OutputFormat};
use crate::settings::ServerConfig;

/// Print `value` as JSON or YAML; returns false for table output.
fn print_structured<T: Serialize>(config: &CliConfig, value: &T) -> anyhow::Result<bool> {
    match config.output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
        OutputFormat::Table => return Ok(false),
    }
    Ok(true)
}

fn pipeline_status(status: PipelineStatus) -> StyledObject<&'static str> {
    let text = style(status.as_str());
    match status {
        PipelineStatus::Completed => text.green(),
        PipelineStatus::Failed => text.red(),
        PipelineStatus::Running => text.cyan(),
        PipelineStatus::Cancelled | PipelineStatus::Paused => text.yellow(),
        PipelineStatus::Queued => text.dim(),
    }
}

fn stage_marker(status: StageStatus) -> StyledObject<&'static str> {
    match status {
        StageStatus::Completed => style("✓").green(),
        StageStatus::Failed => style("✗").red(),
        StageStatus::Running => style("▶").cyan(),
        StageStatus::Skipped => style("-").dim(),
        StageStatus::Pending => style("·").dim(),
    }
}

fn print_row(pipeline: &Pipeline) {
    let progress = pipeline.progress();
    println!(
        "  {}  {:<10} {:<16} {:<12} {}/{} stages",
        style(pipeline.id).bold(),
        pipeline_status(pipeline.status),
        pipeline.project_id,
        pipeline.environment,
        progress.completed_stages,
        progress.total_stages
    );
}

/// Show one pipeline.
pub async fn status(config: &CliConfig, id: &str) -> anyhow::Result<()> {
    let pipeline = ApiClient::new(config).get_pipeline(id).await?;
    if print_structured(config, &pipeline)? {
        return Ok(());
    }

    let progress = pipeline.progress();
    println!(
        "{} {} ({}) {}",
        style("Pipeline").bold(),
        pipeline.id,
        pipeline.pipeline_type,
        pipeline_status(pipeline.status)
    );
    println!("  Project:     {}", pipeline.project_id);
    println!("  Branch:      {}", pipeline.branch);
    println!("  Environment: {}", pipeline.environment);
    if let Some(sha) = &pipeline.commit_sha {
        println!("  Commit:      {}", sha);
    }
    if let Some(source) = &pipeline.restarted_from {
        println!("  Restart of:  {}", source);
    }
    println!("  Progress:    {}%", progress.percent);
    println!();

    for stage in &pipeline.stages {
        let duration = stage
            .duration_ms
            .map(|ms| format!("{:.1}s", ms as f64 / 1000.0))
            .unwrap_or_default();
        println!(
            "  {} {:<24} {:<10} {}",
            stage_marker(stage.status),
            stage.name,
            stage.status.as_str(),
            style(duration).dim()
        );
    }
    Ok(())
}

/// List active pipelines.
pub async fn active(config: &CliConfig) -> anyhow::Result<()> {
    let pipelines = ApiClient::new(config).active_pipelines().await?;
    if print_structured(config, &pipelines)? {
        return Ok(());
    }

    if pipelines.is_empty() {
        println!("{} No active pipelines", style("i").blue());
        return Ok(());
    }
    println!("{} active pipelines:", pipelines.len());
    pipelines.iter().for_each(print_row);
    Ok(())
}

/// Cancel a pipeline.
pub async fn cancel(config: &CliConfig, id: &str, reason: Option<String>) -> anyhow::Result<()> {
    println!("Cancelling pipeline {}...", style(id).bold());
    let update = ApiClient::new(config)
        .cancel_pipeline(id, reason.as_deref())
        .await?;
    if print_structured(config, &update)? {
        return Ok(());
    }

    println!("{} Pipeline cancelled", style("✓").green());
    Ok(())
}

/// Restart a pipeline.
pub async fn restart(config: &CliConfig, id: &str, from_stage: Option<String>) -> anyhow::Result<()> {
    let created = ApiClient::new(config)
        .restart_pipeline(id, from_stage.as_deref())
        .await?;
    if print_structured(config, &created)? {
        return Ok(());
    }

    let new_id = created["pipelineId"].as_str().unwrap_or("?");
    println!(
        "{} Restarted {} as {}",
        style("✓").green(),
        id,
        style(new_id).bold()
    );
    if let Some(stage) = from_stage {
        println!("  Resuming at stage {}", stage);
    }
    Ok(())
}

fn log_level(level: LogLevel) -> StyledObject<&'static str> {
    let text = style(level.as_str());
    match level {
        LogLevel::Error => text.red(),
        LogLevel::Warn => text.yellow(),
        LogLevel::Info => text.blue(),
        LogLevel::Debug => text.dim(),
    }
}

/// Print logs.
pub async fn logs(
    config: &CliConfig,
    id: &str,
    stage: Option<String>,
    after: Option<u64>,
) -> anyhow::Result<()> {
    let entries: Vec<LogEntry> = ApiClient::new(config)
        .logs(id, stage.as_deref(), after)
        .await?;
    if print_structured(config, &entries)? {
        return Ok(());
    }

    if entries.is_empty() {
        println!("{} No logs available yet", style("i").blue());
        return Ok(());
    }
    for entry in entries {
        println!(
            "{:>6} {} [{}] {:<5} {}",
            style(entry.sequence).dim(),
            entry.timestamp.format("%H:%M:%S%.3f"),
            entry.stage_id,
            log_level(entry.level),
            entry.message
        );
    }
    Ok(())
}

/// Query pipeline history.
pub async fn history(config: &CliConfig, args: &HistoryArgs) -> anyhow::Result<()> {
    let page = ApiClient::new(config).history(&args.query()).await?;
    if print_structured(config, &page)? {
        return Ok(());
    }

    println!(
        "Showing {} of {} pipelines (offset {})",
        page.items.len(),
        page.total,
        page.offset
    );
    page.items.iter().for_each(print_row);
    Ok(())
}

/// Issue a development token signed with the server's secret.
pub fn token(
    config_path: Option<&Path>,
    subject: &str,
    name: Option<String>,
    ttl_hours: i64,
) -> anyhow::Result<()> {
    let settings = ServerConfig::load(config_path)?;
    let signer = TokenSigner::hs256(settings.auth.signing_secret()?)?;

    let mut builder = Claims::builder(&settings.auth.issuer, subject).ttl(Duration::hours(ttl_hours));
    if let Some(name) = name {
        builder = builder.name(name);
    }
    let claims = builder.build();
    let token = signer.sign(&claims).context("failed to sign token")?;

    println!("{}", serde_json::to_string_pretty(&TokenResponse::new(token, &claims))?);
    Ok(())
}

/// Print the JSON Schema of the events pushed to subscribers.
pub fn schema() -> anyhow::Result<()> {
    let schema = schema_for!(Event);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

/// Show configuration.
pub fn show_config(config: &CliConfig) -> anyhow::Result<()> {
    println!("Current configuration:");
    println!("  api_url: {}", config.api_url);
    println!(
        "  token: {}",
        if config.token.is_some() {
            "***"
        } else {
            "(not set)"
        }
    );
    println!("  output_format: {:?}", config.output_format);

    if let Ok(path) = CliConfig::config_path() {
        println!("\nConfig file: {}", path.display());
    }
    Ok(())
}

/// Set configuration.
pub fn set_config(key: &str, value: &str) -> anyhow::Result<()> {
    let mut config = CliConfig::load().unwrap_or_default();
    config.set(key, value)?;
    config.save()?;

    println!("{} Set {} = {}", style("✓").green(), key, value);
    Ok(())
}
