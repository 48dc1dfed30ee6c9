//! CLI command definitions.

use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run the monitor API server
    Serve {
        /// Configuration file (YAML or TOML)
        #[arg(short, long, env = "TIMBEL_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Show a pipeline's status and stages
    Status {
        /// Pipeline ID
        pipeline_id: String,
    },

    /// List pipelines that have not finished
    Active,

    /// Cancel a pipeline
    Cancel {
        /// Pipeline ID
        pipeline_id: String,

        /// Reason recorded in the status history
        #[arg(short, long)]
        reason: Option<String>,
    },

    /// Restart a pipeline as a new run
    Restart {
        /// Pipeline ID
        pipeline_id: String,

        /// Resume at this stage; earlier stages are carried over as skipped
        #[arg(long)]
        from_stage: Option<String>,
    },

    /// Print a pipeline's logs
    Logs {
        /// Pipeline ID
        pipeline_id: String,

        /// Only this stage
        #[arg(short, long)]
        stage: Option<String>,

        /// Only entries after this sequence number
        #[arg(long)]
        after: Option<u64>,
    },

    /// Query finished and running pipelines
    History(HistoryArgs),

    /// Issue a development bearer token
    Token {
        /// Subject recorded as the actor of requests made with the token
        subject: String,

        /// Display name
        #[arg(long)]
        name: Option<String>,

        /// Lifetime in hours
        #[arg(long, default_value_t = 12)]
        ttl_hours: i64,

        /// Configuration file holding the signing secret
        #[arg(short, long, env = "TIMBEL_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Print the JSON Schema of the event stream
    Schema,

    /// Manage client configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Args, Debug, Default)]
pub struct HistoryArgs {
    /// Pipeline status
    #[arg(long)]
    pub status: Option<String>,

    /// Deployment environment
    #[arg(short, long)]
    pub environment: Option<String>,

    /// Project ID
    #[arg(short, long)]
    pub project: Option<String>,

    /// Pipeline type
    #[arg(long = "type")]
    pub pipeline_type: Option<String>,

    /// Queued at or after (RFC 3339)
    #[arg(long)]
    pub from: Option<String>,

    /// Queued at or before (RFC 3339)
    #[arg(long)]
    pub to: Option<String>,

    #[arg(short, long)]
    pub limit: Option<u32>,

    #[arg(long)]
    pub offset: Option<u32>,
}

impl HistoryArgs {
    /// Query string pairs for the set filters.
    pub fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        let mut push = |key: &'static str, value: Option<String>| {
            if let Some(value) = value {
                query.push((key, value));
            }
        };
        push("status", self.status.clone());
        push("environment", self.environment.clone());
        push("projectId", self.project.clone());
        push("type", self.pipeline_type.clone());
        push("from", self.from.clone());
        push("to", self.to.clone());
        push("limit", self.limit.map(|l| l.to_string()));
        push("offset", self.offset.map(|o| o.to_string()));
        query
    }
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set configuration value
    Set {
        /// Key
        key: String,

        /// Value
        value: String,
    },
}
