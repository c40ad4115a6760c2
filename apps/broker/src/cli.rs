//! Top-level CLI grammar. Everything here calls straight into
//! `broker-core`/`broker-storage` — never over HTTP, since the CLI is a
//! first-class caller of the core, not a proxy client.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "broker")]
pub struct Cli {
    #[arg(long, env = "BROKER_DSN", default_value = "")]
    pub dsn: String,
    #[arg(long, env = "BROKER_DATA_DIR", default_value = "")]
    pub data_dir: String,
    #[arg(long, env = "BROKER_HOST", default_value = "127.0.0.1")]
    pub host: String,
    #[arg(long, env = "BROKER_PORT", default_value_t = 8787)]
    pub port: u16,
    #[arg(long, env = "BROKER_CLIENT_ID", default_value = "")]
    pub client_id: String,
    #[arg(long, env = "BROKER_SESSION_WINDOW_MS")]
    pub session_window_ms: Option<i64>,
    #[arg(long, env = "BROKER_REFRESH_LEEWAY_MS")]
    pub refresh_leeway_ms: Option<i64>,
    #[arg(long, env = "BROKER_PRICING_FILE")]
    pub pricing_file: Option<String>,
    #[arg(long, env = "BROKER_REDIRECT_URI", default_value = "http://localhost:54545/callback")]
    pub redirect_uri: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Register a new account.
    Add {
        name: String,
        #[arg(long, default_value = "max")]
        mode: String,
        #[arg(long, default_value_t = broker_common::DEFAULT_PRIORITY)]
        priority: i32,
        #[arg(long = "modelMappings")]
        model_mappings: Option<String>,
    },
    /// List every registered account.
    List,
    /// Remove an account by name.
    Remove {
        name: String,
        #[arg(long)]
        force: bool,
    },
    /// Pause an account (excluded from load balancing).
    Pause { name: String },
    /// Resume a paused account.
    Resume { name: String },
    /// Change an account's scheduling priority.
    SetPriority { name: String, priority: i32 },
    /// Zero every account's usage counters.
    ResetStats,
    /// Delete every recorded request row.
    ClearHistory,
    /// Print aggregate usage/cost statistics for recent requests.
    Analyze {
        #[arg(long, default_value_t = 100)]
        limit: u64,
    },
}
