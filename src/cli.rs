//! CLI definitions for prioq.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// prioq CLI.
#[derive(Parser)]
#[command(name = "prioq")]
#[command(about = "Priority task queue broker with blocking dequeue")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the broker in foreground (default)
    Run {
        /// Server host, overrides server.host
        #[arg(long)]
        host: Option<String>,

        /// Server port, overrides server.port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Talk to a running broker
    Client(ClientArgs),
}

#[derive(Args)]
pub(crate) struct ClientArgs {
    /// Broker base URL
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    pub url: String,

    /// API key sent with every request
    #[arg(long, env = "PRIOQ_API_KEY")]
    pub api_key: String,

    #[command(subcommand)]
    pub action: ClientAction,
}

#[derive(Subcommand)]
pub(crate) enum ClientAction {
    /// Enqueue a task
    Enqueue {
        /// Task type
        #[arg(long)]
        queue_type: String,

        /// Priority, higher is more urgent
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        priority: i64,

        /// JSON object payload
        #[arg(long)]
        payload: String,

        /// Seconds before the task becomes claimable
        #[arg(long)]
        reevaluation: Option<u64>,
    },

    /// Claim a task, waiting up to `timeout` seconds
    Dequeue {
        /// Accepted task types (repeatable)
        #[arg(long = "queue-type", required = true)]
        queue_types: Vec<String>,

        /// Minimum priority
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        priority: i64,

        /// Seconds to wait
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Acknowledge a claimed task
    Ack {
        /// Task id
        id: String,
    },

    /// Report a claimed task as failed
    Fail {
        /// Task id
        id: String,

        /// Seconds until the task is retried
        #[arg(long)]
        reevaluation: Option<u64>,

        /// Failure reason
        #[arg(long)]
        message: Option<String>,
    },

    /// Count waiting tasks whose payload field equals a value
    Count {
        /// Task type
        #[arg(long)]
        queue_type: String,

        /// Payload field
        #[arg(long)]
        key: String,

        /// Value, parsed as JSON when possible
        #[arg(long)]
        value: String,
    },
}
