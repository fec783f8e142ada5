//! genflow - Command line surface for the generation backend
//!
//! Drives content generation and website analysis jobs, follows their
//! event streams, and replays narration feeds from a terminal.
//!
//! # Usage
//!
//! ```bash
//! # Start a website analysis and follow it to completion
//! genflow job create website-analysis --payload '{"url":"https://example.com"}' --watch
//!
//! # Poll one job
//! genflow job status 5f2c...
//!
//! # Follow a generation stream
//! genflow stream conn-42
//!
//! # Narrate the audience analysis for an organization
//! genflow narrate org-1 --kind audience
//!
//! # Verbose logging
//! RUST_LOG=debug genflow job watch 5f2c...
//! ```
//!
//! # Signals
//!
//! - `SIGINT`: Cancel the running operation and exit

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use genflow_core::{default_config_path, load_config_from_path, ConfigOverrides, GenflowClient};

use commands::CommandRunner;

/// genflow - Generation jobs, streams and narration from the terminal
#[derive(Parser, Debug)]
#[command(name = "genflow")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "GENFLOW_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Backend base URL
    #[arg(short = 'u', long, env = "GENFLOW_BASE_URL", value_name = "URL")]
    base_url: Option<String>,

    /// Bearer token for authenticated requests
    #[arg(short = 't', long, env = "GENFLOW_TOKEN", value_name = "TOKEN")]
    token: Option<String>,

    /// User id that owns the token
    #[arg(long, env = "GENFLOW_USER_ID", value_name = "ID")]
    user_id: Option<String>,

    /// Poll interval override in milliseconds
    #[arg(long, value_name = "MS")]
    poll_interval_ms: Option<u64>,

    /// Max poll attempts override
    #[arg(long, value_name = "N")]
    max_poll_attempts: Option<u32>,

    /// Use polling even when the backend streams
    #[arg(long)]
    force_polling: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "GENFLOW_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create and follow background jobs
    #[command(subcommand)]
    Job(JobCommand),

    /// Follow a generation stream and print its events
    Stream {
        /// Connection id issued by the backend
        connection_id: String,

        /// Full stream URL to use instead of the default endpoint
        #[arg(long, value_name = "URL")]
        url: Option<String>,
    },

    /// Print a narration feed as it arrives
    Narrate {
        /// Organization whose analysis is narrated
        organization_id: String,

        /// Narration kind (audience, topic, content)
        #[arg(short = 'k', long, default_value = "audience")]
        kind: String,

        /// Selected audience for topic and content narration
        #[arg(long)]
        audience: Option<String>,

        /// Selected topic for content narration
        #[arg(long)]
        topic: Option<String>,

        /// Replay the stored narrative instead of streaming
        #[arg(long)]
        legacy: bool,
    },

    /// Show the cached account reads
    Account,
}

/// Job commands
#[derive(Subcommand, Debug)]
pub enum JobCommand {
    /// Create a job
    Create {
        /// Job kind (content-generation, website-analysis)
        kind: String,

        /// JSON request body
        #[arg(short = 'p', long, default_value = "{}")]
        payload: String,

        /// Follow the job until it finishes
        #[arg(short = 'w', long)]
        watch: bool,
    },

    /// Fetch the current status of a job
    Status {
        /// Job id
        job_id: String,
    },

    /// Follow a job until it finishes
    Watch {
        /// Job id
        job_id: String,
    },

    /// Ask the backend to retry a failed job
    Retry {
        /// Job id
        job_id: String,
    },

    /// Ask the backend to cancel a job
    Cancel {
        /// Job id
        job_id: String,
    },
}

/// Initialize logging with the specified level
///
/// Logs go to stderr so stdout stays machine readable.
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("genflow_cli={level},genflow_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Build the client from the config file and command line overrides
fn build_client(args: &Args) -> Result<GenflowClient> {
    let path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(path)?;

    let mut overrides = ConfigOverrides::new().with_force_polling(args.force_polling);
    if let Some(ref url) = args.base_url {
        overrides = overrides.with_base_url(url.clone());
    }
    if let Some(ms) = args.poll_interval_ms {
        overrides = overrides.with_poll_interval_ms(ms);
    }
    if let Some(attempts) = args.max_poll_attempts {
        overrides = overrides.with_max_poll_attempts(attempts);
    }
    overrides.apply(&mut config)?;

    info!(
        base_url = %config.base_url,
        source = ?config.source(),
        "Configuration loaded"
    );

    let client = GenflowClient::in_memory(config)?;
    if let Some(ref token) = args.token {
        client.identity().set_token(token.clone(), args.user_id.clone());
    }
    client.identity().on_unauthorized(|| {
        error!("Backend rejected the token; signed out");
    });
    Ok(client)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!("genflow starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let client = build_client(&args)?;

    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => info!("Received SIGINT, cancelling"),
                    Err(e) => error!(error = %e, "Failed to listen for SIGINT"),
                }
                cancel_on_signal.cancel();
            }
            () = cancel_on_signal.cancelled() => {}
        }
    });

    let runner = CommandRunner::new(client, cancel.clone());
    let result = runner.run(args.command).await;
    cancel.cancel();

    match result {
        Ok(()) => {
            info!("genflow finished");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Command failed");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_job_create_with_watch() {
        let args = Args::try_parse_from([
            "genflow",
            "--base-url",
            "http://localhost:3000",
            "job",
            "create",
            "website-analysis",
            "--payload",
            "{\"url\":\"https://example.com\"}",
            "--watch",
        ])
        .unwrap();

        assert_eq!(args.base_url.as_deref(), Some("http://localhost:3000"));
        match args.command {
            Command::Job(JobCommand::Create { kind, watch, .. }) => {
                assert_eq!(kind, "website-analysis");
                assert!(watch);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_narrate_defaults_to_audience() {
        let args = Args::try_parse_from(["genflow", "narrate", "org-1"]).unwrap();
        match args.command {
            Command::Narrate { kind, legacy, .. } => {
                assert_eq!(kind, "audience");
                assert!(!legacy);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_force_polling_flag() {
        let args = Args::try_parse_from(["genflow", "--force-polling", "job", "watch", "j1"]).unwrap();
        assert!(args.force_polling);
    }
}
