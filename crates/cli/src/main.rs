//! dpctl - operator CLI for the dynpool agent
//!
//! Lists pools, shows their live stats and pushes configuration changes
//! through the agent HTTP API.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{health, pools};

/// dynpool operator CLI
#[derive(Parser)]
#[command(name = "dpctl")]
#[command(author, version, about = "CLI for dynpool worker pools", long_about = None)]
pub struct Cli {
    /// Agent API URL (can also be set via DPCTL_API_URL env var)
    #[arg(long, env = "DPCTL_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect and reconfigure pools
    #[command(subcommand)]
    Pools(PoolsCommands),

    /// Show agent health
    Health,

    /// Manage saved CLI settings
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
pub enum PoolsCommands {
    /// List all pools with live stats
    List,

    /// Show one pool's configuration and stats
    Get {
        /// Pool ID
        pool_id: String,
    },

    /// Change a pool's tunables; unset options are left unchanged
    Update {
        /// Pool ID
        pool_id: String,

        /// New core pool size
        #[arg(long)]
        core: Option<usize>,

        /// New maximum pool size
        #[arg(long)]
        max: Option<usize>,

        /// New queue capacity (resizable queues only)
        #[arg(long)]
        queue_capacity: Option<usize>,

        /// New keep-alive in seconds
        #[arg(long)]
        keep_alive: Option<u64>,

        /// New overflow policy (abort, caller_runs, discard, discard_oldest)
        #[arg(long)]
        policy: Option<String>,

        /// Let core workers time out when idle
        #[arg(long)]
        allow_core_timeout: Option<bool>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the saved settings and the effective API URL
    Show,

    /// Save the agent API URL
    SetUrl {
        /// Agent API URL
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let saved = config::Config::load()?;
    let api_url = saved.resolve_api_url(cli.api_url.as_deref());
    if cli.verbose {
        output::print_info(&format!("Using agent at {}", api_url));
    }

    // Execute command
    match cli.command {
        Commands::Pools(pools_cmd) => {
            let client = client::ApiClient::new(&api_url)?;
            match pools_cmd {
                PoolsCommands::List => pools::list_pools(&client, cli.format).await?,
                PoolsCommands::Get { pool_id } => {
                    pools::get_pool(&client, &pool_id, cli.format).await?
                }
                PoolsCommands::Update {
                    pool_id,
                    core,
                    max,
                    queue_capacity,
                    keep_alive,
                    policy,
                    allow_core_timeout,
                } => {
                    let update = client::PoolConfigUpdate {
                        core_pool_size: core,
                        maximum_pool_size: max,
                        queue_capacity,
                        keep_alive_secs: keep_alive,
                        overflow_policy: policy,
                        allow_core_thread_timeout: allow_core_timeout,
                    };
                    pools::update_pool(&client, &pool_id, update, cli.format).await?
                }
            }
        }
        Commands::Health => {
            let client = client::ApiClient::new(&api_url)?;
            health::show_health(&client, cli.format).await?;
        }
        Commands::Config(config_cmd) => match config_cmd {
            ConfigCommands::Show => {
                output::print_json(&saved);
                output::print_info(&format!("Effective API URL: {}", api_url));
            }
            ConfigCommands::SetUrl { url } => {
                url::Url::parse(&url)?;
                let updated = config::Config { api_url: Some(url) };
                let path = updated.save()?;
                output::print_success(&format!("Saved to {}", path.display()));
            }
        },
    }

    Ok(())
}
