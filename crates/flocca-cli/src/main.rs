//! Flocca CLI - launches MCP connector servers over stdio.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use flocca_cli::{build_connector, CONNECTOR_NAMES};
use flocca_mcp::{ToolServer, UnknownMethodPolicy};

#[derive(Parser)]
#[command(name = "flocca")]
#[command(author, version, about = "Flocca MCP connector servers", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve a connector over stdin/stdout
    Serve {
        /// Connector name (see `flocca list`)
        connector: String,

        /// Answer unknown JSON-RPC methods with an error instead of
        /// silently ignoring them
        #[arg(long)]
        strict_methods: bool,
    },

    /// List available connectors
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout carries the JSON-RPC transport; all logging goes to stderr.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Serve {
            connector,
            strict_methods,
        } => {
            let connector = build_connector(&connector)?;
            let policy = if strict_methods {
                UnknownMethodPolicy::Reject
            } else {
                UnknownMethodPolicy::Ignore
            };
            ToolServer::new(connector)
                .with_unknown_method_policy(policy)
                .run_stdio()
                .await?;
        }
        Commands::List => {
            for name in CONNECTOR_NAMES {
                println!("{name}");
            }
        }
    }

    Ok(())
}
