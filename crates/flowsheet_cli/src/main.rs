use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flowsheet_client::{ClientConfig, ExportFormat, FlowsheetSession};
use flowsheet_graph::UnitTypeRegistry;
use tracing::{info, warn};

/// Flowsheet editor client
///
/// Talks to the flowsheet backend: manage flowsheets, run simulations and
/// ask the process assistant for changes.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (defaults to flowsheet.toml or FLOWSHEET_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backend base URL, overrides the config
    #[arg(long)]
    url: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List stored flowsheets, most recently updated first
    List,
    /// Create an empty flowsheet and print its id
    Create {
        name: String,
        #[arg(short = 'D', long, default_value = "")]
        description: String,
    },
    /// Print a flowsheet as JSON
    Show { id: String },
    /// Simulate a flowsheet and print the result
    Simulate { id: String },
    /// Send a message to the assistant about a flowsheet
    Chat { id: String, message: String },
    /// Export a flowsheet
    Export {
        id: String,
        #[arg(short, long, default_value = "json")]
        format: ExportFormat,
    },
    /// List the known unit types
    Units,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        "info,flowsheet_client=debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => ClientConfig::from_file(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?,
        None => ClientConfig::load().unwrap_or_else(|e| {
            warn!("Could not load config, using defaults: {}", e);
            ClientConfig::default()
        }),
    };
    if let Some(url) = args.url {
        config.backend.base_url = url;
    }
    info!(backend = %config.backend.kind, url = %config.backend.base_url, "using backend");

    let mut session = FlowsheetSession::new(config)?;

    match args.command {
        Command::List => {
            for summary in session.list().await? {
                println!(
                    "{}  {}  {}",
                    summary.id,
                    summary.updated_at.format("%Y-%m-%d %H:%M"),
                    summary.name
                );
            }
        }
        Command::Create { name, description } => {
            let id = session.create(&name, &description).await?;
            println!("{}", id);
        }
        Command::Show { id } => {
            let flowsheet = session.open(&id).await?;
            println!("{}", serde_json::to_string_pretty(&flowsheet)?);
        }
        Command::Simulate { id } => {
            session.open(&id).await?;
            let result = session.run_simulation().await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Chat { id, message } => {
            session.open(&id).await?;
            let outcome = session.send_message(&message, None).await?;
            session
                .flush()
                .await
                .context("Assistant changes were applied locally but could not be saved")?;
            println!("{}", outcome.text);
        }
        Command::Export { id, format } => {
            session.open(&id).await?;
            let payload = session.export(format).await?;
            println!("{}", payload.to_text());
        }
        Command::Units => {
            for info in UnitTypeRegistry::catalog() {
                let ports = UnitTypeRegistry::port_cardinality(&info.unit_type);
                println!(
                    "{:<20} {}/{}  {}",
                    info.unit_type.as_str(),
                    ports.inlets,
                    ports.outlets,
                    info.description
                );
            }
        }
    }

    Ok(())
}
