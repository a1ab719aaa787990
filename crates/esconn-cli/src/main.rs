//! 🚀 esconn -- the front door of esconn.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 Loads config, sets up logging, builds a connector, runs one lifecycle command.
//! The real work happens in the library. This binary is the manager. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_FULL};
use esconn::{Connector, IndexLayout, IndexStatus};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "esconn")]
#[command(about = "Index and pipeline lifecycle for Elasticsearch, including zero-downtime rebuilds", long_about = None)]
struct Cli {
    /// TOML config file. Without one, only ESCONN_* environment variables are read.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create every pipeline, then every index that does not exist yet
    Setup,
    /// Create one index (fails if it already exists)
    CreateIndex { name: String },
    /// Delete and recreate one index, documents gone
    RecreateIndex { name: String },
    /// Migrate one index in place under the same name
    UpdateIndex { name: String },
    /// Rebuild one index behind its alias with no downtime
    RebuildIndex { name: String },
    /// Delete one index if it exists
    DeleteIndex { name: String },
    /// Put pipelines (all registered ones when no names are given)
    CreatePipelines { names: Vec<String> },
    /// Delete pipelines (all registered ones when no names are given)
    DeletePipelines { names: Vec<String> },
    /// Show layout and document counts (all registered indices when no names are given)
    Status { names: Vec<String> },
}

/// 🚀 main() -- init tracing, parse args, load config, run, and cry on error.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        error!("💀 error: {}", err);
        // -- 🧅 peel the onion of sadness, one layer at a time
        let mut the_vibes_are_giving_connection_issues = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            let cause_str = cause.to_string();
            if cause_str.contains("error sending request")
                || cause_str.contains("connection refused")
                || cause_str.contains("Connection refused")
                || cause_str.contains("tcp connect error")
                || cause_str.contains("dns error")
            {
                the_vibes_are_giving_connection_issues = true;
            }
        }

        if the_vibes_are_giving_connection_issues {
            error!(
                "🔧 hint: looks like Elasticsearch isn't reachable. \
                Check that the cluster is running and that `engine.url` (or ESCONN_ENGINE__URL) \
                points at it. If you're using Docker, `docker ps` knows the truth. ☕"
            );
        }

        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    if let Some(path) = &cli.config {
        let exists = path.try_exists().with_context(|| {
            format!(
                "💀 Could not check whether the configuration file '{}' exists.",
                path.display()
            )
        })?;
        anyhow::ensure!(
            exists,
            "💀 Configuration file '{}' does not exist. Relative paths are resolved from the current directory.",
            path.display()
        );
    }

    let app_config = esconn::load_config(cli.config.as_deref())
        .context("💀 Couldn't load the configuration. Take a look at the file and the ESCONN_* env vars.")?;
    let mut connector = esconn::build_connector(&app_config)?;

    match cli.command {
        Command::Setup => connector.execute_setup_process().await?,
        Command::CreateIndex { name } => connector.create_index(&name).await?,
        Command::RecreateIndex { name } => connector.recreate_index(&name).await?,
        Command::UpdateIndex { name } => connector.update_index(&name).await?,
        Command::RebuildIndex { name } => {
            let report = connector.rebuild_index(&name).await?;
            info!(
                alias = %report.alias,
                previous = ?report.previous,
                current = %report.current,
                copied = report.copied,
                "🔀 rebuild finished"
            );
        }
        Command::DeleteIndex { name } => connector.delete_index(&name).await?,
        Command::CreatePipelines { names } => {
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            connector
                .create_pipelines((!names.is_empty()).then_some(names.as_slice()))
                .await?
        }
        Command::DeletePipelines { names } => {
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            connector
                .delete_pipelines((!names.is_empty()).then_some(names.as_slice()))
                .await?
        }
        Command::Status { names } => {
            let names = if names.is_empty() {
                connector.index_names()
            } else {
                names
            };
            print_status(&mut connector, &names).await?;
        }
    }
    Ok(())
}

async fn print_status(connector: &mut Connector, names: &[String]) -> Result<()> {
    let mut rows = Vec::with_capacity(names.len());
    for name in names {
        rows.push(connector.describe_index(name).await?);
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["index", "external name", "layout", "documents"]);
    for status in &rows {
        table.add_row(status_row(status));
    }
    println!("{table}");
    Ok(())
}

fn status_row(status: &IndexStatus) -> Vec<Cell> {
    let layout = match &status.layout {
        IndexLayout::Missing => "missing".to_string(),
        IndexLayout::Plain => "plain index".to_string(),
        IndexLayout::Alias { targets } => format!("alias -> {}", targets.join(", ")),
    };
    let documents = status
        .documents
        .map_or_else(|| "-".to_string(), |count| count.to_string());
    vec![
        Cell::new(&status.internal_name),
        Cell::new(&status.external_name),
        Cell::new(layout),
        Cell::new(documents).set_alignment(CellAlignment::Right),
    ]
}
