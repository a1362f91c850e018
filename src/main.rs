use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use warehouse::{CredentialConfig, Row, StatementApiBackend, WarehouseClient};

const DEFAULT_CONFIG_FILE: &str = "warehouse.toml";

#[derive(Parser)]
#[command(name = "warehouse")]
#[command(about = "Connect to a SQL warehouse with configured credentials")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_COMMIT_HASH"), ")"))]
struct Cli {
    /// Path to credentials config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Connect and run `SELECT current_user()`
    Check,
    /// Run a statement and print the rows
    Query {
        /// SQL to execute
        sql: String,
    },
    /// Show which config file and auth strategy would be used
    Config,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(fmt::layer().with_writer(std::io::stderr).json())
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .init();
    }
}

/// `--config`, else `./warehouse.toml`, else `<config dir>/warehouse/warehouse.toml`.
fn config_path(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(path) = explicit {
        return path;
    }

    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.exists() {
        return local;
    }

    dirs::config_dir()
        .map(|dir| dir.join("warehouse").join(DEFAULT_CONFIG_FILE))
        .unwrap_or(local)
}

fn print_rows(rows: &[Row]) {
    for row in rows {
        let cells: Vec<&str> = row
            .iter()
            .map(|cell| cell.as_deref().unwrap_or("NULL"))
            .collect();
        println!("{}", cells.join("\t"));
    }
}

async fn run_statement(config: &CredentialConfig, sql: &str) -> Result<Vec<Row>> {
    let credentials = config.build().context("Failed to build credentials")?;
    let client = WarehouseClient::new(Arc::from(credentials), StatementApiBackend::new());

    let sql = sql.to_string();
    let rows = client
        .with_connection(|conn| Box::pin(async move { conn.execute(&sql).await }))
        .await
        .context("Warehouse statement failed")?;

    Ok(rows)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let path = config_path(cli.config);
    let config = CredentialConfig::load(&path)
        .with_context(|| format!("Failed to load config: {}", path.display()))?;

    match cli.command.unwrap_or(Command::Check) {
        Command::Config => {
            println!("Config file: {}", path.display());
            println!("Auth: {}", config.auth_kind());
        }
        Command::Check => {
            let rows = run_statement(&config, "SELECT current_user()").await?;
            println!("Connection successful. Current user:");
            print_rows(&rows);
        }
        Command::Query { sql } => {
            let rows = run_statement(&config, &sql).await?;
            print_rows(&rows);
        }
    }

    Ok(())
}
