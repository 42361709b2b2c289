//! Check the PostgreSQL connection the chat agent will use
//!
//! Run with: cargo run --bin check_db

use anyhow::{Context, Result};
use clap::Parser;
use sqlchat::config::{load_env_file, DbConfig};
use sqlchat::db::{init_pool, PgExecutor};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "check_db")]
#[command(about = "Verify database settings and list the tables the agent can query")]
struct Args {
    #[arg(long, default_value = "db_config.env")]
    env_file: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    load_env_file(&args.env_file);

    let config = DbConfig::from_env()?;
    println!("Connecting to: {}", config.redacted());

    let pool = init_pool(&config.connection_url())
        .await
        .with_context(|| format!("connection to {} failed", config.redacted()))?;
    println!("Connected.");

    let tables = PgExecutor::new(pool).list_tables().await?;
    if tables.is_empty() {
        println!("No tables in the public schema.");
    } else {
        println!("Tables in public schema ({}):", tables.len());
        for table in tables {
            println!("  - {}", table);
        }
    }

    Ok(())
}
