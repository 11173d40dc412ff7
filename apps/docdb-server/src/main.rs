//! Serves the in-memory emulator over HTTP.
//!
//! Provisions the database, collection and procedure the scenario expects,
//! then accepts master-key and resource-token requests until Ctrl+C.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use docdb_client::PartitionKeyDefinition;
use docdb_emulator::{
    Emulator, EmulatorConfig, Router, Server, PARTITION_DOCUMENTS, WELL_KNOWN_MASTER_KEY,
};
use tokio::signal;
use tracing_subscriber::EnvFilter;

/// Command-line arguments for the emulator server.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 8081)]
    port: u16,

    /// Host address to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Base64 master key accepted for elevated requests
    #[arg(long, env = "AUTH_KEY", default_value = WELL_KNOWN_MASTER_KEY, hide_env_values = true)]
    auth_key: String,

    /// Database to provision
    #[arg(long, default_value = "ToDoList")]
    database: String,

    /// Collection to provision
    #[arg(long, default_value = "Items")]
    collection: String,

    /// Document field the collection is partitioned on
    #[arg(long, default_value = "partition")]
    partition_key: String,

    /// Procedure id bound to the partition listing handler
    #[arg(long, default_value = "getAllDocs")]
    procedure_id: String,

    /// Request timeout in milliseconds
    #[arg(long, default_value_t = 5000)]
    request_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = EmulatorConfig {
        master_key: args.auth_key.clone(),
        request_timeout_ms: args.request_timeout_ms,
        ..EmulatorConfig::default()
    };
    let emulator = Arc::new(Emulator::new(config).context("invalid master key")?);

    emulator
        .provision_database(&args.database)
        .context("failed to provision database")?;
    emulator
        .provision_collection(
            &args.database,
            &args.collection,
            Some(PartitionKeyDefinition::hash(&args.partition_key)),
        )
        .context("failed to provision collection")?;
    emulator
        .procedures()
        .register_builtin(args.procedure_id.clone(), PARTITION_DOCUMENTS)
        .context("failed to bind procedure handler")?;

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .context("invalid listen address")?;
    let server = Server::new(addr, Router::new(emulator));

    println!("Starting document-database emulator...");
    println!("  Host: {}", args.host);
    println!("  Port: {}", args.port);
    println!("  Database: {}", args.database);
    println!("  Collection: {} (partitioned on /{})", args.collection, args.partition_key);
    println!("  Procedure: {}", args.procedure_id);
    println!("  Request timeout: {} ms", args.request_timeout_ms);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.serve().await {
            tracing::error!("Server error: {}", e);
        }
    });

    signal::ctrl_c()
        .await
        .context("failed to listen for ctrl_c")?;
    println!("\nShutting down emulator...");
    server_handle.abort();

    Ok(())
}
