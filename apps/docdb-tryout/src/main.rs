//! Runs the permission and partition checks.
//!
//! Every option can also be set through the environment variable named in
//! its help text. The process exits non-zero only when the database or
//! collection cannot be resolved.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use docdb_client::{ClientConfig, DocumentStore, PartitionKeyDefinition, RestClient};
use docdb_emulator::{Emulator, EmulatorConfig, PARTITION_DOCUMENTS, WELL_KNOWN_MASTER_KEY};
use docdb_scenario::{run, ScenarioConfig, ScenarioError, ScenarioReport};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Command-line arguments for the tryout.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Service endpoint
    #[arg(long, env = "HOST", default_value = "https://localhost:8081/")]
    host: String,

    /// Base64 master key
    #[arg(long, env = "AUTH_KEY", default_value = WELL_KNOWN_MASTER_KEY, hide_env_values = true)]
    auth_key: String,

    #[arg(long, env = "DATABASE_ID", default_value = "ToDoList")]
    database_id: String,

    #[arg(long, env = "COLLECTION_ID", default_value = "Items")]
    collection_id: String,

    /// Document field the collection is partitioned on
    #[arg(long, env = "PARTITION_KEY", default_value = "partition")]
    partition_key: String,

    /// Partition the restricted user must not reach
    #[arg(long, env = "PARTITION_A", default_value = "partA")]
    partition_a: String,

    /// Partition the restricted user is granted
    #[arg(long, env = "PARTITION_B", default_value = "partB")]
    partition_b: String,

    #[arg(long, env = "TEST_USER", default_value = "testuser")]
    test_user: String,

    #[arg(long, env = "TEST_SPROC_ID", default_value = "getAllDocs")]
    test_sproc_id: String,

    /// Wait before checking permission propagation, in milliseconds
    #[arg(long, env = "SETTLE_DELAY_MS", default_value_t = 3000)]
    settle_delay_ms: u64,

    /// Documents created concurrently in partition B
    #[arg(long, env = "BULK_DOCUMENTS", default_value_t = 10)]
    bulk_documents: usize,

    /// Delete every document at the end of the run
    #[arg(long, env = "CLEANUP_DOCUMENTS", default_value_t = false)]
    cleanup_documents: bool,

    /// Accept the emulator's self-signed certificate
    #[arg(long, env = "ACCEPT_INVALID_CERTS", default_value_t = true, action = clap::ArgAction::Set)]
    accept_invalid_certs: bool,

    /// Request timeout in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value_t = 30000)]
    request_timeout_ms: u64,

    /// Run against an in-process emulator instead of HOST
    #[arg(long)]
    in_memory: bool,
}

impl Args {
    fn scenario_config(&self) -> ScenarioConfig {
        ScenarioConfig {
            database_id: self.database_id.clone(),
            collection_id: self.collection_id.clone(),
            partition_key: self.partition_key.clone(),
            partition_a: self.partition_a.clone(),
            partition_b: self.partition_b.clone(),
            test_user: self.test_user.clone(),
            test_sproc_id: self.test_sproc_id.clone(),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            bulk_documents: self.bulk_documents,
            cleanup_documents: self.cleanup_documents,
        }
    }

    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            endpoint: self.host.clone(),
            request_timeout_ms: self.request_timeout_ms,
            accept_invalid_certs: self.accept_invalid_certs,
        }
    }
}

/// An emulator provisioned with the handles the scenario resolves.
fn in_memory_store(args: &Args, config: &ScenarioConfig) -> anyhow::Result<Arc<dyn DocumentStore>> {
    let emulator = Arc::new(
        Emulator::new(EmulatorConfig {
            master_key: args.auth_key.clone(),
            ..EmulatorConfig::default()
        })
        .context("invalid master key")?,
    );
    emulator.provision_database(&config.database_id)?;
    emulator.provision_collection(
        &config.database_id,
        &config.collection_id,
        Some(PartitionKeyDefinition::hash(&config.partition_key)),
    )?;
    emulator
        .procedures()
        .register_builtin(config.test_sproc_id.clone(), PARTITION_DOCUMENTS)?;
    Ok(Arc::new(emulator.client()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let config = args.scenario_config();
    let store: Arc<dyn DocumentStore> = if args.in_memory {
        info!("using in-process emulator");
        in_memory_store(&args, &config)?
    } else {
        Arc::new(
            RestClient::with_master_key(args.client_config(), &args.auth_key)
                .context("failed to build client")?,
        )
    };

    println!("Document database tryout");
    println!("  Endpoint: {}", if args.in_memory { "in-memory" } else { args.host.as_str() });
    println!("  Database: {}", config.database_id);
    println!("  Collection: {}", config.collection_id);
    println!("  Partitions: {} / {}", config.partition_a, config.partition_b);
    println!();

    let mut report = ScenarioReport::new();
    let result = run(&config, store, &mut report).await;
    report.print_summary();

    match result {
        Ok(()) => Ok(()),
        Err(err @ ScenarioError::Setup { .. }) => {
            error!("{}", err);
            std::process::exit(1);
        }
        Err(err) => Err(err.into()),
    }
}
