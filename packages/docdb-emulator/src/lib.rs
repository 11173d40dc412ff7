//! In-memory emulator of the document-database service.
//!
//! Stores databases, partitioned collections, documents, procedures, users
//! and permissions, enforces partition-scoped resource tokens, and serves the
//! REST wire protocol so [`docdb_client::RestClient`] can run against it.

pub mod access;
pub mod client;
pub mod config;
pub mod emulator;
pub mod error;
pub mod handlers;
pub mod procedure;
pub mod query;
pub mod router;
pub mod server;

pub use access::Principal;
pub use client::EmulatorClient;
pub use config::{EmulatorConfig, WELL_KNOWN_MASTER_KEY};
pub use emulator::Emulator;
pub use error::EmulatorError;
pub use procedure::{ProcedureRegistry, PARTITION_DOCUMENTS};
pub use router::Router;
pub use server::Server;
