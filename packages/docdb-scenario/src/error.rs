//! Scenario error types.

use docdb_client::ClientError;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ScenarioError {
    /// A handle the whole run depends on could not be resolved
    #[error("Setup failed while reading {what}: {source}")]
    Setup {
        what: &'static str,
        #[source]
        source: ClientError,
    },

    /// A response did not show the expected property
    #[error("Verification failed: {0}")]
    Verification(String),
}
