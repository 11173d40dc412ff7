//! Scripted check of a document database's permission model.
//!
//! [`run`] drives an elevated client through provisioning, derives a client
//! restricted to one partition from a user's permission feed, and records
//! whether each request was allowed or refused as expected.

pub mod config;
pub mod error;
pub mod policy;
pub mod report;
pub mod scenario;

pub use config::{ScenarioConfig, PROCEDURE_SOURCE};
pub use error::ScenarioError;
pub use policy::{FailureReason, StepId, StepOutcome, StepPolicy};
pub use report::{Observations, ScenarioReport, StepRecord};
pub use scenario::{procedure_document_count, run, NO_DOCS};
