//! Client for a hosted document database: resource types, request signing,
//! partition resolvers and the [`DocumentStore`] capability interface with
//! its REST implementation.

pub mod auth;
pub mod error;
pub mod headers;
pub mod link;
pub mod resolver;
pub mod rest;
pub mod store;
pub mod types;

pub use auth::{Credential, MasterKey, ResourceTokens};
pub use error::{ClientError, Result};
pub use link::{ResourceKind, ResourcePath};
pub use resolver::{HashPartitionResolver, PartitionResolver, ResolverRegistry};
pub use rest::{ClientConfig, RestClient};
pub use store::DocumentStore;
pub use types::{
    Collection, Database, Document, FeedOptions, PartitionKey, PartitionKeyDefinition, Permission,
    PermissionMode, QueryParameter, QuerySpec, StoredProcedure, SystemProperties, User,
};
