//! The capability interface every backend implements.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::resolver::{PartitionResolver, ResolverRegistry};
use crate::types::{
    Collection, Database, Document, FeedOptions, PartitionKey, Permission, QuerySpec,
    StoredProcedure, User,
};

/// Operations a document-database service offers to the harness.
///
/// Each call is a single request. Links may be id-based or self-links.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn read_database(&self, id: &str) -> Result<Database>;

    async fn read_collection(&self, database_link: &str, id: &str) -> Result<Collection>;

    /// Creates a document. `target_link` is a collection link, or a database
    /// link with a registered partition resolver.
    async fn create_document(
        &self,
        target_link: &str,
        document: Document,
        partition: &PartitionKey,
    ) -> Result<Document>;

    async fn delete_document(&self, document_link: &str, partition: &PartitionKey) -> Result<()>;

    async fn query_documents(
        &self,
        collection_link: &str,
        query: &QuerySpec,
        options: &FeedOptions,
    ) -> Result<Vec<Document>>;

    async fn create_stored_procedure(
        &self,
        collection_link: &str,
        procedure: &StoredProcedure,
    ) -> Result<StoredProcedure>;

    async fn read_stored_procedure(
        &self,
        collection_link: &str,
        id: &str,
    ) -> Result<StoredProcedure>;

    async fn delete_stored_procedure(&self, link: &str) -> Result<()>;

    /// Runs a procedure scoped to `partition` and returns the response body.
    async fn execute_stored_procedure(
        &self,
        link: &str,
        params: &[Value],
        partition: &PartitionKey,
    ) -> Result<Value>;

    async fn read_user(&self, database_link: &str, id: &str) -> Result<User>;

    async fn create_user(&self, database_link: &str, id: &str) -> Result<User>;

    async fn delete_user(&self, link: &str) -> Result<()>;

    async fn list_permissions(&self, user_link: &str) -> Result<Vec<Permission>>;

    async fn create_permission(
        &self,
        user_link: &str,
        permission: &Permission,
        partition: Option<&PartitionKey>,
    ) -> Result<Permission>;

    async fn replace_permission(
        &self,
        link: &str,
        permission: &Permission,
        partition: Option<&PartitionKey>,
    ) -> Result<Permission>;

    async fn delete_permission(&self, link: &str) -> Result<()>;

    /// A client against the same service that authenticates with the
    /// resource tokens of `permissions` instead of this client's credential.
    fn with_permission_feed(&self, permissions: &[Permission]) -> Result<Arc<dyn DocumentStore>>;

    fn resolvers(&self) -> &ResolverRegistry;

    fn register_partition_resolver(
        &self,
        database_link: &str,
        resolver: Arc<dyn PartitionResolver>,
    ) {
        self.resolvers().register(database_link, resolver);
    }
}
