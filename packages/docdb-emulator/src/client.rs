//! In-process [`DocumentStore`] backed by an [`Emulator`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use docdb_client::link::{child_link, database_link, feed_link, ResourceKind};
use docdb_client::{
    ClientError, Collection, Database, Document, DocumentStore, FeedOptions, PartitionKey,
    Permission, QuerySpec, ResolverRegistry, ResourcePath, ResourceTokens, Result,
    StoredProcedure, User,
};

use crate::access::Principal;
use crate::emulator::Emulator;

#[derive(Clone)]
enum Identity {
    Master,
    Tokens(Arc<ResourceTokens>),
}

/// Calls the emulator directly, authenticating like a REST client would:
/// with the master key, or with the resource token covering each link.
#[derive(Clone)]
pub struct EmulatorClient {
    emulator: Arc<Emulator>,
    identity: Identity,
    resolvers: ResolverRegistry,
}

impl EmulatorClient {
    pub fn master(emulator: Arc<Emulator>) -> Self {
        Self {
            emulator,
            identity: Identity::Master,
            resolvers: ResolverRegistry::new(),
        }
    }

    pub fn emulator(&self) -> &Arc<Emulator> {
        &self.emulator
    }

    /// Principal presented for a request on `link`.
    fn principal(&self, link: &str) -> Result<Principal> {
        match &self.identity {
            Identity::Master => Ok(Principal::Master),
            Identity::Tokens(tokens) => {
                let path = ResourcePath::parse(link)?;
                tokens
                    .token_for(&path)
                    .map(|token| Principal::ResourceToken(token.to_string()))
                    .ok_or_else(|| {
                        ClientError::Unauthorized(format!(
                            "No resource token covers '{}'",
                            path.path()
                        ))
                    })
            }
        }
    }
}

#[async_trait]
impl DocumentStore for EmulatorClient {
    async fn read_database(&self, id: &str) -> Result<Database> {
        let link = database_link(id);
        let principal = self.principal(&link)?;
        Ok(self.emulator.read_database(&principal, &link)?)
    }

    async fn read_collection(&self, database_link: &str, id: &str) -> Result<Collection> {
        let link = child_link(database_link, ResourceKind::Collection, id);
        let principal = self.principal(&link)?;
        Ok(self.emulator.read_collection(&principal, &link)?)
    }

    async fn create_document(
        &self,
        target_link: &str,
        document: Document,
        partition: &PartitionKey,
    ) -> Result<Document> {
        let collection = self.resolvers.resolve_target(target_link, &document)?;
        let principal = self.principal(&feed_link(&collection, ResourceKind::Document))?;
        Ok(self
            .emulator
            .create_document(&principal, &collection, document, Some(partition))?)
    }

    async fn delete_document(&self, document_link: &str, partition: &PartitionKey) -> Result<()> {
        let principal = self.principal(document_link)?;
        Ok(self
            .emulator
            .delete_document(&principal, document_link, Some(partition))?)
    }

    async fn query_documents(
        &self,
        collection_link: &str,
        query: &QuerySpec,
        options: &FeedOptions,
    ) -> Result<Vec<Document>> {
        let principal = self.principal(&feed_link(collection_link, ResourceKind::Document))?;
        Ok(self
            .emulator
            .query_documents(&principal, collection_link, query, options)?)
    }

    async fn create_stored_procedure(
        &self,
        collection_link: &str,
        procedure: &StoredProcedure,
    ) -> Result<StoredProcedure> {
        let principal =
            self.principal(&feed_link(collection_link, ResourceKind::StoredProcedure))?;
        Ok(self
            .emulator
            .create_stored_procedure(&principal, collection_link, procedure)?)
    }

    async fn read_stored_procedure(
        &self,
        collection_link: &str,
        id: &str,
    ) -> Result<StoredProcedure> {
        let link = child_link(collection_link, ResourceKind::StoredProcedure, id);
        let principal = self.principal(&link)?;
        Ok(self.emulator.read_stored_procedure(&principal, &link)?)
    }

    async fn delete_stored_procedure(&self, link: &str) -> Result<()> {
        let principal = self.principal(link)?;
        Ok(self.emulator.delete_stored_procedure(&principal, link)?)
    }

    async fn execute_stored_procedure(
        &self,
        link: &str,
        params: &[Value],
        partition: &PartitionKey,
    ) -> Result<Value> {
        let principal = self.principal(link)?;
        Ok(self
            .emulator
            .execute_stored_procedure(&principal, link, params, Some(partition))?)
    }

    async fn read_user(&self, database_link: &str, id: &str) -> Result<User> {
        let link = child_link(database_link, ResourceKind::User, id);
        let principal = self.principal(&link)?;
        Ok(self.emulator.read_user(&principal, &link)?)
    }

    async fn create_user(&self, database_link: &str, id: &str) -> Result<User> {
        let principal = self.principal(&feed_link(database_link, ResourceKind::User))?;
        Ok(self.emulator.create_user(&principal, database_link, id)?)
    }

    async fn delete_user(&self, link: &str) -> Result<()> {
        let principal = self.principal(link)?;
        Ok(self.emulator.delete_user(&principal, link)?)
    }

    async fn list_permissions(&self, user_link: &str) -> Result<Vec<Permission>> {
        let principal = self.principal(&feed_link(user_link, ResourceKind::Permission))?;
        Ok(self.emulator.list_permissions(&principal, user_link)?)
    }

    async fn create_permission(
        &self,
        user_link: &str,
        permission: &Permission,
        partition: Option<&PartitionKey>,
    ) -> Result<Permission> {
        let principal = self.principal(&feed_link(user_link, ResourceKind::Permission))?;
        Ok(self
            .emulator
            .create_permission(&principal, user_link, permission, partition)?)
    }

    async fn replace_permission(
        &self,
        link: &str,
        permission: &Permission,
        partition: Option<&PartitionKey>,
    ) -> Result<Permission> {
        let principal = self.principal(link)?;
        Ok(self
            .emulator
            .replace_permission(&principal, link, permission, partition)?)
    }

    async fn delete_permission(&self, link: &str) -> Result<()> {
        let principal = self.principal(link)?;
        Ok(self.emulator.delete_permission(&principal, link)?)
    }

    fn with_permission_feed(&self, permissions: &[Permission]) -> Result<Arc<dyn DocumentStore>> {
        let tokens = ResourceTokens::from_permissions(permissions);
        if tokens.is_empty() {
            return Err(ClientError::Unauthorized(
                "permission feed carries no resource tokens".to_string(),
            ));
        }
        Ok(Arc::new(EmulatorClient {
            emulator: Arc::clone(&self.emulator),
            identity: Identity::Tokens(Arc::new(tokens)),
            resolvers: ResolverRegistry::new(),
        }))
    }

    fn resolvers(&self) -> &ResolverRegistry {
        &self.resolvers
    }
}
