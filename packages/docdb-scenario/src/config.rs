//! Scenario configuration.

use std::time::Duration;

use docdb_client::link::{
    collection_link, database_link, document_link, permission_link, stored_procedure_link,
    user_link,
};
use docdb_client::StoredProcedure;

/// Source of the procedure the scenario installs. It answers with the
/// documents of the partition it runs in, or `"no docs found"`.
pub const PROCEDURE_SOURCE: &str = r#"function listPartition(partitionKey) {
    var collection = getContext().getCollection();
    var accepted = collection.queryDocuments(
        collection.getSelfLink(),
        'SELECT * FROM root r',
        { partitionKey: partitionKey },
        function (err, feed) {
            if (err) throw err;
            var response = getContext().getResponse();
            if (!feed || !feed.length) {
                response.setBody('no docs found');
            } else {
                response.setBody(JSON.stringify({ partitionKey: partitionKey, docs: feed }));
            }
        });
    if (!accepted) throw new Error('query was not accepted by the server');
}"#;

/// Names, partitions and knobs of one scenario run.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    pub database_id: String,
    pub collection_id: String,
    /// Document field holding the partition value
    pub partition_key: String,
    /// Partition the restricted user must not reach
    pub partition_a: String,
    /// Partition the restricted user is granted
    pub partition_b: String,
    pub test_user: String,
    pub test_sproc_id: String,
    /// Wait before checking permission propagation
    pub settle_delay: Duration,
    /// Documents created concurrently in partition B
    pub bulk_documents: usize,
    /// Delete every document at the end of the run
    pub cleanup_documents: bool,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            database_id: "ToDoList".to_string(),
            collection_id: "Items".to_string(),
            partition_key: "partition".to_string(),
            partition_a: "partA".to_string(),
            partition_b: "partB".to_string(),
            test_user: "testuser".to_string(),
            test_sproc_id: "getAllDocs".to_string(),
            settle_delay: Duration::from_secs(3),
            bulk_documents: 10,
            cleanup_documents: false,
        }
    }
}

impl ScenarioConfig {
    pub fn database_link(&self) -> String {
        database_link(&self.database_id)
    }

    pub fn collection_link(&self) -> String {
        collection_link(&self.database_id, &self.collection_id)
    }

    pub fn procedure_link(&self) -> String {
        stored_procedure_link(&self.database_id, &self.collection_id, &self.test_sproc_id)
    }

    pub fn user_link(&self) -> String {
        user_link(&self.database_id, &self.test_user)
    }

    pub fn partition_permission_id(&self) -> String {
        format!("{}_partition_permission", self.test_user)
    }

    pub fn sproc_permission_id(&self) -> String {
        format!("{}_sproc_permission", self.test_user)
    }

    pub fn permission_link(&self, permission_id: &str) -> String {
        permission_link(&self.database_id, &self.test_user, permission_id)
    }

    pub fn document_link(&self, document_id: &str) -> String {
        document_link(&self.database_id, &self.collection_id, document_id)
    }

    /// The procedure installed by the run.
    pub fn procedure(&self) -> StoredProcedure {
        StoredProcedure::new(self.test_sproc_id.clone(), PROCEDURE_SOURCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_names_follow_the_user() {
        let config = ScenarioConfig {
            test_user: "alice".to_string(),
            ..ScenarioConfig::default()
        };
        assert_eq!(config.partition_permission_id(), "alice_partition_permission");
        assert_eq!(config.sproc_permission_id(), "alice_sproc_permission");
        assert_eq!(config.user_link(), "dbs/ToDoList/users/alice");
        assert_eq!(
            config.procedure_link(),
            "dbs/ToDoList/colls/Items/sprocs/getAllDocs"
        );
        assert_eq!(
            config.permission_link(&config.partition_permission_id()),
            "dbs/ToDoList/users/alice/permissions/alice_partition_permission"
        );
        assert_eq!(
            config.document_link("d 1"),
            "dbs/ToDoList/colls/Items/docs/d 1"
        );
        assert_eq!(config.procedure().id, "getAllDocs");
    }
}
