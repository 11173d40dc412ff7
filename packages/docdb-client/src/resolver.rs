//! Client-side partition resolvers.
//!
//! A resolver maps a document to the collection that should hold it, so a
//! document can be created against a database link instead of a collection.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{ClientError, Result};
use crate::link::{trim_link, ResourceKind, ResourcePath};
use crate::types::{Document, PartitionKey};

/// Places documents into collections.
pub trait PartitionResolver: Send + Sync {
    /// Collection link that should receive `document`.
    fn resolve_for_create(&self, document: &Document) -> Result<String>;
}

/// Consistent hash ring over a fixed set of collections.
pub struct HashPartitionResolver {
    partition_field: String,
    collections: Vec<String>,
    ring: BTreeMap<u32, usize>,
}

impl HashPartitionResolver {
    pub const DEFAULT_VIRTUAL_NODES: usize = 128;

    pub fn new(partition_field: impl Into<String>, collection_links: Vec<String>) -> Result<Self> {
        Self::with_virtual_nodes(
            partition_field,
            collection_links,
            Self::DEFAULT_VIRTUAL_NODES,
        )
    }

    pub fn with_virtual_nodes(
        partition_field: impl Into<String>,
        collection_links: Vec<String>,
        virtual_nodes: usize,
    ) -> Result<Self> {
        if collection_links.is_empty() {
            return Err(ClientError::PartitionResolution(
                "hash resolver needs at least one collection".to_string(),
            ));
        }
        if virtual_nodes == 0 {
            return Err(ClientError::PartitionResolution(
                "hash resolver needs at least one virtual node per collection".to_string(),
            ));
        }

        let collections: Vec<String> = collection_links
            .iter()
            .map(|link| trim_link(link).to_string())
            .collect();

        let mut ring = BTreeMap::new();
        for (index, link) in collections.iter().enumerate() {
            for node in 0..virtual_nodes {
                let point = crc32fast::hash(format!("{}-{}", link, node).as_bytes());
                ring.entry(point).or_insert(index);
            }
        }

        Ok(Self {
            partition_field: partition_field.into(),
            collections,
            ring,
        })
    }

    fn collection_for(&self, key: &str) -> &str {
        let point = crc32fast::hash(key.as_bytes());
        let index = self
            .ring
            .range(point..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, index)| *index)
            .unwrap_or(0);
        &self.collections[index]
    }

    fn partition_of(&self, document: &Document) -> Result<PartitionKey> {
        match document.get(&self.partition_field) {
            Some(Value::Null) | None => Err(ClientError::PartitionResolution(format!(
                "document '{}' has no '{}' field",
                document.id, self.partition_field
            ))),
            Some(value) => Ok(PartitionKey::from(value.clone())),
        }
    }
}

impl PartitionResolver for HashPartitionResolver {
    fn resolve_for_create(&self, document: &Document) -> Result<String> {
        let partition = self.partition_of(document)?;
        Ok(self.collection_for(&partition.canonical()).to_string())
    }
}

/// Resolvers registered on a client, keyed by database link.
#[derive(Clone, Default)]
pub struct ResolverRegistry {
    resolvers: Arc<RwLock<HashMap<String, Arc<dyn PartitionResolver>>>>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, database_link: &str, resolver: Arc<dyn PartitionResolver>) {
        self.resolvers
            .write()
            .insert(trim_link(database_link).to_string(), resolver);
    }

    pub fn get(&self, database_link: &str) -> Option<Arc<dyn PartitionResolver>> {
        self.resolvers.read().get(trim_link(database_link)).cloned()
    }

    /// Collection link a create against `target` should go to. Collection
    /// links pass through; database links go through their resolver.
    pub fn resolve_target(&self, target: &str, document: &Document) -> Result<String> {
        let path = ResourcePath::parse(target)?;
        match (path.kind(), path.is_feed()) {
            (ResourceKind::Collection, false) => Ok(path.path()),
            (ResourceKind::Database, false) => {
                let resolver = self.get(&path.path()).ok_or_else(|| {
                    ClientError::PartitionResolution(format!(
                        "no partition resolver registered for '{}'",
                        path.path()
                    ))
                })?;
                resolver.resolve_for_create(document)
            }
            _ => Err(ClientError::InvalidLink(target.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn links(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("dbs/a/colls/c{}", i)).collect()
    }

    #[test]
    fn same_partition_always_lands_in_the_same_collection() {
        let resolver = HashPartitionResolver::new("partition", links(3)).unwrap();
        let doc = Document::new().with_field("partition", "partB");
        let first = resolver.resolve_for_create(&doc).unwrap();
        for _ in 0..10 {
            assert_eq!(resolver.resolve_for_create(&doc).unwrap(), first);
        }
        let other = Document::new()
            .with_field("partition", "partB")
            .with_field("data", "a");
        assert_eq!(resolver.resolve_for_create(&other).unwrap(), first);
    }

    #[test]
    fn partitions_spread_over_collections() {
        let resolver = HashPartitionResolver::new("partition", links(4)).unwrap();
        let used: std::collections::HashSet<String> = (0..200)
            .map(|i| {
                let doc = Document::new().with_field("partition", format!("p{}", i));
                resolver.resolve_for_create(&doc).unwrap()
            })
            .collect();
        assert!(used.len() > 1);
    }

    #[test]
    fn missing_partition_field_is_an_error() {
        let resolver = HashPartitionResolver::new("partition", links(1)).unwrap();
        let err = resolver
            .resolve_for_create(&Document::with_id("d"))
            .unwrap_err();
        assert!(matches!(err, ClientError::PartitionResolution(_)));
    }

    #[test]
    fn empty_collection_set_is_rejected() {
        assert!(HashPartitionResolver::new("partition", Vec::new()).is_err());
    }

    #[test]
    fn registry_routes_database_links_through_resolver() {
        let registry = ResolverRegistry::new();
        let doc = Document::new().with_field("partition", "partA");

        assert!(registry.resolve_target("dbs/a", &doc).is_err());
        assert_eq!(
            registry.resolve_target("dbs/a/colls/b/", &doc).unwrap(),
            "dbs/a/colls/b"
        );

        let resolver = HashPartitionResolver::new("partition", links(1)).unwrap();
        registry.register("dbs/a/", Arc::new(resolver));
        assert_eq!(registry.resolve_target("dbs/a", &doc).unwrap(), "dbs/a/colls/c0");
    }
}
