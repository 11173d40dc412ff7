//! Resource types as they appear on the wire.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::link::trim_link;

/// Service-assigned system properties shared by every resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemProperties {
    #[serde(rename = "_rid", default, skip_serializing_if = "String::is_empty")]
    pub rid: String,
    #[serde(rename = "_self", default, skip_serializing_if = "String::is_empty")]
    pub self_link: String,
    #[serde(rename = "_etag", default, skip_serializing_if = "String::is_empty")]
    pub etag: String,
    /// Last modification time, seconds since the epoch
    #[serde(rename = "_ts", default, skip_serializing_if = "is_zero")]
    pub ts: u64,
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

impl SystemProperties {
    /// The self-link when the service assigned one, otherwise `fallback`.
    pub fn link_or(&self, fallback: String) -> String {
        if self.self_link.is_empty() {
            fallback
        } else {
            trim_link(&self.self_link).to_string()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Database {
    pub id: String,
    #[serde(flatten)]
    pub system: SystemProperties,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionKeyDefinition {
    pub paths: Vec<String>,
    #[serde(default = "default_partition_kind")]
    pub kind: String,
}

fn default_partition_kind() -> String {
    "Hash".to_string()
}

impl PartitionKeyDefinition {
    /// Hash partitioning on a single path such as `/partition`.
    pub fn hash(path: &str) -> Self {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        Self {
            paths: vec![path],
            kind: default_partition_kind(),
        }
    }

    /// Top-level document field named by the first path.
    pub fn field(&self) -> Option<&str> {
        self.paths.first().map(|p| p.trim_start_matches('/'))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    #[serde(
        rename = "partitionKey",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub partition_key: Option<PartitionKeyDefinition>,
    #[serde(flatten)]
    pub system: SystemProperties,
}

/// An arbitrary JSON document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Empty until assigned; clients generate one on create
    #[serde(default)]
    pub id: String,
    #[serde(flatten)]
    pub system: SystemProperties,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredProcedure {
    pub id: String,
    /// Script source executed inside the service
    pub body: String,
    #[serde(flatten)]
    pub system: SystemProperties,
}

impl StoredProcedure {
    pub fn new(id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
            system: SystemProperties::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(rename = "_permissions", default, skip_serializing_if = "String::is_empty")]
    pub permissions_link: String,
    #[serde(flatten)]
    pub system: SystemProperties,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionMode {
    All,
    Read,
}

/// A grant of `mode` on `resource` to a user, optionally limited to one
/// partition key value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    pub id: String,
    #[serde(rename = "permissionMode")]
    pub mode: PermissionMode,
    /// Link of the granted resource
    pub resource: String,
    #[serde(
        rename = "resourcePartitionKey",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub resource_partition_key: Option<Vec<Value>>,
    /// Resource token issued by the service
    #[serde(rename = "_token", default, skip_serializing_if = "String::is_empty")]
    pub token: String,
    #[serde(flatten)]
    pub system: SystemProperties,
}

impl Permission {
    pub fn new(id: impl Into<String>, mode: PermissionMode, resource: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            mode,
            resource: resource.into(),
            resource_partition_key: None,
            token: String::new(),
            system: SystemProperties::default(),
        }
    }

    pub fn with_partition(mut self, partition: &PartitionKey) -> Self {
        self.resource_partition_key = Some(vec![partition.value().clone()]);
        self
    }

    /// Body for a create or replace request: the definition without the
    /// service-assigned token and system properties.
    pub fn definition(&self) -> Permission {
        Permission {
            token: String::new(),
            system: SystemProperties::default(),
            ..self.clone()
        }
    }

    /// Partition value this permission is limited to, if any.
    pub fn scoped_partition(&self) -> Option<PartitionKey> {
        self.resource_partition_key
            .as_ref()
            .and_then(|keys| keys.first())
            .map(|value| PartitionKey::from(value.clone()))
    }
}

/// A single-path partition key value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionKey(Value);

impl PartitionKey {
    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Value of the `x-ms-documentdb-partitionkey` header: a JSON array.
    pub fn header_value(&self) -> String {
        Value::Array(vec![self.0.clone()]).to_string()
    }

    /// Parses a header value produced by [`PartitionKey::header_value`].
    pub fn from_header(header: &str) -> Option<Self> {
        match serde_json::from_str::<Value>(header).ok()? {
            Value::Array(mut values) if values.len() == 1 => Some(Self(values.remove(0))),
            _ => None,
        }
    }

    /// Text form used for hashing and map keys.
    pub fn canonical(&self) -> String {
        match &self.0 {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl std::fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl From<&str> for PartitionKey {
    fn from(value: &str) -> Self {
        Self(Value::String(value.to_string()))
    }
}

impl From<String> for PartitionKey {
    fn from(value: String) -> Self {
        Self(Value::String(value))
    }
}

impl From<Value> for PartitionKey {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryParameter {
    pub name: String,
    pub value: Value,
}

/// A SQL query with named parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub query: String,
    #[serde(default)]
    pub parameters: Vec<QueryParameter>,
}

impl QuerySpec {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.push(QueryParameter {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.value)
    }
}

impl From<&str> for QuerySpec {
    fn from(query: &str) -> Self {
        Self::new(query)
    }
}

/// Options for document queries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedOptions {
    /// Restrict the query to one partition
    pub partition_key: Option<PartitionKey>,
    /// Allow the query to fan out across all partitions
    pub enable_cross_partition: bool,
    /// Page size requested from the service
    pub max_item_count: Option<u32>,
}

impl FeedOptions {
    pub fn partition(partition: impl Into<PartitionKey>) -> Self {
        Self {
            partition_key: Some(partition.into()),
            ..Self::default()
        }
    }

    pub fn cross_partition() -> Self {
        Self {
            enable_cross_partition: true,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn document_keeps_system_properties_out_of_fields() {
        let doc: Document = serde_json::from_value(json!({
            "id": "d1",
            "partition": "partA",
            "data": "dataa",
            "_rid": "r1",
            "_self": "dbs/a/colls/b/docs/d1/",
            "_etag": "\"e\"",
            "_ts": 1700000000
        }))
        .unwrap();

        assert_eq!(doc.id, "d1");
        assert_eq!(doc.system.ts, 1_700_000_000);
        assert_eq!(doc.system.link_or(String::new()), "dbs/a/colls/b/docs/d1");
        assert_eq!(doc.get("partition"), Some(&json!("partA")));
        assert!(!doc.fields.contains_key("_rid"));
        assert!(!doc.fields.contains_key("id"));
    }

    #[test]
    fn permission_definition_drops_service_fields() {
        let mut permission = Permission::new("p", PermissionMode::All, "dbs/a/colls/b")
            .with_partition(&PartitionKey::from("partB"));
        permission.token = "type=resource&ver=1&sig=x".to_string();
        permission.system.ts = 5;

        let body = serde_json::to_value(permission.definition()).unwrap();
        assert_eq!(
            body,
            json!({
                "id": "p",
                "permissionMode": "All",
                "resource": "dbs/a/colls/b",
                "resourcePartitionKey": ["partB"]
            })
        );
        assert_eq!(
            permission.scoped_partition(),
            Some(PartitionKey::from("partB"))
        );
    }

    #[test]
    fn partition_key_header_round_trips() {
        let key = PartitionKey::from("partA");
        assert_eq!(key.header_value(), "[\"partA\"]");
        assert_eq!(PartitionKey::from_header("[\"partA\"]"), Some(key));
        assert_eq!(PartitionKey::from_header("\"partA\""), None);
    }

    #[test]
    fn partition_definition_field() {
        let def = PartitionKeyDefinition::hash("partition");
        assert_eq!(def.paths, vec!["/partition".to_string()]);
        assert_eq!(def.field(), Some("partition"));
    }
}
