//! Response bodies.

use serde::Serialize;
use serde_json::{Map, Value};

use docdb_client::ResourceKind;

/// Error body returned for every non-success status.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

pub fn error_body(code: &str, message: String) -> ErrorBody {
    ErrorBody {
        code: code.to_string(),
        message,
    }
}

/// Feed body: `{"_rid": ..., "<FeedKey>": [...], "_count": n}`.
pub fn feed_body<T: Serialize>(
    kind: ResourceKind,
    rid: &str,
    items: &[T],
) -> Result<Value, serde_json::Error> {
    let mut body = Map::new();
    body.insert("_rid".to_string(), Value::String(rid.to_string()));
    body.insert(kind.feed_key().to_string(), serde_json::to_value(items)?);
    body.insert("_count".to_string(), Value::from(items.len()));
    Ok(Value::Object(body))
}
