//! Request utilities for HTTP endpoints.

use http_body_util::BodyExt;
use hyper::header::HeaderMap;
use hyper::{body::Bytes, Method, Request, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time;

use docdb_client::headers;
use docdb_client::{PartitionKey, ResourcePath};

use crate::access::Principal;
use crate::router::RouterError;

/// An authenticated request with its body already read.
pub struct RequestContext {
    pub method: Method,
    pub resource: ResourcePath,
    pub principal: Principal,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RequestContext {
    /// Path without surrounding slashes.
    pub fn link(&self) -> String {
        self.resource.path()
    }

    /// Parent link of a feed request, e.g. the collection of `.../docs`.
    pub fn parent_link(&self) -> String {
        self.resource.resource_link()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn flag(&self, name: &str) -> bool {
        self.header(name)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    pub fn partition_key(&self) -> Result<Option<PartitionKey>, RouterError> {
        match self.header(headers::PARTITION_KEY) {
            None => Ok(None),
            Some(raw) => PartitionKey::from_header(raw).map(Some).ok_or_else(|| {
                RouterError::BadRequest(format!("Malformed partition key header '{}'", raw))
            }),
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, RouterError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| RouterError::BadRequest(format!("Failed to parse JSON body: {}", e)))
    }
}

/// Reads the request body with a timeout.
pub async fn read_request_body_with_timeout(
    req: Request<hyper::body::Incoming>,
    timeout_ms: u64,
) -> Result<Bytes, RouterError> {
    let timeout_duration = time::Duration::from_millis(timeout_ms);
    let body = time::timeout(timeout_duration, req.collect())
        .await
        .map_err(|_| RouterError::Timeout)?
        .map_err(|e| RouterError::InternalError(format!("Failed to read request body: {}", e)))?;
    Ok(body.to_bytes())
}

/// One page of a feed plus the continuation for the next, if any.
pub struct Page<'a, T> {
    pub items: &'a [T],
    pub continuation: Option<String>,
}

/// Slices `items` by the `x-ms-max-item-count` and `x-ms-continuation`
/// headers. Continuations are item offsets.
pub fn page<'a, T>(
    ctx: &RequestContext,
    items: &'a [T],
    default_page_size: usize,
) -> Result<Page<'a, T>, RouterError> {
    let start = match ctx.header(headers::CONTINUATION) {
        None | Some("") => 0,
        Some(raw) => raw.parse::<usize>().map_err(|_| {
            RouterError::BadRequest(format!("Invalid continuation token '{}'", raw))
        })?,
    };
    let size = match ctx.header(headers::MAX_ITEM_COUNT) {
        None => default_page_size,
        Some(raw) => match raw.parse::<i64>() {
            Ok(n) if n > 0 => n as usize,
            Ok(_) => usize::MAX,
            Err(_) => {
                return Err(RouterError::BadRequest(format!(
                    "Invalid max item count '{}'",
                    raw
                )))
            }
        },
    };

    let start = start.min(items.len());
    let end = start.saturating_add(size).min(items.len());
    Ok(Page {
        items: &items[start..end],
        continuation: (end < items.len()).then(|| end.to_string()),
    })
}

pub fn build_response(status: u16, json: Vec<u8>) -> Result<Response<Bytes>, RouterError> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Bytes::from(json))
        .map_err(|e| RouterError::InternalError(format!("Failed to build response: {}", e)))
}

pub fn build_json_response<T: Serialize>(
    status: u16,
    value: &T,
) -> Result<Response<Bytes>, RouterError> {
    let json = serde_json::to_vec(value)
        .map_err(|e| RouterError::InternalError(format!("Failed to serialize response: {}", e)))?;
    build_response(status, json)
}

/// Builds a feed page response, adding `x-ms-continuation` when more remain.
pub fn build_feed_response(
    json: Vec<u8>,
    continuation: Option<String>,
) -> Result<Response<Bytes>, RouterError> {
    let mut builder = Response::builder()
        .status(200)
        .header("Content-Type", "application/json");
    if let Some(token) = continuation {
        builder = builder.header(headers::CONTINUATION, token);
    }
    builder
        .body(Bytes::from(json))
        .map_err(|e| RouterError::InternalError(format!("Failed to build response: {}", e)))
}

/// Empty response for 204 No Content.
pub fn build_empty_response(status: u16) -> Result<Response<Bytes>, RouterError> {
    Response::builder()
        .status(status)
        .body(Bytes::new())
        .map_err(|e| RouterError::InternalError(format!("Failed to build response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(headers: &[(&'static str, &str)]) -> RequestContext {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(*name, value.parse().unwrap());
        }
        RequestContext {
            method: Method::GET,
            resource: ResourcePath::parse("dbs/a/colls/b/docs").unwrap(),
            principal: Principal::Master,
            headers: map,
            body: Bytes::new(),
        }
    }

    #[test]
    fn pages_follow_continuations() {
        let items: Vec<u32> = (0..5).collect();

        let first = page(&ctx(&[(headers::MAX_ITEM_COUNT, "2")]), &items, 100).unwrap();
        assert_eq!(first.items, &[0, 1]);
        assert_eq!(first.continuation.as_deref(), Some("2"));

        let last = page(
            &ctx(&[(headers::MAX_ITEM_COUNT, "2"), (headers::CONTINUATION, "4")]),
            &items,
            100,
        )
        .unwrap();
        assert_eq!(last.items, &[4]);
        assert_eq!(last.continuation, None);

        let unlimited = page(&ctx(&[(headers::MAX_ITEM_COUNT, "-1")]), &items, 2).unwrap();
        assert_eq!(unlimited.items.len(), 5);
    }

    #[test]
    fn partition_header_must_be_a_json_array() {
        assert_eq!(
            ctx(&[(headers::PARTITION_KEY, "[\"partB\"]")])
                .partition_key()
                .unwrap(),
            Some(PartitionKey::from("partB"))
        );
        assert!(ctx(&[(headers::PARTITION_KEY, "partB")])
            .partition_key()
            .is_err());
        assert!(ctx(&[(headers::IS_QUERY, "True")]).flag(headers::IS_QUERY));
    }
}
