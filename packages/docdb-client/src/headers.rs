//! Header names used by the REST wire protocol.

pub const AUTHORIZATION: &str = "authorization";
pub const DATE: &str = "x-ms-date";
pub const VERSION: &str = "x-ms-version";
pub const PARTITION_KEY: &str = "x-ms-documentdb-partitionkey";
pub const IS_QUERY: &str = "x-ms-documentdb-isquery";
pub const ENABLE_CROSS_PARTITION: &str = "x-ms-documentdb-query-enablecrosspartition";
pub const MAX_ITEM_COUNT: &str = "x-ms-max-item-count";
pub const CONTINUATION: &str = "x-ms-continuation";

pub const QUERY_CONTENT_TYPE: &str = "application/query+json";
pub const API_VERSION: &str = "2017-02-22";
