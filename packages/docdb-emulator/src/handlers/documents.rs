//! Document endpoints.

use hyper::{body::Bytes, Response};

use docdb_client::headers;
use docdb_client::{Document, FeedOptions, QuerySpec, ResourceKind};

use crate::router::{AppState, RouterError};

use super::request_utils::{
    build_empty_response, build_feed_response, build_json_response, page, RequestContext,
};
use super::response::feed_body;

/// `POST dbs/{db}/colls/{coll}/docs`: a query when `x-ms-documentdb-isquery`
/// is set, otherwise a create.
pub fn post_documents(
    ctx: &RequestContext,
    state: &AppState,
) -> Result<Response<Bytes>, RouterError> {
    if ctx.flag(headers::IS_QUERY) {
        query_documents(ctx, state)
    } else {
        create_document(ctx, state)
    }
}

fn create_document(ctx: &RequestContext, state: &AppState) -> Result<Response<Bytes>, RouterError> {
    let document: Document = ctx.json()?;
    let partition = ctx.partition_key()?;
    let created = state.emulator.create_document(
        &ctx.principal,
        &ctx.parent_link(),
        document,
        partition.as_ref(),
    )?;
    build_json_response(201, &created)
}

fn query_documents(ctx: &RequestContext, state: &AppState) -> Result<Response<Bytes>, RouterError> {
    let query: QuerySpec = ctx.json()?;
    let options = FeedOptions {
        partition_key: ctx.partition_key()?,
        enable_cross_partition: ctx.flag(headers::ENABLE_CROSS_PARTITION),
        max_item_count: None,
    };
    let documents = state.emulator.query_documents(
        &ctx.principal,
        &ctx.parent_link(),
        &query,
        &options,
    )?;

    let feed = page(ctx, &documents, state.emulator.config().default_page_size)?;
    let rid = ctx
        .resource
        .id_of(ResourceKind::Collection)
        .unwrap_or_default();
    let body = feed_body(ResourceKind::Document, rid, feed.items)
        .map_err(|e| RouterError::InternalError(format!("Failed to serialize feed: {}", e)))?;
    let json = serde_json::to_vec(&body)
        .map_err(|e| RouterError::InternalError(format!("Failed to serialize feed: {}", e)))?;
    build_feed_response(json, feed.continuation)
}

/// `DELETE dbs/{db}/colls/{coll}/docs/{doc}`
pub fn delete_document(
    ctx: &RequestContext,
    state: &AppState,
) -> Result<Response<Bytes>, RouterError> {
    let partition = ctx.partition_key()?;
    state
        .emulator
        .delete_document(&ctx.principal, &ctx.link(), partition.as_ref())?;
    build_empty_response(204)
}
