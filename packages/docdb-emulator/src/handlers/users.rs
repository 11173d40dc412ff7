//! User and permission endpoints.

use hyper::{body::Bytes, Response};
use serde::Deserialize;

use docdb_client::{Permission, ResourceKind};

use crate::router::{AppState, RouterError};

use super::request_utils::{
    build_empty_response, build_feed_response, build_json_response, page, RequestContext,
};
use super::response::feed_body;

#[derive(Debug, Deserialize)]
struct UserDefinition {
    id: String,
}

/// `POST dbs/{db}/users`
pub fn create_user(ctx: &RequestContext, state: &AppState) -> Result<Response<Bytes>, RouterError> {
    let definition: UserDefinition = ctx.json()?;
    let user = state
        .emulator
        .create_user(&ctx.principal, &ctx.parent_link(), &definition.id)?;
    build_json_response(201, &user)
}

/// `GET dbs/{db}/users/{user}`
pub fn read_user(ctx: &RequestContext, state: &AppState) -> Result<Response<Bytes>, RouterError> {
    let user = state.emulator.read_user(&ctx.principal, &ctx.link())?;
    build_json_response(200, &user)
}

/// `DELETE dbs/{db}/users/{user}`
pub fn delete_user(ctx: &RequestContext, state: &AppState) -> Result<Response<Bytes>, RouterError> {
    state.emulator.delete_user(&ctx.principal, &ctx.link())?;
    build_empty_response(204)
}

/// `GET dbs/{db}/users/{user}/permissions`
pub fn list_permissions(
    ctx: &RequestContext,
    state: &AppState,
) -> Result<Response<Bytes>, RouterError> {
    let permissions = state
        .emulator
        .list_permissions(&ctx.principal, &ctx.parent_link())?;
    let feed = page(ctx, &permissions, state.emulator.config().default_page_size)?;
    let rid = ctx.resource.id_of(ResourceKind::User).unwrap_or_default();
    let body = feed_body(ResourceKind::Permission, rid, feed.items)
        .map_err(|e| RouterError::InternalError(format!("Failed to serialize feed: {}", e)))?;
    let json = serde_json::to_vec(&body)
        .map_err(|e| RouterError::InternalError(format!("Failed to serialize feed: {}", e)))?;
    build_feed_response(json, feed.continuation)
}

/// `POST dbs/{db}/users/{user}/permissions`
pub fn create_permission(
    ctx: &RequestContext,
    state: &AppState,
) -> Result<Response<Bytes>, RouterError> {
    let definition: Permission = ctx.json()?;
    let partition = ctx.partition_key()?;
    let permission = state.emulator.create_permission(
        &ctx.principal,
        &ctx.parent_link(),
        &definition,
        partition.as_ref(),
    )?;
    build_json_response(201, &permission)
}

/// `PUT dbs/{db}/users/{user}/permissions/{permission}`
pub fn replace_permission(
    ctx: &RequestContext,
    state: &AppState,
) -> Result<Response<Bytes>, RouterError> {
    let definition: Permission = ctx.json()?;
    let partition = ctx.partition_key()?;
    let permission = state.emulator.replace_permission(
        &ctx.principal,
        &ctx.link(),
        &definition,
        partition.as_ref(),
    )?;
    build_json_response(200, &permission)
}

/// `DELETE dbs/{db}/users/{user}/permissions/{permission}`
pub fn delete_permission(
    ctx: &RequestContext,
    state: &AppState,
) -> Result<Response<Bytes>, RouterError> {
    state
        .emulator
        .delete_permission(&ctx.principal, &ctx.link())?;
    build_empty_response(204)
}
