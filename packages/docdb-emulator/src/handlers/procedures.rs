//! Stored procedure endpoints.

use hyper::{body::Bytes, Response};
use serde::Deserialize;
use serde_json::Value;

use docdb_client::StoredProcedure;

use crate::router::{AppState, RouterError};

use super::request_utils::{build_empty_response, build_json_response, RequestContext};

#[derive(Debug, Deserialize)]
struct ProcedureDefinition {
    id: String,
    body: String,
}

/// `POST dbs/{db}/colls/{coll}/sprocs`
pub fn create_procedure(
    ctx: &RequestContext,
    state: &AppState,
) -> Result<Response<Bytes>, RouterError> {
    let definition: ProcedureDefinition = ctx.json()?;
    let created = state.emulator.create_stored_procedure(
        &ctx.principal,
        &ctx.parent_link(),
        &StoredProcedure::new(definition.id, definition.body),
    )?;
    build_json_response(201, &created)
}

/// `GET dbs/{db}/colls/{coll}/sprocs/{sproc}`
pub fn read_procedure(
    ctx: &RequestContext,
    state: &AppState,
) -> Result<Response<Bytes>, RouterError> {
    let procedure = state
        .emulator
        .read_stored_procedure(&ctx.principal, &ctx.link())?;
    build_json_response(200, &procedure)
}

/// `DELETE dbs/{db}/colls/{coll}/sprocs/{sproc}`
pub fn delete_procedure(
    ctx: &RequestContext,
    state: &AppState,
) -> Result<Response<Bytes>, RouterError> {
    state
        .emulator
        .delete_stored_procedure(&ctx.principal, &ctx.link())?;
    build_empty_response(204)
}

/// `POST dbs/{db}/colls/{coll}/sprocs/{sproc}` with a JSON array of
/// positional parameters.
pub fn execute_procedure(
    ctx: &RequestContext,
    state: &AppState,
) -> Result<Response<Bytes>, RouterError> {
    let params: Vec<Value> = if ctx.body.is_empty() {
        Vec::new()
    } else {
        match ctx.json::<Value>()? {
            Value::Array(params) => params,
            single => vec![single],
        }
    };
    let partition = ctx.partition_key()?;
    let result = state.emulator.execute_stored_procedure(
        &ctx.principal,
        &ctx.link(),
        &params,
        partition.as_ref(),
    )?;
    build_json_response(200, &result)
}
