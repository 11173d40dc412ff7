//! HTTP endpoint implementations.

pub mod documents;
pub mod procedures;
pub mod request_utils;
pub mod response;
pub mod users;

use hyper::{body::Bytes, Response};

use crate::router::{AppState, RouterError};

pub use documents::{delete_document, post_documents};
pub use procedures::{create_procedure, delete_procedure, execute_procedure, read_procedure};
pub use request_utils::RequestContext;
pub use response::{error_body, ErrorBody};
pub use users::{
    create_permission, create_user, delete_permission, delete_user, list_permissions,
    read_user, replace_permission,
};

use request_utils::build_json_response;

/// `GET dbs/{db}`
pub fn read_database(ctx: &RequestContext, state: &AppState) -> Result<Response<Bytes>, RouterError> {
    let database = state.emulator.read_database(&ctx.principal, &ctx.link())?;
    build_json_response(200, &database)
}

/// `GET dbs/{db}/colls/{coll}`
pub fn read_collection(
    ctx: &RequestContext,
    state: &AppState,
) -> Result<Response<Bytes>, RouterError> {
    let collection = state.emulator.read_collection(&ctx.principal, &ctx.link())?;
    build_json_response(200, &collection)
}
