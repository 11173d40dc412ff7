//! Matchit routing configuration.

use std::sync::Arc;

use hyper::{body::Bytes, Method, Request, Response};
use matchit::Router as MatchitRouter;
use percent_encoding::percent_decode_str;
use tracing::debug;

use docdb_client::{headers, ResourcePath};

use crate::emulator::Emulator;
use crate::error::EmulatorError;
use crate::handlers::{self, request_utils::read_request_body_with_timeout, RequestContext};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub emulator: Arc<Emulator>,
}

/// HTTP request router.
pub struct Router {
    inner: MatchitRouter<RouteHandler>,
    state: AppState,
}

const ROUTES: &[(&str, RouteHandler)] = &[
    ("/dbs/{db}", RouteHandler::Database),
    ("/dbs/{db}/colls/{coll}", RouteHandler::Collection),
    ("/dbs/{db}/colls/{coll}/docs", RouteHandler::Documents),
    ("/dbs/{db}/colls/{coll}/docs/{doc}", RouteHandler::Document),
    ("/dbs/{db}/colls/{coll}/sprocs", RouteHandler::Procedures),
    ("/dbs/{db}/colls/{coll}/sprocs/{sproc}", RouteHandler::Procedure),
    ("/dbs/{db}/users", RouteHandler::Users),
    ("/dbs/{db}/users/{user}", RouteHandler::User),
    ("/dbs/{db}/users/{user}/permissions", RouteHandler::Permissions),
    (
        "/dbs/{db}/users/{user}/permissions/{permission}",
        RouteHandler::Permission,
    ),
];

impl Router {
    pub fn new(emulator: Arc<Emulator>) -> Self {
        let mut router = MatchitRouter::new();
        for (path, handler) in ROUTES {
            // Static route table with distinct patterns
            router
                .insert(*path, *handler)
                .expect("Failed to insert route");
        }

        Self {
            inner: router,
            state: AppState { emulator },
        }
    }

    /// Authenticates the request, reads its body and dispatches it.
    pub async fn route(
        &self,
        req: Request<hyper::body::Incoming>,
    ) -> Result<Response<Bytes>, RouterError> {
        let raw_path = req.uri().path().to_string();
        let decoded = percent_decode_str(&raw_path).decode_utf8_lossy();
        let path = format!("/{}", decoded.trim_matches('/'));

        let handler = match self.inner.at(&path) {
            Ok(matched) => *matched.value,
            Err(_) => {
                return Err(RouterError::NotFound(format!(
                    "No route found for {}",
                    raw_path
                )))
            }
        };

        let resource =
            ResourcePath::parse(&path).map_err(|e| RouterError::BadRequest(e.to_string()))?;
        let method = req.method().clone();
        let headers = req.headers().clone();
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

        let principal = self.state.emulator.authenticate(
            header(headers::AUTHORIZATION),
            method.as_str(),
            &resource,
            header(headers::DATE),
        )?;
        debug!(method = %method, path = %path, master = principal.is_master(), "handling request");

        let body = read_request_body_with_timeout(
            req,
            self.state.emulator.config().request_timeout_ms,
        )
        .await?;

        let ctx = RequestContext {
            method,
            resource,
            principal,
            headers,
            body,
        };
        handler.handle(&ctx, &self.state)
    }
}

/// Route handler function.
#[derive(Debug, Clone, Copy)]
enum RouteHandler {
    Database,
    Collection,
    Documents,
    Document,
    Procedures,
    Procedure,
    Users,
    User,
    Permissions,
    Permission,
}

impl RouteHandler {
    fn handle(
        &self,
        ctx: &RequestContext,
        state: &AppState,
    ) -> Result<Response<Bytes>, RouterError> {
        let method = &ctx.method;
        match self {
            RouteHandler::Database if method == Method::GET => handlers::read_database(ctx, state),
            RouteHandler::Collection if method == Method::GET => {
                handlers::read_collection(ctx, state)
            }
            RouteHandler::Documents if method == Method::POST => {
                handlers::post_documents(ctx, state)
            }
            RouteHandler::Document if method == Method::DELETE => {
                handlers::delete_document(ctx, state)
            }
            RouteHandler::Procedures if method == Method::POST => {
                handlers::create_procedure(ctx, state)
            }
            RouteHandler::Procedure if method == Method::GET => {
                handlers::read_procedure(ctx, state)
            }
            RouteHandler::Procedure if method == Method::POST => {
                handlers::execute_procedure(ctx, state)
            }
            RouteHandler::Procedure if method == Method::DELETE => {
                handlers::delete_procedure(ctx, state)
            }
            RouteHandler::Users if method == Method::POST => handlers::create_user(ctx, state),
            RouteHandler::User if method == Method::GET => handlers::read_user(ctx, state),
            RouteHandler::User if method == Method::DELETE => handlers::delete_user(ctx, state),
            RouteHandler::Permissions if method == Method::GET => {
                handlers::list_permissions(ctx, state)
            }
            RouteHandler::Permissions if method == Method::POST => {
                handlers::create_permission(ctx, state)
            }
            RouteHandler::Permission if method == Method::PUT => {
                handlers::replace_permission(ctx, state)
            }
            RouteHandler::Permission if method == Method::DELETE => {
                handlers::delete_permission(ctx, state)
            }
            _ => Err(RouterError::MethodNotAllowed),
        }
    }
}

/// Router error type.
#[derive(Debug)]
pub enum RouterError {
    MethodNotAllowed,
    InternalError(String),
    Timeout,
    BadRequest(String),
    NotFound(String),
    Service(EmulatorError),
}

impl std::fmt::Display for RouterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouterError::MethodNotAllowed => write!(f, "Method Not Allowed"),
            RouterError::InternalError(msg) => write!(f, "Internal Error: {}", msg),
            RouterError::Timeout => write!(f, "Request Timeout"),
            RouterError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            RouterError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            RouterError::Service(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for RouterError {}

impl From<EmulatorError> for RouterError {
    fn from(err: EmulatorError) -> Self {
        RouterError::Service(err)
    }
}

impl RouterError {
    fn status_and_code(&self) -> (u16, &'static str) {
        match self {
            RouterError::MethodNotAllowed => (405, "MethodNotAllowed"),
            RouterError::InternalError(_) => (500, "InternalServerError"),
            RouterError::Timeout => (408, "RequestTimeout"),
            RouterError::BadRequest(_) => (400, "BadRequest"),
            RouterError::NotFound(_) => (404, "NotFound"),
            RouterError::Service(err) => (err.status(), err.code()),
        }
    }
}

impl From<RouterError> for Response<Bytes> {
    fn from(err: RouterError) -> Self {
        let (status, code) = err.status_and_code();
        let message = match &err {
            RouterError::InternalError(msg)
            | RouterError::BadRequest(msg)
            | RouterError::NotFound(msg) => msg.clone(),
            other => other.to_string(),
        };

        let body = serde_json::to_vec(&handlers::error_body(code, message)).unwrap_or_else(|e| {
            format!(
                "{{\"code\":\"InternalServerError\",\"message\":\"Failed to serialize error: {}\"}}",
                e
            )
            .into_bytes()
        });

        Response::builder()
            .status(status)
            .header("Content-Type", "application/json")
            .body(Bytes::from(body))
            .unwrap_or_else(|_| {
                let mut fallback = Response::new(Bytes::from("Internal Server Error"));
                *fallback.status_mut() = hyper::StatusCode::INTERNAL_SERVER_ERROR;
                fallback
            })
    }
}
