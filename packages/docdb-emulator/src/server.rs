//! Accept loop for the emulator's REST front end.
//!
//! Each connection runs on its own task. Router errors are turned into the
//! service's `{"code","message"}` error responses, so a connection never sees
//! a hyper-level failure for a rejected request.

use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming as IncomingBody};
use hyper::{Request, Response, Result as HyperResult};
use hyper_util::rt::TokioExecutor;
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto::Builder as ConnectionBuilder;
use tokio::net::TcpListener;
use tracing::{debug, error};

use crate::router::Router;

/// Listens on one address and hands every request to a shared [`Router`].
pub struct Server {
    addr: SocketAddr,
    router: Arc<Router>,
}

impl Server {
    pub fn new(addr: SocketAddr, router: Router) -> Self {
        Self {
            addr,
            router: Arc::new(router),
        }
    }

    /// Binds `addr` and accepts connections until the task is dropped.
    pub async fn serve(self) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(self.addr).await?;
        println!("Emulator listening on http://{}", listener.local_addr()?);
        self.serve_on(listener).await
    }

    /// Like [`Server::serve`], but on a listener bound by the caller, e.g. on port 0.
    pub async fn serve_on(self, listener: TcpListener) -> Result<(), std::io::Error> {
        loop {
            let (stream, peer) = listener.accept().await?;
            debug!(%peer, "accepted connection");
            let io = TokioIo::new(stream);
            let router = Arc::clone(&self.router);

            tokio::task::spawn(async move {
                let builder = ConnectionBuilder::new(TokioExecutor::new());
                if let Err(err) = builder
                    .serve_connection(
                        io,
                        hyper::service::service_fn(move |req| handle_request(req, router.clone())),
                    )
                    .await
                {
                    error!("Error serving connection: {}", err);
                }
            });
        }
    }
}

async fn handle_request(
    req: Request<IncomingBody>,
    router: Arc<Router>,
) -> HyperResult<Response<Full<Bytes>>> {
    match router.route(req).await {
        Ok(response) => Ok(response.map(Full::new)),
        Err(err) => {
            debug!("Request failed: {}", err);
            Ok(Response::<Bytes>::from(err).map(Full::new))
        }
    }
}
