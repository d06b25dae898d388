//! The HTTP server, handler and routes.
//!
//! This file itself contains fairly little business logic and just sets up the
//! `hyper` server and catches errors. The main logic is in `handlers.rs`.

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use hyper::{body::Incoming, service::service_fn};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto,
};
use std::{
    convert::Infallible,
    fs,
    future::Future,
    net::{IpAddr, SocketAddr},
    os::unix::fs::PermissionsExt,
    panic::AssertUnwindSafe,
    path::PathBuf,
    sync::Arc,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, UnixListener},
};

use crate::{api, auth::AuthService, prelude::*, store::Store};
use self::{
    handlers::handle,
    response::internal_server_error,
};


mod handlers;
mod log;
mod response;


/// HTTP server configuration.
#[derive(Debug, Clone, confique::Config)]
pub(crate) struct HttpConfig {
    /// The TCP port the HTTP server should listen on.
    #[config(default = 3080)]
    pub(crate) port: u16,

    /// The bind address to listen on.
    #[config(default = "127.0.0.1")]
    pub(crate) address: IpAddr,

    /// Unix domain socket to listen on. Specifying this will overwrite
    /// the TCP configuration. Example: "/tmp/linkboard.socket".
    pub(crate) unix_socket: Option<PathBuf>,

    /// Unix domain socket file permissions.
    #[config(default = 0o755)]
    pub(crate) unix_socket_permissions: u32,

    /// Maximum size of a request body in bytes. Larger requests are rejected
    /// with 413.
    #[config(default = 65536)]
    pub(crate) max_body_size: usize,
}


/// Body of all our responses. Either a complete buffer or, for
/// subscriptions, a stream of frames.
pub(crate) type Body = UnsyncBoxBody<Bytes, Infallible>;

type Response<T = Body> = hyper::Response<T>;
type Request<T = Incoming> = hyper::Request<T>;


/// Context that the request handler has access to.
struct Context {
    api_root: Arc<api::RootNode>,
    store: Arc<dyn Store>,
    auth: Arc<AuthService>,
    max_body_size: usize,
}


/// Starts the HTTP server. The future returned by this function must be awaited
/// to actually run it. Only returns if binding the socket fails.
pub(crate) async fn serve(
    config: &HttpConfig,
    api_root: api::RootNode,
    store: Arc<dyn Store>,
    auth: Arc<AuthService>,
) -> Result<()> {
    let ctx = Arc::new(Context {
        api_root: Arc::new(api_root),
        store,
        auth,
        max_body_size: config.max_body_size,
    });

    if let Some(unix_socket) = &config.unix_socket {
        if unix_socket.exists() {
            fs::remove_file(unix_socket)?;
        }
        let listener = UnixListener::bind(unix_socket)
            .with_context(|| format!("failed to bind to '{}'", unix_socket.display()))?;
        let permissions = fs::Permissions::from_mode(config.unix_socket_permissions);
        fs::set_permissions(unix_socket, permissions)?;
        info!("Listening on unix://{}", unix_socket.display());

        loop {
            match listener.accept().await {
                Ok((stream, _)) => spawn_connection(stream, Arc::clone(&ctx)),
                Err(e) => warn!("Failed to accept connection: {e}"),
            }
        }
    } else {
        let addr = SocketAddr::new(config.address, config.port);
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind to {addr}"))?;
        info!("Listening on http://{}", listener.local_addr()?);

        loop {
            match listener.accept().await {
                Ok((stream, _)) => spawn_connection(stream, Arc::clone(&ctx)),
                Err(e) => warn!("Failed to accept connection: {e}"),
            }
        }
    }
}

/// Serves a single connection (HTTP/1 or HTTP/2) on its own task.
fn spawn_connection<S>(stream: S, ctx: Arc<Context>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let service = service_fn(move |req| {
            handle_internal_errors(handle(req, Arc::clone(&ctx)))
        });

        let result = auto::Builder::new(TokioExecutor::new())
            .serve_connection(TokioIo::new(stream), service)
            .await;
        if let Err(e) = result {
            debug!("Error while serving HTTP connection: {e}");
        }
    });
}

/// This just wraps another future and catches all panics that might occur when
/// resolving/polling that given future. This ensures that we always answer with
/// `500` instead of just crashing the task and closing the connection.
async fn handle_internal_errors(
    future: impl Future<Output = Response>,
) -> Result<Response, Infallible> {
    // Our handlers do not leave shared state in a broken state when they
    // panic, so continuing is fine.
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(response) => Ok(response),
        Err(panic) => {
            // For most panics (which use `panic!` like `println!`), this is
            // either `&str` or `String`.
            let msg = panic.downcast_ref::<String>()
                .map(|s| s.as_str())
                .or(panic.downcast_ref::<&str>().copied());

            match msg {
                Some(msg) => error!("INTERNAL SERVER ERROR: HTTP handler panicked: '{msg}'"),
                None => error!("INTERNAL SERVER ERROR: HTTP handler panicked"),
            }

            Ok(internal_server_error())
        }
    }
}
