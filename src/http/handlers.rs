use bytes::Bytes;
use http_body_util::{BodyExt, Limited, StreamBody};
use hyper::{body::Frame, header, HeaderMap, Method, StatusCode};
use juniper::{http::GraphQLBatchRequest, InputValue, Variables};
use serde::de::DeserializeOwned;
use std::{
    convert::Infallible,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{mpsc, oneshot};

use crate::{api, prelude::*};
use super::{Context, Request, Response, log, response};


/// Interval of comment lines sent on idle subscription streams, so that
/// proxies do not close the connection.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// This is the main HTTP entry point, called for each incoming request.
pub(super) async fn handle(req: Request, ctx: Arc<Context>) -> Response {
    log::req::log(&req);
    log::headers::log(&req);

    let method = req.method().clone();
    let path = req.uri().path().trim_end_matches('/');

    match path {
        "/graphql" if method == Method::POST => handle_api(req, &ctx).await,
        "/graphql/stream" if method == Method::POST => handle_subscription(req, ctx).await,
        "/graphql" | "/graphql/stream" => response::method_not_allowed(),

        // The interactive GraphQL API explorer/IDE. It does not expose
        // anything the API itself doesn't expose.
        "/~graphiql" if method == Method::GET || method == Method::HEAD => {
            response::html(juniper::http::graphiql::graphiql_source("/graphql", None))
        }

        path => {
            debug!("Responding with 404 to {method:?} '{path}'");
            response::not_found()
        }
    }
}

/// Handles a request to `/graphql`: a single query or a batch of them.
async fn handle_api(req: Request, ctx: &Context) -> Response {
    let before = Instant::now();
    let headers = req.headers().clone();

    let request = match read_json::<GraphQLBatchRequest>(req, ctx.max_body_size).await {
        Ok(request) => request,
        Err(response) => return response,
    };

    let api_context = api_context(ctx, headers);
    let response = request.execute(&*ctx.api_root, &api_context).await;
    let status = if response.is_ok() { StatusCode::OK } else { StatusCode::BAD_REQUEST };

    debug!("Finished /graphql request in {:.2?}", before.elapsed());
    response::json(status, &response)
}

/// A GraphQL request with a subscription operation. Same JSON shape as for
/// `/graphql`, but batches are not supported.
#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionRequest {
    query: String,
    operation_name: Option<String>,
    #[serde(default)]
    variables: Option<InputValue>,
}

impl SubscriptionRequest {
    fn variables(&self) -> Variables {
        self.variables.as_ref()
            .and_then(|v| v.to_object_value())
            .map(|o| o.into_iter().map(|(k, v)| (k.to_owned(), v.clone())).collect())
            .unwrap_or_default()
    }
}

/// Handles a request to `/graphql/stream`. If the subscription resolves, the
/// response is an event stream (`text/event-stream`) with one GraphQL
/// response per event. Otherwise the errors are returned as normal JSON
/// response.
async fn handle_subscription(req: Request, ctx: Arc<Context>) -> Response {
    let headers = req.headers().clone();
    let request = match read_json::<SubscriptionRequest>(req, ctx.max_body_size).await {
        Ok(request) => request,
        Err(response) => return response,
    };

    // The streams juniper gives us borrow the root node, context and
    // variables, so resolving and forwarding happen on a separate task that
    // owns all of these. It reports the outcome of resolving through `ready`.
    let (ready_tx, ready_rx) = oneshot::channel();
    let (events_tx, events_rx) = mpsc::channel::<Bytes>(16);
    tokio::spawn(async move {
        let api_context = api_context(&ctx, headers);
        let variables = request.variables();
        let resolved = juniper::resolve_into_stream(
            &request.query,
            request.operation_name.as_deref(),
            &*ctx.api_root,
            &variables,
            &api_context,
        ).await;

        let stream = match resolved {
            Ok((value, errors)) if errors.is_empty() => {
                let _ = ready_tx.send(Ok(()));
                api::subscription_responses(value)
            }
            Ok((_, errors)) => {
                let json = serde_json::json!({ "data": null, "errors": errors });
                let _ = ready_tx.send(Err(response::json(StatusCode::OK, &json)));
                return;
            }
            Err(e) => {
                let json = serde_json::json!({ "errors": [e] });
                let _ = ready_tx.send(Err(response::json(StatusCode::BAD_REQUEST, &json)));
                return;
            }
        };

        debug!("Subscription started");
        forward_events(stream, events_tx).await;
        debug!("Subscription ended");
    });

    match ready_rx.await {
        Ok(Ok(())) => {}
        Ok(Err(response)) => return response,
        Err(_) => {
            error!("Subscription task ended without reporting whether it started");
            return response::internal_server_error();
        }
    }

    let frames = futures::stream::unfold(events_rx, |mut rx| async move {
        let bytes = rx.recv().await?;
        Some((Ok::<_, Infallible>(Frame::data(bytes)), rx))
    });

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(StreamBody::new(frames).boxed_unsync())
        .expect("bug: invalid response")
}

/// Writes every item of `stream` as server-sent event into `sink` until
/// either the stream ends or the client goes away.
async fn forward_events(
    mut stream: impl futures::Stream<Item = serde_json::Value> + Unpin,
    sink: mpsc::Sender<Bytes>,
) {
    let mut keep_alive = tokio::time::interval(KEEP_ALIVE_INTERVAL);
    keep_alive.tick().await;

    loop {
        let chunk = tokio::select! {
            event = stream.next() => match event {
                Some(event) => Bytes::from(format!("data: {event}\n\n")),
                None => return,
            },
            _ = keep_alive.tick() => Bytes::from_static(b":\n\n"),
        };

        if sink.send(chunk).await.is_err() {
            trace!("Subscription client disconnected");
            return;
        }
    }
}

fn api_context(ctx: &Context, headers: HeaderMap) -> api::Context {
    api::Context {
        store: Arc::clone(&ctx.store),
        auth: Arc::clone(&ctx.auth),
        headers,
    }
}

/// Reads the whole body (at most `limit` bytes) and deserializes it as JSON.
async fn read_json<T: DeserializeOwned>(req: Request, limit: usize) -> Result<T, Response> {
    if let Some(content_type) = req.headers().get(header::CONTENT_TYPE) {
        if !content_type.as_bytes().starts_with(b"application/json") {
            return Err(response::bad_request("Content-Type must be 'application/json'"));
        }
    }

    let body = match Limited::new(req.into_body(), limit).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.is::<http_body_util::LengthLimitError>() => {
            return Err(response::payload_too_large());
        }
        Err(e) => {
            debug!("Failed to read request body: {e}");
            return Err(response::bad_request("Failed to read request body"));
        }
    };

    serde_json::from_slice(&body).map_err(|e| {
        debug!("Request body is not a valid GraphQL request: {e}");
        response::bad_request("Invalid GraphQL request")
    })
}
