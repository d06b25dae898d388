use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{header, StatusCode};

use crate::prelude::*;
use super::{Body, Response};


pub(crate) fn full(body: impl Into<Bytes>) -> Body {
    Full::new(body.into()).map_err(|never| match never {}).boxed_unsync()
}

fn plain(status: StatusCode, msg: &'static str) -> Response {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain; charset=UTF-8")
        .body(full(msg))
        .expect("bug: invalid response")
}

/// Serializes `value` as JSON. Answers 500 if that fails.
pub(crate) fn json(status: StatusCode, value: &impl serde::Serialize) -> Response {
    match serde_json::to_vec(value) {
        Ok(body) => Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json")
            .body(full(body))
            .expect("bug: invalid response"),
        Err(e) => {
            error!("Failed to serialize JSON response: {e}");
            internal_server_error()
        }
    }
}

pub(crate) fn html(body: String) -> Response {
    Response::builder()
        .header(header::CONTENT_TYPE, "text/html; charset=UTF-8")
        .body(full(body))
        .expect("bug: invalid response")
}

pub(crate) fn bad_request(msg: &'static str) -> Response {
    plain(StatusCode::BAD_REQUEST, msg)
}

pub(crate) fn not_found() -> Response {
    plain(StatusCode::NOT_FOUND, "404 Not found")
}

pub(crate) fn method_not_allowed() -> Response {
    plain(StatusCode::METHOD_NOT_ALLOWED, "405 Method not allowed")
}

pub(crate) fn payload_too_large() -> Response {
    plain(StatusCode::PAYLOAD_TOO_LARGE, "413 Request body too large")
}

pub(crate) fn internal_server_error() -> Response {
    plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}
