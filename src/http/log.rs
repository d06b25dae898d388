//! Small inline modules, one per kind of log message, so that each can be
//! enabled separately with a filter like `linkboard::http::log::headers`.

use std::fmt::Write as _;
use hyper::{body::Incoming, Request};

use crate::prelude::*;


pub(crate) mod req {
    use super::*;

    pub(crate) fn log(req: &Request<Incoming>) {
        trace!(
            method = ?req.method(),
            path = req.uri().path_and_query().map_or("", |pq| pq.as_str()),
            "Incoming HTTP request",
        );
    }
}

pub(crate) mod headers {
    use super::*;

    pub(crate) fn log(req: &Request<Incoming>) {
        if !tracing::enabled!(tracing::Level::TRACE) {
            return;
        }

        let mut out = String::new();
        for (name, value) in req.headers() {
            // The token must not end up in log files.
            let value = if name == hyper::header::AUTHORIZATION {
                "<redacted>".into()
            } else {
                String::from_utf8_lossy(value.as_bytes())
            };
            let _ = write!(out, "\n  {name}: {value}");
        }
        trace!("HTTP Headers: {out}");
    }
}
