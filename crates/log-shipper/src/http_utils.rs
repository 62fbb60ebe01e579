// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use core::time::Duration;
use http_body_util::Full;
use hyper::{
    header,
    http::{self, HeaderMap},
    Response, StatusCode,
};
use tracing::{debug, error};

pub type HttpResponse = Response<Full<Bytes>>;

/// Body sent back to uploaders for accepted batches.
pub const OK_BODY: &str = "ok";
/// Body sent back to uploaders for every rejected request.
pub const ERROR_BODY: &str = "error";

/// Does two things:
/// 1. Logs the given message. A success status code (within 200-299) will cause a debug log to
///    be written, otherwise error will be written.
/// 2. Returns a plain-text response with the given status code whose body is `ok` for success
///    codes and `error` for everything else.
pub fn log_and_create_http_response(
    message: &str,
    status: StatusCode,
) -> http::Result<HttpResponse> {
    let body = if status.is_success() {
        debug!("{message}");
        OK_BODY
    } else {
        error!("{message}");
        ERROR_BODY
    };
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Full::new(Bytes::from_static(body.as_bytes())))
}

/// Takes a request's header map and verifies that a declared "content-length" is valid and no
/// larger than `max_content_length`. Chunked requests without a length are let through.
///
/// Will return None if no issues are found. Otherwise logs an error (with the given prefix) and
/// returns an HTTP Response with the appropriate error status code.
pub fn verify_request_content_length(
    header_map: &HeaderMap,
    max_content_length: usize,
    error_message_prefix: &str,
) -> Option<http::Result<HttpResponse>> {
    let content_length_header = header_map.get(header::CONTENT_LENGTH)?;
    let content_length = match content_length_header
        .to_str()
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
    {
        Some(length) => length,
        None => {
            return Some(log_and_create_http_response(
                &format!("{error_message_prefix}: Invalid Content-Length header"),
                StatusCode::BAD_REQUEST,
            ));
        }
    };
    if content_length > max_content_length {
        return Some(log_and_create_http_response(
            &format!("{error_message_prefix}: Payload too large"),
            StatusCode::PAYLOAD_TOO_LARGE,
        ));
    }
    None
}

/// Builds the reqwest client used by uploaders.
///
/// If the builder fails the error is logged and a default client is returned so the uploader can
/// keep running with reqwest's defaults.
pub fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            error!("Unable to build HTTP client: {e}, using reqwest defaults");
            reqwest::Client::new()
        })
}
