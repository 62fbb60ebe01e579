// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP endpoint accepting batches produced by the uploader.
//!
//! Each accepted batch is gunzipped, split on the line separator and handed to
//! the registered [`LineHandler`] one non-empty record at a time. Both the
//! request body and its inflated form are size-capped before they are held in
//! memory.

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Incoming};
use hyper::service::service_fn;
use hyper::{http, Method, Request, Response, StatusCode};
use thiserror::Error;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::codec::{decode_batch_with_limit, CodecError};
use crate::http_utils::{
    log_and_create_http_response, verify_request_content_length, HttpResponse,
};

pub const DEFAULT_ADDR: &str = "0.0.0.0:8000";
// 64MiB
pub const DEFAULT_MAX_DECOMPRESSED_CONTENT_LENGTH: usize = 64 * 1024 * 1024;
const BATCH_ENDPOINT_PATH: &str = "/";

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum ReceiveError {
    #[error("failed to read request body: {0}")]
    Body(#[source] BoxError),
    #[error(transparent)]
    Decompress(#[from] CodecError),
    #[error("receiver io error: {0}")]
    Io(#[from] io::Error),
}

/// Callback invoked for every received record, or once with the error when a
/// request could not be read or decompressed.
pub trait LineHandler: Send + Sync + 'static {
    fn handle(&self, line: Result<Bytes, ReceiveError>);
}

impl<F> LineHandler for F
where
    F: Fn(Result<Bytes, ReceiveError>) + Send + Sync + 'static,
{
    fn handle(&self, line: Result<Bytes, ReceiveError>) {
        self(line);
    }
}

#[derive(Debug, Clone, Copy)]
struct BodyLimits {
    compressed: usize,
    decompressed: usize,
}

#[derive(Clone)]
pub struct Receiver {
    handler: Arc<dyn LineHandler>,
    limits: BodyLimits,
    cancel_token: CancellationToken,
}

impl Receiver {
    /// `max_request_content_length` bounds the compressed request body. The
    /// inflated batch is bounded by [`DEFAULT_MAX_DECOMPRESSED_CONTENT_LENGTH`]
    /// unless overridden with [`Receiver::with_max_decompressed_content_length`].
    pub fn new(handler: impl LineHandler, max_request_content_length: usize) -> Self {
        Self {
            handler: Arc::new(handler),
            limits: BodyLimits {
                compressed: max_request_content_length,
                decompressed: DEFAULT_MAX_DECOMPRESSED_CONTENT_LENGTH,
            },
            cancel_token: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_max_decompressed_content_length(mut self, max_len: usize) -> Self {
        self.limits.decompressed = max_len;
        self
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Binds `addr` and serves until cancelled.
    pub async fn start<A: ToSocketAddrs>(&self, addr: A) -> Result<(), ReceiveError> {
        let listener = TcpListener::bind(addr).await?;
        info!("RECEIVER | Listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Accepts connections on `listener` until the cancellation token fires.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ReceiveError> {
        let handler = Arc::clone(&self.handler);
        let limits = self.limits;
        let service = service_fn(move |req: Request<Incoming>| {
            let handler = Arc::clone(&handler);
            async move { Self::endpoint_handler(req, handler, limits).await }
        });

        let server = hyper::server::conn::http1::Builder::new();
        let mut joinset = tokio::task::JoinSet::new();

        loop {
            let conn = tokio::select! {
                con_res = listener.accept() => match con_res {
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::ConnectionAborted
                                | io::ErrorKind::ConnectionReset
                                | io::ErrorKind::ConnectionRefused
                        ) =>
                    {
                        continue;
                    }
                    Err(e) => {
                        error!("RECEIVER | Server error: {e}");
                        return Err(e.into());
                    }
                    Ok((conn, _)) => conn,
                },
                finished = async {
                    match joinset.join_next().await {
                        Some(finished) => finished,
                        None => std::future::pending().await,
                    }
                } => match finished {
                    Err(e) if e.is_panic() => {
                        error!("RECEIVER | Connection handler panicked: {:?}", e);
                        continue;
                    },
                    Ok(()) | Err(_) => continue,
                },
                () = self.cancel_token.cancelled() => {
                    debug!("RECEIVER | Shutting down, closing {} connections", joinset.len());
                    joinset.shutdown().await;
                    return Ok(());
                },
            };
            let conn = hyper_util::rt::TokioIo::new(conn);
            let server = server.clone();
            let service = service.clone();
            joinset.spawn(async move {
                if let Err(e) = server.serve_connection(conn, service).await {
                    error!("RECEIVER | Connection error: {e}");
                }
            });
        }
    }

    async fn endpoint_handler(
        req: Request<Incoming>,
        handler: Arc<dyn LineHandler>,
        limits: BodyLimits,
    ) -> http::Result<HttpResponse> {
        match (req.method(), req.uri().path()) {
            (&Method::POST, BATCH_ENDPOINT_PATH) => {
                Self::batch_handler(req, handler.as_ref(), limits).await
            }
            _ => Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Full::default()),
        }
    }

    async fn batch_handler<B>(
        req: Request<B>,
        handler: &dyn LineHandler,
        limits: BodyLimits,
    ) -> http::Result<HttpResponse>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();
        if let Some(response) = verify_request_content_length(
            &parts.headers,
            limits.compressed,
            "RECEIVER | Error processing batch",
        ) {
            return response;
        }

        // Chunked uploads carry no Content-Length, so the read itself is capped.
        let payload: Bytes = match Limited::new(body, limits.compressed).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                return log_and_create_http_response(
                    "RECEIVER | Error processing batch: Payload too large",
                    StatusCode::PAYLOAD_TOO_LARGE,
                );
            }
            Err(e) => {
                let message = format!("RECEIVER | Error reading request body: {e}");
                handler.handle(Err(ReceiveError::Body(e)));
                return log_and_create_http_response(
                    &message,
                    StatusCode::INTERNAL_SERVER_ERROR,
                );
            }
        };

        let lines = match decode_batch_with_limit(&payload, limits.decompressed) {
            Ok(lines) => lines,
            Err(e) => {
                let message = format!("RECEIVER | Error decompressing batch: {e}");
                let status = match &e {
                    CodecError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                handler.handle(Err(ReceiveError::Decompress(e)));
                return log_and_create_http_response(&message, status);
            }
        };

        let mut received = 0usize;
        for line in lines.filter(|line| !line.is_empty()) {
            handler.handle(Ok(line));
            received += 1;
        }

        log_and_create_http_response(
            &format!("RECEIVER | Received batch of {received} events"),
            StatusCode::OK,
        )
    }
}
