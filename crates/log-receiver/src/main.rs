// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use log_shipper::{
    encode_event, logger, msgpack_to_json, start_interval, BaseEvent, Config, Event, EventError,
    LogShipper, ReceiveError, Receiver,
};

const SESSION_ID: &str = "session-1";
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Tick event tagged with the session it was produced in.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionEvent {
    #[serde(flatten)]
    base: BaseEvent,
    #[serde(rename = "sessionId")]
    session_id: String,
}

impl SessionEvent {
    fn new(session_id: &str, detail: String) -> Self {
        Self {
            base: BaseEvent::new(detail),
            session_id: session_id.to_string(),
        }
    }
}

impl Event for SessionEvent {
    fn timestamp(&self) -> i64 {
        self.base.timestamp
    }

    fn detail(&self) -> &str {
        &self.base.detail
    }

    fn to_bytes(&self) -> Result<Vec<u8>, EventError> {
        encode_event(self)
    }
}

fn print_line(line: Result<Bytes, ReceiveError>) {
    let line = match line {
        Ok(line) => line,
        Err(e) => {
            error!("ERR (receiving): {e}");
            return;
        }
    };
    match msgpack_to_json::<SessionEvent>(&line) {
        Ok(json) => info!("RCV: {}", String::from_utf8_lossy(&json)),
        Err(e) => error!("ERR (transcoding): {e}"),
    }
}

#[tokio::main]
pub async fn main() {
    let config = match Config::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Unable to load configuration: {e}");
            return;
        }
    };
    if let Err(e) = logger::init(&config.log_level) {
        eprintln!("{e}");
        return;
    }
    debug!("Logging subsystem enabled");

    // Would normally run on the collector host; in-process here for demonstration.
    let receiver = Receiver::new(print_line, config.max_request_content_length)
        .with_max_decompressed_content_length(config.max_decompressed_content_length);
    let receiver_cancel = receiver.cancel_token();
    let receiver_addr = config.receiver_addr.clone();
    let receiver_task = tokio::spawn(async move { receiver.start(receiver_addr).await });

    let handle = match LogShipper::new(Arc::clone(&config)).start() {
        Ok(handle) => handle,
        Err(e) => {
            error!("Unable to start log shipper: {e}");
            return;
        }
    };
    info!(
        "Uploading to {} every {:?}, at most {} events per batch",
        config.endpoint, config.upload_interval, config.max_batch_size
    );

    // A single producer keeps ticks in ingest order.
    let (ticks_tx, mut ticks_rx) = mpsc::unbounded_channel::<u64>();
    let events = handle.events();
    let producer = tokio::spawn(async move {
        while let Some(i) = ticks_rx.recv().await {
            let event = SessionEvent::new(SESSION_ID, format!("tick {i}"));
            if events.send(Box::new(event)).await.is_err() {
                debug!("Ingest closed, dropping tick {i}");
                break;
            }
        }
    });
    let ticker = start_interval(TICK_INTERVAL, move |i| {
        if ticks_tx.send(i).is_err() {
            debug!("Producer gone, dropping tick {i}");
        }
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Unable to listen for shutdown signal: {e}");
    }
    info!("Shutting down");

    ticker.cancel();
    if let Err(e) = producer.await {
        error!("Tick producer failed: {e}");
    }
    if let Err(e) = handle.stop().await {
        error!("{e}");
    }
    receiver_cancel.cancel();
    match receiver_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Receiver stopped with error: {e}"),
        Err(e) => error!("Receiver task failed: {e}"),
    }
}
