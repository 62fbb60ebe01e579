// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use bytes::Bytes;
use log_shipper::{
    encode_event, msgpack_to_json, BaseEvent, Event, EventError, ReceiveError, Receiver,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Domain event composed from the base event, as a host application would define it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    #[serde(flatten)]
    pub base: BaseEvent,
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

impl SessionEvent {
    pub fn new(detail: &str, session_id: &str) -> Self {
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

/// Everything a test receiver was handed, rendered as JSON
#[derive(Debug, Default)]
pub struct Received {
    pub json_lines: Mutex<Vec<serde_json::Value>>,
    pub errors: Mutex<usize>,
}

impl Received {
    pub fn len(&self) -> usize {
        self.json_lines.lock().unwrap().len()
    }

    pub fn details(&self) -> Vec<String> {
        self.json_lines
            .lock()
            .unwrap()
            .iter()
            .map(|line| line["detail"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

/// Start a receiver on an ephemeral local port that transcodes every line to JSON
pub async fn spawn_receiver() -> (SocketAddr, Arc<Received>, CancellationToken) {
    let received = Arc::new(Received::default());
    let sink = Arc::clone(&received);
    let receiver = Receiver::new(
        move |line: Result<Bytes, ReceiveError>| match line
            .map_err(|_| ())
            .and_then(|line| msgpack_to_json::<SessionEvent>(&line).map_err(|_| ()))
        {
            Ok(json) => sink
                .json_lines
                .lock()
                .unwrap()
                .push(serde_json::from_slice(&json).unwrap()),
            Err(()) => *sink.errors.lock().unwrap() += 1,
        },
        10 * 1024 * 1024,
    );
    let cancel_token = receiver.cancel_token();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { receiver.serve(listener).await });
    (addr, received, cancel_token)
}

/// Poll `condition` until it holds or the timeout elapses
pub async fn wait_until<F: Fn() -> bool>(condition: F, limit: Duration) -> bool {
    let poll = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    tokio::time::timeout(limit, poll).await.is_ok()
}
