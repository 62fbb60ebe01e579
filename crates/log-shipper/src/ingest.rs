// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded hand-off from producers to the store.
//!
//! ```text
//!   Producers ──> mpsc (bounded) ──> IngestAgent::spin ──> EventStore::record
//! ```
//!
//! Producers block once the channel is full, so events are never dropped for
//! lack of room. A single drain task performs every store write.

use tokio::sync::mpsc::{self, error::TryRecvError, Sender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::event::Event;
use crate::store::EventStore;

pub const INGEST_CHANNEL_CAPACITY: usize = 1000;

pub type BoxedEvent = Box<dyn Event>;

#[allow(clippy::module_name_repetitions)]
pub struct IngestAgent {
    rx: mpsc::Receiver<BoxedEvent>,
    store: EventStore,
    cancel_token: CancellationToken,
}

impl IngestAgent {
    /// Creates the agent and the sender producers push events into.
    ///
    /// A `capacity` of zero is raised to one, the smallest bound tokio accepts.
    #[must_use]
    pub fn new(store: EventStore, capacity: usize) -> (Self, Sender<BoxedEvent>) {
        let (tx, rx) = mpsc::channel::<BoxedEvent>(capacity.max(1));
        let agent = Self {
            rx,
            store,
            cancel_token: CancellationToken::new(),
        };
        (agent, tx)
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Records events until every sender is dropped or the agent is cancelled.
    ///
    /// On cancellation whatever is already queued is still recorded.
    pub async fn spin(&mut self) {
        loop {
            tokio::select! {
                event = self.rx.recv() => match event {
                    Some(event) => self.ingest(event.as_ref()),
                    None => {
                        debug!("INGEST | All senders dropped, stopping");
                        break;
                    }
                },
                () = self.cancel_token.cancelled() => {
                    debug!("INGEST | Received shutdown signal, draining remaining events");
                    self.drain();
                    break;
                }
            }
        }
    }

    fn drain(&mut self) {
        let mut drained = 0usize;
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    self.ingest(event.as_ref());
                    drained += 1;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        debug!("INGEST | Drained {drained} queued events");
    }

    fn ingest(&self, event: &dyn Event) {
        debug!("INGEST | {}", event.detail());
        if let Err(e) = self.store.record(event) {
            error!("INGEST | Unable to store event: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::BaseEvent;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn event(detail: &str) -> BoxedEvent {
        Box::new(BaseEvent {
            timestamp: 1,
            detail: detail.to_string(),
        })
    }

    #[tokio::test]
    async fn test_spin_records_events_in_order_until_senders_drop() {
        let store = EventStore::open_ephemeral().unwrap();
        let (mut agent, tx) = IngestAgent::new(store.clone(), 4);
        let handle = tokio::spawn(async move { agent.spin().await });

        for i in 0..10 {
            tx.send(event(&format!("tick {i}"))).await.unwrap();
        }
        drop(tx);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("agent should stop once senders are gone")
            .unwrap();

        let stored = store.select_for_upload(100).unwrap();
        let details: Vec<String> = stored
            .iter()
            .map(|stored| {
                rmp_serde::from_slice::<BaseEvent>(&stored.payload)
                    .unwrap()
                    .detail
            })
            .collect();
        let expected: Vec<String> = (0..10).map(|i| format!("tick {i}")).collect();
        assert_eq!(details, expected);
    }

    #[tokio::test]
    async fn test_cancel_drains_queued_events() {
        let store = EventStore::open_ephemeral().unwrap();
        let (mut agent, tx) = IngestAgent::new(store.clone(), 16);

        for i in 0..5 {
            tx.send(event(&format!("queued {i}"))).await.unwrap();
        }
        agent.cancel_token().cancel();
        agent.spin().await;

        assert_eq!(store.pending_len(), 5);
        // The sender is still alive; the agent must not wait for it.
        assert!(!tx.is_closed());
    }

    #[tokio::test]
    async fn test_full_channel_blocks_producer() {
        let store = EventStore::open_ephemeral().unwrap();
        let (_agent, tx) = IngestAgent::new(store, 1);

        tx.send(event("first")).await.unwrap();
        let second = tokio::time::timeout(Duration::from_millis(50), tx.send(event("second")));
        assert!(second.await.is_err());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_each_event_is_logged() {
        let store = EventStore::open_ephemeral().unwrap();
        let (mut agent, tx) = IngestAgent::new(store, 4);

        tx.send(event("tick 42")).await.unwrap();
        drop(tx);
        agent.spin().await;

        assert!(logs_contain("INGEST | tick 42"));
    }
}
