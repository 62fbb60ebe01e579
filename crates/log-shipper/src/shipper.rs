// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wires the ingest channel, the store and the uploader together.

use std::sync::Arc;

use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::ShipperError;
use crate::ingest::{BoxedEvent, IngestAgent};
use crate::store::EventStore;
use crate::uploader::{Uploader, UploaderConfig};

#[derive(Debug)]
pub struct LogShipper {
    config: Arc<Config>,
}

impl LogShipper {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Opens the store and spawns the ingest and upload tasks.
    ///
    /// Must be called from within a tokio runtime. Failing to open the store is
    /// fatal: nothing is spawned and the error is returned.
    pub fn start(self) -> Result<ShipperHandle, ShipperError> {
        self.config.validate()?;

        let store = EventStore::open(&self.config.db_path).map_err(ShipperError::StoreInit)?;
        info!(
            "Event store opened at {}, {} events pending",
            store.path().display(),
            store.pending_len()
        );

        let (mut ingest_agent, events) =
            IngestAgent::new(store.clone(), self.config.ingest_capacity);
        let ingest_cancel = ingest_agent.cancel_token();
        let ingest_task = tokio::spawn(async move { ingest_agent.spin().await });

        let uploader_config = UploaderConfig::from(self.config.as_ref());
        let uploader = Uploader::new(store.clone(), uploader_config);
        let uploader_cancel = uploader.cancel_token();
        let uploader_task = tokio::spawn(async move { uploader.run().await });

        Ok(ShipperHandle {
            events,
            store,
            ingest_cancel,
            uploader_cancel,
            ingest_task,
            uploader_task,
        })
    }
}

/// Owns the running pipeline. Dropping it without [`ShipperHandle::stop`]
/// leaves the background tasks running.
pub struct ShipperHandle {
    events: Sender<BoxedEvent>,
    store: EventStore,
    ingest_cancel: CancellationToken,
    uploader_cancel: CancellationToken,
    ingest_task: JoinHandle<()>,
    uploader_task: JoinHandle<()>,
}

impl ShipperHandle {
    /// Sender producers push events into.
    #[must_use]
    pub fn events(&self) -> Sender<BoxedEvent> {
        self.events.clone()
    }

    #[must_use]
    pub fn store(&self) -> &EventStore {
        &self.store
    }

    /// Stops ingest (recording what is already queued), then the uploader,
    /// and flushes the store.
    pub async fn stop(self) -> Result<(), ShipperError> {
        debug!("Stopping log shipper");
        drop(self.events);

        self.ingest_cancel.cancel();
        self.ingest_task
            .await
            .map_err(|e| ShipperError::Shutdown(format!("ingest task failed: {e}")))?;

        self.uploader_cancel.cancel();
        self.uploader_task
            .await
            .map_err(|e| ShipperError::Shutdown(format!("uploader task failed: {e}")))?;

        self.store
            .flush()
            .map_err(|e| ShipperError::Shutdown(format!("unable to flush store: {e}")))?;
        info!("Log shipper stopped");
        Ok(())
    }
}
