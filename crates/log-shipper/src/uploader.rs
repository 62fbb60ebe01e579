// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Periodic upload of stored events to a collector.
//!
//! # Cycle
//!
//! ```text
//!   Idle ──> DueCheck ──(not due)──> sleep until due ──> DueCheck
//!               │
//!             (due)
//!               v
//!           Uploading ──(empty batch / failure)──> Idle
//!               │
//!           (accepted)
//!               v
//!           Retiring ──> Idle
//! ```
//!
//! A batch is marked only after the collector accepted it, and retirement only
//! deletes marked events, so a failed transmission is retried on the next cycle
//! and delivery is at-least-once. There is no backoff; the retry cadence is
//! the upload interval.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::StatusCode;
use thiserror::Error;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::codec::{encode_batch, CodecError, CONTENT_ENCODING_GZIP};
use crate::config::Config;
use crate::http_utils::build_client;
use crate::store::{EventStore, StoreError};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("failed to send batch: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("collector rejected batch with status {0}")]
    Status(StatusCode),
}

/// Settings for a single upload target.
#[derive(Debug, Clone)]
pub struct UploaderConfig {
    /// Collector URL batches are POSTed to.
    pub endpoint: String,
    /// `Content-Type` declared for the binary records.
    pub content_type: String,
    /// Minimum time between two upload cycles.
    pub interval: Duration,
    /// Upper bound on events per batch.
    pub max_batch_size: usize,
    /// Timeout for a single POST.
    pub timeout: Duration,
}

impl From<&Config> for UploaderConfig {
    fn from(config: &Config) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            content_type: config.content_type.clone(),
            interval: config.upload_interval,
            max_batch_size: config.max_batch_size,
            timeout: config.flush_timeout,
        }
    }
}

pub struct Uploader {
    store: EventStore,
    config: Arc<UploaderConfig>,
    client: reqwest::Client,
    cancel_token: CancellationToken,
}

impl Uploader {
    #[must_use]
    pub fn new(store: EventStore, config: UploaderConfig) -> Self {
        let client = build_client(config.timeout);
        Self {
            store,
            config: Arc::new(config),
            client,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Returns a clone of the cancellation token stopping [`Uploader::run`].
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Uploads on a fixed interval until cancelled.
    ///
    /// Cancellation is observed while waiting for the next cycle; a cycle that
    /// already started always runs to completion.
    pub async fn run(&self) {
        let mut last_upload = self.store.last_upload_time().unwrap_or_else(|e| {
            error!("UPLOADER | Unable to read last upload time: {e}");
            OffsetDateTime::UNIX_EPOCH
        });
        info!(
            "UPLOADER | Uploading to {} every {:?}",
            self.config.endpoint, self.config.interval
        );

        while !self.cancel_token.is_cancelled() {
            match time_until_due(last_upload, self.config.interval) {
                None => {
                    let started = OffsetDateTime::now_utc();
                    self.run_cycle().await;
                    last_upload = started;
                }
                Some(wait) => {
                    tokio::select! {
                        () = tokio::time::sleep(wait) => {}
                        () = self.cancel_token.cancelled() => break,
                    }
                }
            }
        }
        debug!("UPLOADER | Stopped");
    }

    /// Runs one upload cycle: transmit the next batch, then retire what was marked.
    ///
    /// Failures are logged and left for the next cycle to retry.
    pub async fn run_cycle(&self) {
        match self.upload_next_events().await {
            Ok(0) => debug!("UPLOADER | Nothing to upload"),
            Ok(uploaded) => {
                debug!("UPLOADER | Uploaded {uploaded} events");
                match self.store.retire_marked() {
                    Ok(retired) => debug!("UPLOADER | Retired {retired} events"),
                    Err(e) => error!("UPLOADER | Error deleting uploaded events: {e}"),
                }
            }
            Err(e) => error!("UPLOADER | Error uploading events: {e}"),
        }
    }

    /// Sends the next batch and marks it uploaded once the collector accepts it.
    ///
    /// Returns the number of events sent. An empty batch never touches the network.
    pub async fn upload_next_events(&self) -> Result<usize, UploadError> {
        let batch = self.store.select_for_upload(self.config.max_batch_size)?;
        if batch.is_empty() {
            return Ok(0);
        }

        let (keys, records): (Vec<u64>, Vec<Vec<u8>>) = batch
            .into_iter()
            .map(|stored| (stored.key, stored.payload))
            .unzip();
        let payload = encode_batch(&records)?;

        self.send(payload).await?;
        self.store.mark_uploaded(&keys)?;
        Ok(keys.len())
    }

    async fn send(&self, payload: Vec<u8>) -> Result<(), UploadError> {
        let time = Instant::now();
        let resp = self
            .client
            .post(&self.config.endpoint)
            .header(CONTENT_TYPE, &self.config.content_type)
            .header(CONTENT_ENCODING, CONTENT_ENCODING_GZIP)
            .body(payload)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            error!(
                "UPLOADER | {status}: Collector refused batch: {:?}",
                resp.text().await.unwrap_or_default()
            );
            return Err(UploadError::Status(status));
        }
        debug!(
            "UPLOADER | Batch accepted in {} ms by {}",
            time.elapsed().as_millis(),
            self.config.endpoint
        );
        Ok(())
    }
}

/// Time left before the next cycle is due, or `None` when it is due already.
fn time_until_due(last_upload: OffsetDateTime, interval: Duration) -> Option<Duration> {
    // A last upload in the future (clock moved back) counts as just now.
    let elapsed =
        Duration::try_from(OffsetDateTime::now_utc() - last_upload).unwrap_or_default();
    interval.checked_sub(elapsed).filter(|left| !left.is_zero())
}
