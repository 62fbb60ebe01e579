// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Durable local queue for telemetry events with batched HTTP upload.
//!
//! Events enter through a bounded channel, are persisted in an embedded
//! database and shipped to a collector as gzip-compressed batches on a fixed
//! interval. The [`receiver`] module provides the matching collector endpoint.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod http_utils;
pub mod ingest;
pub mod logger;
pub mod receiver;
pub mod shipper;
pub mod store;
pub mod ticker;
pub mod uploader;

pub use codec::{
    decode_batch, decode_batch_with_limit, encode_batch, CodecError, Lines, LINE_SEPARATOR,
};
pub use config::Config;
pub use error::ShipperError;
pub use event::{encode_event, msgpack_to_json, BaseEvent, Event, EventError};
pub use ingest::{BoxedEvent, IngestAgent};
pub use receiver::{LineHandler, ReceiveError, Receiver};
pub use shipper::{LogShipper, ShipperHandle};
pub use store::{EventStore, StoreError, StoredEvent};
pub use ticker::start_interval;
pub use uploader::{UploadError, Uploader, UploaderConfig};
