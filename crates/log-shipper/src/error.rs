// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::store::StoreError;

/// Errors that can occur when configuring or starting the shipper
#[derive(Debug, thiserror::Error)]
pub enum ShipperError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to open event store: {0}")]
    StoreInit(#[source] StoreError),

    #[error("Failed to install logger: {0}")]
    Logger(String),

    #[error("Shutdown failed: {0}")]
    Shutdown(String),
}
