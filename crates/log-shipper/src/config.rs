// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::ShipperError;
use crate::ingest::INGEST_CHANNEL_CAPACITY;
use crate::receiver::{DEFAULT_ADDR, DEFAULT_MAX_DECOMPRESSED_CONTENT_LENGTH};
use crate::store::DEFAULT_DB_PATH;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_ENDPOINT: &str = "http://0.0.0.0:8000";
const DEFAULT_CONTENT_TYPE: &str = "application/msgpack";
const DEFAULT_UPLOAD_INTERVAL_SECS: u64 = 3;
const DEFAULT_MAX_BATCH_SIZE: usize = 5000;
const DEFAULT_FLUSH_TIMEOUT_SECS: u64 = 30;
// 10MiB
const DEFAULT_MAX_REQUEST_CONTENT_LENGTH: usize = 10 * 1024 * 1024;
const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration for the shipper, its uploader and the receiver
#[derive(Debug, Clone)]
pub struct Config {
    /// On-disk location of the event store
    pub db_path: PathBuf,
    /// Collector URL batches are POSTed to
    pub endpoint: String,
    /// Content type declared for the binary records
    pub content_type: String,
    /// Minimum time between two upload cycles
    pub upload_interval: Duration,
    /// Maximum number of events per batch
    pub max_batch_size: usize,
    /// Timeout for a single upload request
    pub flush_timeout: Duration,
    /// Address the receiver listens on
    pub receiver_addr: String,
    /// Largest request body the receiver accepts
    pub max_request_content_length: usize,
    /// Largest batch the receiver inflates a request body to
    pub max_decompressed_content_length: usize,
    /// Bound of the ingest channel
    pub ingest_capacity: usize,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            upload_interval: Duration::from_secs(DEFAULT_UPLOAD_INTERVAL_SECS),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            flush_timeout: Duration::from_secs(DEFAULT_FLUSH_TIMEOUT_SECS),
            receiver_addr: DEFAULT_ADDR.to_string(),
            max_request_content_length: DEFAULT_MAX_REQUEST_CONTENT_LENGTH,
            max_decompressed_content_length: DEFAULT_MAX_DECOMPRESSED_CONTENT_LENGTH,
            ingest_capacity: INGEST_CHANNEL_CAPACITY,
            log_level: "info".to_string(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|val| val.trim().parse::<T>().ok())
}

impl Config {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ShipperError> {
        let defaults = Self::default();

        let db_path = env::var("LOG_SHIPPER_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);
        let endpoint = env::var("LOG_SHIPPER_ENDPOINT").unwrap_or(defaults.endpoint);
        let content_type =
            env::var("LOG_SHIPPER_CONTENT_TYPE").unwrap_or(defaults.content_type);
        let upload_interval = parse_env::<u64>("LOG_SHIPPER_UPLOAD_INTERVAL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.upload_interval);
        let max_batch_size =
            parse_env("LOG_SHIPPER_MAX_BATCH_SIZE").unwrap_or(defaults.max_batch_size);
        let flush_timeout = parse_env::<u64>("LOG_SHIPPER_FLUSH_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.flush_timeout);
        let receiver_addr =
            env::var("LOG_SHIPPER_RECEIVER_ADDR").unwrap_or(defaults.receiver_addr);
        let max_request_content_length = parse_env("LOG_SHIPPER_MAX_REQUEST_CONTENT_LENGTH")
            .unwrap_or(defaults.max_request_content_length);
        let max_decompressed_content_length =
            parse_env("LOG_SHIPPER_MAX_DECOMPRESSED_CONTENT_LENGTH")
                .unwrap_or(defaults.max_decompressed_content_length);
        let ingest_capacity =
            parse_env("LOG_SHIPPER_INGEST_CAPACITY").unwrap_or(defaults.ingest_capacity);
        let log_level = env::var("LOG_SHIPPER_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or(defaults.log_level);

        let config = Self {
            db_path,
            endpoint,
            content_type,
            upload_interval,
            max_batch_size,
            flush_timeout,
            receiver_addr,
            max_request_content_length,
            max_decompressed_content_length,
            ingest_capacity,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ShipperError> {
        let endpoint = self.endpoint.trim();
        if endpoint.is_empty() {
            return Err(ShipperError::InvalidConfig(
                "LOG_SHIPPER_ENDPOINT cannot be empty".to_string(),
            ));
        }
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ShipperError::InvalidConfig(format!(
                "Endpoint '{endpoint}' must start with http:// or https://"
            )));
        }

        if self.content_type.trim().is_empty() {
            return Err(ShipperError::InvalidConfig(
                "LOG_SHIPPER_CONTENT_TYPE cannot be empty".to_string(),
            ));
        }

        if self.upload_interval.is_zero() {
            return Err(ShipperError::InvalidConfig(
                "Upload interval must be greater than 0".to_string(),
            ));
        }

        if self.ingest_capacity == 0 {
            return Err(ShipperError::InvalidConfig(
                "Ingest capacity must be greater than 0".to_string(),
            ));
        }

        if self.max_request_content_length == 0 || self.max_decompressed_content_length == 0 {
            return Err(ShipperError::InvalidConfig(
                "Receiver content length limits must be greater than 0".to_string(),
            ));
        }

        if self.receiver_addr.parse::<SocketAddr>().is_err() {
            return Err(ShipperError::InvalidConfig(format!(
                "Invalid receiver address '{}'",
                self.receiver_addr
            )));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ShipperError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }
}
