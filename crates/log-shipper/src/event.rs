// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Telemetry event capability.
//!
//! Anything that can report a timestamp, a readable detail line and its own
//! binary encoding can be shipped. Binary encoding is MessagePack with named
//! fields, which keeps records self-describing for the collector.
//!
//! Domain events are built by composition: embed a [`BaseEvent`] and add the
//! extra fields, then implement [`Event`] by delegating to the embedded base
//! and encoding the whole struct with [`encode_event`].

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("unable to encode event as MessagePack: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("unable to decode MessagePack record: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("unable to encode record as JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// The minimum contract for a shippable telemetry record.
pub trait Event: Send + Sync {
    /// Creation time in seconds since the unix epoch.
    fn timestamp(&self) -> i64;

    /// Human readable detail, used for local logging.
    fn detail(&self) -> &str;

    /// Binary encoding persisted in the store and sent over the wire.
    fn to_bytes(&self) -> Result<Vec<u8>, EventError>;
}

/// Plain event carrying a timestamp and a detail string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseEvent {
    pub timestamp: i64,
    pub detail: String,
}

impl BaseEvent {
    /// Creates an event stamped with the current time.
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            timestamp: OffsetDateTime::now_utc().unix_timestamp(),
            detail: detail.into(),
        }
    }
}

impl Event for BaseEvent {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn detail(&self) -> &str {
        &self.detail
    }

    fn to_bytes(&self) -> Result<Vec<u8>, EventError> {
        encode_event(self)
    }
}

/// Serializes any event shape as named-field MessagePack.
pub fn encode_event<T: Serialize + ?Sized>(event: &T) -> Result<Vec<u8>, EventError> {
    Ok(rmp_serde::to_vec_named(event)?)
}

/// Converts one binary record into JSON by decoding it as `T`.
///
/// This is the transcoder a receiver's line handler uses to render what it
/// received; the shipping pipeline itself never decodes records.
pub fn msgpack_to_json<T>(record: &[u8]) -> Result<Vec<u8>, EventError>
where
    T: DeserializeOwned + Serialize,
{
    let decoded: T = rmp_serde::from_slice(record)?;
    Ok(serde_json::to_vec(&decoded)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    struct SessionEvent {
        base: BaseEvent,
        session_id: String,
    }

    impl Event for SessionEvent {
        fn timestamp(&self) -> i64 {
            self.base.timestamp
        }

        fn detail(&self) -> &str {
            self.base.detail()
        }

        fn to_bytes(&self) -> Result<Vec<u8>, EventError> {
            encode_event(self)
        }
    }

    #[test]
    fn test_base_event_new_stamps_current_time() {
        let before = OffsetDateTime::now_utc().unix_timestamp();
        let event = BaseEvent::new("tick 0");
        let after = OffsetDateTime::now_utc().unix_timestamp();

        assert_eq!(event.detail(), "tick 0");
        assert!(event.timestamp() >= before && event.timestamp() <= after);
    }

    #[test]
    fn test_base_event_bytes_transcode_to_json() {
        let event = BaseEvent {
            timestamp: 1_700_000_000,
            detail: "hello".to_string(),
        };
        let bytes = event.to_bytes().unwrap();
        let json = msgpack_to_json::<BaseEvent>(&bytes).unwrap();

        assert_eq!(
            String::from_utf8(json).unwrap(),
            r#"{"timestamp":1700000000,"detail":"hello"}"#
        );
    }

    #[test]
    fn test_composed_event_encodes_domain_fields() {
        let event = SessionEvent {
            base: BaseEvent {
                timestamp: 42,
                detail: "tick 7".to_string(),
            },
            session_id: "session-1".to_string(),
        };

        assert_eq!(event.timestamp(), 42);
        assert_eq!(event.detail(), "tick 7");

        let bytes = event.to_bytes().unwrap();
        let decoded: SessionEvent = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded.session_id, "session-1");
        assert_eq!(decoded.base, event.base);
    }

    #[test]
    fn test_msgpack_to_json_rejects_garbage() {
        let err = msgpack_to_json::<BaseEvent>(b"\xc1not msgpack").unwrap_err();
        assert!(matches!(err, EventError::Decode(_)));
    }
}
