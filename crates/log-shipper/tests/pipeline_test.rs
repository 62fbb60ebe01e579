// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! End-to-end tests: store, uploader and receiver talking over loopback HTTP.

mod common;

use common::helpers::{spawn_receiver, wait_until, SessionEvent};
use log_shipper::{Config, EventStore, LogShipper, Uploader, UploaderConfig};
use mockito::Server;
use std::sync::Arc;
use std::time::Duration;

fn uploader_config(endpoint: String, max_batch_size: usize) -> UploaderConfig {
    UploaderConfig {
        endpoint,
        content_type: "application/msgpack".to_string(),
        interval: Duration::from_millis(100),
        max_batch_size,
        timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn test_uploaded_batch_reaches_receiver_as_json() {
    let (addr, received, cancel_token) = spawn_receiver().await;
    let dir = tempfile::tempdir().unwrap();
    let store = EventStore::open(dir.path().join("logs.db")).unwrap();

    for i in 0..3 {
        store
            .record(&SessionEvent::new(&format!("tick {i}"), "session-a"))
            .unwrap();
    }

    let uploader = Uploader::new(store.clone(), uploader_config(format!("http://{addr}/"), 5000));
    uploader.run_cycle().await;

    assert_eq!(received.details(), vec!["tick 0", "tick 1", "tick 2"]);
    let lines = received.json_lines.lock().unwrap().clone();
    assert!(lines.iter().all(|line| line["sessionId"] == "session-a"));
    assert!(lines.iter().all(|line| line["timestamp"].is_i64()));
    assert_eq!(*received.errors.lock().unwrap(), 0);

    assert_eq!(store.pending_len(), 0);
    assert_eq!(store.marked_len(), 0);
    cancel_token.cancel();
}

#[tokio::test]
async fn test_events_recorded_later_are_shipped_by_next_cycle() {
    let (addr, received, cancel_token) = spawn_receiver().await;
    let store = EventStore::open_ephemeral().unwrap();
    let uploader = Uploader::new(store.clone(), uploader_config(format!("http://{addr}/"), 5000));

    store.record(&SessionEvent::new("t1", "s")).unwrap();
    store.record(&SessionEvent::new("t2", "s")).unwrap();
    uploader.run_cycle().await;

    store.record(&SessionEvent::new("t3", "s")).unwrap();
    uploader.run_cycle().await;

    assert_eq!(received.details(), vec!["t1", "t2", "t3"]);
    assert_eq!(store.pending_len(), 0);
    cancel_token.cancel();
}

#[tokio::test]
async fn test_backlog_survives_restart_and_is_delivered() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("logs.db");

    {
        let store = EventStore::open(&db_path).unwrap();
        for i in 0..4 {
            store
                .record(&SessionEvent::new(&format!("before restart {i}"), "s"))
                .unwrap();
        }
        store.flush().unwrap();
    }

    let (addr, received, cancel_token) = spawn_receiver().await;
    let store = EventStore::open(&db_path).unwrap();
    let uploader = Uploader::new(store.clone(), uploader_config(format!("http://{addr}/"), 2));

    uploader.run_cycle().await;
    uploader.run_cycle().await;

    assert_eq!(
        received.details(),
        vec![
            "before restart 0",
            "before restart 1",
            "before restart 2",
            "before restart 3"
        ]
    );
    assert_eq!(store.pending_len(), 0);
    cancel_token.cancel();
}

#[tokio::test]
async fn test_collector_outage_keeps_events_until_recovery() {
    let mut server = Server::new_async().await;
    let outage = server
        .mock("POST", "/")
        .with_status(503)
        .expect(2)
        .create_async()
        .await;

    let store = EventStore::open_ephemeral().unwrap();
    store.record(&SessionEvent::new("t1", "s")).unwrap();
    let uploader = Uploader::new(store.clone(), uploader_config(format!("{}/", server.url()), 10));

    uploader.run_cycle().await;
    store.record(&SessionEvent::new("t2", "s")).unwrap();
    uploader.run_cycle().await;
    outage.assert_async().await;
    outage.remove_async().await;
    assert_eq!(store.pending_len(), 2);
    assert_eq!(store.marked_len(), 0);

    let recovered = server
        .mock("POST", "/")
        .match_header("Content-Encoding", "gzip")
        .with_status(200)
        .with_body("ok")
        .expect(1)
        .create_async()
        .await;
    uploader.run_cycle().await;
    recovered.assert_async().await;
    assert_eq!(store.pending_len(), 0);
}

#[tokio::test]
async fn test_shipper_delivers_produced_events() {
    let (addr, received, cancel_token) = spawn_receiver().await;
    let dir = tempfile::tempdir().unwrap();

    let config = Config {
        db_path: dir.path().join("logs.db"),
        endpoint: format!("http://{addr}/"),
        upload_interval: Duration::from_millis(100),
        ..Default::default()
    };
    let handle = LogShipper::new(Arc::new(config)).start().unwrap();

    let events = handle.events();
    for i in 0..20 {
        events
            .send(Box::new(SessionEvent::new(&format!("tick {i}"), "s")))
            .await
            .unwrap();
    }

    assert!(
        wait_until(|| received.len() >= 20, Duration::from_secs(10)).await,
        "only {} events delivered",
        received.len()
    );
    let expected: Vec<String> = (0..20).map(|i| format!("tick {i}")).collect();
    assert_eq!(received.details(), expected);

    let store = handle.store().clone();
    assert!(wait_until(|| store.pending_len() == 0, Duration::from_secs(5)).await);

    drop(events);
    handle.stop().await.unwrap();
    cancel_token.cancel();
}
