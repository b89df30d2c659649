//! HTTP server and load client tests.
//!
//! Router tests drive the axum service in-process with `tower::ServiceExt`.
//! Load client tests bind a real listener on an ephemeral port.

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
#![cfg(feature = "http")]

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use std::fs;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tally::http::{LoadClient, LoadConfig, router, run_load};
use tally::storage::{CounterStore, FileCounter, InMemoryCounter};
use tempfile::TempDir;
use tower::ServiceExt;

async fn get(store: Arc<dyn CounterStore>, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = router(store)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_inc_then_count() {
    let store: Arc<dyn CounterStore> = Arc::new(InMemoryCounter::new());

    for _ in 0..3 {
        let (status, body) = get(Arc::clone(&store), "/inc").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    let (status, body) = get(Arc::clone(&store), "/count").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 3);
}

#[tokio::test]
async fn test_closed_store_is_503() {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn CounterStore> =
        Arc::new(FileCounter::new(dir.path().join("counter.txt")).unwrap());
    store.close().unwrap();

    let (status, body) = get(store, "/inc").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("closed"));
}

#[tokio::test]
async fn test_corrupt_store_is_500() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("counter.txt");
    fs::write(&path, "garbage").unwrap();
    let store: Arc<dyn CounterStore> = Arc::new(FileCounter::new(&path).unwrap());

    let (status, body) = get(store, "/count").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let store: Arc<dyn CounterStore> = Arc::new(InMemoryCounter::new());
    let response = router(store)
        .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

/// Serves `store` on an ephemeral port from a background thread.
fn spawn_server(store: Arc<dyn CounterStore>) -> String {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            tx.send(listener.local_addr().unwrap()).unwrap();
            axum::serve(listener, router(store)).await.unwrap();
        });
    });
    let addr = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    format!("http://{addr}")
}

#[test]
fn test_load_rounds_add_up() {
    let store: Arc<dyn CounterStore> = Arc::new(InMemoryCounter::new());
    let url = spawn_server(Arc::clone(&store));

    let rounds = run_load(&LoadConfig {
        url,
        clients: vec![1, 4],
        requests_per_client: 25,
        timeout: Duration::from_secs(5),
    })
    .unwrap();

    assert_eq!(rounds.len(), 2);
    assert_eq!(rounds[0].check.expected_delta, 25);
    assert_eq!(rounds[1].check.expected_delta, 100);
    for round in &rounds {
        assert_eq!(round.errors, 0, "{round}");
        assert!(round.check.matches(), "{round}");
    }
    assert_eq!(store.read().unwrap(), 125);
}

#[test]
fn test_client_reads_count() {
    let store: Arc<dyn CounterStore> = Arc::new(InMemoryCounter::new());
    store.increment().unwrap();
    let url = spawn_server(store);

    let client = LoadClient::new(&url, Duration::from_secs(5)).unwrap();
    assert_eq!(client.count().unwrap(), 1);
    client.increment().unwrap();
    assert_eq!(client.count().unwrap(), 2);
}
