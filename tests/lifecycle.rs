//! End-to-end lifecycle tests over real sockets.

use std::time::{Duration, Instant};

use axum::{routing::get, Router};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use idcard_api::config::Environment;
use idcard_api::database::{ConnectionStatus, DbError};
use idcard_api::lifecycle::{Lifecycle, Phase, StartupError};
use idcard_api::routes::RouteGroups;

mod common;

#[tokio::test]
async fn production_starts_without_database() {
    let root = tempfile::tempdir().unwrap();
    let runtime = common::runtime(&[("NODE_ENV", "production")]);
    let db = common::fake_manager(None, Environment::Production, common::event_log());
    let mut server = common::TestServer::start(Lifecycle::new(
        runtime,
        common::settings(root.path()),
        db,
    ));
    let client = common::client();

    let health = client.get(server.url("/api/health").await).send().await.unwrap();
    assert_eq!(health.status(), 200);
    assert_eq!(
        health.headers().get("cache-control").unwrap(),
        "public, max-age=30"
    );
    let body: Value = health.json().await.unwrap();
    assert!(body["uptime"].as_f64().unwrap() >= 0.0);
    assert_eq!(body["database"], "error");

    let players = client.get(server.url("/api/players").await).send().await.unwrap();
    assert_eq!(players.status(), 503);
    let body: Value = players.json().await.unwrap();
    assert_eq!(body["success"], false);

    // Startup created the uploads directory.
    assert!(root.path().join("uploads").is_dir());

    assert_eq!(server.handle.phase(), Phase::Listening);
    let mut handle = server.handle.clone();
    server.shutdown().await.unwrap();
    handle.stopped().await;
    assert_eq!(handle.phase(), Phase::Stopped);
}

#[tokio::test]
async fn development_without_uri_never_binds() {
    let root = tempfile::tempdir().unwrap();
    let runtime = common::runtime(&[("NODE_ENV", "development")]);
    let log = common::event_log();
    let db = common::fake_manager(None, Environment::Development, log.clone());
    let lifecycle = Lifecycle::new(runtime, common::settings(root.path()), db);
    let handle = lifecycle.handle();

    let result = lifecycle.run(std::future::pending()).await;

    assert!(matches!(
        result,
        Err(StartupError::Database(DbError::MissingUri))
    ));
    assert_eq!(handle.local_addr(), None);
    assert_eq!(handle.phase(), Phase::Stopped);
    assert_eq!(log.lock().unwrap().len(), 1);
    assert!(log.lock().unwrap()[0].starts_with("database error"));
}

#[tokio::test]
async fn staging_database_failure_is_fatal() {
    let root = tempfile::tempdir().unwrap();
    let runtime = common::runtime(&[("NODE_ENV", "staging")]);
    let db = idcard_api::database::ConnectionManagerBuilder::new(Box::new(common::FakeConnector {
        fail: true,
        ..Default::default()
    }))
    .uri(Some("mongodb://db.internal/cards".to_string()))
    .environment(runtime.environment.clone())
    .build();

    let lifecycle = Lifecycle::new(runtime, common::settings(root.path()), db);
    let handle = lifecycle.handle();
    let result = lifecycle.run(std::future::pending()).await;

    assert!(matches!(result, Err(StartupError::Database(DbError::Timeout(_)))));
    assert_eq!(handle.local_addr(), None);
}

#[tokio::test]
async fn shutdown_drains_requests_before_closing_database() {
    let root = tempfile::tempdir().unwrap();
    let log = common::event_log();
    let runtime = common::runtime(&[]);
    let db = common::fake_manager(Some("mongodb://db.internal/cards"), Environment::Development, log.clone());

    let request_log = log.clone();
    let players = Router::new().route(
        "/slow",
        get(move || {
            let request_log = request_log.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(1000)).await;
                request_log.lock().unwrap().push("request finished".to_string());
                "done"
            }
        }),
    );
    let lifecycle = Lifecycle::new(runtime, common::settings(root.path()), db).with_route_groups(
        RouteGroups {
            players,
            ..RouteGroups::default()
        },
    );
    let database = lifecycle.database();
    let mut server = common::TestServer::start(lifecycle);
    let addr = server.addr().await;
    assert_eq!(database.status(), ConnectionStatus::Connected);

    let url = server.url("/api/players/slow").await;
    let in_flight = tokio::spawn(async move { common::client().get(url).send().await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut watch = server.handle.watch();
    server.terminate();
    watch
        .wait_for(|phase| *phase >= Phase::ShuttingDown)
        .await
        .unwrap();

    // New connections are refused while the slow request is still running.
    let deadline = Instant::now() + Duration::from_millis(500);
    let refused = loop {
        if TcpStream::connect(addr).await.is_err() {
            break true;
        }
        if Instant::now() >= deadline {
            break false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    assert!(refused, "listener still accepting during shutdown");
    assert!(!in_flight.is_finished());

    let response = in_flight.await.unwrap().unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "done");

    server.join().await.unwrap();
    assert_eq!(database.status(), ConnectionStatus::Disconnected);
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "database connected".to_string(),
            "request finished".to_string(),
            "database disconnected".to_string(),
        ]
    );

    // The listening socket is gone.
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn idle_keep_alive_connections_are_closed() {
    let root = tempfile::tempdir().unwrap();
    let mut settings = common::settings(root.path());
    settings.listener.keep_alive_timeout_secs = 1;
    settings.listener.headers_timeout_secs = 2;

    let runtime = common::runtime(&[("NODE_ENV", "production")]);
    let db = common::fake_manager(None, Environment::Production, common::event_log());
    let mut server = common::TestServer::start(Lifecycle::new(runtime, settings, db));
    let addr = server.addr().await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /api/test HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();

    // Read the response, then keep reading until the server hangs up.
    let started = Instant::now();
    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    let closed = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => received.extend_from_slice(&buf[..n]),
            }
        }
    })
    .await;

    assert!(closed.is_ok(), "idle connection was not closed");
    assert!(started.elapsed() >= Duration::from_millis(900));
    assert!(String::from_utf8_lossy(&received).starts_with("HTTP/1.1 200"));

    server.shutdown().await.unwrap();
}
