//! HTTP surface and topic wiring over a temporary store.

use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use linesync_core::{ConnectionId, PollerStatus, SledStore, TickOutcome};
use linesync_server::config::ServerConfig;
use linesync_server::create_router;
use linesync_server::line::{PrintLogRow, PRINT_LOG_TABLE, SEQUENCE_TABLE};
use linesync_server::routes::sequences::BOARD_CACHE_KEY;
use linesync_server::state::AppState;
use linesync_server::topics::{CALLS, SEQUENCES};

fn state() -> AppState {
    AppState::new(ServerConfig::default(), SledStore::temporary().unwrap()).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, body)
}

#[tokio::test]
async fn health_reports_topics() {
    let app = create_router(state());

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 0);
    assert_eq!(body["topics"]["sequences"]["members"], 0);
    assert_eq!(body["topics"]["calls"]["poller"], "idle");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn metrics_are_prometheus_text() {
    let app = create_router(state());

    let response = app.clone().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
}

#[tokio::test]
async fn sequence_reads_are_cached_until_a_mutation() {
    let state = state();
    let app = create_router(state.clone());

    let (status, body) = send(&app, get("/api/sequences")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["current"], Value::Null);
    assert!(state.cache.get::<Value>(BOARD_CACHE_KEY).await.is_some());

    // A write behind the cache's back is not visible until invalidation.
    state.line.create_sequence("LI", "HIDDEN").unwrap();
    let (_, body) = send(&app, get("/api/sequences")).await;
    assert_eq!(body["data"]["current"], Value::Null);

    let (status, created) = send(
        &app,
        json_request(
            "POST",
            "/api/sequences",
            json!({"FTYPE_BATTERY": "LI", "FMODEL_BATTERY": "BATT-72V"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["data"]["FMODEL_BATTERY"], "BATT-72V");
    assert!(state.cache.get::<Value>(BOARD_CACHE_KEY).await.is_none());

    let (_, body) = send(&app, get("/api/sequences")).await;
    assert_eq!(body["data"]["current"]["FMODEL_BATTERY"], "HIDDEN");
    assert_eq!(body["data"]["queue"][0]["FMODEL_BATTERY"], "BATT-72V");
}

#[tokio::test]
async fn create_sequence_rejects_blank_model() {
    let app = create_router(state());

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/api/sequences",
            json!({"FTYPE_BATTERY": "LI", "FMODEL_BATTERY": "  "}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn park_unknown_sequence_is_not_found() {
    let state = state();
    let app = create_router(state.clone());

    let (status, body) = send(
        &app,
        json_request("PATCH", "/api/sequences/77/park", Value::Null),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let row = state.line.create_sequence("LI", "BATT-48V").unwrap();
    let (status, body) = send(
        &app,
        json_request("PATCH", &format!("/api/sequences/{}/park", row.fid), Value::Null),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["FSTATUS"], 3);
}

#[tokio::test]
async fn print_history_pages_are_keyed_by_parameters() {
    let state = state();
    let app = create_router(state.clone());
    let day = chrono::NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    for fid in 1..=3 {
        state
            .line
            .put_print_log(&PrintLogRow {
                fid,
                print_qrcode: Some(format!("QR-{}", fid)),
                prod_date: day,
                fshift: Some("1".into()),
                datetime_modified: None,
                datetime_received: None,
                fmodel_battery: None,
            })
            .unwrap();
    }

    let (status, first) = send(
        &app,
        get("/api/print-history?from=2024-03-01&to=2024-03-01&page=1&limit=2"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["data"]["total"], 3);
    assert_eq!(first["data"]["items"].as_array().unwrap().len(), 2);

    let (_, second) = send(
        &app,
        get("/api/print-history?from=2024-03-01&to=2024-03-01&page=2&limit=2"),
    )
    .await;
    assert_eq!(second["data"]["items"].as_array().unwrap().len(), 1);

    let cached = state
        .cache
        .get::<Value>("print_history:from=2024-03-01:to=2024-03-01:page=2:limit=2")
        .await;
    assert!(cached.is_some());

    let (status, body) = send(
        &app,
        get("/api/print-history?from=2024-03-02&to=2024-03-01"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn andon_call_patch_invalidates_reads() {
    let state = state();
    let app = create_router(state.clone());

    let (_, body) = send(&app, get("/api/andon/calls")).await;
    assert_eq!(body["data"], json!([]));

    let (status, body) = send(
        &app,
        json_request(
            "PATCH",
            "/api/andon/calls/ST-03",
            json!({"call_type": "QUALITY", "active": true}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["active"], true);

    let (_, body) = send(&app, get("/api/andon/calls")).await;
    assert_eq!(
        body["data"],
        json!([{"station": "ST-03", "call_type": "QUALITY"}])
    );
}

#[tokio::test]
async fn unknown_kpi_is_not_found() {
    let app = create_router(state());

    let (status, _) = send(
        &app,
        json_request("PUT", "/api/andon/summary/speed", json!({"value": 1.0})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &app,
        json_request("PUT", "/api/andon/summary/target", json!({"value": 120.0})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["Target"], 120.0);
}

#[tokio::test]
async fn subscribers_receive_snapshot_and_broadcast() {
    let state = state();
    let conn = ConnectionId::from("dashboard-1");
    let mut rx = state.rooms.register(conn.clone());

    state.manager.subscribe(&conn, CALLS).await.unwrap();
    let initial = rx.recv().await.unwrap();
    assert_eq!(initial.event, "calls:update");
    assert_eq!(initial.data, json!([]));

    state.line.set_call("ST-01", "MATERIAL", true).unwrap();
    let poller = state.manager.poller(CALLS).unwrap();
    assert!(matches!(
        poller.tick().await.unwrap(),
        TickOutcome::Broadcast { changes: 1, delivered: 1, .. }
    ));

    let update = rx.recv().await.unwrap();
    assert_eq!(
        update.data,
        json!([{"station": "ST-01", "call_type": "MATERIAL"}])
    );

    state.manager.disconnect(&conn).await;
    state.rooms.unregister(&conn);
    assert_eq!(poller.status(), PollerStatus::Stopped);
}

#[tokio::test]
async fn sequence_changes_drop_cached_board() {
    let state = state();
    let app = create_router(state.clone());
    let conn = ConnectionId::from("board");
    let _rx = state.rooms.register(conn.clone());
    state.manager.subscribe(&conn, SEQUENCES).await.unwrap();

    send(&app, get("/api/sequences")).await;
    assert!(state.cache.get::<Value>(BOARD_CACHE_KEY).await.is_some());

    // Written directly, so only the topic hook can invalidate.
    state.line.create_sequence("LI", "BATT-48V").unwrap();
    let changes = state
        .line
        .store()
        .changes()
        .changes_since(SEQUENCE_TABLE, 0)
        .unwrap();
    assert_eq!(changes.len(), 1);

    let poller = state.manager.poller(SEQUENCES).unwrap();
    poller.tick().await.unwrap();
    assert!(state.cache.get::<Value>(BOARD_CACHE_KEY).await.is_none());

    let (_, body) = send(&app, get("/api/sequences")).await;
    assert_eq!(body["data"]["current"]["FMODEL_BATTERY"], "BATT-48V");
    state.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_topic_is_rejected() {
    let state = state();
    let conn = ConnectionId::from("lost");
    let _rx = state.rooms.register(conn.clone());

    let err = state.manager.subscribe(&conn, "nope").await.unwrap_err();
    assert!(matches!(err, linesync_core::Error::UnknownTopic(_)));
}

#[tokio::test]
async fn state_reopens_from_data_path() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        data_path: dir.path().to_path_buf(),
        ..ServerConfig::default()
    };

    {
        let state = AppState::open(config.clone()).unwrap();
        let conn = ConnectionId::from("first-run");
        let _rx = state.rooms.register(conn.clone());
        state.manager.subscribe(&conn, SEQUENCES).await.unwrap();

        state.line.create_sequence("LI", "BATT-48V").unwrap();
        let poller = state.manager.poller(SEQUENCES).unwrap();
        assert!(matches!(
            poller.tick().await.unwrap(),
            TickOutcome::Broadcast { changes: 1, .. }
        ));
        state.shutdown().await.unwrap();
    }

    let state = AppState::open(config).unwrap();
    let board = state.line.sequence_board().unwrap();
    assert_eq!(board.current.unwrap().fmodel_battery, "BATT-48V");

    // The processed change is behind the persisted cursor.
    let poller = state.manager.poller(SEQUENCES).unwrap();
    poller.start().await.unwrap();
    assert_eq!(poller.tick().await.unwrap(), TickOutcome::Idle);
    state.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn processed_changes_are_truncated_in_background() {
    let config = ServerConfig {
        maintenance_interval: Duration::from_secs(60),
        ..ServerConfig::default()
    };
    let state = AppState::new(config, SledStore::temporary().unwrap()).unwrap();
    let conn = ConnectionId::from("board");
    let _rx = state.rooms.register(conn.clone());
    state.manager.subscribe(&conn, SEQUENCES).await.unwrap();

    state.line.create_sequence("LI", "BATT-48V").unwrap();
    state
        .line
        .put_print_log(&PrintLogRow {
            fid: 1,
            print_qrcode: Some("QR-1".into()),
            prod_date: chrono::NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            fshift: None,
            datetime_modified: None,
            datetime_received: None,
            fmodel_battery: None,
        })
        .unwrap();
    state.manager.poller(SEQUENCES).unwrap().tick().await.unwrap();

    let changes = state.line.store().changes();
    assert_eq!(changes.changes_since(SEQUENCE_TABLE, 0).unwrap().len(), 1);
    assert_eq!(changes.changes_since(PRINT_LOG_TABLE, 0).unwrap().len(), 1);

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(changes.changes_since(SEQUENCE_TABLE, 0).unwrap().is_empty());
    assert!(changes.changes_since(PRINT_LOG_TABLE, 0).unwrap().is_empty());

    state.shutdown().await.unwrap();
}
