//! End-to-end scenarios over real WebSocket connections, one per testable
//! property named in the specification: happy path, re-edit re-pinning, a
//! missing desktop, a browser that disappears mid-edit, CRLF normalization,
//! and rate-limit enforcement.

mod setup;

use std::time::Duration;

use axum::extract::ws::{Message, close_code};
use serde_json::{Value, json};
use setup::{test_config, test_server};

#[tokio::test]
async fn happy_path_routes_edit_request_and_code_update() {
    let config = test_config();
    let path = config.server.websocket_endpoint.clone();
    let server = test_server(config);

    let mut desktop = server.get_websocket(&path).await.into_websocket().await;
    desktop
        .send_json(&json!({"type":"desktop_connect","connectionId":"D1","userId":"alice"}))
        .await;
    let ack: Value = desktop.receive_json().await;
    assert_eq!(ack["type"], "connection_ack");
    assert_eq!(ack["role"], "desktop");
    let status: Value = desktop.receive_json().await;
    assert_eq!(status["type"], "status_update");
    assert_eq!(status["browserConnected"], false);

    let mut browser = server.get_websocket(&path).await.into_websocket().await;
    browser
        .send_json(&json!({"type":"browser_connect","connectionId":"B1","userId":"alice"}))
        .await;
    let ack: Value = browser.receive_json().await;
    assert_eq!(ack["role"], "browser");
    let status: Value = browser.receive_json().await;
    assert_eq!(status["desktopConnected"], true);

    // The desktop is told a browser showed up for its user too.
    let status: Value = desktop.receive_json().await;
    assert_eq!(status["type"], "status_update");
    assert_eq!(status["browserConnected"], true);

    browser
        .send_json(&json!({
            "type": "edit_request",
            "connectionId": "B1",
            "userId": "alice",
            "snippetId": "t1",
            "code": "x=1\n",
            "fileType": "js",
        }))
        .await;

    let forwarded: Value = desktop.receive_json().await;
    assert_eq!(forwarded["type"], "edit_request");
    assert_eq!(forwarded["snippetId"], "t1");
    assert_eq!(forwarded["code"], "x=1\n");

    desktop
        .send_json(&json!({
            "type": "code_update",
            "connectionId": "D1",
            "userId": "alice",
            "snippetId": "t1",
            "code": "x=2\n",
        }))
        .await;

    let update: Value = browser.receive_json().await;
    assert_eq!(update["type"], "code_update");
    assert_eq!(update["snippetId"], "t1");
    assert_eq!(update["code"], "x=2\n");
}

#[tokio::test]
async fn re_edit_repins_code_update_to_latest_browser() {
    let config = test_config();
    let path = config.server.websocket_endpoint.clone();
    let server = test_server(config);

    let mut desktop = server.get_websocket(&path).await.into_websocket().await;
    desktop
        .send_json(&json!({"type":"desktop_connect","connectionId":"D1","userId":"alice"}))
        .await;
    let _: Value = desktop.receive_json().await; // connection_ack
    let _: Value = desktop.receive_json().await; // status_update (no browsers yet)

    let mut b1 = server.get_websocket(&path).await.into_websocket().await;
    b1.send_json(&json!({"type":"browser_connect","connectionId":"B1","userId":"alice"}))
        .await;
    let _: Value = b1.receive_json().await; // connection_ack
    let _: Value = b1.receive_json().await; // status_update
    let _: Value = desktop.receive_json().await; // status_update: B1 arrived

    b1.send_json(&json!({
        "type": "edit_request",
        "connectionId": "B1",
        "userId": "alice",
        "snippetId": "t1",
        "code": "x=1\n",
        "fileType": "js",
    }))
    .await;
    let first_edit: Value = desktop.receive_json().await;
    assert_eq!(first_edit["code"], "x=1\n");

    let mut b2 = server.get_websocket(&path).await.into_websocket().await;
    b2.send_json(&json!({"type":"browser_connect","connectionId":"B2","userId":"alice"}))
        .await;
    let _: Value = b2.receive_json().await; // connection_ack
    let _: Value = b2.receive_json().await; // status_update
    let _: Value = desktop.receive_json().await; // status_update: B2 arrived

    b2.send_json(&json!({
        "type": "edit_request",
        "connectionId": "B2",
        "userId": "alice",
        "snippetId": "t1",
        "code": "y=3\n",
        "fileType": "js",
    }))
    .await;
    let second_edit: Value = desktop.receive_json().await;
    assert_eq!(second_edit["code"], "y=3\n");

    desktop
        .send_json(&json!({
            "type": "code_update",
            "connectionId": "D1",
            "userId": "alice",
            "snippetId": "t1",
            "code": "z=9\n",
        }))
        .await;

    // B2 re-pinned the session; it receives the update, not B1.
    let update: Value = b2.receive_json().await;
    assert_eq!(update["code"], "z=9\n");
}

#[tokio::test]
async fn missing_desktop_yields_error_and_creates_no_session() {
    let config = test_config();
    let path = config.server.websocket_endpoint.clone();
    let server = test_server(config);

    let mut browser = server.get_websocket(&path).await.into_websocket().await;
    browser
        .send_json(&json!({"type":"browser_connect","connectionId":"B1","userId":"alice"}))
        .await;
    let _: Value = browser.receive_json().await; // connection_ack
    let _: Value = browser.receive_json().await; // status_update: no desktop

    browser
        .send_json(&json!({
            "type": "edit_request",
            "connectionId": "B1",
            "userId": "alice",
            "snippetId": "t1",
            "code": "x=1\n",
            "fileType": "js",
        }))
        .await;

    let error: Value = browser.receive_json().await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "NO_DESKTOP");
    assert!(error["message"].as_str().unwrap().contains("desktop"));
}

#[tokio::test]
async fn browser_gone_sends_info_to_desktop_and_nothing_to_any_browser() {
    let config = test_config();
    let path = config.server.websocket_endpoint.clone();
    let server = test_server(config);

    let mut desktop = server.get_websocket(&path).await.into_websocket().await;
    desktop
        .send_json(&json!({"type":"desktop_connect","connectionId":"D1","userId":"alice"}))
        .await;
    let _: Value = desktop.receive_json().await;
    let _: Value = desktop.receive_json().await;

    let mut browser = server.get_websocket(&path).await.into_websocket().await;
    browser
        .send_json(&json!({"type":"browser_connect","connectionId":"B1","userId":"alice"}))
        .await;
    let _: Value = browser.receive_json().await;
    let _: Value = browser.receive_json().await;
    let _: Value = desktop.receive_json().await;

    browser
        .send_json(&json!({
            "type": "edit_request",
            "connectionId": "B1",
            "userId": "alice",
            "snippetId": "t1",
            "code": "x=1\n",
            "fileType": "js",
        }))
        .await;
    let _: Value = desktop.receive_json().await; // the forwarded edit_request

    // The browser goes away mid-edit.
    browser.close().await;
    // Give the server's connection task time to observe EOF and deregister.
    tokio::time::sleep(Duration::from_millis(100)).await;

    desktop
        .send_json(&json!({
            "type": "code_update",
            "connectionId": "D1",
            "userId": "alice",
            "snippetId": "t1",
            "code": "x=2\n",
        }))
        .await;

    let info: Value = desktop.receive_json().await;
    assert_eq!(info["type"], "info");
    assert_eq!(info["snippetId"], "t1");
    assert!(
        info["message"]
            .as_str()
            .unwrap()
            .contains("no longer connected")
    );
}

#[tokio::test]
async fn crlf_and_bare_cr_are_normalized_before_routing() {
    let config = test_config();
    let path = config.server.websocket_endpoint.clone();
    let server = test_server(config);

    let mut desktop = server.get_websocket(&path).await.into_websocket().await;
    desktop
        .send_json(&json!({"type":"desktop_connect","connectionId":"D1","userId":"alice"}))
        .await;
    let _: Value = desktop.receive_json().await;
    let _: Value = desktop.receive_json().await;

    let mut browser = server.get_websocket(&path).await.into_websocket().await;
    browser
        .send_json(&json!({"type":"browser_connect","connectionId":"B1","userId":"alice"}))
        .await;
    let _: Value = browser.receive_json().await;
    let _: Value = browser.receive_json().await;
    let _: Value = desktop.receive_json().await;

    browser
        .send_json(&json!({
            "type": "edit_request",
            "connectionId": "B1",
            "userId": "alice",
            "snippetId": "t1",
            "code": "a\r\nb\rc",
            "fileType": "txt",
        }))
        .await;

    let forwarded: Value = desktop.receive_json().await;
    assert_eq!(forwarded["code"], "a\nb\nc");
}

#[tokio::test]
async fn fourth_connection_within_the_window_is_rate_limited() {
    let mut config = test_config();
    config.security.rate_limiting.enabled = true;
    config.security.rate_limiting.max_requests = 3;
    config.security.rate_limiting.window = Duration::from_secs(60);
    let path = config.server.websocket_endpoint.clone();
    let server = test_server(config);

    for n in 0..3 {
        let mut ws = server.get_websocket(&path).await.into_websocket().await;
        // Prove the connection was actually admitted: a ping before any
        // role is established still gets a reply, just not a pong.
        ws.send_json(&json!({"type":"ping","connectionId": format!("c{n}")}))
            .await;
        let reply: Value = ws.receive_json().await;
        assert_eq!(reply["type"], "error");
    }

    let mut fourth = server.get_websocket(&path).await.into_websocket().await;
    match fourth.receive_message().await {
        Message::Close(Some(frame)) => assert_eq!(frame.code, close_code::POLICY),
        other => panic!("expected a policy-violation close frame, got {other:?}"),
    }
}
