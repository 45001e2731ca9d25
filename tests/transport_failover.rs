//! Panel transport: channel exchange, breaker, fallback and conditional fetch.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nodegate::panel::envelope::ResponseEnvelope;
use nodegate::panel::user::{ALIVE_LIST_PATH, PUSH_PATH, USER_PATH};
use nodegate::panel::{
    Fetched, NodeApi, PanelError, PanelRequest, Transport, TransportClient, UserTraffic,
};
use nodegate::resilience::ChannelState;

mod common;
use common::{api_config, closed_port, MockPanel, MockReply, WsPanel, WsReply};

const USERS: &str = r#"{"users":[{"id":1,"uuid":"u-1","speed_limit":0,"device_limit":2}]}"#;

#[tokio::test]
async fn test_channel_exchange_returns_exact_body() {
    let body: Vec<u8> = vec![0x00, 0xff, 0x10, b'{', 0x80];
    let expected = body.clone();
    let ws = WsPanel::start(move |_| WsReply::ok(&body)).await;
    let http = MockPanel::start(|_| MockReply::ok("fallback")).await;

    let client = TransportClient::new(&api_config(&http.url(), &ws.url())).unwrap();
    let response = client
        .request(PanelRequest::post("/api/v1/raw", b"payload".to_vec()).header("X-Trace", "1"))
        .await
        .unwrap();

    assert_eq!(response.transport, Transport::Channel);
    assert_eq!(response.status, 200);
    assert_eq!(response.body, expected);
    assert_eq!(client.channel_state(), ChannelState::Available);
    assert_eq!(http.request_count(), 0);

    let seen = ws.requests();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, "POST");
    assert_eq!(seen[0].path, "/api/v1/raw");
    assert_eq!(seen[0].body, b"payload".to_vec());
    assert_eq!(seen[0].headers["X-Trace"], vec!["1".to_string()]);
}

#[tokio::test]
async fn test_channel_connection_is_reused() {
    let ws = WsPanel::start(|_| WsReply::ok(USERS.as_bytes())).await;
    let http = MockPanel::start(|_| MockReply::ok(USERS)).await;
    let client = TransportClient::new(&api_config(&http.url(), &ws.url())).unwrap();

    for _ in 0..3 {
        let response = client.request(PanelRequest::get(USER_PATH)).await.unwrap();
        assert_eq!(response.transport, Transport::Channel);
    }
    assert_eq!(ws.request_count(), 3);
    assert_eq!(ws.connection_count(), 1);
}

#[tokio::test]
async fn test_fallback_when_channel_unreachable() {
    let http = MockPanel::start(|_| MockReply::ok(USERS)).await;
    let ws_url = format!("ws://127.0.0.1:{}", closed_port().await);
    let client = TransportClient::new(&api_config(&http.url(), &ws_url)).unwrap();

    let response = client.request(PanelRequest::get(USER_PATH)).await.unwrap();
    assert_eq!(response.transport, Transport::Fallback);
    assert_eq!(response.body, USERS.as_bytes().to_vec());
    assert_eq!(client.channel_state(), ChannelState::Unavailable);

    let seen = http.requests();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].path, USER_PATH);
    assert_eq!(seen[0].query, "node_id=1&node_type=vmess&token=test-token");
}

#[tokio::test]
async fn test_malformed_reply_counts_as_channel_failure() {
    let ws = WsPanel::start(|_| WsReply::Raw("not an envelope".into())).await;
    let http = MockPanel::start(|_| MockReply::ok(USERS)).await;
    let client = TransportClient::new(&api_config(&http.url(), &ws.url())).unwrap();

    let response = client.request(PanelRequest::get(USER_PATH)).await.unwrap();
    assert_eq!(response.transport, Transport::Fallback);
    // first exchange plus one retry on a fresh connection
    assert_eq!(ws.request_count(), 2);
    assert_eq!(ws.connection_count(), 2);
    assert_eq!(client.channel_state(), ChannelState::Unavailable);
}

#[tokio::test]
async fn test_channel_retried_once_after_peer_close() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let ws = WsPanel::start(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            WsReply::Close
        } else {
            WsReply::ok(b"second")
        }
    })
    .await;
    let http = MockPanel::start(|_| MockReply::ok("fallback")).await;
    let client = TransportClient::new(&api_config(&http.url(), &ws.url())).unwrap();

    let response = client.request(PanelRequest::get("/x")).await.unwrap();
    assert_eq!(response.transport, Transport::Channel);
    assert_eq!(response.body, b"second".to_vec());
    assert_eq!(http.request_count(), 0);
}

#[tokio::test]
async fn test_breaker_cooldown_then_channel_retried() {
    let http = MockPanel::start(|_| MockReply::ok("fallback")).await;
    let port = closed_port().await;
    let ws_url = format!("ws://127.0.0.1:{port}");
    let client = TransportClient::with_channel_cooldown(
        &api_config(&http.url(), &ws_url),
        Duration::from_millis(300),
    )
    .unwrap();

    let first = client.request(PanelRequest::get("/x")).await.unwrap();
    assert_eq!(first.transport, Transport::Fallback);
    assert_eq!(client.channel_state(), ChannelState::Unavailable);

    let ws = WsPanel::start_on(port, |_| WsReply::ok(b"channel")).await;

    let during = client.request(PanelRequest::get("/x")).await.unwrap();
    assert_eq!(during.transport, Transport::Fallback);
    assert_eq!(ws.connection_count(), 0);

    tokio::time::sleep(Duration::from_millis(400)).await;

    let after = client.request(PanelRequest::get("/x")).await.unwrap();
    assert_eq!(after.transport, Transport::Channel);
    assert_eq!(after.body, b"channel".to_vec());
    assert_eq!(client.channel_state(), ChannelState::Available);
}

#[tokio::test]
async fn test_fallback_retries_server_errors() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let http = MockPanel::start(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
            MockReply::status(503, "busy")
        } else {
            MockReply::ok("{}")
        }
    })
    .await;
    let ws_url = format!("ws://127.0.0.1:{}", closed_port().await);
    let client = TransportClient::new(&api_config(&http.url(), &ws_url)).unwrap();

    let response = client.request(PanelRequest::get("/x")).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(http.request_count(), 3);
}

#[tokio::test]
async fn test_traffic_push_not_replayed_on_server_error() {
    let http = MockPanel::start(|_| MockReply::status(503, "gateway timeout")).await;
    let ws_url = format!("ws://127.0.0.1:{}", closed_port().await);
    let api = NodeApi::new(TransportClient::new(&api_config(&http.url(), &ws_url)).unwrap());

    let traffic = [UserTraffic {
        uid: 7,
        upload: 10,
        download: 20,
    }];
    let err = api.report_user_traffic(&traffic).await.unwrap_err();
    assert!(matches!(err, PanelError::Status { status: 503, .. }));

    let seen = http.requests();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].path, PUSH_PATH);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_requests_share_one_channel() {
    let ws = WsPanel::start(|req| WsReply::ok(req.path.as_bytes())).await;
    let http = MockPanel::start(|_| MockReply::ok("fallback")).await;
    let client = Arc::new(TransportClient::new(&api_config(&http.url(), &ws.url())).unwrap());

    let a = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.request(PanelRequest::get("/a")).await }
    });
    let b = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.request(PanelRequest::get("/b")).await }
    });
    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();

    assert_eq!(a.transport, Transport::Channel);
    assert_eq!(b.transport, Transport::Channel);
    assert_eq!(a.body, b"/a".to_vec());
    assert_eq!(b.body, b"/b".to_vec());
    assert_eq!(ws.connection_count(), 1);
    assert_eq!(ws.request_count(), 2);
    assert_eq!(http.request_count(), 0);
}

#[tokio::test]
async fn test_fallback_rejects_other_methods() {
    let http = MockPanel::start(|_| MockReply::ok("{}")).await;
    let ws_url = format!("ws://127.0.0.1:{}", closed_port().await);
    let client = TransportClient::new(&api_config(&http.url(), &ws_url)).unwrap();

    let err = client
        .request(PanelRequest::new("PUT", "/x"))
        .await
        .unwrap_err();
    assert!(matches!(err, PanelError::UnsupportedMethod(_)));
    assert_eq!(http.request_count(), 0);
}

#[tokio::test]
async fn test_not_modified_is_distinct_from_empty_list() {
    let http = MockPanel::start(|req| match req.header("if-none-match") {
        Some("\"v1\"") => MockReply::status(304, ""),
        _ => MockReply::ok(USERS).header("ETag", "\"v1\""),
    })
    .await;
    let ws_url = format!("ws://127.0.0.1:{}", closed_port().await);
    let api = NodeApi::new(TransportClient::new(&api_config(&http.url(), &ws_url)).unwrap());

    let first = api.get_user_list().await.unwrap();
    match first {
        Fetched::Updated(users) => {
            assert_eq!(users.len(), 1);
            assert_eq!(users[0].uuid, "u-1");
            assert_eq!(users[0].device_limit, 2);
        }
        Fetched::Unchanged => panic!("first fetch must carry users"),
    }
    assert_eq!(api.user_etag().as_deref(), Some("\"v1\""));

    let second = api.get_user_list().await.unwrap();
    assert!(second.is_unchanged());

    let seen = http.requests();
    assert_eq!(seen[0].header("if-none-match"), None);
    assert_eq!(seen[0].header("accept"), Some("application/json"));
    assert_eq!(seen[1].header("if-none-match"), Some("\"v1\""));

    let empty = MockPanel::start(|_| MockReply::ok(r#"{"users":[]}"#)).await;
    let api = NodeApi::new(TransportClient::new(&api_config(&empty.url(), &ws_url)).unwrap());
    assert_eq!(api.get_user_list().await.unwrap(), Fetched::Updated(Vec::new()));
}

#[tokio::test]
async fn test_not_modified_over_channel() {
    let ws = WsPanel::start(|req| {
        let mut headers = BTreeMap::new();
        if req.headers.contains_key("If-None-Match") {
            return WsReply::Envelope(ResponseEnvelope {
                status: 304,
                ..Default::default()
            });
        }
        headers.insert("etag".to_string(), vec!["abc".to_string()]);
        WsReply::Envelope(ResponseEnvelope {
            status: 200,
            headers,
            body: USERS.as_bytes().to_vec(),
        })
    })
    .await;
    let http = MockPanel::start(|_| MockReply::ok("fallback")).await;
    let api = NodeApi::new(TransportClient::new(&api_config(&http.url(), &ws.url())).unwrap());

    assert!(matches!(api.get_user_list().await.unwrap(), Fetched::Updated(_)));
    assert_eq!(api.user_etag().as_deref(), Some("abc"));
    assert_eq!(api.get_user_list().await.unwrap(), Fetched::Unchanged);
    assert_eq!(ws.requests()[1].headers["If-None-Match"], vec!["abc".to_string()]);
}

#[tokio::test]
async fn test_status_error_carries_panel_message() {
    let http = MockPanel::start(|_| MockReply::status(403, "token is error")).await;
    let ws_url = format!("ws://127.0.0.1:{}", closed_port().await);
    let api = NodeApi::new(TransportClient::new(&api_config(&http.url(), &ws_url)).unwrap());

    let err = api
        .report_user_traffic(&[UserTraffic { uid: 1, upload: 10, download: 20 }])
        .await
        .unwrap_err();
    match &err {
        PanelError::Status { url, status, body } => {
            assert_eq!(*status, 403);
            assert_eq!(body, "token is error");
            assert!(url.ends_with(PUSH_PATH));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(http.request_count(), 1);
    assert_eq!(http.requests()[0].body, br#"{"1":[10,20]}"#.to_vec());
}

#[tokio::test]
async fn test_alive_list_failures_yield_empty_map() {
    let http = MockPanel::start(|req| {
        if req.path == ALIVE_LIST_PATH {
            MockReply::status(404, "not found")
        } else {
            MockReply::ok("{}")
        }
    })
    .await;
    let ws_url = format!("ws://127.0.0.1:{}", closed_port().await);
    let api = NodeApi::new(TransportClient::new(&api_config(&http.url(), &ws_url)).unwrap());
    assert!(api.get_user_alive().await.is_empty());

    let garbage = MockPanel::start(|_| MockReply::ok("<html>")).await;
    let api = NodeApi::new(TransportClient::new(&api_config(&garbage.url(), &ws_url)).unwrap());
    assert!(api.get_user_alive().await.is_empty());

    let good = MockPanel::start(|_| MockReply::ok(r#"{"alive":{"4":3}}"#)).await;
    let api = NodeApi::new(TransportClient::new(&api_config(&good.url(), &ws_url)).unwrap());
    assert_eq!(api.get_user_alive().await.get(&4), Some(&3));
}

#[tokio::test]
async fn test_online_report_failure_is_swallowed() {
    let http = MockPanel::start(|_| MockReply::status(400, "bad")).await;
    let ws_url = format!("ws://127.0.0.1:{}", closed_port().await);
    let api = NodeApi::new(TransportClient::new(&api_config(&http.url(), &ws_url)).unwrap());

    let mut online = BTreeMap::new();
    online.insert(1u64, vec!["10.0.0.1".to_string()]);
    api.report_online_users(&online).await;

    let seen = http.requests();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, "POST");
    assert_eq!(seen[0].body, br#"{"1":["10.0.0.1"]}"#.to_vec());
}
