//! Transport tests against loopback HTTP and WebSocket servers.

use std::sync::Arc;
use std::time::Duration;

use atomic_core::{
    Agent, AtomicError, CommitBuilder, HttpClient, PushConnector, Store, urls,
};
use atomic_net::{ReqwestClient, WebSocketConnector};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

fn client() -> ReqwestClient {
    ReqwestClient::with_client(reqwest::Client::builder().no_proxy().build().unwrap())
}

/// Answers a single HTTP request and returns the raw request text.
fn serve_once(listener: TcpListener, status: &'static str, body: String) -> JoinHandle<String> {
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            request.extend_from_slice(&buf[..n]);
            if n == 0 || request_complete(&request) {
                break;
            }
        }
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/ad+json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.unwrap();
        String::from_utf8_lossy(&request).into_owned()
    })
}

fn request_complete(request: &[u8]) -> bool {
    let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") else {
        return false;
    };
    let head = String::from_utf8_lossy(&request[..end]).to_lowercase();
    let length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    request.len() >= end + 4 + length
}

#[tokio::test]
async fn get_sends_headers_and_returns_body() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/thing", listener.local_addr().unwrap());
    let server = serve_once(listener, "200 OK", r#"{"hello": "world"}"#.to_string());

    let response = client()
        .get(&url, &[("Accept".into(), urls::JSON_AD_MIME.into())])
        .await
        .unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.body, r#"{"hello": "world"}"#);

    let request = server.await.unwrap().to_lowercase();
    assert!(request.starts_with("get /thing http/1.1"));
    assert!(request.contains("accept: application/ad+json"));
}

#[tokio::test]
async fn post_sends_body_and_keeps_error_status() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/commit", listener.local_addr().unwrap());
    let server = serve_once(listener, "401 Unauthorized", "no rights".to_string());

    let response = client()
        .post(&url, &[], "{\"a\":1}".to_string())
        .await
        .unwrap();
    assert_eq!(response.status, 401);
    assert!(matches!(
        response.into_body(&url),
        Err(AtomicError::Unauthorized(m)) if m.contains("no rights")
    ));

    let request = server.await.unwrap();
    assert!(request.ends_with("{\"a\":1}"));
}

#[tokio::test]
async fn unreachable_server_is_a_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/gone", listener.local_addr().unwrap());
    drop(listener);

    let err = client().get(&url, &[]).await.unwrap_err();
    assert!(matches!(err, AtomicError::Network(_)));
}

#[tokio::test]
async fn websocket_frames_flow_both_ways() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
        let first = ws.next().await.unwrap().unwrap();
        ws.send(Message::Text("COMMIT {}".into())).await.unwrap();
        first.into_text().unwrap().as_str().to_owned()
    });

    let mut connection = WebSocketConnector.connect(&url).await.unwrap();
    connection
        .outgoing
        .send("SUBSCRIBE https://example.com/a".into())
        .unwrap();
    let frame = timeout(Duration::from_secs(5), connection.incoming.recv())
        .await
        .unwrap();
    assert_eq!(frame.as_deref(), Some("COMMIT {}"));
    assert_eq!(server.await.unwrap(), "SUBSCRIBE https://example.com/a");
}

#[tokio::test]
async fn refused_websocket_is_a_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    drop(listener);

    assert!(matches!(
        WebSocketConnector.connect(&url).await,
        Err(AtomicError::Network(_))
    ));
}

#[tokio::test]
async fn store_fetches_over_http_and_follows_pushed_commits() {
    let http = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let subject = format!("http://{}/doc", http.local_addr().unwrap());
    let body = json!({ "@id": subject, (urls::NAME): "Before" }).to_string();
    let http_server = serve_once(http, "200 OK", body);

    let agent = Agent::generate(Some("http://localhost/agents/test".into()));
    let mut builder = CommitBuilder::new(subject.clone());
    builder.set(urls::NAME, json!("After"));
    let commit = builder.sign(&agent, 1).unwrap().to_json_ad();

    let push = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server_url = format!("http://{}", push.local_addr().unwrap());
    let expected_subscribe = format!("SUBSCRIBE {subject}");
    let push_server = tokio::spawn(async move {
        let (socket, _) = push.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
        let subscribe = ws.next().await.unwrap().unwrap();
        assert_eq!(subscribe.into_text().unwrap().as_str(), expected_subscribe);
        ws.send(Message::Text(format!("COMMIT {commit}").into()))
            .await
            .unwrap();
        // Keep the socket open until the client is done.
        let _ = ws.next().await;
    });

    let store = Store::new(&server_url, Arc::new(client())).unwrap();
    store.set_agent(Some(agent));

    let resource = store.get_resource_async(&subject).await;
    assert!(resource.is_ready(), "{:?}", resource.get_error());
    http_server.await.unwrap();

    let mut waiter = store.wait_for_update(&subject);
    store.set_push_connector(Arc::new(WebSocketConnector)).await;

    let updated = timeout(Duration::from_secs(5), waiter.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.get(urls::NAME).unwrap().as_str().unwrap(), "After");

    store.shutdown();
    push_server.abort();
}
