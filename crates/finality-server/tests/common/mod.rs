use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use finality_core::net::messages::{
    GroupUpdateMsg, HelloMsg, HostMessage, ServerMessage, WelcomeMsg,
};
use finality_core::net::protocol::{
    PROTOCOL_VERSION, decode_server_message, encode_host_message,
};
use finality_core::participant::{GroupId, ParticipantId};
use finality_core::test_helpers::{at, make_participant};

use finality_server::build_app;
use finality_server::config::{AuthFileConfig, ServerConfig};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    _shutdown: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start a test server with no auth and a fast single-wave trial.
    pub async fn new() -> Self {
        Self::from_config(fast_config()).await
    }

    /// Start a test server requiring a bearer token.
    pub async fn with_auth(token: &str) -> Self {
        let config = ServerConfig {
            auth: AuthFileConfig {
                bearer_token: Some(token.to_string()),
            },
            ..fast_config()
        };
        Self::from_config(config).await
    }

    pub async fn from_config(config: ServerConfig) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (app, _state) = build_app(config).unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            _shutdown: handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

/// One wave, no delays, arena on the fixture map.
pub fn fast_config() -> ServerConfig {
    let mut config = ServerConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        ..ServerConfig::default()
    };
    config.limits.tick_ms = 10;
    let trial = &mut config.trial;
    trial.total_waves = 1;
    trial.first_wave_delay_ms = 0;
    trial.announce_delay_ms = 0;
    trial.inter_wave_delay_ms = 0;
    trial.rng_seed = Some(11);
    trial.arena.center = at(0.0, 0.0);
    trial.arena.radius = 100.0;
    trial.arena.entrance = at(0.0, 0.0);
    trial.arena.exit = at(300.0, 300.0);
    trial.arena.spawn_points = vec![at(5.0, 5.0), at(-5.0, 5.0), at(5.0, -5.0)];
    config
}

/// Connect a WebSocket client to the given URL.
pub async fn ws_connect(url: &str) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

/// Connect with an `Authorization: Bearer` header.
pub async fn ws_connect_with_token(
    url: &str,
    token: &str,
) -> Result<WsStream, tokio_tungstenite::tungstenite::Error> {
    let mut request = url.into_client_request().unwrap();
    request
        .headers_mut()
        .insert("authorization", format!("Bearer {token}").parse().unwrap());
    tokio_tungstenite::connect_async(request)
        .await
        .map(|(stream, _)| stream)
}

pub async fn send_host(stream: &mut WsStream, msg: &HostMessage) {
    let encoded = encode_host_message(msg).unwrap();
    stream.send(Message::Binary(encoded.into())).await.unwrap();
}

/// Connect as the host simulation and complete the handshake.
pub async fn connect_host(server: &TestServer) -> WsStream {
    let mut stream = ws_connect(&server.ws_url()).await;
    host_handshake(&mut stream).await;
    stream
}

pub async fn host_handshake(stream: &mut WsStream) {
    send_host(
        stream,
        &HostMessage::Hello(HelloMsg {
            protocol_version: PROTOCOL_VERSION,
            realm: "test-realm".to_string(),
        }),
    )
    .await;
    match ws_read_server_msg(stream).await {
        ServerMessage::Welcome(WelcomeMsg { protocol_version }) => {
            assert_eq!(protocol_version, PROTOCOL_VERSION);
        },
        other => panic!("Expected Welcome, got: {other:?}"),
    }
}

/// Report participants `ids` online and grouped under `group`.
pub async fn seed_group(stream: &mut WsStream, ids: &[ParticipantId], group: GroupId) {
    for id in ids {
        send_host(stream, &HostMessage::ParticipantUpdate(make_participant(*id, 80))).await;
    }
    send_host(
        stream,
        &HostMessage::GroupUpdate(GroupUpdateMsg {
            group,
            members: ids.to_vec(),
        }),
    )
    .await;
}

/// Let in-flight host messages reach the trial loop.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

/// Read raw binary data from a WebSocket stream (5s timeout).
pub async fn ws_read_raw(stream: &mut WsStream) -> Vec<u8> {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => return data.to_vec(),
                Some(Ok(Message::Close(_))) => panic!("WebSocket closed unexpectedly"),
                Some(Err(e)) => panic!("WebSocket error: {e}"),
                None => panic!("WebSocket stream ended"),
                _ => continue,
            }
        }
    })
    .await
    .expect("Timed out waiting for WebSocket message")
}

/// Try to read raw binary data, returning None on timeout or close.
pub async fn ws_try_read_raw(stream: &mut WsStream, timeout_ms: u64) -> Option<Vec<u8>> {
    let deadline = Duration::from_millis(timeout_ms);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => return Some(data.to_vec()),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return None,
                _ => continue,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

pub async fn ws_read_server_msg(stream: &mut WsStream) -> ServerMessage {
    let data = ws_read_raw(stream).await;
    decode_server_message(&data).unwrap()
}

/// Read commands until one matches, returning everything read so far.
pub async fn read_until(
    stream: &mut WsStream,
    mut pred: impl FnMut(&ServerMessage) -> bool,
) -> Vec<ServerMessage> {
    let mut seen = Vec::new();
    loop {
        let msg = ws_read_server_msg(stream).await;
        let done = pred(&msg);
        seen.push(msg);
        if done {
            return seen;
        }
    }
}

/// Admin GET/POST helper returning status and JSON body.
pub async fn admin_post(
    server: &TestServer,
    path: &str,
    body: Option<serde_json::Value>,
) -> (u16, serde_json::Value) {
    let client = reqwest::Client::new();
    let mut req = client.post(format!("{}/api/v1{path}", server.base_url()));
    if let Some(body) = body {
        req = req.json(&body);
    }
    let resp = req.send().await.unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap_or(serde_json::Value::Null))
}

pub async fn admin_status(server: &TestServer) -> serde_json::Value {
    reqwest::get(format!("{}/api/v1/status", server.base_url()))
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}
