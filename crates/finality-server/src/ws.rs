use axum::extract::FromRequest;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use finality_core::net::messages::{HostMessage, ServerMessage, WelcomeMsg};
use finality_core::net::protocol::{
    MAX_MESSAGE_SIZE, PROTOCOL_VERSION, decode_host_message, decode_message_type,
    encode_server_message,
};

use crate::state::{AppState, HostSlot};
use crate::trial_loop::TrialCommand;

/// Close code for a handshake that is not a valid `Hello`.
const CLOSE_PROTOCOL_ERROR: u16 = 1002;

/// GET /ws: the host simulation's event and command channel.
pub async fn ws_handler(
    State(state): State<AppState>,
    request: axum::extract::Request,
) -> Result<axum::response::Response, StatusCode> {
    let Some(slot) = HostSlot::try_acquire(&state.host_connected) else {
        tracing::warn!("Rejected second host connection");
        return Err(StatusCode::CONFLICT);
    };

    let ws = WebSocketUpgrade::from_request(request, &state)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, state, slot))
        .into_response())
}

async fn handle_socket(socket: WebSocket, state: AppState, slot: HostSlot) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Wait for the first message: must be a Hello.
    let first_msg = match ws_receiver.next().await {
        Some(Ok(Message::Binary(data))) => data,
        _ => return,
    };
    let hello = match decode_host_message(&first_msg) {
        Ok(HostMessage::Hello(hello)) => hello,
        _ => {
            close_with(&mut ws_sender, "expected Hello").await;
            return;
        },
    };

    if hello.protocol_version != PROTOCOL_VERSION {
        tracing::warn!(
            host = hello.protocol_version,
            server = PROTOCOL_VERSION,
            realm = %hello.realm,
            "Protocol version mismatch"
        );
        close_with(&mut ws_sender, "protocol version mismatch").await;
        return;
    }

    let welcome = ServerMessage::Welcome(WelcomeMsg {
        protocol_version: PROTOCOL_VERSION,
    });
    let Ok(encoded) = encode_server_message(&welcome) else {
        tracing::error!("Failed to encode Welcome");
        return;
    };
    if ws_sender
        .send(Message::Binary(encoded.into()))
        .await
        .is_err()
    {
        return;
    }

    let (tx, rx) = mpsc::channel::<Bytes>(state.config.limits.host_message_buffer);
    if state
        .trial
        .send(TrialCommand::HostConnected { outbound: tx })
        .is_err()
    {
        tracing::error!("Trial loop is not running, dropping host connection");
        return;
    }
    tracing::info!(realm = %hello.realm, "Host simulation connected");

    spawn_writer(ws_sender, rx);
    read_loop(&mut ws_receiver, &state).await;

    let _ = state.trial.send(TrialCommand::HostDisconnected);
    tracing::info!(realm = %hello.realm, "Host simulation disconnected");
    // Released only after the detach is queued so a reconnect attaches after it.
    drop(slot);
}

async fn close_with(
    ws_sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    reason: &'static str,
) {
    let frame = CloseFrame {
        code: CLOSE_PROTOCOL_ERROR,
        reason: reason.into(),
    };
    if let Err(e) = ws_sender.send(Message::Close(Some(frame))).await {
        tracing::warn!(error = %e, "Failed to send close frame");
    }
}

fn spawn_writer(
    mut ws_sender: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Bytes>,
) {
    tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            if ws_sender.send(Message::Binary(data)).await.is_err() {
                break;
            }
        }
    });
}

async fn read_loop(ws_receiver: &mut futures::stream::SplitStream<WebSocket>, state: &AppState) {
    while let Some(Ok(msg)) = ws_receiver.next().await {
        let data = match msg {
            Message::Binary(d) => d,
            Message::Close(_) => break,
            _ => continue,
        };

        if data.is_empty() || data.len() > MAX_MESSAGE_SIZE {
            tracing::debug!(len = data.len(), "Dropping empty or oversized host message");
            continue;
        }

        let msg_type = match decode_message_type(&data) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(error = %e, "Undecodable host message");
                continue;
            },
        };

        // Commands flow one way only.
        if msg_type.is_server_only() {
            tracing::warn!(?msg_type, "Rejected server-only message from host");
            continue;
        }

        match decode_host_message(&data) {
            Ok(msg) => {
                if state.trial.send(TrialCommand::Host(msg)).is_err() {
                    tracing::error!("Trial loop stopped, closing host connection");
                    break;
                }
            },
            Err(e) => {
                tracing::warn!(?msg_type, error = %e, "Malformed host message");
            },
        }
    }
}
