//! WebSocket endpoint for catalogue observers.
//!
//! Observers only listen. Every change event the hub fans out is written to
//! the socket as one text message; anything the client sends is ignored
//! apart from a close.

use crate::AppState;
use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade},
        ConnectInfo, Extension,
    },
    response::IntoResponse,
};
use cellar_hub::{serve_observer, Frame, Inbound};
use futures_util::{future, SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;

/// Upgrades the request and hands the socket to the hub.
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    tracing::debug!(remote_addr = %addr, "websocket upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr))
}

fn inbound_from(msg: AxumMessage) -> Inbound {
    match msg {
        AxumMessage::Text(text) => Inbound::Text(text.as_str().to_owned()),
        AxumMessage::Close(_) => Inbound::Close,
        _ => Inbound::Other,
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, addr: SocketAddr) {
    let (sender, receiver) = socket.split();

    let writer = sender.with(|frame: Frame| {
        future::ready(Ok::<_, axum::Error>(AxumMessage::Text(
            String::from(&*frame).into(),
        )))
    });
    let reader = receiver.map(|msg| msg.map(inbound_from));

    match serve_observer(&state.hub, writer, reader).await {
        Ok(reason) => {
            tracing::debug!(remote_addr = %addr, %reason, "websocket session ended");
        }
        Err(e) => {
            tracing::warn!(remote_addr = %addr, error = %e, "could not register observer");
        }
    }
}
