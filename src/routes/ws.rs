use axum::{
    extract::{ws::{Message, WebSocket, WebSocketUpgrade}, Extension, Query},
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info};

use crate::{
    error::{bad, AppResult},
    hub::{Hub, Identity, Peer},
    protocol::{ClientEnvelope, ClientMessage, ServerMessage},
    utils::jwt,
};

#[derive(Deserialize)] struct WsQuery { room: Option<String>, token: String }

/// Shared secret for token checks, wrapped so it is not confused with other `String` extensions.
#[derive(Clone)]
pub struct JwtSecret(pub String);

pub fn router() -> Router {
    Router::new().route("/room", get(ws_handler))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(q): Query<WsQuery>,
    Extension(JwtSecret(secret)): Extension<JwtSecret>,
    Extension(hub): Extension<Hub>,
) -> AppResult<impl IntoResponse> {
    let claims = jwt::verify(&q.token, &secret).ok_or_else(|| bad("bad token"))?;
    let peer = hub.peer(Identity::from(&claims));
    Ok(ws.on_upgrade(move |s| user_ws(s, peer, q.room)))
}

/* ---------------- per connection ---------------- */
async fn user_ws(sock: WebSocket, mut peer: Peer, room: Option<String>) {
    let conn = uuid::Uuid::new_v4();
    info!(%conn, user = %peer.identity().uid, "socket open");
    let (mut sink, mut stream) = sock.split();

    // `?room=` joins right away, like sending join-room first
    if let Some(room_id) = room.filter(|r| !r.is_empty()) {
        for reply in peer.handle(ClientEnvelope::new(None, ClientMessage::JoinRoom { room_id })).await {
            if sink.send(Message::Text(reply.to_json())).await.is_err() {
                peer.close().await;
                return;
            }
        }
    }

    loop {
        tokio::select! {
            frame = stream.next() => {
                let raw = match frame {
                    Some(Ok(Message::Text(raw))) => raw,
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => continue,
                };
                let replies = match serde_json::from_str::<ClientEnvelope>(&raw) {
                    Ok(env) => peer.handle(env).await,
                    Err(e) => {
                        debug!(%conn, "unparseable frame: {e}");
                        vec![ServerMessage::rejected(None, &bad(e))]
                    }
                };
                for reply in replies {
                    if sink.send(Message::Text(reply.to_json())).await.is_err() { break; }
                }
            }
            msg = peer.recv() => {
                let Some(msg) = msg else { break };
                if sink.send(Message::Text(msg.to_json())).await.is_err() { break; }
            }
        }
    }

    peer.close().await;
    info!(%conn, "socket closed");
}
