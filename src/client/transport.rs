//! Client side of the room channel.

use std::{collections::VecDeque, future::Future};

use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::{net::TcpStream, sync::mpsc, time};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    error::{bad, AppErr, AppResult},
    hub::Peer,
    protocol::{ClientEnvelope, ClientMessage, RejectKind, ServerMessage},
};

/// Moves frames between a client and the room server.
pub trait Transport: Send {
    fn send(&mut self, envelope: ClientEnvelope) -> impl Future<Output = AppResult<()>> + Send;
    /// `None` once the connection is gone.
    fn recv(&mut self) -> impl Future<Output = Option<ServerMessage>> + Send;
}

/// Talks to an in-process [`Peer`], skipping serialization.
pub struct LocalTransport {
    peer: Peer,
    replies: VecDeque<ServerMessage>,
}

impl LocalTransport {
    pub fn new(peer: Peer) -> Self {
        LocalTransport { peer, replies: VecDeque::new() }
    }
}

impl Transport for LocalTransport {
    async fn send(&mut self, envelope: ClientEnvelope) -> AppResult<()> {
        let replies = self.peer.handle(envelope).await;
        self.replies.extend(replies);
        Ok(())
    }

    async fn recv(&mut self) -> Option<ServerMessage> {
        if let Some(reply) = self.replies.pop_front() {
            return Some(reply);
        }
        self.peer.recv().await
    }
}

/// JSON text frames over a pair of channels, as a socket pump would carry them.
pub struct ChannelTransport {
    out: mpsc::Sender<String>,
    inbound: mpsc::Receiver<String>,
}

impl ChannelTransport {
    pub fn new(out: mpsc::Sender<String>, inbound: mpsc::Receiver<String>) -> Self {
        ChannelTransport { out, inbound }
    }
}

impl Transport for ChannelTransport {
    async fn send(&mut self, envelope: ClientEnvelope) -> AppResult<()> {
        let frame = serde_json::to_string(&envelope)?;
        self.out.send(frame).await.map_err(|_| AppErr::Transport("socket closed".into()))
    }

    async fn recv(&mut self) -> Option<ServerMessage> {
        loop {
            let frame = self.inbound.recv().await?;
            match serde_json::from_str(&frame) {
                Ok(msg) => return Some(msg),
                Err(e) => warn!("dropping unreadable frame: {e}"),
            }
        }
    }
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A websocket to a room server's `/ws/room` endpoint.
pub struct WsTransport {
    sink: SplitSink<Socket, Message>,
    stream: SplitStream<Socket>,
}

impl WsTransport {
    /// `base` is the server origin, e.g. `ws://127.0.0.1:3000`. With `room`
    /// the server joins it before the first frame.
    pub async fn connect(base: &str, token: &str, room: Option<&str>) -> AppResult<Self> {
        let mut url = Url::parse(base).and_then(|u| u.join("/ws/room")).map_err(bad)?;
        url.query_pairs_mut().append_pair("token", token);
        if let Some(room) = room {
            url.query_pairs_mut().append_pair("room", room);
        }
        let (socket, response) = connect_async(url.as_str())
            .await
            .map_err(|e| AppErr::Transport(format!("connecting to {base}: {e}")))?;
        info!(server = base, status = %response.status(), "room socket open");
        let (sink, stream) = socket.split();
        Ok(WsTransport { sink, stream })
    }
}

impl Transport for WsTransport {
    async fn send(&mut self, envelope: ClientEnvelope) -> AppResult<()> {
        let frame = serde_json::to_string(&envelope)?;
        self.sink.send(Message::Text(frame)).await.map_err(|e| AppErr::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Option<ServerMessage> {
        while let Some(frame) = self.stream.next().await {
            match frame {
                Ok(Message::Text(raw)) => match serde_json::from_str(&raw) {
                    Ok(msg) => return Some(msg),
                    Err(e) => warn!("dropping unreadable frame: {e}"),
                },
                Ok(Message::Close(reason)) => {
                    debug!(?reason, "room socket closed by server");
                    return None;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("room socket failed: {e}");
                    return None;
                }
            }
        }
        None
    }
}

pub fn rejection_error(kind: RejectKind, message: String) -> AppErr {
    match kind {
        RejectKind::PermissionDenied => AppErr::PermissionDenied(message),
        RejectKind::EmptyQueue => AppErr::EmptyQueue,
        RejectKind::NotFound => AppErr::TrackNotFound(message),
        RejectKind::Invalid => AppErr::Bad(message),
        RejectKind::Internal => AppErr::Transport(message),
    }
}

/// Request/reply bookkeeping on top of a [`Transport`]. Broadcasts that arrive
/// while waiting for a reply are kept for [`Link::recv`].
pub struct Link<T> {
    transport: T,
    next_id: u64,
    inbox: VecDeque<ServerMessage>,
    timeout: time::Duration,
}

impl<T: Transport> Link<T> {
    pub fn new(transport: T, timeout: time::Duration) -> Self {
        Link { transport, next_id: 0, inbox: VecDeque::new(), timeout }
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Send a command and wait for its ack. One retry after a timeout.
    pub async fn submit(&mut self, message: ClientMessage) -> AppResult<()> {
        for attempt in 1..=2 {
            self.next_id += 1;
            let id = self.next_id;
            self.transport.send(ClientEnvelope::new(Some(id), message.clone())).await?;

            match time::timeout(self.timeout, self.await_reply(id)).await {
                Ok(Some(ServerMessage::Rejected { kind, message, .. })) => return Err(rejection_error(kind, message)),
                Ok(Some(_)) => return Ok(()),
                Ok(None) => return Err(AppErr::Transport("connection closed".into())),
                Err(_) => warn!(request = id, attempt, "no reply in time"),
            }
        }
        Err(AppErr::TransportTimeout(self.timeout.as_millis() as u64))
    }

    async fn await_reply(&mut self, id: u64) -> Option<ServerMessage> {
        loop {
            let msg = self.transport.recv().await?;
            match msg.reply_to() {
                Some(r) if r == id => return Some(msg),
                Some(stale) => debug!(request = stale, "late reply ignored"),
                None => self.inbox.push_back(msg),
            }
        }
    }

    pub async fn recv(&mut self) -> Option<ServerMessage> {
        if let Some(msg) = self.inbox.pop_front() {
            return Some(msg);
        }
        self.transport.recv().await
    }
}
