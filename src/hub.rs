//! Server side of the realtime room channel.
//!
//! A [`Peer`] is one connection: it joins a room, turns client frames into
//! store commands and yields the room's broadcasts. The websocket route and the
//! in-process client transport both drive a `Peer`.

use sqlx::SqlitePool;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

use crate::{
    db::{self, PlaybackSnapshot},
    error::{AppErr, AppResult},
    metadata::Resolver,
    model::{Command, RoomPlaybackState, RoomRecord, Tier},
    permission,
    protocol::{ClientEnvelope, ClientMessage, ServerMessage},
    state::{self, now_ms, RoomMap, RoomState},
    utils::jwt::Claims,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: String,
    pub name: String,
    pub tier: Tier,
}

impl From<&Claims> for Identity {
    fn from(c: &Claims) -> Self {
        Identity { uid: c.sub.clone(), name: c.display_name(), tier: c.tier }
    }
}

#[derive(Clone)]
pub struct Hub {
    rooms: RoomMap,
    pool: Option<SqlitePool>,
    resolver: Resolver,
}

impl Hub {
    pub fn new(rooms: RoomMap, pool: Option<SqlitePool>, resolver: Resolver) -> Self {
        Hub { rooms, pool, resolver }
    }

    pub fn rooms(&self) -> &RoomMap { &self.rooms }

    pub fn peer(&self, who: Identity) -> Peer {
        Peer { hub: self.clone(), who, room: None, rx: None }
    }

    async fn join(&self, room_id: &str, who: &Identity) -> AppResult<broadcast::Receiver<ServerMessage>> {
        if room_id.trim().is_empty() {
            return Err(AppErr::Bad("room id is empty".into()));
        }
        // a room missing from the map is read from the db without holding the
        // lock, then looked up again: the flush task may evict it meanwhile
        let mut loaded = None;
        let mut looked_up = false;
        let mut m = loop {
            let m = self.rooms.write().await;
            let Some(pool) = self.pool.as_ref().filter(|_| !looked_up && !m.contains_key(room_id)) else {
                break m;
            };
            drop(m);
            loaded = db::load_room(pool, room_id).await?;
            looked_up = true;
        };
        let room = m.entry(room_id.to_string()).or_insert_with(|| match loaded {
            Some((record, state)) => RoomState::open(record, state),
            None => {
                info!(room = room_id, owner = %who.uid, "opening new room");
                let mut room = RoomState::open(RoomRecord::new(room_id, &who.uid), RoomPlaybackState::default());
                room.dirty = true;
                room
            }
        });
        let rx = room.tx.subscribe();
        room.users.push((who.uid.clone(), who.name.clone()));
        room.broadcast_users();
        room.broadcast_state(now_ms());
        info!(room = room_id, user = %who.uid, members = room.users.len(), "joined");
        Ok(rx)
    }

    async fn leave(&self, room_id: &str, uid: &str) {
        let flush = {
            let mut m = self.rooms.write().await;
            let Some(room) = m.get_mut(room_id) else { return };
            if let Some(i) = room.users.iter().position(|(id, _)| id == uid) {
                room.users.remove(i);
            }
            room.broadcast_users();
            info!(room = room_id, user = uid, members = room.users.len(), "left");
            if room.users.is_empty() && room.dirty && self.pool.is_some() {
                room.dirty = false;
                Some((room.store.room().clone(), room.store.state().clone()))
            } else {
                None
            }
        };
        if let (Some((record, state)), Some(pool)) = (flush, &self.pool) {
            if let Err(e) = db::save_room(pool, &record, &state).await {
                warn!(room = room_id, "saving room on last leave failed: {e}");
                self.mark_dirty(room_id).await;
            }
        }
    }

    async fn mark_dirty(&self, room_id: &str) {
        if let Some(room) = self.rooms.write().await.get_mut(room_id) {
            room.dirty = true;
        }
    }

    /// Persist every changed room, then drop idle rooms that are safely stored.
    pub async fn flush_dirty(&self) -> usize {
        let Some(pool) = &self.pool else { return 0 };
        let batch: Vec<(RoomRecord, RoomPlaybackState)> = {
            let mut m = self.rooms.write().await;
            m.values_mut()
                .filter(|r| r.dirty)
                .map(|r| {
                    r.dirty = false;
                    (r.store.room().clone(), r.store.state().clone())
                })
                .collect()
        };

        let mut saved = 0;
        for (record, state) in &batch {
            match db::save_room(pool, record, state).await {
                Ok(()) => saved += 1,
                Err(e) => {
                    warn!(room = %record.id, "snapshot flush failed: {e}");
                    self.mark_dirty(&record.id).await;
                }
            }
        }
        self.rooms.write().await.retain(|_, r| !r.users.is_empty() || r.dirty);
        saved
    }

    /// Live snapshot when the room is open, stored one otherwise.
    pub async fn snapshot(&self, room_id: &str) -> AppResult<Option<PlaybackSnapshot>> {
        if let Some(room) = self.rooms.read().await.get(room_id) {
            return Ok(Some(PlaybackSnapshot::from(&room.store.view(now_ms()))));
        }
        match &self.pool {
            Some(pool) => Ok(db::load_room(pool, room_id).await?.map(|(_, s)| PlaybackSnapshot::from(&s))),
            None => Ok(None),
        }
    }

    async fn current_state(&self, room_id: &str) -> Option<ServerMessage> {
        self.rooms.read().await.get(room_id).map(|r| r.state_message(now_ms()))
    }
}

/* ---------------- per connection ---------------- */

pub struct Peer {
    hub: Hub,
    who: Identity,
    room: Option<String>,
    rx: Option<broadcast::Receiver<ServerMessage>>,
}

impl Peer {
    pub fn identity(&self) -> &Identity { &self.who }

    pub fn room(&self) -> Option<&str> { self.room.as_deref() }

    /// Handle one client frame; returns the direct replies for this connection.
    pub async fn handle(&mut self, env: ClientEnvelope) -> Vec<ServerMessage> {
        let id = env.request_id;
        let result = match env.message {
            ClientMessage::Ping => return vec![ServerMessage::Pong],
            ClientMessage::JoinRoom { room_id } => self.join(&room_id).await,
            ClientMessage::LeaveRoom { room_id } if self.room() == Some(room_id.as_str()) => {
                self.close().await;
                Ok(())
            }
            msg if msg.room_id().is_some() && msg.room_id() == self.room() => self.dispatch(msg).await,
            _ => Err(AppErr::NotInRoom),
        };
        match result {
            Ok(()) => vec![ServerMessage::Ack { request_id: id }],
            Err(e) => {
                if e.is_rejection() {
                    info!(user = %self.who.uid, "rejected: {e}");
                } else {
                    warn!(user = %self.who.uid, "command failed: {e}");
                }
                vec![ServerMessage::rejected(id, &e)]
            }
        }
    }

    async fn join(&mut self, room_id: &str) -> AppResult<()> {
        if self.room() == Some(room_id) {
            return Ok(());
        }
        self.close().await;
        let rx = self.hub.join(room_id, &self.who).await?;
        self.room = Some(room_id.to_string());
        self.rx = Some(rx);
        Ok(())
    }

    async fn dispatch(&mut self, msg: ClientMessage) -> AppResult<()> {
        let Identity { uid, tier, .. } = self.who.clone();
        let rooms = self.hub.rooms.clone();
        let room_id = self.room.clone().ok_or(AppErr::NotInRoom)?;

        let command = match msg {
            ClientMessage::Play { .. } => Command::Play,
            ClientMessage::Pause { .. } => Command::Pause,
            ClientMessage::Seek { position, .. } => Command::Seek { position },
            ClientMessage::SyncPosition { position, duration, epoch, seen_at, .. } => {
                Command::SyncPosition { position, duration, epoch, seen_at }
            }
            ClientMessage::NextTrack { epoch, auto, .. } => Command::Next { epoch, auto },
            ClientMessage::ReplayTrack { track_id, .. } => Command::Replay { track_id },
            ClientMessage::RemoveTrack { track_id, .. } => Command::Remove { track_id },
            ClientMessage::UpdateSettings { settings, .. } => {
                return state::update_settings(&rooms, &room_id, &uid, tier, settings).await;
            }
            // these need network lookups: deny early, resolve without holding the lock
            ClientMessage::LoadTrack { url, .. } => {
                let (actor, settings) = state::actor_in(&rooms, &room_id, &uid, tier).await?;
                if !permission::can_control(&actor, &settings) {
                    return Err(AppErr::PermissionDenied("playback controls are restricted".into()));
                }
                Command::LoadTrack { track: self.hub.resolver.resolve(&url, &uid, None).await? }
            }
            ClientMessage::Enqueue { url, duration_ms, .. } => {
                let (actor, settings) = state::actor_in(&rooms, &room_id, &uid, tier).await?;
                if !permission::can_enqueue(&actor, &settings) {
                    return Err(AppErr::PermissionDenied("adding to the queue is disabled".into()));
                }
                Command::Enqueue { tracks: vec![self.hub.resolver.resolve(&url, &uid, duration_ms).await?] }
            }
            ClientMessage::ImportPlaylist { url, .. } => {
                let (actor, settings) = state::actor_in(&rooms, &room_id, &uid, tier).await?;
                if !permission::can_enqueue(&actor, &settings) {
                    return Err(AppErr::PermissionDenied("adding to the queue is disabled".into()));
                }
                let tracks = self.hub.resolver.import_playlist(&url, &uid).await;
                if tracks.is_empty() {
                    return Err(AppErr::InvalidTrack(format!("no tracks found at {url}")));
                }
                info!(room = %room_id, count = tracks.len(), "playlist imported");
                Command::Enqueue { tracks }
            }
            ClientMessage::JoinRoom { .. } | ClientMessage::LeaveRoom { .. } | ClientMessage::Ping => {
                return Err(AppErr::Bad("unexpected frame".into()));
            }
        };

        state::submit(&rooms, &room_id, &uid, tier, command).await.map(|_| ())
    }

    /// Next broadcast for this connection. Pends forever while not in a room.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        let Some(rx) = self.rx.as_mut() else {
            return std::future::pending().await;
        };
        match rx.recv().await {
            Ok(msg) => Some(msg),
            Err(RecvError::Lagged(skipped)) => {
                warn!(user = %self.who.uid, skipped, "slow peer, resending state");
                let room = self.room.clone()?;
                self.hub.current_state(&room).await
            }
            Err(RecvError::Closed) => None,
        }
    }

    /// Leave the current room, if any.
    pub async fn close(&mut self) {
        self.rx = None;
        if let Some(room) = self.room.take() {
            self.hub.leave(&room, &self.who.uid).await;
        }
    }
}
