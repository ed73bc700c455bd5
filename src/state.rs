use std::{collections::HashMap, sync::Arc};
use tokio::sync::{broadcast, RwLock};
use tracing::info;

use crate::{
    error::{AppErr, AppResult},
    model::{Actor, Command, RoomPlaybackState, RoomRecord, RoomSettings, Tier},
    protocol::ServerMessage,
    store::{Applied, RoomStore},
};

pub type Tx = broadcast::Sender<ServerMessage>;

const CHANNEL_CAP: usize = 100;

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/* ------------ one websocket room ------------ */
pub struct RoomState {
    pub tx:    Tx,
    pub users: Vec<(String, String)>,    // (uid, name), one entry per connection
    pub store: RoomStore,
    pub dirty: bool,
}

pub type RoomMap = Arc<RwLock<HashMap<String, RoomState>>>;

impl RoomState {
    pub fn open(record: RoomRecord, state: RoomPlaybackState) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAP);
        RoomState { tx, users: Vec::new(), store: RoomStore::new(record, state), dirty: false }
    }

    pub fn id(&self) -> &str { &self.store.room().id }

    pub fn has_user(&self, uid: &str) -> bool {
        self.users.iter().any(|(id, _)| id == uid)
    }

    pub fn state_message(&self, now: i64) -> ServerMessage {
        ServerMessage::RoomState {
            room_id: self.id().to_string(),
            state: self.store.view(now),
            settings: self.store.settings().clone(),
        }
    }

    pub fn broadcast_state(&self, now: i64) {
        self.tx.send(self.state_message(now)).ok();
    }

    pub fn broadcast_users(&self) {
        let list = self.users.iter().map(|(_, n)| n.clone()).collect();
        self.tx.send(ServerMessage::Users { room_id: self.id().to_string(), list }).ok();
    }
}

/// Validate, apply and broadcast as one step under the room map lock.
pub async fn submit(rooms: &RoomMap, room_id: &str, uid: &str, tier: Tier, command: Command) -> AppResult<Applied> {
    let mut m = rooms.write().await;
    let room = m.get_mut(room_id).filter(|r| r.has_user(uid)).ok_or(AppErr::NotInRoom)?;
    let actor = Actor::in_room(uid, tier, room.store.room());
    let name = command.name();
    let now = now_ms();

    let applied = room.store.apply(command, &actor, now)?;
    if applied.changed() {
        room.dirty = true;
        room.broadcast_state(now);
        info!(room = room_id, user = uid, command = name, epoch = applied.state().track_epoch, "room state changed");
    }
    Ok(applied)
}

pub async fn update_settings(rooms: &RoomMap, room_id: &str, uid: &str, tier: Tier, settings: RoomSettings) -> AppResult<()> {
    let mut m = rooms.write().await;
    let room = m.get_mut(room_id).filter(|r| r.has_user(uid)).ok_or(AppErr::NotInRoom)?;
    let actor = Actor::in_room(uid, tier, room.store.room());
    room.store.update_settings(&actor, settings)?;
    room.dirty = true;
    room.broadcast_state(now_ms());
    Ok(())
}

/// Current role/tier view of a member, for gate checks done before I/O.
pub async fn actor_in(rooms: &RoomMap, room_id: &str, uid: &str, tier: Tier) -> AppResult<(Actor, RoomSettings)> {
    let m = rooms.read().await;
    let room = m.get(room_id).filter(|r| r.has_user(uid)).ok_or(AppErr::NotInRoom)?;
    Ok((Actor::in_room(uid, tier, room.store.room()), room.store.settings().clone()))
}
