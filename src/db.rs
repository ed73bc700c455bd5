//! Room snapshots in sqlite. Rows may come from older schemas, so everything
//! read back is normalized before it is trusted.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use tracing::warn;

use crate::{
    error::AppResult,
    model::{RoomPlaybackState, RoomRecord, RoomSettings, Track},
};

pub async fn init(pool: &SqlitePool) -> AppResult<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS rooms (
            id        TEXT PRIMARY KEY,
            owner_id  TEXT NOT NULL,
            admins    TEXT NOT NULL DEFAULT '[]',
            settings  TEXT NOT NULL DEFAULT '{}'
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS room_playback (
            room_id                 TEXT PRIMARY KEY,
            queue                   TEXT,
            history                 TEXT,
            current_track           TEXT,
            is_playing              INTEGER NOT NULL DEFAULT 0,
            position                INTEGER NOT NULL DEFAULT 0,
            last_broadcast_position INTEGER NOT NULL DEFAULT 0,
            host_user_id            TEXT,
            position_updated_at     INTEGER NOT NULL DEFAULT 0,
            track_epoch             INTEGER NOT NULL DEFAULT 0
        )",
    )
    .execute(pool)
    .await?;
    Ok(())
}

/* ---------------- snapshot shape ---------------- */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    pub queue: Vec<Track>,
    pub history: Vec<Track>,
    pub current_track: Option<Track>,
    pub is_playing: bool,
    pub position: i64,
    pub last_broadcast_position: i64,
    pub host_user_id: Option<String>,
    #[serde(default)]
    pub position_updated_at: i64,
    #[serde(default)]
    pub track_epoch: i64,
}

impl From<&RoomPlaybackState> for PlaybackSnapshot {
    fn from(s: &RoomPlaybackState) -> Self {
        PlaybackSnapshot {
            queue: s.queue.clone(),
            history: s.history.clone(),
            current_track: s.current_track.clone(),
            is_playing: s.is_playing,
            position: s.position as i64,
            last_broadcast_position: s.last_broadcast_position as i64,
            host_user_id: s.host_user_id.clone(),
            position_updated_at: s.position_updated_at,
            track_epoch: s.track_epoch as i64,
        }
    }
}

impl From<PlaybackSnapshot> for RoomPlaybackState {
    fn from(s: PlaybackSnapshot) -> Self {
        let duration_ms = s.current_track.as_ref().and_then(|t| t.duration_ms);
        let is_playing = s.is_playing && s.current_track.is_some();
        RoomPlaybackState {
            current_track: s.current_track,
            queue: s.queue,
            history: s.history,
            is_playing,
            position: s.position.max(0) as u64,
            last_broadcast_position: s.last_broadcast_position.max(0) as u64,
            host_user_id: s.host_user_id.filter(|h| !h.is_empty()),
            duration_ms,
            position_updated_at: s.position_updated_at,
            track_epoch: s.track_epoch.max(0) as u64,
        }
    }
}

/// Anything that is not an array becomes `[]`; entries that fail to parse or
/// lack an id/url are dropped.
pub fn normalize_tracks(raw: &Value) -> Vec<Track> {
    match raw {
        Value::Array(items) => items.iter().filter_map(normalize_track).collect(),
        Value::String(s) => serde_json::from_str::<Value>(s)
            .map(|v| if v.is_array() { normalize_tracks(&v) } else { Vec::new() })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

pub fn normalize_track(raw: &Value) -> Option<Track> {
    let track: Track = serde_json::from_value(raw.clone()).ok()?;
    track.is_valid().then_some(track)
}

pub fn normalize_snapshot(raw: &Value) -> PlaybackSnapshot {
    let int = |key: &str| raw.get(key).and_then(Value::as_i64).unwrap_or(0);
    PlaybackSnapshot {
        queue: raw.get("queue").map(normalize_tracks).unwrap_or_default(),
        history: raw.get("history").map(normalize_tracks).unwrap_or_default(),
        current_track: raw.get("current_track").and_then(normalize_track),
        is_playing: raw.get("is_playing").and_then(Value::as_bool).unwrap_or(false),
        position: int("position").max(0),
        last_broadcast_position: int("last_broadcast_position").max(0),
        host_user_id: raw.get("host_user_id").and_then(Value::as_str).map(String::from),
        position_updated_at: int("position_updated_at"),
        track_epoch: int("track_epoch").max(0),
    }
}

fn parse_json(text: Option<String>) -> Value {
    text.and_then(|t| serde_json::from_str(&t).ok()).unwrap_or(Value::Null)
}

/* ---------------- queries ---------------- */

pub async fn load_room(
    pool: &SqlitePool,
    room_id: &str,
) -> AppResult<Option<(RoomRecord, RoomPlaybackState)>> {
    let Some(row) = sqlx::query("SELECT id, owner_id, admins, settings FROM rooms WHERE id = ?")
        .bind(room_id)
        .fetch_optional(pool)
        .await?
    else {
        return Ok(None);
    };

    let admins = match parse_json(row.try_get("admins")?) {
        Value::Array(items) => items.into_iter().filter_map(|v| v.as_str().map(String::from)).collect(),
        _ => Default::default(),
    };
    let settings: RoomSettings = serde_json::from_value(parse_json(row.try_get("settings")?))
        .unwrap_or_else(|e| {
            warn!(room = room_id, "unreadable settings, using defaults: {e}");
            RoomSettings::default()
        });
    let record = RoomRecord { id: row.try_get("id")?, owner_id: row.try_get("owner_id")?, admins, settings };

    let state = match sqlx::query(
        "SELECT queue, history, current_track, is_playing, position, last_broadcast_position,
                host_user_id, position_updated_at, track_epoch
         FROM room_playback WHERE room_id = ?",
    )
    .bind(room_id)
    .fetch_optional(pool)
    .await?
    {
        Some(row) => {
            let raw = serde_json::json!({
                "queue": parse_json(row.try_get("queue")?),
                "history": parse_json(row.try_get("history")?),
                "current_track": parse_json(row.try_get("current_track")?),
                "is_playing": row.try_get::<i64, _>("is_playing")? != 0,
                "position": row.try_get::<i64, _>("position")?,
                "last_broadcast_position": row.try_get::<i64, _>("last_broadcast_position")?,
                "host_user_id": row.try_get::<Option<String>, _>("host_user_id")?,
                "position_updated_at": row.try_get::<i64, _>("position_updated_at")?,
                "track_epoch": row.try_get::<i64, _>("track_epoch")?,
            });
            normalize_snapshot(&raw).into()
        }
        None => RoomPlaybackState::default(),
    };

    Ok(Some((record, state)))
}

pub async fn save_room(pool: &SqlitePool, room: &RoomRecord, state: &RoomPlaybackState) -> AppResult<()> {
    let admins: Vec<&String> = room.admins.iter().collect();
    sqlx::query(
        "INSERT INTO rooms (id, owner_id, admins, settings) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET owner_id = ?2, admins = ?3, settings = ?4",
    )
    .bind(&room.id)
    .bind(&room.owner_id)
    .bind(serde_json::to_string(&admins)?)
    .bind(serde_json::to_string(&room.settings)?)
    .execute(pool)
    .await?;

    let snap = PlaybackSnapshot::from(state);
    sqlx::query(
        "INSERT INTO room_playback (room_id, queue, history, current_track, is_playing, position,
                                    last_broadcast_position, host_user_id, position_updated_at, track_epoch)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(room_id) DO UPDATE SET
            queue = ?2, history = ?3, current_track = ?4, is_playing = ?5, position = ?6,
            last_broadcast_position = ?7, host_user_id = ?8, position_updated_at = ?9, track_epoch = ?10",
    )
    .bind(&room.id)
    .bind(serde_json::to_string(&snap.queue)?)
    .bind(serde_json::to_string(&snap.history)?)
    .bind(serde_json::to_string(&snap.current_track)?)
    .bind(snap.is_playing as i64)
    .bind(snap.position)
    .bind(snap.last_broadcast_position)
    .bind(&snap.host_user_id)
    .bind(snap.position_updated_at)
    .bind(snap.track_epoch)
    .execute(pool)
    .await?;
    Ok(())
}
