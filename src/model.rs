//! Track, queue and room playback value types shared by server and client.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/* ------------ Tracks ------------ */

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    pub full_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

impl TrackInfo {
    pub fn new(title: impl Into<String>, artist: Option<String>, thumbnail: Option<String>) -> Self {
        let title = title.into();
        let full_title = match &artist {
            Some(a) if !a.is_empty() => format!("{a} - {title}"),
            _ => title.clone(),
        };
        TrackInfo { title, artist, full_title, thumbnail }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,
    pub url: String,
    pub info: TrackInfo,
    pub added_by: String,
    pub added_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl Track {
    pub fn new(url: impl Into<String>, info: TrackInfo, added_by: impl Into<String>) -> Self {
        Track {
            id: nanoid::nanoid!(12),
            url: url.into(),
            info,
            added_by: added_by.into(),
            added_at: chrono::Utc::now().timestamp_millis(),
            duration_ms: None,
        }
    }

    pub fn with_duration(mut self, duration_ms: Option<u64>) -> Self {
        self.duration_ms = duration_ms.filter(|d| *d > 0);
        self
    }

    /// Only tracks with a non-empty id and url may enter queue, history or current.
    pub fn is_valid(&self) -> bool {
        !self.id.trim().is_empty() && !self.url.trim().is_empty()
    }

    pub fn platform(&self) -> Option<Platform> {
        Platform::detect(&self.url)
    }
}

/* ------------ Platforms ------------ */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    YouTube,
    SoundCloud,
    Spotify,
}

impl Platform {
    pub fn detect(raw: &str) -> Option<Platform> {
        if raw.starts_with("spotify:") {
            return Some(Platform::Spotify);
        }
        let url = Url::parse(raw).ok()?;
        let host = url.host_str()?.trim_start_matches("www.").trim_start_matches("m.");
        match host {
            "youtube.com" | "music.youtube.com" | "youtu.be" | "youtube-nocookie.com" => {
                Some(Platform::YouTube)
            }
            "soundcloud.com" | "on.soundcloud.com" => Some(Platform::SoundCloud),
            "open.spotify.com" | "play.spotify.com" => Some(Platform::Spotify),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Platform::YouTube => "YouTube",
            Platform::SoundCloud => "SoundCloud",
            Platform::Spotify => "Spotify",
        })
    }
}

/* ------------ Room playback ------------ */

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPlaybackState {
    pub current_track: Option<Track>,
    pub queue: Vec<Track>,
    /// Most recent last.
    pub history: Vec<Track>,
    pub is_playing: bool,
    pub position: u64,
    pub last_broadcast_position: u64,
    pub host_user_id: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub position_updated_at: i64,
    #[serde(default)]
    pub track_epoch: u64,
}

impl RoomPlaybackState {
    /// Position extrapolated to `now_ms` while playing, clamped to the duration.
    pub fn position_at(&self, now_ms: i64) -> u64 {
        if !self.is_playing || self.current_track.is_none() {
            return self.position;
        }
        let elapsed = (now_ms - self.position_updated_at).max(0) as u64;
        self.clamp(self.position.saturating_add(elapsed))
    }

    pub fn clamp(&self, position: u64) -> u64 {
        match self.duration_ms {
            Some(d) => position.min(d),
            None => position,
        }
    }

    pub fn current_track_id(&self) -> Option<&str> {
        self.current_track.as_ref().map(|t| t.id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoomSettings {
    pub allow_controls: bool,
    pub allow_queue: bool,
    pub allow_queue_removal: bool,
    pub autoplay: bool,
    pub dj_mode: bool,
    pub dj_decks: u8,
}

pub const MAX_DECKS: u8 = 4;

impl Default for RoomSettings {
    fn default() -> Self {
        RoomSettings {
            allow_controls: false,
            allow_queue: true,
            allow_queue_removal: false,
            autoplay: true,
            dj_mode: false,
            dj_decks: MAX_DECKS,
        }
    }
}

/// Ownership facts the permission gate needs about a room.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoomRecord {
    pub id: String,
    pub owner_id: String,
    pub admins: HashSet<String>,
    pub settings: RoomSettings,
}

impl RoomRecord {
    pub fn new(id: impl Into<String>, owner_id: impl Into<String>) -> Self {
        RoomRecord {
            id: id.into(),
            owner_id: owner_id.into(),
            admins: HashSet::new(),
            settings: RoomSettings::default(),
        }
    }

    pub fn role_of(&self, user_id: &str) -> Role {
        if self.owner_id == user_id {
            Role::Owner
        } else if self.admins.contains(user_id) {
            Role::Admin
        } else {
            Role::Participant
        }
    }
}

/* ------------ Actors & commands ------------ */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Participant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Pro,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
    pub tier: Tier,
}

impl Actor {
    pub fn in_room(user_id: &str, tier: Tier, room: &RoomRecord) -> Self {
        Actor { user_id: user_id.to_string(), role: room.role_of(user_id), tier }
    }

    pub fn is_privileged(&self) -> bool {
        matches!(self.role, Role::Owner | Role::Admin)
    }
}

/// A mutation of the authoritative room state. Tracks arrive already resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play,
    Pause,
    Seek { position: i64 },
    /// `seen_at` is the `position_updated_at` of the last state the reporter saw.
    SyncPosition { position: i64, duration: Option<u64>, epoch: Option<u64>, seen_at: Option<i64> },
    Next { epoch: Option<u64>, auto: bool },
    Replay { track_id: String },
    LoadTrack { track: Track },
    Enqueue { tracks: Vec<Track> },
    Remove { track_id: String },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Play => "play",
            Command::Pause => "pause",
            Command::Seek { .. } => "seek",
            Command::SyncPosition { .. } => "sync-position",
            Command::Next { .. } => "next",
            Command::Replay { .. } => "replay",
            Command::LoadTrack { .. } => "load-track",
            Command::Enqueue { .. } => "enqueue",
            Command::Remove { .. } => "remove",
        }
    }
}
