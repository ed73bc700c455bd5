//! JSON frames carried by the realtime room channel.

use serde::{Deserialize, Serialize};

use crate::{
    error::AppErr,
    model::{RoomPlaybackState, RoomSettings},
};

/// Client frame: `{"requestId": 7, "type": "seek", "roomId": "lobby", "position": 1000}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    #[serde(flatten)]
    pub message: ClientMessage,
}

impl ClientEnvelope {
    pub fn new(request_id: Option<u64>, message: ClientMessage) -> Self {
        ClientEnvelope { request_id, message }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    JoinRoom { room_id: String },
    #[serde(rename_all = "camelCase")]
    LeaveRoom { room_id: String },
    #[serde(rename_all = "camelCase")]
    SyncPosition {
        room_id: String,
        position: i64,
        #[serde(default)]
        duration: Option<u64>,
        #[serde(default)]
        epoch: Option<u64>,
        #[serde(default)]
        seen_at: Option<i64>,
    },
    #[serde(rename_all = "camelCase")]
    NextTrack {
        room_id: String,
        #[serde(default)]
        epoch: Option<u64>,
        #[serde(default)]
        auto: bool,
    },
    #[serde(rename_all = "camelCase")]
    ReplayTrack { room_id: String, track_id: String },
    #[serde(rename_all = "camelCase")]
    Play { room_id: String },
    #[serde(rename_all = "camelCase")]
    Pause { room_id: String },
    #[serde(rename_all = "camelCase")]
    Seek { room_id: String, position: i64 },
    #[serde(rename_all = "camelCase")]
    LoadTrack { room_id: String, url: String },
    #[serde(rename_all = "camelCase")]
    Enqueue {
        room_id: String,
        url: String,
        #[serde(default)]
        duration_ms: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    ImportPlaylist { room_id: String, url: String },
    #[serde(rename_all = "camelCase")]
    RemoveTrack { room_id: String, track_id: String },
    #[serde(rename_all = "camelCase")]
    UpdateSettings { room_id: String, settings: RoomSettings },
    Ping,
}

impl ClientMessage {
    pub fn room_id(&self) -> Option<&str> {
        use ClientMessage::*;
        match self {
            JoinRoom { room_id }
            | LeaveRoom { room_id }
            | SyncPosition { room_id, .. }
            | NextTrack { room_id, .. }
            | ReplayTrack { room_id, .. }
            | Play { room_id }
            | Pause { room_id }
            | Seek { room_id, .. }
            | LoadTrack { room_id, .. }
            | Enqueue { room_id, .. }
            | ImportPlaylist { room_id, .. }
            | RemoveTrack { room_id, .. }
            | UpdateSettings { room_id, .. } => Some(room_id),
            Ping => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectKind {
    PermissionDenied,
    EmptyQueue,
    NotFound,
    Invalid,
    Internal,
}

impl From<&AppErr> for RejectKind {
    fn from(e: &AppErr) -> Self {
        match e {
            AppErr::PermissionDenied(_) => RejectKind::PermissionDenied,
            AppErr::EmptyQueue => RejectKind::EmptyQueue,
            AppErr::TrackNotFound(_) => RejectKind::NotFound,
            AppErr::InvalidTrack(_) | AppErr::Bad(_) | AppErr::NotInRoom => RejectKind::Invalid,
            _ => RejectKind::Internal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    RoomState { room_id: String, state: RoomPlaybackState, settings: RoomSettings },
    #[serde(rename_all = "camelCase")]
    Users { room_id: String, list: Vec<String> },
    #[serde(rename_all = "camelCase")]
    Ack { request_id: Option<u64> },
    #[serde(rename_all = "camelCase")]
    Rejected { request_id: Option<u64>, kind: RejectKind, message: String },
    Pong,
}

impl ServerMessage {
    pub fn rejected(request_id: Option<u64>, err: &AppErr) -> Self {
        ServerMessage::Rejected { request_id, kind: err.into(), message: err.to_string() }
    }

    /// The request id this message answers, if it is a reply.
    pub fn reply_to(&self) -> Option<u64> {
        match self {
            ServerMessage::Ack { request_id } | ServerMessage::Rejected { request_id, .. } => *request_id,
            _ => None,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"type":"rejected","requestId":null,"kind":"internal","message":"{e}"}}"#)
        })
    }
}
