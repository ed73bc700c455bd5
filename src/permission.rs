//! Who may mutate a room. Every check answers with a [`Decision`]; denial is a
//! value the caller reports, never a fault.

use crate::error::AppErr;
use crate::model::{Actor, Command, RoomPlaybackState, RoomSettings, Track};

/// How early an autoplay advance may arrive before the track's known end.
pub const TRACK_END_MARGIN_MS: u64 = 3_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(&'static str),
}

impl Decision {
    pub fn allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn into_result(self) -> Result<(), AppErr> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny(why) => Err(AppErr::PermissionDenied(why.into())),
        }
    }

    fn when(ok: bool, why: &'static str) -> Decision {
        if ok { Decision::Allow } else { Decision::Deny(why) }
    }
}

pub fn can_control(actor: &Actor, settings: &RoomSettings) -> bool {
    actor.is_privileged() || settings.allow_controls
}

pub fn can_enqueue(actor: &Actor, settings: &RoomSettings) -> bool {
    actor.is_privileged() || settings.allow_queue
}

/// Self-removal always passes, whatever the room settings say.
pub fn can_remove(actor: &Actor, settings: &RoomSettings, track: &Track) -> bool {
    actor.is_privileged() || settings.allow_queue_removal || track.added_by == actor.user_id
}

/// Autoplay advancement is a trigger any member may pull while autoplay is on.
pub fn can_advance(actor: &Actor, settings: &RoomSettings, auto: bool) -> bool {
    can_control(actor, settings) || (auto && settings.autoplay)
}

/// Whether the room's extrapolated position has reached the end of the
/// current track. An unknown duration never counts as ended.
pub fn track_has_ended(state: &RoomPlaybackState, now_ms: i64) -> bool {
    match (&state.current_track, state.duration_ms) {
        (Some(_), Some(d)) => state.position_at(now_ms).saturating_add(TRACK_END_MARGIN_MS) >= d,
        _ => false,
    }
}

pub fn can_enter_dj(actor: &Actor, settings: &RoomSettings) -> Decision {
    if !settings.dj_mode {
        return Decision::Deny("DJ mode is disabled in this room");
    }
    Decision::when(
        actor.is_privileged() || actor.tier == crate::model::Tier::Pro,
        "DJ mode requires a pro account",
    )
}

/// Gate for a command. `target` is the queued track a `Remove` refers to.
pub fn check(actor: &Actor, settings: &RoomSettings, command: &Command, target: Option<&Track>) -> Decision {
    match command {
        Command::Enqueue { .. } => {
            Decision::when(can_enqueue(actor, settings), "adding to the queue is disabled")
        }
        Command::Remove { .. } => match target {
            Some(track) => Decision::when(
                can_remove(actor, settings, track),
                "you can only remove tracks you added",
            ),
            None => Decision::when(
                actor.is_privileged() || settings.allow_queue_removal,
                "removing from the queue is disabled",
            ),
        },
        Command::Next { auto, .. } => {
            Decision::when(can_advance(actor, settings, *auto), "playback controls are restricted")
        }
        Command::Play
        | Command::Pause
        | Command::Seek { .. }
        | Command::SyncPosition { .. }
        | Command::Replay { .. }
        | Command::LoadTrack { .. } => {
            Decision::when(can_control(actor, settings), "playback controls are restricted")
        }
    }
}
