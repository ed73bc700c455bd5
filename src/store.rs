//! The authoritative playback state of one room.
//!
//! `apply` is the only way state changes: gate, mutate, hand back the new state.
//! The caller (see `state::submit`) broadcasts whatever comes back as `Changed`.

use tracing::debug;

use crate::{
    error::{AppErr, AppResult},
    model::{Actor, Command, RoomPlaybackState, RoomRecord, RoomSettings, Track},
    permission,
};

pub const HISTORY_CAP: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    /// State moved; broadcast it.
    Changed(RoomPlaybackState),
    /// Accepted but nothing to do (stale epoch, flag already set).
    Unchanged(RoomPlaybackState),
}

impl Applied {
    pub fn state(&self) -> &RoomPlaybackState {
        match self {
            Applied::Changed(s) | Applied::Unchanged(s) => s,
        }
    }

    pub fn changed(&self) -> bool {
        matches!(self, Applied::Changed(_))
    }
}

#[derive(Debug, Clone)]
pub struct RoomStore {
    room: RoomRecord,
    state: RoomPlaybackState,
    /// When the position was last set by hand (seek, replay, new track).
    seeked_at: i64,
}

impl RoomStore {
    pub fn new(room: RoomRecord, mut state: RoomPlaybackState) -> Self {
        if state.host_user_id.is_none() {
            state.host_user_id = Some(room.owner_id.clone());
        }
        let seeked_at = state.position_updated_at;
        RoomStore { room, state, seeked_at }
    }

    pub fn room(&self) -> &RoomRecord { &self.room }

    pub fn settings(&self) -> &RoomSettings { &self.room.settings }

    /// Raw state as last stamped (what gets persisted).
    pub fn state(&self) -> &RoomPlaybackState { &self.state }

    /// State with the position extrapolated to `now_ms`, for sending to clients.
    pub fn view(&self, now_ms: i64) -> RoomPlaybackState {
        let mut s = self.state.clone();
        s.position = self.state.position_at(now_ms);
        s.position_updated_at = now_ms;
        s
    }

    pub fn update_settings(&mut self, actor: &Actor, settings: RoomSettings) -> AppResult<()> {
        if !actor.is_privileged() {
            return Err(AppErr::PermissionDenied("only the owner or an admin can change settings".into()));
        }
        self.room.settings = RoomSettings {
            dj_decks: settings.dj_decks.clamp(1, crate::model::MAX_DECKS),
            ..settings
        };
        Ok(())
    }

    pub fn apply(&mut self, command: Command, actor: &Actor, now_ms: i64) -> AppResult<Applied> {
        let target = match &command {
            Command::Remove { track_id } => self.state.queue.iter().find(|t| &t.id == track_id).cloned(),
            _ => None,
        };
        permission::check(actor, &self.room.settings, &command, target.as_ref()).into_result()?;

        debug!(room = %self.room.id, user = %actor.user_id, command = command.name(), "apply");

        match command {
            Command::Play => self.set_playing(true, now_ms),
            Command::Pause => self.set_playing(false, now_ms),
            Command::Seek { position } => {
                if self.state.current_track.is_none() {
                    return Ok(Applied::Unchanged(self.view(now_ms)));
                }
                self.seeked_at = now_ms;
                Ok(self.stamp_position(position, now_ms))
            }
            Command::SyncPosition { position, duration, epoch, seen_at } => {
                if epoch.is_some_and(|e| e != self.state.track_epoch) || self.state.current_track.is_none() {
                    return Ok(Applied::Unchanged(self.view(now_ms)));
                }
                if seen_at.is_some_and(|at| at < self.seeked_at) {
                    debug!(room = %self.room.id, ?seen_at, seeked_at = self.seeked_at, "report predates a seek");
                    return Ok(Applied::Unchanged(self.view(now_ms)));
                }
                if let Some(d) = duration.filter(|d| *d > 0) {
                    self.state.duration_ms = Some(d);
                }
                Ok(self.stamp_position(position, now_ms))
            }
            Command::Next { epoch, auto } => {
                if epoch.is_some_and(|e| e != self.state.track_epoch) {
                    debug!(room = %self.room.id, ?epoch, current = self.state.track_epoch, "stale advancement ignored");
                    return Ok(Applied::Unchanged(self.view(now_ms)));
                }
                // an autoplay trigger only counts once the room's own clock agrees
                if auto
                    && !permission::can_control(actor, &self.room.settings)
                    && !permission::track_has_ended(&self.state, now_ms)
                {
                    return Err(AppErr::PermissionDenied("the current track has not ended".into()));
                }
                self.advance(now_ms)?;
                Ok(Applied::Changed(self.view(now_ms)))
            }
            Command::Replay { track_id } => {
                self.replay(&track_id, now_ms)?;
                Ok(Applied::Changed(self.view(now_ms)))
            }
            Command::LoadTrack { track } => {
                if !track.is_valid() {
                    return Err(AppErr::InvalidTrack(track.url));
                }
                self.change_track(Some(track), now_ms);
                Ok(Applied::Changed(self.view(now_ms)))
            }
            Command::Enqueue { tracks } => {
                let before = self.state.queue.len();
                self.state.queue.extend(tracks.into_iter().filter(Track::is_valid));
                if self.state.queue.len() == before {
                    return Err(AppErr::InvalidTrack("no playable tracks".into()));
                }
                Ok(Applied::Changed(self.view(now_ms)))
            }
            Command::Remove { track_id } => {
                if target.is_none() {
                    return Err(AppErr::TrackNotFound(track_id));
                }
                self.state.queue.retain(|t| t.id != track_id);
                Ok(Applied::Changed(self.view(now_ms)))
            }
        }
    }

    /* ---------------- transitions ---------------- */

    fn set_playing(&mut self, playing: bool, now_ms: i64) -> AppResult<Applied> {
        let advanced = playing && self.state.current_track.is_none();
        if advanced {
            self.advance(now_ms)?;
        }
        if self.state.is_playing == playing {
            let view = self.view(now_ms);
            return Ok(if advanced { Applied::Changed(view) } else { Applied::Unchanged(view) });
        }
        let position = self.state.position_at(now_ms);
        self.state.position = position;
        self.state.last_broadcast_position = position;
        self.state.position_updated_at = now_ms;
        self.state.is_playing = playing;
        Ok(Applied::Changed(self.view(now_ms)))
    }

    fn stamp_position(&mut self, position: i64, now_ms: i64) -> Applied {
        let position = self.state.clamp(position.max(0) as u64);
        self.state.position = position;
        self.state.last_broadcast_position = position;
        self.state.position_updated_at = now_ms;
        Applied::Changed(self.view(now_ms))
    }

    fn advance(&mut self, now_ms: i64) -> AppResult<()> {
        if self.state.queue.is_empty() {
            return Err(AppErr::EmptyQueue);
        }
        let next = self.state.queue.remove(0);
        self.change_track(Some(next), now_ms);
        Ok(())
    }

    fn replay(&mut self, track_id: &str, now_ms: i64) -> AppResult<()> {
        if self.state.current_track_id() == Some(track_id) {
            let current = self.state.current_track.clone();
            self.reset_position(current, now_ms);
            return Ok(());
        }
        let track = if let Some(i) = self.state.history.iter().rposition(|t| t.id == track_id) {
            self.state.history.remove(i)
        } else if let Some(i) = self.state.queue.iter().position(|t| t.id == track_id) {
            self.state.queue.remove(i)
        } else {
            return Err(AppErr::TrackNotFound(track_id.into()));
        };
        self.change_track(Some(track), now_ms);
        Ok(())
    }

    /// Swap the current track; the old one goes to history and position restarts.
    fn change_track(&mut self, track: Option<Track>, now_ms: i64) {
        if let Some(prev) = self.state.current_track.take() {
            self.state.history.push(prev);
            if self.state.history.len() > HISTORY_CAP {
                let excess = self.state.history.len() - HISTORY_CAP;
                self.state.history.drain(..excess);
            }
        }
        self.reset_position(track, now_ms);
    }

    fn reset_position(&mut self, track: Option<Track>, now_ms: i64) {
        self.state.duration_ms = track.as_ref().and_then(|t| t.duration_ms);
        self.state.current_track = track;
        self.state.position = 0;
        self.state.last_broadcast_position = 0;
        self.state.position_updated_at = now_ms;
        self.state.track_epoch += 1;
        self.seeked_at = now_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Role, Tier, TrackInfo};

    fn track(name: &str, by: &str) -> Track {
        let mut t = Track::new(format!("https://youtu.be/{name}"), TrackInfo::new(name, None, None), by);
        t.id = name.into();
        t
    }

    fn owner() -> Actor {
        Actor { user_id: "owner".into(), role: Role::Owner, tier: Tier::Free }
    }

    fn guest() -> Actor {
        Actor { user_id: "guest".into(), role: Role::Participant, tier: Tier::Free }
    }

    fn store_with(current: Option<&str>, queue: &[&str]) -> RoomStore {
        let state = RoomPlaybackState {
            current_track: current.map(|c| track(c, "owner")),
            queue: queue.iter().map(|q| track(q, "owner")).collect(),
            ..Default::default()
        };
        RoomStore::new(RoomRecord::new("room", "owner"), state)
    }

    #[test]
    fn next_moves_queue_head_and_resets_position() {
        let mut store = store_with(Some("A"), &["B"]);
        store.apply(Command::Play, &owner(), 0).unwrap();
        store.apply(Command::Seek { position: 30_000 }, &owner(), 0).unwrap();

        let applied = store.apply(Command::Next { epoch: None, auto: false }, &owner(), 100).unwrap();
        let s = applied.state();
        assert!(applied.changed());
        assert_eq!(s.current_track_id(), Some("B"));
        assert_eq!(s.history.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(), ["A"]);
        assert!(s.queue.is_empty());
        assert_eq!(s.position, 0);
        assert!(s.is_playing);
    }

    #[test]
    fn next_on_empty_queue_is_reported() {
        let mut store = store_with(Some("A"), &[]);
        let before = store.state().clone();
        let err = store.apply(Command::Next { epoch: None, auto: false }, &owner(), 0).unwrap_err();
        assert!(matches!(err, AppErr::EmptyQueue));
        assert_eq!(store.state(), &before);
    }

    #[test]
    fn paused_room_stays_paused_across_next() {
        let mut store = store_with(Some("A"), &["B"]);
        let s = store.apply(Command::Next { epoch: None, auto: false }, &owner(), 0).unwrap();
        assert!(!s.state().is_playing);
    }

    #[test]
    fn same_epoch_advances_once() {
        let mut store = store_with(Some("A"), &["B", "C"]);
        let epoch = store.state().track_epoch;
        let first = store.apply(Command::Next { epoch: Some(epoch), auto: true }, &owner(), 0).unwrap();
        let second = store.apply(Command::Next { epoch: Some(epoch), auto: true }, &guest(), 0).unwrap();
        assert!(first.changed());
        assert!(!second.changed());
        assert_eq!(store.state().current_track_id(), Some("B"));
        assert_eq!(store.state().queue.len(), 1);
    }

    #[test]
    fn seek_clamps_to_known_duration() {
        let mut store = store_with(Some("A"), &[]);
        store.state.duration_ms = Some(60_000);
        let s = store.apply(Command::Seek { position: 90_000 }, &owner(), 0).unwrap();
        assert_eq!(s.state().position, 60_000);
        let s = store.apply(Command::Seek { position: -5 }, &owner(), 0).unwrap();
        assert_eq!(s.state().position, 0);
    }

    #[test]
    fn seek_without_duration_is_verbatim() {
        let mut store = store_with(Some("A"), &[]);
        let s = store.apply(Command::Seek { position: 9_999_999 }, &owner(), 0).unwrap();
        assert_eq!(s.state().position, 9_999_999);
    }

    #[test]
    fn play_and_pause_stamp_broadcast_position() {
        let mut store = store_with(Some("A"), &[]);
        store.apply(Command::Play, &owner(), 1_000).unwrap();
        let s = store.apply(Command::Pause, &owner(), 6_000).unwrap();
        assert_eq!(s.state().position, 5_000);
        assert_eq!(s.state().last_broadcast_position, 5_000);
        assert!(!s.state().is_playing);
    }

    #[test]
    fn restricted_guest_cannot_touch_playback() {
        let mut store = store_with(Some("A"), &["B"]);
        let before = store.state().clone();
        for cmd in [Command::Play, Command::Pause, Command::Seek { position: 1_000 }] {
            let err = store.apply(cmd, &guest(), 0).unwrap_err();
            assert!(matches!(err, AppErr::PermissionDenied(_)));
        }
        assert_eq!(store.state(), &before);
    }

    #[test]
    fn guest_removes_own_track_only() {
        let mut store = store_with(Some("A"), &[]);
        store.state.queue.push(track("mine", "guest"));
        store.state.queue.push(track("theirs", "owner"));

        assert!(store.apply(Command::Remove { track_id: "theirs".into() }, &guest(), 0).is_err());
        store.apply(Command::Remove { track_id: "mine".into() }, &guest(), 0).unwrap();
        assert_eq!(store.state().queue.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(), ["theirs"]);
    }

    #[test]
    fn enqueue_drops_malformed_tracks() {
        let mut store = store_with(None, &[]);
        let mut broken = track("x", "guest");
        broken.url.clear();
        let err = store.apply(Command::Enqueue { tracks: vec![broken.clone()] }, &guest(), 0).unwrap_err();
        assert!(matches!(err, AppErr::InvalidTrack(_)));

        store.apply(Command::Enqueue { tracks: vec![broken, track("ok", "guest")] }, &guest(), 0).unwrap();
        assert_eq!(store.state().queue.len(), 1);
    }

    #[test]
    fn replay_pulls_from_history() {
        let mut store = store_with(Some("A"), &["B"]);
        store.apply(Command::Next { epoch: None, auto: false }, &owner(), 0).unwrap();
        let s = store.apply(Command::Replay { track_id: "A".into() }, &owner(), 0).unwrap();
        assert_eq!(s.state().current_track_id(), Some("A"));
        assert_eq!(s.state().history.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(), ["B"]);
        assert!(matches!(
            store.apply(Command::Replay { track_id: "zzz".into() }, &owner(), 0),
            Err(AppErr::TrackNotFound(_))
        ));
    }

    #[test]
    fn stale_sync_position_is_ignored() {
        let mut store = store_with(Some("A"), &["B"]);
        let old = store.state().track_epoch;
        store.apply(Command::Next { epoch: None, auto: false }, &owner(), 0).unwrap();
        let s = store
            .apply(Command::SyncPosition { position: 50_000, duration: None, epoch: Some(old), seen_at: None }, &owner(), 0)
            .unwrap();
        assert!(!s.changed());
        assert_eq!(store.state().position, 0);
    }

    #[test]
    fn report_sent_before_a_seek_does_not_undo_it() {
        let mut store = store_with(Some("A"), &[]);
        store.apply(Command::Play, &owner(), 1_000).unwrap();
        let epoch = Some(store.state().track_epoch);
        let seen = store.view(2_000).position_updated_at;
        store.apply(Command::Seek { position: 90_000 }, &owner(), 3_000).unwrap();

        let late = Command::SyncPosition { position: 2_100, duration: None, epoch, seen_at: Some(seen) };
        assert!(!store.apply(late, &owner(), 3_050).unwrap().changed());
        assert_eq!(store.state().position, 90_000);

        let seen = store.view(3_100).position_updated_at;
        let fresh = Command::SyncPosition { position: 90_200, duration: None, epoch, seen_at: Some(seen) };
        assert!(store.apply(fresh, &owner(), 3_200).unwrap().changed());
        assert_eq!(store.state().position, 90_200);
    }

    #[test]
    fn play_with_nothing_current_starts_the_queue() {
        let mut store = store_with(None, &["A"]);
        let s = store.apply(Command::Play, &owner(), 0).unwrap();
        assert_eq!(s.state().current_track_id(), Some("A"));
        assert!(s.state().is_playing);

        let mut empty = store_with(None, &[]);
        assert!(matches!(empty.apply(Command::Play, &owner(), 0), Err(AppErr::EmptyQueue)));
    }

    #[test]
    fn restricted_guest_autoplay_waits_for_the_end() {
        let mut store = store_with(Some("A"), &["B"]);
        store.apply(Command::Play, &owner(), 0).unwrap();
        let epoch = store.state().track_epoch;
        let next = || Command::Next { epoch: Some(epoch), auto: true };

        // duration unknown: only controllers may advance
        let err = store.apply(next(), &guest(), 500_000).unwrap_err();
        assert!(matches!(err, AppErr::PermissionDenied(_)));

        store.state.duration_ms = Some(60_000);
        let before = store.state().clone();
        let err = store.apply(next(), &guest(), 1_000).unwrap_err();
        assert!(matches!(err, AppErr::PermissionDenied(_)));
        assert_eq!(store.state(), &before);

        let s = store.apply(next(), &guest(), 59_000).unwrap();
        assert!(s.changed());
        assert_eq!(s.state().current_track_id(), Some("B"));
    }

    #[test]
    fn play_from_nothing_is_a_change_even_when_flagged_playing() {
        let mut store = store_with(None, &["A"]);
        store.state.is_playing = true;
        let s = store.apply(Command::Play, &owner(), 0).unwrap();
        assert!(s.changed());
        assert_eq!(s.state().current_track_id(), Some("A"));
        assert!(s.state().queue.is_empty());
    }

    #[test]
    fn seek_with_nothing_loaded_is_ignored() {
        let mut store = store_with(None, &["A"]);
        let s = store.apply(Command::Seek { position: 12_000 }, &owner(), 0).unwrap();
        assert!(!s.changed());
        assert_eq!(store.state().position, 0);
    }

    #[test]
    fn removal_is_gated_before_the_lookup() {
        let mut store = store_with(Some("A"), &["B"]);
        let err = store.apply(Command::Remove { track_id: "nope".into() }, &guest(), 0).unwrap_err();
        assert!(matches!(err, AppErr::PermissionDenied(_)));
        let err = store.apply(Command::Remove { track_id: "nope".into() }, &owner(), 0).unwrap_err();
        assert!(matches!(err, AppErr::TrackNotFound(_)));
    }

    #[test]
    fn conflicting_commands_resolve_in_arrival_order() {
        let mut store = store_with(Some("A"), &[]);
        store.room.settings.allow_controls = true;
        store.apply(Command::Play, &owner(), 0).unwrap();
        store.apply(Command::Pause, &guest(), 2_000).unwrap();
        store.apply(Command::Seek { position: 40_000 }, &owner(), 2_001).unwrap();
        assert!(!store.state().is_playing);
        assert_eq!(store.state().position, 40_000);

        let mut other = store_with(Some("A"), &[]);
        other.room.settings.allow_controls = true;
        other.apply(Command::Play, &owner(), 0).unwrap();
        other.apply(Command::Seek { position: 40_000 }, &owner(), 2_000).unwrap();
        other.apply(Command::Pause, &guest(), 2_001).unwrap();
        assert_eq!(other.state().position, 40_001);
    }
}
