//! Converges a local player onto the room's authoritative playback state.

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{config::SyncConfig, model::RoomPlaybackState};

use super::{
    adapter::{PlayerAdapter, PlayerPhase},
    guard::SyncGuard,
};

/// What the loop did (or, for `Manual`, asks the user to do).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Correction {
    Seek(u64),
    Play,
    Pause,
    Manual(&'static str),
}

/// Outcome of a local position report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalReport {
    /// Inside the guard window: an echo of our own seek.
    Suppressed,
    /// Host's organic position, to be sent as `sync-position`.
    Forward(u64),
    /// Drifted too far from the room and was sought back.
    Corrected(u64),
    Ignored,
}

#[derive(Debug, Clone)]
struct Authority {
    position: u64,
    is_playing: bool,
    duration: Option<u64>,
    received_at: Instant,
}

pub struct Reconciler {
    cfg: SyncConfig,
    guard: SyncGuard,
    user_id: String,
    host: bool,
    authority: Option<Authority>,
    manual_key: Option<(u64, bool)>,
}

impl Reconciler {
    pub fn new(user_id: impl Into<String>, cfg: SyncConfig) -> Self {
        Reconciler {
            guard: SyncGuard::new(cfg.guard_timeout),
            cfg,
            user_id: user_id.into(),
            host: false,
            authority: None,
            manual_key: None,
        }
    }

    pub fn guard(&self) -> &SyncGuard { &self.guard }

    pub fn is_host(&self) -> bool { self.host }

    fn threshold(&self) -> u64 {
        self.cfg.drift_threshold.as_millis() as u64
    }

    /// Last authoritative position carried forward by the time since it arrived.
    pub fn expected_position(&self, now: Instant) -> Option<u64> {
        let a = self.authority.as_ref()?;
        let mut pos = a.position;
        if a.is_playing {
            pos += now.duration_since(a.received_at).as_millis() as u64;
        }
        Some(a.duration.map_or(pos, |d| pos.min(d)))
    }

    /// Apply an authoritative room state to the local player.
    pub fn on_state(&mut self, state: &RoomPlaybackState, adapter: &mut dyn PlayerAdapter, now: Instant) -> Vec<Correction> {
        self.host = state.host_user_id.as_deref() == Some(self.user_id.as_str());
        self.authority = Some(Authority {
            position: state.position,
            is_playing: state.is_playing,
            duration: state.duration_ms,
            received_at: now,
        });
        if state.current_track.is_none() {
            return Vec::new();
        }
        if !adapter.capabilities().control {
            return self.manual(state);
        }
        if !adapter.is_alive() {
            warn!(platform = %adapter.platform(), "player is gone, skipping correction");
            return Vec::new();
        }

        let mut out = Vec::new();
        let local = adapter.position();
        if !self.guard.is_active(now) && state.position.abs_diff(local) > self.threshold() {
            self.guard.engage(now);
            match adapter.seek(state.position) {
                Ok(()) => {
                    info!(from = local, to = state.position, "corrective seek");
                    out.push(Correction::Seek(state.position));
                }
                Err(e) => {
                    warn!("corrective seek failed: {e}");
                    self.guard.release();
                }
            }
        }

        let local_playing = adapter.phase().is_some_and(PlayerPhase::is_playing);
        match (state.is_playing, adapter.phase()) {
            // the end of a track belongs to autoplay
            (_, Some(PlayerPhase::Ended)) => {}
            (true, _) if !local_playing => {
                if adapter.play().is_ok() {
                    out.push(Correction::Play);
                }
            }
            (false, _) if local_playing => {
                if adapter.pause().is_ok() {
                    out.push(Correction::Pause);
                }
            }
            _ => {}
        }
        out
    }

    fn manual(&mut self, state: &RoomPlaybackState) -> Vec<Correction> {
        let key = (state.track_epoch, state.is_playing);
        if self.manual_key == Some(key) {
            return Vec::new();
        }
        self.manual_key = Some(key);
        vec![Correction::Manual(if state.is_playing { "play" } else { "pause" })]
    }

    /// Handle a `PositionUpdate` from the local player.
    pub fn on_local_position(&mut self, position: u64, adapter: &mut dyn PlayerAdapter, now: Instant) -> LocalReport {
        if self.guard.is_active(now) {
            debug!(position, "position report inside guard window");
            return LocalReport::Suppressed;
        }
        if self.host {
            return LocalReport::Forward(position);
        }
        let Some(expected) = self.expected_position(now) else {
            return LocalReport::Ignored;
        };
        if !adapter.capabilities().control || expected.abs_diff(position) <= self.threshold() || !adapter.is_alive() {
            return LocalReport::Ignored;
        }
        self.guard.engage(now);
        match adapter.seek(expected) {
            Ok(()) => {
                info!(from = position, to = expected, "drift corrected");
                LocalReport::Corrected(expected)
            }
            Err(e) => {
                warn!("drift correction failed: {e}");
                self.guard.release();
                LocalReport::Ignored
            }
        }
    }

    /// Release the guard once its timeout passed; true if it did just now.
    pub fn tick(&mut self, now: Instant) -> bool {
        let expired = self.guard.expire(now);
        if expired {
            debug!("sync guard released");
        }
        expired
    }
}
