use crate::model::{RoomPlaybackState, RoomSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoplayPhase {
    AwaitingEnd,
    /// A `next` for this epoch is in flight.
    Advancing { epoch: u64 },
}

#[derive(Debug, Clone)]
pub struct AutoplayController {
    phase: AutoplayPhase,
}

impl Default for AutoplayController {
    fn default() -> Self {
        AutoplayController { phase: AutoplayPhase::AwaitingEnd }
    }
}

impl AutoplayController {
    pub fn phase(&self) -> AutoplayPhase { self.phase }

    /// Local track ended. Returns the epoch to advance from, if we should.
    pub fn on_ended(&mut self, state: &RoomPlaybackState, settings: &RoomSettings) -> Option<u64> {
        if self.phase != AutoplayPhase::AwaitingEnd || !settings.autoplay || state.queue.is_empty() {
            return None;
        }
        self.phase = AutoplayPhase::Advancing { epoch: state.track_epoch };
        Some(state.track_epoch)
    }

    pub fn on_state(&mut self, state: &RoomPlaybackState) {
        if let AutoplayPhase::Advancing { epoch } = self.phase {
            if state.track_epoch != epoch {
                self.phase = AutoplayPhase::AwaitingEnd;
            }
        }
    }

    /// The advance was rejected or timed out.
    pub fn on_failed(&mut self) {
        self.phase = AutoplayPhase::AwaitingEnd;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Track, TrackInfo};

    fn state(epoch: u64, queued: usize) -> RoomPlaybackState {
        let queue = (0..queued)
            .map(|i| Track::new(format!("https://youtu.be/vid{i}"), TrackInfo::new("t", None, None), "u"))
            .collect();
        RoomPlaybackState { queue, track_epoch: epoch, ..Default::default() }
    }

    #[test]
    fn advances_once_per_epoch() {
        let mut c = AutoplayController::default();
        let settings = RoomSettings::default();
        assert_eq!(c.on_ended(&state(3, 1), &settings), Some(3));
        assert_eq!(c.on_ended(&state(3, 1), &settings), None);

        c.on_state(&state(3, 1));
        assert_eq!(c.phase(), AutoplayPhase::Advancing { epoch: 3 });
        c.on_state(&state(4, 0));
        assert_eq!(c.phase(), AutoplayPhase::AwaitingEnd);
    }

    #[test]
    fn stays_idle_without_queue_or_autoplay() {
        let mut c = AutoplayController::default();
        assert_eq!(c.on_ended(&state(1, 0), &RoomSettings::default()), None);
        let off = RoomSettings { autoplay: false, ..Default::default() };
        assert_eq!(c.on_ended(&state(1, 2), &off), None);
    }

    #[test]
    fn failure_rearms() {
        let mut c = AutoplayController::default();
        c.on_ended(&state(1, 1), &RoomSettings::default());
        c.on_failed();
        assert_eq!(c.on_ended(&state(1, 1), &RoomSettings::default()), Some(1));
    }
}
