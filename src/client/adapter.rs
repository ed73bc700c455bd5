//! Uniform player contract over the platform embeds.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

use crate::{
    error::{AppErr, AppResult},
    model::Platform,
};

use super::{
    soundcloud::{SoundCloudAdapter, SoundCloudWidget},
    spotify::{SpotifyAdapter, SpotifyEmbed},
    youtube::{YouTubeAdapter, YouTubeEmbed},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerPhase {
    Playing,
    Paused,
    Buffering,
    Ended,
}

impl PlayerPhase {
    /// Buffering counts as playing for play/pause reconciliation.
    pub fn is_playing(self) -> bool {
        matches!(self, PlayerPhase::Playing | PlayerPhase::Buffering)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterEvent {
    Ready,
    Error(String),
    StateChange(PlayerPhase),
    PositionUpdate(u64),
    /// The user has to perform this action in the embed themselves.
    ManualActionRequired(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub control: bool,
    pub report: bool,
}

pub trait PlayerAdapter: Send {
    fn platform(&self) -> Platform;
    fn capabilities(&self) -> Capabilities;

    fn load_track(&mut self, url: &str) -> AppResult<()>;
    fn play(&mut self) -> AppResult<()>;
    fn pause(&mut self) -> AppResult<()>;
    fn seek(&mut self, position_ms: u64) -> AppResult<()>;
    /// `volume` in `[0, 1]`.
    fn set_volume(&mut self, volume: f32) -> AppResult<()>;

    fn position(&self) -> u64;
    /// Track length once the embed knows it.
    fn duration(&self) -> Option<u64>;
    fn phase(&self) -> Option<PlayerPhase>;
    fn is_ready(&self) -> bool;
    /// False once destroyed or when the embed went away underneath us.
    fn is_alive(&self) -> bool;

    /// Drain embed signals into events and sample the position.
    fn poll(&mut self, now: Instant);

    fn events(&mut self) -> &mut EventChannel;

    fn subscribe(&mut self) -> Subscription {
        self.events().subscribe()
    }

    /// Tear the embed down and close every subscriber.
    fn destroy(&mut self);
}

/* ---------------- event channel ---------------- */

#[derive(Default)]
pub struct EventChannel {
    subs: Vec<(u64, mpsc::UnboundedSender<AdapterEvent>)>,
    next_id: u64,
}

pub struct Subscription {
    pub id: u64,
    rx: mpsc::UnboundedReceiver<AdapterEvent>,
}

impl Subscription {
    /// `None` once the adapter is destroyed or this subscription was removed.
    pub async fn recv(&mut self) -> Option<AdapterEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<AdapterEvent> {
        self.rx.try_recv().ok()
    }

    pub fn drain(&mut self) -> Vec<AdapterEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

impl EventChannel {
    pub fn subscribe(&mut self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.next_id += 1;
        self.subs.push((self.next_id, tx));
        Subscription { id: self.next_id, rx }
    }

    pub fn unsubscribe(&mut self, id: u64) {
        self.subs.retain(|(sid, _)| *sid != id);
    }

    pub fn emit(&mut self, event: AdapterEvent) {
        self.subs.retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    pub fn close(&mut self) {
        self.subs.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subs.len()
    }
}

/* ---------------- shared adapter pieces ---------------- */

/// Reports at most once per interval and only after real movement.
#[derive(Debug, Clone)]
pub struct PositionThrottle {
    interval: Duration,
    min_delta: u64,
    last: Option<(Instant, u64)>,
}

impl Default for PositionThrottle {
    fn default() -> Self {
        PositionThrottle::new(Duration::from_secs(1), 500)
    }
}

impl PositionThrottle {
    pub fn new(interval: Duration, min_delta: u64) -> Self {
        PositionThrottle { interval, min_delta, last: None }
    }

    pub fn should_emit(&mut self, now: Instant, position: u64) -> bool {
        let due = match self.last {
            None => true,
            Some((at, pos)) => now.duration_since(at) >= self.interval && position.abs_diff(pos) > self.min_delta,
        };
        if due {
            self.last = Some((now, position));
        }
        due
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Latest control intent issued before the embed was ready.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingControl {
    pub playing: Option<bool>,
    pub seek: Option<u64>,
    pub volume: Option<f32>,
}

impl PendingControl {
    pub fn take(&mut self) -> PendingControl {
        std::mem::take(self)
    }

    pub fn is_empty(&self) -> bool {
        self.playing.is_none() && self.seek.is_none() && self.volume.is_none()
    }
}

/// Builds the embeds for one environment.
pub trait EmbedFactory: Send + Sync {
    fn youtube(&self) -> Box<dyn YouTubeEmbed>;
    fn soundcloud(&self) -> Box<dyn SoundCloudWidget>;
    fn spotify(&self) -> Box<dyn SpotifyEmbed>;
}

/// Adapter for `url`'s platform, already loading it.
pub fn create_adapter(factory: &Arc<dyn EmbedFactory>, url: &str) -> AppResult<Box<dyn PlayerAdapter>> {
    let platform = Platform::detect(url)
        .ok_or_else(|| AppErr::InvalidTrack(format!("no player for {url}")))?;
    let mut adapter: Box<dyn PlayerAdapter> = match platform {
        Platform::YouTube => Box::new(YouTubeAdapter::new(factory.youtube())),
        Platform::SoundCloud => Box::new(SoundCloudAdapter::new(factory.soundcloud())),
        Platform::Spotify => Box::new(SpotifyAdapter::new(factory.spotify())),
    };
    adapter.load_track(url)?;
    Ok(adapter)
}

pub(crate) fn volume_percent(volume: f32) -> u8 {
    (volume.clamp(0.0, 1.0) * 100.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unsubscribe_and_close_end_streams() {
        let mut ch = EventChannel::default();
        let mut a = ch.subscribe();
        let mut b = ch.subscribe();
        ch.emit(AdapterEvent::Ready);
        ch.unsubscribe(a.id);
        ch.emit(AdapterEvent::PositionUpdate(10));

        assert_eq!(a.drain(), vec![AdapterEvent::Ready]);
        assert_eq!(a.recv().await, None);
        assert_eq!(b.drain(), vec![AdapterEvent::Ready, AdapterEvent::PositionUpdate(10)]);

        ch.close();
        assert_eq!(ch.subscriber_count(), 0);
        assert_eq!(b.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_needs_time_and_movement() {
        let mut t = PositionThrottle::default();
        let t0 = Instant::now();
        assert!(t.should_emit(t0, 1_000));
        assert!(!t.should_emit(t0 + Duration::from_millis(400), 2_000));
        assert!(!t.should_emit(t0 + Duration::from_secs(2), 1_400));
        assert!(t.should_emit(t0 + Duration::from_secs(2), 1_600));
    }

    #[test]
    fn volume_maps_to_percent() {
        assert_eq!(volume_percent(0.5), 50);
        assert_eq!(volume_percent(3.0), 100);
        assert_eq!(volume_percent(-1.0), 0);
    }
}
