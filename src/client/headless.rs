//! A virtual-clock player standing in for real embeds.
//!
//! One [`HeadlessPlayer`] speaks all three embed dialects, so the same handle
//! can be given to any adapter and inspected afterwards. Time comes from
//! `tokio::time`, which makes paused-clock tests deterministic.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::time::{Duration, Instant};

use super::{
    adapter::EmbedFactory,
    soundcloud::{SoundCloudWidget, WidgetEvent},
    spotify::SpotifyEmbed,
    youtube::{YouTubeEmbed, YouTubeSignal},
};

pub const DEFAULT_DURATION_MS: u64 = 180_000;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Signal {
    Ready,
    Playing,
    Paused,
    Ended,
    Error(i32, String),
}

#[derive(Debug)]
struct Inner {
    source: Option<String>,
    duration_ms: u64,
    base_ms: u64,
    started: Option<Instant>,
    ended: bool,
    volume: u8,
    seeks: Vec<u64>,
    loads: Vec<String>,
    signals: Vec<Signal>,
    fail_next_load: Option<(i32, String)>,
    attached: bool,
}

impl Inner {
    fn position(&self, now: Instant) -> u64 {
        let running = self.started.map(|t| now.duration_since(t).as_millis() as u64).unwrap_or(0);
        (self.base_ms + running).min(self.duration_ms)
    }

    /// Freeze the clock at `now` and report the end once it is reached.
    fn settle(&mut self, now: Instant) {
        if self.started.is_some() && self.position(now) >= self.duration_ms {
            self.base_ms = self.duration_ms;
            self.started = None;
            self.ended = true;
            self.signals.push(Signal::Ended);
        }
    }

    fn load(&mut self, source: &str) {
        self.loads.push(source.to_string());
        self.started = None;
        self.base_ms = 0;
        self.ended = false;
        match self.fail_next_load.take() {
            Some((code, message)) => {
                self.source = None;
                self.signals.push(Signal::Error(code, message));
            }
            None => {
                self.source = Some(source.to_string());
                self.signals.push(Signal::Ready);
            }
        }
    }

    fn play(&mut self, now: Instant) {
        if self.source.is_none() || self.started.is_some() {
            return;
        }
        if self.ended {
            self.base_ms = 0;
            self.ended = false;
        }
        self.started = Some(now);
        self.signals.push(Signal::Playing);
    }

    fn pause(&mut self, now: Instant) {
        if self.started.is_some() {
            self.base_ms = self.position(now);
            self.started = None;
            self.signals.push(Signal::Paused);
        }
    }

    fn seek(&mut self, ms: u64, now: Instant) {
        let ms = ms.min(self.duration_ms);
        self.seeks.push(ms);
        self.base_ms = ms;
        self.ended = false;
        if self.started.is_some() {
            self.started = Some(now);
        }
    }
}

/// Shared handle; clones observe and drive the same player.
#[derive(Debug, Clone)]
pub struct HeadlessPlayer {
    inner: Arc<Mutex<Inner>>,
}

impl Default for HeadlessPlayer {
    fn default() -> Self {
        HeadlessPlayer::with_duration(DEFAULT_DURATION_MS)
    }
}

impl HeadlessPlayer {
    pub fn with_duration(duration_ms: u64) -> Self {
        HeadlessPlayer {
            inner: Arc::new(Mutex::new(Inner {
                source: None,
                duration_ms,
                base_ms: 0,
                started: None,
                ended: false,
                volume: 100,
                seeks: Vec::new(),
                loads: Vec::new(),
                signals: Vec::new(),
                fail_next_load: None,
                attached: true,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take(&self) -> Vec<Signal> {
        let mut inner = self.lock();
        inner.settle(Instant::now());
        std::mem::take(&mut inner.signals)
    }

    /* ---- inspection and scripting ---- */

    pub fn position_ms(&self) -> u64 {
        self.lock().position(Instant::now())
    }

    /// Known once a source loaded.
    pub fn duration_ms(&self) -> Option<u64> {
        let inner = self.lock();
        inner.source.as_ref().map(|_| inner.duration_ms)
    }

    pub fn is_playing(&self) -> bool {
        self.lock().started.is_some()
    }

    pub fn seeks(&self) -> Vec<u64> {
        self.lock().seeks.clone()
    }

    pub fn loads(&self) -> Vec<String> {
        self.lock().loads.clone()
    }

    pub fn volume(&self) -> u8 {
        self.lock().volume
    }

    pub fn is_attached(&self) -> bool {
        self.lock().attached
    }

    pub fn set_duration(&self, duration_ms: u64) {
        self.lock().duration_ms = duration_ms;
    }

    /// Move the playhead as if the listener scrubbed inside the embed.
    pub fn scrub_to(&self, ms: u64) {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.base_ms = ms.min(inner.duration_ms);
        if inner.started.is_some() {
            inner.started = Some(now);
        }
    }

    pub fn fail_next_load(&self, code: i32, message: &str) {
        self.lock().fail_next_load = Some((code, message.to_string()));
    }

    /// Simulate the embed's frame being removed from the page.
    pub fn detach(&self) {
        self.lock().attached = false;
    }
}

impl YouTubeEmbed for HeadlessPlayer {
    fn load_video(&mut self, video_id: &str, start_seconds: f64) {
        let mut inner = self.lock();
        inner.load(video_id);
        if start_seconds > 0.0 {
            inner.base_ms = (start_seconds * 1000.0) as u64;
        }
    }

    fn play_video(&mut self) { self.lock().play(Instant::now()) }

    fn pause_video(&mut self) { self.lock().pause(Instant::now()) }

    fn seek_to(&mut self, seconds: f64, _allow_seek_ahead: bool) {
        self.lock().seek((seconds * 1000.0).round() as u64, Instant::now())
    }

    fn set_volume(&mut self, volume: u8) { self.lock().volume = volume.min(100) }

    fn current_time(&self) -> f64 { self.position_ms() as f64 / 1000.0 }

    fn duration(&self) -> f64 { self.duration_ms().map_or(0.0, |d| d as f64 / 1000.0) }

    fn take_signals(&mut self) -> Vec<YouTubeSignal> {
        self.take()
            .into_iter()
            .map(|s| match s {
                Signal::Ready => YouTubeSignal::Ready,
                Signal::Playing => YouTubeSignal::StateChange(1),
                Signal::Paused => YouTubeSignal::StateChange(2),
                Signal::Ended => YouTubeSignal::StateChange(0),
                Signal::Error(code, _) => YouTubeSignal::Error(code),
            })
            .collect()
    }

    fn is_attached(&self) -> bool { HeadlessPlayer::is_attached(self) }

    fn destroy(&mut self) { self.detach() }
}

impl SoundCloudWidget for HeadlessPlayer {
    fn load(&mut self, url: &str) { self.lock().load(url) }

    fn play(&mut self) { self.lock().play(Instant::now()) }

    fn pause(&mut self) { self.lock().pause(Instant::now()) }

    fn seek_to(&mut self, ms: u64) { self.lock().seek(ms, Instant::now()) }

    fn set_volume(&mut self, volume: u8) { self.lock().volume = volume.min(100) }

    fn position(&self) -> u64 { self.position_ms() }

    fn duration(&self) -> Option<u64> { self.duration_ms() }

    fn take_events(&mut self) -> Vec<WidgetEvent> {
        self.take()
            .into_iter()
            .map(|s| match s {
                Signal::Ready => WidgetEvent::Ready,
                Signal::Playing => WidgetEvent::Play,
                Signal::Paused => WidgetEvent::Pause,
                Signal::Ended => WidgetEvent::Finish,
                Signal::Error(_, message) => WidgetEvent::Error(message),
            })
            .collect()
    }

    fn is_attached(&self) -> bool { HeadlessPlayer::is_attached(self) }

    fn destroy(&mut self) { self.detach() }
}

impl SpotifyEmbed for HeadlessPlayer {
    fn load(&mut self, embed_url: &str) -> Result<(), String> {
        let mut inner = self.lock();
        inner.load(embed_url);
        match inner.signals.pop() {
            Some(Signal::Error(_, message)) => Err(message),
            _ => Ok(()),
        }
    }

    fn is_attached(&self) -> bool { HeadlessPlayer::is_attached(self) }

    fn destroy(&mut self) { self.detach() }
}

/// Hands out fresh headless players and remembers them for inspection.
#[derive(Debug, Clone)]
pub struct HeadlessFactory {
    players: Arc<Mutex<Vec<HeadlessPlayer>>>,
    duration_ms: u64,
}

impl Default for HeadlessFactory {
    fn default() -> Self {
        HeadlessFactory::new(Duration::from_millis(DEFAULT_DURATION_MS))
    }
}

impl HeadlessFactory {
    pub fn new(track_length: Duration) -> Self {
        HeadlessFactory { players: Arc::default(), duration_ms: track_length.as_millis() as u64 }
    }

    fn spawn(&self) -> HeadlessPlayer {
        let player = HeadlessPlayer::with_duration(self.duration_ms);
        self.players.lock().unwrap_or_else(|e| e.into_inner()).push(player.clone());
        player
    }

    pub fn players(&self) -> Vec<HeadlessPlayer> {
        self.players.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn last(&self) -> Option<HeadlessPlayer> {
        self.players().pop()
    }
}

impl EmbedFactory for HeadlessFactory {
    fn youtube(&self) -> Box<dyn YouTubeEmbed> { Box::new(self.spawn()) }

    fn soundcloud(&self) -> Box<dyn SoundCloudWidget> { Box::new(self.spawn()) }

    fn spotify(&self) -> Box<dyn SpotifyEmbed> { Box::new(self.spawn()) }
}
