use tokio::time::Instant;
use tracing::warn;
use url::Url;

use crate::{
    error::{AppErr, AppResult},
    model::Platform,
};

use super::adapter::{
    volume_percent, AdapterEvent, Capabilities, EventChannel, PendingControl, PlayerAdapter, PlayerPhase,
    PositionThrottle,
};

/// Signals pushed by the iframe player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YouTubeSignal {
    Ready,
    /// -1 unstarted, 0 ended, 1 playing, 2 paused, 3 buffering, 5 cued.
    StateChange(i32),
    Error(i32),
}

/// The iframe player API: seconds, numeric states and error codes.
pub trait YouTubeEmbed: Send {
    fn load_video(&mut self, video_id: &str, start_seconds: f64);
    fn play_video(&mut self);
    fn pause_video(&mut self);
    fn seek_to(&mut self, seconds: f64, allow_seek_ahead: bool);
    /// 0..=100
    fn set_volume(&mut self, volume: u8);
    fn current_time(&self) -> f64;
    /// 0 until the video's metadata has loaded.
    fn duration(&self) -> f64;
    fn take_signals(&mut self) -> Vec<YouTubeSignal>;
    fn is_attached(&self) -> bool;
    fn destroy(&mut self);
}

pub fn phase_of(code: i32) -> Option<PlayerPhase> {
    match code {
        0 => Some(PlayerPhase::Ended),
        1 => Some(PlayerPhase::Playing),
        2 | 5 => Some(PlayerPhase::Paused),
        3 => Some(PlayerPhase::Buffering),
        _ => None,
    }
}

pub fn error_message(code: i32) -> String {
    match code {
        2 => "invalid video id".into(),
        5 => "video cannot be played in the HTML5 player".into(),
        100 => "video not found or private".into(),
        101 | 150 => "video owner does not allow embedding".into(),
        other => format!("player error {other}"),
    }
}

/// Video id from watch, short, embed, shorts, live and music links.
pub fn video_id(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    let host = url.host_str()?.trim_start_matches("www.").trim_start_matches("m.");
    let segments: Vec<&str> = url.path_segments().map(|s| s.filter(|p| !p.is_empty()).collect()).unwrap_or_default();

    let id = match (host, segments.as_slice()) {
        ("youtu.be", [id, ..]) => id.to_string(),
        (_, ["watch"]) => url.query_pairs().find(|(k, _)| k == "v").map(|(_, v)| v.into_owned())?,
        (_, ["embed" | "shorts" | "live" | "v", id, ..]) => id.to_string(),
        _ => return None,
    };
    let valid = !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    valid.then_some(id)
}

pub struct YouTubeAdapter {
    embed: Box<dyn YouTubeEmbed>,
    events: EventChannel,
    ready: bool,
    alive: bool,
    phase: Option<PlayerPhase>,
    pending: PendingControl,
    throttle: PositionThrottle,
}

impl YouTubeAdapter {
    pub fn new(embed: Box<dyn YouTubeEmbed>) -> Self {
        YouTubeAdapter {
            embed,
            events: EventChannel::default(),
            ready: false,
            alive: true,
            phase: None,
            pending: PendingControl::default(),
            throttle: PositionThrottle::default(),
        }
    }

    fn flush_pending(&mut self) {
        let p = self.pending.take();
        if let Some(v) = p.volume {
            self.embed.set_volume(volume_percent(v));
        }
        if let Some(ms) = p.seek {
            self.embed.seek_to(ms as f64 / 1000.0, true);
        }
        match p.playing {
            Some(true) => self.embed.play_video(),
            Some(false) => self.embed.pause_video(),
            None => {}
        }
    }

    fn check_alive(&self) -> AppResult<()> {
        if self.alive {
            Ok(())
        } else {
            Err(AppErr::AdapterLoad { platform: Platform::YouTube, message: "player destroyed".into() })
        }
    }
}

impl PlayerAdapter for YouTubeAdapter {
    fn platform(&self) -> Platform { Platform::YouTube }

    fn capabilities(&self) -> Capabilities {
        Capabilities { control: true, report: true }
    }

    fn load_track(&mut self, url: &str) -> AppResult<()> {
        self.check_alive()?;
        let Some(id) = video_id(url) else {
            let message = format!("no video id in {url}");
            self.events.emit(AdapterEvent::Error(message.clone()));
            return Err(AppErr::AdapterLoad { platform: Platform::YouTube, message });
        };
        self.phase = None;
        self.throttle.reset();
        self.embed.load_video(&id, 0.0);
        Ok(())
    }

    fn play(&mut self) -> AppResult<()> {
        self.check_alive()?;
        if self.ready { self.embed.play_video() } else { self.pending.playing = Some(true) }
        Ok(())
    }

    fn pause(&mut self) -> AppResult<()> {
        self.check_alive()?;
        if self.ready { self.embed.pause_video() } else { self.pending.playing = Some(false) }
        Ok(())
    }

    fn seek(&mut self, position_ms: u64) -> AppResult<()> {
        self.check_alive()?;
        if self.ready {
            self.embed.seek_to(position_ms as f64 / 1000.0, true);
        } else {
            self.pending.seek = Some(position_ms);
        }
        Ok(())
    }

    fn set_volume(&mut self, volume: f32) -> AppResult<()> {
        self.check_alive()?;
        if self.ready {
            self.embed.set_volume(volume_percent(volume));
        } else {
            self.pending.volume = Some(volume);
        }
        Ok(())
    }

    fn position(&self) -> u64 {
        if !self.ready {
            return self.pending.seek.unwrap_or(0);
        }
        (self.embed.current_time().max(0.0) * 1000.0).round() as u64
    }

    fn duration(&self) -> Option<u64> {
        let seconds = self.embed.duration();
        (self.ready && seconds > 0.0).then(|| (seconds * 1000.0).round() as u64)
    }

    fn phase(&self) -> Option<PlayerPhase> { self.phase }

    fn is_ready(&self) -> bool { self.ready }

    fn is_alive(&self) -> bool { self.alive && self.embed.is_attached() }

    fn poll(&mut self, now: Instant) {
        if !self.alive {
            return;
        }
        for signal in self.embed.take_signals() {
            match signal {
                YouTubeSignal::Ready => {
                    // the iframe player stays ready across loadVideoById
                    if !self.ready {
                        self.ready = true;
                        self.events.emit(AdapterEvent::Ready);
                    }
                    self.flush_pending();
                }
                YouTubeSignal::StateChange(code) => {
                    if let Some(phase) = phase_of(code).filter(|p| Some(*p) != self.phase) {
                        self.phase = Some(phase);
                        self.events.emit(AdapterEvent::StateChange(phase));
                    }
                }
                YouTubeSignal::Error(code) => {
                    let message = error_message(code);
                    warn!(code, "youtube player error: {message}");
                    self.events.emit(AdapterEvent::Error(message));
                }
            }
        }
        if self.ready && self.phase == Some(PlayerPhase::Playing) {
            let position = self.position();
            if self.throttle.should_emit(now, position) {
                self.events.emit(AdapterEvent::PositionUpdate(position));
            }
        }
    }

    fn events(&mut self) -> &mut EventChannel { &mut self.events }

    fn destroy(&mut self) {
        if self.alive {
            self.alive = false;
            self.ready = false;
            self.embed.destroy();
        }
        self.events.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::headless::HeadlessPlayer;
    use tokio::time::Duration;

    fn adapter() -> (YouTubeAdapter, HeadlessPlayer) {
        let player = HeadlessPlayer::default();
        (YouTubeAdapter::new(Box::new(player.clone())), player)
    }

    #[tokio::test(start_paused = true)]
    async fn controls_before_ready_are_held_then_applied() {
        let (mut yt, player) = adapter();
        let mut sub = yt.subscribe();
        yt.load_track("https://youtu.be/dQw4w9WgXcQ").unwrap();
        yt.set_volume(0.25).unwrap();
        yt.seek(30_000).unwrap();
        yt.pause().unwrap();
        yt.play().unwrap();

        assert!(!yt.is_ready());
        assert_eq!(yt.position(), 30_000);
        assert_eq!(yt.duration(), None);
        assert!(player.seeks().is_empty());
        assert!(!player.is_playing());
        assert_eq!(player.volume(), 100);

        yt.poll(Instant::now());
        assert!(yt.is_ready());
        assert_eq!(sub.drain(), vec![AdapterEvent::Ready]);
        assert_eq!(player.seeks(), vec![30_000]);
        assert!(player.is_playing());
        assert_eq!(player.volume(), 25);

        tokio::time::advance(Duration::from_millis(1_500)).await;
        yt.poll(Instant::now());
        assert_eq!(
            sub.drain(),
            vec![AdapterEvent::StateChange(PlayerPhase::Playing), AdapterEvent::PositionUpdate(31_500)]
        );
        assert_eq!(yt.duration(), Some(180_000));
    }

    #[tokio::test(start_paused = true)]
    async fn stays_ready_across_loads_and_reports_embed_errors() {
        let (mut yt, player) = adapter();
        let mut sub = yt.subscribe();
        yt.load_track("https://youtu.be/dQw4w9WgXcQ").unwrap();
        yt.poll(Instant::now());
        sub.drain();

        yt.load_track("https://www.youtube.com/watch?v=9bZkp7q5F2I").unwrap();
        assert!(yt.is_ready());
        yt.seek(5_000).unwrap();
        assert_eq!(player.seeks(), vec![5_000]);
        assert_eq!(player.loads(), vec!["dQw4w9WgXcQ", "9bZkp7q5F2I"]);

        player.fail_next_load(150, "embedding disabled");
        yt.load_track("https://youtu.be/aaaaaaaaaaa").unwrap();
        yt.poll(Instant::now());
        assert!(sub.drain().contains(&AdapterEvent::Error(error_message(150))));

        let err = yt.load_track("https://soundcloud.com/a/b").unwrap_err();
        assert!(matches!(err, AppErr::AdapterLoad { platform: Platform::YouTube, .. }));
        assert!(matches!(sub.try_recv(), Some(AdapterEvent::Error(_))));

        yt.destroy();
        assert!(!yt.is_alive());
        assert!(!player.is_attached());
        assert!(yt.play().is_err());
    }

    #[test]
    fn extracts_ids_from_every_link_shape() {
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=42",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://youtube.com/shorts/dQw4w9WgXcQ",
            "https://www.youtube.com/live/dQw4w9WgXcQ?si=x",
            "https://music.youtube.com/watch?v=dQw4w9WgXcQ&list=RD",
        ] {
            assert_eq!(video_id(url).as_deref(), Some("dQw4w9WgXcQ"), "{url}");
        }
        assert_eq!(video_id("https://www.youtube.com/channel/UC123"), None);
        assert_eq!(video_id("https://www.youtube.com/watch?v=bad%20id"), None);
    }

    #[test]
    fn numeric_states_and_errors() {
        assert_eq!(phase_of(-1), None);
        assert_eq!(phase_of(0), Some(PlayerPhase::Ended));
        assert_eq!(phase_of(3), Some(PlayerPhase::Buffering));
        assert_eq!(phase_of(5), Some(PlayerPhase::Paused));
        assert!(error_message(150).contains("embedding"));
        assert_eq!(error_message(101), error_message(150));
    }
}
