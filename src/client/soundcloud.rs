use tokio::time::Instant;
use tracing::warn;

use crate::{
    error::{AppErr, AppResult},
    model::Platform,
};

use super::adapter::{
    volume_percent, AdapterEvent, Capabilities, EventChannel, PendingControl, PlayerAdapter, PlayerPhase,
    PositionThrottle,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WidgetEvent {
    Ready,
    Play,
    Pause,
    Finish,
    Error(String),
}

/// The widget API. Times are milliseconds.
pub trait SoundCloudWidget: Send {
    /// Replace the widget's track in place. READY fires again once it is loaded.
    fn load(&mut self, url: &str);
    fn play(&mut self);
    fn pause(&mut self);
    fn seek_to(&mut self, ms: u64);
    /// 0..=100
    fn set_volume(&mut self, volume: u8);
    fn position(&self) -> u64;
    fn duration(&self) -> Option<u64>;
    fn take_events(&mut self) -> Vec<WidgetEvent>;
    fn is_attached(&self) -> bool;
    fn destroy(&mut self);
}

pub struct SoundCloudAdapter {
    widget: Box<dyn SoundCloudWidget>,
    events: EventChannel,
    ready: bool,
    alive: bool,
    phase: Option<PlayerPhase>,
    pending: PendingControl,
    throttle: PositionThrottle,
}

impl SoundCloudAdapter {
    pub fn new(widget: Box<dyn SoundCloudWidget>) -> Self {
        SoundCloudAdapter {
            widget,
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
            self.widget.set_volume(volume_percent(v));
        }
        if let Some(ms) = p.seek {
            self.widget.seek_to(ms);
        }
        match p.playing {
            Some(true) => self.widget.play(),
            Some(false) => self.widget.pause(),
            None => {}
        }
    }

    fn set_phase(&mut self, phase: PlayerPhase) {
        if self.phase != Some(phase) {
            self.phase = Some(phase);
            self.events.emit(AdapterEvent::StateChange(phase));
        }
    }

    fn check_alive(&self) -> AppResult<()> {
        if self.alive {
            Ok(())
        } else {
            Err(AppErr::AdapterLoad { platform: Platform::SoundCloud, message: "widget destroyed".into() })
        }
    }
}

impl PlayerAdapter for SoundCloudAdapter {
    fn platform(&self) -> Platform { Platform::SoundCloud }

    fn capabilities(&self) -> Capabilities {
        Capabilities { control: true, report: true }
    }

    fn load_track(&mut self, url: &str) -> AppResult<()> {
        self.check_alive()?;
        if Platform::detect(url) != Some(Platform::SoundCloud) {
            let message = format!("not a SoundCloud url: {url}");
            self.events.emit(AdapterEvent::Error(message.clone()));
            return Err(AppErr::AdapterLoad { platform: Platform::SoundCloud, message });
        }
        // same widget, new track: not ready until READY fires again
        self.ready = false;
        self.phase = None;
        self.throttle.reset();
        self.widget.load(url);
        Ok(())
    }

    fn play(&mut self) -> AppResult<()> {
        self.check_alive()?;
        if self.ready { self.widget.play() } else { self.pending.playing = Some(true) }
        Ok(())
    }

    fn pause(&mut self) -> AppResult<()> {
        self.check_alive()?;
        if self.ready { self.widget.pause() } else { self.pending.playing = Some(false) }
        Ok(())
    }

    fn seek(&mut self, position_ms: u64) -> AppResult<()> {
        self.check_alive()?;
        if self.ready { self.widget.seek_to(position_ms) } else { self.pending.seek = Some(position_ms) }
        Ok(())
    }

    fn set_volume(&mut self, volume: f32) -> AppResult<()> {
        self.check_alive()?;
        if self.ready {
            self.widget.set_volume(volume_percent(volume));
        } else {
            self.pending.volume = Some(volume);
        }
        Ok(())
    }

    fn position(&self) -> u64 {
        if self.ready { self.widget.position() } else { self.pending.seek.unwrap_or(0) }
    }

    fn duration(&self) -> Option<u64> {
        if self.ready { self.widget.duration().filter(|d| *d > 0) } else { None }
    }

    fn phase(&self) -> Option<PlayerPhase> { self.phase }

    fn is_ready(&self) -> bool { self.ready }

    fn is_alive(&self) -> bool { self.alive && self.widget.is_attached() }

    fn poll(&mut self, now: Instant) {
        if !self.alive {
            return;
        }
        for event in self.widget.take_events() {
            match event {
                WidgetEvent::Ready => {
                    self.ready = true;
                    self.events.emit(AdapterEvent::Ready);
                    self.flush_pending();
                }
                WidgetEvent::Play => self.set_phase(PlayerPhase::Playing),
                WidgetEvent::Pause => self.set_phase(PlayerPhase::Paused),
                WidgetEvent::Finish => self.set_phase(PlayerPhase::Ended),
                WidgetEvent::Error(message) => {
                    warn!("soundcloud widget error: {message}");
                    self.events.emit(AdapterEvent::Error(message));
                }
            }
        }
        if self.ready && self.phase == Some(PlayerPhase::Playing) {
            let position = self.widget.position();
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
            self.widget.destroy();
        }
        self.events.close();
    }
}
