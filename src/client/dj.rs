//! Multi-deck DJ mode: independent players with per-deck sync guards.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    config::SyncConfig,
    error::{AppErr, AppResult},
    model::{Actor, RoomSettings, MAX_DECKS},
    permission,
};

use super::{
    adapter::{create_adapter, AdapterEvent, EmbedFactory, PlayerAdapter, PlayerPhase, Subscription},
    guard::SyncGuard,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeckSync {
    Synced(u64),
    /// The target deck is still settling from a previous sync.
    Busy,
}

pub struct Deck {
    adapter: Option<Box<dyn PlayerAdapter>>,
    sub: Option<Subscription>,
    guard: SyncGuard,
    pub url: Option<String>,
    pub volume: f32,
    /// Advisory only; never drives playback.
    pub bpm: Option<f32>,
    pub position: u64,
    pub duration: Option<u64>,
    pub phase: Option<PlayerPhase>,
}

impl Deck {
    fn new(cfg: &SyncConfig) -> Self {
        Deck {
            adapter: None,
            sub: None,
            guard: SyncGuard::new(cfg.guard_timeout),
            url: None,
            volume: 1.0,
            bpm: None,
            position: 0,
            duration: None,
            phase: None,
        }
    }

    pub fn is_loaded(&self) -> bool { self.adapter.is_some() }

    pub fn is_syncing(&self, now: Instant) -> bool { self.guard.is_active(now) }

    fn adapter(&mut self, index: usize) -> AppResult<&mut Box<dyn PlayerAdapter>> {
        self.adapter.as_mut().ok_or_else(|| AppErr::Bad(format!("deck {} is empty", index + 1)))
    }

    fn teardown(&mut self) {
        if let Some(mut a) = self.adapter.take() {
            a.destroy();
        }
        self.sub = None;
    }
}

pub struct DjSession {
    decks: Vec<Deck>,
    factory: Arc<dyn EmbedFactory>,
}

impl DjSession {
    pub fn enter(actor: &Actor, settings: &RoomSettings, factory: Arc<dyn EmbedFactory>, cfg: &SyncConfig) -> AppResult<Self> {
        permission::can_enter_dj(actor, settings).into_result()?;
        let count = settings.dj_decks.clamp(1, MAX_DECKS) as usize;
        info!(user = %actor.user_id, decks = count, "entering DJ mode");
        Ok(DjSession { decks: (0..count).map(|_| Deck::new(cfg)).collect(), factory })
    }

    pub fn deck_count(&self) -> usize { self.decks.len() }

    pub fn deck(&self, index: usize) -> AppResult<&Deck> {
        self.decks.get(index).ok_or_else(|| AppErr::Bad(format!("no deck {}", index + 1)))
    }

    fn deck_mut(&mut self, index: usize) -> AppResult<&mut Deck> {
        self.decks.get_mut(index).ok_or_else(|| AppErr::Bad(format!("no deck {}", index + 1)))
    }

    pub fn load(&mut self, index: usize, url: &str) -> AppResult<()> {
        let factory = self.factory.clone();
        let deck = self.deck_mut(index)?;
        let same_platform = deck.adapter.as_ref().is_some_and(|a| Some(a.platform()) == crate::model::Platform::detect(url));
        if same_platform {
            deck.adapter(index)?.load_track(url)?;
        } else {
            deck.teardown();
            let mut adapter = create_adapter(&factory, url)?;
            deck.sub = Some(adapter.subscribe());
            deck.adapter = Some(adapter);
        }
        deck.url = Some(url.to_string());
        deck.position = 0;
        deck.duration = None;
        deck.phase = None;
        deck.guard.release();
        Ok(())
    }

    pub fn play(&mut self, index: usize) -> AppResult<()> {
        self.deck_mut(index)?.adapter(index)?.play()
    }

    pub fn pause(&mut self, index: usize) -> AppResult<()> {
        self.deck_mut(index)?.adapter(index)?.pause()
    }

    pub fn seek(&mut self, index: usize, position_ms: u64) -> AppResult<()> {
        self.deck_mut(index)?.adapter(index)?.seek(position_ms)
    }

    pub fn set_volume(&mut self, index: usize, volume: f32) -> AppResult<()> {
        let volume = volume.clamp(0.0, 1.0);
        let deck = self.deck_mut(index)?;
        deck.adapter(index)?.set_volume(volume)?;
        deck.volume = volume;
        Ok(())
    }

    pub fn set_bpm(&mut self, index: usize, bpm: Option<f32>) -> AppResult<()> {
        self.deck_mut(index)?.bpm = bpm.filter(|b| b.is_finite() && *b > 0.0);
        Ok(())
    }

    /// Seek `target` to `source`'s position, leaving its play state and volume alone.
    pub fn sync_deck(&mut self, source: usize, target: usize, now: Instant) -> AppResult<DeckSync> {
        if source == target {
            return Err(AppErr::Bad("cannot sync a deck to itself".into()));
        }
        let position = self.deck_mut(source)?.adapter(source)?.position();
        let deck = self.deck_mut(target)?;
        if deck.guard.is_active(now) {
            debug!(target = target + 1, "deck busy");
            return Ok(DeckSync::Busy);
        }
        let adapter = deck.adapter(target)?;
        if !adapter.capabilities().control {
            return Err(AppErr::AdapterControlUnsupported { platform: adapter.platform(), action: "seek" });
        }
        deck.guard.engage(now);
        if let Err(e) = deck.adapter(target)?.seek(position) {
            deck.guard.release();
            return Err(e);
        }
        info!(source = source + 1, target = target + 1, position, "decks synced");
        Ok(DeckSync::Synced(position))
    }

    /// Pump every deck's player and refresh the tracked positions.
    pub fn tick(&mut self, now: Instant) {
        for (i, deck) in self.decks.iter_mut().enumerate() {
            deck.guard.expire(now);
            let Some(adapter) = deck.adapter.as_mut() else { continue };
            adapter.poll(now);
            if let Some(sub) = deck.sub.as_mut() {
                for event in sub.drain() {
                    match event {
                        AdapterEvent::StateChange(phase) => deck.phase = Some(phase),
                        AdapterEvent::Error(msg) => warn!(deck = i + 1, "deck player error: {msg}"),
                        _ => {}
                    }
                }
            }
            deck.position = adapter.position();
            if let Some(duration) = adapter.duration() {
                deck.duration = Some(duration);
            } else if deck.phase == Some(PlayerPhase::Ended) {
                deck.duration = Some(deck.position);
            }
        }
    }

    /// Leave DJ mode, destroying every deck's player.
    pub fn exit(mut self) {
        for deck in &mut self.decks {
            deck.teardown();
        }
        info!("left DJ mode");
    }
}
