//! One client's membership in a room: keeps a local player in step with the
//! room and reports back what the room needs to know.

use std::{collections::VecDeque, sync::Arc};

use tokio::{
    sync::oneshot,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    config::SyncConfig,
    error::AppResult,
    model::{RoomPlaybackState, RoomSettings},
    protocol::{ClientMessage, ServerMessage},
};

use super::{
    adapter::{create_adapter, AdapterEvent, EmbedFactory, PlayerAdapter, PlayerPhase, Subscription},
    autoplay::AutoplayController,
    reconcile::{Correction, LocalReport, Reconciler},
    transport::{Link, Transport},
};

/// Things the user should be told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The player cannot be driven; the user must do this in the embed.
    Manual(&'static str),
    Rejected(String),
    PlayerError(String),
}

pub struct RoomSession<T> {
    link: Link<T>,
    room_id: String,
    user_id: String,
    factory: Arc<dyn EmbedFactory>,
    adapter: Option<Box<dyn PlayerAdapter>>,
    sub: Option<Subscription>,
    loaded_epoch: Option<u64>,
    reconciler: Reconciler,
    autoplay: AutoplayController,
    state: Option<RoomPlaybackState>,
    settings: RoomSettings,
    users: Vec<String>,
    poll: time::Interval,
    notices: VecDeque<Notice>,
}

impl<T: Transport> RoomSession<T> {
    pub async fn join(
        transport: T,
        room_id: &str,
        user_id: &str,
        factory: Arc<dyn EmbedFactory>,
        cfg: SyncConfig,
    ) -> AppResult<Self> {
        let mut link = Link::new(transport, cfg.command_timeout);
        link.submit(ClientMessage::JoinRoom { room_id: room_id.to_string() }).await?;
        info!(room = room_id, user = user_id, "joined room");

        let mut poll = time::interval(cfg.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Ok(RoomSession {
            link,
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            factory,
            adapter: None,
            sub: None,
            loaded_epoch: None,
            reconciler: Reconciler::new(user_id, cfg),
            autoplay: AutoplayController::default(),
            state: None,
            settings: RoomSettings::default(),
            users: Vec::new(),
            poll,
            notices: VecDeque::new(),
        })
    }

    pub fn room_id(&self) -> &str { &self.room_id }

    pub fn state(&self) -> Option<&RoomPlaybackState> { self.state.as_ref() }

    pub fn settings(&self) -> &RoomSettings { &self.settings }

    pub fn users(&self) -> &[String] { &self.users }

    pub fn adapter(&self) -> Option<&dyn PlayerAdapter> { self.adapter.as_deref() }

    pub fn reconciler(&self) -> &Reconciler { &self.reconciler }

    pub fn autoplay(&self) -> &AutoplayController { &self.autoplay }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        self.notices.drain(..).collect()
    }

    /// Handle the next thing that happens. False once the connection closed.
    pub async fn step(&mut self) -> bool {
        let guard_expiry = self.reconciler.guard().expires_at();
        tokio::select! {
            msg = self.link.recv() => match msg {
                Some(msg) => self.on_server(msg).await,
                None => return false,
            },
            Some(event) = next_event(self.sub.as_mut()) => self.on_event(event).await,
            _ = self.poll.tick() => {
                if let Some(adapter) = self.adapter.as_mut() {
                    adapter.poll(Instant::now());
                }
            }
            _ = sleep_until(guard_expiry) => {
                self.reconciler.tick(Instant::now());
            }
        }
        true
    }

    /// Drive the session until `leave` fires or the connection drops.
    pub async fn run(mut self, mut leave: oneshot::Receiver<()>) -> T {
        loop {
            tokio::select! {
                biased;
                _ = &mut leave => break,
                alive = self.step() => if !alive {
                    warn!(room = %self.room_id, "room connection closed");
                    self.teardown();
                    return self.link.into_inner();
                },
            }
        }
        self.leave().await
    }

    /// Tell the server we left, then stop the player.
    pub async fn leave(mut self) -> T {
        let room_id = self.room_id.clone();
        if let Err(e) = self.link.submit(ClientMessage::LeaveRoom { room_id }).await {
            debug!("leave was not acknowledged: {e}");
        }
        self.teardown();
        info!(room = %self.room_id, user = %self.user_id, "left room");
        self.link.into_inner()
    }

    fn teardown(&mut self) {
        if let Some(mut adapter) = self.adapter.take() {
            adapter.destroy();
        }
        self.sub = None;
        self.loaded_epoch = None;
    }

    /* ---------------- user commands ---------------- */

    /// Submit a command; a rejection is also queued as a notice.
    pub async fn command(&mut self, message: ClientMessage) -> AppResult<()> {
        let verb = format!("{message:?}");
        self.link.submit(message).await.map_err(|e| {
            info!(command = %verb, "command refused: {e}");
            self.notices.push_back(Notice::Rejected(e.to_string()));
            e
        })
    }

    pub async fn play(&mut self) -> AppResult<()> {
        self.command(ClientMessage::Play { room_id: self.room_id.clone() }).await
    }

    pub async fn pause(&mut self) -> AppResult<()> {
        self.command(ClientMessage::Pause { room_id: self.room_id.clone() }).await
    }

    pub async fn seek(&mut self, position_ms: u64) -> AppResult<()> {
        let position = position_ms as i64;
        self.command(ClientMessage::Seek { room_id: self.room_id.clone(), position }).await
    }

    /// Manual skip of whatever is playing now.
    pub async fn next(&mut self) -> AppResult<()> {
        let epoch = self.state.as_ref().map(|s| s.track_epoch);
        self.command(ClientMessage::NextTrack { room_id: self.room_id.clone(), epoch, auto: false }).await
    }

    pub async fn replay(&mut self, track_id: &str) -> AppResult<()> {
        let track_id = track_id.to_string();
        self.command(ClientMessage::ReplayTrack { room_id: self.room_id.clone(), track_id }).await
    }

    pub async fn enqueue(&mut self, url: &str) -> AppResult<()> {
        let url = url.to_string();
        self.command(ClientMessage::Enqueue { room_id: self.room_id.clone(), url, duration_ms: None }).await
    }

    /* ---------------- incoming ---------------- */

    async fn on_server(&mut self, msg: ServerMessage) {
        match msg {
            ServerMessage::RoomState { room_id, state, settings } if room_id == self.room_id => {
                self.apply_state(state, settings);
            }
            ServerMessage::Users { room_id, list } if room_id == self.room_id => self.users = list,
            ServerMessage::Rejected { message, .. } => self.notices.push_back(Notice::Rejected(message)),
            _ => {}
        }
    }

    fn apply_state(&mut self, state: RoomPlaybackState, settings: RoomSettings) {
        let now = Instant::now();
        self.settings = settings;
        self.autoplay.on_state(&state);
        self.ensure_track(&state, now);
        if let Some(adapter) = self.adapter.as_mut() {
            for correction in self.reconciler.on_state(&state, adapter.as_mut(), now) {
                if let Correction::Manual(action) = correction {
                    self.notices.push_back(Notice::Manual(action));
                }
            }
        }
        self.state = Some(state);
    }

    /// Load the room's current track when it changed (or was restarted).
    fn ensure_track(&mut self, state: &RoomPlaybackState, now: Instant) {
        let Some(track) = state.current_track.as_ref() else {
            if self.adapter.is_some() {
                debug!(room = %self.room_id, "nothing playing, stopping player");
                self.teardown();
            }
            return;
        };
        if self.loaded_epoch == Some(state.track_epoch) && self.adapter.is_some() {
            return;
        }
        self.loaded_epoch = Some(state.track_epoch);

        let reuse = self.adapter.as_ref().is_some_and(|a| Some(a.platform()) == track.platform() && a.is_alive());
        let loaded = if reuse {
            self.adapter.as_mut().map_or(Ok(()), |adapter| adapter.load_track(&track.url))
        } else {
            self.teardown();
            self.loaded_epoch = Some(state.track_epoch);
            create_adapter(&self.factory, &track.url).map(|mut adapter| {
                self.sub = Some(adapter.subscribe());
                self.adapter = Some(adapter);
            })
        };
        match loaded {
            Ok(()) => {
                info!(room = %self.room_id, track = %track.info.full_title, "loaded track");
                if let Some(adapter) = self.adapter.as_mut() {
                    adapter.poll(now);
                }
            }
            Err(e) => {
                warn!(room = %self.room_id, "could not load track: {e}");
                self.notices.push_back(Notice::PlayerError(e.to_string()));
            }
        }
    }

    async fn on_event(&mut self, event: AdapterEvent) {
        match event {
            AdapterEvent::Ready => debug!("player ready"),
            AdapterEvent::Error(message) => {
                warn!(room = %self.room_id, "player error: {message}");
                self.notices.push_back(Notice::PlayerError(message));
            }
            AdapterEvent::ManualActionRequired(action) => self.notices.push_back(Notice::Manual(action)),
            AdapterEvent::StateChange(PlayerPhase::Ended) => self.on_ended().await,
            AdapterEvent::StateChange(_) => {}
            AdapterEvent::PositionUpdate(position) => self.on_position(position).await,
        }
    }

    async fn on_ended(&mut self) {
        let Some(state) = self.state.as_ref() else { return };
        let Some(epoch) = self.autoplay.on_ended(state, &self.settings) else { return };
        info!(room = %self.room_id, epoch, "track ended, advancing");
        let next = ClientMessage::NextTrack { room_id: self.room_id.clone(), epoch: Some(epoch), auto: true };
        if let Err(e) = self.link.submit(next).await {
            warn!(room = %self.room_id, "autoplay advance failed: {e}");
            self.autoplay.on_failed();
        }
    }

    async fn on_position(&mut self, position: u64) {
        let Some(adapter) = self.adapter.as_mut() else { return };
        let duration = adapter.duration();
        let LocalReport::Forward(position) = self.reconciler.on_local_position(position, adapter.as_mut(), Instant::now())
        else {
            return;
        };
        let Some(state) = self.state.as_ref() else { return };
        let report = ClientMessage::SyncPosition {
            room_id: self.room_id.clone(),
            position: position as i64,
            duration: duration.or_else(|| state.current_track.as_ref().and_then(|t| t.duration_ms)),
            epoch: Some(state.track_epoch),
            seen_at: Some(state.position_updated_at),
        };
        if let Err(e) = self.link.submit(report).await {
            debug!("position report not applied: {e}");
        }
    }
}

async fn next_event(sub: Option<&mut Subscription>) -> Option<AdapterEvent> {
    match sub {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
