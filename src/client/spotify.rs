use tokio::time::Instant;
use url::Url;

use crate::{
    error::{AppErr, AppResult},
    model::Platform,
};

use super::adapter::{AdapterEvent, Capabilities, EventChannel, PlayerAdapter, PlayerPhase};

/// Spotify's embed can only be pointed at something; playback stays with the user.
pub trait SpotifyEmbed: Send {
    fn load(&mut self, embed_url: &str) -> Result<(), String>;
    fn is_attached(&self) -> bool;
    fn destroy(&mut self);
}

const KINDS: &[&str] = &["track", "album", "playlist", "episode", "show", "artist"];

/// `https://open.spotify.com/embed/<kind>/<id>` for open links and `spotify:` uris.
pub fn embed_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let (kind, id) = match raw.strip_prefix("spotify:") {
        Some(rest) => {
            let mut parts = rest.split(':');
            (parts.next()?.to_string(), parts.next()?.to_string())
        }
        None => {
            let url = Url::parse(raw).ok()?;
            let segments: Vec<&str> = url.path_segments()?.filter(|p| !p.is_empty()).collect();
            // skip locale prefixes like /intl-de/ and an existing /embed/
            let segments: Vec<&str> =
                segments.into_iter().skip_while(|s| s.starts_with("intl-") || *s == "embed").collect();
            match segments.as_slice() {
                [kind, id, ..] => (kind.to_string(), id.to_string()),
                _ => return None,
            }
        }
    };
    let valid = KINDS.contains(&kind.as_str()) && !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| format!("https://open.spotify.com/embed/{kind}/{id}"))
}

pub struct SpotifyAdapter {
    embed: Box<dyn SpotifyEmbed>,
    events: EventChannel,
    ready: bool,
    alive: bool,
}

impl SpotifyAdapter {
    pub fn new(embed: Box<dyn SpotifyEmbed>) -> Self {
        SpotifyAdapter { embed, events: EventChannel::default(), ready: false, alive: true }
    }

    fn unsupported(&mut self, action: &'static str) -> AppResult<()> {
        self.events.emit(AdapterEvent::ManualActionRequired(action));
        Err(AppErr::AdapterControlUnsupported { platform: Platform::Spotify, action })
    }
}

impl PlayerAdapter for SpotifyAdapter {
    fn platform(&self) -> Platform { Platform::Spotify }

    fn capabilities(&self) -> Capabilities {
        Capabilities { control: false, report: false }
    }

    fn load_track(&mut self, url: &str) -> AppResult<()> {
        let fail = |message: String| AppErr::AdapterLoad { platform: Platform::Spotify, message };
        if !self.alive {
            return Err(fail("embed destroyed".into()));
        }
        let Some(embed) = embed_url(url) else {
            let message = format!("not a Spotify link: {url}");
            self.events.emit(AdapterEvent::Error(message.clone()));
            return Err(fail(message));
        };
        self.ready = false;
        match self.embed.load(&embed) {
            Ok(()) => {
                self.ready = true;
                self.events.emit(AdapterEvent::Ready);
                Ok(())
            }
            Err(message) => {
                self.events.emit(AdapterEvent::Error(message.clone()));
                Err(fail(message))
            }
        }
    }

    fn play(&mut self) -> AppResult<()> { self.unsupported("play") }

    fn pause(&mut self) -> AppResult<()> { self.unsupported("pause") }

    fn seek(&mut self, _position_ms: u64) -> AppResult<()> { self.unsupported("seek") }

    fn set_volume(&mut self, _volume: f32) -> AppResult<()> { self.unsupported("set volume") }

    fn position(&self) -> u64 { 0 }

    fn duration(&self) -> Option<u64> { None }

    fn phase(&self) -> Option<PlayerPhase> { None }

    fn is_ready(&self) -> bool { self.ready }

    fn is_alive(&self) -> bool { self.alive && self.embed.is_attached() }

    fn poll(&mut self, _now: Instant) {}

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

    #[test]
    fn builds_embed_urls() {
        assert_eq!(
            embed_url("https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC?si=abc").as_deref(),
            Some("https://open.spotify.com/embed/track/4uLU6hMCjMI75M1A2tKUQC")
        );
        assert_eq!(
            embed_url("https://open.spotify.com/intl-de/album/1DFixLWuPkv3KT3TnV35m3").as_deref(),
            Some("https://open.spotify.com/embed/album/1DFixLWuPkv3KT3TnV35m3")
        );
        assert_eq!(
            embed_url("spotify:playlist:37i9dQZF1DXcBWIGoYBM5M").as_deref(),
            Some("https://open.spotify.com/embed/playlist/37i9dQZF1DXcBWIGoYBM5M")
        );
        assert_eq!(embed_url("https://open.spotify.com/user/someone"), None);
    }
}
