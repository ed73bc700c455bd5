//! Track metadata from the platforms' public oEmbed endpoints, plus SoundCloud
//! profile/playlist import. Every call is bounded and fails soft.

use std::{collections::HashSet, sync::OnceLock, time::Duration};

use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::{
    error::{AppErr, AppResult},
    model::{Platform, Track, TrackInfo},
};

#[derive(Debug, Deserialize)]
struct OEmbed {
    title: Option<String>,
    author_name: Option<String>,
    thumbnail_url: Option<String>,
}

#[derive(Clone)]
pub struct Resolver {
    client: Client,
    timeout: Duration,
    /// Replaces every platform's oEmbed endpoint (tests, proxies).
    oembed_base: Option<String>,
}

impl Resolver {
    pub fn new(timeout: Duration, oembed_base: Option<String>) -> Self {
        Resolver { client: Client::new(), timeout, oembed_base }
    }

    /// Turn a pasted URL into a track. Only an unsupported URL is an error;
    /// a slow or failing oEmbed lookup falls back to a URL-derived title.
    pub async fn resolve(&self, raw_url: &str, added_by: &str, duration_ms: Option<u64>) -> AppResult<Track> {
        let raw_url = raw_url.trim();
        let platform = Platform::detect(raw_url)
            .ok_or_else(|| AppErr::InvalidTrack(format!("unsupported media url: {raw_url}")))?;
        let url = canonical_url(platform, raw_url);

        let info = match self.fetch_oembed(platform, &url).await {
            Some(OEmbed { title: Some(title), author_name, thumbnail_url }) if !title.is_empty() => {
                TrackInfo::new(title, author_name.filter(|a| !a.is_empty()), thumbnail_url)
            }
            _ => fallback_info(platform, &url),
        };
        Ok(Track::new(url, info, added_by).with_duration(duration_ms))
    }

    async fn fetch_oembed(&self, platform: Platform, url: &str) -> Option<OEmbed> {
        let endpoint = match &self.oembed_base {
            Some(base) => format!("{}/oembed", base.trim_end_matches('/')),
            None => oembed_endpoint(platform).to_string(),
        };
        let resp = self
            .client
            .get(&endpoint)
            .query(&[("url", url), ("format", "json")])
            .timeout(self.timeout)
            .send()
            .await;

        let resp = match resp {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                debug!(%platform, status = %r.status(), "oembed lookup refused");
                return None;
            }
            Err(e) => {
                warn!(%platform, "oembed lookup failed: {e}");
                return None;
            }
        };
        resp.json::<OEmbed>().await.ok()
    }

    /// Expand a SoundCloud profile or playlist page into tracks. Empty on any failure.
    pub async fn import_playlist(&self, raw_url: &str, added_by: &str) -> Vec<Track> {
        if Platform::detect(raw_url) != Some(Platform::SoundCloud) {
            return Vec::new();
        }
        let page_url = normalize_profile_url(raw_url);
        let html = match self
            .client
            .get(&page_url)
            .header("User-Agent", "Mozilla/5.0 (compatible; roomsync)")
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(r) if r.status().is_success() => r.text().await.unwrap_or_default(),
            Ok(r) => {
                warn!(url = %page_url, status = %r.status(), "playlist page refused");
                return Vec::new();
            }
            Err(e) => {
                warn!(url = %page_url, "playlist fetch failed: {e}");
                return Vec::new();
            }
        };

        extract_soundcloud_tracks(&html)
            .into_iter()
            .map(|(url, info)| Track::new(url, info, added_by))
            .collect()
    }
}

fn oembed_endpoint(platform: Platform) -> &'static str {
    match platform {
        Platform::YouTube => "https://www.youtube.com/oembed",
        Platform::SoundCloud => "https://soundcloud.com/oembed",
        Platform::Spotify => "https://open.spotify.com/oembed",
    }
}

/// `spotify:track:ID` becomes an open.spotify.com link; other urls pass through.
pub fn canonical_url(platform: Platform, raw: &str) -> String {
    if platform == Platform::Spotify {
        if let Some(rest) = raw.strip_prefix("spotify:") {
            let parts: Vec<&str> = rest.split(':').collect();
            if let [kind, id] = parts.as_slice() {
                return format!("https://open.spotify.com/{kind}/{id}");
            }
        }
    }
    raw.to_string()
}

fn title_case(slug: &str) -> String {
    slug.split(['-', '_'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut c = w.chars();
            match c.next() {
                Some(first) => first.to_uppercase().chain(c.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

pub fn fallback_info(platform: Platform, url: &str) -> TrackInfo {
    let segments: Vec<String> = Url::parse(url)
        .ok()
        .and_then(|u| u.path_segments().map(|s| s.filter(|p| !p.is_empty()).map(String::from).collect()))
        .unwrap_or_default();

    match (platform, segments.as_slice()) {
        (Platform::SoundCloud, [artist, track, ..]) => {
            TrackInfo::new(title_case(track), Some(title_case(artist)), None)
        }
        (Platform::YouTube, _) => {
            let id = crate::client::youtube::video_id(url).unwrap_or_default();
            TrackInfo::new(format!("YouTube video {id}").trim_end(), None, None)
        }
        (Platform::Spotify, [kind, ..]) => TrackInfo::new(format!("Spotify {kind}"), None, None),
        _ => TrackInfo::new(url, None, None),
    }
}

const RESERVED_SECOND: &[&str] = &[
    "sets", "playlists", "reposts", "tracks", "albums", "popular-tracks", "likes", "followers",
    "following", "comments", "spotlight",
];
const RESERVED_FIRST: &[&str] = &[
    "you", "discover", "search", "upload", "pages", "charts", "stream", "terms-of-use", "imprint",
    "mobile", "people", "tags", "messages", "notifications", "settings", "signin", "logout",
];

/// Profile urls (`soundcloud.com/user`) are scraped from their `/tracks` page.
pub fn normalize_profile_url(raw: &str) -> String {
    let url = raw.trim().trim_end_matches('/');
    let path_len = Url::parse(url)
        .ok()
        .and_then(|u| u.path_segments().map(|s| s.filter(|p| !p.is_empty()).count()))
        .unwrap_or(0);
    if path_len == 1 { format!("{url}/tracks") } else { url.to_string() }
}

fn href_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"href="(?:https://soundcloud\.com)?/([A-Za-z0-9_-]+)/([A-Za-z0-9_-]+)/?""#)
            .expect("static regex")
    })
}

fn hydration_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)window\.__sc_hydration\s*=\s*(\[.*?\]);\s*</script>").expect("static regex")
    })
}

/// Track links found in a SoundCloud page, deduplicated by url, page order kept.
/// The embedded hydration JSON is preferred since it carries real titles.
pub fn extract_soundcloud_tracks(html: &str) -> Vec<(String, TrackInfo)> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    if let Some(json) = hydration_pattern().captures(html).and_then(|c| c.get(1)) {
        if let Ok(data) = serde_json::from_str::<Value>(json.as_str()) {
            collect_hydrated(&data, 0, &mut seen, &mut out);
        }
    }

    for cap in href_pattern().captures_iter(html) {
        let (artist, slug) = (&cap[1], &cap[2]);
        if RESERVED_FIRST.contains(&artist) || RESERVED_SECOND.contains(&slug) {
            continue;
        }
        let url = format!("https://soundcloud.com/{artist}/{slug}");
        if seen.insert(url.clone()) {
            out.push((url, TrackInfo::new(title_case(slug), Some(title_case(artist)), None)));
        }
    }
    out
}

fn collect_hydrated(v: &Value, depth: usize, seen: &mut HashSet<String>, out: &mut Vec<(String, TrackInfo)>) {
    if depth > 12 {
        return;
    }
    match v {
        Value::Object(map) => {
            if map.get("kind").and_then(Value::as_str) == Some("track") {
                if let Some(url) = map.get("permalink_url").and_then(Value::as_str) {
                    if seen.insert(url.to_string()) {
                        let user = map.get("user");
                        let artist = user.and_then(|u| u.get("username")).and_then(Value::as_str).map(String::from);
                        let title = map.get("title").and_then(Value::as_str).unwrap_or("Unknown Track");
                        let thumb = map
                            .get("artwork_url")
                            .and_then(Value::as_str)
                            .or_else(|| user.and_then(|u| u.get("avatar_url")).and_then(Value::as_str))
                            .map(String::from);
                        out.push((url.to_string(), TrackInfo::new(title, artist, thumb)));
                    }
                }
            }
            for child in map.values() {
                collect_hydrated(child, depth + 1, seen, out);
            }
        }
        Value::Array(items) => {
            for child in items {
                collect_hydrated(child, depth + 1, seen, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soundcloud_fallback_uses_slugs() {
        let info = fallback_info(Platform::SoundCloud, "https://soundcloud.com/daft-punk/one_more-time");
        assert_eq!(info.title, "One More Time");
        assert_eq!(info.artist.as_deref(), Some("Daft Punk"));
        assert_eq!(info.full_title, "Daft Punk - One More Time");
    }

    #[test]
    fn spotify_uris_become_links() {
        assert_eq!(
            canonical_url(Platform::Spotify, "spotify:track:4uLU6hMCjMI75M1A2tKUQC"),
            "https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC"
        );
    }

    #[test]
    fn profile_urls_point_at_tracks_page() {
        assert_eq!(normalize_profile_url("https://soundcloud.com/artist/"), "https://soundcloud.com/artist/tracks");
        assert_eq!(
            normalize_profile_url("https://soundcloud.com/artist/sets/mix"),
            "https://soundcloud.com/artist/sets/mix"
        );
    }

    #[test]
    fn scrapes_track_links_and_skips_pages() {
        let html = r#"
            <a href="/artist/first-song">x</a>
            <a href="https://soundcloud.com/artist/second_song">y</a>
            <a href="/artist/sets">sets</a>
            <a href="/discover/sets">nav</a>
            <a href="/artist/first-song">dup</a>
        "#;
        let tracks = extract_soundcloud_tracks(html);
        let urls: Vec<&str> = tracks.iter().map(|(u, _)| u.as_str()).collect();
        assert_eq!(urls, ["https://soundcloud.com/artist/first-song", "https://soundcloud.com/artist/second_song"]);
        assert_eq!(tracks[1].1.full_title, "Artist - Second Song");
    }

    #[test]
    fn prefers_hydration_titles() {
        let html = r#"<script>window.__sc_hydration = [{"hydratable":"user","data":{"collection":[
            {"kind":"track","title":"Real Title","permalink_url":"https://soundcloud.com/a/real-title",
             "user":{"username":"A Person","avatar_url":"https://i1/avatar.jpg"}}]}}];</script>
            <a href="/a/real-title">same</a>"#;
        let tracks = extract_soundcloud_tracks(html);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].1.full_title, "A Person - Real Title");
        assert_eq!(tracks[0].1.thumbnail.as_deref(), Some("https://i1/avatar.jpg"));
    }

    #[tokio::test]
    async fn unreachable_oembed_falls_back() {
        let resolver = Resolver::new(Duration::from_millis(300), Some("http://127.0.0.1:9".into()));
        let track = resolver.resolve("https://soundcloud.com/some-one/a-tune", "u1", Some(1000)).await.unwrap();
        assert_eq!(track.info.title, "A Tune");
        assert_eq!(track.duration_ms, Some(1000));
        assert!(track.is_valid());
    }

    #[tokio::test]
    async fn unsupported_urls_are_rejected() {
        let resolver = Resolver::new(Duration::from_millis(300), Some("http://127.0.0.1:9".into()));
        assert!(matches!(
            resolver.resolve("https://example.com/a.mp3", "u1", None).await,
            Err(AppErr::InvalidTrack(_))
        ));
        assert!(resolver.import_playlist("https://example.com/a", "u1").await.is_empty());
    }
}
