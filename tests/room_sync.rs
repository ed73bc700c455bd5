use std::{sync::Arc, time::Duration};

use roomsync::{
    client::{
        headless::HeadlessFactory, EmbedFactory, LocalTransport, Notice, PlayerAdapter, RoomSession,
    },
    config::SyncConfig,
    error::AppErr,
    hub::{Hub, Identity},
    metadata::Resolver,
    model::{Command, Tier, Track, TrackInfo},
    state::{self, RoomMap},
};
use tokio::sync::oneshot;

const ROOM: &str = "lobby";

fn hub() -> Hub {
    // nothing listens on port 9: metadata lookups fail fast and fall back
    Hub::new(RoomMap::default(), None, Resolver::new(Duration::from_millis(200), Some("http://127.0.0.1:9".into())))
}

fn track(id: &str, url: &str) -> Track {
    let mut t = Track::new(url, TrackInfo::new(id, None, None), "owner");
    t.id = id.to_string();
    t
}

async fn join(hub: &Hub, uid: &str, factory: &HeadlessFactory) -> RoomSession<LocalTransport> {
    let peer = hub.peer(Identity { uid: uid.into(), name: uid.into(), tier: Tier::Free });
    let factory: Arc<dyn EmbedFactory> = Arc::new(factory.clone());
    RoomSession::join(LocalTransport::new(peer), ROOM, uid, factory, SyncConfig::default()).await.unwrap()
}

async fn enqueue(hub: &Hub, tracks: Vec<Track>) {
    state::submit(hub.rooms(), ROOM, "owner", Tier::Free, Command::Enqueue { tracks }).await.unwrap();
}

async fn room_state(hub: &Hub) -> roomsync::model::RoomPlaybackState {
    hub.rooms().read().await[ROOM].store.state().clone()
}

fn spawn(session: RoomSession<LocalTransport>) -> (oneshot::Sender<()>, tokio::task::JoinHandle<LocalTransport>) {
    let (tx, rx) = oneshot::channel();
    (tx, tokio::spawn(session.run(rx)))
}

#[tokio::test(start_paused = true)]
async fn both_clients_end_together_and_the_room_advances_once() {
    let hub = hub();
    let (fa, fb) = (HeadlessFactory::new(Duration::from_secs(5)), HeadlessFactory::new(Duration::from_secs(5)));
    let mut owner = join(&hub, "owner", &fa).await;
    let guest = join(&hub, "guest", &fb).await;
    enqueue(&hub, vec![track("A", "https://youtu.be/aaaaaaaaaaa"), track("B", "https://youtu.be/bbbbbbbbbbb")]).await;
    owner.play().await.unwrap();
    let started = room_state(&hub).await;
    assert_eq!(started.current_track_id(), Some("A"));

    let (stop_a, a) = spawn(owner);
    let (stop_b, b) = spawn(guest);
    tokio::time::sleep(Duration::from_secs(8)).await;

    let s = room_state(&hub).await;
    assert_eq!(s.current_track_id(), Some("B"));
    assert_eq!(s.history.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(), vec!["A"]);
    assert!(s.queue.is_empty());
    assert_eq!(s.track_epoch, started.track_epoch + 1);
    assert!(s.is_playing);

    // both players moved on to B, reusing the same embed
    for f in [&fa, &fb] {
        assert_eq!(f.players().len(), 1);
        assert_eq!(f.last().unwrap().loads(), vec!["aaaaaaaaaaa", "bbbbbbbbbbb"]);
    }

    stop_a.send(()).unwrap();
    stop_b.send(()).unwrap();
    a.await.unwrap();
    b.await.unwrap();
    assert!(hub.rooms().read().await[ROOM].users.is_empty());
}

#[tokio::test(start_paused = true)]
async fn drifted_guest_is_pulled_back_without_echoing() {
    let hub = hub();
    let (fa, fb) = (HeadlessFactory::default(), HeadlessFactory::default());
    let mut owner = join(&hub, "owner", &fa).await;
    let guest = join(&hub, "guest", &fb).await;
    enqueue(&hub, vec![track("A", "https://soundcloud.com/artist/long-mix")]).await;
    owner.play().await.unwrap();

    let (stop_a, a) = spawn(owner);
    let (stop_b, b) = spawn(guest);
    tokio::time::sleep(Duration::from_secs(3)).await;

    let host_player = fa.last().unwrap();
    let guest_player = fb.last().unwrap();
    assert!(guest_player.is_playing());
    assert!(guest_player.seeks().is_empty());

    guest_player.scrub_to(guest_player.position_ms() + 15_000);
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(guest_player.seeks().len(), 1);
    assert!(host_player.position_ms().abs_diff(guest_player.position_ms()) < 2_000);
    // the host was never corrected, so it never sought
    assert!(host_player.seeks().is_empty());

    stop_a.send(()).unwrap();
    stop_b.send(()).unwrap();
    a.await.unwrap();
    b.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn guest_controls_are_rejected_until_allowed() {
    let hub = hub();
    let factory = HeadlessFactory::default();
    let _owner = join(&hub, "owner", &factory).await;
    let mut guest = join(&hub, "guest", &factory).await;
    enqueue(&hub, vec![track("A", "https://youtu.be/dQw4w9WgXcQ")]).await;
    let before = room_state(&hub).await;

    let err = guest.seek(5_000).await.unwrap_err();
    assert!(matches!(err, AppErr::PermissionDenied(_)));
    assert!(matches!(guest.take_notices().as_slice(), [Notice::Rejected(_)]));
    assert_eq!(room_state(&hub).await, before);

    // queueing is open to everyone by default
    guest.enqueue("https://soundcloud.com/someone/a-track").await.unwrap();
    let after = room_state(&hub).await;
    assert_eq!(after.queue.len(), 2);
    assert_eq!(after.queue[1].added_by, "guest");
    assert_eq!(after.queue[1].info.full_title, "Someone - A Track");
}

#[tokio::test(start_paused = true)]
async fn spotify_tracks_prompt_instead_of_syncing() {
    let hub = hub();
    let (fa, fb) = (HeadlessFactory::default(), HeadlessFactory::default());
    let mut owner = join(&hub, "owner", &fa).await;
    let mut guest = join(&hub, "guest", &fb).await;
    enqueue(&hub, vec![track("S", "https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC")]).await;
    owner.play().await.unwrap();

    for _ in 0..8 {
        guest.step().await;
    }
    assert_eq!(guest.adapter().map(|a| a.capabilities().control), Some(false));
    assert!(guest.take_notices().contains(&Notice::Manual("play")));

    let player = fb.last().unwrap();
    assert_eq!(player.loads(), vec!["https://open.spotify.com/embed/track/4uLU6hMCjMI75M1A2tKUQC"]);
    assert!(player.seeks().is_empty());
    assert!(!player.is_playing());
}

#[tokio::test(start_paused = true)]
async fn a_track_that_will_not_load_is_reported_and_the_room_keeps_it() {
    let hub = hub();
    let factory = HeadlessFactory::default();
    let mut owner = join(&hub, "owner", &factory).await;
    enqueue(&hub, vec![track("A", "https://youtu.be/aaaaaaaaaaa"), track("B", "https://youtu.be/bbbbbbbbbbb")]).await;
    owner.play().await.unwrap();
    for _ in 0..6 {
        owner.step().await;
    }
    owner.take_notices();

    factory.last().unwrap().fail_next_load(150, "embedding disabled");
    owner.next().await.unwrap();
    let advanced = room_state(&hub).await;
    for _ in 0..6 {
        owner.step().await;
    }

    let notices = owner.take_notices();
    assert!(notices.iter().any(|n| matches!(n, Notice::PlayerError(m) if m.contains("embedding"))));
    let s = room_state(&hub).await;
    assert_eq!(s.current_track_id(), Some("B"));
    assert_eq!(s.track_epoch, advanced.track_epoch);
    assert_eq!(s.history.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn leaving_destroys_the_player_and_frees_the_seat() {
    let hub = hub();
    let factory = HeadlessFactory::default();
    let mut owner = join(&hub, "owner", &factory).await;
    enqueue(&hub, vec![track("A", "https://soundcloud.com/artist/song-a")]).await;
    owner.play().await.unwrap();
    for _ in 0..6 {
        owner.step().await;
    }
    let player = factory.last().unwrap();
    assert!(player.is_attached());

    owner.leave().await;
    assert!(!player.is_attached());
    assert!(hub.rooms().read().await[ROOM].users.is_empty());
}
