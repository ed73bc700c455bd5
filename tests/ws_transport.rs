use std::{sync::Arc, time::Duration};

use roomsync::{
    client::{headless::HeadlessFactory, EmbedFactory, RoomSession, WsTransport},
    config::SyncConfig,
    error::AppErr,
    hub::Hub,
    metadata::Resolver,
    model::{Command, Tier, Track, TrackInfo},
    routes::{self, ws::JwtSecret},
    state::{self, RoomMap},
    utils::jwt,
};

const SECRET: &str = "test-secret";
const ROOM: &str = "lobby";

/// Serves the api and socket routes on an ephemeral port; returns the ws origin.
async fn serve(hub: Hub) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = routes::app(hub, JwtSecret(SECRET.into()));
    tokio::spawn(async move { axum::serve(listener, app.into_make_service()).await.unwrap() });
    format!("ws://{addr}")
}

async fn session(base: &str, uid: &str, factory: &HeadlessFactory) -> RoomSession<WsTransport> {
    let token = jwt::sign(uid, Some(uid), Tier::Free, SECRET).unwrap();
    let transport = WsTransport::connect(base, &token, Some(ROOM)).await.unwrap();
    let factory: Arc<dyn EmbedFactory> = Arc::new(factory.clone());
    RoomSession::join(transport, ROOM, uid, factory, SyncConfig::default()).await.unwrap()
}

#[tokio::test]
async fn sessions_sync_over_a_real_socket() {
    let hub = Hub::new(RoomMap::default(), None, Resolver::new(Duration::from_millis(200), Some("http://127.0.0.1:9".into())));
    let base = serve(hub.clone()).await;
    let factory = HeadlessFactory::default();

    let mut owner = session(&base, "owner", &factory).await;
    let mut guest = session(&base, "guest", &factory).await;
    assert_eq!(hub.rooms().read().await[ROOM].store.room().owner_id, "owner");

    let mut track = Track::new("https://youtu.be/dQw4w9WgXcQ", TrackInfo::new("A", None, None), "owner");
    track.id = "A".into();
    state::submit(hub.rooms(), ROOM, "owner", Tier::Free, Command::Enqueue { tracks: vec![track] }).await.unwrap();
    owner.play().await.unwrap();

    // the guest hears the new state and starts its own player
    tokio::time::timeout(Duration::from_secs(10), async {
        while guest.state().and_then(|s| s.current_track_id()) != Some("A") {
            guest.step().await;
        }
    })
    .await
    .unwrap();
    assert!(guest.state().is_some_and(|s| s.is_playing));
    assert!(guest.adapter().is_some());

    // rejections survive the JSON round trip
    let err = guest.seek(10_000).await.unwrap_err();
    assert!(matches!(err, AppErr::PermissionDenied(_)));

    owner.leave().await;
    guest.leave().await;
    assert!(hub.rooms().read().await[ROOM].users.is_empty());
}

#[tokio::test]
async fn bad_tokens_are_refused_at_the_handshake() {
    let hub = Hub::new(RoomMap::default(), None, Resolver::new(Duration::from_millis(200), None));
    let base = serve(hub).await;
    let err = WsTransport::connect(&base, "not-a-token", Some(ROOM)).await.err().unwrap();
    assert!(matches!(err, AppErr::Transport(_)));
}
