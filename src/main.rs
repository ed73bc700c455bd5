use anyhow::Context;
use axum::{extract::DefaultBodyLimit, Router};
use sqlx::SqlitePool;
use tower_http::{limit::RequestBodyLimitLayer, services::ServeDir};
use tracing::info;

use roomsync::{
    config::Config,
    db,
    hub::Hub,
    metadata::Resolver,
    routes::{self, ws::JwtSecret},
    state::RoomMap,
    utils::flush,
};

const BODY_LIMIT: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().init();

    let cfg  = Config::from_env().context("reading configuration")?;
    let pool = SqlitePool::connect(&cfg.database_url).await
        .with_context(|| format!("opening {}", cfg.database_url))?;
    db::init(&pool).await.context("creating tables")?;

    let resolver = Resolver::new(cfg.metadata_timeout, cfg.oembed_base.clone());
    let hub = Hub::new(RoomMap::default(), Some(pool), resolver);

    tokio::spawn(flush::task(hub.clone(), cfg.flush_interval));  // snapshot writer

    let app = Router::new()
        .merge(routes::app(hub, JwtSecret(cfg.jwt_secret.clone())))
        .fallback_service(ServeDir::new(&cfg.static_dir))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT));

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await
        .with_context(|| format!("binding {}", cfg.bind_addr))?;
    info!(addr = %cfg.bind_addr, "listening");
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
