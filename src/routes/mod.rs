use axum::{Extension, Router};

use crate::hub::Hub;

pub mod rooms;
pub mod ws;

/// API and socket routes with the hub and token secret attached.
pub fn app(hub: Hub, secret: ws::JwtSecret) -> Router {
    router()
        .layer(Extension(hub))
        .layer(Extension(secret))
}

pub fn router() -> Router {
    Router::new()
        .nest("/api", rooms::router())
        .nest("/ws",  ws::router())
}
