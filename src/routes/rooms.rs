use axum::{extract::{Extension, Path}, routing::get, Json, Router};

use crate::{db::PlaybackSnapshot, error::{AppErr, AppResult}, hub::Hub};

pub fn router() -> Router {
    Router::new().route("/rooms/:id/state", get(room_state))
}

/* ---------------- GET /api/rooms/:id/state ---------------- */
async fn room_state(
    Extension(hub): Extension<Hub>,
    Path(id): Path<String>,
) -> AppResult<Json<PlaybackSnapshot>> {
    hub.snapshot(&id)
        .await?
        .map(Json)
        .ok_or_else(|| AppErr::TrackNotFound(format!("room {id}")))
}
