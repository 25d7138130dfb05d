use std::io::Cursor;

use axum::{
    routing::{get, post},
    Router,
    extract::{Json, Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse},
};
use image::ImageFormat;
use serde_json::json;
use tower_http::cors::{CorsLayer, Any};
use chrono::Utc;
use uuid::Uuid;

use crate::error::{Result, AppError};
use crate::api::models::{image_path, CaptionRequest, CaptionResponse, NavigationResponse};
use crate::api::response::{self, ApiResponse};
use crate::pipeline::process_url_input;
use crate::session::Direction;
use crate::AppState;

const VIEWER_PAGE: &str = include_str!("../../static/index.html");

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(viewer_page))
        .route("/health", get(health))
        .route("/api/caption", post(caption_handler))
        .route("/api/sessions/:id/previous", post(previous_handler))
        .route("/api/sessions/:id/next", post(next_handler))
        .route("/api/sessions/:id/batches/:generation/images/:index", get(image_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(app_state)
}

async fn viewer_page() -> Html<&'static str> {
    Html(VIEWER_PAGE)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({"status": "ok", "model": state.config.model_id}))
}

async fn caption_handler(
    State(state): State<AppState>,
    Json(req): Json<CaptionRequest>,
) -> impl IntoResponse {
    tracing::info!(url = %req.url, "processing request");
    let start_time = std::time::Instant::now();

    // Navigation sees an empty session while the new batch is built.
    let handle = state.sessions.reset(req.session_id);
    let outcome = process_url_input(&state.model, &req.url).await;
    let stored = outcome.session.len();
    if !state.sessions.fill(handle, outcome.session) {
        tracing::debug!(session = %handle.id, "a newer submission replaced this batch");
    }
    let image_url = outcome.view.show_image.then(|| image_path(handle, 0));

    tracing::info!(
        url = %req.url,
        session = %handle.id,
        generation = handle.generation,
        stored,
        elapsed = ?start_time.elapsed(),
        "request processed"
    );

    response::success(CaptionResponse {
        session_id: handle.id,
        view: outcome.view,
        image_url,
        processed_at: Utc::now(),
    })
}

async fn previous_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    navigate(&state, id, Direction::Previous)
}

async fn next_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    navigate(&state, id, Direction::Next)
}

fn navigate(
    state: &AppState,
    id: Uuid,
    direction: Direction,
) -> Result<(StatusCode, Json<ApiResponse<NavigationResponse>>)> {
    let navigation = state
        .sessions
        .with_session(&id, |session, handle| {
            let caption = session.step(direction).map(|entry| entry.caption.clone())?;
            Some(NavigationResponse {
                moved: true,
                caption: Some(caption),
                status: session.status(),
                image_url: Some(image_path(handle, session.index())),
            })
        })
        .ok_or(AppError::SessionNotFound(id))?
        .unwrap_or_default();

    tracing::debug!(%id, ?direction, moved = navigation.moved, "navigation");
    Ok(response::success(navigation))
}

async fn image_handler(
    State(state): State<AppState>,
    Path((id, generation, index)): Path<(Uuid, u64, usize)>,
) -> Result<impl IntoResponse> {
    let image = state
        .sessions
        .with_session(&id, |session, handle| {
            (handle.generation == generation)
                .then(|| session.get(index).map(|entry| entry.image.clone()))
                .flatten()
        })
        .ok_or(AppError::SessionNotFound(id))?
        .ok_or(AppError::ImageNotFound { session: id, index })?;

    let mut png = Vec::new();
    image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

    Ok((
        [
            (header::CONTENT_TYPE, "image/png"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        png,
    ))
}
