//! Management API.
//!
//! Served locally under `/api/v1` instead of being proxied:
//!
//! - `GET /api/v1/stats` — every live runtime followed by every destroyed
//!   runtime, in stored order.
//! - `GET /api/v1/commands` — recently parsed package-manager commands.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::proxy::AppState;

/// Pool statistics: live and destroyed runtimes.
pub async fn stats(State(state): State<AppState>) -> Response {
    let runtimes = match state.scheduler.get_runtimes() {
        Ok(runtimes) => runtimes,
        Err(e) => return internal_error(&e),
    };

    match serde_json::to_vec(&runtimes) {
        Ok(body) => json_response(body),
        Err(e) => internal_error(&e),
    }
}

/// Recently parsed full commands, oldest first.
pub async fn commands(State(state): State<AppState>) -> Response {
    let commands = state.history.commands();
    match serde_json::to_vec(&commands) {
        Ok(body) => json_response(body),
        Err(e) => internal_error(&e),
    }
}

/// Unknown management paths: acknowledged, never proxied.
pub async fn unknown() -> StatusCode {
    StatusCode::OK
}

fn json_response(body: Vec<u8>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response()
}

fn internal_error(err: &dyn std::fmt::Display) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("error: {}", err),
    )
        .into_response()
}
