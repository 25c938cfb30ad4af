//! Document endpoint routes.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use quill_engine::{RemoteOperation, RemoteOutcome};

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::{handle_apply, handle_get};
use crate::store::StoredDocument;
use crate::AppState;

/// Create document routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/documents/{id}", get(get_handler))
        .route("/documents/{id}/apply", post(apply_handler))
}

/// POST /documents/{id}/apply - Apply one queued operation.
async fn apply_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<String>,
    Json(operation): Json<RemoteOperation>,
) -> Result<(StatusCode, Json<RemoteOutcome>)> {
    let (status, outcome) = handle_apply(&state.documents, &id, operation)?;
    Ok((status, Json(outcome)))
}

/// GET /documents/{id} - Read the current remote copy.
async fn get_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<StoredDocument>> {
    Ok(Json(handle_get(&state.documents, &id)?))
}
