use std::sync::Arc;

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use serde::{Deserialize, Serialize};

use crate::{error::AppError, state::AppState};

#[derive(Deserialize)]
pub struct ScorePayload {
    score: Option<i64>,
    player: Option<String>,
}

#[derive(Serialize)]
pub struct ScoreAccepted {
    ok: bool,
    index: u64,
}

pub async fn score_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ScorePayload>, JsonRejection>,
) -> Result<Json<ScoreAccepted>, AppError> {
    let Json(payload) = payload.map_err(|e| AppError::MalformedPayload(e.body_text()))?;

    let index = state.ledger.submit(payload.score, payload.player).await?;

    Ok(Json(ScoreAccepted { ok: true, index }))
}
