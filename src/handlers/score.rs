//! Scoring trigger handler

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::worker::EnqueueOutcome;
use crate::{AppError, AppResult, AppState};

#[derive(Debug, Deserialize)]
pub struct ScoreRequest {
    pub submission_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ScoreResponse {
    pub queued: bool,
}

/// Enqueue a scoring job. Returns 202 whether the job was queued or an
/// identical one was already waiting; evaluation happens off the request path.
pub async fn trigger(
    State(state): State<AppState>,
    Json(req): Json<ScoreRequest>,
) -> AppResult<(StatusCode, Json<ScoreResponse>)> {
    match state.queue.enqueue(req.submission_id).await {
        EnqueueOutcome::Queued => Ok((StatusCode::ACCEPTED, Json(ScoreResponse { queued: true }))),
        EnqueueOutcome::Duplicate => {
            Ok((StatusCode::ACCEPTED, Json(ScoreResponse { queued: false })))
        }
        EnqueueOutcome::Full => Err(AppError::Unavailable(
            "scoring queue is full, retry later".to_string(),
        )),
    }
}
