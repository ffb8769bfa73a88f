//! Assessor handlers
//!
//! Second-tier review: assessors work a queue of supervisor-resolved
//! detections and issue the final decision. Queue rows are enriched with
//! enumerator name and area so the list is workable without drilling into
//! each record.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::handlers::detections::parse_severities;
use crate::models::{
    AssessorActivity, AssessorFilter, AssessorStats, Detection, DetectionWithContext, Page,
};
use crate::review::AssessorResolution;
use crate::{AppResult, AppState};

#[derive(Debug, Deserialize)]
pub struct AssessorQuery {
    pub lga: Option<String>,
    pub severity: Option<String>,
    pub enumerator_name: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl AssessorQuery {
    fn into_filter(self) -> Result<AssessorFilter, crate::AppError> {
        Ok(AssessorFilter {
            lga: self.lga,
            severity: parse_severities(self.severity.as_deref())?,
            enumerator_name: self.enumerator_name,
            date_from: self.date_from,
            date_to: self.date_to,
            page: self.page.unwrap_or(1),
            page_size: self.page_size.unwrap_or(20),
        })
    }
}

pub async fn queue(
    State(state): State<AppState>,
    Query(query): Query<AssessorQuery>,
) -> AppResult<Json<Page<DetectionWithContext>>> {
    let page = Detection::assessor_queue(&state.pool, &query.into_filter()?).await?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize, Validate)]
pub struct AssessorReviewRequest {
    pub assessor_resolution: AssessorResolution,
    #[validate(length(max = 1000, message = "notes must be at most 1000 characters"))]
    pub assessor_notes: Option<String>,
    pub reviewed_by: Option<Uuid>,
}

/// Finalize one detection. Rejections require justification notes; the
/// transition layer enforces the length floor.
pub async fn review(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AssessorReviewRequest>,
) -> AppResult<Json<Detection>> {
    req.validate()?;
    let detection = Detection::assessor_finalize(
        &state.pool,
        id,
        req.assessor_resolution,
        req.assessor_notes,
        req.reviewed_by,
    )
    .await?;

    Ok(Json(detection))
}

pub async fn completed(
    State(state): State<AppState>,
    Query(query): Query<AssessorQuery>,
) -> AppResult<Json<Page<DetectionWithContext>>> {
    let page = Detection::assessor_completed(&state.pool, &query.into_filter()?).await?;
    Ok(Json(page))
}

pub async fn stats(State(state): State<AppState>) -> AppResult<Json<AssessorStats>> {
    let stats = Detection::assessor_stats(&state.pool).await?;
    Ok(Json(stats))
}

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    pub limit: Option<i64>,
}

fn clamp_activity_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(5).clamp(1, 50)
}

/// The latest finalized reviews, newest first.
pub async fn recent_activity(
    State(state): State<AppState>,
    Query(query): Query<ActivityQuery>,
) -> AppResult<Json<Vec<AssessorActivity>>> {
    let limit = clamp_activity_limit(query.limit);
    let activity = Detection::assessor_recent_activity(&state.pool, limit).await?;
    Ok(Json(activity))
}
