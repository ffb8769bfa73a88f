//! Detection handlers
//!
//! Supervisor-facing surface: browse scored detections, inspect evidence,
//! resolve single detections, list spatial clusters and resolve a cluster's
//! members in one transaction.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::engine::cluster::{self, Cluster};
use crate::models::{Detection, DetectionFilter, Page, Severity, ThresholdSet};
use crate::review::Resolution;
use crate::{AppError, AppResult, AppState};

/// Parse a comma-separated severity filter; unknown values are rejected.
pub(crate) fn parse_severities(raw: Option<&str>) -> Result<Vec<Severity>, AppError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| {
            Severity::parse(t).ok_or_else(|| AppError::Validation(format!("unknown severity '{t}'")))
        })
        .collect()
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub severity: Option<String>,
    pub reviewed: Option<bool>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Page<Detection>>> {
    let filter = DetectionFilter {
        severity: parse_severities(query.severity.as_deref())?,
        reviewed: query.reviewed,
        page: query.page.unwrap_or(1),
        page_size: query.page_size.unwrap_or(20),
    };
    let page = Detection::list(&state.pool, &filter).await?;
    Ok(Json(page))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Detection>> {
    let detection = Detection::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Detection not found".to_string()))?;

    Ok(Json(detection))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReviewRequest {
    pub resolution: Resolution,
    #[validate(length(max = 1000, message = "notes must be at most 1000 characters"))]
    pub resolution_notes: Option<String>,
    pub reviewed_by: Option<Uuid>,
}

/// Apply a supervisor resolution to one detection.
pub async fn review(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReviewRequest>,
) -> AppResult<Json<Detection>> {
    req.validate()?;
    let detection = Detection::resolve(
        &state.pool,
        id,
        req.resolution,
        req.resolution_notes,
        req.reviewed_by,
    )
    .await?;

    Ok(Json(detection))
}

/// Spatial clusters over the currently unresolved detections.
pub async fn clusters(State(state): State<AppState>) -> AppResult<Json<Vec<Cluster>>> {
    let thresholds = ThresholdSet::load(&state.pool).await?;
    let radius_m = thresholds.get("gps_cluster_radius_m", 50.0);
    let candidates = Detection::cluster_candidates(&state.pool).await?;
    Ok(Json(cluster::detect_clusters(&candidates, radius_m)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct BulkReviewRequest {
    #[validate(length(min = 2, max = 50, message = "between 2 and 50 ids required"))]
    pub ids: Vec<Uuid>,
    pub resolution: Resolution,
    #[validate(length(
        min = 10,
        max = 500,
        message = "justification must be 10 to 500 characters"
    ))]
    pub resolution_notes: String,
    pub reviewed_by: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct BulkReviewResponse {
    pub count: u64,
    pub resolution: Resolution,
}

/// Resolve a batch of detections in one transaction; fails atomically if any
/// target is missing or already reviewed.
pub async fn bulk_review(
    State(state): State<AppState>,
    Json(req): Json<BulkReviewRequest>,
) -> AppResult<Json<BulkReviewResponse>> {
    req.validate()?;
    let count = Detection::bulk_resolve(
        &state.pool,
        &req.ids,
        req.resolution,
        &req.resolution_notes,
        req.reviewed_by,
    )
    .await?;

    Ok(Json(BulkReviewResponse {
        count,
        resolution: req.resolution,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_severities() {
        assert!(parse_severities(None).unwrap().is_empty());
        assert_eq!(
            parse_severities(Some("high,critical")).unwrap(),
            vec![Severity::High, Severity::Critical]
        );
        assert_eq!(
            parse_severities(Some(" low , ")).unwrap(),
            vec![Severity::Low]
        );
        assert!(parse_severities(Some("severe")).is_err());
    }
}
