//! Threshold handlers

use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use validator::Validate;

use crate::models::FraudThreshold;
use crate::{AppError, AppResult, AppState};

/// Active thresholds grouped by rule category.
pub async fn list(
    State(state): State<AppState>,
) -> AppResult<Json<BTreeMap<String, Vec<FraudThreshold>>>> {
    let rows = FraudThreshold::list_active(&state.pool).await?;
    let mut grouped: BTreeMap<String, Vec<FraudThreshold>> = BTreeMap::new();
    for row in rows {
        grouped.entry(row.rule_category.clone()).or_default().push(row);
    }
    Ok(Json(grouped))
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateThresholdRequest {
    pub value: f64,
    #[validate(length(max = 500, message = "notes must be at most 500 characters"))]
    pub notes: Option<String>,
}

/// Publish a new version of one rule.
pub async fn update(
    State(state): State<AppState>,
    Path(rule_key): Path<String>,
    Json(req): Json<UpdateThresholdRequest>,
) -> AppResult<Json<FraudThreshold>> {
    req.validate()?;
    if !req.value.is_finite() {
        return Err(AppError::Validation("value must be finite".to_string()));
    }

    let updated = FraudThreshold::update(&state.pool, &rule_key, req.value, req.notes)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("unknown rule key '{rule_key}'")))?;

    Ok(Json(updated))
}
