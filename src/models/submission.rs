//! Submission model
//!
//! Submissions are owned by the ingestion pipeline and read-only here.
//! The engine loads one submission plus the cross-submission context the
//! heuristics need (same-enumerator history, nearby other-enumerator fixes,
//! form schema) in a single pass, then evaluates purely over that snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Submission {
    pub id: Uuid,
    pub enumerator_id: Uuid,
    pub questionnaire_form_id: Uuid,
    pub respondent_id: Option<Uuid>,
    pub lga: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub completion_time_seconds: Option<i32>,
    pub gps_latitude: Option<f64>,
    pub gps_longitude: Option<f64>,
    pub gps_accuracy_m: Option<f64>,
    pub raw_data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// A prior submission by the same enumerator within the lookback window.
#[derive(Debug, Clone, FromRow)]
pub struct RecentSubmission {
    pub id: Uuid,
    pub questionnaire_form_id: Uuid,
    pub submitted_at: DateTime<Utc>,
    pub completion_time_seconds: Option<i32>,
    pub gps_latitude: Option<f64>,
    pub gps_longitude: Option<f64>,
    pub raw_data: Option<serde_json::Value>,
}

/// A recent submission by a different enumerator carrying GPS.
#[derive(Debug, Clone, FromRow)]
pub struct NearbySubmission {
    pub id: Uuid,
    pub enumerator_id: Uuid,
    pub submitted_at: DateTime<Utc>,
    pub gps_latitude: f64,
    pub gps_longitude: f64,
}

impl Submission {
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Submission>("SELECT * FROM submissions WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Same-enumerator history since `cutoff`, newest first, bounded.
    pub async fn recent_for_enumerator(
        pool: &PgPool,
        enumerator_id: Uuid,
        exclude_submission: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<RecentSubmission>, sqlx::Error> {
        sqlx::query_as::<_, RecentSubmission>(
            r#"
            SELECT id, questionnaire_form_id, submitted_at, completion_time_seconds,
                   gps_latitude, gps_longitude, raw_data
            FROM submissions
            WHERE enumerator_id = $1 AND submitted_at >= $2 AND id <> $3
            ORDER BY submitted_at DESC
            LIMIT 100
            "#,
        )
        .bind(enumerator_id)
        .bind(cutoff)
        .bind(exclude_submission)
        .fetch_all(pool)
        .await
    }

    /// GPS-carrying submissions by other enumerators since `cutoff`.
    pub async fn nearby_others(
        pool: &PgPool,
        exclude_enumerator: Uuid,
        exclude_submission: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<NearbySubmission>, sqlx::Error> {
        sqlx::query_as::<_, NearbySubmission>(
            r#"
            SELECT id, enumerator_id, submitted_at, gps_latitude, gps_longitude
            FROM submissions
            WHERE submitted_at >= $1
              AND gps_latitude IS NOT NULL
              AND gps_longitude IS NOT NULL
              AND enumerator_id <> $2
              AND id <> $3
            LIMIT 200
            "#,
        )
        .bind(cutoff)
        .bind(exclude_enumerator)
        .bind(exclude_submission)
        .fetch_all(pool)
        .await
    }

    /// Form schema JSON for battery identification, if the form exists.
    pub async fn form_schema(
        pool: &PgPool,
        form_id: Uuid,
    ) -> Result<Option<serde_json::Value>, sqlx::Error> {
        sqlx::query_scalar::<_, Option<serde_json::Value>>(
            "SELECT form_schema FROM questionnaire_forms WHERE id = $1",
        )
        .bind(form_id)
        .fetch_optional(pool)
        .await
        .map(|row| row.flatten())
    }
}
