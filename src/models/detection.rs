//! Detection model
//!
//! One row per scored submission per config snapshot version. Created by the
//! scoring worker via idempotent upsert; mutated only by the review state
//! machine (resolution fields); never deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::engine::DetectionResult;
use crate::error::AppError;
use crate::review::{
    validate_assessor_review, validate_bulk_review, validate_supervisor_review, AssessorResolution,
    Resolution, ReviewState,
};

/// Discrete risk tier derived from the total score.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum Severity {
    Clean,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Clean => "clean",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "clean" => Some(Severity::Clean),
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Detection {
    pub id: Uuid,
    pub submission_id: Uuid,
    pub enumerator_id: Uuid,
    pub computed_at: DateTime<Utc>,
    pub config_snapshot_version: i32,
    pub gps_score: f64,
    pub speed_score: f64,
    pub straightline_score: f64,
    pub duplicate_score: f64,
    pub timing_score: f64,
    pub total_score: f64,
    pub severity: Severity,
    pub gps_evidence: Option<serde_json::Value>,
    pub speed_evidence: Option<serde_json::Value>,
    pub straightline_evidence: Option<serde_json::Value>,
    pub duplicate_evidence: Option<serde_json::Value>,
    pub timing_evidence: Option<serde_json::Value>,
    pub resolution: Option<Resolution>,
    pub resolution_notes: Option<String>,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub assessor_resolution: Option<AssessorResolution>,
    pub assessor_notes: Option<String>,
    pub assessor_reviewed_by: Option<Uuid>,
    pub assessor_reviewed_at: Option<DateTime<Utc>>,
}

impl Detection {
    fn review_state(resolution: Option<Resolution>, assessor: Option<AssessorResolution>) -> ReviewState {
        ReviewState {
            resolution,
            assessor_resolution: assessor,
        }
    }
}

/// Filters for the supervisor-facing detection list.
#[derive(Debug, Default)]
pub struct DetectionFilter {
    pub severity: Vec<Severity>,
    pub reviewed: Option<bool>,
    pub page: i64,
    pub page_size: i64,
}

/// Filters for the assessor queue and completed list.
#[derive(Debug, Default)]
pub struct AssessorFilter {
    pub lga: Option<String>,
    pub severity: Vec<Severity>,
    pub enumerator_name: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub page: i64,
    pub page_size: i64,
}

/// A paginated result page.
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
    pub total_items: i64,
}

impl<T> Page<T> {
    fn new(data: Vec<T>, page: i64, page_size: i64, total_items: i64) -> Self {
        let total_pages = if total_items == 0 {
            0
        } else {
            (total_items + page_size - 1) / page_size
        };
        Self {
            data,
            page,
            page_size,
            total_pages,
            total_items,
        }
    }
}

/// Detection joined with submission/enumerator context for assessor views.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DetectionWithContext {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub detection: Detection,
    pub enumerator_name: Option<String>,
    pub lga: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

/// Unresolved, GPS-carrying detection: the input of the cluster detector.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ClusterCandidate {
    pub id: Uuid,
    pub submission_id: Uuid,
    pub enumerator_id: Uuid,
    pub severity: Severity,
    pub total_score: f64,
    pub submitted_at: DateTime<Utc>,
    pub gps_latitude: f64,
    pub gps_longitude: f64,
}

/// One finalized review, for the assessor activity feed.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AssessorActivity {
    pub detection_id: Uuid,
    pub submission_id: Uuid,
    pub severity: Severity,
    pub total_score: f64,
    pub assessor_resolution: AssessorResolution,
    pub assessor_notes: Option<String>,
    pub assessor_reviewed_by: Option<Uuid>,
    pub assessor_reviewed_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct AssessorStats {
    pub total_pending: i64,
    pub severity_breakdown: std::collections::HashMap<String, i64>,
    pub reviewed_today: i64,
}

#[derive(Debug, FromRow)]
struct ReviewRow {
    resolution: Option<Resolution>,
    assessor_resolution: Option<AssessorResolution>,
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

impl Detection {
    /// Persist an engine result. Idempotent on
    /// `(submission_id, config_snapshot_version)`: re-delivery of the same
    /// trigger overwrites scores/evidence in place and never touches the
    /// review fields. A new config version inserts a new row.
    pub async fn upsert(pool: &PgPool, result: &DetectionResult) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Detection>(
            r#"
            INSERT INTO fraud_detections
                (submission_id, enumerator_id, config_snapshot_version,
                 gps_score, speed_score, straightline_score, duplicate_score, timing_score,
                 total_score, severity,
                 gps_evidence, speed_evidence, straightline_evidence, duplicate_evidence, timing_evidence)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (submission_id, config_snapshot_version) DO UPDATE SET
                computed_at = NOW(),
                gps_score = EXCLUDED.gps_score,
                speed_score = EXCLUDED.speed_score,
                straightline_score = EXCLUDED.straightline_score,
                duplicate_score = EXCLUDED.duplicate_score,
                timing_score = EXCLUDED.timing_score,
                total_score = EXCLUDED.total_score,
                severity = EXCLUDED.severity,
                gps_evidence = EXCLUDED.gps_evidence,
                speed_evidence = EXCLUDED.speed_evidence,
                straightline_evidence = EXCLUDED.straightline_evidence,
                duplicate_evidence = EXCLUDED.duplicate_evidence,
                timing_evidence = EXCLUDED.timing_evidence
            RETURNING *
            "#,
        )
        .bind(result.submission_id)
        .bind(result.enumerator_id)
        .bind(result.config_snapshot_version)
        .bind(result.scores.gps)
        .bind(result.scores.speed)
        .bind(result.scores.straightline)
        .bind(result.scores.duplicate)
        .bind(result.scores.timing)
        .bind(result.total_score)
        .bind(result.severity)
        .bind(result.evidence.gps_json())
        .bind(result.evidence.speed_json())
        .bind(result.evidence.straightline_json())
        .bind(result.evidence.duplicate_json())
        .bind(result.evidence.timing_json())
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Detection>("SELECT * FROM fraud_detections WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Filtered, paginated list for the review dashboard.
    pub async fn list(pool: &PgPool, filter: &DetectionFilter) -> Result<Page<Self>, sqlx::Error> {
        let page = filter.page.max(1);
        let page_size = filter.page_size.clamp(1, 100);
        let offset = (page - 1) * page_size;

        let severities: Vec<String> = filter
            .severity
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();

        let mut count_qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM fraud_detections WHERE TRUE");
        push_detection_filters(&mut count_qb, &severities, filter.reviewed);
        let total_items: i64 = count_qb.build_query_scalar().fetch_one(pool).await?;

        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT * FROM fraud_detections WHERE TRUE");
        push_detection_filters(&mut qb, &severities, filter.reviewed);
        qb.push(" ORDER BY computed_at DESC LIMIT ");
        qb.push_bind(page_size);
        qb.push(" OFFSET ");
        qb.push_bind(offset);

        let rows = qb.build_query_as::<Detection>().fetch_all(pool).await?;
        Ok(Page::new(rows, page, page_size, total_items))
    }

    /// Supervisor resolution (single detection). Compare-and-set: the row is
    /// locked, the transition validated against its current state, then
    /// updated. Re-resolution overwrites the supervisor fields but an
    /// assessor-finalized detection is rejected.
    pub async fn resolve(
        pool: &PgPool,
        id: Uuid,
        resolution: Resolution,
        notes: Option<String>,
        reviewed_by: Option<Uuid>,
    ) -> Result<Self, AppError> {
        let mut tx = pool.begin().await?;

        let row = sqlx::query_as::<_, ReviewRow>(
            "SELECT resolution, assessor_resolution FROM fraud_detections WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Detection not found".to_string()))?;

        let state = Detection::review_state(row.resolution, row.assessor_resolution);
        validate_supervisor_review(&state, notes.as_deref())?;

        let updated = sqlx::query_as::<_, Detection>(
            r#"
            UPDATE fraud_detections
            SET resolution = $2, resolution_notes = $3, reviewed_by = $4, reviewed_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(resolution)
        .bind(&notes)
        .bind(reviewed_by)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            detection_id = %id,
            resolution = resolution.as_str(),
            "detection resolved"
        );

        Ok(updated)
    }

    /// Bulk false-positive resolution over a cluster's member ids.
    /// All-or-nothing: every id must exist and still be unreviewed at
    /// execution time, otherwise the transaction rolls back untouched.
    pub async fn bulk_resolve(
        pool: &PgPool,
        ids: &[Uuid],
        resolution: Resolution,
        notes: &str,
        reviewed_by: Option<Uuid>,
    ) -> Result<u64, AppError> {
        let mut unique: Vec<Uuid> = ids.to_vec();
        unique.sort_unstable();
        unique.dedup();

        let mut tx = pool.begin().await?;

        let rows: Vec<(Uuid, Option<Resolution>, Option<AssessorResolution>)> =
            sqlx::query_as(
                r#"
                SELECT id, resolution, assessor_resolution
                FROM fraud_detections
                WHERE id = ANY($1)
                ORDER BY id
                FOR UPDATE
                "#,
            )
            .bind(&unique)
            .fetch_all(&mut *tx)
            .await?;

        if rows.len() != unique.len() {
            return Err(AppError::NotFound(format!(
                "{} of {} detection ids not found",
                unique.len() - rows.len(),
                unique.len()
            )));
        }

        let targets: Vec<(Uuid, ReviewState)> = rows
            .iter()
            .map(|(id, res, assessor)| (*id, Detection::review_state(*res, *assessor)))
            .collect();
        validate_bulk_review(resolution, notes, &targets)?;

        let result = sqlx::query(
            r#"
            UPDATE fraud_detections
            SET resolution = $2, resolution_notes = $3, reviewed_by = $4, reviewed_at = NOW()
            WHERE id = ANY($1)
            "#,
        )
        .bind(&unique)
        .bind(resolution)
        .bind(notes)
        .bind(reviewed_by)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            count = result.rows_affected(),
            resolution = resolution.as_str(),
            "bulk resolution applied"
        );

        Ok(result.rows_affected())
    }

    /// Assessor finalization. Requires an existing supervisor resolution and
    /// no prior assessor decision; terminal once applied.
    pub async fn assessor_finalize(
        pool: &PgPool,
        id: Uuid,
        resolution: AssessorResolution,
        notes: Option<String>,
        reviewed_by: Option<Uuid>,
    ) -> Result<Self, AppError> {
        let mut tx = pool.begin().await?;

        let row = sqlx::query_as::<_, ReviewRow>(
            "SELECT resolution, assessor_resolution FROM fraud_detections WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Detection not found".to_string()))?;

        let state = Detection::review_state(row.resolution, row.assessor_resolution);
        validate_assessor_review(&state, resolution, notes.as_deref())?;

        let updated = sqlx::query_as::<_, Detection>(
            r#"
            UPDATE fraud_detections
            SET assessor_resolution = $2, assessor_notes = $3,
                assessor_reviewed_by = $4, assessor_reviewed_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(resolution)
        .bind(&notes)
        .bind(reviewed_by)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            detection_id = %id,
            assessor_resolution = resolution.as_str(),
            "assessor finalized detection"
        );

        Ok(updated)
    }

    /// Assessor queue: supervisor-resolved detections awaiting final review.
    pub async fn assessor_queue(
        pool: &PgPool,
        filter: &AssessorFilter,
    ) -> Result<Page<DetectionWithContext>, sqlx::Error> {
        assessor_page(
            pool,
            filter,
            "d.resolution IS NOT NULL AND d.assessor_resolution IS NULL",
            "d.computed_at DESC",
        )
        .await
    }

    /// Completed assessor reviews, most recent first.
    pub async fn assessor_completed(
        pool: &PgPool,
        filter: &AssessorFilter,
    ) -> Result<Page<DetectionWithContext>, sqlx::Error> {
        assessor_page(
            pool,
            filter,
            "d.assessor_resolution IS NOT NULL",
            "d.assessor_reviewed_at DESC",
        )
        .await
    }

    pub async fn assessor_stats(pool: &PgPool) -> Result<AssessorStats, sqlx::Error> {
        let total_pending: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM fraud_detections
            WHERE resolution IS NOT NULL AND assessor_resolution IS NULL
            "#,
        )
        .fetch_one(pool)
        .await?;

        let breakdown: Vec<(Severity, i64)> = sqlx::query_as(
            r#"
            SELECT severity, COUNT(*) FROM fraud_detections
            WHERE resolution IS NOT NULL AND assessor_resolution IS NULL
            GROUP BY severity
            "#,
        )
        .fetch_all(pool)
        .await?;

        let reviewed_today: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM fraud_detections
            WHERE assessor_resolution IS NOT NULL
              AND assessor_reviewed_at >= date_trunc('day', NOW())
            "#,
        )
        .fetch_one(pool)
        .await?;

        Ok(AssessorStats {
            total_pending,
            severity_breakdown: breakdown
                .into_iter()
                .map(|(s, c)| (s.as_str().to_string(), c))
                .collect(),
            reviewed_today,
        })
    }

    /// The most recent finalized reviews, newest first.
    pub async fn assessor_recent_activity(
        pool: &PgPool,
        limit: i64,
    ) -> Result<Vec<AssessorActivity>, sqlx::Error> {
        sqlx::query_as::<_, AssessorActivity>(
            r#"
            SELECT id AS detection_id, submission_id, severity, total_score,
                   assessor_resolution, assessor_notes, assessor_reviewed_by,
                   assessor_reviewed_at
            FROM fraud_detections
            WHERE assessor_resolution IS NOT NULL
              AND assessor_reviewed_at IS NOT NULL
            ORDER BY assessor_reviewed_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Snapshot of cluster-eligible detections: unresolved, with GPS.
    /// Ordered by id so downstream clustering is seed-order stable.
    pub async fn cluster_candidates(pool: &PgPool) -> Result<Vec<ClusterCandidate>, sqlx::Error> {
        sqlx::query_as::<_, ClusterCandidate>(
            r#"
            SELECT d.id, d.submission_id, d.enumerator_id, d.severity, d.total_score,
                   s.submitted_at, s.gps_latitude, s.gps_longitude
            FROM fraud_detections d
            JOIN submissions s ON d.submission_id = s.id
            WHERE d.resolution IS NULL
              AND s.gps_latitude IS NOT NULL
              AND s.gps_longitude IS NOT NULL
            ORDER BY d.id
            "#,
        )
        .fetch_all(pool)
        .await
    }
}

fn push_detection_filters(
    qb: &mut QueryBuilder<Postgres>,
    severities: &[String],
    reviewed: Option<bool>,
) {
    if !severities.is_empty() {
        qb.push(" AND severity = ANY(");
        qb.push_bind(severities.to_vec());
        qb.push(")");
    }
    match reviewed {
        Some(true) => {
            qb.push(" AND resolution IS NOT NULL");
        }
        Some(false) => {
            qb.push(" AND resolution IS NULL");
        }
        None => {}
    }
}

const ASSESSOR_SELECT: &str = r#"
    SELECT d.*, e.full_name AS enumerator_name, s.lga, s.submitted_at
    FROM fraud_detections d
    JOIN submissions s ON d.submission_id = s.id
    LEFT JOIN enumerators e ON d.enumerator_id = e.id
    WHERE "#;

const ASSESSOR_COUNT: &str = r#"
    SELECT COUNT(*)
    FROM fraud_detections d
    JOIN submissions s ON d.submission_id = s.id
    LEFT JOIN enumerators e ON d.enumerator_id = e.id
    WHERE "#;

async fn assessor_page(
    pool: &PgPool,
    filter: &AssessorFilter,
    base_condition: &str,
    order_by: &str,
) -> Result<Page<DetectionWithContext>, sqlx::Error> {
    let page = filter.page.max(1);
    let page_size = filter.page_size.clamp(1, 100);
    let offset = (page - 1) * page_size;

    let severities: Vec<String> = filter
        .severity
        .iter()
        .map(|s| s.as_str().to_string())
        .collect();

    let mut count_qb: QueryBuilder<Postgres> = QueryBuilder::new(ASSESSOR_COUNT);
    count_qb.push(base_condition);
    push_assessor_filters(&mut count_qb, filter, &severities);
    let total_items: i64 = count_qb.build_query_scalar().fetch_one(pool).await?;

    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(ASSESSOR_SELECT);
    qb.push(base_condition);
    push_assessor_filters(&mut qb, filter, &severities);
    qb.push(" ORDER BY ");
    qb.push(order_by);
    qb.push(" LIMIT ");
    qb.push_bind(page_size);
    qb.push(" OFFSET ");
    qb.push_bind(offset);

    let rows = qb
        .build_query_as::<DetectionWithContext>()
        .fetch_all(pool)
        .await?;

    Ok(Page::new(rows, page, page_size, total_items))
}

fn push_assessor_filters(
    qb: &mut QueryBuilder<Postgres>,
    filter: &AssessorFilter,
    severities: &[String],
) {
    if let Some(lga) = &filter.lga {
        qb.push(" AND s.lga = ");
        qb.push_bind(lga.clone());
    }
    if !severities.is_empty() {
        qb.push(" AND d.severity = ANY(");
        qb.push_bind(severities.to_vec());
        qb.push(")");
    }
    if let Some(name) = &filter.enumerator_name {
        qb.push(" AND e.full_name ILIKE ");
        qb.push_bind(format!("%{}%", escape_like(name)));
    }
    if let Some(from) = filter.date_from {
        qb.push(" AND d.computed_at >= ");
        qb.push_bind(from);
    }
    if let Some(to) = filter.date_to {
        qb.push(" AND d.computed_at <= ");
        qb.push_bind(to);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_round_trip() {
        for s in [
            Severity::Clean,
            Severity::Low,
            Severity::Medium,
            Severity::High,
            Severity::Critical,
        ] {
            assert_eq!(Severity::parse(s.as_str()), Some(s));
        }
        assert_eq!(Severity::parse("bogus"), None);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Clean < Severity::Low);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_page_math() {
        let page: Page<i32> = Page::new(vec![1, 2, 3], 1, 20, 41);
        assert_eq!(page.total_pages, 3);
        let empty: Page<i32> = Page::new(vec![], 1, 20, 0);
        assert_eq!(empty.total_pages, 0);
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("100%_a\\b"), "100\\%\\_a\\\\b");
    }
}
