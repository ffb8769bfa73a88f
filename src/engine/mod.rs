//! Fraud engine
//!
//! Scoring is split into a context load (one pass over the database) and a
//! pure evaluation over that snapshot. The five heuristics each own a slice
//! of the 100-point scale: geo 25, speed 25, straight-lining 20, duplicates
//! 20, timing 10. Re-running an evaluation over the same context and
//! thresholds produces identical output.

pub mod cluster;
pub mod duplicate;
pub mod evidence;
pub mod geo;
pub mod speed;
pub mod straightline;
pub mod timing;

use chrono::Duration;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    Detection, NearbySubmission, RecentSubmission, Severity, Submission, ThresholdSet,
};
use evidence::EvidenceBundle;

/// One heuristic's contribution: a capped score plus optional evidence.
#[derive(Debug, Clone)]
pub struct Outcome<E> {
    pub score: f64,
    pub evidence: Option<E>,
}

impl<E> Outcome<E> {
    /// Nothing to analyze: zero score, no evidence.
    pub fn none() -> Self {
        Self {
            score: 0.0,
            evidence: None,
        }
    }
}

/// Everything the heuristics read. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct SubmissionContext {
    pub submission: Submission,
    /// Same-enumerator history inside the lookback window, newest first.
    pub recent: Vec<RecentSubmission>,
    /// Other enumerators' GPS fixes inside the clustering time window.
    pub nearby: Vec<NearbySubmission>,
    pub form_schema: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct ComponentScores {
    pub gps: f64,
    pub speed: f64,
    pub straightline: f64,
    pub duplicate: f64,
    pub timing: f64,
}

impl ComponentScores {
    pub fn sum(&self) -> f64 {
        self.gps + self.speed + self.straightline + self.duplicate + self.timing
    }
}

/// The outcome of one full evaluation, ready to persist.
#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub submission_id: Uuid,
    pub enumerator_id: Uuid,
    pub config_snapshot_version: i32,
    pub scores: ComponentScores,
    pub total_score: f64,
    pub severity: Severity,
    pub evidence: EvidenceBundle,
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Map a total score onto the configured severity cut points.
pub fn map_severity(total: f64, thresholds: &ThresholdSet) -> Severity {
    if total >= thresholds.get("severity_critical_min", 85.0) {
        Severity::Critical
    } else if total >= thresholds.get("severity_high_min", 70.0) {
        Severity::High
    } else if total >= thresholds.get("severity_medium_min", 50.0) {
        Severity::Medium
    } else if total >= thresholds.get("severity_low_min", 25.0) {
        Severity::Low
    } else {
        Severity::Clean
    }
}

/// Load the submission plus the cross-submission context the heuristics need.
/// Returns `None` when the submission does not exist.
pub async fn load_context(
    pool: &PgPool,
    submission_id: Uuid,
    thresholds: &ThresholdSet,
) -> Result<Option<SubmissionContext>, sqlx::Error> {
    let submission = match Submission::find_by_id(pool, submission_id).await? {
        Some(s) => s,
        None => return Ok(None),
    };

    let lookback_days = thresholds.get("duplicate_lookback_days", 7.0) as i64;
    let window_h = thresholds.get("gps_cluster_time_window_h", 4.0) as i64;
    let recent_cutoff = submission.submitted_at - Duration::days(lookback_days.max(1));
    let nearby_cutoff = submission.submitted_at - Duration::hours(window_h.max(1));

    let (recent, nearby, form_schema) = tokio::try_join!(
        Submission::recent_for_enumerator(
            pool,
            submission.enumerator_id,
            submission.id,
            recent_cutoff
        ),
        Submission::nearby_others(pool, submission.enumerator_id, submission.id, nearby_cutoff),
        Submission::form_schema(pool, submission.questionnaire_form_id),
    )?;

    Ok(Some(SubmissionContext {
        submission,
        recent,
        nearby,
        form_schema,
    }))
}

/// Run all five heuristics over a loaded context and aggregate.
pub async fn evaluate(ctx: &SubmissionContext, thresholds: &ThresholdSet) -> DetectionResult {
    let (gps, speed, straightline, duplicate, timing) = tokio::join!(
        async { geo::evaluate(ctx, thresholds) },
        async { speed::evaluate(ctx, thresholds) },
        async { straightline::evaluate(ctx, thresholds) },
        async { duplicate::evaluate(ctx, thresholds) },
        async { timing::evaluate(ctx, thresholds) },
    );

    let scores = ComponentScores {
        gps: gps.score,
        speed: speed.score,
        straightline: straightline.score,
        duplicate: duplicate.score,
        timing: timing.score,
    };
    let total_score = round2(scores.sum().clamp(0.0, 100.0));
    let severity = map_severity(total_score, thresholds);

    if matches!(severity, Severity::High | Severity::Critical) {
        tracing::warn!(
            submission_id = %ctx.submission.id,
            enumerator_id = %ctx.submission.enumerator_id,
            total_score,
            severity = severity.as_str(),
            "high-risk submission detected"
        );
    }

    DetectionResult {
        submission_id: ctx.submission.id,
        enumerator_id: ctx.submission.enumerator_id,
        config_snapshot_version: thresholds.version(),
        scores,
        total_score,
        severity,
        evidence: EvidenceBundle {
            gps: gps.evidence,
            speed: speed.evidence,
            straightline: straightline.evidence,
            duplicate: duplicate.evidence,
            timing: timing.evidence,
        },
    }
}

/// Score one submission end to end: load thresholds and context, evaluate,
/// persist. Returns `None` when the submission no longer exists.
pub async fn score_submission(
    pool: &PgPool,
    submission_id: Uuid,
) -> Result<Option<Detection>, AppError> {
    let thresholds = ThresholdSet::load(pool).await?;
    let ctx = match load_context(pool, submission_id, &thresholds).await? {
        Some(ctx) => ctx,
        None => {
            tracing::warn!(%submission_id, "submission not found, skipping scoring");
            return Ok(None);
        }
    };

    let result = evaluate(&ctx, &thresholds).await;
    let detection = Detection::upsert(pool, &result).await?;

    tracing::info!(
        %submission_id,
        detection_id = %detection.id,
        total_score = result.total_score,
        severity = result.severity.as_str(),
        config_version = result.config_snapshot_version,
        "submission scored"
    );

    Ok(Some(detection))
}


#[cfg(test)]
mod tests {
    use super::test_support::{context, nearby_at};
    use super::*;
    use crate::models::RecentSubmission;
    use serde_json::json;

    #[test]
    fn test_severity_cut_points() {
        let t = ThresholdSet::defaults();
        assert_eq!(map_severity(0.0, &t), Severity::Clean);
        assert_eq!(map_severity(24.99, &t), Severity::Clean);
        assert_eq!(map_severity(25.0, &t), Severity::Low);
        assert_eq!(map_severity(50.0, &t), Severity::Medium);
        assert_eq!(map_severity(69.99, &t), Severity::Medium);
        assert_eq!(map_severity(70.0, &t), Severity::High);
        assert_eq!(map_severity(85.0, &t), Severity::Critical);
        assert_eq!(map_severity(100.0, &t), Severity::Critical);
    }

    #[test]
    fn test_severity_monotonic() {
        let t = ThresholdSet::defaults();
        let mut previous = Severity::Clean;
        for step in 0..=1000 {
            let severity = map_severity(step as f64 / 10.0, &t);
            assert!(severity >= previous, "severity regressed at {step}");
            previous = severity;
        }
    }

    #[tokio::test]
    async fn test_empty_context_scores_clean() {
        let result = evaluate(&context(), &ThresholdSet::defaults()).await;
        assert_eq!(result.total_score, 0.0);
        assert_eq!(result.severity, Severity::Clean);
        assert!(result.evidence.gps.is_none());
        assert!(result.evidence.speed.is_none());
        assert!(result.evidence.straightline.is_none());
        assert!(result.evidence.duplicate.is_none());
        // Timing always has something to say, even when it scores zero.
        assert!(result.evidence.timing.is_some());
    }

    /// A fabricated batch: answers copied from a prior interview, filed in a
    /// quarter of the usual time, from coordinates shared with other
    /// enumerators and reused from an earlier submission, with one battery
    /// straight-lined.
    fn fabricated_context() -> SubmissionContext {
        let mut ctx = context();
        let form = ctx.submission.questionnaire_form_id;
        let (lat, lng) = (9.0579, 7.4951);

        ctx.submission.gps_latitude = Some(lat);
        ctx.submission.gps_longitude = Some(lng);
        ctx.submission.completion_time_seconds = Some(150);

        let questions: Vec<_> = (0..20)
            .map(|i| json!({"name": format!("q{i}"), "type": "likert"}))
            .collect();
        ctx.form_schema = Some(json!({"sections": [{"title": "attitudes", "questions": questions}]}));

        let mut answers = serde_json::Map::new();
        for i in 0..19 {
            answers.insert(format!("q{i}"), json!("2"));
        }
        answers.insert("q19".to_string(), json!("4"));
        let answers = serde_json::Value::Object(answers);
        ctx.submission.raw_data = Some(answers.clone());

        // Two co-located fixes from other enumerators.
        ctx.nearby.push(nearby_at(lat + 0.0001, lng));
        ctx.nearby.push(nearby_at(lat, lng + 0.0001));

        // Five same-form priors around 1000 s, one of them a verbatim copy
        // filed from the exact same coordinates.
        for (i, seconds) in [900, 950, 1000, 1050, 1100].iter().enumerate() {
            ctx.recent.push(RecentSubmission {
                id: uuid::Uuid::new_v4(),
                questionnaire_form_id: form,
                submitted_at: ctx.submission.submitted_at - Duration::hours(i as i64 + 1),
                completion_time_seconds: Some(*seconds),
                gps_latitude: if i == 0 { Some(lat) } else { None },
                gps_longitude: if i == 0 { Some(lng) } else { None },
                raw_data: if i == 0 { Some(answers.clone()) } else { None },
            });
        }
        ctx
    }

    #[tokio::test]
    async fn test_fabricated_submission_scores_critical() {
        let result = evaluate(&fabricated_context(), &ThresholdSet::defaults()).await;
        assert!(result.scores.gps >= 20.0, "gps {}", result.scores.gps);
        assert!(result.scores.speed >= 20.0, "speed {}", result.scores.speed);
        assert!(
            result.scores.straightline >= 18.0,
            "straightline {}",
            result.scores.straightline
        );
        assert!(result.scores.duplicate >= 20.0);
        assert_eq!(result.severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_total_is_sum_of_subscores() {
        let result = evaluate(&fabricated_context(), &ThresholdSet::defaults()).await;
        assert!((result.total_score - result.scores.sum()).abs() < 1e-9);
        assert!((0.0..=100.0).contains(&result.total_score));
    }

    #[tokio::test]
    async fn test_evaluation_is_deterministic() {
        let ctx = fabricated_context();
        let t = ThresholdSet::defaults();
        let a = evaluate(&ctx, &t).await;
        let b = evaluate(&ctx, &t).await;
        assert_eq!(a.total_score, b.total_score);
        assert_eq!(a.severity, b.severity);
        assert_eq!(a.scores.gps, b.scores.gps);
        assert_eq!(a.scores.speed, b.scores.speed);
        assert_eq!(a.scores.straightline, b.scores.straightline);
        assert_eq!(a.scores.duplicate, b.scores.duplicate);
        assert_eq!(a.scores.timing, b.scores.timing);
    }
}
