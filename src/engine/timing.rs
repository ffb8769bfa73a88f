//! Submission-timing analyzer
//!
//! Flags submissions placed at implausible local times. Timestamps are stored
//! in UTC; the respondent-local clock is a fixed configured offset (WAT by
//! default). The night window wraps midnight.

use chrono::{Datelike, FixedOffset, Offset, Timelike, Utc, Weekday};

use crate::engine::evidence::TimingEvidence;
use crate::engine::{round2, Outcome, SubmissionContext};
use crate::models::ThresholdSet;

pub fn evaluate(ctx: &SubmissionContext, thresholds: &ThresholdSet) -> Outcome<TimingEvidence> {
    let weight = thresholds.get("timing_weight", 10.0);
    let night_start = thresholds.get("timing_night_start_hour", 23.0) as u32;
    let night_end = thresholds.get("timing_night_end_hour", 5.0) as u32;
    let night_points = thresholds.get("timing_night_points", 10.0);
    let weekend_points = thresholds.get("timing_weekend_points", 5.0);
    let offset_h = thresholds.get("timing_utc_offset_h", 1.0) as i32;

    // An out-of-range configured offset falls back to UTC.
    let offset = FixedOffset::east_opt(offset_h * 3600).unwrap_or_else(|| Utc.fix());
    let local_time = ctx.submission.submitted_at.with_timezone(&offset);
    let hour = local_time.hour();
    let is_off_hours = hour >= night_start || hour < night_end;
    let is_weekend = matches!(local_time.weekday(), Weekday::Sat | Weekday::Sun);

    let mut score = 0.0;
    if is_off_hours {
        score += night_points;
    }
    if is_weekend {
        score += weekend_points;
    }

    Outcome {
        score: round2(score.min(weight)),
        evidence: Some(TimingEvidence {
            submission_hour: hour,
            is_weekend,
            is_off_hours,
            local_time,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::context;
    use crate::models::ThresholdSet;
    use chrono::{TimeZone, Utc};

    fn ctx_at(utc: &str) -> crate::engine::SubmissionContext {
        let mut ctx = context();
        ctx.submission.submitted_at = utc.parse().unwrap();
        ctx
    }

    #[test]
    fn test_weekday_afternoon_scores_zero() {
        // Wed 2026-01-07 14:00 UTC is 15:00 local.
        let out = evaluate(&ctx_at("2026-01-07T14:00:00Z"), &ThresholdSet::defaults());
        assert_eq!(out.score, 0.0);
        let ev = out.evidence.unwrap();
        assert_eq!(ev.submission_hour, 15);
        assert!(!ev.is_off_hours);
        assert!(!ev.is_weekend);
    }

    #[test]
    fn test_late_night_scores_night_points() {
        // Wed 23:30 UTC is Thu 00:30 local, inside the wrapped window.
        let out = evaluate(&ctx_at("2026-01-07T23:30:00Z"), &ThresholdSet::defaults());
        assert_eq!(out.score, 10.0);
        let ev = out.evidence.unwrap();
        assert_eq!(ev.submission_hour, 0);
        assert!(ev.is_off_hours);
    }

    #[test]
    fn test_night_window_boundaries() {
        // 22:00 UTC = 23:00 local: window opens.
        let out = evaluate(&ctx_at("2026-01-07T22:00:00Z"), &ThresholdSet::defaults());
        assert!(out.evidence.unwrap().is_off_hours);
        // 04:00 UTC = 05:00 local: window closed.
        let out = evaluate(&ctx_at("2026-01-08T04:00:00Z"), &ThresholdSet::defaults());
        assert!(!out.evidence.unwrap().is_off_hours);
    }

    #[test]
    fn test_weekend_scores_weekend_points() {
        // Sat 2026-01-10 11:00 local.
        let out = evaluate(&ctx_at("2026-01-10T10:00:00Z"), &ThresholdSet::defaults());
        assert_eq!(out.score, 5.0);
        assert!(out.evidence.unwrap().is_weekend);
    }

    #[test]
    fn test_weekend_night_capped_at_weight() {
        // Sat 02:00 local: both signals fire, 15 points capped to 10.
        let out = evaluate(&ctx_at("2026-01-10T01:00:00Z"), &ThresholdSet::defaults());
        assert_eq!(out.score, 10.0);
        let ev = out.evidence.unwrap();
        assert!(ev.is_weekend && ev.is_off_hours);
    }

    #[test]
    fn test_utc_offset_shifts_day_boundary() {
        // Fri 23:30 UTC is Sat 00:30 local under the +1 offset.
        let utc = Utc.with_ymd_and_hms(2026, 1, 9, 23, 30, 0).unwrap();
        let mut ctx = context();
        ctx.submission.submitted_at = utc;
        let out = evaluate(&ctx, &ThresholdSet::defaults());
        let ev = out.evidence.unwrap();
        assert!(ev.is_weekend);
        assert!(ev.is_off_hours);
    }
}
