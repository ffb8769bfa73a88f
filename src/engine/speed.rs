//! Completion-speed analyzer
//!
//! Compares the submission's completion time against the enumerator's own
//! median on the same form. A thin history makes the median meaningless, so
//! anything under the minimum sample count scores zero.

use crate::engine::evidence::{SpeedEvidence, SpeedTier};
use crate::engine::{round2, Outcome, SubmissionContext};
use crate::models::ThresholdSet;

fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

pub fn evaluate(ctx: &SubmissionContext, thresholds: &ThresholdSet) -> Outcome<SpeedEvidence> {
    let completion = match ctx.submission.completion_time_seconds {
        Some(s) if s > 0 => s,
        _ => {
            tracing::debug!(submission_id = %ctx.submission.id, "no completion time recorded");
            return Outcome::none();
        }
    };

    let min_history = thresholds.get("speed_min_history_n", 5.0) as usize;
    let mut history: Vec<f64> = ctx
        .recent
        .iter()
        .filter(|r| r.questionnaire_form_id == ctx.submission.questionnaire_form_id)
        .filter_map(|r| r.completion_time_seconds)
        .filter(|&s| s > 0)
        .map(f64::from)
        .collect();
    if history.len() < min_history {
        tracing::debug!(
            submission_id = %ctx.submission.id,
            historical_count = history.len(),
            "insufficient history for speed analysis"
        );
        return Outcome::none();
    }
    history.sort_by(|a, b| a.total_cmp(b));

    let weight = thresholds.get("speed_weight", 25.0);
    let superspeeder_pct = thresholds.get("speed_superspeeder_pct", 25.0);
    let fast_pct = thresholds.get("speed_fast_pct", 50.0);
    let fast_share = thresholds.get("speed_fast_share", 0.48);

    let median_time = median(&history);
    let ratio = f64::from(completion) / median_time;

    let (score, tier) = if ratio < superspeeder_pct / 100.0 {
        (weight, Some(SpeedTier::Superspeeder))
    } else if ratio < fast_pct / 100.0 {
        (weight * fast_share, Some(SpeedTier::Fast))
    } else {
        (0.0, None)
    };

    Outcome {
        score: round2(score.min(weight)),
        evidence: Some(SpeedEvidence {
            completion_time_seconds: completion,
            median_time_seconds: round2(median_time),
            ratio: round2(ratio),
            tier,
            historical_count: history.len(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::{context, recent_completion};
    use crate::models::ThresholdSet;

    fn ctx_with_history(completion: i32, history: &[i32]) -> crate::engine::SubmissionContext {
        let mut ctx = context();
        ctx.submission.completion_time_seconds = Some(completion);
        for &s in history {
            let form = ctx.submission.questionnaire_form_id;
            ctx.recent.push(recent_completion(form, s));
        }
        ctx
    }

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(median(&[1.0, 2.0, 9.0]), 2.0);
        assert_eq!(median(&[1.0, 2.0, 3.0, 9.0]), 2.5);
    }

    #[test]
    fn test_insufficient_history_scores_zero() {
        // Four priors is under the minimum of five.
        let ctx = ctx_with_history(100, &[1000, 1000, 1000, 1000]);
        let out = evaluate(&ctx, &ThresholdSet::defaults());
        assert_eq!(out.score, 0.0);
        assert!(out.evidence.is_none());
    }

    #[test]
    fn test_superspeeder_gets_full_weight() {
        // Median 1000s, completion 150s gives ratio 0.15.
        let ctx = ctx_with_history(150, &[900, 950, 1000, 1050, 1100]);
        let out = evaluate(&ctx, &ThresholdSet::defaults());
        assert_eq!(out.score, 25.0);
        let ev = out.evidence.unwrap();
        assert_eq!(ev.tier, Some(SpeedTier::Superspeeder));
        assert_eq!(ev.ratio, 0.15);
        assert_eq!(ev.median_time_seconds, 1000.0);
    }

    #[test]
    fn test_fast_tier_gets_partial_weight() {
        // Ratio 0.4 sits between the 0.25 and 0.5 cut points.
        let ctx = ctx_with_history(400, &[900, 950, 1000, 1050, 1100]);
        let out = evaluate(&ctx, &ThresholdSet::defaults());
        assert_eq!(out.score, 12.0); // 25 * 0.48
        assert_eq!(out.evidence.unwrap().tier, Some(SpeedTier::Fast));
    }

    #[test]
    fn test_normal_pace_scores_zero_with_evidence() {
        let ctx = ctx_with_history(980, &[900, 950, 1000, 1050, 1100]);
        let out = evaluate(&ctx, &ThresholdSet::defaults());
        assert_eq!(out.score, 0.0);
        let ev = out.evidence.unwrap();
        assert_eq!(ev.tier, None);
        assert_eq!(ev.historical_count, 5);
    }

    #[test]
    fn test_other_form_history_excluded() {
        let mut ctx = ctx_with_history(150, &[900, 950, 1000, 1050]);
        // Fifth prior belongs to a different form and must not count.
        ctx.recent
            .push(recent_completion(uuid::Uuid::new_v4(), 1000));
        let out = evaluate(&ctx, &ThresholdSet::defaults());
        assert!(out.evidence.is_none());
    }
}
