//! Duplicate-response analyzer
//!
//! Compares the submission's answer set against the enumerator's prior
//! same-form submissions inside the lookback window. The match ratio is
//! computed over the union of substantive field names (metadata keys prefixed
//! with an underscore are excluded), so a padded or truncated copy still
//! registers.

use serde_json::{Map, Value};

use crate::engine::evidence::{DuplicateEvidence, MatchType, MatchedSubmission};
use crate::engine::{round2, Outcome, SubmissionContext};
use crate::models::ThresholdSet;

fn substantive_keys(map: &Map<String, Value>) -> impl Iterator<Item = &str> {
    map.keys()
        .map(String::as_str)
        .filter(|k| !k.starts_with('_'))
}

/// Share of identical fields over the union of both answer sets' field names.
fn match_ratio(a: &Map<String, Value>, b: &Map<String, Value>) -> (f64, Vec<String>) {
    let union: std::collections::BTreeSet<&str> =
        substantive_keys(a).chain(substantive_keys(b)).collect();
    if union.is_empty() {
        return (0.0, Vec::new());
    }
    let mut matched = Vec::new();
    for key in &union {
        if let (Some(va), Some(vb)) = (a.get(*key), b.get(*key)) {
            if va == vb {
                matched.push((*key).to_string());
            }
        }
    }
    (matched.len() as f64 / union.len() as f64, matched)
}

pub fn evaluate(ctx: &SubmissionContext, thresholds: &ThresholdSet) -> Outcome<DuplicateEvidence> {
    let own = match ctx.submission.raw_data.as_ref().and_then(|v| v.as_object()) {
        Some(map) if !map.is_empty() => map,
        _ => return Outcome::none(),
    };

    let priors: Vec<(uuid::Uuid, &Map<String, Value>)> = ctx
        .recent
        .iter()
        .filter(|r| r.questionnaire_form_id == ctx.submission.questionnaire_form_id)
        .filter_map(|r| r.raw_data.as_ref().and_then(|v| v.as_object()).map(|m| (r.id, m)))
        .collect();
    if priors.is_empty() {
        tracing::debug!(submission_id = %ctx.submission.id, "no comparable submissions in window");
        return Outcome::none();
    }

    let weight = thresholds.get("duplicate_weight", 20.0);
    let exact_threshold = thresholds.get("duplicate_exact_threshold", 1.0);
    let partial_threshold = thresholds.get("duplicate_partial_threshold", 0.7);

    let mut best_ratio = 0.0_f64;
    let mut best_fields: Vec<String> = Vec::new();
    let mut matched_submissions = Vec::new();
    for (id, prior) in &priors {
        let (ratio, fields) = match_ratio(own, prior);
        if ratio > best_ratio {
            best_ratio = ratio;
            best_fields = fields;
        }
        if ratio >= partial_threshold {
            matched_submissions.push(MatchedSubmission {
                submission_id: *id,
                match_ratio: round2(ratio),
            });
        }
    }

    let (match_type, score) = if best_ratio >= exact_threshold {
        (MatchType::Exact, weight)
    } else if best_ratio >= partial_threshold {
        (MatchType::Partial, weight * best_ratio)
    } else {
        (MatchType::None, 0.0)
    };

    Outcome {
        score: round2(score.min(weight)),
        evidence: Some(DuplicateEvidence {
            match_type,
            best_ratio: round2(best_ratio),
            matching_fields: best_fields,
            matched_submissions,
            compared_count: priors.len(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::{context, recent_answers};
    use crate::models::ThresholdSet;
    use serde_json::json;

    #[test]
    fn test_match_ratio_over_key_union() {
        let a = json!({"q1": "a", "q2": "b", "q3": "c"});
        let b = json!({"q1": "a", "q2": "b", "q4": "d"});
        let (ratio, fields) = match_ratio(a.as_object().unwrap(), b.as_object().unwrap());
        // 2 matches over a union of 4 keys.
        assert_eq!(ratio, 0.5);
        assert_eq!(fields, vec!["q1", "q2"]);
    }

    #[test]
    fn test_underscore_keys_ignored() {
        let a = json!({"q1": "a", "_meta": "x"});
        let b = json!({"q1": "a", "_meta": "y"});
        let (ratio, _) = match_ratio(a.as_object().unwrap(), b.as_object().unwrap());
        assert_eq!(ratio, 1.0);
    }

    #[test]
    fn test_exact_copy_scores_full_weight() {
        let data = json!({"q1": "a", "q2": 7, "q3": true});
        let mut ctx = context();
        ctx.submission.raw_data = Some(data.clone());
        let form = ctx.submission.questionnaire_form_id;
        ctx.recent.push(recent_answers(form, data));
        let out = evaluate(&ctx, &ThresholdSet::defaults());
        assert_eq!(out.score, 20.0);
        let ev = out.evidence.unwrap();
        assert_eq!(ev.match_type, MatchType::Exact);
        assert_eq!(ev.matching_fields.len(), 3);
    }

    #[test]
    fn test_partial_match_scores_proportionally() {
        // 8 of 10 fields identical: ratio 0.8, above the 0.7 floor.
        let mut own = serde_json::Map::new();
        let mut prior = serde_json::Map::new();
        for i in 0..8 {
            own.insert(format!("q{i}"), json!("same"));
            prior.insert(format!("q{i}"), json!("same"));
        }
        own.insert("q8".into(), json!("x"));
        own.insert("q9".into(), json!("y"));
        prior.insert("q8".into(), json!("p"));
        prior.insert("q9".into(), json!("q"));

        let mut ctx = context();
        ctx.submission.raw_data = Some(Value::Object(own));
        let form = ctx.submission.questionnaire_form_id;
        ctx.recent.push(recent_answers(form, Value::Object(prior)));
        let out = evaluate(&ctx, &ThresholdSet::defaults());
        assert_eq!(out.score, 16.0); // 20 * 0.8
        let ev = out.evidence.unwrap();
        assert_eq!(ev.match_type, MatchType::Partial);
        assert_eq!(ev.matched_submissions.len(), 1);
        assert_eq!(ev.matched_submissions[0].match_ratio, 0.8);
    }

    #[test]
    fn test_below_floor_scores_zero_with_evidence() {
        let mut ctx = context();
        ctx.submission.raw_data = Some(json!({"q1": "a", "q2": "b", "q3": "c"}));
        let form = ctx.submission.questionnaire_form_id;
        ctx.recent
            .push(recent_answers(form, json!({"q1": "a", "q2": "x", "q3": "y"})));
        let out = evaluate(&ctx, &ThresholdSet::defaults());
        assert_eq!(out.score, 0.0);
        let ev = out.evidence.unwrap();
        assert_eq!(ev.match_type, MatchType::None);
        assert!(ev.matched_submissions.is_empty());
        assert_eq!(ev.compared_count, 1);
    }

    #[test]
    fn test_no_history_scores_zero_without_evidence() {
        let mut ctx = context();
        ctx.submission.raw_data = Some(json!({"q1": "a"}));
        let out = evaluate(&ctx, &ThresholdSet::defaults());
        assert!(out.evidence.is_none());
    }

    #[test]
    fn test_other_form_submissions_not_compared() {
        let data = json!({"q1": "a"});
        let mut ctx = context();
        ctx.submission.raw_data = Some(data.clone());
        ctx.recent.push(recent_answers(uuid::Uuid::new_v4(), data));
        let out = evaluate(&ctx, &ThresholdSet::defaults());
        assert!(out.evidence.is_none());
    }
}
