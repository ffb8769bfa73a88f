//! Straight-lining analyzer
//!
//! Identifies question batteries (consecutive runs of same-scale choice
//! questions within a form section) and measures how uniform the answers are:
//! primary identical response share, Shannon entropy, and the longest
//! identical run. A battery is flagged when the answers are both dominated by
//! one choice and low-entropy overall; the score is proportional to the share
//! of flagged batteries.

use serde::Deserialize;

use crate::engine::evidence::{BatteryMetrics, StraightlineEvidence};
use crate::engine::{round2, Outcome, SubmissionContext};
use crate::models::ThresholdSet;

const BATTERY_QUESTION_TYPES: &[&str] = &["select_one", "likert", "radio"];

#[derive(Debug, Deserialize)]
struct FormSchema {
    #[serde(default)]
    sections: Vec<Section>,
}

#[derive(Debug, Deserialize)]
struct Section {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    questions: Vec<Question>,
}

#[derive(Debug, Deserialize)]
struct Question {
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

struct Battery {
    section: String,
    question_names: Vec<String>,
}

/// Maximal runs of battery-type questions of at least `min_size`, per section.
fn identify_batteries(schema: &FormSchema, min_size: usize) -> Vec<Battery> {
    let mut batteries = Vec::new();
    for (idx, section) in schema.sections.iter().enumerate() {
        let title = section
            .title
            .clone()
            .unwrap_or_else(|| format!("section {}", idx + 1));
        let mut run: Vec<String> = Vec::new();
        for question in section.questions.iter() {
            if BATTERY_QUESTION_TYPES.contains(&question.kind.as_str()) {
                run.push(question.name.clone());
            } else {
                if run.len() >= min_size {
                    batteries.push(Battery {
                        section: title.clone(),
                        question_names: std::mem::take(&mut run),
                    });
                }
                run.clear();
            }
        }
        if run.len() >= min_size {
            batteries.push(Battery {
                section: title,
                question_names: run,
            });
        }
    }
    batteries
}

/// Mode share of the answer set.
fn primary_identical_ratio(answers: &[String]) -> f64 {
    let mut counts = std::collections::HashMap::new();
    for a in answers {
        *counts.entry(a.as_str()).or_insert(0usize) += 1;
    }
    let mode = counts.values().copied().max().unwrap_or(0);
    mode as f64 / answers.len() as f64
}

/// Shannon entropy of the answer distribution, in bits.
fn shannon_entropy(answers: &[String]) -> f64 {
    let mut counts = std::collections::HashMap::new();
    for a in answers {
        *counts.entry(a.as_str()).or_insert(0usize) += 1;
    }
    let n = answers.len() as f64;
    -counts
        .values()
        .map(|&c| {
            let p = c as f64 / n;
            p * p.log2()
        })
        .sum::<f64>()
}

/// Longest run of consecutive identical answers.
fn longest_identical_run(answers: &[String]) -> usize {
    let mut longest = 0;
    let mut current = 0;
    let mut previous: Option<&String> = None;
    for a in answers {
        if previous == Some(a) {
            current += 1;
        } else {
            current = 1;
        }
        longest = longest.max(current);
        previous = Some(a);
    }
    longest
}

pub fn evaluate(
    ctx: &SubmissionContext,
    thresholds: &ThresholdSet,
) -> Outcome<StraightlineEvidence> {
    let schema: FormSchema = match ctx
        .form_schema
        .as_ref()
        .and_then(|v| serde_json::from_value(v.clone()).ok())
    {
        Some(s) => s,
        None => {
            tracing::debug!(submission_id = %ctx.submission.id, "no form schema for battery analysis");
            return Outcome::none();
        }
    };
    let answers = match ctx.submission.raw_data.as_ref().and_then(|v| v.as_object()) {
        Some(map) => map,
        None => return Outcome::none(),
    };

    let weight = thresholds.get("straightline_weight", 20.0);
    let min_size = thresholds.get("straightline_min_battery_size", 5.0) as usize;
    let pir_threshold = thresholds.get("straightline_pir_threshold", 0.8);
    let entropy_threshold = thresholds.get("straightline_entropy_threshold", 0.5);

    let mut metrics = Vec::new();
    for battery in identify_batteries(&schema, min_size) {
        // Answers in question order; unanswered questions drop out. A battery
        // with fewer answers than the minimum size is too thin to judge.
        let values: Vec<String> = battery
            .question_names
            .iter()
            .filter_map(|name| answers.get(name))
            .filter(|v| !v.is_null())
            .map(|v| v.to_string())
            .collect();
        if values.len() < min_size {
            continue;
        }

        let pir = primary_identical_ratio(&values);
        let entropy = shannon_entropy(&values);
        metrics.push(BatteryMetrics {
            section: battery.section,
            question_count: values.len(),
            pir: round2(pir),
            entropy_bits: round2(entropy),
            longest_run: longest_identical_run(&values),
            flagged: pir > pir_threshold && entropy < entropy_threshold,
        });
    }

    if metrics.is_empty() {
        return Outcome::none();
    }

    let analyzed_count = metrics.len();
    let flagged_count = metrics.iter().filter(|m| m.flagged).count();
    let score = weight * flagged_count as f64 / analyzed_count as f64;

    Outcome {
        score: round2(score.min(weight)),
        evidence: Some(StraightlineEvidence {
            batteries: metrics,
            flagged_count,
            analyzed_count,
        }),
    }
}
