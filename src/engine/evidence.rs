//! Typed heuristic evidence
//!
//! Each heuristic that finds anything worth explaining attaches one of these
//! structs. They serialize into the per-heuristic JSONB columns on the
//! detection row, so reviewers see exactly what fired and why.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpsEvidence {
    /// Other recent fixes within the clustering radius of this point.
    pub cluster_count: u32,
    pub accuracy_m: Option<f64>,
    pub teleportation_flag: bool,
    pub teleportation_speed_kmh: Option<f64>,
    /// Bit-identical coordinates seen on a prior submission.
    pub duplicate_coords: bool,
    pub nearest_neighbor_m: Option<f64>,
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedTier {
    Superspeeder,
    Fast,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeedEvidence {
    pub completion_time_seconds: i32,
    pub median_time_seconds: f64,
    pub ratio: f64,
    pub tier: Option<SpeedTier>,
    pub historical_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatteryMetrics {
    pub section: String,
    /// Answered questions the metrics were computed over.
    pub question_count: usize,
    /// Primary identical response share (mode frequency).
    pub pir: f64,
    pub entropy_bits: f64,
    pub longest_run: usize,
    pub flagged: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StraightlineEvidence {
    pub batteries: Vec<BatteryMetrics>,
    pub flagged_count: usize,
    pub analyzed_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Partial,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchedSubmission {
    pub submission_id: Uuid,
    pub match_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateEvidence {
    pub match_type: MatchType,
    pub best_ratio: f64,
    /// Field names that matched exactly on the best candidate.
    pub matching_fields: Vec<String>,
    /// Every prior submission at or above the partial threshold.
    pub matched_submissions: Vec<MatchedSubmission>,
    pub compared_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingEvidence {
    pub submission_hour: u32,
    pub is_weekend: bool,
    pub is_off_hours: bool,
    pub local_time: DateTime<chrono::FixedOffset>,
}

/// The five evidence slots of one evaluation.
#[derive(Debug, Clone, Default)]
pub struct EvidenceBundle {
    pub gps: Option<GpsEvidence>,
    pub speed: Option<SpeedEvidence>,
    pub straightline: Option<StraightlineEvidence>,
    pub duplicate: Option<DuplicateEvidence>,
    pub timing: Option<TimingEvidence>,
}

fn to_json<E: Serialize>(evidence: &Option<E>) -> Option<serde_json::Value> {
    evidence.as_ref().and_then(|e| serde_json::to_value(e).ok())
}

impl EvidenceBundle {
    pub fn gps_json(&self) -> Option<serde_json::Value> {
        to_json(&self.gps)
    }

    pub fn speed_json(&self) -> Option<serde_json::Value> {
        to_json(&self.speed)
    }

    pub fn straightline_json(&self) -> Option<serde_json::Value> {
        to_json(&self.straightline)
    }

    pub fn duplicate_json(&self) -> Option<serde_json::Value> {
        to_json(&self.duplicate)
    }

    pub fn timing_json(&self) -> Option<serde_json::Value> {
        to_json(&self.timing)
    }
}
