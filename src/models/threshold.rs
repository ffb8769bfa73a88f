//! Versioned heuristic configuration
//!
//! Threshold rows are never updated in place: changing a value closes the
//! current row (`effective_until`) and inserts version+1. A detection always
//! records the config snapshot version it was scored under, so scores stay
//! reproducible after thresholds move.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FraudThreshold {
    pub id: Uuid,
    pub rule_key: String,
    pub display_name: String,
    pub rule_category: String,
    pub threshold_value: f64,
    pub is_active: bool,
    pub effective_from: DateTime<Utc>,
    pub effective_until: Option<DateTime<Utc>>,
    pub version: i32,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Immutable snapshot of the active thresholds at evaluation time.
///
/// Heuristics read from this instead of reaching into ambient state, so an
/// evaluation is a pure function of its inputs.
#[derive(Debug, Clone)]
pub struct ThresholdSet {
    version: i32,
    values: HashMap<String, f64>,
}

impl ThresholdSet {
    /// Config snapshot version recorded on every detection.
    pub fn version(&self) -> i32 {
        self.version
    }

    /// Look up a rule value with a hard fallback default.
    pub fn get(&self, rule_key: &str, default: f64) -> f64 {
        self.values.get(rule_key).copied().unwrap_or(default)
    }

    pub fn from_rows(rows: &[FraudThreshold]) -> Self {
        let version = rows.iter().map(|r| r.version).max().unwrap_or(1);
        let values = rows
            .iter()
            .map(|r| (r.rule_key.clone(), r.threshold_value))
            .collect();
        Self { version, values }
    }

    /// Snapshot the current active thresholds.
    pub async fn load(pool: &PgPool) -> Result<Self, sqlx::Error> {
        let rows = FraudThreshold::list_active(pool).await?;
        Ok(Self::from_rows(&rows))
    }

    /// The seeded default configuration at version 1.
    pub fn defaults() -> Self {
        let values = THRESHOLD_DEFAULTS
            .iter()
            .map(|d| (d.rule_key.to_string(), d.value))
            .collect();
        Self { version: 1, values }
    }
}

impl FraudThreshold {
    /// All active thresholds at their current version.
    pub async fn list_active(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, FraudThreshold>(
            r#"
            SELECT * FROM fraud_thresholds
            WHERE is_active = true AND effective_until IS NULL
            ORDER BY rule_category, rule_key
            "#,
        )
        .fetch_all(pool)
        .await
    }

    /// Publish a new version of a rule: close the current row and insert
    /// version+1 in one transaction. Returns `None` if the rule key is
    /// unknown.
    pub async fn update(
        pool: &PgPool,
        rule_key: &str,
        new_value: f64,
        notes: Option<String>,
    ) -> Result<Option<Self>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let current = sqlx::query_as::<_, FraudThreshold>(
            r#"
            SELECT * FROM fraud_thresholds
            WHERE rule_key = $1 AND effective_until IS NULL
            ORDER BY version DESC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(rule_key)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(current) = current else {
            return Ok(None);
        };

        let now = Utc::now();

        sqlx::query("UPDATE fraud_thresholds SET effective_until = $2 WHERE id = $1")
            .bind(current.id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        let inserted = sqlx::query_as::<_, FraudThreshold>(
            r#"
            INSERT INTO fraud_thresholds
                (rule_key, display_name, rule_category, threshold_value, is_active,
                 effective_from, effective_until, version, notes)
            VALUES ($1, $2, $3, $4, $5, $6, NULL, $7, $8)
            RETURNING *
            "#,
        )
        .bind(&current.rule_key)
        .bind(&current.display_name)
        .bind(&current.rule_category)
        .bind(new_value)
        .bind(current.is_active)
        .bind(now)
        .bind(current.version + 1)
        .bind(&notes)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            rule_key = rule_key,
            old_value = current.threshold_value,
            new_value = new_value,
            new_version = inserted.version,
            "threshold updated"
        );

        Ok(Some(inserted))
    }

    /// Insert the default threshold records if the table is empty.
    pub async fn seed_defaults(pool: &PgPool) -> Result<u64, sqlx::Error> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fraud_thresholds")
            .fetch_one(pool)
            .await?;
        if count > 0 {
            return Ok(0);
        }

        let mut inserted = 0u64;
        for d in THRESHOLD_DEFAULTS {
            sqlx::query(
                r#"
                INSERT INTO fraud_thresholds
                    (rule_key, display_name, rule_category, threshold_value, is_active,
                     effective_from, effective_until, version, notes)
                VALUES ($1, $2, $3, $4, true, NOW(), NULL, 1, $5)
                "#,
            )
            .bind(d.rule_key)
            .bind(d.display_name)
            .bind(d.rule_category)
            .bind(d.value)
            .bind(d.notes)
            .execute(pool)
            .await?;
            inserted += 1;
        }

        tracing::info!(count = inserted, "seeded default fraud thresholds");
        Ok(inserted)
    }
}

pub struct ThresholdDefault {
    pub rule_key: &'static str,
    pub display_name: &'static str,
    pub rule_category: &'static str,
    pub value: f64,
    pub notes: &'static str,
}

/// Default threshold records covering all heuristic categories, version 1.
pub const THRESHOLD_DEFAULTS: &[ThresholdDefault] = &[
    // gps
    ThresholdDefault {
        rule_key: "gps_cluster_radius_m",
        display_name: "GPS Cluster Radius (meters)",
        rule_category: "gps",
        value: 50.0,
        notes: "Proximity radius for cluster counting and bulk-review clustering. 50m absorbs consumer-device GPS error.",
    },
    ThresholdDefault {
        rule_key: "gps_cluster_min_samples",
        display_name: "GPS Cluster Minimum Samples",
        rule_category: "gps",
        value: 3.0,
        notes: "Minimum co-located submissions (including the current one) before the cluster condition fires. 2 flags legitimate revisits.",
    },
    ThresholdDefault {
        rule_key: "gps_cluster_time_window_h",
        display_name: "GPS Cluster Time Window (hours)",
        rule_category: "gps",
        value: 4.0,
        notes: "Window for same-enumerator proximity analysis. Prevents flagging multi-day returns to the same area.",
    },
    ThresholdDefault {
        rule_key: "gps_max_accuracy_m",
        display_name: "GPS Maximum Accuracy (meters)",
        rule_category: "gps",
        value: 50.0,
        notes: "Readings with reported accuracy above this are unreliable; surfaced in evidence.",
    },
    ThresholdDefault {
        rule_key: "gps_teleport_speed_kmh",
        display_name: "GPS Teleportation Speed (km/h)",
        rule_category: "gps",
        value: 120.0,
        notes: "Max plausible travel speed from the previous fix. 120 allows highway segments.",
    },
    ThresholdDefault {
        rule_key: "gps_duplicate_coord_threshold_m",
        display_name: "GPS Duplicate Coordinate Threshold (meters)",
        rule_category: "gps",
        value: 5.0,
        notes: "Distance under which two fixes count as the same spot in evidence reporting.",
    },
    ThresholdDefault {
        rule_key: "gps_cluster_share",
        display_name: "GPS Cluster Partial Weight Share",
        rule_category: "gps",
        value: 0.6,
        notes: "Fraction of gps_weight contributed by the cluster condition.",
    },
    ThresholdDefault {
        rule_key: "gps_teleport_share",
        display_name: "GPS Teleportation Partial Weight Share",
        rule_category: "gps",
        value: 0.2,
        notes: "Fraction of gps_weight contributed by teleportation.",
    },
    ThresholdDefault {
        rule_key: "gps_duplicate_share",
        display_name: "GPS Duplicate-Coordinates Partial Weight Share",
        rule_category: "gps",
        value: 0.2,
        notes: "Fraction of gps_weight contributed by bit-identical coordinates.",
    },
    ThresholdDefault {
        rule_key: "gps_weight",
        display_name: "GPS Heuristic Weight",
        rule_category: "gps",
        value: 25.0,
        notes: "Component cap in the composite score. Strong physical evidence of fabrication.",
    },
    // speed
    ThresholdDefault {
        rule_key: "speed_superspeeder_pct",
        display_name: "Superspeeder Threshold (%)",
        rule_category: "speed",
        value: 25.0,
        notes: "Below 25% of the historical median is physically implausible.",
    },
    ThresholdDefault {
        rule_key: "speed_fast_pct",
        display_name: "Fast Threshold (%)",
        rule_category: "speed",
        value: 50.0,
        notes: "Below 50% of median is suspicious but possible for experienced enumerators.",
    },
    ThresholdDefault {
        rule_key: "speed_fast_share",
        display_name: "Fast Tier Partial Weight Share",
        rule_category: "speed",
        value: 0.48,
        notes: "Fraction of speed_weight awarded for the fast (non-superspeeder) tier.",
    },
    ThresholdDefault {
        rule_key: "speed_min_history_n",
        display_name: "Speed Minimum History Count",
        rule_category: "speed",
        value: 5.0,
        notes: "Minimum prior same-form completions before a median is trusted. Below this the heuristic abstains.",
    },
    ThresholdDefault {
        rule_key: "speed_weight",
        display_name: "Speed Heuristic Weight",
        rule_category: "speed",
        value: 25.0,
        notes: "Component cap in the composite score. Strong behavioral evidence of rushing.",
    },
    // straightline
    ThresholdDefault {
        rule_key: "straightline_pir_threshold",
        display_name: "PIR Threshold",
        rule_category: "straightline",
        value: 0.8,
        notes: "Proportion of identical responses above which a battery is repetition-suspect.",
    },
    ThresholdDefault {
        rule_key: "straightline_min_battery_size",
        display_name: "Minimum Battery Size",
        rule_category: "straightline",
        value: 5.0,
        notes: "Fewer than 5 scale questions is not statistically meaningful.",
    },
    ThresholdDefault {
        rule_key: "straightline_entropy_threshold",
        display_name: "Shannon Entropy Threshold (bits)",
        rule_category: "straightline",
        value: 0.5,
        notes: "Flag only when entropy is also below this floor; avoids false-flagging short low-variance batteries.",
    },
    ThresholdDefault {
        rule_key: "straightline_weight",
        display_name: "Straight-lining Heuristic Weight",
        rule_category: "straightline",
        value: 20.0,
        notes: "Component cap. Moderate evidence; uniform answers can be legitimate opinion.",
    },
    // duplicate
    ThresholdDefault {
        rule_key: "duplicate_exact_threshold",
        display_name: "Exact Duplicate Match Ratio",
        rule_category: "duplicate",
        value: 1.0,
        notes: "Field match ratio treated as an exact duplicate (full weight).",
    },
    ThresholdDefault {
        rule_key: "duplicate_partial_threshold",
        display_name: "Partial Duplicate Match Ratio",
        rule_category: "duplicate",
        value: 0.7,
        notes: "Floor above which a partial match is reported and scored proportionally.",
    },
    ThresholdDefault {
        rule_key: "duplicate_lookback_days",
        display_name: "Duplicate Lookback Window (days)",
        rule_category: "duplicate",
        value: 7.0,
        notes: "Days of same-form history compared for duplicates.",
    },
    ThresholdDefault {
        rule_key: "duplicate_weight",
        display_name: "Duplicate Response Heuristic Weight",
        rule_category: "duplicate",
        value: 20.0,
        notes: "Component cap. Strong evidence when triggered.",
    },
    // timing
    ThresholdDefault {
        rule_key: "timing_night_start_hour",
        display_name: "Night Window Start Hour",
        rule_category: "timing",
        value: 23.0,
        notes: "Start of the off-hours window in respondent-local time (24h).",
    },
    ThresholdDefault {
        rule_key: "timing_night_end_hour",
        display_name: "Night Window End Hour",
        rule_category: "timing",
        value: 5.0,
        notes: "End of the off-hours window in respondent-local time (24h).",
    },
    ThresholdDefault {
        rule_key: "timing_night_points",
        display_name: "Off-Hours Submission Points",
        rule_category: "timing",
        value: 10.0,
        notes: "Points contributed by a night-window submission.",
    },
    ThresholdDefault {
        rule_key: "timing_weekend_points",
        display_name: "Weekend Submission Points",
        rule_category: "timing",
        value: 5.0,
        notes: "Lower than the night penalty since weekend fieldwork is common.",
    },
    ThresholdDefault {
        rule_key: "timing_utc_offset_h",
        display_name: "Respondent Local UTC Offset (hours)",
        rule_category: "timing",
        value: 1.0,
        notes: "Offset applied to submission timestamps before hour/weekday checks. Default WAT (UTC+1).",
    },
    ThresholdDefault {
        rule_key: "timing_weight",
        display_name: "Off-Hours Timing Heuristic Weight",
        rule_category: "timing",
        value: 10.0,
        notes: "Component cap. Weakest signal; timing alone is contextual.",
    },
    // composite
    ThresholdDefault {
        rule_key: "severity_low_min",
        display_name: "Low Severity Minimum Score",
        rule_category: "composite",
        value: 25.0,
        notes: "Scores 25-49 = low severity; weekly review batch.",
    },
    ThresholdDefault {
        rule_key: "severity_medium_min",
        display_name: "Medium Severity Minimum Score",
        rule_category: "composite",
        value: 50.0,
        notes: "Scores 50-69 = medium severity; next-day callback.",
    },
    ThresholdDefault {
        rule_key: "severity_high_min",
        display_name: "High Severity Minimum Score",
        rule_category: "composite",
        value: 70.0,
        notes: "Scores 70-84 = high severity; immediate notification.",
    },
    ThresholdDefault {
        rule_key: "severity_critical_min",
        display_name: "Critical Severity Minimum Score",
        rule_category: "composite",
        value: 85.0,
        notes: "Scores 85-100 = critical severity; quarantine pending review.",
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_have_unique_keys() {
        let mut keys: Vec<_> = THRESHOLD_DEFAULTS.iter().map(|d| d.rule_key).collect();
        keys.sort_unstable();
        let before = keys.len();
        keys.dedup();
        assert_eq!(before, keys.len());
    }

    #[test]
    fn test_default_set_lookup_and_fallback() {
        let set = ThresholdSet::defaults();
        assert_eq!(set.version(), 1);
        assert_eq!(set.get("gps_weight", 0.0), 25.0);
        assert_eq!(set.get("severity_critical_min", 0.0), 85.0);
        // unknown key falls back
        assert_eq!(set.get("no_such_rule", 42.0), 42.0);
    }

    #[test]
    fn test_severity_cuts_are_ordered() {
        let set = ThresholdSet::defaults();
        let low = set.get("severity_low_min", 25.0);
        let medium = set.get("severity_medium_min", 50.0);
        let high = set.get("severity_high_min", 70.0);
        let critical = set.get("severity_critical_min", 85.0);
        assert!(0.0 < low && low < medium && medium < high && high < critical && critical <= 100.0);
    }
}
