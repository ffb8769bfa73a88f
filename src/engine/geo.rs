//! GPS plausibility analyzer
//!
//! Three independent signals over the submission's fix: proximity clustering
//! against recent fixes from other enumerators, an implied travel speed from
//! the enumerator's immediately preceding fix, and bit-identical coordinates
//! reused from an earlier submission. Each signal contributes a configured
//! share of the heuristic weight; the sum is capped at the weight.

use crate::engine::evidence::GpsEvidence;
use crate::engine::{round2, Outcome, SubmissionContext};
use crate::models::ThresholdSet;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two WGS84 points, in meters.
pub fn haversine_m(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

pub fn evaluate(ctx: &SubmissionContext, thresholds: &ThresholdSet) -> Outcome<GpsEvidence> {
    let (lat, lng) = match (ctx.submission.gps_latitude, ctx.submission.gps_longitude) {
        (Some(lat), Some(lng)) => (lat, lng),
        _ => {
            tracing::debug!(submission_id = %ctx.submission.id, "no GPS fix, skipping geo analysis");
            return Outcome::none();
        }
    };

    let weight = thresholds.get("gps_weight", 25.0);
    let radius_m = thresholds.get("gps_cluster_radius_m", 50.0);
    let min_samples = thresholds.get("gps_cluster_min_samples", 3.0);
    let teleport_kmh = thresholds.get("gps_teleport_speed_kmh", 120.0);
    let max_accuracy_m = thresholds.get("gps_max_accuracy_m", 50.0);
    let cluster_share = thresholds.get("gps_cluster_share", 0.6);
    let teleport_share = thresholds.get("gps_teleport_share", 0.2);
    let duplicate_share = thresholds.get("gps_duplicate_share", 0.2);

    let mut cluster_count: u32 = 0;
    let mut nearest_neighbor_m: Option<f64> = None;
    for other in &ctx.nearby {
        let d = haversine_m(lat, lng, other.gps_latitude, other.gps_longitude);
        if d <= radius_m {
            cluster_count += 1;
        }
        if nearest_neighbor_m.map_or(true, |n| d < n) {
            nearest_neighbor_m = Some(d);
        }
    }

    // Implied speed from the enumerator's most recent earlier fix.
    let mut teleportation_speed_kmh: Option<f64> = None;
    let previous_fix = ctx
        .recent
        .iter()
        .filter(|r| r.submitted_at < ctx.submission.submitted_at)
        .filter_map(|r| match (r.gps_latitude, r.gps_longitude) {
            (Some(plat), Some(plng)) => Some((r.submitted_at, plat, plng)),
            _ => None,
        })
        .max_by_key(|(at, _, _)| *at);
    if let Some((prev_at, plat, plng)) = previous_fix {
        let elapsed_s = (ctx.submission.submitted_at - prev_at).num_seconds();
        if elapsed_s > 0 {
            let distance_km = haversine_m(lat, lng, plat, plng) / 1000.0;
            teleportation_speed_kmh = Some(distance_km / (elapsed_s as f64 / 3600.0));
        }
    }
    let teleportation_flag = teleportation_speed_kmh.map_or(false, |v| v > teleport_kmh);

    let duplicate_coords = ctx
        .recent
        .iter()
        .any(|r| r.gps_latitude == Some(lat) && r.gps_longitude == Some(lng));

    let mut score = 0.0;
    let mut flags = Vec::new();

    if f64::from(cluster_count) + 1.0 >= min_samples {
        score += weight * cluster_share;
        flags.push("proximity_cluster".to_string());
    }
    if teleportation_flag {
        score += weight * teleport_share;
        flags.push("teleportation".to_string());
    }
    if duplicate_coords {
        score += weight * duplicate_share;
        flags.push("duplicate_coordinates".to_string());
    }
    if ctx
        .submission
        .gps_accuracy_m
        .map_or(false, |a| a > max_accuracy_m)
    {
        flags.push("low_accuracy".to_string());
    }

    Outcome {
        score: round2(score.min(weight)),
        evidence: Some(GpsEvidence {
            cluster_count,
            accuracy_m: ctx.submission.gps_accuracy_m,
            teleportation_flag,
            teleportation_speed_kmh: teleportation_speed_kmh.map(round2),
            duplicate_coords,
            nearest_neighbor_m: nearest_neighbor_m.map(round2),
            flags,
        }),
    }
}
