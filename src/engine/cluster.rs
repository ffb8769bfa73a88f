//! Spatial cluster detector
//!
//! Groups unresolved detections whose submissions sit within a configured
//! radius of each other, so a batch of fabricated interviews filed from one
//! spot can be reviewed (and bulk-resolved) as a unit. Clusters are computed
//! on demand and never persisted.
//!
//! The grouping is greedy: candidates are visited in detection-id order, each
//! unclaimed point seeds a group and absorbs unclaimed points within the
//! radius of the evolving centroid until no more fit. A radius-sized cell
//! grid keeps neighbor probes local instead of scanning every point. Given
//! the same candidate set the output is identical regardless of input order.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::engine::geo::haversine_m;
use crate::engine::round2;
use crate::models::{ClusterCandidate, Severity};

const METERS_PER_DEGREE_LAT: f64 = 111_320.0;

#[derive(Debug, Clone, Serialize)]
pub struct Cluster {
    /// Stable content address: SHA-256 over the sorted member detection ids.
    pub cluster_id: String,
    pub center_latitude: f64,
    pub center_longitude: f64,
    pub radius_meters: f64,
    pub detection_count: usize,
    pub distinct_enumerators: usize,
    pub average_total_score: f64,
    pub min_severity: Severity,
    pub max_severity: Severity,
    pub earliest_submitted_at: DateTime<Utc>,
    pub latest_submitted_at: DateTime<Utc>,
    pub detection_ids: Vec<Uuid>,
    pub members: Vec<ClusterCandidate>,
}

fn cluster_id(sorted_ids: &[Uuid]) -> String {
    let mut hasher = Sha256::new();
    for id in sorted_ids {
        hasher.update(id.as_bytes());
    }
    hex::encode(hasher.finalize())
}

struct CellGrid {
    cell_lat_deg: f64,
    cell_lng_deg: f64,
    cells: std::collections::HashMap<(i64, i64), Vec<usize>>,
}

impl CellGrid {
    fn build(points: &[ClusterCandidate], radius_m: f64) -> Self {
        // Longitude degrees shrink toward the poles. Sizing cells from the
        // smallest cos(lat) in the set keeps every cell at least radius_m
        // wide, so a 3x3 probe around any point covers its full radius.
        let lng_scale = points
            .iter()
            .map(|p| p.gps_latitude.to_radians().cos().abs())
            .fold(1.0_f64, f64::min)
            .max(0.01);
        let cell_lat_deg = radius_m / METERS_PER_DEGREE_LAT;
        let cell_lng_deg = radius_m / (METERS_PER_DEGREE_LAT * lng_scale);

        let mut grid = Self {
            cell_lat_deg,
            cell_lng_deg,
            cells: std::collections::HashMap::new(),
        };
        for (idx, p) in points.iter().enumerate() {
            let key = grid.cell_of(p.gps_latitude, p.gps_longitude);
            grid.cells.entry(key).or_default().push(idx);
        }
        grid
    }

    fn cell_of(&self, lat: f64, lng: f64) -> (i64, i64) {
        (
            (lat / self.cell_lat_deg).floor() as i64,
            (lng / self.cell_lng_deg).floor() as i64,
        )
    }

    /// Candidate indices in the 3x3 neighborhood around a point.
    fn neighborhood(&self, lat: f64, lng: f64) -> Vec<usize> {
        let (row, col) = self.cell_of(lat, lng);
        let mut out = Vec::new();
        for dr in -1..=1 {
            for dc in -1..=1 {
                if let Some(indices) = self.cells.get(&(row + dr, col + dc)) {
                    out.extend_from_slice(indices);
                }
            }
        }
        out
    }
}

/// Detect spatial clusters among the candidates. Groups of fewer than two
/// members are discarded.
pub fn detect_clusters(candidates: &[ClusterCandidate], radius_m: f64) -> Vec<Cluster> {
    if candidates.len() < 2 || radius_m <= 0.0 {
        return Vec::new();
    }

    // Id order makes the greedy pass independent of input order.
    let mut points: Vec<ClusterCandidate> = candidates.to_vec();
    points.sort_by_key(|p| p.id);

    let grid = CellGrid::build(&points, radius_m);
    let mut claimed = vec![false; points.len()];
    let mut clusters = Vec::new();

    for seed in 0..points.len() {
        if claimed[seed] {
            continue;
        }
        claimed[seed] = true;
        let mut members = vec![seed];
        let mut center_lat = points[seed].gps_latitude;
        let mut center_lng = points[seed].gps_longitude;

        // Absorb until the centroid stops attracting new points.
        loop {
            let mut absorbed = Vec::new();
            for idx in grid.neighborhood(center_lat, center_lng) {
                if claimed[idx] {
                    continue;
                }
                let p = &points[idx];
                if haversine_m(center_lat, center_lng, p.gps_latitude, p.gps_longitude)
                    <= radius_m
                {
                    absorbed.push(idx);
                }
            }
            if absorbed.is_empty() {
                break;
            }
            absorbed.sort_unstable();
            for idx in absorbed {
                claimed[idx] = true;
                members.push(idx);
            }
            center_lat = members.iter().map(|&i| points[i].gps_latitude).sum::<f64>()
                / members.len() as f64;
            center_lng = members.iter().map(|&i| points[i].gps_longitude).sum::<f64>()
                / members.len() as f64;
        }

        if members.len() < 2 {
            continue;
        }
        clusters.push(summarize(
            members.iter().map(|&i| points[i].clone()).collect(),
            center_lat,
            center_lng,
            radius_m,
        ));
    }

    clusters.sort_by(|a, b| {
        b.detection_count
            .cmp(&a.detection_count)
            .then_with(|| a.cluster_id.cmp(&b.cluster_id))
    });
    clusters
}

fn summarize(
    mut members: Vec<ClusterCandidate>,
    center_lat: f64,
    center_lng: f64,
    radius_m: f64,
) -> Cluster {
    members.sort_by_key(|m| m.id);
    let detection_ids: Vec<Uuid> = members.iter().map(|m| m.id).collect();

    let max_member_distance = members
        .iter()
        .map(|m| haversine_m(center_lat, center_lng, m.gps_latitude, m.gps_longitude))
        .fold(0.0_f64, f64::max);

    let distinct_enumerators = members
        .iter()
        .map(|m| m.enumerator_id)
        .collect::<std::collections::HashSet<_>>()
        .len();
    let average_total_score =
        members.iter().map(|m| m.total_score).sum::<f64>() / members.len() as f64;

    // min/max over non-empty member sets; fall back values are unreachable.
    let min_severity = members.iter().map(|m| m.severity).min().unwrap_or(Severity::Clean);
    let max_severity = members.iter().map(|m| m.severity).max().unwrap_or(Severity::Clean);
    let earliest = members
        .iter()
        .map(|m| m.submitted_at)
        .min()
        .unwrap_or_else(Utc::now);
    let latest = members
        .iter()
        .map(|m| m.submitted_at)
        .max()
        .unwrap_or_else(Utc::now);

    Cluster {
        cluster_id: cluster_id(&detection_ids),
        center_latitude: center_lat,
        center_longitude: center_lng,
        radius_meters: round2(max_member_distance.max(radius_m)),
        detection_count: members.len(),
        distinct_enumerators,
        average_total_score: round2(average_total_score),
        min_severity,
        max_severity,
        earliest_submitted_at: earliest,
        latest_submitted_at: latest,
        detection_ids,
        members,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn candidate(lat: f64, lng: f64, score: f64) -> ClusterCandidate {
        ClusterCandidate {
            id: Uuid::new_v4(),
            submission_id: Uuid::new_v4(),
            enumerator_id: Uuid::new_v4(),
            severity: Severity::Medium,
            total_score: score,
            submitted_at: "2026-01-07T12:00:00Z".parse().unwrap(),
            gps_latitude: lat,
            gps_longitude: lng,
        }
    }

    #[test]
    fn test_singletons_form_no_cluster() {
        // Two points roughly 15 km apart.
        let candidates = vec![candidate(9.05, 7.49, 60.0), candidate(9.19, 7.49, 60.0)];
        assert!(detect_clusters(&candidates, 50.0).is_empty());
    }

    #[test]
    fn test_colocated_points_form_one_cluster() {
        let base = (9.0579, 7.4951);
        let mut candidates = Vec::new();
        for i in 0..15 {
            // Spread within ~20 m of the base point.
            let jitter = i as f64 * 0.00001;
            candidates.push(candidate(base.0 + jitter, base.1, 50.0 + i as f64));
        }
        let clusters = detect_clusters(&candidates, 50.0);
        assert_eq!(clusters.len(), 1);
        let c = &clusters[0];
        assert_eq!(c.detection_count, 15);
        assert_eq!(c.distinct_enumerators, 15);
        assert_eq!(c.detection_ids.len(), 15);
    }

    #[test]
    fn test_members_within_reported_radius() {
        let mut candidates = Vec::new();
        for i in 0..8 {
            candidates.push(candidate(6.5244 + i as f64 * 0.0002, 3.3792, 40.0));
        }
        for c in detect_clusters(&candidates, 50.0) {
            for m in &c.members {
                let d = haversine_m(
                    c.center_latitude,
                    c.center_longitude,
                    m.gps_latitude,
                    m.gps_longitude,
                );
                assert!(d <= c.radius_meters + 1e-6, "member {d} m outside {} m", c.radius_meters);
            }
        }
    }

    #[test]
    fn test_order_independence() {
        let mut candidates = Vec::new();
        for i in 0..6 {
            candidates.push(candidate(9.0579 + i as f64 * 0.0001, 7.4951, 70.0));
        }
        for i in 0..4 {
            candidates.push(candidate(6.5244, 3.3792 + i as f64 * 0.0001, 30.0));
        }
        let forward = detect_clusters(&candidates, 50.0);
        let mut reversed = candidates.clone();
        reversed.reverse();
        let backward = detect_clusters(&reversed, 50.0);

        let ids = |cs: &[Cluster]| cs.iter().map(|c| c.cluster_id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&forward), ids(&backward));
    }

    #[test]
    fn test_mixed_latitude_pairs_both_cluster() {
        // At lat 60 a longitude degree is half its equatorial width; a pair
        // ~40 m apart there must still merge even when equatorial points pull
        // the grid sizing the other way.
        let candidates = vec![
            candidate(60.0, 10.0, 55.0),
            candidate(60.0, 10.00072, 55.0),
            candidate(0.0, 0.0, 45.0),
            candidate(0.0, 0.0003, 45.0),
        ];
        assert!(haversine_m(60.0, 10.0, 60.0, 10.00072) < 50.0);
        let clusters = detect_clusters(&candidates, 50.0);
        assert_eq!(clusters.len(), 2);
        assert!(clusters.iter().all(|c| c.detection_count == 2));
    }

    #[test]
    fn test_distant_groups_stay_separate() {
        let mut candidates = Vec::new();
        for i in 0..3 {
            candidates.push(candidate(9.0579 + i as f64 * 0.0001, 7.4951, 80.0));
        }
        for i in 0..3 {
            candidates.push(candidate(6.5244 + i as f64 * 0.0001, 3.3792, 20.0));
        }
        let clusters = detect_clusters(&candidates, 50.0);
        assert_eq!(clusters.len(), 2);
        // Sorted by size first, then id; equal sizes fall back to id order.
        assert_eq!(clusters[0].detection_count, 3);
    }

    #[test]
    fn test_cluster_id_stable_for_same_members() {
        let a = candidate(9.0, 7.0, 10.0);
        let b = candidate(9.0, 7.0, 20.0);
        let forward = cluster_id(&[a.id, b.id]);
        assert_eq!(forward, cluster_id(&[a.id, b.id]));
        assert_ne!(forward, cluster_id(&[a.id]));
    }

    #[test]
    fn test_summary_fields() {
        let mut a = candidate(9.0579, 7.4951, 40.0);
        a.severity = Severity::Low;
        let mut b = candidate(9.0579, 7.4951, 80.0);
        b.severity = Severity::Critical;
        b.submitted_at = a.submitted_at + Duration::hours(2);
        let clusters = detect_clusters(&[a.clone(), b.clone()], 50.0);
        let c = &clusters[0];
        assert_eq!(c.average_total_score, 60.0);
        assert_eq!(c.min_severity, Severity::Low);
        assert_eq!(c.max_severity, Severity::Critical);
        assert_eq!(c.earliest_submitted_at, a.submitted_at);
        assert_eq!(c.latest_submitted_at, b.submitted_at);
        assert_eq!(c.radius_meters, 50.0);
    }
}
