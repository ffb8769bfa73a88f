//! Database models

pub mod detection;
pub mod submission;
pub mod threshold;

pub use detection::{
    AssessorActivity, AssessorFilter, AssessorStats, ClusterCandidate, Detection,
    DetectionFilter, DetectionWithContext, Page, Severity,
};
pub use submission::{NearbySubmission, RecentSubmission, Submission};
pub use threshold::{FraudThreshold, ThresholdSet};
