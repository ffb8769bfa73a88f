//! Review state machine
//!
//! Governs the resolution lifecycle of a detection:
//!
//! ```text
//! unreviewed ──supervisor──▶ supervisor_resolved ──assessor──▶ assessor_finalized
//!                                  │  ▲
//!                                  └──┘ re-resolution (until finalized)
//! ```
//!
//! Transition rules live here as pure functions over [`ReviewState`];
//! the persistence layer applies them under compare-and-set or transactional
//! updates so illegal states are rejected at every write path.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Maximum length of supervisor/assessor notes.
pub const NOTES_MAX_LEN: usize = 1000;
/// Minimum justification length for a `final_rejected` assessor decision.
pub const REJECT_NOTES_MIN_LEN: usize = 10;
/// Justification bounds for bulk resolution.
pub const BULK_NOTES_MIN_LEN: usize = 10;
pub const BULK_NOTES_MAX_LEN: usize = 500;
/// Bulk batch size bounds.
pub const BULK_MIN_IDS: usize = 2;
pub const BULK_MAX_IDS: usize = 50;

/// Supervisor resolution outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum Resolution {
    FalsePositive,
    ConfirmedFraud,
    NeedsInvestigation,
    Dismissed,
    EnumeratorWarned,
    EnumeratorSuspended,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::FalsePositive => "false_positive",
            Resolution::ConfirmedFraud => "confirmed_fraud",
            Resolution::NeedsInvestigation => "needs_investigation",
            Resolution::Dismissed => "dismissed",
            Resolution::EnumeratorWarned => "enumerator_warned",
            Resolution::EnumeratorSuspended => "enumerator_suspended",
        }
    }
}

/// Second-tier (assessor) final decisions. Terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum AssessorResolution {
    FinalApproved,
    FinalRejected,
}

impl AssessorResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssessorResolution::FinalApproved => "final_approved",
            AssessorResolution::FinalRejected => "final_rejected",
        }
    }
}

/// The review-relevant slice of a detection row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReviewState {
    pub resolution: Option<Resolution>,
    pub assessor_resolution: Option<AssessorResolution>,
}

impl ReviewState {
    pub fn is_unreviewed(&self) -> bool {
        self.resolution.is_none()
    }

    pub fn is_finalized(&self) -> bool {
        self.assessor_resolution.is_some()
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("resolution notes must be at most {0} characters")]
    NotesTooLong(usize),

    #[error("notes must be at least {0} characters for this decision")]
    NotesTooShort(usize),

    #[error("detection is already finalized by an assessor and cannot be re-resolved")]
    AlreadyFinalized,

    #[error("detection has no supervisor resolution yet; assessor review requires one")]
    NotResolved,

    #[error("detection has already been reviewed by an assessor")]
    AlreadyAssessed,

    #[error("bulk resolution only accepts false_positive")]
    BulkResolutionNotAllowed,

    #[error("bulk review requires between {BULK_MIN_IDS} and {BULK_MAX_IDS} detection ids")]
    BulkSizeOutOfRange,

    #[error("detection {0} is not unreviewed; bulk batch rejected")]
    BulkTargetNotUnreviewed(Uuid),
}

impl From<TransitionError> for AppError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::NotesTooLong(_)
            | TransitionError::NotesTooShort(_)
            | TransitionError::BulkResolutionNotAllowed
            | TransitionError::BulkSizeOutOfRange => AppError::Validation(err.to_string()),
            TransitionError::AlreadyFinalized
            | TransitionError::NotResolved
            | TransitionError::AlreadyAssessed
            | TransitionError::BulkTargetNotUnreviewed(_) => AppError::Precondition(err.to_string()),
        }
    }
}

/// Validate a single-detection supervisor review.
///
/// Allowed from `unreviewed` and as re-resolution from `supervisor_resolved`;
/// rejected once an assessor has finalized the detection.
pub fn validate_supervisor_review(
    state: &ReviewState,
    notes: Option<&str>,
) -> Result<(), TransitionError> {
    if state.is_finalized() {
        return Err(TransitionError::AlreadyFinalized);
    }
    if let Some(notes) = notes {
        if notes.chars().count() > NOTES_MAX_LEN {
            return Err(TransitionError::NotesTooLong(NOTES_MAX_LEN));
        }
    }
    Ok(())
}

/// Validate an assessor finalization.
///
/// Only reachable from `supervisor_resolved`; `final_rejected` requires a
/// justification of at least [`REJECT_NOTES_MIN_LEN`] characters. Violating
/// inputs are rejected before any write, never truncated.
pub fn validate_assessor_review(
    state: &ReviewState,
    resolution: AssessorResolution,
    notes: Option<&str>,
) -> Result<(), TransitionError> {
    if state.resolution.is_none() {
        return Err(TransitionError::NotResolved);
    }
    if state.assessor_resolution.is_some() {
        return Err(TransitionError::AlreadyAssessed);
    }
    if let Some(notes) = notes {
        if notes.chars().count() > NOTES_MAX_LEN {
            return Err(TransitionError::NotesTooLong(NOTES_MAX_LEN));
        }
    }
    if resolution == AssessorResolution::FinalRejected {
        let len = notes.map(|n| n.chars().count()).unwrap_or(0);
        if len < REJECT_NOTES_MIN_LEN {
            return Err(TransitionError::NotesTooShort(REJECT_NOTES_MIN_LEN));
        }
    }
    Ok(())
}

/// Validate a bulk supervisor resolution over a cluster's member ids.
///
/// All-or-nothing: if any target is no longer `unreviewed` the whole batch is
/// rejected. The resolution is fixed to `false_positive` and the justification
/// is mandatory.
pub fn validate_bulk_review(
    resolution: Resolution,
    notes: &str,
    targets: &[(Uuid, ReviewState)],
) -> Result<(), TransitionError> {
    if resolution != Resolution::FalsePositive {
        return Err(TransitionError::BulkResolutionNotAllowed);
    }
    if targets.len() < BULK_MIN_IDS || targets.len() > BULK_MAX_IDS {
        return Err(TransitionError::BulkSizeOutOfRange);
    }
    let len = notes.chars().count();
    if len < BULK_NOTES_MIN_LEN {
        return Err(TransitionError::NotesTooShort(BULK_NOTES_MIN_LEN));
    }
    if len > BULK_NOTES_MAX_LEN {
        return Err(TransitionError::NotesTooLong(BULK_NOTES_MAX_LEN));
    }
    for (id, state) in targets {
        if !state.is_unreviewed() {
            return Err(TransitionError::BulkTargetNotUnreviewed(*id));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreviewed() -> ReviewState {
        ReviewState::default()
    }

    fn resolved() -> ReviewState {
        ReviewState {
            resolution: Some(Resolution::ConfirmedFraud),
            assessor_resolution: None,
        }
    }

    fn finalized() -> ReviewState {
        ReviewState {
            resolution: Some(Resolution::ConfirmedFraud),
            assessor_resolution: Some(AssessorResolution::FinalApproved),
        }
    }

    #[test]
    fn test_supervisor_review_from_unreviewed() {
        assert!(validate_supervisor_review(&unreviewed(), None).is_ok());
        assert!(validate_supervisor_review(&unreviewed(), Some("looks fabricated")).is_ok());
    }

    #[test]
    fn test_supervisor_re_resolution_allowed_until_finalized() {
        assert!(validate_supervisor_review(&resolved(), Some("changed my mind")).is_ok());
        assert_eq!(
            validate_supervisor_review(&finalized(), None),
            Err(TransitionError::AlreadyFinalized)
        );
    }

    #[test]
    fn test_supervisor_notes_too_long() {
        let notes = "x".repeat(NOTES_MAX_LEN + 1);
        assert_eq!(
            validate_supervisor_review(&unreviewed(), Some(&notes)),
            Err(TransitionError::NotesTooLong(NOTES_MAX_LEN))
        );
        let notes = "x".repeat(NOTES_MAX_LEN);
        assert!(validate_supervisor_review(&unreviewed(), Some(&notes)).is_ok());
    }

    #[test]
    fn test_assessor_before_supervisor_rejected() {
        assert_eq!(
            validate_assessor_review(&unreviewed(), AssessorResolution::FinalApproved, None),
            Err(TransitionError::NotResolved)
        );
    }

    #[test]
    fn test_assessor_double_review_rejected() {
        assert_eq!(
            validate_assessor_review(&finalized(), AssessorResolution::FinalApproved, None),
            Err(TransitionError::AlreadyAssessed)
        );
    }

    #[test]
    fn test_final_approved_needs_no_notes() {
        assert!(
            validate_assessor_review(&resolved(), AssessorResolution::FinalApproved, None).is_ok()
        );
    }

    #[test]
    fn test_final_rejected_notes_length_boundary() {
        // 5 chars: rejected
        assert_eq!(
            validate_assessor_review(&resolved(), AssessorResolution::FinalRejected, Some("short")),
            Err(TransitionError::NotesTooShort(REJECT_NOTES_MIN_LEN))
        );
        // exactly 10 chars: accepted
        assert!(validate_assessor_review(
            &resolved(),
            AssessorResolution::FinalRejected,
            Some("1234567890")
        )
        .is_ok());
        // missing entirely: rejected
        assert_eq!(
            validate_assessor_review(&resolved(), AssessorResolution::FinalRejected, None),
            Err(TransitionError::NotesTooShort(REJECT_NOTES_MIN_LEN))
        );
    }

    #[test]
    fn test_bulk_rejects_non_false_positive() {
        let targets = vec![
            (Uuid::new_v4(), unreviewed()),
            (Uuid::new_v4(), unreviewed()),
        ];
        assert_eq!(
            validate_bulk_review(Resolution::ConfirmedFraud, "a legitimate event", &targets),
            Err(TransitionError::BulkResolutionNotAllowed)
        );
    }

    #[test]
    fn test_bulk_size_bounds() {
        let one = vec![(Uuid::new_v4(), unreviewed())];
        assert_eq!(
            validate_bulk_review(Resolution::FalsePositive, "a legitimate event", &one),
            Err(TransitionError::BulkSizeOutOfRange)
        );
        let too_many: Vec<_> = (0..BULK_MAX_IDS + 1)
            .map(|_| (Uuid::new_v4(), unreviewed()))
            .collect();
        assert_eq!(
            validate_bulk_review(Resolution::FalsePositive, "a legitimate event", &too_many),
            Err(TransitionError::BulkSizeOutOfRange)
        );
    }

    #[test]
    fn test_bulk_notes_bounds() {
        let targets = vec![
            (Uuid::new_v4(), unreviewed()),
            (Uuid::new_v4(), unreviewed()),
        ];
        assert_eq!(
            validate_bulk_review(Resolution::FalsePositive, "short", &targets),
            Err(TransitionError::NotesTooShort(BULK_NOTES_MIN_LEN))
        );
        let long = "x".repeat(BULK_NOTES_MAX_LEN + 1);
        assert_eq!(
            validate_bulk_review(Resolution::FalsePositive, &long, &targets),
            Err(TransitionError::NotesTooLong(BULK_NOTES_MAX_LEN))
        );
        assert!(validate_bulk_review(
            Resolution::FalsePositive,
            "Legitimate union meeting",
            &targets
        )
        .is_ok());
    }

    #[test]
    fn test_bulk_all_or_nothing() {
        let b = Uuid::new_v4();
        let targets = vec![
            (Uuid::new_v4(), unreviewed()),
            (b, resolved()),
            (Uuid::new_v4(), unreviewed()),
        ];
        assert_eq!(
            validate_bulk_review(Resolution::FalsePositive, "Legitimate union meeting", &targets),
            Err(TransitionError::BulkTargetNotUnreviewed(b))
        );
    }
}
