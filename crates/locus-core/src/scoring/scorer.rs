use super::rules::ValidationRuleOutcome;
use crate::types::{is_blank, ServiceCandidate, ValidationStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scores at or above this are [`ValidationStatus::Verified`].
pub const VERIFIED_THRESHOLD: u8 = 80;

/// Organization scores are capped here when any of their locations is rejected.
pub const REJECTED_LOCATION_ORG_CAP: u8 = 50;

/// Deduction per missing service name or description.
pub const SERVICE_FIELD_PENALTY: u8 = 5;

/// Why a location was rejected.
///
/// Also used as the `reason` label of `locations_rejected_by_reason_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    MissingCoordinates,
    ZeroCoordinates,
    OutsideUsBounds,
    TestData,
    LowScore,
}

impl RejectionReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingCoordinates => "missing_coordinates",
            Self::ZeroCoordinates => "zero_coordinates",
            Self::OutsideUsBounds => "outside_us_bounds",
            Self::TestData => "test_data",
            Self::LowScore => "low_score",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Score deduction for a soft rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Penalty {
    PlaceholderAddress,
    OutsideState,
    LowResolutionProvider,
    CentroidGeocode,
    MissingPostalCode,
    MissingCity,
}

impl Penalty {
    #[must_use]
    pub fn points(&self) -> u8 {
        match self {
            Self::PlaceholderAddress => 75,
            Self::OutsideState => 20,
            Self::LowResolutionProvider => 10,
            Self::CentroidGeocode => 15,
            Self::MissingPostalCode => 5,
            Self::MissingCity => 10,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlaceholderAddress => "placeholder_address",
            Self::OutsideState => "outside_state_bounds",
            Self::LowResolutionProvider => "low_resolution_provider",
            Self::CentroidGeocode => "centroid_geocode",
            Self::MissingPostalCode => "missing_postal_code",
            Self::MissingCity => "missing_city",
        }
    }

    /// Note form, e.g. `"missing_postal_code:-5"`.
    #[must_use]
    pub fn note(&self) -> String {
        format!("{}:-{}", self.as_str(), self.points())
    }
}

/// Score of a location together with how it was reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationScore {
    pub score: u8,
    pub status: ValidationStatus,
    /// Set only when `status` is [`ValidationStatus::Rejected`].
    pub rejection_reason: Option<RejectionReason>,
    pub penalties: Vec<Penalty>,
}

/// Hard floor hit before any penalty is considered.
#[derive(Debug, Clone, Copy)]
struct Floor {
    score: u8,
    reason: RejectionReason,
}

/// Deterministic confidence scorer.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceScorer {
    rejection_threshold: u8,
}

impl Default for ConfidenceScorer {
    fn default() -> Self {
        Self::new(10)
    }
}

impl ConfidenceScorer {
    #[must_use]
    pub fn new(rejection_threshold: u8) -> Self {
        Self { rejection_threshold: rejection_threshold.min(100) }
    }

    #[must_use]
    pub fn rejection_threshold(&self) -> u8 {
        self.rejection_threshold
    }

    /// Maps a score to a status.
    #[must_use]
    pub fn status(&self, score: u8) -> ValidationStatus {
        if score < self.rejection_threshold {
            ValidationStatus::Rejected
        } else if score < VERIFIED_THRESHOLD {
            ValidationStatus::NeedsReview
        } else {
            ValidationStatus::Verified
        }
    }

    /// Returns the 0-100 score for a location's rule outcome.
    #[must_use]
    pub fn score(&self, outcome: &ValidationRuleOutcome) -> u8 {
        self.score_location(outcome).score
    }

    /// Scores a location, returning status, rejection reason and applied penalties.
    #[must_use]
    pub fn score_location(&self, outcome: &ValidationRuleOutcome) -> LocationScore {
        if let Some(floor) = hard_floor(outcome) {
            let status = self.status(floor.score);
            return LocationScore {
                score: floor.score,
                status,
                rejection_reason: (status == ValidationStatus::Rejected).then_some(floor.reason),
                penalties: Vec::new(),
            };
        }

        let penalties = penalties(outcome);
        let deducted: u32 = penalties.iter().map(|p| u32::from(p.points())).sum();
        let score = u8::try_from(100u32.saturating_sub(deducted)).unwrap_or(0);
        let status = self.status(score);

        LocationScore {
            score,
            status,
            rejection_reason: (status == ValidationStatus::Rejected)
                .then_some(RejectionReason::LowScore),
            penalties,
        }
    }

    /// Averages location scores, rounding half up, and caps the result when any location
    /// was rejected. Returns `None` without locations.
    #[must_use]
    pub fn score_organization(&self, location_scores: &[u8]) -> Option<u8> {
        let average = average(location_scores)?;
        let any_rejected = location_scores.iter().any(|s| *s < self.rejection_threshold);

        Some(if any_rejected { average.min(REJECTED_LOCATION_ORG_CAP) } else { average })
    }

    /// Scores a service from the score of its location.
    ///
    /// `linked_score` is the score of the location named by the service's `location_id`;
    /// without one the average over all locations is used. Returns `None` if neither exists.
    #[must_use]
    pub fn score_service(
        &self,
        service: &ServiceCandidate,
        linked_score: Option<u8>,
        location_scores: &[u8],
    ) -> Option<u8> {
        let base = linked_score.or_else(|| average(location_scores))?;

        let missing = [service.name.as_deref(), service.description.as_deref()]
            .into_iter()
            .filter(|field| is_blank(*field))
            .count();
        let missing = u8::try_from(missing).unwrap_or(2);

        Some(base.saturating_sub(missing * SERVICE_FIELD_PENALTY))
    }
}

fn hard_floor(outcome: &ValidationRuleOutcome) -> Option<Floor> {
    if !outcome.has_coordinates {
        Some(Floor { score: 0, reason: RejectionReason::MissingCoordinates })
    } else if outcome.is_zero_coordinates {
        Some(Floor { score: 0, reason: RejectionReason::ZeroCoordinates })
    } else if !outcome.within_us_bounds {
        Some(Floor { score: 5, reason: RejectionReason::OutsideUsBounds })
    } else if outcome.is_test_data {
        Some(Floor { score: 5, reason: RejectionReason::TestData })
    } else {
        None
    }
}

fn penalties(outcome: &ValidationRuleOutcome) -> Vec<Penalty> {
    let confidence = &outcome.geocoding_confidence;

    [
        (outcome.has_placeholder_address, Penalty::PlaceholderAddress),
        (!outcome.within_state_bounds, Penalty::OutsideState),
        (confidence.low_resolution, Penalty::LowResolutionProvider),
        (confidence.centroid, Penalty::CentroidGeocode),
        (outcome.missing_postal, Penalty::MissingPostalCode),
        (outcome.missing_city, Penalty::MissingCity),
    ]
    .into_iter()
    .filter_map(|(applies, penalty)| applies.then_some(penalty))
    .collect()
}

fn average(scores: &[u8]) -> Option<u8> {
    if scores.is_empty() {
        return None;
    }
    let sum: u32 = scores.iter().map(|s| u32::from(*s)).sum();
    let count = u32::try_from(scores.len()).unwrap_or(u32::MAX);
    // Half up: (2 * sum + count) / (2 * count)
    u8::try_from((2 * sum + count) / (2 * count)).ok()
}
