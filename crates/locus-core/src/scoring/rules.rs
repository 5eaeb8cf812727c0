use super::{
    bounds::{within_state_bounds, within_us_bounds},
    patterns::{is_placeholder_address, is_test_data},
};
use crate::types::{is_blank, non_blank, EnrichmentAction, GeocodingProvenance, LocationCandidate};
use serde::{Deserialize, Serialize};

/// Coordinates with both components below this magnitude are treated as a null island default.
pub const NEAR_ZERO_DEGREES: f64 = 0.01;

/// How the location's coordinates were obtained.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeocodingConfidence {
    /// Provider that supplied the coordinates, `None` if they came with the record.
    pub provider: Option<String>,
    pub low_resolution: bool,
    pub centroid: bool,
}

/// Signals extracted from one location, consumed by the scorer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRuleOutcome {
    pub has_coordinates: bool,
    pub is_zero_coordinates: bool,
    pub within_us_bounds: bool,
    /// `true` when the claimed state is unknown.
    pub within_state_bounds: bool,
    pub is_test_data: bool,
    pub has_placeholder_address: bool,
    pub missing_postal: bool,
    pub missing_city: bool,
    pub geocoding_confidence: GeocodingConfidence,
}

/// Evaluates validation rules for locations. Stateless and free of I/O.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleEvaluator;

impl RuleEvaluator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Evaluates `location` after enrichment.
    ///
    /// `provenance` is what enrichment produced for this location in the current run. When it
    /// holds no resolved forward lookup, the provenance already stored in the location's notes
    /// from an earlier run is used, so re-validation scores identically.
    #[must_use]
    pub fn evaluate(
        &self,
        location: &LocationCandidate,
        provenance: &[GeocodingProvenance],
    ) -> ValidationRuleOutcome {
        let coordinates = location.coordinates();
        let primary = location.primary_address();

        let is_zero_coordinates = coordinates.is_some_and(|(lat, lng)| {
            lat.abs() < NEAR_ZERO_DEGREES && lng.abs() < NEAR_ZERO_DEGREES
        });
        let within_us = coordinates.is_some_and(|(lat, lng)| within_us_bounds(lat, lng));
        let within_state = match (coordinates, primary.and_then(|a| a.state_province.as_deref())) {
            (Some((lat, lng)), Some(state)) => within_state_bounds(state, lat, lng).unwrap_or(true),
            _ => true,
        };

        ValidationRuleOutcome {
            has_coordinates: coordinates.is_some(),
            is_zero_coordinates,
            within_us_bounds: within_us,
            within_state_bounds: within_state,
            is_test_data: is_test_data(location),
            has_placeholder_address: primary.is_some_and(is_placeholder_address),
            missing_postal: !location.addresses.iter().any(|a| a.has_postal_code()),
            missing_city: location.addresses.iter().all(|a| is_blank(a.city.as_deref())),
            geocoding_confidence: geocoding_confidence(location, provenance),
        }
    }
}

fn geocoding_confidence(
    location: &LocationCandidate,
    provenance: &[GeocodingProvenance],
) -> GeocodingConfidence {
    let fresh = provenance
        .iter()
        .rev()
        .find(|p| p.action == EnrichmentAction::Forward && p.is_resolved());
    let stored = location.validation_notes.as_ref().and_then(|n| n.coordinate_provenance());

    match fresh.or(stored) {
        Some(p) => GeocodingConfidence {
            provider: p.provider.clone(),
            low_resolution: p.low_resolution,
            centroid: p.centroid,
        },
        None => GeocodingConfidence {
            provider: non_blank(location.geocoding_source.as_deref())
                .filter(|_| location.coordinates().is_some())
                .map(str::to_string),
            ..GeocodingConfidence::default()
        },
    }
}
