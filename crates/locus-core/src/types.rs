//! Core data model for extracted facility records and their validation fields.
//!
//! # Type Categories
//!
//! ## Candidate Records
//! - [`CandidateRecord`]: One facility as produced by extraction, with organizations,
//!   locations and services
//! - [`LocationCandidate`], [`PostalAddress`]: The geographic part that enrichment fills in
//! - [`OrganizationCandidate`], [`ServiceCandidate`]: Scored from their locations
//!
//! ## Validation Fields
//! - [`ValidationStatus`]: Publication decision derived from the confidence score
//! - [`ValidationNotes`]: Provenance and rejection reason attached to every scored entity
//! - [`GeocodingProvenance`]: Which provider filled which fields, and how
//!
//! Unknown fields in extraction output are preserved through `extra` maps so the merge stage
//! receives everything extraction produced, not only the fields this stage understands.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Publication decision for a scored entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    /// Score at or above the verified threshold.
    Verified,
    /// Score between the rejection threshold and the verified threshold.
    NeedsReview,
    /// Score below the rejection threshold.
    Rejected,
}

impl ValidationStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verified => "verified",
            Self::NeedsReview => "needs_review",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Postal address attached to a location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostalAddress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "state")]
    pub state_province: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "postal")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PostalAddress {
    /// Returns `true` when no field that identifies a place is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        is_blank(self.address_1.as_deref()) &&
            is_blank(self.city.as_deref()) &&
            is_blank(self.state_province.as_deref()) &&
            is_blank(self.postal_code.as_deref())
    }

    #[must_use]
    pub fn has_postal_code(&self) -> bool {
        !is_blank(self.postal_code.as_deref())
    }

    /// Formats the address as a single line suitable for a forward geocoding query.
    ///
    /// `"1 Main St, Springfield, IL 62701"`
    #[must_use]
    pub fn one_line(&self) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(3);
        if let Some(street) = non_blank(self.address_1.as_deref()) {
            parts.push(street.to_string());
        }
        if let Some(city) = non_blank(self.city.as_deref()) {
            parts.push(city.to_string());
        }

        let region = [non_blank(self.state_province.as_deref()), non_blank(self.postal_code.as_deref())]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        if !region.is_empty() {
            parts.push(region);
        }

        parts.join(", ")
    }

    /// Parses a single-line address of the form `"street, city, STATE postal"`.
    ///
    /// Segments are assigned from the end: the last holds state and postal code, the one
    /// before it the city, and everything earlier the street. Returns `None` for blank input.
    #[must_use]
    pub fn parse_line(line: &str) -> Option<Self> {
        let segments: Vec<&str> =
            line.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
        let (last, rest) = segments.split_last()?;

        let mut address = Self::default();
        let mut region: Vec<&str> = last.split_whitespace().collect();
        if region.last().is_some_and(|t| t.chars().next().is_some_and(|c| c.is_ascii_digit())) {
            address.postal_code = region.pop().map(str::to_string);
        }

        match rest {
            [] => address.address_1 = Some(region.join(" ")).filter(|s| !s.is_empty()),
            [street] => {
                address.address_1 = Some((*street).to_string());
                address.city = Some(region.join(" ")).filter(|s| !s.is_empty());
            }
            [street @ .., city] => {
                address.address_1 = Some(street.join(", "));
                address.city = Some((*city).to_string());
                address.state_province = Some(region.join(" ")).filter(|s| !s.is_empty());
            }
        }

        Some(address)
    }

    /// Copies every field of `other` into `self` where `self` is blank.
    ///
    /// Returns the names of the fields that were filled. Non-empty fields are never
    /// overwritten.
    pub fn fill_missing_from(&mut self, other: &PostalAddress) -> Vec<&'static str> {
        let mut filled = Vec::new();
        let pairs: [(&mut Option<String>, &Option<String>, &'static str); 6] = [
            (&mut self.address_1, &other.address_1, "address_1"),
            (&mut self.city, &other.city, "city"),
            (&mut self.state_province, &other.state_province, "state_province"),
            (&mut self.postal_code, &other.postal_code, "postal_code"),
            (&mut self.country, &other.country, "country"),
            (&mut self.address_type, &other.address_type, "address_type"),
        ];

        for (target, source, name) in pairs {
            if is_blank(target.as_deref()) {
                if let Some(value) = non_blank(source.as_deref()) {
                    *target = Some(value.to_string());
                    filled.push(name);
                }
            }
        }

        filled
    }
}

/// Lookup performed by the enricher for a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentAction {
    /// Address to coordinates.
    Forward,
    /// Coordinates to a full address.
    Reverse,
    /// Coordinates to the missing parts of an existing address.
    PostalFill,
}

impl EnrichmentAction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Reverse => "reverse",
            Self::PostalFill => "postal_fill",
        }
    }
}

/// Outcome of consulting a single provider in the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    CacheHit,
    Empty,
    Failed,
    CircuitOpen,
}

/// Record of one provider consulted while resolving a lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderAttempt {
    pub provider: String,
    pub outcome: AttemptOutcome,
    /// Network calls made to this provider (0 for cache hits and open circuits).
    #[serde(default)]
    pub calls: u32,
}

/// Where enriched fields of a location came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodingProvenance {
    pub action: EnrichmentAction,
    /// Provider whose answer was used; `None` when the chain was exhausted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default)]
    pub cache_hit: bool,
    /// The provider only resolved a postal-code or city centroid.
    #[serde(default)]
    pub centroid: bool,
    /// The provider is a coarse fallback source.
    #[serde(default)]
    pub low_resolution: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<ProviderAttempt>,
}

impl GeocodingProvenance {
    /// Returns `true` when a provider answered and fields were written.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.provider.is_some()
    }
}

/// Validation details attached to each scored entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationNotes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provenance: Vec<GeocodingProvenance>,
    /// Score deductions applied, e.g. `"missing_postal_code:-5"`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub penalties: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
}

impl ValidationNotes {
    /// Returns the provenance entry that set this location's coordinates, if any.
    #[must_use]
    pub fn coordinate_provenance(&self) -> Option<&GeocodingProvenance> {
        self.provenance
            .iter()
            .rev()
            .find(|p| p.action == EnrichmentAction::Forward && p.is_resolved())
    }
}

/// One physical site of a facility.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationCandidate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_coordinate", alias = "lat")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_coordinate", alias = "lng", alias = "lon")]
    pub longitude: Option<f64>,
    #[serde(default, rename = "address", alias = "addresses", deserialize_with = "lenient_addresses")]
    pub addresses: Vec<PostalAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_status: Option<ValidationStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_notes: Option<ValidationNotes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geocoding_source: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LocationCandidate {
    /// Returns the coordinate pair when both halves are present and finite.
    #[must_use]
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lng)) if lat.is_finite() && lng.is_finite() => Some((lat, lng)),
            _ => None,
        }
    }

    /// Returns the first address that carries any identifying field.
    #[must_use]
    pub fn primary_address(&self) -> Option<&PostalAddress> {
        self.addresses.iter().find(|a| !a.is_empty())
    }

    pub fn primary_address_mut(&mut self) -> Option<&mut PostalAddress> {
        self.addresses.iter_mut().find(|a| !a.is_empty())
    }

    /// Returns the notes, creating empty ones on first use.
    pub fn notes_mut(&mut self) -> &mut ValidationNotes {
        self.validation_notes.get_or_insert_with(ValidationNotes::default)
    }

    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.validation_status == Some(ValidationStatus::Rejected)
    }
}

/// Organization running the facility.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrganizationCandidate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_status: Option<ValidationStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_notes: Option<ValidationNotes>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Service offered at a location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceCandidate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Identifier of the location this service is offered at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_status: Option<ValidationStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_notes: Option<ValidationNotes>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One facility as produced by extraction.
///
/// Serialized with the HSDS-style top-level keys `organization`, `service` and `location`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    #[serde(default, rename = "organization", alias = "organizations")]
    pub organizations: Vec<OrganizationCandidate>,
    #[serde(default, rename = "service", alias = "services")]
    pub services: Vec<ServiceCandidate>,
    #[serde(default, rename = "location", alias = "locations")]
    pub locations: Vec<LocationCandidate>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CandidateRecord {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.organizations.is_empty() && self.services.is_empty() && self.locations.is_empty()
    }
}

/// Returns `true` for `None`, empty and whitespace-only strings.
#[inline]
#[must_use]
pub fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

/// Returns the trimmed value when it is not blank.
#[inline]
#[must_use]
pub fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Accepts numbers, numeric strings and null for coordinates.
///
/// Extraction output frequently quotes coordinates or leaves them empty.
fn lenient_coordinate<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

/// Accepts a list of address objects or one-line strings, or a single object or string.
fn lenient_addresses<'de, D>(deserializer: D) -> Result<Vec<PostalAddress>, D::Error>
where
    D: Deserializer<'de>,
{
    let items = match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(other) => vec![other],
    };

    let mut addresses = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::String(line) => addresses.extend(PostalAddress::parse_line(&line)),
            Value::Object(_) => {
                addresses.push(serde_json::from_value(item).map_err(serde::de::Error::custom)?);
            }
            _ => {}
        }
    }
    Ok(addresses)
}
