//! Geographic bounding boxes for national and per-state checks.
//!
//! Boxes are intentionally coarse: they catch swapped signs, swapped latitude/longitude and
//! records geocoded to the wrong state, not border precision.

/// Latitude/longitude rectangle, inclusive on all edges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    #[must_use]
    pub const fn new(min_lat: f64, max_lat: f64, min_lng: f64, max_lng: f64) -> Self {
        Self { min_lat, max_lat, min_lng, max_lng }
    }

    #[must_use]
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        self.contains_with_margin(latitude, longitude, 0.0)
    }

    /// Containment test with the box grown by `margin` degrees on every side.
    #[must_use]
    pub fn contains_with_margin(&self, latitude: f64, longitude: f64, margin: f64) -> bool {
        latitude >= self.min_lat - margin &&
            latitude <= self.max_lat + margin &&
            longitude >= self.min_lng - margin &&
            longitude <= self.max_lng + margin
    }
}

/// United States and inhabited territories.
pub const US_BOUNDS: &[BoundingBox] = &[
    // Contiguous states
    BoundingBox::new(24.0, 49.5, -125.0, -66.5),
    // Alaska, and the Aleutians west of the antimeridian
    BoundingBox::new(51.0, 71.6, -180.0, -129.9),
    BoundingBox::new(51.0, 53.5, 172.0, 180.0),
    // Hawaii
    BoundingBox::new(18.5, 22.5, -160.5, -154.5),
    // Puerto Rico and US Virgin Islands
    BoundingBox::new(17.6, 18.6, -67.5, -64.5),
    // Guam and Northern Mariana Islands
    BoundingBox::new(13.0, 21.0, 144.5, 146.5),
    // American Samoa
    BoundingBox::new(-14.6, -11.0, -171.2, -168.1),
];

/// Tolerance applied to state boxes so that border facilities are not penalized.
pub const STATE_MARGIN_DEGREES: f64 = 0.1;

/// Bounding boxes of one state or territory.
#[derive(Debug)]
pub struct StateBounds {
    pub code: &'static str,
    pub name: &'static str,
    pub boxes: &'static [BoundingBox],
}

macro_rules! state {
    ($code:literal, $name:literal, $($min_lat:literal, $max_lat:literal, $min_lng:literal, $max_lng:literal);+) => {
        StateBounds {
            code: $code,
            name: $name,
            boxes: &[$(BoundingBox::new($min_lat, $max_lat, $min_lng, $max_lng)),+],
        }
    };
}

pub const STATE_BOUNDS: &[StateBounds] = &[
    state!("AL", "alabama", 30.14, 35.01, -88.47, -84.89),
    state!("AK", "alaska", 51.21, 71.39, -179.15, -129.98; 51.0, 53.5, 172.0, 180.0),
    state!("AZ", "arizona", 31.33, 37.00, -114.82, -109.05),
    state!("AR", "arkansas", 33.00, 36.50, -94.62, -89.64),
    state!("CA", "california", 32.53, 42.01, -124.41, -114.13),
    state!("CO", "colorado", 36.99, 41.00, -109.06, -102.04),
    state!("CT", "connecticut", 40.98, 42.05, -73.73, -71.79),
    state!("DE", "delaware", 38.45, 39.84, -75.79, -75.05),
    state!("DC", "district of columbia", 38.79, 38.99, -77.12, -76.91),
    state!("FL", "florida", 24.52, 31.00, -87.63, -80.03),
    state!("GA", "georgia", 30.36, 35.00, -85.61, -80.84),
    state!("HI", "hawaii", 18.91, 22.24, -160.25, -154.81),
    state!("ID", "idaho", 41.99, 49.00, -117.24, -111.04),
    state!("IL", "illinois", 36.97, 42.51, -91.51, -87.02),
    state!("IN", "indiana", 37.77, 41.76, -88.10, -84.78),
    state!("IA", "iowa", 40.38, 43.50, -96.64, -90.14),
    state!("KS", "kansas", 36.99, 40.00, -102.05, -94.59),
    state!("KY", "kentucky", 36.50, 39.15, -89.57, -81.96),
    state!("LA", "louisiana", 28.93, 33.02, -94.04, -88.82),
    state!("ME", "maine", 43.06, 47.46, -71.08, -66.95),
    state!("MD", "maryland", 37.91, 39.72, -79.49, -75.05),
    state!("MA", "massachusetts", 41.24, 42.89, -73.51, -69.93),
    state!("MI", "michigan", 41.70, 48.31, -90.42, -82.41),
    state!("MN", "minnesota", 43.50, 49.38, -97.24, -89.49),
    state!("MS", "mississippi", 30.17, 35.00, -91.66, -88.10),
    state!("MO", "missouri", 35.99, 40.61, -95.77, -89.10),
    state!("MT", "montana", 44.36, 49.00, -116.05, -104.04),
    state!("NE", "nebraska", 40.00, 43.00, -104.05, -95.31),
    state!("NV", "nevada", 35.00, 42.00, -120.01, -114.04),
    state!("NH", "new hampshire", 42.70, 45.31, -72.56, -70.61),
    state!("NJ", "new jersey", 38.93, 41.36, -75.56, -73.89),
    state!("NM", "new mexico", 31.33, 37.00, -109.05, -103.00),
    state!("NY", "new york", 40.50, 45.02, -79.76, -71.86),
    state!("NC", "north carolina", 33.84, 36.59, -84.32, -75.46),
    state!("ND", "north dakota", 45.94, 49.00, -104.05, -96.55),
    state!("OH", "ohio", 38.40, 41.98, -84.82, -80.52),
    state!("OK", "oklahoma", 33.62, 37.00, -103.00, -94.43),
    state!("OR", "oregon", 41.99, 46.29, -124.57, -116.46),
    state!("PA", "pennsylvania", 39.72, 42.27, -80.52, -74.69),
    state!("RI", "rhode island", 41.15, 42.02, -71.86, -71.12),
    state!("SC", "south carolina", 32.03, 35.22, -83.35, -78.54),
    state!("SD", "south dakota", 42.48, 45.95, -104.06, -96.44),
    state!("TN", "tennessee", 34.98, 36.68, -90.31, -81.65),
    state!("TX", "texas", 25.84, 36.50, -106.65, -93.51),
    state!("UT", "utah", 37.00, 42.00, -114.05, -109.04),
    state!("VT", "vermont", 42.73, 45.02, -73.44, -71.46),
    state!("VA", "virginia", 36.54, 39.47, -83.68, -75.24),
    state!("WA", "washington", 45.54, 49.00, -124.85, -116.92),
    state!("WV", "west virginia", 37.20, 40.64, -82.64, -77.72),
    state!("WI", "wisconsin", 42.49, 47.31, -92.89, -86.25),
    state!("WY", "wyoming", 40.99, 45.01, -111.06, -104.05),
    state!("PR", "puerto rico", 17.88, 18.52, -67.95, -65.22),
];

/// Returns `true` if the point lies in any US box.
#[must_use]
pub fn within_us_bounds(latitude: f64, longitude: f64) -> bool {
    US_BOUNDS.iter().any(|b| b.contains(latitude, longitude))
}

/// Finds a state by two-letter code or full name, case-insensitively.
#[must_use]
pub fn lookup_state(state: &str) -> Option<&'static StateBounds> {
    let wanted = state.trim().trim_end_matches('.').to_lowercase();
    if wanted.is_empty() {
        return None;
    }
    STATE_BOUNDS.iter().find(|s| s.code.eq_ignore_ascii_case(&wanted) || s.name == wanted)
}

/// Checks the point against the claimed state.
///
/// Returns `None` when the state is not recognized, so callers apply no penalty.
#[must_use]
pub fn within_state_bounds(state: &str, latitude: f64, longitude: f64) -> Option<bool> {
    lookup_state(state).map(|s| {
        s.boxes
            .iter()
            .any(|b| b.contains_with_margin(latitude, longitude, STATE_MARGIN_DEGREES))
    })
}
