//! Pattern sets for synthetic and placeholder data.
//!
//! Matching happens on [`normalize_address`] output so punctuation, case and street-suffix
//! spelling do not matter.

use crate::{
    geocoding::normalize_address,
    types::{is_blank, non_blank, LocationCandidate, PostalAddress},
};

/// Whole words that mark a name or street as test data.
pub const TEST_DATA_WORDS: &[&str] =
    &["test", "testing", "example", "sample", "dummy", "fake", "lorem", "ipsum", "asdf"];

/// Phrases that mark a name or street as test data.
pub const TEST_DATA_PHRASES: &[&str] = &["placeholder location"];

/// Postal codes that only appear in made-up records.
pub const TEST_POSTAL_CODES: &[&str] = &["00000", "12345", "99999", "11111"];

/// Streets that carry no location information.
pub const PLACEHOLDER_STREETS: &[&str] = &[
    "123 main st",
    "address",
    "street address",
    "n/a",
    "na",
    "none",
    "tbd",
    "unknown",
    "not available",
    "see website",
    "po box 0",
];

/// Words that make any street a placeholder.
pub const PLACEHOLDER_STREET_WORDS: &[&str] = &["anytown", "anywhere"];

pub const PLACEHOLDER_CITIES: &[&str] = &["anytown", "city", "unknown"];

/// Returns `true` if the location name, any street or any postal code matches the test-data
/// patterns.
#[must_use]
pub fn is_test_data(location: &LocationCandidate) -> bool {
    let name_matches = non_blank(location.name.as_deref()).is_some_and(text_looks_synthetic);

    name_matches ||
        location.addresses.iter().any(|address| {
            non_blank(address.address_1.as_deref()).is_some_and(text_looks_synthetic) ||
                non_blank(address.postal_code.as_deref())
                    .is_some_and(|postal| TEST_POSTAL_CODES.contains(&postal))
        })
}

fn text_looks_synthetic(text: &str) -> bool {
    let normalized = normalize_address(text);
    normalized.split(' ').any(|word| TEST_DATA_WORDS.contains(&word)) ||
        TEST_DATA_PHRASES.iter().any(|phrase| contains_phrase(&normalized, phrase))
}

/// Returns `true` if the address is present but its street or city is a placeholder.
#[must_use]
pub fn is_placeholder_address(address: &PostalAddress) -> bool {
    if address.is_empty() {
        return false;
    }
    if is_blank(address.address_1.as_deref()) {
        return true;
    }

    let street = normalize_address(address.address_1.as_deref().unwrap_or_default());
    let street_matches = PLACEHOLDER_STREETS.iter().any(|p| normalize_address(p) == street) ||
        street.split(' ').any(|word| PLACEHOLDER_STREET_WORDS.contains(&word));

    let city_matches = non_blank(address.city.as_deref())
        .map(normalize_address)
        .is_some_and(|city| PLACEHOLDER_CITIES.contains(&city.as_str()));

    street_matches || city_matches
}

fn contains_phrase(normalized: &str, phrase: &str) -> bool {
    let padded = format!(" {normalized} ");
    padded.contains(&format!(" {phrase} "))
}
