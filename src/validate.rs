//! Pure checks applied to scraped data before it may enter the store.
//!
//! Dates on the site are written in Hungarian (`2025. szeptember 15.`), text
//! occasionally arrives double-encoded, and coordinates are only meaningful
//! inside the Budapest bounding box.

use chrono::NaiveDate;
use thiserror::Error;
use url::Url;

use crate::models::{IssueRecord, StatusPolicy};

pub const MIN_LATITUDE: f64 = 47.35;
pub const MAX_LATITUDE: f64 = 47.65;
pub const MIN_LONGITUDE: f64 = 18.9;
pub const MAX_LONGITUDE: f64 = 19.4;

const HU_MONTHS: [(&str, u32); 12] = [
    ("január", 1),
    ("február", 2),
    ("március", 3),
    ("április", 4),
    ("május", 5),
    ("június", 6),
    ("július", 7),
    ("augusztus", 8),
    ("szeptember", 9),
    ("október", 10),
    ("november", 11),
    ("december", 12),
];

/// Substrings that only show up when UTF-8 text was decoded with the wrong codec.
const CORRUPTION_PATTERNS: [&str; 16] = [
    "Ă", "ĂĄ", "ĂŠ", "Ăş", "Ăł", "Ăź", "Ăś", "Ä±", "ĹŠ", "Ĺ", "mĂĄjus", "jĂşlius", "jĂşnius", "Ã",
    "â", "Å",
];

const MONTH_REPAIRS: [(&str, &str); 4] = [
    ("mÃĄjus", "május"),
    ("mĂĄjus", "május"),
    ("jĂşlius", "július"),
    ("jĂşnius", "június"),
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Invalid date '{input}': {reason}")]
    InvalidDate { input: String, reason: String },

    #[error("Encoding corruption in field '{field}' of {url}: pattern '{pattern}' found in '{value}'")]
    EncodingCorruption {
        url: String,
        field: String,
        pattern: String,
        value: String,
    },

    #[error("Invalid record key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Resolution date invariant violated for {url}: status '{status}', resolution date present: {has_resolution_date}")]
    ResolutionInvariant {
        url: String,
        status: String,
        has_resolution_date: bool,
    },

    #[error("Coordinates ({latitude}, {longitude}) of {url} are outside the supported region")]
    CoordinatesOutOfRegion {
        url: String,
        latitude: f64,
        longitude: f64,
    },

    #[error("Only one of latitude/longitude is set for {url}")]
    IncompleteCoordinates { url: String },
}

/// Undo the common latin-1/UTF-8 double encoding, falling back to known month fixes.
pub fn repair_double_encoding(text: &str) -> String {
    if text.contains('Ã') || text.contains('Å') || text.contains('â') {
        let bytes: Option<Vec<u8>> = text
            .chars()
            .map(|c| u8::try_from(u32::from(c)).ok())
            .collect();
        if let Some(bytes) = bytes {
            if let Ok(fixed) = String::from_utf8(bytes) {
                return fixed;
            }
        }
    }

    let mut repaired = text.to_string();
    for (corrupted, correct) in MONTH_REPAIRS {
        repaired = repaired.replace(corrupted, correct);
    }
    repaired
}

/// Parse `2025. szeptember 15.` (optionally followed by a time) into a date.
pub fn normalize_hungarian_date(input: &str) -> Result<NaiveDate, ValidationError> {
    let repaired = repair_double_encoding(input);
    let parts: Vec<&str> = repaired.trim_matches(|c: char| c == '.' || c.is_whitespace()).split_whitespace().collect();
    normalize_date_parts(&parts).map_err(|reason| ValidationError::InvalidDate {
        input: input.to_string(),
        reason,
    })
}

fn normalize_date_parts(parts: &[&str]) -> Result<NaiveDate, String> {
    if parts.len() < 3 {
        return Err(format!("expected 3 parts, got {}", parts.len()));
    }

    let year: i32 = parts[0]
        .trim_matches('.')
        .parse()
        .map_err(|_| format!("bad year '{}'", parts[0]))?;

    let month_name = repair_double_encoding(parts[1]).to_lowercase();
    let month = HU_MONTHS
        .iter()
        .find(|(name, _)| *name == month_name)
        .map(|(_, m)| *m)
        .ok_or_else(|| format!("unknown Hungarian month '{month_name}'"))?;

    let day: u32 = parts[2]
        .trim_matches('.')
        .parse()
        .map_err(|_| format!("bad day '{}'", parts[2]))?;

    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| format!("{year}-{month:02}-{day:02} is not a calendar date"))
}

/// First corruption pattern contained in `text`, if any.
pub fn detect_encoding_corruption(text: &str) -> Option<&'static str> {
    CORRUPTION_PATTERNS.iter().copied().find(|p| text.contains(p))
}

pub fn is_within_region(latitude: f64, longitude: f64) -> bool {
    (MIN_LATITUDE..=MAX_LATITUDE).contains(&latitude)
        && (MIN_LONGITUDE..=MAX_LONGITUDE).contains(&longitude)
}

/// Reject every text field carrying a corruption marker.
pub fn check_encoding(record: &IssueRecord) -> Result<(), ValidationError> {
    for (field, value) in record.text_fields() {
        if let Some(pattern) = detect_encoding_corruption(value) {
            return Err(ValidationError::EncodingCorruption {
                url: record.url.clone(),
                field: field.to_string(),
                pattern: pattern.to_string(),
                value: value.to_string(),
            });
        }
    }
    Ok(())
}

/// Full check applied at the store boundary.
pub fn validate_record(record: &IssueRecord, policy: &StatusPolicy) -> Result<(), ValidationError> {
    let key = Url::parse(&record.url).map_err(|e| ValidationError::InvalidKey {
        key: record.url.clone(),
        reason: e.to_string(),
    })?;
    if key.scheme() != "http" && key.scheme() != "https" {
        return Err(ValidationError::InvalidKey {
            key: record.url.clone(),
            reason: format!("unsupported scheme '{}'", key.scheme()),
        });
    }

    check_encoding(record)?;

    let resolved = policy.is_resolved(&record.status);
    if resolved != record.resolution_date.is_some() {
        return Err(ValidationError::ResolutionInvariant {
            url: record.url.clone(),
            status: record.status.clone(),
            has_resolution_date: record.resolution_date.is_some(),
        });
    }

    match (record.latitude, record.longitude) {
        (None, None) => {}
        (Some(latitude), Some(longitude)) => {
            if !is_within_region(latitude, longitude) {
                return Err(ValidationError::CoordinatesOutOfRegion {
                    url: record.url.clone(),
                    latitude,
                    longitude,
                });
            }
        }
        _ => {
            return Err(ValidationError::IncompleteCoordinates {
                url: record.url.clone(),
            });
        }
    }

    Ok(())
}
