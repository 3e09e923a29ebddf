use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

use crate::config::Config;

/// One reported civic issue as persisted in a monthly partition.
///
/// Field names follow the historical dataset so that partitions written by
/// earlier tooling still load. `url` is the unique, immutable key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IssueRecord {
    pub url: String,

    #[serde(default, deserialize_with = "nullable_text")]
    pub title: String,

    /// Reporter display name (anonymous reports carry a placeholder or nothing).
    #[serde(default, rename = "author")]
    pub reporter_name: Option<String>,

    #[serde(default, rename = "author_profile")]
    pub reporter_profile_url: Option<String>,

    /// Report date; decides the monthly partition.
    pub date: NaiveDate,

    #[serde(default)]
    pub category: Option<String>,

    #[serde(default, rename = "institution")]
    pub responsible_institution: Option<String>,

    #[serde(default)]
    pub supporter: Option<String>,

    #[serde(default, deserialize_with = "nullable_text")]
    pub description: String,

    /// Site-defined status label, treated as opaque apart from the resolved check.
    #[serde(default, deserialize_with = "nullable_text")]
    pub status: String,

    #[serde(default)]
    pub address: Option<String>,

    #[serde(default)]
    pub images: Vec<String>,

    /// Present iff `status` is a resolved label.
    #[serde(default)]
    pub resolution_date: Option<NaiveDate>,

    #[serde(default)]
    pub first_authority_response_date: Option<NaiveDate>,

    #[serde(default, deserialize_with = "coordinate")]
    pub latitude: Option<f64>,

    #[serde(default, deserialize_with = "coordinate")]
    pub longitude: Option<f64>,
}

impl IssueRecord {
    /// Minimal record with every optional field empty.
    pub fn new(url: impl Into<String>, date: NaiveDate, status: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: String::new(),
            reporter_name: None,
            reporter_profile_url: None,
            date,
            category: None,
            responsible_institution: None,
            supporter: None,
            description: String::new(),
            status: status.into(),
            address: None,
            images: Vec::new(),
            resolution_date: None,
            first_authority_response_date: None,
            latitude: None,
            longitude: None,
        }
    }

    pub fn with_resolution_date(mut self, date: NaiveDate) -> Self {
        self.resolution_date = Some(date);
        self
    }

    /// All free-text fields with their on-disk names, for corruption checks.
    pub fn text_fields(&self) -> Vec<(&'static str, &str)> {
        let mut fields = vec![
            ("title", self.title.as_str()),
            ("description", self.description.as_str()),
            ("status", self.status.as_str()),
        ];
        let optional = [
            ("author", &self.reporter_name),
            ("category", &self.category),
            ("institution", &self.responsible_institution),
            ("supporter", &self.supporter),
            ("address", &self.address),
        ];
        for (name, value) in optional {
            if let Some(v) = value {
                fields.push((name, v.as_str()));
            }
        }
        fields
    }
}

/// Legacy rows store `null` for missing text.
fn nullable_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Legacy rows store coordinates as strings; newer rows as numbers.
fn coordinate<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(v)) => Ok(Some(v)),
        Some(Raw::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Raw::Text(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// One card on a listing page: the issue key and the status badge shown there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingItem {
    pub url: String,
    /// `None` when the card had no readable status badge.
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingPage {
    pub items: Vec<ListingItem>,
    /// Absolute URL of the "next page" link, if the listing shows one.
    pub next_page: Option<String>,
}

/// Which status labels count as resolved (and as closed, for pending scans).
///
/// Labels compare case-insensitively after trimming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPolicy {
    resolved: Vec<String>,
    closed: Vec<String>,
}

impl Default for StatusPolicy {
    fn default() -> Self {
        Self {
            resolved: Config::RESOLVED_LABELS.iter().map(|s| fold(s)).collect(),
            closed: Config::CLOSED_LABELS.iter().map(|s| fold(s)).collect(),
        }
    }
}

impl StatusPolicy {
    pub fn new<I, S>(resolved: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let resolved: Vec<String> = resolved.into_iter().map(|s| fold(s.as_ref())).collect();
        let mut closed: Vec<String> = Config::CLOSED_LABELS.iter().map(|s| fold(s)).collect();
        for label in &resolved {
            if !closed.contains(label) {
                closed.push(label.clone());
            }
        }
        Self { resolved, closed }
    }

    pub fn with_closed_labels<I, S>(mut self, closed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.closed = closed.into_iter().map(|s| fold(s.as_ref())).collect();
        self
    }

    pub fn is_resolved(&self, status: &str) -> bool {
        let folded = fold(status);
        self.resolved.iter().any(|l| *l == folded)
    }

    pub fn is_closed(&self, status: &str) -> bool {
        let folded = fold(status);
        self.closed.iter().any(|l| *l == folded)
    }

    /// True when exactly one of the two labels is resolved.
    pub fn crosses_resolved_boundary(&self, old: &str, new: &str) -> bool {
        self.is_resolved(old) != self.is_resolved(new)
    }

    pub fn same_label(a: &str, b: &str) -> bool {
        fold(a) == fold(b)
    }
}

fn fold(label: &str) -> String {
    label.trim().to_lowercase()
}
