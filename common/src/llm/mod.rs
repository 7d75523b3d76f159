pub mod gateway;
pub mod judge;
pub mod prompts;
pub mod usage;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::types::chunk::QaPair;

/// Output of per-chunk enrichment: a summary, synthetic Q&A pairs, and the
/// entities mentioned.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ChunkEnrichment {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub generated_qas: Vec<QaPair>,
    #[serde(default)]
    pub entities: Vec<String>,
}

/// An extracted atomic triple, before it has been admitted to the fact store.
#[derive(Debug, Clone, PartialEq)]
pub struct FactCandidate {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub confidence: f32,
    pub valid_from: Option<DateTime<Utc>>,
    pub location: Option<String>,
}

impl FactCandidate {
    pub fn triple_text(&self) -> String {
        format!("{} {} {}", self.subject, self.predicate, self.object)
    }
}

/// Parses extraction-produced timestamps: full RFC 3339 or a bare date.
pub fn parse_valid_from(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }

    if let Ok(date) = trimmed.parse::<NaiveDate>() {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_from_variants() {
        let full = parse_valid_from("2023-05-07T12:00:00Z").unwrap();
        assert_eq!(full.to_rfc3339(), "2023-05-07T12:00:00+00:00");

        let date_only = parse_valid_from("2023-05-07").unwrap();
        assert_eq!(date_only.format("%Y-%m-%d %H:%M").to_string(), "2023-05-07 00:00");

        assert!(parse_valid_from("").is_none());
        assert!(parse_valid_from("yesterday").is_none());
    }
}
