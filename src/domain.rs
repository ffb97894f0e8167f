use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

static ACCESSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+(\.[0-9]+)?$").unwrap());

/// `quality` is the sum of the per-base Phred values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRecord {
    pub header: String,
    pub sequence: String,
    pub quality: u64,
}

impl ReadRecord {
    pub fn new(header: impl Into<String>, sequence: impl Into<String>, quality: u64) -> Self {
        Self {
            header: header.into(),
            sequence: sequence.into(),
            quality,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Accession(String);

impl Accession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Accession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Accession {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        if !ACCESSION_RE.is_match(normalized) {
            return Err(KiraError::InvalidAccession(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawHit {
    pub accession: String,
    pub description: String,
    pub score: f64,
    pub query_span: u32,
    pub query_end: u32,
    pub identity_count: u32,
    pub hit_span: u32,
    pub positive_count: u32,
    pub evalue: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HitMetrics {
    pub score: f64,
    pub query_cover: f64,
    pub identity: f64,
    pub positives: f64,
    pub evalue: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProteinAnnotation {
    pub protein_name: String,
    pub comment: String,
    pub organism: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedHit {
    pub accession: Accession,
    pub annotation: ProteinAnnotation,
    pub metrics: HitMetrics,
}

pub trait PairingRule: Send + Sync {
    fn mate_of(&self, header: &str) -> Option<String>;
}

/// `NAME/1` pairs with `NAME/2`; anything not ending in `1` or `2` is unpaired.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrailingDigitPairing;

impl PairingRule for TrailingDigitPairing {
    fn mate_of(&self, header: &str) -> Option<String> {
        let prefix = header
            .strip_suffix('1')
            .map(|prefix| (prefix, '2'))
            .or_else(|| header.strip_suffix('2').map(|prefix| (prefix, '1')));
        prefix.map(|(prefix, marker)| format!("{prefix}{marker}"))
    }
}

/// Protein display name: description text before the first `[`, trimmed.
pub fn protein_name_from_description(description: &str) -> String {
    description
        .split('[')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_accession_valid() {
        let acc: Accession = " WP_012345678.1 ".parse().unwrap();
        assert_eq!(acc.as_str(), "WP_012345678.1");
        let acc: Accession = "AAB18559".parse().unwrap();
        assert_eq!(acc.as_str(), "AAB18559");
    }

    #[test]
    fn parse_accession_invalid() {
        let err = "gi|123|ref".parse::<Accession>().unwrap_err();
        assert_matches!(err, KiraError::InvalidAccession(_));
        let err = "".parse::<Accession>().unwrap_err();
        assert_matches!(err, KiraError::InvalidAccession(_));
    }

    #[test]
    fn trailing_digit_pairing() {
        let rule = TrailingDigitPairing;
        assert_eq!(rule.mate_of("SEQ001/1").as_deref(), Some("SEQ001/2"));
        assert_eq!(rule.mate_of("SEQ001/2").as_deref(), Some("SEQ001/1"));
        assert_eq!(rule.mate_of("SEQ001/3"), None);
        assert_eq!(rule.mate_of("READ_A"), None);
        assert_eq!(rule.mate_of(""), None);
    }

    #[test]
    fn protein_name_stops_at_bracket() {
        assert_eq!(
            protein_name_from_description("hypothetical protein [Escherichia coli]"),
            "hypothetical protein"
        );
        assert_eq!(protein_name_from_description("  lysozyme  "), "lysozyme");
        assert_eq!(protein_name_from_description("[only organism]"), "");
    }
}
