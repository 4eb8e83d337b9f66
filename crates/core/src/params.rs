//! Validated submission values: job kind, target identifiers, kind-specific parameters.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Kind of work a job performs for each of its targets.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Fetch the source description of each target.
    Extraction,
    /// Fetch the source description, then rewrite it with a language model.
    Enrichment,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Extraction => "extraction",
            JobKind::Enrichment => "enrichment",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "extraction" | "extract" => Ok(JobKind::Extraction),
            "enrichment" | "enrich" => Ok(JobKind::Enrichment),
            other => Err(DomainError::validation(format!(
                "unknown job kind '{other}' (expected: extraction, enrichment)"
            ))),
        }
    }
}

/// Non-empty, ordered sequence of external identifiers.
///
/// Entries are trimmed; blank entries are rejected. Duplicates are kept as
/// submitted (each one becomes its own task).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct TargetIds(Vec<String>);

impl TargetIds {
    pub fn new<I, S>(ids: I) -> DomainResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out = Vec::new();
        for (idx, id) in ids.into_iter().enumerate() {
            let id = id.into();
            let trimmed = id.trim();
            if trimmed.is_empty() {
                return Err(DomainError::validation(format!(
                    "target id at index {idx} is blank"
                )));
            }
            out.push(trimmed.to_string());
        }

        if out.is_empty() {
            return Err(DomainError::validation("at least one target id is required"));
        }

        Ok(Self(out))
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false: construction rejects empty input.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl TryFrom<Vec<String>> for TargetIds {
    type Error = DomainError;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TargetIds> for Vec<String> {
    fn from(value: TargetIds) -> Self {
        value.0
    }
}

/// Parameters of an enrichment job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentParams {
    /// Desired tone of the rewritten description.
    pub tone: String,
    /// Upper bound on the length of the rewritten description, in words.
    pub max_words: u32,
    /// Language model identifier.
    pub model: String,
}

impl EnrichmentParams {
    pub const DEFAULT_TONE: &'static str = "helpful";
    pub const DEFAULT_MAX_WORDS: u32 = 60;
    pub const MIN_WORDS: u32 = 20;
    pub const MAX_WORDS: u32 = 120;

    pub fn new(
        tone: Option<String>,
        max_words: Option<u32>,
        model: impl Into<String>,
    ) -> DomainResult<Self> {
        let tone = tone
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| Self::DEFAULT_TONE.to_string());

        let max_words = max_words.unwrap_or(Self::DEFAULT_MAX_WORDS);
        if !(Self::MIN_WORDS..=Self::MAX_WORDS).contains(&max_words) {
            return Err(DomainError::validation(format!(
                "max_words must be between {} and {} (got {max_words})",
                Self::MIN_WORDS,
                Self::MAX_WORDS
            )));
        }

        let model = model.into().trim().to_string();
        if model.is_empty() {
            return Err(DomainError::validation("model is required"));
        }

        Ok(Self {
            tone,
            max_words,
            model,
        })
    }
}

/// Kind-specific job parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobParams {
    Extraction,
    Enrichment(EnrichmentParams),
}

impl JobParams {
    pub fn kind(&self) -> JobKind {
        match self {
            JobParams::Extraction => JobKind::Extraction,
            JobParams::Enrichment(_) => JobKind::Enrichment,
        }
    }

    pub fn enrichment(&self) -> Option<&EnrichmentParams> {
        match self {
            JobParams::Enrichment(p) => Some(p),
            JobParams::Extraction => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_ids_trim_and_keep_order() {
        let ids = TargetIds::new([" MLA1 ", "MLA2", "MLA1"]).unwrap();
        assert_eq!(ids.as_slice(), &["MLA1", "MLA2", "MLA1"]);
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn empty_target_ids_are_rejected() {
        let err = TargetIds::new(Vec::<String>::new()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn blank_target_id_is_rejected() {
        let err = TargetIds::new(["MLA1", "   "]).unwrap_err();
        assert_eq!(
            err,
            DomainError::validation("target id at index 1 is blank")
        );
    }

    #[test]
    fn target_ids_deserialize_through_validation() {
        let ok: TargetIds = serde_json::from_str(r#"["A","B"]"#).unwrap();
        assert_eq!(ok.len(), 2);

        let bad = serde_json::from_str::<TargetIds>("[]");
        assert!(bad.is_err());
    }

    #[test]
    fn enrichment_params_apply_defaults() {
        let p = EnrichmentParams::new(None, None, "gemini-2.0-flash").unwrap();
        assert_eq!(p.tone, "helpful");
        assert_eq!(p.max_words, 60);
        assert_eq!(p.model, "gemini-2.0-flash");
    }

    #[test]
    fn enrichment_params_reject_out_of_range_words() {
        assert!(EnrichmentParams::new(None, Some(19), "m").is_err());
        assert!(EnrichmentParams::new(None, Some(121), "m").is_err());
        assert!(EnrichmentParams::new(None, Some(20), "m").is_ok());
        assert!(EnrichmentParams::new(None, Some(120), "m").is_ok());
    }

    #[test]
    fn enrichment_params_require_model() {
        assert!(EnrichmentParams::new(Some("formal".into()), None, "  ").is_err());
    }

    #[test]
    fn job_kind_parses_aliases() {
        assert_eq!("extract".parse::<JobKind>().unwrap(), JobKind::Extraction);
        assert_eq!("Enrichment".parse::<JobKind>().unwrap(), JobKind::Enrichment);
        assert!("other".parse::<JobKind>().is_err());
    }

    #[test]
    fn params_report_their_kind() {
        let p = JobParams::Enrichment(EnrichmentParams::new(None, None, "m").unwrap());
        assert_eq!(p.kind(), JobKind::Enrichment);
        assert!(p.enrichment().is_some());
        assert_eq!(JobParams::Extraction.kind(), JobKind::Extraction);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 128,
                ..ProptestConfig::default()
            })]

            /// Property: every accepted id list keeps its length and order.
            #[test]
            fn accepted_ids_keep_length_and_order(
                ids in prop::collection::vec("[A-Z]{3}[0-9]{1,10}", 1..20)
            ) {
                let target_ids = TargetIds::new(ids.clone()).unwrap();
                prop_assert_eq!(target_ids.as_slice(), ids.as_slice());
            }
        }
    }
}
