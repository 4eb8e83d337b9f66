use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use itemflow_core::EnrichmentParams;

use crate::error::ProviderError;
use crate::outcome::CallOutcome;

/// A named attribute of a catalog item (e.g. `BRAND = "Acme"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub id: String,
    pub value: String,
}

impl Attribute {
    pub fn new(id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            value: value.into(),
        }
    }
}

/// Content fetched for one target identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceContent {
    pub target_id: String,
    /// Plain-text description as published by the source.
    pub text: String,
    pub attributes: Vec<Attribute>,
}

impl SourceContent {
    pub fn new(target_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            text: text.into(),
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, id: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push(Attribute::new(id, value));
        self
    }

    /// First attribute value whose id is one of `ids`.
    pub fn attribute(&self, ids: &[&str]) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| ids.contains(&a.id.as_str()))
            .map(|a| a.value.as_str())
    }
}

/// "Fetch description for ID".
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch_content(&self, target_id: &str) -> CallOutcome<SourceContent>;
}

/// "Enrich text with model M".
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich_content(
        &self,
        content: &SourceContent,
        params: &EnrichmentParams,
    ) -> CallOutcome<String>;
}

/// Lists the language models that can be requested for enrichment.
#[async_trait]
pub trait ModelCatalog: Send + Sync {
    async fn list_models(&self) -> Result<Vec<String>, ProviderError>;

    /// Fail with `UnknownModel` unless `model` is listed.
    async fn ensure_model(&self, model: &str) -> Result<(), ProviderError> {
        let available = self.list_models().await?;
        if model_is_available(model, &available) {
            Ok(())
        } else {
            Err(ProviderError::UnknownModel {
                model: model.to_string(),
                available,
            })
        }
    }
}

/// Catalogs may list models either bare (`gemini-2.0-flash`) or with the
/// `models/` prefix; both spellings of the requested name are accepted.
pub fn model_is_available(model: &str, available: &[String]) -> bool {
    let prefixed = if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    };

    available.iter().any(|m| m == model || *m == prefixed)
}

/// Builds collaborator capabilities.
///
/// Construction failures (missing credentials, unreachable endpoints) are
/// reported here, before any per-target call is made.
pub trait ProviderFactory: Send + Sync {
    fn content_source(&self) -> Result<Arc<dyn ContentSource>, ProviderError>;

    fn enricher(&self, model: &str) -> Result<Arc<dyn Enricher>, ProviderError>;

    fn model_catalog(&self) -> Result<Arc<dyn ModelCatalog>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_lookup_accepts_both_spellings() {
        let available = vec!["models/gemini-2.0-flash".to_string(), "local-7b".to_string()];

        assert!(model_is_available("gemini-2.0-flash", &available));
        assert!(model_is_available("models/gemini-2.0-flash", &available));
        assert!(model_is_available("local-7b", &available));
        assert!(!model_is_available("gpt-x", &available));
    }

    #[test]
    fn attribute_lookup_takes_first_match() {
        let content = SourceContent::new("MLA1", "text")
            .with_attribute("MAIN_COLOR", "red")
            .with_attribute("COLOR", "blue");

        assert_eq!(content.attribute(&["COLOR", "MAIN_COLOR"]), Some("red"));
        assert_eq!(content.attribute(&["BRAND"]), None);
    }
}
