//! In-process collaborators.
//!
//! Used in tests and for local runs with `USE_MOCK_PROVIDERS`; per-target
//! outcomes can be scripted to exercise retry and failure paths.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use itemflow_core::EnrichmentParams;

use crate::capability::{ContentSource, Enricher, ModelCatalog, ProviderFactory, SourceContent};
use crate::error::ProviderError;
use crate::outcome::CallOutcome;
use crate::prompt::build_prompt;

#[derive(Debug, Default)]
struct SourceState {
    items: HashMap<String, SourceContent>,
    scripted: HashMap<String, VecDeque<CallOutcome<SourceContent>>>,
    calls: Vec<String>,
}

/// Content source backed by a map of known items.
///
/// Scripted outcomes for an id are consumed first, in order; after that the
/// id is served from the item map.
#[derive(Debug, Default)]
pub struct MockContentSource {
    state: Mutex<SourceState>,
    synthesize_missing: bool,
    latency: Option<Duration>,
}

impl MockContentSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unknown ids get a generated description instead of a fatal "not found".
    pub fn synthesizing() -> Self {
        Self {
            synthesize_missing: true,
            ..Self::default()
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_item(self, content: SourceContent) -> Self {
        self.insert(content);
        self
    }

    pub fn insert(&self, content: SourceContent) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.items.insert(content.target_id.clone(), content);
    }

    pub fn script(&self, target_id: &str, outcome: CallOutcome<SourceContent>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .scripted
            .entry(target_id.to_string())
            .or_default()
            .push_back(outcome);
    }

    /// Script a raw collaborator error; classified like a real one would be.
    pub fn script_error(&self, target_id: &str, message: &str) {
        self.script(target_id, CallOutcome::from_error_message(message));
    }

    /// Number of fetches made for `target_id` so far.
    pub fn calls_for(&self, target_id: &str) -> usize {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.calls.iter().filter(|c| *c == target_id).count()
    }

    pub fn total_calls(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.calls.len()
    }

    fn next_outcome(&self, target_id: &str) -> CallOutcome<SourceContent> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.calls.push(target_id.to_string());

        if let Some(outcome) = state
            .scripted
            .get_mut(target_id)
            .and_then(VecDeque::pop_front)
        {
            return outcome;
        }

        match state.items.get(target_id) {
            Some(content) => CallOutcome::Success(content.clone()),
            None if self.synthesize_missing => CallOutcome::Success(synthesized(target_id)),
            None => CallOutcome::fatal(format!("item {target_id} not found")),
        }
    }
}

fn synthesized(target_id: &str) -> SourceContent {
    SourceContent::new(
        target_id,
        format!("Producto {target_id}. Descripción de ejemplo generada localmente."),
    )
    .with_attribute("BRAND", "Generic")
}

#[async_trait]
impl ContentSource for MockContentSource {
    async fn fetch_content(&self, target_id: &str) -> CallOutcome<SourceContent> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let outcome = self.next_outcome(target_id);
        debug!(target_id, success = outcome.is_success(), "mock content fetched");
        outcome
    }
}

#[derive(Debug, Default)]
struct EnricherState {
    scripted: HashMap<String, VecDeque<CallOutcome<String>>>,
    prompts: Vec<String>,
}

/// Deterministic enricher: prefixes the tone and truncates to `max_words`.
#[derive(Debug, Default)]
pub struct MockEnricher {
    state: Mutex<EnricherState>,
}

impl MockEnricher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, target_id: &str, outcome: CallOutcome<String>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .scripted
            .entry(target_id.to_string())
            .or_default()
            .push_back(outcome);
    }

    pub fn script_error(&self, target_id: &str, message: &str) {
        self.script(target_id, CallOutcome::from_error_message(message));
    }

    /// Prompts built so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.prompts.clone()
    }
}

#[async_trait]
impl Enricher for MockEnricher {
    async fn enrich_content(
        &self,
        content: &SourceContent,
        params: &EnrichmentParams,
    ) -> CallOutcome<String> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.prompts.push(build_prompt(content, params));

        if let Some(outcome) = state
            .scripted
            .get_mut(&content.target_id)
            .and_then(VecDeque::pop_front)
        {
            return outcome;
        }

        let body: Vec<&str> = content
            .text
            .split_whitespace()
            .take(params.max_words as usize)
            .collect();
        CallOutcome::Success(format!("[{}] {}", params.tone, body.join(" ")))
    }
}

/// Fixed list of models.
#[derive(Debug, Clone, Default)]
pub struct StaticModelCatalog(pub Vec<String>);

impl StaticModelCatalog {
    pub fn new<I, S>(models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(models.into_iter().map(Into::into).collect())
    }
}

#[async_trait]
impl ModelCatalog for StaticModelCatalog {
    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        Ok(self.0.clone())
    }
}

/// Factory handing out shared mock capabilities.
///
/// When an enricher credential is required but absent, `enricher()` fails the
/// same way a real client would.
#[derive(Clone)]
pub struct MockProviders {
    pub source: Arc<MockContentSource>,
    pub enricher: Arc<MockEnricher>,
    pub catalog: Arc<StaticModelCatalog>,
    enricher_credential: Option<Option<String>>,
}

impl MockProviders {
    pub fn new(source: MockContentSource, models: StaticModelCatalog) -> Self {
        Self {
            source: Arc::new(source),
            enricher: Arc::new(MockEnricher::new()),
            catalog: Arc::new(models),
            enricher_credential: None,
        }
    }

    /// Require an enricher credential; `None` makes `enricher()` fail.
    pub fn requiring_credential(mut self, credential: Option<String>) -> Self {
        self.enricher_credential = Some(credential);
        self
    }
}

impl ProviderFactory for MockProviders {
    fn content_source(&self) -> Result<Arc<dyn ContentSource>, ProviderError> {
        Ok(self.source.clone())
    }

    fn enricher(&self, _model: &str) -> Result<Arc<dyn Enricher>, ProviderError> {
        match &self.enricher_credential {
            Some(None) => Err(ProviderError::MissingCredential(
                "GEMINI_API_KEY not configured".to_string(),
            )),
            Some(Some(key)) if key.trim().is_empty() => Err(ProviderError::MissingCredential(
                "GEMINI_API_KEY not configured".to_string(),
            )),
            _ => Ok(self.enricher.clone()),
        }
    }

    fn model_catalog(&self) -> Result<Arc<dyn ModelCatalog>, ProviderError> {
        Ok(self.catalog.clone())
    }
}
