//! Live collaborators over HTTP (MercadoLibre item descriptions, Gemini).

pub mod gemini;
pub mod mercadolibre;

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{Response, StatusCode, Url};

use crate::capability::{ContentSource, Enricher, ModelCatalog, ProviderFactory};
use crate::error::ProviderError;
use crate::mock::StaticModelCatalog;
use crate::outcome::CallOutcome;
use crate::prompt::{is_rate_limit_message, parse_retry_after};

pub use gemini::{GeminiClient, GeminiEnricher};
pub use mercadolibre::{MeliClient, MeliCredentials};

pub const MELI_BASE_URL: &str = "https://api.mercadolibre.com";
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Connection settings for the live collaborators.
#[derive(Debug, Clone)]
pub struct HttpProvidersConfig {
    pub meli_base_url: String,
    pub meli: MeliCredentials,
    pub gemini_base_url: String,
    pub gemini_api_key: Option<String>,
    /// Served as the model catalog while no Gemini key is configured.
    pub fallback_models: Vec<String>,
    pub request_timeout: Duration,
}

impl Default for HttpProvidersConfig {
    fn default() -> Self {
        Self {
            meli_base_url: MELI_BASE_URL.to_string(),
            meli: MeliCredentials::default(),
            gemini_base_url: GEMINI_BASE_URL.to_string(),
            gemini_api_key: None,
            fallback_models: Vec::new(),
            request_timeout: Duration::from_secs(20),
        }
    }
}

/// Factory for the reqwest-backed collaborators.
///
/// One HTTP client is shared by every capability; the MercadoLibre client is
/// shared too so a refreshed access token outlives the job that refreshed it.
pub struct HttpProviders {
    meli: Option<Arc<MeliClient>>,
    gemini: Option<Arc<GeminiClient>>,
    fallback_models: Vec<String>,
}

impl HttpProviders {
    pub fn new(config: HttpProvidersConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        let meli = config
            .meli
            .access_token
            .is_some()
            .then(|| MeliClient::new(http.clone(), &config.meli_base_url, config.meli.clone()))
            .transpose()?
            .map(Arc::new);

        let gemini = config
            .gemini_api_key
            .filter(|key| !key.trim().is_empty())
            .map(|key| GeminiClient::new(http, &config.gemini_base_url, key))
            .transpose()?
            .map(Arc::new);

        Ok(Self {
            meli,
            gemini,
            fallback_models: config.fallback_models,
        })
    }
}

impl ProviderFactory for HttpProviders {
    fn content_source(&self) -> Result<Arc<dyn ContentSource>, ProviderError> {
        match &self.meli {
            Some(meli) => Ok(meli.clone()),
            None => Err(ProviderError::MissingCredential(
                "MELI_ACCESS_TOKEN not configured".to_string(),
            )),
        }
    }

    fn enricher(&self, model: &str) -> Result<Arc<dyn Enricher>, ProviderError> {
        match &self.gemini {
            Some(gemini) => Ok(Arc::new(GeminiEnricher::new(gemini.clone(), model))),
            None => Err(ProviderError::MissingCredential(
                "GEMINI_API_KEY not configured".to_string(),
            )),
        }
    }

    fn model_catalog(&self) -> Result<Arc<dyn ModelCatalog>, ProviderError> {
        match &self.gemini {
            Some(gemini) => Ok(gemini.clone()),
            None => Ok(Arc::new(StaticModelCatalog::new(self.fallback_models.clone()))),
        }
    }
}

/// `base` with `segments` appended as escaped path segments.
pub(crate) fn endpoint(base: &str, segments: &[&str]) -> Result<Url, ProviderError> {
    let mut url = Url::parse(base)
        .map_err(|e| ProviderError::Unavailable(format!("invalid base URL '{base}': {e}")))?;
    url.path_segments_mut()
        .map_err(|_| ProviderError::Unavailable(format!("base URL '{base}' cannot take a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// `Retry-After` given in whole seconds.
pub(crate) fn retry_after_header(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Outcome for a non-success response.
///
/// 429s and quota messages are throttling; the wait comes from the
/// `Retry-After` header, else from a hint in the message.
pub(crate) fn classify_failure<T>(
    service: &str,
    status: StatusCode,
    retry_after: Option<Duration>,
    message: &str,
) -> CallOutcome<T> {
    let text = format!("{service} failed {}: {}", status.as_u16(), message.trim());
    if status == StatusCode::TOO_MANY_REQUESTS || is_rate_limit_message(message) {
        let retry_after = retry_after.or_else(|| parse_retry_after(message));
        CallOutcome::rate_limited(retry_after, text)
    } else {
        CallOutcome::fatal(text)
    }
}
