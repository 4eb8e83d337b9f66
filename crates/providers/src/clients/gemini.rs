use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error};

use itemflow_core::EnrichmentParams;

use crate::capability::{Enricher, ModelCatalog, SourceContent};
use crate::error::ProviderError;
use crate::outcome::CallOutcome;
use crate::prompt::build_prompt;

use super::{classify_failure, endpoint, retry_after_header};

const API_VERSION: &str = "v1beta";
const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Default, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateResponse {
    /// Text parts of every candidate, space-joined.
    fn text(self) -> String {
        let parts: Vec<String> = self
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.text)
            .collect();
        parts.join(" ").trim().to_string()
    }
}

#[derive(Debug, Deserialize)]
struct ModelsPage {
    #[serde(default)]
    models: Vec<ModelEntry>,
    #[serde(default, rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    name: String,
}

/// Error body: `{"error": {"message", "status", "details": [{"retryDelay"}]}}`.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    details: Vec<serde_json::Value>,
}

/// Readable message and `RetryInfo.retryDelay` from an error body; falls
/// back to the raw body when it is not the documented shape.
fn error_detail(body: &str) -> (String, Option<Duration>) {
    let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) else {
        return (body.to_string(), None);
    };
    let ErrorBody {
        message,
        status,
        details,
    } = envelope.error;

    let retry_delay = details
        .iter()
        .filter_map(|d| d.get("retryDelay")?.as_str())
        .find_map(|delay| {
            let secs: f64 = delay.trim_end_matches('s').parse().ok()?;
            (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
        });

    let message = match status {
        Some(status) => format!("{status}: {message}"),
        None => message,
    };
    (message, retry_delay)
}

/// Gemini REST client (`generateContent`, `models.list`).
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        api_key: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        endpoint(base_url, &[])?;
        Ok(Self {
            http,
            base_url: base_url.to_string(),
            api_key: api_key.into(),
        })
    }

    /// Generate plain text for `prompt` with `model`.
    pub async fn generate(&self, model: &str, prompt: &str) -> CallOutcome<String> {
        let model = model.strip_prefix("models/").unwrap_or(model);
        let method = format!("{model}:generateContent");
        let url = match endpoint(&self.base_url, &[API_VERSION, "models", &method]) {
            Ok(url) => url,
            Err(e) => return CallOutcome::fatal(e.to_string()),
        };

        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": { "responseMimeType": "text/plain" },
        });

        debug!(model, "gemini generate request");
        let response = match self
            .http
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return CallOutcome::fatal(format!("Gemini request failed: {e}")),
        };

        let status = response.status();
        if !status.is_success() {
            let header_delay = retry_after_header(&response);
            let raw = response.text().await.unwrap_or_default();
            let (message, body_delay) = error_detail(&raw);
            error!(model, status = status.as_u16(), message = %message, "Gemini generate failed");
            return classify_failure("Gemini generate", status, header_delay.or(body_delay), &message);
        }

        match response.json::<GenerateResponse>().await {
            Ok(payload) => {
                let text = payload.text();
                if text.is_empty() {
                    CallOutcome::fatal("Gemini returned no text")
                } else {
                    CallOutcome::Success(text)
                }
            }
            Err(e) => CallOutcome::fatal(format!("Gemini response invalid: {e}")),
        }
    }

    async fn fetch_models(&self) -> Result<Vec<String>, ProviderError> {
        let url = endpoint(&self.base_url, &[API_VERSION, "models"])?;
        let mut models = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(url.clone())
                .header(API_KEY_HEADER, &self.api_key)
                .query(&[("pageSize", "1000")]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| ProviderError::Unavailable(format!("Gemini models request failed: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                let raw = response.text().await.unwrap_or_default();
                let (message, _) = error_detail(&raw);
                error!(status = status.as_u16(), message = %message, "failed to list Gemini models");
                return Err(ProviderError::Unavailable(format!(
                    "Gemini models failed {}: {message}",
                    status.as_u16()
                )));
            }

            let page: ModelsPage = response
                .json()
                .await
                .map_err(|e| ProviderError::Unavailable(format!("Gemini models response invalid: {e}")))?;
            models.extend(page.models.into_iter().map(|m| m.name));

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => page_token = Some(next),
                None => return Ok(models),
            }
        }
    }
}

#[async_trait]
impl ModelCatalog for GeminiClient {
    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        self.fetch_models().await
    }
}

/// [`Enricher`] bound to one Gemini model.
pub struct GeminiEnricher {
    client: Arc<GeminiClient>,
    model: String,
}

impl GeminiEnricher {
    pub fn new(client: Arc<GeminiClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Enricher for GeminiEnricher {
    async fn enrich_content(
        &self,
        content: &SourceContent,
        params: &EnrichmentParams,
    ) -> CallOutcome<String> {
        let prompt = build_prompt(content, params);
        self.client.generate(&self.model, &prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use axum::extract::{Path, Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::Value;
    use std::collections::HashMap;

    use crate::clients::test_server::serve;

    #[derive(Default)]
    struct FakeGemini {
        requests: Mutex<Vec<(String, Value)>>,
    }

    async fn generate(
        State(fake): State<Arc<FakeGemini>>,
        headers: HeaderMap,
        Path(method): Path<String>,
        Json(body): Json<Value>,
    ) -> axum::response::Response {
        if headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) != Some("key") {
            return (StatusCode::FORBIDDEN, "missing key").into_response();
        }
        fake.requests.lock().unwrap().push((method.clone(), body));

        match method.as_str() {
            "busy-model:generateContent" => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(serde_json::json!({
                    "error": {
                        "code": 429,
                        "message": "You exceeded your current quota. Please retry in 2.5s.",
                        "status": "RESOURCE_EXHAUSTED",
                        "details": [{ "retryDelay": "2s" }]
                    }
                })),
            )
                .into_response(),
            "broken-model:generateContent" => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "error": { "code": 400, "message": "model not found", "status": "INVALID_ARGUMENT" }
                })),
            )
                .into_response(),
            _ => Json(serde_json::json!({
                "candidates": [
                    { "content": { "parts": [{ "text": "Zapatilla liviana" }, { "text": "y comoda. " }] } }
                ]
            }))
            .into_response(),
        }
    }

    async fn models(Query(query): Query<HashMap<String, String>>) -> Json<Value> {
        match query.get("pageToken").map(String::as_str) {
            None => Json(serde_json::json!({
                "models": [{ "name": "models/gemini-2.0-flash" }],
                "nextPageToken": "p2"
            })),
            Some(_) => Json(serde_json::json!({
                "models": [{ "name": "models/gemini-1.5-pro" }]
            })),
        }
    }

    async fn fake_gemini() -> (Arc<FakeGemini>, Arc<GeminiClient>) {
        let fake = Arc::new(FakeGemini::default());
        let router = Router::new()
            .route("/v1beta/models/:method", post(generate))
            .route("/v1beta/models", get(models))
            .with_state(fake.clone());
        let base = serve(router).await;
        let client = GeminiClient::new(reqwest::Client::new(), &base, "key").unwrap();
        (fake, Arc::new(client))
    }

    #[tokio::test]
    async fn enricher_sends_prompt_and_joins_parts() {
        let (fake, client) = fake_gemini().await;
        let enricher = GeminiEnricher::new(client, "models/gemini-2.0-flash");
        let params = EnrichmentParams::new(Some("formal".into()), Some(30), "gemini-2.0-flash").unwrap();

        let out = enricher
            .enrich_content(&SourceContent::new("MLA1", "Zapatilla urbana"), &params)
            .await;
        assert_eq!(out, CallOutcome::Success("Zapatilla liviana y comoda.".to_string()));

        let requests = fake.requests.lock().unwrap();
        let (method, body) = &requests[0];
        assert_eq!(method, "gemini-2.0-flash:generateContent");
        let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap();
        assert!(prompt.contains("Tone: formal."));
        assert!(prompt.ends_with("Zapatilla urbana"));
    }

    #[tokio::test]
    async fn quota_errors_are_rate_limits_with_the_hint() {
        let (_, client) = fake_gemini().await;

        match client.generate("busy-model", "hola").await {
            CallOutcome::RateLimited {
                retry_after,
                message,
            } => {
                assert_eq!(retry_after, Some(Duration::from_secs(2)));
                assert!(message.contains("RESOURCE_EXHAUSTED"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        match client.generate("broken-model", "hola").await {
            CallOutcome::Fatal(message) => assert!(message.contains("model not found")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn model_listing_follows_pages() {
        let (_, client) = fake_gemini().await;
        let models = client.list_models().await.unwrap();
        assert_eq!(models, vec!["models/gemini-2.0-flash", "models/gemini-1.5-pro"]);
        assert!(client.ensure_model("gemini-1.5-pro").await.is_ok());
    }

    #[test]
    fn error_bodies_yield_message_and_delay() {
        let (message, delay) = error_detail(
            r#"{"error":{"message":"Please retry in 7s.","status":"RESOURCE_EXHAUSTED","details":[{"retryDelay":"7s"}]}}"#,
        );
        assert_eq!(message, "RESOURCE_EXHAUSTED: Please retry in 7s.");
        assert_eq!(delay, Some(Duration::from_secs(7)));

        assert_eq!(error_detail("gateway timeout"), ("gateway timeout".to_string(), None));
    }
}
