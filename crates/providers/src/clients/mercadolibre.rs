use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::capability::{ContentSource, SourceContent};
use crate::error::ProviderError;
use crate::outcome::CallOutcome;

use super::{classify_failure, endpoint, retry_after_header};

/// OAuth material for the MercadoLibre API.
///
/// A refresh is attempted on 401/403 only when the refresh token and the
/// client id/secret are all present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeliCredentials {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl MeliCredentials {
    pub fn with_access_token(token: impl Into<String>) -> Self {
        Self {
            access_token: Some(token.into()),
            ..Self::default()
        }
    }

    fn can_refresh(&self) -> bool {
        self.refresh_token.is_some() && self.client_id.is_some() && self.client_secret.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct DescriptionPayload {
    #[serde(default)]
    plain_text: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

impl DescriptionPayload {
    fn into_text(self) -> String {
        self.plain_text
            .filter(|t| !t.trim().is_empty())
            .or(self.text)
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct TokenPayload {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Fetches item descriptions from `GET /items/{id}/description`.
pub struct MeliClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Mutex<MeliCredentials>,
}

impl MeliClient {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        credentials: MeliCredentials,
    ) -> Result<Self, ProviderError> {
        // Fail on a malformed base URL at wiring time, not per item.
        endpoint(base_url, &[])?;
        Ok(Self {
            http,
            base_url: base_url.to_string(),
            credentials: Mutex::new(credentials),
        })
    }

    fn credentials(&self) -> MeliCredentials {
        self.credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn get(&self, url: &reqwest::Url, token: &str) -> Result<Response, reqwest::Error> {
        self.http.get(url.clone()).bearer_auth(token).send().await
    }

    /// Exchange the refresh token for a new access token.
    async fn refresh_access_token(&self) -> Result<String, String> {
        let credentials = self.credentials();
        let (Some(refresh_token), Some(client_id), Some(client_secret)) = (
            credentials.refresh_token.as_deref(),
            credentials.client_id.as_deref(),
            credentials.client_secret.as_deref(),
        ) else {
            return Err(
                "Cannot refresh token: client_id/client_secret/refresh_token missing.".to_string(),
            );
        };

        let url = endpoint(&self.base_url, &["oauth", "token"]).map_err(|e| e.to_string())?;
        let response = self
            .http
            .post(url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(|e| format!("Token refresh failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Token refresh failed {}: {body}", status.as_u16()));
        }

        let payload: TokenPayload = response
            .json()
            .await
            .map_err(|e| format!("Token refresh returned an invalid payload: {e}"))?;

        let mut stored = self.credentials.lock().unwrap_or_else(PoisonError::into_inner);
        stored.access_token = Some(payload.access_token.clone());
        if let Some(rotated) = payload.refresh_token {
            stored.refresh_token = Some(rotated);
        }
        info!("MercadoLibre access token refreshed");
        Ok(payload.access_token)
    }
}

#[async_trait]
impl ContentSource for MeliClient {
    async fn fetch_content(&self, target_id: &str) -> CallOutcome<SourceContent> {
        let url = match endpoint(&self.base_url, &["items", target_id, "description"]) {
            Ok(url) => url,
            Err(e) => return CallOutcome::fatal(e.to_string()),
        };
        let credentials = self.credentials();
        let Some(token) = credentials.access_token.as_deref() else {
            return CallOutcome::fatal("MELI access token not configured.");
        };

        info!(target_id, "extracting item description");
        let mut response = match self.get(&url, token).await {
            Ok(response) => response,
            Err(e) => return CallOutcome::fatal(format!("Item description request failed: {e}")),
        };

        if matches!(response.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
            && credentials.can_refresh()
        {
            warn!(target_id, status = response.status().as_u16(), "access token rejected; refreshing");
            let token = match self.refresh_access_token().await {
                Ok(token) => token,
                Err(message) => return CallOutcome::fatal(message),
            };
            response = match self.get(&url, &token).await {
                Ok(response) => response,
                Err(e) => {
                    return CallOutcome::fatal(format!("Item description request failed: {e}"));
                }
            };
        }

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_header(&response);
            let body = response.text().await.unwrap_or_default();
            error!(target_id, status = status.as_u16(), body = %body, "MercadoLibre request failed");
            return classify_failure("Item description", status, retry_after, &body);
        }

        match response.json::<DescriptionPayload>().await {
            Ok(payload) => CallOutcome::Success(SourceContent::new(target_id, payload.into_text())),
            Err(e) => CallOutcome::fatal(format!("Item description payload invalid: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;

    use crate::clients::test_server::serve;

    #[derive(Default)]
    struct FakeMeli {
        refreshes: AtomicUsize,
    }

    async fn description(
        State(fake): State<Arc<FakeMeli>>,
        headers: HeaderMap,
        Path(item_id): Path<String>,
    ) -> axum::response::Response {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if auth == "Bearer expired" && fake.refreshes.load(Ordering::SeqCst) == 0 {
            return (AxumStatus::UNAUTHORIZED, "invalid token").into_response();
        }
        match item_id.as_str() {
            "MLA1" => Json(json!({ "plain_text": "Zapatilla urbana", "text": "" })).into_response(),
            "MLA2" => Json(json!({ "plain_text": "", "text": "Mochila" })).into_response(),
            "MLA429" => (
                AxumStatus::TOO_MANY_REQUESTS,
                [("retry-after", "3")],
                "too many requests",
            )
                .into_response(),
            _ => (AxumStatus::NOT_FOUND, "item not found").into_response(),
        }
    }

    async fn token(State(fake): State<Arc<FakeMeli>>) -> Json<serde_json::Value> {
        fake.refreshes.fetch_add(1, Ordering::SeqCst);
        Json(json!({ "access_token": "fresh", "refresh_token": "rotated" }))
    }

    async fn fake_meli() -> (Arc<FakeMeli>, String) {
        let fake = Arc::new(FakeMeli::default());
        let router = Router::new()
            .route("/items/:item_id/description", get(description))
            .route("/oauth/token", post(token))
            .with_state(fake.clone());
        (fake, serve(router).await)
    }

    fn client(base: &str, credentials: MeliCredentials) -> MeliClient {
        MeliClient::new(reqwest::Client::new(), base, credentials).unwrap()
    }

    #[tokio::test]
    async fn description_prefers_plain_text() {
        let (_, base) = fake_meli().await;
        let meli = client(&base, MeliCredentials::with_access_token("ok"));

        assert_eq!(
            meli.fetch_content("MLA1").await,
            CallOutcome::Success(SourceContent::new("MLA1", "Zapatilla urbana"))
        );
        assert_eq!(
            meli.fetch_content("MLA2").await,
            CallOutcome::Success(SourceContent::new("MLA2", "Mochila"))
        );
    }

    #[tokio::test]
    async fn status_codes_map_to_outcomes() {
        let (_, base) = fake_meli().await;
        let meli = client(&base, MeliCredentials::with_access_token("ok"));

        match meli.fetch_content("MLA429").await {
            CallOutcome::RateLimited { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(3)));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        match meli.fetch_content("MLA404").await {
            CallOutcome::Fatal(message) => assert!(message.contains("404")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejected_token_is_refreshed_once_and_kept() {
        let (fake, base) = fake_meli().await;
        let meli = client(
            &base,
            MeliCredentials {
                access_token: Some("expired".into()),
                refresh_token: Some("r".into()),
                client_id: Some("id".into()),
                client_secret: Some("secret".into()),
            },
        );

        assert!(meli.fetch_content("MLA1").await.is_success());
        assert!(meli.fetch_content("MLA2").await.is_success());
        assert_eq!(fake.refreshes.load(Ordering::SeqCst), 1);

        let stored = meli.credentials();
        assert_eq!(stored.access_token.as_deref(), Some("fresh"));
        assert_eq!(stored.refresh_token.as_deref(), Some("rotated"));
    }

    #[tokio::test]
    async fn rejected_token_without_refresh_material_is_fatal() {
        let (fake, base) = fake_meli().await;
        let meli = client(&base, MeliCredentials::with_access_token("expired"));

        match meli.fetch_content("MLA1").await {
            CallOutcome::Fatal(message) => assert!(message.contains("401")),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(fake.refreshes.load(Ordering::SeqCst), 0);
    }
}
