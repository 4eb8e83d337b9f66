use std::sync::Arc;

use anyhow::Context;
use tracing::warn;

use itemflow_infra::config::AppConfig;
use itemflow_infra::jobs::{AuditLog, JobService, ResultStore};
use itemflow_infra::sqlite::{self, SqliteAuditLog, SqliteResultStore};
use itemflow_providers::{
    HttpProviders, MockContentSource, MockProviders, ProviderError, ProviderFactory,
    StaticModelCatalog,
};

/// Everything the handlers need.
pub struct AppServices {
    pub jobs: JobService,
    pub environment: String,
    pub default_model: String,
}

impl AppServices {
    pub fn new(jobs: JobService, environment: impl Into<String>, default_model: impl Into<String>) -> Self {
        Self {
            jobs,
            environment: environment.into(),
            default_model: default_model.into(),
        }
    }
}

/// Live MercadoLibre/Gemini clients, or synthetic collaborators when
/// `USE_MOCK_PROVIDERS` is set. The mock enricher still requires
/// `GEMINI_API_KEY`.
pub fn build_providers(config: &AppConfig) -> Result<Arc<dyn ProviderFactory>, ProviderError> {
    if config.use_mock_providers {
        warn!("mock collaborators enabled; item descriptions and enrichments are synthetic");
        let mock = MockProviders::new(
            MockContentSource::synthesizing(),
            StaticModelCatalog::new(config.available_models.clone()),
        )
        .requiring_credential(config.gemini_api_key.clone());
        return Ok(Arc::new(mock));
    }

    if config.meli_access_token.is_none() {
        warn!("MELI_ACCESS_TOKEN not configured; jobs will fail until it is set");
    }
    Ok(Arc::new(HttpProviders::new(config.http_providers_config())?))
}

/// Wire SQLite-backed stores and the configured collaborators.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let pool = sqlite::connect(&config.db_path)
        .await
        .with_context(|| format!("failed to open database {}", config.db_path))?;
    let results: Arc<dyn ResultStore> = Arc::new(SqliteResultStore::new(pool.clone()));
    let audit: Arc<dyn AuditLog> = Arc::new(SqliteAuditLog::new(pool));
    let providers = build_providers(config).context("failed to build collaborators")?;

    let jobs = JobService::new(results, audit, providers, config.executor_config());
    Ok(AppServices::new(jobs, config.app_env.clone(), config.default_model.clone()))
}
