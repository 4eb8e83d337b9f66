use anyhow::Context;

use itemflow_infra::config::{self, AppConfig};
use itemflow_observability::TracingConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::load_dotenv();
    let config = AppConfig::from_env().context("invalid configuration")?;

    itemflow_observability::init(&TracingConfig::from_env(config.app_env.clone()));
    config.log_summary();

    let services = itemflow_api::app::services::build_services(&config)
        .await
        .context("failed to wire services")?;
    let app = itemflow_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
