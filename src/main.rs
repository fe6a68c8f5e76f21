//! Legal news crawler: binary entrypoint.
//! Boots the Axum HTTP server with the cron trigger, contact form, health
//! and Prometheus metrics routes.

use std::sync::Arc;

use legal_news_crawler::{api, job_from_environment, logging, metrics::Metrics};
use shuttle_axum::ShuttleAxum;

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    logging::init();

    let job = job_from_environment()?;
    tracing::info!(sources = job.sources().len(), "crawler configured");

    let state = api::AppState::from_env(Arc::new(job));
    let mut router = api::router(state);

    match Metrics::init() {
        Ok(m) => router = router.merge(m.router()),
        Err(e) => tracing::warn!(error = %e, "prometheus recorder not installed; /metrics disabled"),
    }

    Ok(router.into())
}
