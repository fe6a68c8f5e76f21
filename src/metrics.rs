// src/metrics.rs
use axum::{routing::get, Router};
use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Call once per process.
    pub fn init() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder()?;

        describe_counter!("crawler_runs_total", "Crawler runs, labelled by outcome");
        describe_counter!("crawler_articles_found_total", "Candidates extracted from sources");
        describe_counter!("crawler_cases_created_total", "Cases created by the crawler");
        describe_counter!("crawler_cases_updated_total", "Existing cases updated by the crawler");
        describe_counter!(
            "crawler_associations_created_total",
            "Lawyer-case associations created"
        );
        describe_counter!("crawler_source_errors_total", "Failed sources, labelled by error kind");
        describe_counter!(
            "crawler_classifier_errors_total",
            "Classifier failures treated as not relevant"
        );

        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
