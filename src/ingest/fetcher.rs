// src/ingest/fetcher.rs
use async_trait::async_trait;
use metrics::counter;
use reqwest::{Client, StatusCode};
use std::time::Duration;

use crate::config::FetchConfig;
use crate::error::CrawlError;
use crate::ingest::types::{Fetcher, Source};

/// HTTP fetcher with per-request timeout and bounded exponential backoff.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    max_retries: u32,
    backoff: Duration,
    max_body_bytes: usize,
}

/// Outcome of one attempt: retry or give up.
enum Attempt {
    Transient(String),
    Fatal(String),
}

impl HttpFetcher {
    pub fn new(cfg: &FetchConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(cfg.user_agent.clone())
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs.max(1)))
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            client,
            max_retries: cfg.max_retries,
            backoff: Duration::from_millis(cfg.backoff_ms),
            max_body_bytes: cfg.max_body_bytes.max(1),
        })
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    async fn attempt(&self, url: &str) -> Result<String, Attempt> {
        let mut rsp = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                Attempt::Transient(e.to_string())
            } else {
                Attempt::Fatal(e.to_string())
            }
        })?;

        let status = rsp.status();
        if !status.is_success() {
            let msg = format!("HTTP {status} from {url}");
            return Err(if is_transient_status(status) {
                Attempt::Transient(msg)
            } else {
                Attempt::Fatal(msg)
            });
        }

        let too_big = || Attempt::Fatal(format!("body exceeds {} bytes", self.max_body_bytes));
        if rsp.content_length().is_some_and(|n| n > self.max_body_bytes as u64) {
            return Err(too_big());
        }
        let mut body = Vec::new();
        while let Some(chunk) = rsp
            .chunk()
            .await
            .map_err(|e| Attempt::Transient(format!("reading body: {e}")))?
        {
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(too_big());
            }
            body.extend_from_slice(&chunk);
        }
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, source: &Source) -> Result<String, CrawlError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.attempt(&source.url).await {
                Ok(body) => {
                    tracing::debug!(
                        target: "crawler",
                        source = %source.id,
                        attempt,
                        bytes = body.len(),
                        "fetched source"
                    );
                    return Ok(body);
                }
                Err(Attempt::Transient(msg)) if attempt <= self.max_retries => {
                    let wait = self.backoff * (1u32 << (attempt - 1).min(6));
                    tracing::warn!(
                        target: "crawler",
                        source = %source.id,
                        attempt,
                        error = %msg,
                        wait_ms = wait.as_millis() as u64,
                        "transient fetch failure, retrying"
                    );
                    counter!("crawler_fetch_retries_total").increment(1);
                    tokio::time::sleep(wait).await;
                }
                Err(Attempt::Transient(message)) | Err(Attempt::Fatal(message)) => {
                    return Err(CrawlError::Fetch {
                        attempts: attempt,
                        message,
                    });
                }
            }
        }
    }
}
