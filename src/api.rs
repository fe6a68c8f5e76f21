// src/api.rs
//! HTTP surface: cron trigger for the crawler, contact form, health.

use std::sync::Arc;

use chrono::Utc;
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shuttle_axum::axum::{
    extract::{rejection::JsonRejection, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::job::{run_news_crawler_job, CrawlJob, RunSummary};
use crate::notify::{ContactMessage, NotifierMux};

pub const ENV_CRON_SECRET: &str = "CRON_SECRET";

const MAX_NAME_CHARS: usize = 100;
const MAX_EMAIL_CHARS: usize = 254;
const MAX_SUBJECT_CHARS: usize = 200;
const MAX_MESSAGE_CHARS: usize = 5000;

#[derive(Clone)]
pub struct AppState {
    pub job: Arc<CrawlJob>,
    /// Shared secret for the cron trigger. `None` locks the trigger.
    pub cron_secret: Option<String>,
    pub notifier: NotifierMux,
}

impl AppState {
    pub fn new(job: Arc<CrawlJob>, cron_secret: Option<String>, notifier: NotifierMux) -> Self {
        Self {
            job,
            cron_secret: cron_secret.filter(|s| !s.trim().is_empty()),
            notifier,
        }
    }

    /// `CRON_SECRET` plus notifier channels from the environment.
    pub fn from_env(job: Arc<CrawlJob>) -> Self {
        let secret = std::env::var(ENV_CRON_SECRET).ok();
        if secret.as_deref().map_or(true, |s| s.trim().is_empty()) {
            tracing::warn!(target: "api", "CRON_SECRET not set; crawler trigger will reject every call");
        }
        Self::new(job, secret, NotifierMux::from_env())
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/cron/news-crawler", get(cron_news_crawler))
        .route("/api/contact", post(contact))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct CronOk {
    success: bool,
    message: &'static str,
    stats: RunSummary,
}

fn error_response(status: StatusCode, error: &str, details: Option<String>) -> Response {
    let body = match details {
        Some(d) => json!({ "error": error, "details": d }),
        None => json!({ "error": error }),
    };
    (status, Json(body)).into_response()
}

/// Length-independent byte comparison.
fn secrets_match(given: &[u8], expected: &[u8]) -> bool {
    if given.len() != expected.len() {
        return false;
    }
    given
        .iter()
        .zip(expected)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

fn authorized(headers: &HeaderMap, secret: Option<&str>) -> bool {
    let Some(secret) = secret else {
        return false;
    };
    let Some(token) = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    else {
        return false;
    };
    secrets_match(token.trim().as_bytes(), secret.as_bytes())
}

async fn cron_news_crawler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !authorized(&headers, state.cron_secret.as_deref()) {
        tracing::warn!(target: "api", "unauthorized crawler trigger");
        return error_response(StatusCode::UNAUTHORIZED, "Unauthorized", None);
    }

    match run_news_crawler_job(&state.job).await {
        Ok(stats) => {
            let message = if stats.errors.is_empty() {
                "News crawler completed"
            } else {
                "News crawler completed with errors"
            };
            (
                StatusCode::OK,
                Json(CronOk {
                    success: stats.success,
                    message,
                    stats,
                }),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!(target: "api", error = %e, "news crawler job failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "News crawler job failed",
                Some(e.to_string()),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ContactRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub message: String,
}

fn email_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("static email regex"))
}

/// All problems with the submission, empty when valid.
pub fn validate_contact(req: &ContactRequest) -> Vec<String> {
    let mut problems = Vec::new();
    let name = req.name.trim();
    let email = req.email.trim();
    let message = req.message.trim();

    if name.is_empty() {
        problems.push("name is required".to_string());
    } else if name.chars().count() > MAX_NAME_CHARS {
        problems.push(format!("name must be at most {MAX_NAME_CHARS} characters"));
    }
    if email.is_empty() {
        problems.push("email is required".to_string());
    } else if email.len() > MAX_EMAIL_CHARS || !email_re().is_match(email) {
        problems.push("email is invalid".to_string());
    }
    if let Some(s) = &req.subject {
        if s.trim().chars().count() > MAX_SUBJECT_CHARS {
            problems.push(format!("subject must be at most {MAX_SUBJECT_CHARS} characters"));
        }
    }
    if message.is_empty() {
        problems.push("message is required".to_string());
    } else if message.chars().count() > MAX_MESSAGE_CHARS {
        problems.push(format!("message must be at most {MAX_MESSAGE_CHARS} characters"));
    }
    problems
}

async fn contact(
    State(state): State<AppState>,
    body: Result<Json<ContactRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(b) => b,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "Invalid contact submission",
                Some(e.body_text()),
            )
        }
    };

    let problems = validate_contact(&req);
    if !problems.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Invalid contact submission",
            Some(problems.join("; ")),
        );
    }

    let msg = ContactMessage {
        name: req.name.trim().to_string(),
        email: req.email.trim().to_string(),
        subject: req
            .subject
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        message: req.message.trim().to_string(),
        received_at: Utc::now(),
    };

    // Fire-and-forget: delivery problems are logged by the mux, never returned.
    let mux = state.notifier.clone();
    tokio::spawn(async move {
        mux.dispatch(&msg).await;
    });

    (
        StatusCode::OK,
        Json(json!({ "success": true, "message": "Thanks, your message has been sent." })),
    )
        .into_response()
}
