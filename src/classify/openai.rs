// src/classify/openai.rs
//! Remote classifier backed by the OpenAI Chat Completions API.
//! Every failure (missing key, transport, non-2xx, malformed JSON) is a
//! `CrawlError::Classification`; the gate turns it into "not relevant".

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{Classification, Classifier};
use crate::config::ClassifierConfig;
use crate::error::CrawlError;
use crate::ingest::types::ArticleCandidate;

pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_OPENAI_BASE_URL: &str = "OPENAI_BASE_URL";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

const SYSTEM_PROMPT: &str = "You screen news articles for a lawyer directory. \
Decide whether the article reports on a specific legal case, lawsuit, prosecution, \
or the work of a named lawyer or law firm. Reply with JSON only: \
{\"relevant\": true|false, \"confidence\": number between 0 and 1, \"reason\": short string}.";

/// Longest article text sent to the model (chars).
const MAX_INPUT_CHARS: usize = 2000;

pub struct OpenAiClassifier {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct Req<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Deserialize)]
struct Resp {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}

#[derive(Deserialize)]
struct ChoiceMsg {
    content: String,
}

/// The JSON object the model is asked to produce.
#[derive(Debug, Deserialize)]
struct Verdict {
    relevant: bool,
    confidence: f32,
    #[serde(default)]
    reason: Option<String>,
}

impl OpenAiClassifier {
    pub fn new(api_key: String, base_url: String, model: String, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("legal-news-crawler/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }

    /// Reads `OPENAI_API_KEY` (and optional `OPENAI_BASE_URL`). A missing key is
    /// not a startup error: every call then fails closed.
    pub fn from_env(cfg: &ClassifierConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var(ENV_OPENAI_API_KEY).unwrap_or_default();
        if api_key.trim().is_empty() {
            tracing::warn!(
                target: "crawler",
                "OPENAI_API_KEY not set; openai classifier will reject every candidate"
            );
        }
        let base_url = std::env::var(ENV_OPENAI_BASE_URL)
            .unwrap_or_else(|_| DEFAULT_OPENAI_BASE_URL.to_string());
        Self::new(
            api_key,
            base_url,
            cfg.model.clone(),
            Duration::from_secs(cfg.timeout_secs.max(1)),
        )
    }
}

#[async_trait]
impl Classifier for OpenAiClassifier {
    async fn classify(&self, candidate: &ArticleCandidate) -> Result<Classification, CrawlError> {
        if self.api_key.trim().is_empty() {
            return Err(CrawlError::Classification("missing OPENAI_API_KEY".into()));
        }

        let input: String = candidate.text().chars().take(MAX_INPUT_CHARS).collect();
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Msg {
                    role: "user",
                    content: &input,
                },
            ],
            temperature: 0.0,
            max_tokens: 80,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| CrawlError::Classification(format!("request: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(CrawlError::Classification(format!("HTTP {status}")));
        }

        let body: Resp = resp
            .json()
            .await
            .map_err(|e| CrawlError::Classification(format!("response body: {e}")))?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or("");
        parse_verdict(content)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

fn parse_verdict(content: &str) -> Result<Classification, CrawlError> {
    // Tolerate fenced output (```json ... ```).
    let trimmed = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let v: Verdict = serde_json::from_str(trimmed)
        .map_err(|e| CrawlError::Classification(format!("unparseable verdict: {e}")))?;
    if !v.confidence.is_finite() {
        return Err(CrawlError::Classification("non-finite confidence".into()));
    }
    Ok(Classification {
        is_relevant: v.relevant,
        confidence: v.confidence.clamp(0.0, 1.0),
        reasons: v.reason.into_iter().map(|r| format!("model:{r}")).collect(),
    })
}
