// src/notify/mod.rs
//! Contact-form notifications. Channels are optional: a channel whose
//! configuration is missing is simply not registered.

pub mod email;
pub mod slack;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use email::EmailNotifier;
pub use slack::SlackNotifier;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactMessage {
    pub name: String,
    pub email: String,
    pub subject: Option<String>,
    pub message: String,
    pub received_at: DateTime<Utc>,
}

impl ContactMessage {
    pub fn subject_line(&self) -> String {
        match self.subject.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => format!("Contact form: {s}"),
            _ => format!("Contact form: message from {}", self.name),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;
    async fn send(&self, msg: &ContactMessage) -> Result<()>;
}

/// Per-channel delivery result.
#[derive(Debug)]
pub struct Delivery {
    pub channel: &'static str,
    pub result: Result<()>,
}

/// Fans one message out to every registered channel.
#[derive(Clone, Default)]
pub struct NotifierMux {
    channels: Vec<Arc<dyn Notifier>>,
}

impl NotifierMux {
    pub fn new(channels: Vec<Arc<dyn Notifier>>) -> Self {
        Self { channels }
    }

    /// Slack (`SLACK_WEBHOOK_URL`) and SMTP email (`SMTP_*`, `CONTACT_EMAIL_*`).
    pub fn from_env() -> Self {
        let mut channels: Vec<Arc<dyn Notifier>> = Vec::new();
        if let Some(slack) = SlackNotifier::from_env() {
            channels.push(Arc::new(slack));
        }
        match EmailNotifier::from_env() {
            Ok(Some(email)) => channels.push(Arc::new(email)),
            Ok(None) => {}
            Err(e) => tracing::warn!(target: "notify", error = %e, "email channel disabled"),
        }
        if channels.is_empty() {
            tracing::info!(target: "notify", "no notification channels configured");
        }
        Self { channels }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Sends to every channel; one failing channel does not stop the others.
    pub async fn dispatch(&self, msg: &ContactMessage) -> Vec<Delivery> {
        let sends = self.channels.iter().map(|ch| async move {
            let result = ch.send(msg).await;
            match &result {
                Ok(()) => tracing::info!(target: "notify", channel = ch.name(), "contact message delivered"),
                Err(e) => tracing::warn!(
                    target: "notify",
                    channel = ch.name(),
                    error = %e,
                    "contact message delivery failed"
                ),
            }
            Delivery {
                channel: ch.name(),
                result,
            }
        });
        futures::future::join_all(sends).await
    }
}
