use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::config::ChatConfig;
use crate::error::{AppError, AppResult};
use crate::notifications::providers::{format_headline, NotificationProvider, RateLimiter, SendMode};
use crate::notifications::types::{
    DeliveryChannel, DeliveryErrorKind, DeliveryResult, Notification, Recipient,
};

const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Chat delivery via an incoming-webhook endpoint (Slack-compatible payload).
pub struct ChatProvider {
    mode: SendMode,
    webhook_url: Option<String>,
    default_channel: String,
    http: reqwest::Client,
    limiter: Mutex<RateLimiter>,
}

impl ChatProvider {
    pub fn mock() -> Self {
        Self {
            mode: SendMode::Mock,
            webhook_url: None,
            default_channel: "#compliance-alerts".into(),
            http: reqwest::Client::new(),
            limiter: Mutex::new(RateLimiter::new(60, Duration::from_secs(60))),
        }
    }

    pub fn new(config: &ChatConfig, mode: SendMode) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .map_err(|e| AppError::Config(format!("chat http client: {e}")))?;

        Ok(Self {
            mode,
            webhook_url: Some(config.webhook_url.clone()),
            default_channel: config.default_channel.clone(),
            http,
            limiter: Mutex::new(RateLimiter::new(60, Duration::from_secs(60))),
        })
    }

    fn target_for(&self, recipient: &Recipient) -> String {
        recipient
            .chat_channel
            .clone()
            .or_else(|| recipient.chat_handle.clone())
            .unwrap_or_else(|| self.default_channel.clone())
    }

    fn format_payload(&self, notification: &Notification, target: &str) -> serde_json::Value {
        json!({
            "channel": target,
            "text": format_headline(notification),
            "attachments": [{
                "title": notification.title,
                "text": notification.message,
                "fields": [
                    {"title": "Priority", "value": notification.priority.as_str(), "short": true},
                    {"title": "Alert Type", "value": notification.alert_type, "short": true},
                    {"title": "Model", "value": notification.model_name.as_deref().unwrap_or("N/A"), "short": true},
                ],
                "footer": format!("Notification ID: {}", notification.id),
            }],
        })
    }
}

#[async_trait]
impl NotificationProvider for ChatProvider {
    fn channel(&self) -> DeliveryChannel {
        DeliveryChannel::Chat
    }

    fn validate_recipient(&self, recipient: &Recipient) -> bool {
        recipient.active
            && (recipient.chat_channel.is_some()
                || recipient.chat_handle.is_some()
                || !self.default_channel.is_empty())
    }

    async fn send(&self, notification: &Notification, recipient: &Recipient) -> DeliveryResult {
        let result = DeliveryResult::pending(notification, recipient, DeliveryChannel::Chat);

        if !self.validate_recipient(recipient) {
            return result.failed(
                DeliveryErrorKind::InvalidRecipient,
                "recipient has no chat channel or handle configured",
            );
        }

        {
            let mut limiter = self.limiter.lock().await;
            if !limiter.check() {
                return result.failed(DeliveryErrorKind::RateLimited, "rate limit exceeded");
            }
            limiter.record();
        }

        let target = self.target_for(recipient);
        let payload = self.format_payload(notification, &target);

        match self.mode {
            SendMode::Mock => {
                info!(
                    %target,
                    title = %notification.title,
                    priority = notification.priority.as_str(),
                    "[mock chat] notification logged instead of sent"
                );
                result.delivered(json!({"mock": true, "target": target}))
            }
            SendMode::Live => {
                let Some(url) = self.webhook_url.as_deref() else {
                    return result.failed(DeliveryErrorKind::Provider, "no chat webhook configured");
                };
                match self.http.post(url).json(&payload).send().await {
                    Ok(response) if response.status().is_success() => {
                        result.delivered(json!({"method": "webhook", "target": target}))
                    }
                    Ok(response) => {
                        let status = response.status().as_u16();
                        error!(%target, status, "chat webhook rejected notification");
                        result.failed(
                            DeliveryErrorKind::Provider,
                            format!("chat webhook returned {status}"),
                        )
                    }
                    Err(e) => {
                        error!(%target, error = %e, "chat webhook request failed");
                        let kind = if e.is_timeout() || e.is_connect() {
                            DeliveryErrorKind::Transport
                        } else {
                            DeliveryErrorKind::Provider
                        };
                        result.failed(kind, format!("chat webhook request failed: {e}"))
                    }
                }
            }
        }
    }
}
