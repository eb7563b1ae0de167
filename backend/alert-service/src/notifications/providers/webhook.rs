use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::config::WebhookConfig;
use crate::error::{AppError, AppResult};
use crate::notifications::providers::{NotificationProvider, RateLimiter, SendMode};
use crate::notifications::types::{
    DeliveryChannel, DeliveryErrorKind, DeliveryResult, Notification, Recipient,
};

const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Generic JSON POST delivery to a per-recipient or default URL.
pub struct WebhookProvider {
    mode: SendMode,
    default_url: Option<String>,
    auth_header: Option<(String, String)>,
    http: reqwest::Client,
    limiter: Mutex<RateLimiter>,
}

impl WebhookProvider {
    pub fn mock() -> Self {
        Self {
            mode: SendMode::Mock,
            default_url: None,
            auth_header: None,
            http: reqwest::Client::new(),
            limiter: Mutex::new(RateLimiter::new(100, Duration::from_secs(60))),
        }
    }

    pub fn new(config: &WebhookConfig, mode: SendMode) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .map_err(|e| AppError::Config(format!("webhook http client: {e}")))?;

        let auth_header = match (&config.auth_header, &config.auth_value) {
            (Some(name), Some(value)) => Some((name.clone(), value.clone())),
            _ => None,
        };

        Ok(Self {
            mode,
            default_url: config.default_url.clone(),
            auth_header,
            http,
            limiter: Mutex::new(RateLimiter::new(100, Duration::from_secs(60))),
        })
    }

    pub(crate) fn format_payload(
        &self,
        notification: &Notification,
        recipient: &Recipient,
    ) -> serde_json::Value {
        json!({
            "notification_id": notification.id,
            "timestamp": notification.timestamp.to_rfc3339(),
            "priority": notification.priority.as_str(),
            "alert_type": notification.alert_type,
            "title": notification.title,
            "message": notification.message,
            "model_id": notification.model_id,
            "model_name": notification.model_name,
            "regulation": notification.regulation,
            "data": notification.data,
            "recipient": {
                "id": recipient.id,
                "name": recipient.name,
            },
        })
    }

    fn url_for(&self, recipient: &Recipient) -> Option<String> {
        recipient.webhook_url.clone().or_else(|| self.default_url.clone())
    }
}

#[async_trait]
impl NotificationProvider for WebhookProvider {
    fn channel(&self) -> DeliveryChannel {
        DeliveryChannel::Webhook
    }

    fn validate_recipient(&self, recipient: &Recipient) -> bool {
        recipient.active && (recipient.webhook_url.is_some() || self.default_url.is_some())
    }

    async fn send(&self, notification: &Notification, recipient: &Recipient) -> DeliveryResult {
        let result = DeliveryResult::pending(notification, recipient, DeliveryChannel::Webhook);

        let Some(url) = self.url_for(recipient) else {
            return result.failed(DeliveryErrorKind::InvalidRecipient, "no webhook URL configured");
        };
        if !recipient.active {
            return result.failed(DeliveryErrorKind::InvalidRecipient, "recipient inactive");
        }

        {
            let mut limiter = self.limiter.lock().await;
            if !limiter.check() {
                return result.failed(DeliveryErrorKind::RateLimited, "rate limit exceeded");
            }
            limiter.record();
        }

        let payload = self.format_payload(notification, recipient);

        match self.mode {
            SendMode::Mock => {
                info!(
                    %url,
                    notification_id = %notification.id,
                    "[mock webhook] notification logged instead of sent"
                );
                result.delivered(json!({"mock": true, "url": url}))
            }
            SendMode::Live => {
                let mut request = self.http.post(&url).json(&payload);
                if let Some((name, value)) = &self.auth_header {
                    request = request.header(name.as_str(), value.as_str());
                }
                match request.send().await {
                    Ok(response) if response.status().is_success() => {
                        result.delivered(json!({"status_code": response.status().as_u16()}))
                    }
                    Ok(response) => {
                        let status = response.status().as_u16();
                        error!(%url, status, "webhook rejected notification");
                        result.failed(
                            DeliveryErrorKind::Provider,
                            format!("webhook returned {status}"),
                        )
                    }
                    Err(e) => {
                        error!(%url, error = %e, "webhook request failed");
                        let kind = if e.is_timeout() || e.is_connect() {
                            DeliveryErrorKind::Transport
                        } else {
                            DeliveryErrorKind::Provider
                        };
                        result.failed(kind, format!("webhook request failed: {e}"))
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::types::{DeliveryStatus, NotificationPriority};

    fn notification() -> Notification {
        Notification::new(
            "Threshold Breach: compliance_score",
            "The metric 'compliance_score' has breached its threshold.",
            NotificationPriority::High,
            "threshold_breach",
        )
    }

    #[tokio::test]
    async fn mock_mode_delivers_with_recipient_url() {
        let provider = WebhookProvider::mock();
        let recipient =
            Recipient::new("r1", "Ops").with_webhook("https://api.example.com/hooks/compliance");

        let result = provider.send(&notification(), &recipient).await;

        assert_eq!(result.status, DeliveryStatus::Delivered);
        assert_eq!(
            result.response_data.unwrap()["url"],
            "https://api.example.com/hooks/compliance"
        );
    }

    #[tokio::test]
    async fn missing_url_everywhere_is_invalid() {
        let provider = WebhookProvider::mock();
        let recipient = Recipient::new("r1", "Ops");

        assert!(!provider.validate_recipient(&recipient));
        let result = provider.send(&notification(), &recipient).await;
        assert_eq!(result.error_kind, Some(DeliveryErrorKind::InvalidRecipient));
    }

    #[test]
    fn payload_carries_the_full_notification() {
        let provider = WebhookProvider::mock();
        let recipient = Recipient::new("r1", "Ops").with_webhook("https://example.com/hook");
        let n = notification();

        let payload = provider.format_payload(&n, &recipient);

        assert_eq!(payload["notification_id"], n.id.as_str());
        assert_eq!(payload["priority"], "high");
        assert_eq!(payload["recipient"]["id"], "r1");
        assert!(payload["timestamp"].as_str().unwrap().contains('T'));
    }
}
