use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::config::SmtpConfig;
use crate::error::{AppError, AppResult};
use crate::notifications::providers::{format_headline, NotificationProvider, RateLimiter, SendMode};
use crate::notifications::types::{
    DeliveryChannel, DeliveryErrorKind, DeliveryResult, Notification, Recipient,
};

const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// SMTP email delivery.
pub struct EmailProvider {
    mode: SendMode,
    from_address: String,
    from_name: String,
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    limiter: Mutex<RateLimiter>,
}

impl EmailProvider {
    /// Log-only provider for environments without SMTP credentials.
    pub fn mock() -> Self {
        Self {
            mode: SendMode::Mock,
            from_address: "compliance@leadguard.dev".into(),
            from_name: "Compliance Platform".into(),
            transport: None,
            limiter: Mutex::new(RateLimiter::new(100, Duration::from_secs(60))),
        }
    }

    pub fn new(config: &SmtpConfig, mode: SendMode) -> AppResult<Self> {
        let transport = match mode {
            SendMode::Mock => None,
            SendMode::Live => {
                let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                    .map_err(|e| AppError::Config(format!("smtp relay: {e}")))?
                    .port(config.port);
                if let (Some(user), Some(pass)) = (&config.username, &config.password) {
                    builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
                }
                Some(builder.build())
            }
        };

        Ok(Self {
            mode,
            from_address: config.from_address.clone(),
            from_name: config.from_name.clone(),
            transport,
            limiter: Mutex::new(RateLimiter::new(100, Duration::from_secs(60))),
        })
    }

    fn format_text(&self, notification: &Notification) -> String {
        let mut body = format!(
            "{}\n{}\n\n{}\n\nAlert Type: {}\nModel: {}\nTimestamp: {}",
            format_headline(notification),
            "=".repeat(50),
            notification.message,
            notification.alert_type,
            notification.model_name.as_deref().unwrap_or("N/A"),
            notification.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        );
        body.push_str(&format!("\n\nNotification ID: {}", notification.id));
        body
    }

    fn format_html(&self, notification: &Notification) -> String {
        format!(
            "<html><body>\
             <h2>{}</h2>\
             <p>{}</p>\
             <table>\
             <tr><td><strong>Alert Type</strong></td><td>{}</td></tr>\
             <tr><td><strong>Model</strong></td><td>{}</td></tr>\
             <tr><td><strong>Timestamp</strong></td><td>{}</td></tr>\
             </table>\
             <p><small>Notification ID: {}</small></p>\
             </body></html>",
            format_headline(notification),
            notification.message,
            notification.alert_type,
            notification.model_name.as_deref().unwrap_or("N/A"),
            notification.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            notification.id,
        )
    }

    async fn send_live(
        &self,
        notification: &Notification,
        address: &str,
        recipient_name: &str,
    ) -> Result<(), String> {
        let transport = self
            .transport
            .as_ref()
            .ok_or_else(|| "no SMTP transport configured".to_string())?;

        let from: Mailbox = format!("{} <{}>", self.from_name, self.from_address)
            .parse()
            .map_err(|e| format!("invalid from address: {e}"))?;
        let to: Mailbox = format!("{recipient_name} <{address}>")
            .parse()
            .map_err(|e| format!("invalid recipient address: {e}"))?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(format_headline(notification))
            .multipart(MultiPart::alternative_plain_html(
                self.format_text(notification),
                self.format_html(notification),
            ))
            .map_err(|e| format!("failed to build email: {e}"))?;

        match tokio::time::timeout(SEND_TIMEOUT, transport.send(message)).await {
            Ok(Ok(_response)) => Ok(()),
            Ok(Err(e)) => Err(format!("smtp send failed: {e}")),
            Err(_) => Err("smtp send timed out".into()),
        }
    }
}

#[async_trait]
impl NotificationProvider for EmailProvider {
    fn channel(&self) -> DeliveryChannel {
        DeliveryChannel::Email
    }

    fn validate_recipient(&self, recipient: &Recipient) -> bool {
        recipient.active
            && recipient
                .email
                .as_deref()
                .map(|e| e.contains('@'))
                .unwrap_or(false)
    }

    async fn send(&self, notification: &Notification, recipient: &Recipient) -> DeliveryResult {
        let result = DeliveryResult::pending(notification, recipient, DeliveryChannel::Email);

        if !self.validate_recipient(recipient) {
            return result.failed(
                DeliveryErrorKind::InvalidRecipient,
                "recipient has no valid email address",
            );
        }
        let address = recipient.email.clone().unwrap_or_default();

        {
            let mut limiter = self.limiter.lock().await;
            if !limiter.check() {
                return result.failed(DeliveryErrorKind::RateLimited, "rate limit exceeded");
            }
            limiter.record();
        }

        match self.mode {
            SendMode::Mock => {
                info!(
                    to = %address,
                    subject = %notification.title,
                    priority = notification.priority.as_str(),
                    "[mock email] notification logged instead of sent"
                );
                result.delivered(json!({
                    "mock": true,
                    "to": address,
                    "subject": format_headline(notification),
                }))
            }
            SendMode::Live => match self.send_live(notification, &address, &recipient.name).await {
                Ok(()) => result.delivered(json!({"method": "smtp"})),
                Err(e) => {
                    error!(to = %address, error = %e, "email send failed");
                    result.failed(DeliveryErrorKind::Provider, e)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::types::NotificationPriority;

    fn notification() -> Notification {
        Notification::new(
            "Compliance Alert: Policy Violation Detected",
            "A GDPR policy violation has been detected in the Lead Scoring AI model.",
            NotificationPriority::High,
            "violation",
        )
        .with_model("model_001", "Lead Scoring AI")
    }

    #[tokio::test]
    async fn mock_mode_delivers_and_reports_mock_response() {
        let provider = EmailProvider::mock();
        let recipient = Recipient::new("r1", "John Compliance").with_email("john@example.com");

        let result = provider.send(&notification(), &recipient).await;

        assert_eq!(result.status, crate::notifications::types::DeliveryStatus::Delivered);
        assert_eq!(result.response_data.unwrap()["mock"], true);
    }

    #[tokio::test]
    async fn recipient_without_email_is_invalid() {
        let provider = EmailProvider::mock();
        let recipient = Recipient::new("r1", "No Email");

        assert!(!provider.validate_recipient(&recipient));
        let result = provider.send(&notification(), &recipient).await;
        assert_eq!(result.error_kind, Some(DeliveryErrorKind::InvalidRecipient));
        assert!(result.error.unwrap().contains("email"));
    }

    #[tokio::test]
    async fn inactive_recipient_is_invalid() {
        let provider = EmailProvider::mock();
        let mut recipient = Recipient::new("r1", "Gone").with_email("gone@example.com");
        recipient.active = false;

        assert!(!provider.validate_recipient(&recipient));
    }

    #[test]
    fn text_body_carries_core_fields() {
        let provider = EmailProvider::mock();
        let body = provider.format_text(&notification());

        assert!(body.contains("[HIGH]"));
        assert!(body.contains("Lead Scoring AI"));
        assert!(body.contains("Alert Type: violation"));
    }
}
