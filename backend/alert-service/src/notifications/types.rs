use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Delivery medium for one notification leg.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryChannel {
    Email,
    Chat,
    Webhook,
}

impl DeliveryChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryChannel::Email => "email",
            DeliveryChannel::Chat => "chat",
            DeliveryChannel::Webhook => "webhook",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl NotificationPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationPriority::Critical => "critical",
            NotificationPriority::High => "high",
            NotificationPriority::Medium => "medium",
            NotificationPriority::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Queued,
    Sending,
    Delivered,
    Failed,
    Retrying,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Queued => "queued",
            DeliveryStatus::Sending => "sending",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Retrying => "retrying",
        }
    }
}

/// Failure classification the retry loop keys off.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryErrorKind {
    /// Channel window exhausted; terminal for this attempt, no retries burned.
    RateLimited,
    /// Recipient lacks the contact field for the channel; terminal.
    InvalidRecipient,
    /// Provider rejected or timed out; retryable.
    Provider,
    /// Transport-level failure before the provider answered; retryable.
    Transport,
}

/// Daily do-not-disturb window in UTC hours; may wrap midnight.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuietHours {
    pub start_hour: u8,
    pub end_hour: u8,
}

impl QuietHours {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let hour = at.hour() as u8;
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RecipientPreferences {
    /// Accepted delivery channels; empty means all.
    #[serde(default)]
    pub channels: Vec<DeliveryChannel>,
    /// Accepted alert types; empty means all.
    #[serde(default)]
    pub alert_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiet_hours: Option<QuietHours>,
}

fn default_active() -> bool {
    true
}

/// A human destination with per-channel contact fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recipient {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub preferences: RecipientPreferences,
}

impl Recipient {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: None,
            chat_handle: None,
            chat_channel: None,
            webhook_url: None,
            active: true,
            preferences: RecipientPreferences::default(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_chat(mut self, handle: impl Into<String>) -> Self {
        self.chat_handle = Some(handle.into());
        self
    }

    pub fn with_webhook(mut self, url: impl Into<String>) -> Self {
        self.webhook_url = Some(url.into());
        self
    }

    pub fn accepts_channel(&self, channel: DeliveryChannel) -> bool {
        self.preferences.channels.is_empty() || self.preferences.channels.contains(&channel)
    }

    pub fn accepts_alert_type(&self, alert_type: &str) -> bool {
        self.preferences.alert_types.is_empty()
            || self.preferences.alert_types.iter().any(|t| t == alert_type)
    }

    pub fn in_quiet_hours(&self, at: DateTime<Utc>) -> bool {
        self.preferences
            .quiet_hours
            .map_or(false, |window| window.contains(at))
    }
}

/// One outbound notification request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub message: String,
    pub priority: NotificationPriority,
    pub alert_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regulation: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Target delivery channels; empty falls back to email + chat.
    #[serde(default)]
    pub channels: Vec<DeliveryChannel>,
    /// Target recipient ids; empty fans out to every registered recipient.
    #[serde(default)]
    pub recipients: Vec<String>,
}

impl Notification {
    pub fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        priority: NotificationPriority,
        alert_type: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            message: message.into(),
            priority,
            alert_type: alert_type.into(),
            model_id: None,
            model_name: None,
            regulation: None,
            timestamp: Utc::now(),
            data: Map::new(),
            channels: Vec::new(),
            recipients: Vec::new(),
        }
    }

    pub fn with_model(mut self, model_id: impl Into<String>, model_name: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self.model_name = Some(model_name.into());
        self
    }

    pub fn with_regulation(mut self, regulation: Option<String>) -> Self {
        self.regulation = regulation;
        self
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    pub fn with_channels(mut self, channels: Vec<DeliveryChannel>) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_recipients(mut self, recipients: Vec<String>) -> Self {
        self.recipients = recipients;
        self
    }
}

/// Outcome of one delivery attempt chain for a
/// (notification, recipient, channel) triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub notification_id: String,
    pub recipient_id: String,
    pub channel: DeliveryChannel,
    pub status: DeliveryStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<DeliveryErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_data: Option<Value>,
    pub retry_count: u32,
}

impl DeliveryResult {
    pub fn pending(notification: &Notification, recipient: &Recipient, channel: DeliveryChannel) -> Self {
        Self {
            notification_id: notification.id.clone(),
            recipient_id: recipient.id.clone(),
            channel,
            status: DeliveryStatus::Pending,
            timestamp: Utc::now(),
            error: None,
            error_kind: None,
            response_data: None,
            retry_count: 0,
        }
    }

    pub fn delivered(mut self, response_data: Value) -> Self {
        self.status = DeliveryStatus::Delivered;
        self.response_data = Some(response_data);
        self
    }

    pub fn failed(mut self, kind: DeliveryErrorKind, error: impl Into<String>) -> Self {
        self.status = DeliveryStatus::Failed;
        self.error_kind = Some(kind);
        self.error = Some(error.into());
        self
    }
}

/// A (recipient, channel) leg the fan-out skipped rather than attempted.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedDelivery {
    pub recipient_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<DeliveryChannel>,
    pub reason: String,
}

/// What one `send_notification` call did, per leg.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchSummary {
    pub notification_id: String,
    pub timestamp: DateTime<Utc>,
    pub deliveries: Vec<DeliveryResult>,
    pub skipped: Vec<SkippedDelivery>,
}

impl DispatchSummary {
    pub fn delivered_count(&self) -> usize {
        self.deliveries
            .iter()
            .filter(|d| d.status == DeliveryStatus::Delivered)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.deliveries
            .iter()
            .filter(|d| d.status == DeliveryStatus::Failed)
            .count()
    }
}
