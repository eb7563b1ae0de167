//! Multi-channel notification delivery.
//!
//! Architecture:
//! 1. NotificationService: recipient/provider registries and fan-out
//! 2. Priority-aware async queue with low-priority batching
//! 3. Retry orchestration with capped exponential backoff
//! 4. Per-provider sliding-window rate limiting (inside each provider)

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::NotificationConfig;
use crate::error::{AppError, AppResult};
use crate::events::publisher::breach_percentage;
use crate::metrics;

pub mod providers;
pub mod types;

pub use providers::{ChatProvider, EmailProvider, NotificationProvider, SendMode, WebhookProvider};
pub use types::{
    DeliveryChannel, DeliveryErrorKind, DeliveryResult, DeliveryStatus, DispatchSummary,
    Notification, NotificationPriority, Recipient, SkippedDelivery,
};

/// Fixed pause before HIGH-priority sends, letting bursts micro-batch.
const HIGH_PRIORITY_DELAY: Duration = Duration::from_millis(100);
/// Queue poll timeout keeping the worker cancellable.
const QUEUE_POLL_TIMEOUT: Duration = Duration::from_millis(500);

enum QueueSender {
    Bounded(mpsc::Sender<Notification>),
    Unbounded(mpsc::UnboundedSender<Notification>),
}

impl QueueSender {
    /// A full bounded queue makes the producer wait rather than drop.
    async fn send(&self, notification: Notification) -> AppResult<()> {
        match self {
            QueueSender::Bounded(tx) => tx
                .send(notification)
                .await
                .map_err(|_| AppError::Delivery("notification queue closed".into())),
            QueueSender::Unbounded(tx) => tx
                .send(notification)
                .map_err(|_| AppError::Delivery("notification queue closed".into())),
        }
    }
}

enum QueueReceiver {
    Bounded(mpsc::Receiver<Notification>),
    Unbounded(mpsc::UnboundedReceiver<Notification>),
}

impl QueueReceiver {
    async fn recv(&mut self) -> Option<Notification> {
        match self {
            QueueReceiver::Bounded(rx) => rx.recv().await,
            QueueReceiver::Unbounded(rx) => rx.recv().await,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationStats {
    pub total_deliveries: u64,
    pub delivered: u64,
    pub failed: u64,
    pub retried: u64,
    pub queue_depth: usize,
    pub low_priority_batch_size: usize,
    pub worker_running: bool,
    pub registered_recipients: usize,
    pub registered_providers: Vec<&'static str>,
    pub status_breakdown: HashMap<String, u64>,
    pub channel_breakdown: HashMap<String, u64>,
}

/// Orchestrates notification delivery across email, chat and webhooks.
pub struct NotificationService {
    providers: RwLock<HashMap<DeliveryChannel, Arc<dyn NotificationProvider>>>,
    recipients: RwLock<HashMap<String, Recipient>>,
    queue_tx: QueueSender,
    queue_rx: Mutex<Option<QueueReceiver>>,
    queue_depth: AtomicUsize,
    low_priority_batch: Mutex<Vec<Notification>>,
    batch_size: usize,
    max_retries: u32,
    retry_delay_base: Duration,
    retry_delay_max: Duration,
    running: AtomicBool,
    worker_task: Mutex<Option<JoinHandle<()>>>,
    history: Mutex<Vec<DeliveryResult>>,
    delivered: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
}

impl NotificationService {
    pub fn new(config: &NotificationConfig) -> Self {
        let (queue_tx, queue_rx) = match config.queue_capacity {
            Some(capacity) => {
                let (tx, rx) = mpsc::channel(capacity.max(1));
                (QueueSender::Bounded(tx), QueueReceiver::Bounded(rx))
            }
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                (QueueSender::Unbounded(tx), QueueReceiver::Unbounded(rx))
            }
        };

        Self {
            providers: RwLock::new(HashMap::new()),
            recipients: RwLock::new(HashMap::new()),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            queue_depth: AtomicUsize::new(0),
            low_priority_batch: Mutex::new(Vec::new()),
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            retry_delay_base: config.retry_delay_base,
            retry_delay_max: config.retry_delay_max,
            running: AtomicBool::new(false),
            worker_task: Mutex::new(None),
            history: Mutex::new(Vec::new()),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            retried: AtomicU64::new(0),
        }
    }

    /// Service with the three standard providers wired from config.
    pub async fn with_default_providers(config: &NotificationConfig) -> AppResult<Self> {
        let service = Self::new(config);

        let email: Arc<dyn NotificationProvider> = match (&config.smtp, config.send_mode) {
            (Some(smtp), mode) => Arc::new(EmailProvider::new(smtp, mode)?),
            (None, _) => Arc::new(EmailProvider::mock()),
        };
        let chat: Arc<dyn NotificationProvider> = match (&config.chat, config.send_mode) {
            (Some(chat), mode) => Arc::new(ChatProvider::new(chat, mode)?),
            (None, _) => Arc::new(ChatProvider::mock()),
        };
        let webhook: Arc<dyn NotificationProvider> = match config.send_mode {
            SendMode::Live => Arc::new(WebhookProvider::new(&config.webhook, SendMode::Live)?),
            SendMode::Mock => Arc::new(WebhookProvider::mock()),
        };

        service.register_provider(email).await;
        service.register_provider(chat).await;
        service.register_provider(webhook).await;
        Ok(service)
    }

    pub async fn register_provider(&self, provider: Arc<dyn NotificationProvider>) {
        let channel = provider.channel();
        self.providers.write().await.insert(channel, provider);
        info!(channel = channel.as_str(), "notification provider registered");
    }

    pub async fn register_recipient(&self, recipient: Recipient) {
        info!(recipient_id = %recipient.id, name = %recipient.name, "recipient registered");
        self.recipients.write().await.insert(recipient.id.clone(), recipient);
    }

    pub async fn unregister_recipient(&self, recipient_id: &str) -> bool {
        let removed = self.recipients.write().await.remove(recipient_id).is_some();
        if removed {
            info!(%recipient_id, "recipient unregistered");
        }
        removed
    }

    pub async fn get_recipient(&self, recipient_id: &str) -> Option<Recipient> {
        self.recipients.read().await.get(recipient_id).cloned()
    }

    /// Synchronous fan-out to every targeted (recipient, channel) leg.
    ///
    /// Skips are recorded separately from failures; infrastructure trouble
    /// surfaces in the per-leg results, never as an error to the caller.
    pub async fn send_notification(&self, notification: &Notification) -> DispatchSummary {
        let mut summary = DispatchSummary {
            notification_id: notification.id.clone(),
            timestamp: Utc::now(),
            deliveries: Vec::new(),
            skipped: Vec::new(),
        };

        let recipient_ids: Vec<String> = if notification.recipients.is_empty() {
            self.recipients.read().await.keys().cloned().collect()
        } else {
            notification.recipients.clone()
        };

        let channels: Vec<DeliveryChannel> = if notification.channels.is_empty() {
            vec![DeliveryChannel::Email, DeliveryChannel::Chat]
        } else {
            notification.channels.clone()
        };

        for recipient_id in recipient_ids {
            let Some(recipient) = self.get_recipient(&recipient_id).await else {
                warn!(%recipient_id, "recipient not found");
                summary.skipped.push(SkippedDelivery {
                    recipient_id,
                    channel: None,
                    reason: "recipient not found".into(),
                });
                continue;
            };

            if !recipient.active {
                summary.skipped.push(SkippedDelivery {
                    recipient_id,
                    channel: None,
                    reason: "recipient inactive".into(),
                });
                continue;
            }

            if !recipient.accepts_alert_type(&notification.alert_type) {
                summary.skipped.push(SkippedDelivery {
                    recipient_id,
                    channel: None,
                    reason: format!("alert type '{}' not accepted", notification.alert_type),
                });
                continue;
            }

            if notification.priority != NotificationPriority::Critical
                && recipient.in_quiet_hours(notification.timestamp)
            {
                summary.skipped.push(SkippedDelivery {
                    recipient_id,
                    channel: None,
                    reason: "recipient in quiet hours".into(),
                });
                continue;
            }

            for channel in &channels {
                if !recipient.accepts_channel(*channel) {
                    summary.skipped.push(SkippedDelivery {
                        recipient_id: recipient_id.clone(),
                        channel: Some(*channel),
                        reason: "channel not accepted by recipient".into(),
                    });
                    continue;
                }

                let provider = {
                    let providers = self.providers.read().await;
                    providers.get(channel).cloned()
                };
                let Some(provider) = provider else {
                    summary.skipped.push(SkippedDelivery {
                        recipient_id: recipient_id.clone(),
                        channel: Some(*channel),
                        reason: format!("no provider registered for {}", channel.as_str()),
                    });
                    continue;
                };

                if !provider.validate_recipient(&recipient) {
                    summary.skipped.push(SkippedDelivery {
                        recipient_id: recipient_id.clone(),
                        channel: Some(*channel),
                        reason: format!("invalid recipient for {}", channel.as_str()),
                    });
                    continue;
                }

                let result = self.send_with_retry(&provider, notification, &recipient).await;
                self.record_result(&result).await;
                summary.deliveries.push(result);
            }
        }

        summary
    }

    /// Retry with capped exponential backoff. Rate-limited and
    /// invalid-recipient outcomes are terminal and burn no retries.
    async fn send_with_retry(
        &self,
        provider: &Arc<dyn NotificationProvider>,
        notification: &Notification,
        recipient: &Recipient,
    ) -> DeliveryResult {
        let mut attempt: u32 = 0;
        loop {
            let mut result = provider.send(notification, recipient).await;
            result.retry_count = attempt;

            if result.status == DeliveryStatus::Delivered {
                return result;
            }
            if matches!(
                result.error_kind,
                Some(DeliveryErrorKind::RateLimited) | Some(DeliveryErrorKind::InvalidRecipient)
            ) {
                return result;
            }
            if attempt >= self.max_retries {
                return result;
            }

            let delay = retry_delay(self.retry_delay_base, self.retry_delay_max, attempt);
            debug!(
                notification_id = %notification.id,
                recipient_id = %recipient.id,
                channel = result.channel.as_str(),
                attempt = attempt + 1,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = result.error.as_deref().unwrap_or("unknown"),
                "retrying notification delivery"
            );
            self.retried.fetch_add(1, Ordering::Relaxed);
            metrics::record_notification_retry();
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn record_result(&self, result: &DeliveryResult) {
        match result.status {
            DeliveryStatus::Delivered => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        metrics::record_delivery(result.channel.as_str(), result.status.as_str());
        self.history.lock().await.push(result.clone());
    }

    async fn enqueue(&self, notification: Notification) -> AppResult<()> {
        self.queue_tx.send(notification).await?;
        self.queue_depth.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Queue a notification for the worker. LOW priority buffers into the
    /// batch and flushes as a block once `batch_size` is reached.
    pub async fn queue_notification(&self, notification: Notification) -> AppResult<String> {
        let id = notification.id.clone();

        if notification.priority == NotificationPriority::Low {
            let flushed = {
                let mut batch = self.low_priority_batch.lock().await;
                batch.push(notification);
                if batch.len() >= self.batch_size {
                    Some(batch.drain(..).collect::<Vec<_>>())
                } else {
                    None
                }
            };
            if let Some(items) = flushed {
                debug!(count = items.len(), "flushing low-priority batch to queue");
                for item in items {
                    self.enqueue(item).await?;
                }
            }
            return Ok(id);
        }

        self.enqueue(notification).await?;
        Ok(id)
    }

    /// Start the single background consumer.
    pub async fn start_worker(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("notification worker already running");
            return;
        }
        let Some(mut rx) = self.queue_rx.lock().await.take() else {
            warn!("notification queue receiver already consumed");
            return;
        };

        let service = Arc::clone(self);
        let handle = tokio::spawn(async move {
            info!("notification worker started");
            while service.running.load(Ordering::SeqCst) {
                let notification =
                    match tokio::time::timeout(QUEUE_POLL_TIMEOUT, rx.recv()).await {
                        Err(_) => continue, // poll timeout keeps the loop cancellable
                        Ok(None) => break,
                        Ok(Some(notification)) => notification,
                    };
                service.queue_depth.fetch_sub(1, Ordering::SeqCst);

                match notification.priority {
                    NotificationPriority::Critical => {
                        service.send_notification(&notification).await;
                    }
                    NotificationPriority::High => {
                        tokio::time::sleep(HIGH_PRIORITY_DELAY).await;
                        service.send_notification(&notification).await;
                    }
                    _ => {
                        service.send_notification(&notification).await;
                    }
                }
            }
            info!("notification worker exited");
        });
        *self.worker_task.lock().await = Some(handle);
    }

    /// Drain the pending low-priority batch into the queue, then cancel the
    /// consumer.
    pub async fn stop_worker(&self) {
        self.running.store(false, Ordering::SeqCst);

        let drained: Vec<Notification> = {
            let mut batch = self.low_priority_batch.lock().await;
            batch.drain(..).collect()
        };
        if !drained.is_empty() {
            debug!(count = drained.len(), "draining low-priority batch on shutdown");
            for item in drained {
                let _ = self.enqueue(item).await;
            }
        }

        if let Some(handle) = self.worker_task.lock().await.take() {
            handle.abort();
        }
        info!("notification worker stopped");
    }

    pub async fn send_violation_alert(
        &self,
        model_id: &str,
        model_name: &str,
        violation: &Map<String, Value>,
        recipients: Vec<String>,
    ) -> DispatchSummary {
        let severity = violation
            .get("severity")
            .and_then(|v| v.as_str())
            .unwrap_or("medium");
        let priority = match severity {
            "critical" => NotificationPriority::Critical,
            "high" => NotificationPriority::High,
            "medium" => NotificationPriority::Medium,
            "low" | "informational" => NotificationPriority::Low,
            _ => NotificationPriority::Medium,
        };

        let title = violation
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or("Policy Violation");
        let message = violation
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or("A compliance violation has been detected.");

        let notification = Notification::new(
            format!("Compliance Violation: {title}"),
            message,
            priority,
            "violation",
        )
        .with_model(model_id, model_name)
        .with_regulation(
            violation
                .get("regulation")
                .and_then(|v| v.as_str())
                .map(String::from),
        )
        .with_data(violation.clone())
        .with_recipients(recipients);

        self.send_notification(&notification).await
    }

    pub async fn send_threshold_breach_alert(
        &self,
        model_id: &str,
        model_name: &str,
        metric: &str,
        value: f64,
        threshold: f64,
        recipients: Vec<String>,
        regulation: Option<String>,
    ) -> DispatchSummary {
        let breach_pct = breach_percentage(value, threshold);
        let priority = breach_priority(breach_pct);

        let mut data = Map::new();
        data.insert("metric".into(), metric.into());
        data.insert("value".into(), value.into());
        data.insert("threshold".into(), threshold.into());
        data.insert("breach_percentage".into(), breach_pct.into());

        let notification = Notification::new(
            format!("Threshold Breach: {metric}"),
            format!(
                "The metric '{metric}' has breached its threshold.\n\n\
                 Current Value: {value:.2}\nThreshold: {threshold:.2}\nBreach: {breach_pct:.1}%"
            ),
            priority,
            "threshold_breach",
        )
        .with_model(model_id, model_name)
        .with_regulation(regulation)
        .with_data(data)
        .with_recipients(recipients);

        self.send_notification(&notification).await
    }

    pub async fn send_certification_expiry_alert(
        &self,
        certification_name: &str,
        expiry_date: DateTime<Utc>,
        days_remaining: i64,
        recipients: Vec<String>,
        regulation: Option<String>,
    ) -> DispatchSummary {
        let priority = expiry_priority(days_remaining);

        let mut data = Map::new();
        data.insert("certification_name".into(), certification_name.into());
        data.insert("expiry_date".into(), expiry_date.to_rfc3339().into());
        data.insert("days_remaining".into(), days_remaining.into());

        let notification = Notification::new(
            format!("Certification Expiring: {certification_name}"),
            format!(
                "The certification '{certification_name}' will expire in {days_remaining} days.\n\n\
                 Expiry Date: {}\n\nPlease initiate renewal to maintain compliance.",
                expiry_date.format("%Y-%m-%d")
            ),
            priority,
            "certification_expiry",
        )
        .with_regulation(regulation)
        .with_data(data)
        .with_recipients(recipients);

        self.send_notification(&notification).await
    }

    /// Delivery history with optional filters, most recent last.
    pub async fn get_delivery_history(
        &self,
        notification_id: Option<&str>,
        recipient_id: Option<&str>,
        channel: Option<DeliveryChannel>,
        status: Option<DeliveryStatus>,
        limit: usize,
    ) -> Vec<DeliveryResult> {
        let history = self.history.lock().await;
        let filtered: Vec<DeliveryResult> = history
            .iter()
            .filter(|r| notification_id.map_or(true, |id| r.notification_id == id))
            .filter(|r| recipient_id.map_or(true, |id| r.recipient_id == id))
            .filter(|r| channel.map_or(true, |c| r.channel == c))
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        let skip = filtered.len().saturating_sub(limit);
        filtered.into_iter().skip(skip).collect()
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::SeqCst)
    }

    pub async fn get_stats(&self) -> NotificationStats {
        let history = self.history.lock().await;
        let mut status_breakdown: HashMap<String, u64> = HashMap::new();
        let mut channel_breakdown: HashMap<String, u64> = HashMap::new();
        for result in history.iter() {
            *status_breakdown
                .entry(result.status.as_str().to_string())
                .or_default() += 1;
            *channel_breakdown
                .entry(result.channel.as_str().to_string())
                .or_default() += 1;
        }
        let total_deliveries = history.len() as u64;
        drop(history);

        let registered_providers = {
            let providers = self.providers.read().await;
            providers.keys().map(|c| c.as_str()).collect()
        };

        NotificationStats {
            total_deliveries,
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            queue_depth: self.queue_depth(),
            low_priority_batch_size: self.low_priority_batch.lock().await.len(),
            worker_running: self.running.load(Ordering::SeqCst),
            registered_recipients: self.recipients.read().await.len(),
            registered_providers,
            status_breakdown,
            channel_breakdown,
        }
    }
}

/// Capped exponential backoff: `min(base * 2^attempt, max)`.
pub fn retry_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.min(16));
    base.saturating_mul(factor).min(max)
}

/// Breach magnitude to priority: >=50% critical, >=25% high, >=10% medium.
pub fn breach_priority(breach_pct: f64) -> NotificationPriority {
    if breach_pct >= 50.0 {
        NotificationPriority::Critical
    } else if breach_pct >= 25.0 {
        NotificationPriority::High
    } else if breach_pct >= 10.0 {
        NotificationPriority::Medium
    } else {
        NotificationPriority::Low
    }
}

/// Days to expiry to priority: <=7 critical, <=30 high, <=60 medium.
pub fn expiry_priority(days_remaining: i64) -> NotificationPriority {
    if days_remaining <= 7 {
        NotificationPriority::Critical
    } else if days_remaining <= 30 {
        NotificationPriority::High
    } else if days_remaining <= 60 {
        NotificationPriority::Medium
    } else {
        NotificationPriority::Low
    }
}
