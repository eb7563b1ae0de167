use dotenvy::dotenv;
use std::env;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::notifications::providers::SendMode;

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_address: String,
    pub from_name: String,
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub webhook_url: String,
    pub default_channel: String,
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub default_url: Option<String>,
    pub auth_header: Option<String>,
    pub auth_value: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub max_retries: u32,
    pub retry_delay_base: Duration,
    pub retry_delay_max: Duration,
    pub batch_size: usize,
    /// None keeps the queue unbounded; Some(n) applies backpressure at n.
    pub queue_capacity: Option<usize>,
    pub send_mode: SendMode,
    pub smtp: Option<SmtpConfig>,
    pub chat: Option<ChatConfig>,
    pub webhook: WebhookConfig,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub redis_url: String,
    pub channel_prefix: String,
    pub heartbeat_interval: Duration,
    pub alert_history_limit: usize,
    pub publish_retry_attempts: u32,
    pub publish_retry_delay: Duration,
    pub reconnect_delay_seed: Duration,
    pub max_reconnect_delay: Duration,
    pub notifications: NotificationConfig,
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        dotenv().ok();

        let port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8080);
        let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let channel_prefix = env::var("EVENT_CHANNEL_PREFIX").unwrap_or_else(|_| "compliance".into());

        let send_mode = match env::var("NOTIFICATION_MODE").as_deref() {
            Ok("live") => SendMode::Live,
            Ok("mock") | Err(_) => SendMode::Mock,
            Ok(other) => {
                return Err(AppError::Config(format!(
                    "NOTIFICATION_MODE must be 'mock' or 'live', got '{other}'"
                )))
            }
        };

        let smtp = match env::var("SMTP_HOST") {
            Ok(host) if !host.trim().is_empty() => Some(SmtpConfig {
                host,
                port: env_u64("SMTP_PORT", 587) as u16,
                username: env::var("SMTP_USERNAME").ok(),
                password: env::var("SMTP_PASSWORD").ok(),
                from_address: env::var("SMTP_FROM_ADDRESS")
                    .unwrap_or_else(|_| "compliance@leadguard.dev".into()),
                from_name: env::var("SMTP_FROM_NAME")
                    .unwrap_or_else(|_| "Compliance Platform".into()),
            }),
            _ => None,
        };

        let chat = match env::var("CHAT_WEBHOOK_URL") {
            Ok(url) if !url.trim().is_empty() => Some(ChatConfig {
                webhook_url: url,
                default_channel: env::var("CHAT_DEFAULT_CHANNEL")
                    .unwrap_or_else(|_| "#compliance-alerts".into()),
            }),
            _ => None,
        };

        let webhook = WebhookConfig {
            default_url: env::var("WEBHOOK_DEFAULT_URL").ok().filter(|v| !v.is_empty()),
            auth_header: env::var("WEBHOOK_AUTH_HEADER").ok().filter(|v| !v.is_empty()),
            auth_value: env::var("WEBHOOK_AUTH_VALUE").ok().filter(|v| !v.is_empty()),
        };

        Ok(Self {
            port,
            redis_url,
            channel_prefix,
            heartbeat_interval: Duration::from_secs(env_u64("HEARTBEAT_INTERVAL_SECS", 30)),
            alert_history_limit: env_u64("ALERT_HISTORY_LIMIT", 100) as usize,
            publish_retry_attempts: env_u64("PUBLISH_RETRY_ATTEMPTS", 3) as u32,
            publish_retry_delay: Duration::from_millis(env_u64("PUBLISH_RETRY_DELAY_MS", 500)),
            reconnect_delay_seed: Duration::from_secs(env_u64("RECONNECT_DELAY_SEED_SECS", 1)),
            max_reconnect_delay: Duration::from_secs(env_u64("MAX_RECONNECT_DELAY_SECS", 30)),
            notifications: NotificationConfig {
                max_retries: env_u64("NOTIFY_MAX_RETRIES", 3) as u32,
                retry_delay_base: Duration::from_millis(env_u64("NOTIFY_RETRY_BASE_MS", 1000)),
                retry_delay_max: Duration::from_millis(env_u64("NOTIFY_RETRY_MAX_MS", 60_000)),
                batch_size: env_u64("NOTIFY_BATCH_SIZE", 10) as usize,
                queue_capacity: env::var("NOTIFY_QUEUE_CAPACITY")
                    .ok()
                    .and_then(|v| v.parse().ok()),
                send_mode,
                smtp,
                chat,
                webhook,
            },
        })
    }

    #[cfg(test)]
    pub fn test_defaults() -> Self {
        Self {
            port: 8080,
            redis_url: "redis://127.0.0.1:6379/0".into(),
            channel_prefix: "compliance".into(),
            heartbeat_interval: Duration::from_secs(30),
            alert_history_limit: 100,
            publish_retry_attempts: 3,
            publish_retry_delay: Duration::from_millis(10),
            reconnect_delay_seed: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            notifications: NotificationConfig {
                max_retries: 3,
                retry_delay_base: Duration::from_millis(1),
                retry_delay_max: Duration::from_millis(10),
                batch_size: 10,
                queue_capacity: None,
                send_mode: SendMode::Mock,
                smtp: None,
                chat: None,
                webhook: WebhookConfig {
                    default_url: None,
                    auth_header: None,
                    auth_value: None,
                },
            },
        }
    }
}
