//! Delivery providers, one per channel, behind a common trait.

use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::notifications::types::{DeliveryChannel, DeliveryResult, Notification, Recipient};

pub mod chat;
pub mod email;
pub mod webhook;

pub use chat::ChatProvider;
pub use email::EmailProvider;
pub use webhook::WebhookProvider;

/// Constructor-level sending strategy: Mock logs and reports success, Live
/// talks to the real endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    Mock,
    Live,
}

/// Sliding-window request counter, one per provider.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    window_start: Instant,
    requests_in_window: u32,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            window_start: Instant::now(),
            requests_in_window: 0,
        }
    }

    /// Whether another request fits the current window. Resets the window
    /// once its duration has fully elapsed.
    pub fn check(&mut self) -> bool {
        if self.window_start.elapsed() > self.window {
            self.window_start = Instant::now();
            self.requests_in_window = 0;
            return true;
        }
        self.requests_in_window < self.max_requests
    }

    pub fn record(&mut self) {
        self.requests_in_window += 1;
    }

    pub fn current(&self) -> (u32, u32) {
        (self.requests_in_window, self.max_requests)
    }
}

/// One delivery medium. Implementations enforce their own rate limit and
/// never panic; failures come back inside the `DeliveryResult`.
#[async_trait]
pub trait NotificationProvider: Send + Sync {
    fn channel(&self) -> DeliveryChannel;

    /// Whether the recipient has the contact fields this channel needs.
    fn validate_recipient(&self, recipient: &Recipient) -> bool;

    async fn send(&self, notification: &Notification, recipient: &Recipient) -> DeliveryResult;
}

/// Subject/headline shared by the providers.
pub(crate) fn format_headline(notification: &Notification) -> String {
    let mut headline = format!(
        "[{}] {}",
        notification.priority.as_str().to_uppercase(),
        notification.title
    );
    if let Some(regulation) = &notification.regulation {
        headline.push_str(&format!(" [{}]", regulation.to_uppercase()));
    }
    headline
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::types::NotificationPriority;

    #[test]
    fn rate_limiter_rejects_above_the_window_cap() {
        let mut limiter = RateLimiter::new(3, Duration::from_secs(60));

        for _ in 0..3 {
            assert!(limiter.check());
            limiter.record();
        }
        assert!(!limiter.check());
        assert_eq!(limiter.current(), (3, 3));
    }

    #[test]
    fn rate_limiter_resets_after_the_window_elapses() {
        let mut limiter = RateLimiter::new(1, Duration::from_millis(20));

        assert!(limiter.check());
        limiter.record();
        assert!(!limiter.check());

        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.check());
        limiter.record();
        assert!(!limiter.check());
    }

    #[test]
    fn headline_carries_priority_and_regulation() {
        let notification = Notification::new(
            "Compliance Violation",
            "detected",
            NotificationPriority::Critical,
            "violation",
        )
        .with_regulation(Some("gdpr".into()));

        let headline = format_headline(&notification);
        assert_eq!(headline, "[CRITICAL] Compliance Violation [GDPR]");
    }
}
