use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use redis::AsyncCommands;
use redis_utils::{with_timeout, RedisPool, SharedConnectionManager};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::Config;
use crate::events::event::{Event, EventType};
use crate::metrics;

/// Score delta considered significant for dashboards.
const SIGNIFICANT_SCORE_DELTA: f64 = 5.0;
/// Compliance score watermark whose crossing is flagged on score changes.
const SCORE_WATERMARK: f64 = 70.0;
/// Relative deviation at which a threshold breach is flagged critical.
const CRITICAL_BREACH_PCT: f64 = 20.0;

#[derive(Debug, Clone, Serialize)]
pub struct PublisherMetrics {
    pub events_published: u64,
    pub events_failed: u64,
    pub reconnections: u64,
    pub connected: bool,
}

struct PublisherState {
    manager: Option<SharedConnectionManager>,
    connected: bool,
}

/// Publishes events to the pub/sub transport.
///
/// Degrade-not-crash: with the transport down, `publish` logs the event,
/// bumps the failure counter and reports 0 recipients. Event loss is
/// acceptable here, process death is not.
pub struct EventPublisher {
    redis_url: String,
    prefix: String,
    retry_attempts: u32,
    retry_delay: Duration,
    state: Mutex<PublisherState>,
    events_published: AtomicU64,
    events_failed: AtomicU64,
    reconnections: AtomicU64,
}

impl EventPublisher {
    pub fn new(redis_url: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            redis_url: redis_url.into(),
            prefix: prefix.into(),
            retry_attempts: 3,
            retry_delay: Duration::from_millis(500),
            state: Mutex::new(PublisherState {
                manager: None,
                connected: false,
            }),
            events_published: AtomicU64::new(0),
            events_failed: AtomicU64::new(0),
            reconnections: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut publisher = Self::new(config.redis_url.clone(), config.channel_prefix.clone());
        publisher.retry_attempts = config.publish_retry_attempts.max(1);
        publisher.retry_delay = config.publish_retry_delay;
        publisher
    }

    /// Establish the pooled transport connection. Returns false on failure,
    /// after which the publisher operates in fallback mode.
    pub async fn connect(&self) -> bool {
        let mut state = self.state.lock().await;
        self.connect_locked(&mut state).await
    }

    async fn connect_locked(&self, state: &mut PublisherState) -> bool {
        match RedisPool::connect(&self.redis_url).await {
            Ok(pool) => {
                if state.manager.is_some() {
                    self.reconnections.fetch_add(1, Ordering::Relaxed);
                    metrics::record_bus_reconnection();
                }
                state.manager = Some(pool.manager());
                state.connected = true;
                true
            }
            Err(e) => {
                warn!(error = %e, "event bus publisher could not connect; entering fallback mode");
                state.connected = false;
                false
            }
        }
    }

    async fn ensure_connected(&self, state: &mut PublisherState) -> bool {
        if state.connected && state.manager.is_some() {
            return true;
        }
        self.connect_locked(state).await
    }

    /// Publish the event to its resolved channel and the reserved `all`
    /// channel. Returns the transport-reported subscriber count, or 0 on
    /// total failure. Never raises to the caller.
    pub async fn publish(&self, event: &Event) -> u64 {
        let payload = match event.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(event_id = %event.event_id, error = %e, "dropping unserializable event");
                self.record_failure();
                return 0;
            }
        };
        let channel = event.channel(&self.prefix);
        let all_channel = Event::all_channel(&self.prefix);

        let mut state = self.state.lock().await;
        if !self.ensure_connected(&mut state).await {
            info!(
                event_id = %event.event_id,
                event_type = event.event_type.as_str(),
                %channel,
                "event bus unavailable, event logged only"
            );
            self.record_failure();
            return 0;
        }

        for attempt in 1..=self.retry_attempts {
            let Some(manager) = state.manager.clone() else {
                break;
            };
            match self.send_once(&manager, &channel, &all_channel, &payload).await {
                Ok(recipients) => {
                    self.events_published.fetch_add(1, Ordering::Relaxed);
                    metrics::record_event_published();
                    return recipients;
                }
                Err(e) => {
                    warn!(
                        event_id = %event.event_id,
                        attempt,
                        max_attempts = self.retry_attempts,
                        error = %e,
                        "event publish attempt failed"
                    );
                    state.connected = false;
                    if attempt < self.retry_attempts {
                        tokio::time::sleep(self.retry_delay).await;
                        if !self.ensure_connected(&mut state).await {
                            break;
                        }
                    }
                }
            }
        }

        self.record_failure();
        0
    }

    async fn send_once(
        &self,
        manager: &SharedConnectionManager,
        channel: &str,
        all_channel: &str,
        payload: &str,
    ) -> Result<u64, String> {
        let mut conn = manager.lock().await;
        let typed: i64 = with_timeout(conn.publish(channel, payload))
            .await
            .map_err(|e| e.to_string())?
            .map_err(|e| e.to_string())?;
        let all: i64 = with_timeout(conn.publish(all_channel, payload))
            .await
            .map_err(|e| e.to_string())?
            .map_err(|e| e.to_string())?;
        Ok((typed + all).max(0) as u64)
    }

    fn record_failure(&self) {
        self.events_failed.fetch_add(1, Ordering::Relaxed);
        metrics::record_event_failed();
    }

    pub async fn publish_violation(
        &self,
        model_id: &str,
        model_name: &str,
        violation: Map<String, Value>,
    ) -> Event {
        let event = Event::new(EventType::ViolationDetected, "compliance_engine")
            .with_model(model_id, model_name)
            .with_payload(violation);
        self.publish(&event).await;
        event
    }

    pub async fn publish_score_change(
        &self,
        model_id: &str,
        model_name: &str,
        old_score: f64,
        new_score: f64,
    ) -> Event {
        let (significant, crossed) = score_change_flags(old_score, new_score);
        let mut payload = Map::new();
        payload.insert("old_score".into(), old_score.into());
        payload.insert("new_score".into(), new_score.into());
        payload.insert("change".into(), (new_score - old_score).into());
        payload.insert("significant_change".into(), significant.into());
        payload.insert("threshold_crossed".into(), crossed.into());

        let event = Event::new(EventType::ScoreChanged, "compliance_engine")
            .with_model(model_id, model_name)
            .with_payload(payload);
        self.publish(&event).await;
        event
    }

    pub async fn publish_threshold_breach(
        &self,
        model_id: &str,
        model_name: &str,
        metric: &str,
        value: f64,
        threshold: f64,
    ) -> Event {
        let breach_pct = breach_percentage(value, threshold);
        let mut payload = Map::new();
        payload.insert("metric".into(), metric.into());
        payload.insert("value".into(), value.into());
        payload.insert("threshold".into(), threshold.into());
        payload.insert("breach_percentage".into(), breach_pct.into());
        payload.insert("critical".into(), (breach_pct >= CRITICAL_BREACH_PCT).into());

        let event = Event::new(EventType::ThresholdBreach, "monitoring_manager")
            .with_model(model_id, model_name)
            .with_payload(payload);
        self.publish(&event).await;
        event
    }

    pub async fn publish_assessment_completed(
        &self,
        model_id: &str,
        model_name: &str,
        assessment: Map<String, Value>,
    ) -> Event {
        let event = Event::new(EventType::AssessmentCompleted, "compliance_engine")
            .with_model(model_id, model_name)
            .with_payload(assessment);
        self.publish(&event).await;
        event
    }

    pub async fn publish_certification_expiring(
        &self,
        certification_name: &str,
        days_remaining: i64,
    ) -> Event {
        let mut payload = Map::new();
        payload.insert("certification_name".into(), certification_name.into());
        payload.insert("days_remaining".into(), days_remaining.into());

        let event = Event::new(EventType::CertificationExpiring, "compliance_engine")
            .with_payload(payload);
        self.publish(&event).await;
        event
    }

    pub async fn get_metrics(&self) -> PublisherMetrics {
        let state = self.state.lock().await;
        PublisherMetrics {
            events_published: self.events_published.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
            reconnections: self.reconnections.load(Ordering::Relaxed),
            connected: state.connected,
        }
    }
}

/// Relative deviation of `value` from `threshold`, in percent.
pub fn breach_percentage(value: f64, threshold: f64) -> f64 {
    if threshold == 0.0 {
        return 100.0;
    }
    (value - threshold).abs() / threshold.abs() * 100.0
}

/// (significant_change, threshold_crossed) flags for a score movement.
pub fn score_change_flags(old_score: f64, new_score: f64) -> (bool, bool) {
    let significant = (new_score - old_score).abs() >= SIGNIFICANT_SCORE_DELTA;
    let crossed = (old_score < SCORE_WATERMARK) != (new_score < SCORE_WATERMARK);
    (significant, crossed)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Unroutable loopback port: connection refused fast, no network needed.
    const DEAD_REDIS: &str = "redis://127.0.0.1:1/0";

    #[test]
    fn breach_percentage_uses_absolute_deviation() {
        let pct = breach_percentage(55.0, 70.0);
        assert!((pct - 21.428).abs() < 0.01);
        assert!(pct >= CRITICAL_BREACH_PCT);

        assert!((breach_percentage(84.0, 70.0) - 20.0).abs() < f64::EPSILON);
        assert_eq!(breach_percentage(5.0, 0.0), 100.0);
    }

    #[test]
    fn score_change_flags_detect_delta_and_crossing() {
        // |delta| >= 5 is significant
        assert_eq!(score_change_flags(60.0, 66.0), (true, false));
        assert_eq!(score_change_flags(60.0, 63.0), (false, false));
        // crossing 70 in either direction
        assert_eq!(score_change_flags(69.0, 71.0), (false, true));
        assert_eq!(score_change_flags(72.0, 68.0), (false, true));
        assert_eq!(score_change_flags(65.0, 75.0), (true, true));
    }

    #[tokio::test]
    async fn publish_without_transport_falls_back_and_counts() {
        let publisher = EventPublisher::new(DEAD_REDIS, "compliance");
        let event = Event::new(EventType::AssessmentCompleted, "test");

        let recipients = publisher.publish(&event).await;

        assert_eq!(recipients, 0);
        let metrics = publisher.get_metrics().await;
        assert_eq!(metrics.events_failed, 1);
        assert_eq!(metrics.events_published, 0);
        assert!(!metrics.connected);
    }

    #[tokio::test]
    async fn connect_failure_reports_false() {
        let publisher = EventPublisher::new(DEAD_REDIS, "compliance");
        assert!(!publisher.connect().await);
    }

    #[tokio::test]
    async fn threshold_breach_builder_flags_critical() {
        let publisher = EventPublisher::new(DEAD_REDIS, "compliance");

        let event = publisher
            .publish_threshold_breach("model_002", "Customer Analytics AI", "compliance_score", 55.0, 70.0)
            .await;

        assert_eq!(event.event_type, EventType::ThresholdBreach);
        let pct = event.payload["breach_percentage"].as_f64().unwrap();
        assert!((pct - 21.428).abs() < 0.01);
        assert_eq!(event.payload["critical"], true);
    }

    #[tokio::test]
    async fn score_change_builder_carries_flags() {
        let publisher = EventPublisher::new(DEAD_REDIS, "compliance");

        let event = publisher
            .publish_score_change("model_001", "Lead Scoring AI", 72.0, 65.0)
            .await;

        assert_eq!(event.payload["significant_change"], true);
        assert_eq!(event.payload["threshold_crossed"], true);
        assert_eq!(event.payload["change"], -7.0);
    }

    #[tokio::test]
    async fn violation_builder_targets_the_violations_channel() {
        let publisher = EventPublisher::new(DEAD_REDIS, "compliance");
        let mut violation = Map::new();
        violation.insert("severity".into(), "high".into());
        violation.insert("regulation".into(), "gdpr".into());

        let event = publisher
            .publish_violation("model_001", "Lead Scoring AI", violation)
            .await;

        assert_eq!(event.channel("compliance"), "compliance:violations");
        assert_eq!(event.model_id.as_deref(), Some("model_001"));
    }
}
