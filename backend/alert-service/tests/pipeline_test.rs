//! End-to-end coverage of the alert distribution pipeline using in-process
//! channels and mock-mode providers.

use std::sync::Arc;
use std::time::Duration;

use alert_service::config::{NotificationConfig, WebhookConfig};
use alert_service::events::{Event, EventPublisher, EventType};
use alert_service::models::{Alert, AlertSeverity, AlertType};
use alert_service::notifications::{
    DeliveryChannel, NotificationPriority, NotificationService, Recipient, SendMode,
};
use alert_service::websocket::{ConnectionManager, ServerMessage};
use tokio::sync::mpsc;

fn notification_config() -> NotificationConfig {
    NotificationConfig {
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
    }
}

fn critical_alert() -> Alert {
    Alert::new(
        AlertType::ThresholdBreach,
        AlertSeverity::Critical,
        "Critical Risk Score Exceeded",
        "AI model risk score exceeded critical threshold",
    )
    .with_model("model_002", "Customer Analytics AI")
    .with_regulation("eu_ai_act")
}

#[tokio::test]
async fn critical_broadcast_skips_high_only_subscriber() {
    let manager = ConnectionManager::new(Duration::from_secs(30), 100);

    let mut receivers = Vec::new();
    for i in 0..3 {
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.connect(format!("client_{i}"), tx).await;
        rx.recv().await.unwrap(); // welcome envelope
        receivers.push(rx);
    }
    manager
        .subscribe("client_2", &[], &[], &[AlertSeverity::High], &[])
        .await;
    receivers[2].recv().await.unwrap(); // subscription echo

    let recipients = manager.broadcast_alert(critical_alert()).await;

    assert_eq!(recipients, 2);
    for rx in receivers.iter_mut().take(2) {
        assert!(matches!(rx.try_recv().unwrap(), ServerMessage::Alert { .. }));
    }
    assert!(receivers[2].try_recv().is_err());
}

#[tokio::test]
async fn reconnect_with_same_client_id_leaves_one_connection() {
    let manager = ConnectionManager::new(Duration::from_secs(30), 100);

    let (tx1, mut rx1) = mpsc::unbounded_channel();
    manager.connect("dashboard", tx1).await;
    rx1.recv().await.unwrap();
    manager
        .subscribe("dashboard", &[], &[], &[AlertSeverity::Critical], &[])
        .await;
    rx1.recv().await.unwrap(); // subscription echo

    // client reconnects under the same id
    let (tx2, mut rx2) = mpsc::unbounded_channel();
    manager.connect("dashboard", tx2).await;
    rx2.recv().await.unwrap();

    assert_eq!(manager.active_connections_count().await, 1);
    // the replacement starts with fresh, empty filters
    let info = manager.get_connection_info("dashboard").await.unwrap();
    assert!(info.subscriptions.severities.is_empty());
    // old channel is closed
    assert!(rx1.recv().await.is_none());
}

#[tokio::test]
async fn publisher_without_transport_degrades_and_counts_failures() {
    let publisher = EventPublisher::new("redis://127.0.0.1:1/0", "compliance");
    let event = Event::new(EventType::ThresholdBreach, "monitoring_manager");

    let recipients = publisher.publish(&event).await;

    assert_eq!(recipients, 0);
    let metrics = publisher.get_metrics().await;
    assert_eq!(metrics.events_failed, 1);
    assert!(!metrics.connected);
}

#[tokio::test]
async fn breach_event_payload_matches_expected_percentages() {
    let publisher = EventPublisher::new("redis://127.0.0.1:1/0", "compliance");

    let event = publisher
        .publish_threshold_breach("model_002", "Customer Analytics AI", "compliance_score", 55.0, 70.0)
        .await;

    let pct = event.payload["breach_percentage"].as_f64().unwrap();
    assert!((pct - 21.4).abs() < 0.1);
    assert_eq!(event.payload["critical"], true);
    assert_eq!(event.channel("compliance"), "compliance:thresholds");
}

#[tokio::test]
async fn notification_pipeline_delivers_through_mock_providers() {
    let service = Arc::new(
        NotificationService::with_default_providers(&notification_config())
            .await
            .unwrap(),
    );

    let mut recipient = Recipient::new("compliance_officer", "John Compliance")
        .with_email("john.compliance@example.com");
    recipient.chat_channel = Some("#compliance-alerts".into());
    recipient.preferences.channels = vec![DeliveryChannel::Email, DeliveryChannel::Chat];
    recipient.preferences.alert_types = vec!["violation".into(), "threshold_breach".into()];
    service.register_recipient(recipient).await;

    let summary = service
        .send_threshold_breach_alert(
            "model_001",
            "Lead Scoring AI",
            "compliance_score",
            55.0,
            70.0,
            vec!["compliance_officer".into()],
            Some("gdpr".into()),
        )
        .await;

    assert_eq!(summary.delivered_count(), 2);
    assert_eq!(summary.failed_count(), 0);

    let stats = service.get_stats().await;
    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.status_breakdown.get("delivered"), Some(&2));
}

#[tokio::test]
async fn queued_work_flows_from_batch_to_worker() {
    let service = Arc::new(
        NotificationService::with_default_providers(&notification_config())
            .await
            .unwrap(),
    );
    service
        .register_recipient(Recipient::new("ops", "Ops").with_email("ops@example.com"))
        .await;

    service.start_worker().await;

    // nine LOW notifications sit in the batch
    for _ in 0..9 {
        let n = alert_service::notifications::Notification::new(
            "Digest",
            "low priority digest entry",
            NotificationPriority::Low,
            "violation",
        )
        .with_recipients(vec!["ops".into()])
        .with_channels(vec![DeliveryChannel::Email]);
        service.queue_notification(n).await.unwrap();
    }
    assert_eq!(service.get_stats().await.low_priority_batch_size, 9);

    // the tenth flushes the batch to the queue, the worker drains it
    let n = alert_service::notifications::Notification::new(
        "Digest",
        "low priority digest entry",
        NotificationPriority::Low,
        "violation",
    )
    .with_recipients(vec!["ops".into()])
    .with_channels(vec![DeliveryChannel::Email]);
    service.queue_notification(n).await.unwrap();

    for _ in 0..100 {
        if service.get_stats().await.delivered >= 10 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    service.stop_worker().await;

    let stats = service.get_stats().await;
    assert_eq!(stats.delivered, 10);
    assert_eq!(stats.low_priority_batch_size, 0);
}
