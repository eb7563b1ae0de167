use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder};

static ALERTS_BROADCAST_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "alert_service_alerts_broadcast_total",
        "Total alerts broadcast to WebSocket clients",
    )
    .expect("failed to create alert_service_alerts_broadcast_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register alert_service_alerts_broadcast_total");
    counter
});

static EVENTS_PUBLISHED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "alert_service_events_published_total",
        "Total events published to the event bus",
    )
    .expect("failed to create alert_service_events_published_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register alert_service_events_published_total");
    counter
});

static EVENTS_FAILED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "alert_service_events_failed_total",
        "Total events that could not be published",
    )
    .expect("failed to create alert_service_events_failed_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register alert_service_events_failed_total");
    counter
});

static BUS_RECONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "alert_service_bus_reconnections_total",
        "Total event bus reconnection attempts",
    )
    .expect("failed to create alert_service_bus_reconnections_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register alert_service_bus_reconnections_total");
    counter
});

static NOTIFICATION_RETRIES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "alert_service_notification_retries_total",
        "Total notification delivery retries",
    )
    .expect("failed to create alert_service_notification_retries_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register alert_service_notification_retries_total");
    counter
});

static DELIVERIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "alert_service_deliveries_total",
            "Notification delivery outcomes by channel and status",
        ),
        &["channel", "status"],
    )
    .expect("failed to create alert_service_deliveries_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register alert_service_deliveries_total");
    counter
});

static WS_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "alert_service_ws_connections",
        "Currently connected WebSocket clients",
    )
    .expect("failed to create alert_service_ws_connections");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register alert_service_ws_connections");
    gauge
});

pub fn record_alert_broadcast() {
    ALERTS_BROADCAST_TOTAL.inc();
}

pub fn record_event_published() {
    EVENTS_PUBLISHED_TOTAL.inc();
}

pub fn record_event_failed() {
    EVENTS_FAILED_TOTAL.inc();
}

pub fn record_bus_reconnection() {
    BUS_RECONNECTIONS_TOTAL.inc();
}

pub fn record_notification_retry() {
    NOTIFICATION_RETRIES_TOTAL.inc();
}

pub fn record_delivery(channel: &str, status: &str) {
    DELIVERIES_TOTAL.with_label_values(&[channel, status]).inc();
}

pub fn set_ws_connections(count: usize) {
    WS_CONNECTIONS.set(count as i64);
}

pub async fn serve_metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}
