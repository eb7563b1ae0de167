use std::sync::Arc;

use alert_service::error::{AppError, AppResult};
use alert_service::events::{handler, Event, EventBus, EventType};
use alert_service::models::{Alert, AlertSeverity, AlertType};
use alert_service::notifications::NotificationService;
use alert_service::state::AppState;
use alert_service::websocket::{handlers::ws_handler, ConnectionManager};
use alert_service::{config, logging, metrics};
use axum::routing::get;
use axum::Router;

#[tokio::main]
async fn main() -> AppResult<()> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    tracing::info!(port = cfg.port, "starting alert-service");

    let manager = Arc::new(ConnectionManager::new(
        cfg.heartbeat_interval,
        cfg.alert_history_limit,
    ));
    manager.start_heartbeat().await;

    let bus = Arc::new(EventBus::new("alert-service", &cfg));
    let notifications = Arc::new(
        NotificationService::with_default_providers(&cfg.notifications).await?,
    );
    notifications.start_worker().await;

    // Every bus event fans out to the live dashboard sockets.
    {
        let manager = manager.clone();
        bus.subscriber
            .subscribe_all(handler(move |event| {
                let manager = manager.clone();
                async move {
                    let alert = alert_from_event(&event);
                    let recipients = manager.broadcast_alert(alert).await;
                    tracing::debug!(
                        event_id = %event.event_id,
                        recipients,
                        "event fanned out to dashboard clients"
                    );
                    Ok(())
                }
            }))
            .await;
    }

    // Publisher degrades to fallback mode on its own; the subscriber has
    // nothing to degrade to and simply stays offline until restart.
    let (publisher_up, subscriber_up) = bus.connect().await;
    if !publisher_up {
        tracing::warn!("event bus publisher starting in fallback mode");
    }
    if subscriber_up {
        bus.subscriber.start_listening().await;
    } else {
        tracing::warn!("event bus subscriber offline; only local broadcasts will reach clients");
    }

    let state = AppState {
        config: cfg.clone(),
        manager: manager.clone(),
        bus: bus.clone(),
        notifications: notifications.clone(),
    };

    let router = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/metrics", get(metrics::serve_metrics))
        .route("/ws", get(ws_handler))
        .with_state(state);
    let router = logging::add_tracing(router);

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, "listening");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| AppError::StartServer(e.to_string()))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AppError::StartServer(e.to_string()))?;

    tracing::info!("shutting down");
    bus.stop().await;
    notifications.stop_worker().await;
    manager.stop().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install shutdown signal handler");
    }
}

/// Shape a bus event into the dashboard alert it represents.
fn alert_from_event(event: &Event) -> Alert {
    let alert_type = match event.event_type {
        EventType::ViolationDetected => AlertType::ViolationDetected,
        EventType::ScoreChanged => AlertType::ScoreChanged,
        EventType::ThresholdBreach => AlertType::ThresholdBreach,
        EventType::AssessmentCompleted => AlertType::AssessmentCompleted,
        EventType::RemediationCompleted => AlertType::RemediationCompleted,
        EventType::CertificationExpiring => AlertType::CertificationExpiring,
        EventType::SystemHealth => AlertType::SystemHealth,
    };

    let severity = match event.event_type {
        EventType::ViolationDetected => event
            .payload
            .get("severity")
            .and_then(|v| v.as_str())
            .and_then(parse_severity)
            .unwrap_or(AlertSeverity::High),
        EventType::ThresholdBreach => {
            if event.payload.get("critical").and_then(|v| v.as_bool()) == Some(true) {
                AlertSeverity::Critical
            } else {
                AlertSeverity::High
            }
        }
        EventType::ScoreChanged => {
            if event.payload.get("significant_change").and_then(|v| v.as_bool()) == Some(true) {
                AlertSeverity::Medium
            } else {
                AlertSeverity::Info
            }
        }
        EventType::CertificationExpiring => AlertSeverity::Medium,
        EventType::SystemHealth => {
            if event.payload.get("status").and_then(|v| v.as_str()) == Some("down") {
                AlertSeverity::Critical
            } else {
                AlertSeverity::Info
            }
        }
        _ => AlertSeverity::Info,
    };

    let subject = event
        .model_name
        .clone()
        .unwrap_or_else(|| event.source.clone());
    let title = format!("{}: {}", event.event_type.as_str(), subject);
    let message = event
        .payload
        .get("description")
        .and_then(|v| v.as_str())
        .map(String::from)
        .unwrap_or_else(|| format!("{} reported by {}", event.event_type.as_str(), event.source));

    let mut alert = Alert::new(alert_type, severity, title, message).with_data(event.payload.clone());
    alert.model_id = event.model_id.clone();
    alert.model_name = event.model_name.clone();
    alert.regulation = event
        .payload
        .get("regulation")
        .and_then(|v| v.as_str())
        .map(String::from);
    alert
}

fn parse_severity(raw: &str) -> Option<AlertSeverity> {
    match raw {
        "critical" => Some(AlertSeverity::Critical),
        "high" => Some(AlertSeverity::High),
        "medium" => Some(AlertSeverity::Medium),
        "low" => Some(AlertSeverity::Low),
        "info" | "informational" => Some(AlertSeverity::Info),
        _ => None,
    }
}
