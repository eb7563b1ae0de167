//! WebSocket fan-out for real-time compliance alerts.
//!
//! Architecture:
//! 1. ConnectionManager: owns the live connection map and the alert history ring
//! 2. Per-connection mpsc senders: socket writes happen in the connection task,
//!    never under the manager lock
//! 3. Subscription filters: per-axis sets, AND across axes, OR within an axis
//! 4. Heartbeat loop: periodic liveness envelope, dead clients are pruned

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::metrics;
use crate::models::{Alert, AlertSeverity, AlertType};

pub mod handlers;
pub mod messages;

pub use messages::{ClientMessage, ConnectionInfo, ServerMessage, SubscriptionSnapshot};

/// Outbound channel half handed to the manager at connect time.
pub type ClientSender = mpsc::UnboundedSender<ServerMessage>;

/// Per-axis subscription filters for one connection.
#[derive(Debug, Default, Clone)]
pub struct SubscriptionFilters {
    pub alert_types: HashSet<AlertType>,
    pub model_ids: HashSet<String>,
    pub severities: HashSet<AlertSeverity>,
    pub regulations: HashSet<String>,
}

impl SubscriptionFilters {
    pub fn is_empty(&self) -> bool {
        self.alert_types.is_empty()
            && self.model_ids.is_empty()
            && self.severities.is_empty()
            && self.regulations.is_empty()
    }

    /// No filters on any axis matches everything. Otherwise every non-empty
    /// axis must contain the alert's attribute; an axis whose attribute is
    /// absent from the alert is ignored.
    pub fn matches(&self, alert: &Alert) -> bool {
        if self.is_empty() {
            return true;
        }
        if !self.alert_types.is_empty() && !self.alert_types.contains(&alert.alert_type) {
            return false;
        }
        if !self.severities.is_empty() && !self.severities.contains(&alert.severity) {
            return false;
        }
        if !self.model_ids.is_empty() {
            if let Some(model_id) = &alert.model_id {
                if !self.model_ids.contains(model_id) {
                    return false;
                }
            }
        }
        if !self.regulations.is_empty() {
            if let Some(regulation) = &alert.regulation {
                if !self.regulations.contains(regulation) {
                    return false;
                }
            }
        }
        true
    }

    fn extend(
        &mut self,
        alert_types: &[AlertType],
        model_ids: &[String],
        severities: &[AlertSeverity],
        regulations: &[String],
    ) {
        self.alert_types.extend(alert_types.iter().copied());
        self.model_ids.extend(model_ids.iter().cloned());
        self.severities.extend(severities.iter().copied());
        self.regulations.extend(regulations.iter().cloned());
    }

    fn remove(
        &mut self,
        alert_types: &[AlertType],
        model_ids: &[String],
        severities: &[AlertSeverity],
        regulations: &[String],
    ) {
        for t in alert_types {
            self.alert_types.remove(t);
        }
        for m in model_ids {
            self.model_ids.remove(m);
        }
        for s in severities {
            self.severities.remove(s);
        }
        for r in regulations {
            self.regulations.remove(r);
        }
    }

    pub fn snapshot(&self) -> SubscriptionSnapshot {
        let mut alert_types: Vec<String> =
            self.alert_types.iter().map(|t| t.as_str().to_string()).collect();
        let mut model_ids: Vec<String> = self.model_ids.iter().cloned().collect();
        let mut severities: Vec<String> =
            self.severities.iter().map(|s| s.as_str().to_string()).collect();
        let mut regulations: Vec<String> = self.regulations.iter().cloned().collect();
        alert_types.sort();
        model_ids.sort();
        severities.sort();
        regulations.sort();
        SubscriptionSnapshot {
            alert_types,
            model_ids,
            severities,
            regulations,
        }
    }
}

/// One live dashboard connection.
///
/// Lifecycle: created on accept, mutated by subscribe/unsubscribe and
/// heartbeats, destroyed on disconnect or forced close during shutdown.
pub struct ClientConnection {
    pub client_id: String,
    sender: ClientSender,
    epoch: u64,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub filters: SubscriptionFilters,
    pub received_count: u64,
    pub active: bool,
}

impl ClientConnection {
    fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            client_id: self.client_id.clone(),
            connected_at: self.connected_at.timestamp(),
            last_heartbeat: self.last_heartbeat.timestamp(),
            received_count: self.received_count,
            active: self.active,
            subscriptions: self.filters.snapshot(),
        }
    }
}

/// Manages active WebSocket connections and routes alerts to them.
///
/// Thread-safe via `Arc<RwLock<..>>`; the write lock is never held across an
/// outbound send (sends go through per-connection mpsc channels).
pub struct ConnectionManager {
    connections: RwLock<HashMap<String, ClientConnection>>,
    history: RwLock<VecDeque<Alert>>,
    history_limit: usize,
    heartbeat_interval: Duration,
    running: AtomicBool,
    epoch_counter: AtomicU64,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(heartbeat_interval: Duration, history_limit: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            history: RwLock::new(VecDeque::new()),
            history_limit,
            heartbeat_interval,
            running: AtomicBool::new(true),
            epoch_counter: AtomicU64::new(0),
            heartbeat_task: Mutex::new(None),
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Register a connection under `client_id`, evicting any previous
    /// connection with the same id (reconnect semantics, last writer wins).
    /// Sends the welcome envelope and returns the connection epoch used for
    /// scoped disconnects.
    pub async fn connect(&self, client_id: impl Into<String>, sender: ClientSender) -> u64 {
        let client_id = client_id.into();
        let epoch = self.epoch_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();

        let connection = ClientConnection {
            client_id: client_id.clone(),
            sender: sender.clone(),
            epoch,
            connected_at: now,
            last_heartbeat: now,
            filters: SubscriptionFilters::default(),
            received_count: 0,
            active: true,
        };

        let count = {
            let mut connections = self.connections.write().await;
            if let Some(old) = connections.insert(client_id.clone(), connection) {
                info!(%client_id, "evicting previous connection for reconnecting client");
                drop(old); // dropping the sender closes the old socket task
            }
            connections.len()
        };
        metrics::set_ws_connections(count);

        let welcome = ServerMessage::connection_established(
            client_id.clone(),
            self.heartbeat_interval.as_secs(),
        );
        let _ = sender.send(welcome);

        debug!(%client_id, epoch, "client connected");
        epoch
    }

    /// Union the given filters into the client's subscriptions and echo the
    /// resulting snapshot back.
    pub async fn subscribe(
        &self,
        client_id: &str,
        alert_types: &[AlertType],
        model_ids: &[String],
        severities: &[AlertSeverity],
        regulations: &[String],
    ) -> bool {
        let mut connections = self.connections.write().await;
        let Some(connection) = connections.get_mut(client_id) else {
            return false;
        };
        connection
            .filters
            .extend(alert_types, model_ids, severities, regulations);
        let echo = ServerMessage::SubscriptionUpdated {
            subscriptions: connection.filters.snapshot(),
        };
        let _ = connection.sender.send(echo);
        true
    }

    /// Set-difference the given filters out of the client's subscriptions.
    pub async fn unsubscribe(
        &self,
        client_id: &str,
        alert_types: &[AlertType],
        model_ids: &[String],
        severities: &[AlertSeverity],
        regulations: &[String],
    ) -> bool {
        let mut connections = self.connections.write().await;
        let Some(connection) = connections.get_mut(client_id) else {
            return false;
        };
        connection
            .filters
            .remove(alert_types, model_ids, severities, regulations);
        true
    }

    /// Broadcast an alert to every connection whose filters match.
    ///
    /// The alert is appended to the bounded history ring first. Matching
    /// senders are collected under the lock and sends happen outside it; a
    /// failed send evicts that client without affecting the rest. Returns the
    /// number of clients that received the alert.
    pub async fn broadcast_alert(&self, alert: Alert) -> usize {
        {
            let mut history = self.history.write().await;
            history.push_back(alert.clone());
            while history.len() > self.history_limit {
                history.pop_front();
            }
        }

        let targets: Vec<(String, ClientSender)> = {
            let connections = self.connections.read().await;
            connections
                .values()
                .filter(|c| c.active && c.filters.matches(&alert))
                .map(|c| (c.client_id.clone(), c.sender.clone()))
                .collect()
        };

        let mut delivered = Vec::new();
        let mut broken = Vec::new();
        for (client_id, sender) in targets {
            if sender.send(ServerMessage::alert(alert.clone())).is_ok() {
                delivered.push(client_id);
            } else {
                broken.push(client_id);
            }
        }

        if !delivered.is_empty() || !broken.is_empty() {
            let mut connections = self.connections.write().await;
            for client_id in &delivered {
                if let Some(connection) = connections.get_mut(client_id) {
                    connection.received_count += 1;
                }
            }
            for client_id in &broken {
                warn!(%client_id, "removing client after failed send");
                connections.remove(client_id);
            }
            metrics::set_ws_connections(connections.len());
        }

        metrics::record_alert_broadcast();
        debug!(recipients = delivered.len(), alert_id = %alert.id, "alert broadcast");
        delivered.len()
    }

    /// Point-to-point alternative to broadcast; same failure handling.
    pub async fn send_to_client(&self, client_id: &str, alert: Alert) -> bool {
        let sender = {
            let connections = self.connections.read().await;
            connections
                .get(client_id)
                .filter(|c| c.active)
                .map(|c| c.sender.clone())
        };
        let Some(sender) = sender else {
            return false;
        };

        if sender.send(ServerMessage::alert(alert)).is_ok() {
            let mut connections = self.connections.write().await;
            if let Some(connection) = connections.get_mut(client_id) {
                connection.received_count += 1;
            }
            true
        } else {
            self.disconnect(client_id).await;
            false
        }
    }

    pub(crate) async fn send_envelope(&self, client_id: &str, message: ServerMessage) -> bool {
        let connections = self.connections.read().await;
        match connections.get(client_id) {
            Some(connection) => connection.sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Send a heartbeat envelope to every connection; clients whose channel is
    /// gone are disconnected. Returns the number of clients reached.
    pub async fn send_heartbeat(&self) -> usize {
        let targets: Vec<(String, ClientSender)> = {
            let connections = self.connections.read().await;
            connections
                .values()
                .map(|c| (c.client_id.clone(), c.sender.clone()))
                .collect()
        };
        if targets.is_empty() {
            return 0;
        }

        let active = targets.len();
        let heartbeat = ServerMessage::heartbeat(active);
        let mut reached = Vec::new();
        let mut broken = Vec::new();
        for (client_id, sender) in targets {
            if sender.send(heartbeat.clone()).is_ok() {
                reached.push(client_id);
            } else {
                broken.push(client_id);
            }
        }

        let now = Utc::now();
        let mut connections = self.connections.write().await;
        for client_id in &reached {
            if let Some(connection) = connections.get_mut(client_id) {
                connection.last_heartbeat = now;
            }
        }
        for client_id in &broken {
            warn!(%client_id, "disconnecting client after failed heartbeat");
            connections.remove(client_id);
        }
        metrics::set_ws_connections(connections.len());

        reached.len()
    }

    pub(crate) async fn touch_heartbeat(&self, client_id: &str) {
        let mut connections = self.connections.write().await;
        if let Some(connection) = connections.get_mut(client_id) {
            connection.last_heartbeat = Utc::now();
        }
    }

    /// Spawn the background heartbeat loop for the manager's lifetime.
    pub async fn start_heartbeat(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(manager.heartbeat_interval);
            interval.tick().await; // first tick fires immediately
            loop {
                interval.tick().await;
                if !manager.running.load(Ordering::SeqCst) {
                    break;
                }
                if manager.active_connections_count().await == 0 {
                    continue;
                }
                let reached = manager.send_heartbeat().await;
                debug!(reached, "heartbeat cycle completed");
            }
        });

        if let Some(previous) = self.heartbeat_task.lock().await.replace(handle) {
            previous.abort();
        }
    }

    pub async fn disconnect(&self, client_id: &str) -> bool {
        let mut connections = self.connections.write().await;
        let removed = connections.remove(client_id).is_some();
        if removed {
            debug!(%client_id, "client disconnected");
            metrics::set_ws_connections(connections.len());
        }
        removed
    }

    /// Disconnect only if the stored connection still belongs to `epoch`.
    /// Keeps an evicted socket task from tearing down its replacement.
    pub async fn disconnect_epoch(&self, client_id: &str, epoch: u64) -> bool {
        let mut connections = self.connections.write().await;
        let matches = connections
            .get(client_id)
            .map(|c| c.epoch == epoch)
            .unwrap_or(false);
        if matches {
            connections.remove(client_id);
            metrics::set_ws_connections(connections.len());
        }
        matches
    }

    /// Cancel the heartbeat task and force-close every connection.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.heartbeat_task.lock().await.take() {
            handle.abort();
        }

        let mut connections = self.connections.write().await;
        let count = connections.len();
        for connection in connections.values_mut() {
            connection.active = false;
        }
        connections.clear(); // dropped senders close each socket task with a shutdown reason
        metrics::set_ws_connections(0);
        info!(closed = count, "connection manager stopped");
    }

    /// Flip the acknowledged flag on a history alert by id.
    pub async fn acknowledge_alert(&self, alert_id: &str) -> bool {
        let mut history = self.history.write().await;
        for alert in history.iter_mut() {
            if alert.id == alert_id {
                alert.acknowledged = true;
                return true;
            }
        }
        false
    }

    /// Recent alerts, newest first, optionally filtered by severity/model.
    pub async fn get_alert_history(
        &self,
        limit: usize,
        severity: Option<AlertSeverity>,
        model_id: Option<&str>,
    ) -> Vec<Alert> {
        let history = self.history.read().await;
        history
            .iter()
            .rev()
            .filter(|a| severity.map_or(true, |s| a.severity == s))
            .filter(|a| model_id.map_or(true, |m| a.model_id.as_deref() == Some(m)))
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn get_connection_info(&self, client_id: &str) -> Option<ConnectionInfo> {
        let connections = self.connections.read().await;
        connections.get(client_id).map(|c| c.info())
    }

    pub async fn get_all_connections(&self) -> Vec<ConnectionInfo> {
        let connections = self.connections.read().await;
        connections.values().map(|c| c.info()).collect()
    }

    pub async fn active_connections_count(&self) -> usize {
        let connections = self.connections.read().await;
        connections.len()
    }

    pub async fn history_len(&self) -> usize {
        let history = self.history.read().await;
        history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Alert, AlertSeverity, AlertType};

    fn test_manager() -> ConnectionManager {
        ConnectionManager::new(Duration::from_secs(30), 100)
    }

    fn alert(severity: AlertSeverity) -> Alert {
        Alert::new(
            AlertType::ViolationDetected,
            severity,
            "Data Retention Policy Violation",
            "Training data retained beyond the retention period",
        )
        .with_model("model_001", "Lead Scoring AI")
        .with_regulation("gdpr")
    }

    #[tokio::test]
    async fn connect_registers_and_sends_welcome() {
        let manager = test_manager();
        let (tx, mut rx) = mpsc::unbounded_channel();

        manager.connect("client_001", tx).await;

        assert_eq!(manager.active_connections_count().await, 1);
        let welcome = rx.recv().await.unwrap();
        assert!(matches!(
            welcome,
            ServerMessage::ConnectionEstablished {
                heartbeat_interval_secs: 30,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn reconnect_evicts_previous_connection() {
        let manager = test_manager();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        manager.connect("client_001", tx1).await;
        rx1.recv().await.unwrap(); // welcome
        manager.connect("client_001", tx2).await;

        assert_eq!(manager.active_connections_count().await, 1);
        // old sender dropped, channel closed
        assert!(rx1.recv().await.is_none());
    }

    #[tokio::test]
    async fn empty_filters_match_every_alert() {
        let filters = SubscriptionFilters::default();
        for severity in [
            AlertSeverity::Critical,
            AlertSeverity::High,
            AlertSeverity::Info,
        ] {
            assert!(filters.matches(&alert(severity)));
        }
    }

    #[tokio::test]
    async fn severity_filter_mismatch_blocks_even_when_other_axes_match() {
        let mut filters = SubscriptionFilters::default();
        filters.severities.insert(AlertSeverity::High);
        filters.alert_types.insert(AlertType::ViolationDetected);
        filters.model_ids.insert("model_001".into());

        assert!(filters.matches(&alert(AlertSeverity::High)));
        assert!(!filters.matches(&alert(AlertSeverity::Critical)));
    }

    #[tokio::test]
    async fn axis_absent_from_alert_is_ignored() {
        let mut filters = SubscriptionFilters::default();
        filters.regulations.insert("hipaa".into());

        let mut unregulated = alert(AlertSeverity::High);
        unregulated.regulation = None;
        assert!(filters.matches(&unregulated));

        // present but not in the filter set fails
        assert!(!filters.matches(&alert(AlertSeverity::High)));
    }

    #[tokio::test]
    async fn broadcast_reaches_only_matching_connections() {
        let manager = test_manager();
        let mut receivers = Vec::new();
        for i in 0..3 {
            let (tx, mut rx) = mpsc::unbounded_channel();
            manager.connect(format!("client_{i}"), tx).await;
            rx.recv().await.unwrap(); // welcome
            receivers.push(rx);
        }
        // third client only wants HIGH alerts
        manager
            .subscribe("client_2", &[], &[], &[AlertSeverity::High], &[])
            .await;
        receivers[2].recv().await.unwrap(); // subscription echo

        let recipients = manager.broadcast_alert(alert(AlertSeverity::Critical)).await;

        assert_eq!(recipients, 2);
        assert!(matches!(
            receivers[0].try_recv().unwrap(),
            ServerMessage::Alert { .. }
        ));
        assert!(matches!(
            receivers[1].try_recv().unwrap(),
            ServerMessage::Alert { .. }
        ));
        assert!(receivers[2].try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_evicts_clients_with_closed_channels() {
        let manager = test_manager();
        let (tx_ok, mut rx_ok) = mpsc::unbounded_channel();
        let (tx_gone, rx_gone) = mpsc::unbounded_channel();

        manager.connect("alive", tx_ok).await;
        manager.connect("gone", tx_gone).await;
        rx_ok.recv().await.unwrap();
        drop(rx_gone);

        let recipients = manager.broadcast_alert(alert(AlertSeverity::High)).await;

        assert_eq!(recipients, 1);
        assert_eq!(manager.active_connections_count().await, 1);
    }

    #[tokio::test]
    async fn send_to_client_targets_one_connection() {
        let manager = test_manager();
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.connect("client_001", tx).await;
        rx.recv().await.unwrap();

        assert!(manager.send_to_client("client_001", alert(AlertSeverity::Low)).await);
        assert!(matches!(rx.recv().await.unwrap(), ServerMessage::Alert { .. }));
        assert!(!manager.send_to_client("unknown", alert(AlertSeverity::Low)).await);
    }

    #[tokio::test]
    async fn history_ring_drops_oldest_beyond_limit() {
        let manager = ConnectionManager::new(Duration::from_secs(30), 3);
        for i in 0..5 {
            let mut a = alert(AlertSeverity::Medium);
            a.title = format!("alert {i}");
            manager.broadcast_alert(a).await;
        }

        assert_eq!(manager.history_len().await, 3);
        let history = manager.get_alert_history(10, None, None).await;
        assert_eq!(history[0].title, "alert 4");
        assert_eq!(history[2].title, "alert 2");
    }

    #[tokio::test]
    async fn history_filters_by_severity_and_model() {
        let manager = test_manager();
        manager.broadcast_alert(alert(AlertSeverity::Critical)).await;
        manager.broadcast_alert(alert(AlertSeverity::Low)).await;

        let critical = manager
            .get_alert_history(10, Some(AlertSeverity::Critical), None)
            .await;
        assert_eq!(critical.len(), 1);

        let other_model = manager
            .get_alert_history(10, None, Some("model_999"))
            .await;
        assert!(other_model.is_empty());
    }

    #[tokio::test]
    async fn acknowledge_flips_flag_in_history() {
        let manager = test_manager();
        let a = alert(AlertSeverity::High);
        let id = a.id.clone();
        manager.broadcast_alert(a).await;

        assert!(manager.acknowledge_alert(&id).await);
        let history = manager.get_alert_history(1, None, None).await;
        assert!(history[0].acknowledged);
        assert!(!manager.acknowledge_alert("missing").await);
    }

    #[tokio::test]
    async fn heartbeat_reaches_all_and_prunes_dead() {
        let manager = test_manager();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, rx2) = mpsc::unbounded_channel();
        manager.connect("a", tx1).await;
        manager.connect("b", tx2).await;
        rx1.recv().await.unwrap();
        drop(rx2);

        let reached = manager.send_heartbeat().await;

        assert_eq!(reached, 1);
        assert!(matches!(rx1.recv().await.unwrap(), ServerMessage::Heartbeat { .. }));
        assert_eq!(manager.active_connections_count().await, 1);
    }

    #[tokio::test]
    async fn stop_force_closes_all_connections() {
        let manager = test_manager();
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.connect("client_001", tx).await;
        rx.recv().await.unwrap();

        manager.stop().await;

        assert_eq!(manager.active_connections_count().await, 0);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn disconnect_epoch_ignores_stale_epochs() {
        let manager = test_manager();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        let old_epoch = manager.connect("client_001", tx1).await;
        let new_epoch = manager.connect("client_001", tx2).await;

        assert!(!manager.disconnect_epoch("client_001", old_epoch).await);
        assert_eq!(manager.active_connections_count().await, 1);
        assert!(manager.disconnect_epoch("client_001", new_epoch).await);
        assert_eq!(manager.active_connections_count().await, 0);
    }

    #[tokio::test]
    async fn disconnect_nonexistent_client_is_a_noop() {
        let manager = test_manager();
        assert!(!manager.disconnect("nobody").await);
        assert_eq!(manager.active_connections_count().await, 0);
    }
}
