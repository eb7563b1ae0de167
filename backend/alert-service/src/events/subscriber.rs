use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::events::event::{Event, EventType};
use crate::metrics;

/// Handler invoked for each event delivered on a subscribed channel.
pub type EventHandler = Arc<dyn Fn(Event) -> BoxFuture<'static, Result<(), AppError>> + Send + Sync>;

/// Wrap an async closure as an [`EventHandler`].
pub fn handler<F, Fut>(f: F) -> EventHandler
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), AppError>> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriberMetrics {
    pub events_received: u64,
    pub events_processed: u64,
    pub events_dropped: u64,
    pub handler_errors: u64,
    pub reconnections: u64,
    pub running: bool,
}

enum PumpExit {
    StreamEnded,
    Resubscribe,
    Stopped,
}

/// Consumes events from the pub/sub transport and fans them out to
/// registered handlers.
///
/// No fallback mode: a subscriber that cannot connect has nothing useful to
/// degrade to, so `connect()` simply reports false. The listen loop survives
/// transport failures indefinitely, reconnecting with doubled delays capped
/// at `max_reconnect_delay` and resubscribing every tracked channel.
pub struct EventSubscriber {
    redis_url: String,
    prefix: String,
    reconnect_delay_seed: Duration,
    max_reconnect_delay: Duration,
    client: Mutex<Option<redis::Client>>,
    handlers: RwLock<HashMap<String, Vec<EventHandler>>>,
    channels: RwLock<HashSet<String>>,
    running: AtomicBool,
    resubscribe: Notify,
    listen_task: Mutex<Option<JoinHandle<()>>>,
    events_received: AtomicU64,
    events_processed: AtomicU64,
    events_dropped: AtomicU64,
    handler_errors: AtomicU64,
    reconnections: AtomicU64,
}

impl EventSubscriber {
    pub fn new(redis_url: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            redis_url: redis_url.into(),
            prefix: prefix.into(),
            reconnect_delay_seed: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            client: Mutex::new(None),
            handlers: RwLock::new(HashMap::new()),
            channels: RwLock::new(HashSet::new()),
            running: AtomicBool::new(false),
            resubscribe: Notify::new(),
            listen_task: Mutex::new(None),
            events_received: AtomicU64::new(0),
            events_processed: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            handler_errors: AtomicU64::new(0),
            reconnections: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        let mut subscriber = Self::new(config.redis_url.clone(), config.channel_prefix.clone());
        subscriber.reconnect_delay_seed = config.reconnect_delay_seed;
        subscriber.max_reconnect_delay = config.max_reconnect_delay;
        subscriber
    }

    /// Establish the transport connection. Returns false on failure; without
    /// a connection there is nothing to subscribe on.
    pub async fn connect(&self) -> bool {
        let client = match redis::Client::open(self.redis_url.as_str()) {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "event bus subscriber could not parse transport url");
                return false;
            }
        };

        let probe = redis_utils::with_timeout(client.get_multiplexed_async_connection()).await;
        match probe {
            Ok(Ok(mut conn)) => {
                let ping: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
                if let Err(e) = ping {
                    warn!(error = %e, "event bus subscriber ping failed");
                    return false;
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "event bus subscriber could not connect");
                return false;
            }
            Err(_) => {
                warn!("event bus subscriber connect timed out");
                return false;
            }
        }

        *self.client.lock().await = Some(client);
        info!("event bus subscriber connected");
        true
    }

    /// Register `handler` for the channels derived from `event_types`.
    /// Multiple handlers per channel are permitted; all are invoked.
    pub async fn subscribe(&self, event_types: &[EventType], handler: EventHandler) {
        let mut handlers = self.handlers.write().await;
        let mut channels = self.channels.write().await;
        for event_type in event_types {
            let channel = format!("{}:{}", self.prefix, event_type.bucket());
            handlers.entry(channel.clone()).or_default().push(handler.clone());
            channels.insert(channel);
        }
        drop(channels);
        drop(handlers);
        self.resubscribe.notify_waiters();
    }

    /// Register a catch-all handler on the reserved `all` channel.
    pub async fn subscribe_all(&self, handler: EventHandler) {
        let channel = Event::all_channel(&self.prefix);
        {
            let mut handlers = self.handlers.write().await;
            let mut channels = self.channels.write().await;
            handlers.entry(channel.clone()).or_default().push(handler);
            channels.insert(channel);
        }
        self.resubscribe.notify_waiters();
    }

    /// Launch the background listen loop. Returns false when the subscriber
    /// never connected.
    pub async fn start_listening(self: &Arc<Self>) -> bool {
        if self.client.lock().await.is_none() {
            warn!("event bus subscriber not connected; refusing to listen");
            return false;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("event bus subscriber already listening");
            return true;
        }

        let subscriber = Arc::clone(self);
        let handle = tokio::spawn(async move {
            subscriber.listen_loop().await;
        });
        *self.listen_task.lock().await = Some(handle);
        true
    }

    /// Cancel the listen loop; the current iteration completes first.
    pub async fn stop_listening(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.resubscribe.notify_waiters();
        if let Some(handle) = self.listen_task.lock().await.take() {
            handle.abort();
        }
        info!("event bus subscriber stopped");
    }

    async fn listen_loop(self: Arc<Self>) {
        let mut delay = self.reconnect_delay_seed;

        while self.running.load(Ordering::SeqCst) {
            let client = { self.client.lock().await.clone() };
            let Some(client) = client else { break };

            // Pub/sub needs a dedicated connection, not the multiplexed pool.
            let mut pubsub = match client.get_async_connection().await {
                Ok(conn) => conn.into_pubsub(),
                Err(e) => {
                    warn!(error = %e, "pub/sub connection failed; backing off");
                    delay = self.backoff(delay).await;
                    continue;
                }
            };

            let channels: Vec<String> = {
                let tracked = self.channels.read().await;
                tracked.iter().cloned().collect()
            };
            let mut subscribed = true;
            for channel in &channels {
                if let Err(e) = pubsub.subscribe(channel).await {
                    warn!(%channel, error = %e, "channel subscription failed; backing off");
                    subscribed = false;
                    break;
                }
            }
            if !subscribed {
                delay = self.backoff(delay).await;
                continue;
            }

            debug!(channels = channels.len(), "subscribed to event channels");
            delay = self.reconnect_delay_seed; // reset after a successful (re)connect

            match self.pump(&mut pubsub).await {
                PumpExit::Stopped => break,
                PumpExit::Resubscribe => continue,
                PumpExit::StreamEnded => {
                    delay = self.backoff(delay).await;
                }
            }
        }
    }

    async fn pump(&self, pubsub: &mut redis::aio::PubSub) -> PumpExit {
        let mut stream = pubsub.on_message();
        loop {
            tokio::select! {
                maybe = stream.next() => match maybe {
                    Some(msg) => {
                        self.process_message(msg).await;
                        if !self.running.load(Ordering::SeqCst) {
                            return PumpExit::Stopped;
                        }
                    }
                    None => {
                        warn!("pub/sub message stream ended");
                        return PumpExit::StreamEnded;
                    }
                },
                _ = self.resubscribe.notified() => {
                    if !self.running.load(Ordering::SeqCst) {
                        return PumpExit::Stopped;
                    }
                    return PumpExit::Resubscribe;
                }
            }
        }
    }

    async fn backoff(&self, delay: Duration) -> Duration {
        self.reconnections.fetch_add(1, Ordering::Relaxed);
        metrics::record_bus_reconnection();
        tokio::time::sleep(delay).await;
        next_reconnect_delay(delay, self.max_reconnect_delay)
    }

    /// Deserialize the envelope and fan out to every handler registered for
    /// the arrival channel. A failing handler never blocks its siblings.
    async fn process_message(&self, msg: redis::Msg) {
        self.events_received.fetch_add(1, Ordering::Relaxed);

        let channel = msg.get_channel_name().to_string();
        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(%channel, error = %e, "dropping undecodable pub/sub payload");
                self.events_dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let event = match Event::from_json(&payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(%channel, error = %e, "dropping malformed event envelope");
                self.events_dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let handlers: Vec<EventHandler> = {
            let registered = self.handlers.read().await;
            registered.get(&channel).cloned().unwrap_or_default()
        };

        for handler in handlers {
            if let Err(e) = handler(event.clone()).await {
                self.handler_errors.fetch_add(1, Ordering::Relaxed);
                error!(
                    event_id = %event.event_id,
                    %channel,
                    error = %e,
                    "event handler failed"
                );
            }
        }
        self.events_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Invoke the dispatch path directly; used by in-process tests.
    #[cfg(test)]
    pub(crate) async fn dispatch_raw(&self, channel: &str, payload: &str) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
        let event = match Event::from_json(payload) {
            Ok(event) => event,
            Err(_) => {
                self.events_dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        let handlers: Vec<EventHandler> = {
            let registered = self.handlers.read().await;
            registered.get(channel).cloned().unwrap_or_default()
        };
        for handler in handlers {
            if let Err(_e) = handler(event.clone()).await {
                self.handler_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.events_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(&self) -> SubscriberMetrics {
        SubscriberMetrics {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_processed: self.events_processed.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            reconnections: self.reconnections.load(Ordering::Relaxed),
            running: self.running.load(Ordering::SeqCst),
        }
    }
}

/// Doubled reconnect delay, capped.
pub fn next_reconnect_delay(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}
