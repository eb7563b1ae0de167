use std::sync::Arc;

use crate::config::Config;
use crate::events::EventBus;
use crate::notifications::NotificationService;
use crate::websocket::ConnectionManager;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub manager: Arc<ConnectionManager>,
    pub bus: Arc<EventBus>,
    pub notifications: Arc<NotificationService>,
}
