pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod notifications;
pub mod state;
pub mod websocket;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use events::{Event, EventBus, EventPublisher, EventSubscriber, EventType};
pub use models::{Alert, AlertSeverity, AlertType};
pub use notifications::{Notification, NotificationPriority, NotificationService, Recipient};
pub use websocket::{ConnectionManager, ServerMessage};
