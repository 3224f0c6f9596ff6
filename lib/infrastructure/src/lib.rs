mod bus;
mod http;
mod monitoring;
mod mqtt;

pub use bus::{EventBus, EventEmitter, EventListener};
pub use http::client::HttpClientConfig;
pub use monitoring::{MonitoringConfig, MonitoringGuard};
pub use mqtt::{Delivery, InboundMessage, Mqtt, MqttConfig, MqttSender, MqttSubscription};

pub mod meter {
    pub use super::monitoring::meter::{increment, set};
}
