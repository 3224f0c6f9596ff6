mod client;
mod receiver;
mod sender;

pub use client::Mqtt;
pub use receiver::{InboundMessage, MqttSubscription};
pub use sender::{Delivery, MqttSender};

use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct MqttConfig {
    host: String,
    port: u16,
    client_id: String,
    username: Option<String>,
    password: Option<String>,
}

impl MqttConfig {
    /// Connects with a retained `offline` last-will on the given availability topic.
    pub fn new_client(&self, availability_topic: &str) -> Mqtt {
        let credentials = match (&self.username, &self.password) {
            (Some(user), password) => Some((user.clone(), password.clone().unwrap_or_default())),
            (None, _) => None,
        };

        Mqtt::connect(&self.host, self.port, &self.client_id, credentials, availability_topic)
    }
}
