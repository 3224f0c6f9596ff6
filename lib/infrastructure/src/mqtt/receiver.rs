use std::str::Utf8Error;

use rumqttc::v5::mqttbytes::v5::Publish;
use tokio::sync::mpsc;

/// Incoming publish on a subscribed filter. The payload is a textual command value,
/// surrounding whitespace is not significant and removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: String,
}

impl TryFrom<&Publish> for InboundMessage {
    type Error = Utf8Error;

    fn try_from(publish: &Publish) -> Result<Self, Self::Error> {
        Ok(Self {
            topic: std::str::from_utf8(&publish.topic)?.to_string(),
            payload: std::str::from_utf8(&publish.payload)?.trim().to_string(),
        })
    }
}

pub struct MqttSubscription {
    rx: mpsc::Receiver<InboundMessage>,
}

impl MqttSubscription {
    pub(super) fn new(rx: mpsc::Receiver<InboundMessage>) -> Self {
        Self { rx }
    }

    /// `None` once the MQTT event loop stopped.
    pub async fn recv(&mut self) -> Option<InboundMessage> {
        self.rx.recv().await
    }
}
