use std::sync::Arc;

use rumqttc::v5::{AsyncClient, mqttbytes::QoS};

/// How a published value is handed to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Kept by the broker and replayed to late subscribers. For values that change rarely and
    /// must be known right after a restart, e.g. availability.
    Retained,
    /// Fire and forget. For values the bus republishes on its own, e.g. device state.
    Transient,
}

impl Delivery {
    fn qos(self) -> QoS {
        match self {
            Delivery::Retained => QoS::AtLeastOnce,
            Delivery::Transient => QoS::AtMostOnce,
        }
    }

    fn retain(self) -> bool {
        self == Delivery::Retained
    }
}

#[derive(Clone)]
pub struct MqttSender {
    client: Arc<AsyncClient>,
}

impl MqttSender {
    pub(super) fn new(client: Arc<AsyncClient>) -> Self {
        Self { client }
    }

    #[tracing::instrument(skip_all, fields(topic = %topic, delivery = ?delivery))]
    pub async fn publish(&self, topic: String, payload: String, delivery: Delivery) -> anyhow::Result<()> {
        tracing::debug!("Publishing {:?} to {}", payload, topic);

        self.client
            .publish(topic.clone(), delivery.qos(), delivery.retain(), payload)
            .await
            .map_err(|e| {
                tracing::error!("Error publishing MQTT message to {}: {}", topic, e);
                e.into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retained_values_are_acknowledged() {
        assert!(Delivery::Retained.retain());
        assert_eq!(Delivery::Retained.qos(), QoS::AtLeastOnce);
    }

    #[test]
    fn transient_values_are_not_kept() {
        assert!(!Delivery::Transient.retain());
        assert_eq!(Delivery::Transient.qos(), QoS::AtMostOnce);
    }
}
