use std::sync::Arc;

use rumqttc::v5::{
    AsyncClient, EventLoop, MqttOptions,
    mqttbytes::{
        QoS,
        v5::{LastWill, Packet, Publish, SubscribeProperties},
    },
};

use rumqttc::v5::Event::Incoming;
use tokio::sync::mpsc;

use super::*;

pub struct Mqtt {
    client: Arc<AsyncClient>,
    event_loop: EventLoop,
    subscriptions: Vec<MqttSubscriptionHandle>,
}

struct MqttSubscriptionHandle {
    topic: String,
    txs: Vec<mpsc::Sender<InboundMessage>>,
}

impl Mqtt {
    pub fn connect(
        host: &str,
        port: u16,
        client_id: &str,
        credentials: Option<(String, String)>,
        availability_topic: &str,
    ) -> Self {
        let mut mqttoptions = MqttOptions::new(client_id, host, port);
        mqttoptions.set_keep_alive(::std::time::Duration::from_secs(30));
        mqttoptions.set_last_will(LastWill::new(availability_topic, "offline", QoS::AtLeastOnce, true, None));

        if let Some((username, password)) = credentials {
            mqttoptions.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(mqttoptions, 32);

        Mqtt {
            client: Arc::new(client),
            event_loop,
            subscriptions: vec![],
        }
    }

    /// Subscribes to a topic filter. Wildcards are allowed, incoming messages are routed back
    /// by subscription identifier.
    pub async fn subscribe(&mut self, topic: impl Into<String>) -> anyhow::Result<MqttSubscription> {
        let topic = topic.into();
        let (tx, rx) = mpsc::channel::<InboundMessage>(32);

        if let Some(subscription) = self.subscriptions.iter_mut().find(|s| s.topic == topic) {
            tracing::info!("Adding listener to existing subscription {:?}", &topic);
            subscription.txs.push(tx);
            return Ok(MqttSubscription::new(rx));
        }

        tracing::info!("Creating new subscription for topic {:?}", &topic);

        self.subscriptions.push(MqttSubscriptionHandle {
            topic: topic.clone(),
            txs: vec![tx],
        });

        self.client
            .subscribe_with_properties(
                topic,
                QoS::AtLeastOnce,
                SubscribeProperties {
                    id: Some(self.subscriptions.len()), //must be > 0
                    user_properties: vec![],
                },
            )
            .await?;

        Ok(MqttSubscription::new(rx))
    }

    pub fn sender(&self) -> MqttSender {
        MqttSender::new(self.client.clone())
    }

    pub async fn run(mut self) {
        loop {
            match self.event_loop.poll().await {
                Ok(Incoming(Packet::Publish(publish))) => {
                    self.handle_publish(publish).await;
                }
                Ok(Incoming(Packet::ConnAck(_))) => {
                    tracing::info!("Connected to MQTT broker");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("MQTT error: {}", e);
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }

    async fn handle_publish(&self, msg: Publish) {
        let message = match InboundMessage::try_from(&msg) {
            Ok(m) => m,
            Err(e) => {
                tracing::error!("Error parsing MQTT message: {}", e);
                return;
            }
        };

        tracing::trace!("Received MQTT message on topic {}", message.topic);

        let subscription_ids = match msg.properties {
            Some(p) => p.subscription_identifiers,
            None => {
                tracing::error!("No subscription identifiers in MQTT message on {}", message.topic);
                return;
            }
        };

        for id in subscription_ids {
            let Some(sub) = id.checked_sub(1).and_then(|idx| self.subscriptions.get(idx)) else {
                tracing::error!("No subscription for id {}", id);
                continue;
            };

            for tx in sub.txs.iter() {
                if let Err(e) = tx
                    .send_timeout(message.clone(), tokio::time::Duration::from_secs(5))
                    .await
                {
                    tracing::error!("Failed to forward MQTT message to subscriber of {}: {}", sub.topic, e);
                }
            }
        }
    }
}
