use infrastructure::{Delivery, EventListener, InboundMessage, Mqtt, MqttSender, MqttSubscription};

use crate::adapter::platform::PlatformSettings;
use crate::command::{CommandClient, CommandRequest};
use crate::wallpad::PlatformEvent;

/// Bridges platform events and commands to an MQTT broker.
pub struct MqttBridge {
    settings: PlatformSettings,
    sender: MqttSender,
    subscription: MqttSubscription,
    events: EventListener<PlatformEvent>,
    commands: CommandClient,
}

impl MqttBridge {
    pub async fn new(
        settings: PlatformSettings,
        mqtt: &mut Mqtt,
        events: EventListener<PlatformEvent>,
        commands: CommandClient,
    ) -> anyhow::Result<Self> {
        let subscription = mqtt.subscribe(settings.command_filter()).await?;

        Ok(Self {
            sender: mqtt.sender(),
            settings,
            subscription,
            events,
            commands,
        })
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                event = self.events.recv() => {
                    let Some(event) = event else {
                        tracing::warn!("Platform event channel closed, stopping MQTT bridge");
                        return;
                    };
                    self.publish(&event).await;
                }
                msg = self.subscription.recv() => {
                    let Some(msg) = msg else {
                        tracing::warn!("MQTT command subscription closed, stopping MQTT bridge");
                        return;
                    };
                    self.handle_command(msg).await;
                }
            }
        }
    }

    async fn publish(&self, event: &PlatformEvent) {
        let (topic, payload) = self.settings.topic_and_payload(event);

        let delivery = match event {
            PlatformEvent::Availability(_) => Delivery::Retained,
            PlatformEvent::State(_) => Delivery::Transient,
        };

        if let Err(e) = self.sender.publish(topic, payload, delivery).await {
            tracing::error!("Error publishing {:?} to MQTT: {:?}", event, e);
        }
    }

    #[tracing::instrument(skip_all, fields(topic = %msg.topic))]
    async fn handle_command(&self, msg: InboundMessage) {
        let Some(request) = CommandRequest::from_topic(&msg.topic, &msg.payload) else {
            tracing::warn!("Ignoring MQTT message on unexpected topic {}", msg.topic);
            return;
        };

        if let Err(e) = self.commands.submit(request).await {
            tracing::error!("Error submitting MQTT command: {:?}", e);
        }
    }
}
