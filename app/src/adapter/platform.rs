use infrastructure::EventListener;
use serde::Deserialize;

use crate::adapter::session::{Peer, PeerRegistry};
use crate::command::CommandRequest;
use crate::wallpad::PlatformEvent;

#[derive(Debug, Clone, Deserialize)]
pub struct PlatformSettings {
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_prefix() -> String {
    "commax".to_string()
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self { prefix: default_prefix() }
    }
}

impl PlatformSettings {
    pub fn status_topic(&self) -> String {
        format!("{}/status", self.prefix)
    }

    pub fn command_filter(&self) -> String {
        format!("{}/+/+/command", self.prefix)
    }

    /// Topic and payload of an event, e.g. `commax/Light1/power/state` and `ON`.
    pub fn topic_and_payload(&self, event: &PlatformEvent) -> (String, String) {
        match event {
            PlatformEvent::State(update) => (
                format!("{}/{}/{}/state", self.prefix, update.device, update.attribute),
                update.value.clone(),
            ),
            PlatformEvent::Availability(online) => {
                let status = if *online { "online" } else { "offline" };
                (self.status_topic(), status.to_string())
            }
        }
    }
}

/// Parses a `topic:value` line from the platform peer.
pub fn parse_command_line(line: &str) -> Option<CommandRequest> {
    let (topic, value) = line.trim().split_once(':')?;
    CommandRequest::from_topic(topic, value)
}

/// Writes platform events as `topic:value` lines to the connected platform peer.
pub struct TcpPlatformPublisher {
    settings: PlatformSettings,
    peers: PeerRegistry,
    events: EventListener<PlatformEvent>,
}

impl TcpPlatformPublisher {
    pub fn new(settings: PlatformSettings, peers: PeerRegistry, events: EventListener<PlatformEvent>) -> Self {
        Self {
            settings,
            peers,
            events,
        }
    }

    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            if !self.peers.is_connected(Peer::Platform) {
                tracing::trace!("No platform peer connected, dropping {:?}", event);
                continue;
            }

            let (topic, payload) = self.settings.topic_and_payload(&event);
            if let Err(e) = self.peers.send(Peer::Platform, format!("{}:{}\n", topic, payload).into_bytes()) {
                tracing::error!("Error sending {} to platform: {}", topic, e);
            }
        }

        tracing::warn!("Platform event channel closed, stopping TCP publisher");
    }
}
