use std::sync::Arc;

use infrastructure::EventBus;
use settings::Settings;
use tokio::time::Instant;

use crate::adapter::{MqttBridge, PeerRegistry, SessionManager, TcpPlatformPublisher};
use crate::protocol::SchemaRegistry;
use crate::wallpad::{PlatformEvent, WallpadEngine, WallpadRunner};

mod adapter;
mod command;
mod discovery;
mod link;
mod protocol;
mod settings;
mod wallpad;

#[tokio::main(flavor = "multi_thread")]
pub async fn main() {
    let settings = Settings::new().expect("Error reading configuration");
    let _monitoring = settings.monitoring.init().expect("Error initializing monitoring");

    let registry = SchemaRegistry::load(settings.storage.schema_file.as_deref()).expect("Error loading device schema");
    tracing::info!("Loaded device schema with {} device types", registry.len());

    let events = EventBus::<PlatformEvent>::new(256);
    let peers = PeerRegistry::default();

    let engine = WallpadEngine::new(Arc::new(registry), settings.engine_settings(), Instant::now());
    let (wallpad_runner, command_client, bus_feed) =
        WallpadRunner::new(engine, peers.clone(), events.emitter(), settings.wallpad_options());

    let notifier = settings
        .notification
        .as_ref()
        .map(|n| n.new_notifier())
        .transpose()
        .expect("Error initializing notification client");

    let wallpad_runner = wallpad_runner
        .with_recovery(settings.elfin.new_recovery())
        .with_notifier(notifier);

    let session_manager = SessionManager::bind(&settings.bus, peers.clone(), bus_feed, command_client.clone())
        .await
        .expect("Error starting session manager");

    let tcp_publisher = TcpPlatformPublisher::new(settings.platform.clone(), peers, events.subscribe());

    let mqtt_bridge = match &settings.mqtt {
        Some(config) => {
            let mut mqtt = config.new_client(&settings.platform.status_topic());
            let bridge = MqttBridge::new(settings.platform.clone(), &mut mqtt, events.subscribe(), command_client)
                .await
                .expect("Error initializing MQTT bridge");
            Some((mqtt, bridge))
        }
        None => {
            tracing::info!("No MQTT broker configured, publishing over TCP only");
            None
        }
    };

    let mqtt_exec = async move {
        match mqtt_bridge {
            Some((mqtt, bridge)) => {
                tokio::select!(
                    _ = mqtt.run() => {},
                    _ = bridge.run() => {},
                );
            }
            None => std::future::pending().await,
        }
    };

    tracing::info!("Starting main loop");

    tokio::select!(
        _ = wallpad_runner.run() => {},
        _ = session_manager.run() => {},
        _ = tcp_publisher.run() => {},
        _ = mqtt_exec => {},
    );

    tracing::warn!("Main loop ended, shutting down");
}
