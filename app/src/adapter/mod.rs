mod mqtt;
mod platform;
mod session;
mod supervisor;

pub use mqtt::MqttBridge;
pub use platform::{PlatformSettings, TcpPlatformPublisher, parse_command_line};
pub use session::{BusSettings, Peer, PeerRegistry, SessionManager};
pub use supervisor::{NotificationSettings, SupervisorNotifier};
