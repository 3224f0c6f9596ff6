use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use infrastructure::{MonitoringConfig, MqttConfig};
use serde::Deserialize;

use crate::adapter::{BusSettings, NotificationSettings, PlatformSettings};
use crate::command::{ClimateLimits, QueueSettings};
use crate::link::{ElfinRecovery, LinkSettings};
use crate::wallpad::{EngineSettings, WallpadOptions};

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub bus: BusSettings,
    #[serde(default)]
    pub command: CommandSettings,
    #[serde(default)]
    pub elfin: ElfinSettings,
    #[serde(default)]
    pub climate: ClimateSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub platform: PlatformSettings,
    pub mqtt: Option<MqttConfig>,
    pub notification: Option<NotificationSettings>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name("config.toml").required(false))
            .add_source(Environment::with_prefix("WALLPAD").prefix_separator("_").separator("__"));

        let s = builder.build()?;
        s.try_deserialize()
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            queue: QueueSettings {
                max_send_count: self.command.max_send_count,
                min_receive_count: self.command.min_receive_count,
            },
            link: LinkSettings {
                reboot_interval: Duration::from_secs(self.elfin.reboot_interval_secs),
                auto_reboot: self.elfin.auto_reboot,
                notify_unavailable: self.elfin.notify_unavailable,
            },
            climate: ClimateLimits {
                min_temp: self.climate.min_temp,
                max_temp: self.climate.max_temp,
            },
            send_on_idle: self.command.send_on_idle,
            idle_threshold: Duration::from_millis(self.command.idle_threshold_ms),
        }
    }

    pub fn wallpad_options(&self) -> WallpadOptions {
        WallpadOptions {
            tick_interval: Duration::from_millis(self.command.interval_ms),
            discovery_window: Duration::from_secs(self.storage.discovery_window_secs),
            inventory_path: self.storage.inventory_file.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommandSettings {
    pub interval_ms: u64,
    pub max_send_count: u32,
    pub min_receive_count: u32,
    pub send_on_idle: bool,
    pub idle_threshold_ms: u64,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            interval_ms: 50,
            max_send_count: 20,
            min_receive_count: 1,
            send_on_idle: true,
            idle_threshold_ms: 130,
        }
    }
}

/// Serial-to-TCP adapter (EW11) management.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ElfinSettings {
    pub auto_reboot: bool,
    pub reboot_interval_secs: u64,
    pub notify_unavailable: bool,
    pub host: Option<String>,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub recovery_timeout_secs: u64,
}

impl Default for ElfinSettings {
    fn default() -> Self {
        Self {
            auto_reboot: true,
            reboot_interval_secs: 60,
            notify_unavailable: false,
            host: None,
            port: 23,
            username: "admin".to_string(),
            password: "admin".to_string(),
            recovery_timeout_secs: 10,
        }
    }
}

impl ElfinSettings {
    /// `None` without a management host, restarts are then only logged.
    pub fn new_recovery(&self) -> Option<ElfinRecovery> {
        let host = self.host.as_ref()?;

        Some(ElfinRecovery::new(
            format!("{}:{}", host, self.port),
            self.username.clone(),
            self.password.clone(),
            Duration::from_secs(self.recovery_timeout_secs),
        ))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClimateSettings {
    pub min_temp: i64,
    pub max_temp: i64,
}

impl Default for ClimateSettings {
    fn default() -> Self {
        let limits = ClimateLimits::default();
        Self {
            min_temp: limits.min_temp,
            max_temp: limits.max_temp,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Overrides the bundled device schema.
    pub schema_file: Option<PathBuf>,
    pub inventory_file: Option<PathBuf>,
    pub discovery_window_secs: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            schema_file: None,
            inventory_file: Some(PathBuf::from("/share/commax_found_device.json")),
            discovery_window_secs: 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn parse(toml: &str) -> Settings {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    const MINIMAL: &str = r#"
        [monitoring]
        service_name = "wallpad-bridge"

        [monitoring.logs]
        default_level = "info"
    "#;

    #[test]
    fn minimal_config_uses_defaults() {
        let settings = parse(MINIMAL);

        let engine = settings.engine_settings();
        assert_eq!(engine.queue.max_send_count, 20);
        assert_eq!(engine.queue.min_receive_count, 1);
        assert_eq!(engine.link.reboot_interval, Duration::from_secs(60));
        assert!(engine.link.auto_reboot);
        assert_eq!(engine.idle_threshold, Duration::from_millis(130));
        assert_eq!(engine.climate, ClimateLimits::default());

        let options = settings.wallpad_options();
        assert_eq!(options.tick_interval, Duration::from_millis(50));
        assert_eq!(options.discovery_window, Duration::from_secs(20));

        assert_eq!(settings.bus.platform_token, "iam_ha");
        assert_eq!(settings.platform.prefix, "commax");
        assert!(settings.mqtt.is_none());
        assert!(settings.notification.is_none());
        assert!(settings.elfin.new_recovery().is_none());
    }

    #[test]
    fn sections_override_defaults() {
        let toml = format!(
            "{}{}",
            MINIMAL,
            r#"
            [command]
            max_send_count = 5
            send_on_idle = false

            [elfin]
            host = "192.168.0.38"
            notify_unavailable = true
            recovery_timeout_secs = 3

            [climate]
            max_temp = 30

            [notification]
            token = "abc"
            "#
        );
        let settings = parse(&toml);

        let engine = settings.engine_settings();
        assert_eq!(engine.queue.max_send_count, 5);
        assert!(!engine.send_on_idle);
        assert!(engine.link.notify_unavailable);
        assert_eq!(engine.climate.max_temp, 30);
        assert_eq!(engine.climate.min_temp, 5);

        let recovery = settings.elfin.new_recovery().unwrap();
        assert_eq!(recovery.settle_time(), Duration::from_secs(3));

        let notification = settings.notification.unwrap();
        assert_eq!(
            notification.url,
            "http://supervisor/core/api/services/notify/persistent_notification"
        );
    }
}
