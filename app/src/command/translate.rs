use derive_more::derive::{Display, Error};

use crate::protocol::{DEVICE_ID, DeviceKind, Frame, FrameError, SchemaError, SchemaRegistry};

/// Command as received from the home-automation platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandRequest {
    Device {
        device: String,
        action: String,
        value: String,
    },
    Raw {
        packet: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClimateLimits {
    pub min_temp: i64,
    pub max_temp: i64,
}

impl Default for ClimateLimits {
    fn default() -> Self {
        Self {
            min_temp: 5,
            max_temp: 40,
        }
    }
}

#[derive(Debug, Display, Error)]
pub enum TranslateError {
    #[display("Unknown device {device}")]
    UnknownDevice { device: String },
    #[display("Device {device} has no numeric id")]
    InvalidDeviceId { device: String },
    #[display("Action {action} is not supported by {device}")]
    UnsupportedAction { device: String, action: String },
    #[display("Invalid value {value:?} for {device}/{action}")]
    InvalidValue {
        device: String,
        action: String,
        value: String,
    },
    #[display("Temperature {value} outside of allowed range {min}..={max}")]
    OutOfRange { value: i64, min: i64, max: i64 },
    #[display("Invalid raw frame: {source}")]
    RawFrame { source: FrameError },
    #[display("Schema error: {source}")]
    Schema { source: SchemaError },
}

impl From<SchemaError> for TranslateError {
    fn from(source: SchemaError) -> Self {
        TranslateError::Schema { source }
    }
}

impl CommandRequest {
    /// Parses a command topic of the form `prefix/Device1/action/command`.
    /// `prefix/raw/.../command` injects the payload as frame.
    pub fn from_topic(topic: &str, value: &str) -> Option<Self> {
        let parts: Vec<&str> = topic.trim().split('/').collect();
        if parts.len() < 3 || parts.last() != Some(&"command") {
            return None;
        }

        if parts[1].eq_ignore_ascii_case("raw") {
            return Some(CommandRequest::Raw {
                packet: value.trim().to_string(),
            });
        }

        Some(CommandRequest::Device {
            device: parts[1].to_string(),
            action: parts[2].to_string(),
            value: value.trim().to_string(),
        })
    }

    pub fn translate(&self, registry: &SchemaRegistry, limits: &ClimateLimits) -> Result<Frame, TranslateError> {
        match self {
            CommandRequest::Device { device, action, value } => translate(registry, limits, device, action, value),
            CommandRequest::Raw { packet } => raw_frame(packet),
        }
    }
}

impl std::fmt::Display for CommandRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandRequest::Device { device, action, value } => write!(f, "{device}/{action}={value}"),
            CommandRequest::Raw { packet } => write!(f, "raw={packet}"),
        }
    }
}

fn raw_frame(packet: &str) -> Result<Frame, TranslateError> {
    let packet = packet.trim();
    let frame = match packet.len() {
        14 => Frame::seal_hex(packet),
        16 => Frame::from_hex(packet),
        len => Err(FrameError::Length { len: len / 2 }),
    };

    frame.map_err(|source| TranslateError::RawFrame { source })
}

/// Splits `Thermo2` into device type name and id.
fn split_device(device: &str) -> Result<(String, u8), TranslateError> {
    let name: String = device.chars().filter(|c| c.is_ascii_alphabetic()).collect();
    let digits: String = device.chars().filter(|c| c.is_ascii_digit()).collect();

    let id = digits.parse::<u8>().map_err(|_| TranslateError::InvalidDeviceId {
        device: device.to_string(),
    })?;

    Ok((name, id))
}

fn translate(
    registry: &SchemaRegistry,
    limits: &ClimateLimits,
    device: &str,
    action: &str,
    value: &str,
) -> Result<Frame, TranslateError> {
    let (name, id) = split_device(device)?;
    let schema = registry
        .by_name(&name)
        .map_err(|_| TranslateError::UnknownDevice {
            device: device.to_string(),
        })?;

    let cmd = &schema.command;
    let mut payload = cmd.empty_payload();
    cmd.encode_raw(&mut payload, DEVICE_ID, id)?;

    let unsupported = || TranslateError::UnsupportedAction {
        device: device.to_string(),
        action: action.to_string(),
    };
    let invalid = || TranslateError::InvalidValue {
        device: device.to_string(),
        action: action.to_string(),
        value: value.to_string(),
    };
    let on_off = if value == "ON" { "on" } else { "off" };

    match (schema.kind, action) {
        (DeviceKind::Light, "power") => {
            cmd.encode_field(&mut payload, "power", on_off)?;
        }
        (DeviceKind::LightBreaker, _) => {
            cmd.encode_field(&mut payload, "commandType", "power")?;
            cmd.encode_field(&mut payload, "power", on_off)?;
        }
        (DeviceKind::Outlet, "power" | "ecomode") => {
            cmd.encode_field(&mut payload, "commandType", action)?;
            cmd.encode_field(&mut payload, "power", on_off)?;
        }
        (DeviceKind::Outlet, "setCutoff") => {
            let cutoff = u8::from_str_radix(value, 16).map_err(|_| invalid())?;
            cmd.encode_field(&mut payload, "commandType", "setCutoff")?;
            cmd.encode_raw(&mut payload, "cutoffValue", cutoff)?;
        }
        (DeviceKind::Thermo, "power") => {
            let symbol = if value == "heat" { "on" } else { "off" };
            cmd.encode_field(&mut payload, "commandType", "power")?;
            cmd.encode_field(&mut payload, "value", symbol)?;
        }
        (DeviceKind::Thermo, "setTemp") => {
            let temp = value.parse::<f64>().map_err(|_| invalid())?.trunc() as i64;
            if temp < limits.min_temp || temp > limits.max_temp {
                return Err(TranslateError::OutOfRange {
                    value: temp,
                    min: limits.min_temp,
                    max: limits.max_temp,
                });
            }

            //decimal digits sent as hex digits, 24 becomes 0x24
            let byte = u8::from_str_radix(&temp.to_string(), 16).map_err(|_| invalid())?;
            cmd.encode_field(&mut payload, "commandType", "change")?;
            cmd.encode_raw(&mut payload, "value", byte)?;
        }
        (DeviceKind::Fan, "power") => {
            cmd.encode_field(&mut payload, "commandType", "power")?;
            cmd.encode_field(&mut payload, "value", on_off)?;
        }
        (DeviceKind::Fan, "speed") => {
            if !matches!(value, "low" | "medium" | "high") {
                return Err(invalid());
            }
            cmd.encode_field(&mut payload, "commandType", "setSpeed")?;
            cmd.encode_field(&mut payload, "value", value)?;
        }
        (DeviceKind::Gas, _) => {
            if !matches!(value, "PRESS" | "ON") {
                return Err(invalid());
            }
            cmd.encode_field(&mut payload, "power", "off")?;
        }
        (DeviceKind::Ev, _) => {
            if !matches!(value, "PRESS" | "ON") {
                return Err(invalid());
            }
            cmd.encode_field(&mut payload, "power", "on")?;
            for field in ["unknown1", "unknown2", "unknown3"] {
                if cmd.has_field(field) {
                    cmd.encode_field(&mut payload, field, "fixed")?;
                }
            }
        }
        _ => return Err(unsupported()),
    }

    let frame = Frame::seal(payload);
    tracing::debug!("Translated {} {} {} into {}", device, action, value, frame);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(device: &str, action: &str, value: &str) -> Result<String, TranslateError> {
        let registry = SchemaRegistry::bundled().unwrap();
        let request = CommandRequest::Device {
            device: device.to_string(),
            action: action.to_string(),
            value: value.to_string(),
        };
        request
            .translate(&registry, &ClimateLimits::default())
            .map(|f| f.to_string())
    }

    #[test]
    fn light_power() {
        assert_eq!(frame("Light1", "power", "ON").unwrap(), "3101010000000033");
        assert_eq!(frame("Light1", "power", "OFF").unwrap(), "3101000000000032");
    }

    #[test]
    fn light_breaker_power() {
        assert_eq!(frame("LightBreaker1", "power", "ON").unwrap(), "2201010100000025");
        assert_eq!(frame("LightBreaker1", "power", "OFF").unwrap(), "2201010000000024");
    }

    #[test]
    fn thermostat_commands() {
        assert_eq!(frame("Thermo1", "power", "heat").unwrap(), "040104810000008A");
        assert_eq!(frame("Thermo1", "power", "off").unwrap(), "0401040000000009");
        assert_eq!(frame("Thermo1", "setTemp", "24").unwrap(), "040103240000002C");
        assert_eq!(frame("Thermo1", "setTemp", "24.7").unwrap(), "040103240000002C");
    }

    #[test]
    fn thermostat_setpoint_out_of_range_is_rejected() {
        assert!(matches!(
            frame("Thermo1", "setTemp", "41"),
            Err(TranslateError::OutOfRange { value: 41, .. })
        ));
        assert!(matches!(
            frame("Thermo1", "setTemp", "4"),
            Err(TranslateError::OutOfRange { value: 4, .. })
        ));
        assert!(matches!(
            frame("Thermo1", "setTemp", "warm"),
            Err(TranslateError::InvalidValue { .. })
        ));
    }

    #[test]
    fn fan_commands() {
        assert_eq!(frame("Fan1", "power", "ON").unwrap(), "780101040000007E");
        assert_eq!(frame("Fan1", "power", "OFF").unwrap(), "780101000000007A");
        assert_eq!(frame("Fan1", "speed", "low").unwrap(), "780102010000007C");
        assert_eq!(frame("Fan1", "speed", "medium").unwrap(), "780102020000007D");
        assert_eq!(frame("Fan1", "speed", "high").unwrap(), "780102030000007E");
        assert!(matches!(
            frame("Fan1", "speed", "turbo"),
            Err(TranslateError::InvalidValue { .. })
        ));
    }

    #[test]
    fn outlet_commands() {
        assert_eq!(frame("Outlet1", "power", "ON").unwrap(), "7A0101010000007D");
        assert_eq!(frame("Outlet1", "power", "OFF").unwrap(), "7A0101000000007C");
        assert_eq!(frame("Outlet1", "ecomode", "ON").unwrap(), "7A0102010000007E");
        assert_eq!(frame("Outlet1", "setCutoff", "80").unwrap(), "7A010300800000FE");
        assert_eq!(frame("Outlet2", "power", "ON").unwrap(), "7A0201010000007E");
        assert_eq!(frame("Outlet2", "ecomode", "ON").unwrap(), "7A0202010000007F");
    }

    #[test]
    fn gas_and_elevator_buttons() {
        assert_eq!(frame("Gas1", "command", "PRESS").unwrap(), "1101800000000092");
        assert_eq!(frame("EV1", "command", "PRESS").unwrap(), "A0010101081500C0");
        assert!(matches!(
            frame("Gas1", "command", "OFF"),
            Err(TranslateError::InvalidValue { .. })
        ));
    }

    #[test]
    fn unknown_devices_and_actions() {
        assert!(matches!(
            frame("Doorbell1", "power", "ON"),
            Err(TranslateError::UnknownDevice { .. })
        ));
        assert!(matches!(
            frame("Light", "power", "ON"),
            Err(TranslateError::InvalidDeviceId { .. })
        ));
        assert!(matches!(
            frame("Light1", "brightness", "50"),
            Err(TranslateError::UnsupportedAction { .. })
        ));
    }

    #[test]
    fn raw_frames() {
        let registry = SchemaRegistry::bundled().unwrap();
        let limits = ClimateLimits::default();
        let raw = |packet: &str| CommandRequest::Raw {
            packet: packet.to_string(),
        };

        assert_eq!(
            raw("31010100000000").translate(&registry, &limits).unwrap().to_string(),
            "3101010000000033"
        );
        assert_eq!(
            raw("3101010000000033").translate(&registry, &limits).unwrap().to_string(),
            "3101010000000033"
        );
        assert!(raw("3101010000000034").translate(&registry, &limits).is_err());
        assert!(raw("310101").translate(&registry, &limits).is_err());
    }

    #[test]
    fn command_topics() {
        assert_eq!(
            CommandRequest::from_topic("commax/Light1/power/command", "ON"),
            Some(CommandRequest::Device {
                device: "Light1".to_string(),
                action: "power".to_string(),
                value: "ON".to_string(),
            })
        );
        assert_eq!(
            CommandRequest::from_topic("commax/raw/send/command", " 31010100000000 "),
            Some(CommandRequest::Raw {
                packet: "31010100000000".to_string(),
            })
        );
        assert_eq!(CommandRequest::from_topic("commax/Light1/power/state", "ON"), None);
        assert_eq!(CommandRequest::from_topic("commax", "ON"), None);
    }
}
