use std::fmt;

use super::frame::Frame;
use super::schema::{DEVICE_ID, DeviceKind, DeviceSchema, SchemaError, SchemaRegistry};

/// Payload bytes holding the outlet reading as packed decimal digits.
const OUTLET_READING: std::ops::Range<usize> = 4..7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Power {
    On,
    Off,
}

impl Power {
    fn from_bool(on: bool) -> Self {
        if on { Power::On } else { Power::Off }
    }
}

impl fmt::Display for Power {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Power::On => f.write_str("ON"),
            Power::Off => f.write_str("OFF"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutletReading {
    Watt(f64),
    Cutoff(f64),
}

/// Device state decoded from a state frame.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceState {
    Light {
        id: u8,
        power: Power,
    },
    LightBreaker {
        id: u8,
        power: Power,
    },
    Thermo {
        id: u8,
        heat: bool,
        heating: bool,
        current_temp: u8,
        target_temp: u8,
    },
    Outlet {
        id: u8,
        power: Power,
        eco: bool,
        reading: OutletReading,
    },
    Fan {
        id: u8,
        power: Power,
        speed: String,
    },
    Gas {
        power: Power,
    },
    Ev {
        id: u8,
        power: Power,
        floor: String,
    },
}

/// Single attribute change as published to the home-automation platform,
/// e.g. device `Thermo1`, attribute `curTemp`, value `24`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateUpdate {
    pub device: String,
    pub attribute: &'static str,
    pub value: String,
}

impl StateUpdate {
    fn new(kind: DeviceKind, id: u8, attribute: &'static str, value: impl ToString) -> Self {
        Self {
            device: format!("{kind}{id}"),
            attribute,
            value: value.to_string(),
        }
    }
}

impl DeviceState {
    /// Decodes a state frame. `None` for frames no device type claims or frames whose
    /// payload does not decode.
    pub fn decode(registry: &SchemaRegistry, frame: &Frame) -> Option<Self> {
        let schema = registry.by_state_header(frame.header())?;

        match decode_with(schema, frame) {
            Ok(Some(state)) => Some(state),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Error decoding {} state frame {}: {}", schema.kind, frame, e);
                None
            }
        }
    }

    pub fn kind(&self) -> DeviceKind {
        match self {
            DeviceState::Light { .. } => DeviceKind::Light,
            DeviceState::LightBreaker { .. } => DeviceKind::LightBreaker,
            DeviceState::Thermo { .. } => DeviceKind::Thermo,
            DeviceState::Outlet { .. } => DeviceKind::Outlet,
            DeviceState::Fan { .. } => DeviceKind::Fan,
            DeviceState::Gas { .. } => DeviceKind::Gas,
            DeviceState::Ev { .. } => DeviceKind::Ev,
        }
    }

    /// Attribute values to publish for this state, in publication order.
    pub fn updates(&self) -> Vec<StateUpdate> {
        let kind = self.kind();

        match self {
            DeviceState::Light { id, power } | DeviceState::LightBreaker { id, power } => {
                vec![StateUpdate::new(kind, *id, "power", power)]
            }
            DeviceState::Thermo {
                id,
                heat,
                heating,
                current_temp,
                target_temp,
            } => vec![
                StateUpdate::new(kind, *id, "curTemp", format!("{current_temp:02}")),
                StateUpdate::new(kind, *id, "setTemp", format!("{target_temp:02}")),
                StateUpdate::new(kind, *id, "power", if *heat { "heat" } else { "off" }),
                StateUpdate::new(kind, *id, "action", if *heating { "heating" } else { "idle" }),
            ],
            DeviceState::Outlet { id, power, eco, reading } => {
                let reading = match reading {
                    OutletReading::Watt(watt) => StateUpdate::new(kind, *id, "watt", format!("{watt:.1}")),
                    OutletReading::Cutoff(cutoff) => StateUpdate::new(kind, *id, "cutoff", format_number(*cutoff)),
                };
                vec![
                    StateUpdate::new(kind, *id, "power", power),
                    StateUpdate::new(kind, *id, "ecomode", Power::from_bool(*eco)),
                    reading,
                ]
            }
            DeviceState::Fan { id, power, speed } => match power {
                Power::Off => vec![StateUpdate::new(kind, *id, "power", Power::Off)],
                Power::On => vec![
                    StateUpdate::new(kind, *id, "speed", speed),
                    StateUpdate::new(kind, *id, "power", Power::On),
                ],
            },
            DeviceState::Gas { power } => vec![StateUpdate::new(kind, 1, "power", power)],
            DeviceState::Ev { id, power, floor } => match power {
                Power::Off => vec![],
                Power::On => vec![
                    StateUpdate::new(kind, *id, "power", Power::On),
                    StateUpdate::new(kind, *id, "floor", floor),
                ],
            },
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let updates = self
            .updates()
            .into_iter()
            .map(|u| format!("{}={}", u.attribute, u.value))
            .collect::<Vec<_>>();

        match self {
            DeviceState::Gas { .. } => write!(f, "Gas[{}]", updates.join(", ")),
            DeviceState::Light { id, .. }
            | DeviceState::LightBreaker { id, .. }
            | DeviceState::Thermo { id, .. }
            | DeviceState::Outlet { id, .. }
            | DeviceState::Fan { id, .. }
            | DeviceState::Ev { id, .. } => write!(f, "{}{}[{}]", self.kind(), id, updates.join(", ")),
        }
    }
}

fn decode_with(schema: &DeviceSchema, frame: &Frame) -> Result<Option<DeviceState>, SchemaError> {
    let state = &schema.state;
    let id = if state.has_field(DEVICE_ID) {
        state.read(frame, DEVICE_ID)?
    } else {
        1
    };

    let power = state.read(frame, "power")?;
    let is = |symbol: &str| -> Result<bool, SchemaError> { Ok(state.value("power", symbol)? == power) };

    let decoded = match schema.kind {
        DeviceKind::Light => DeviceState::Light {
            id,
            power: Power::from_bool(is("on")?),
        },
        DeviceKind::LightBreaker => DeviceState::LightBreaker {
            id,
            power: Power::from_bool(is("on")?),
        },
        DeviceKind::Thermo => {
            let current = packed_decimal(&[state.read(frame, "currentTemp")?]);
            let target = packed_decimal(&[state.read(frame, "targetTemp")?]);

            let (Some(current_temp), Some(target_temp)) = (current, target) else {
                tracing::warn!("Thermostat frame {} carries non-decimal temperatures", frame);
                return Ok(None);
            };

            DeviceState::Thermo {
                id,
                heat: !is("off")?,
                heating: is("heating")?,
                current_temp: current_temp as u8,
                target_temp: target_temp as u8,
            }
        }
        DeviceKind::Outlet => {
            let power_on = is("on")? || is("on_with_eco")?;
            let eco = is("on_with_eco")? || is("off_with_eco")?;
            let wattage = state.read(frame, "stateType")? == state.value("stateType", "wattage")?;

            let reading_bytes = &frame.as_bytes()[OUTLET_READING];
            let raw = packed_decimal(reading_bytes).unwrap_or_else(|| {
                tracing::error!(
                    "Outlet {} reading {} is not decimal, using 0",
                    id,
                    hex::encode_upper(reading_bytes)
                );
                0
            }) as f64;

            let reading = if wattage {
                OutletReading::Watt(raw * schema.scaling.wattage)
            } else {
                OutletReading::Cutoff(raw * schema.scaling.ecomode)
            };

            DeviceState::Outlet {
                id,
                power: Power::from_bool(power_on),
                eco,
                reading,
            }
        }
        DeviceKind::Fan => {
            let speed = state
                .decode_field(frame, "speed")?
                .unwrap_or("low")
                .to_string();

            DeviceState::Fan {
                id,
                power: Power::from_bool(!is("off")?),
                speed,
            }
        }
        DeviceKind::Gas => DeviceState::Gas {
            power: Power::from_bool(is("on")?),
        },
        DeviceKind::Ev => DeviceState::Ev {
            id,
            power: Power::from_bool(is("on")?),
            floor: format!("{:02X}", state.read(frame, "floor")?),
        },
    };

    Ok(Some(decoded))
}

/// Reads bytes as packed decimal digits, e.g. `0x01 0x03` as 103.
fn packed_decimal(bytes: &[u8]) -> Option<u32> {
    bytes.iter().try_fold(0u32, |acc, byte| {
        let (high, low) = (u32::from(byte >> 4), u32::from(byte & 0x0F));
        (high < 10 && low < 10).then_some(acc * 100 + high * 10 + low)
    })
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}
