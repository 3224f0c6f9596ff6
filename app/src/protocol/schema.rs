use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::Context;
use derive_more::derive::{Display, Error};
use serde::Deserialize;
use serde_json::Value;

use super::frame::{Frame, PAYLOAD_LEN};

const BUNDLED_SCHEMA: &str = include_str!("../../resources/packet_structures_commax.json");

/// Placeholder field name for unused payload bytes.
pub const EMPTY_FIELD: &str = "empty";
pub const DEVICE_ID: &str = "deviceId";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
pub enum DeviceKind {
    Light,
    LightBreaker,
    Thermo,
    Outlet,
    Fan,
    Gas,
    #[display("EV")]
    Ev,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum PacketKind {
    #[display("command")]
    Command,
    #[display("state")]
    State,
}

#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum SchemaError {
    #[display("Unknown device type {name}")]
    UnknownDevice { name: String },
    #[display("{device} has no {packet} field {field}")]
    MissingField {
        device: DeviceKind,
        packet: PacketKind,
        field: String,
    },
    #[display("{device} {packet} field {field} has no value {symbol}")]
    MissingSymbol {
        device: DeviceKind,
        packet: PacketKind,
        field: String,
        symbol: String,
    },
    #[display("{device} {packet} field {field} has invalid byte {value:?}")]
    InvalidValue {
        device: DeviceKind,
        packet: PacketKind,
        field: String,
        value: String,
    },
    #[display("{device} {packet} has invalid header {value:?}")]
    InvalidHeader {
        device: DeviceKind,
        packet: PacketKind,
        value: String,
    },
}

impl DeviceKind {
    pub const ALL: [DeviceKind; 7] = [
        DeviceKind::Light,
        DeviceKind::LightBreaker,
        DeviceKind::Thermo,
        DeviceKind::Outlet,
        DeviceKind::Fan,
        DeviceKind::Gas,
        DeviceKind::Ev,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.to_string() == name)
    }

    /// Fields and symbols the translation rules of a device type depend on.
    fn requirements(&self) -> &'static [(PacketKind, &'static str, &'static [&'static str])] {
        use PacketKind::*;

        match self {
            DeviceKind::Light => &[
                (Command, DEVICE_ID, &[]),
                (Command, "power", &["on", "off"]),
                (State, "power", &["on", "off"]),
                (State, DEVICE_ID, &[]),
            ],
            DeviceKind::LightBreaker => &[
                (Command, DEVICE_ID, &[]),
                (Command, "commandType", &["power"]),
                (Command, "power", &["on", "off"]),
                (State, "power", &["on", "off"]),
                (State, DEVICE_ID, &[]),
            ],
            DeviceKind::Thermo => &[
                (Command, DEVICE_ID, &[]),
                (Command, "commandType", &["power", "change"]),
                (Command, "value", &["on", "off"]),
                (State, "power", &["off", "idle", "heating"]),
                (State, DEVICE_ID, &[]),
                (State, "currentTemp", &[]),
                (State, "targetTemp", &[]),
            ],
            DeviceKind::Outlet => &[
                (Command, DEVICE_ID, &[]),
                (Command, "commandType", &["power", "ecomode", "setCutoff"]),
                (Command, "power", &["on", "off"]),
                (Command, "cutoffValue", &[]),
                (State, "power", &["on", "off", "on_with_eco", "off_with_eco"]),
                (State, DEVICE_ID, &[]),
                (State, "stateType", &["wattage", "ecomode"]),
                (State, "data3", &[]),
            ],
            DeviceKind::Fan => &[
                (Command, DEVICE_ID, &[]),
                (Command, "commandType", &["power", "setSpeed"]),
                (Command, "value", &["on", "off"]),
                (State, "power", &["on", "off"]),
                (State, DEVICE_ID, &[]),
                (State, "speed", &[]),
            ],
            DeviceKind::Gas => &[
                (Command, DEVICE_ID, &[]),
                (Command, "power", &["off"]),
                (State, "power", &["on", "off"]),
            ],
            DeviceKind::Ev => &[
                (Command, DEVICE_ID, &[]),
                (Command, "power", &["on"]),
                (State, "power", &["on"]),
                (State, DEVICE_ID, &[]),
                (State, "floor", &[]),
            ],
        }
    }
}

/// Symbolic name to byte table of a single field.
#[derive(Debug, Clone, Default)]
pub struct ValueTable {
    by_symbol: BTreeMap<String, u8>,
    by_byte: BTreeMap<u8, String>,
}

impl ValueTable {
    pub fn byte(&self, symbol: &str) -> Option<u8> {
        self.by_symbol.get(symbol).copied()
    }

    pub fn symbol(&self, byte: u8) -> Option<&str> {
        self.by_byte.get(&byte).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.by_symbol.is_empty()
    }

    fn insert(&mut self, symbol: &str, byte: u8) {
        self.by_symbol.insert(symbol.to_string(), byte);
        //first symbol wins on reverse lookup
        self.by_byte.entry(byte).or_insert_with(|| symbol.to_string());
    }
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub values: ValueTable,
}

/// Layout of either the command or the state frame of a device type.
#[derive(Debug, Clone)]
pub struct PacketSchema {
    device: DeviceKind,
    packet: PacketKind,
    pub header: u8,
    fields: BTreeMap<usize, FieldDef>,
    positions: HashMap<String, usize>,
}

impl PacketSchema {
    pub fn position(&self, field: &str) -> Result<usize, SchemaError> {
        self.positions
            .get(field)
            .copied()
            .ok_or_else(|| self.missing_field(field))
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.positions.contains_key(field)
    }

    pub fn field(&self, field: &str) -> Result<&FieldDef, SchemaError> {
        let pos = self.position(field)?;
        self.fields.get(&pos).ok_or_else(|| self.missing_field(field))
    }

    /// Byte a symbolic value of a field encodes to.
    pub fn value(&self, field: &str, symbol: &str) -> Result<u8, SchemaError> {
        self.field(field)?
            .values
            .byte(symbol)
            .ok_or_else(|| SchemaError::MissingSymbol {
                device: self.device,
                packet: self.packet,
                field: field.to_string(),
                symbol: symbol.to_string(),
            })
    }

    /// Raw byte of a named field in a frame.
    pub fn read(&self, frame: &Frame, field: &str) -> Result<u8, SchemaError> {
        let pos = self.position(field)?;
        frame.byte(pos).ok_or_else(|| self.missing_field(field))
    }

    /// Symbolic value of a named field in a frame, `None` for bytes without a symbol.
    pub fn decode_field(&self, frame: &Frame, field: &str) -> Result<Option<&str>, SchemaError> {
        let byte = self.read(frame, field)?;
        Ok(self.field(field)?.values.symbol(byte))
    }

    pub fn encode_field(&self, payload: &mut [u8; PAYLOAD_LEN], field: &str, symbol: &str) -> Result<(), SchemaError> {
        let byte = self.value(field, symbol)?;
        self.encode_raw(payload, field, byte)
    }

    pub fn encode_raw(&self, payload: &mut [u8; PAYLOAD_LEN], field: &str, byte: u8) -> Result<(), SchemaError> {
        let pos = self.position(field)?;
        payload[pos] = byte;
        Ok(())
    }

    /// Payload with the header set and every other byte zero.
    pub fn empty_payload(&self) -> [u8; PAYLOAD_LEN] {
        let mut payload = [0u8; PAYLOAD_LEN];
        payload[0] = self.header;
        payload
    }

    fn missing_field(&self, field: &str) -> SchemaError {
        SchemaError::MissingField {
            device: self.device,
            packet: self.packet,
            field: field.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scaling {
    pub wattage: f64,
    pub ecomode: f64,
}

impl Default for Scaling {
    fn default() -> Self {
        Self {
            wattage: 0.1,
            ecomode: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeviceSchema {
    pub kind: DeviceKind,
    /// Home-automation domain of the device, e.g. `light` or `climate`.
    pub domain: String,
    pub command: PacketSchema,
    pub state: PacketSchema,
    pub scaling: Scaling,
}

#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    devices: BTreeMap<DeviceKind, DeviceSchema>,
}

#[derive(Debug, Deserialize)]
struct RawDevice {
    #[serde(rename = "type")]
    domain: String,
    command: RawPacket,
    state: RawPacket,
}

#[derive(Debug, Deserialize)]
struct RawPacket {
    header: String,
    #[serde(default)]
    structure: BTreeMap<String, RawField>,
    #[serde(flatten)]
    extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RawField {
    name: String,
    #[serde(default)]
    values: BTreeMap<String, String>,
}

impl SchemaRegistry {
    pub fn bundled() -> anyhow::Result<Self> {
        Self::from_json(BUNDLED_SCHEMA).context("Error parsing bundled packet structures")
    }

    /// Uses the schema file if one is configured, the bundled Commax layout otherwise.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Error reading packet structures from {}", path.display()))?;
                Self::from_json(&content)
                    .with_context(|| format!("Error parsing packet structures from {}", path.display()))
            }
            None => Self::bundled(),
        }
    }

    /// Parses a schema document. Unknown device types and devices failing validation are
    /// skipped with an error log, the rest stays usable.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let raw: BTreeMap<String, RawDevice> = serde_json::from_str(json)?;

        let mut devices = BTreeMap::new();
        for (name, raw_device) in raw {
            let Some(kind) = DeviceKind::from_name(&name) else {
                tracing::warn!("Ignoring unknown device type {} in packet structures", name);
                continue;
            };

            match build_device(kind, raw_device) {
                Ok(device) => {
                    devices.insert(kind, device);
                }
                Err(e) => tracing::error!("Dropping device type {} from packet structures: {}", kind, e),
            }
        }

        tracing::info!("Loaded packet structures for {} device types", devices.len());

        Ok(Self { devices })
    }

    pub fn get(&self, kind: DeviceKind) -> Result<&DeviceSchema, SchemaError> {
        self.devices.get(&kind).ok_or_else(|| SchemaError::UnknownDevice {
            name: kind.to_string(),
        })
    }

    pub fn by_name(&self, name: &str) -> Result<&DeviceSchema, SchemaError> {
        DeviceKind::from_name(name)
            .and_then(|kind| self.devices.get(&kind))
            .ok_or_else(|| SchemaError::UnknownDevice { name: name.to_string() })
    }

    pub fn by_command_header(&self, header: u8) -> Option<&DeviceSchema> {
        self.devices.values().find(|d| d.command.header == header)
    }

    pub fn by_state_header(&self, header: u8) -> Option<&DeviceSchema> {
        self.devices.values().find(|d| d.state.header == header)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceSchema> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

fn build_device(kind: DeviceKind, raw: RawDevice) -> Result<DeviceSchema, SchemaError> {
    let scaling = Scaling {
        wattage: scaling_factor(kind, &raw.state.extra, "wattage", Scaling::default().wattage),
        ecomode: scaling_factor(kind, &raw.state.extra, "ecomode", Scaling::default().ecomode),
    };

    let device = DeviceSchema {
        kind,
        domain: raw.domain,
        command: build_packet(kind, PacketKind::Command, raw.command)?,
        state: build_packet(kind, PacketKind::State, raw.state)?,
        scaling,
    };

    for (packet, field, symbols) in kind.requirements() {
        let schema = match packet {
            PacketKind::Command => &device.command,
            PacketKind::State => &device.state,
        };

        for symbol in symbols.iter() {
            schema.value(field, symbol)?;
        }
        schema.position(field)?;
    }

    Ok(device)
}

fn build_packet(device: DeviceKind, packet: PacketKind, raw: RawPacket) -> Result<PacketSchema, SchemaError> {
    let header = parse_byte(&raw.header).ok_or_else(|| SchemaError::InvalidHeader {
        device,
        packet,
        value: raw.header.clone(),
    })?;

    let mut fields = BTreeMap::new();
    for (index, raw_field) in raw.structure {
        let pos = match index.parse::<usize>() {
            Ok(pos) if (1..PAYLOAD_LEN).contains(&pos) => pos,
            _ => {
                tracing::warn!("{} {} ignores field {} at invalid position {:?}", device, packet, raw_field.name, index);
                continue;
            }
        };

        let mut values = ValueTable::default();
        for (symbol, value) in raw_field.values.iter() {
            let byte = parse_byte(value).ok_or_else(|| SchemaError::InvalidValue {
                device,
                packet,
                field: raw_field.name.clone(),
                value: value.clone(),
            })?;
            values.insert(symbol, byte);
        }

        fields.insert(
            pos,
            FieldDef {
                name: raw_field.name,
                values,
            },
        );
    }

    let positions = build_field_positions(device, packet, &fields);

    Ok(PacketSchema {
        device,
        packet,
        header,
        fields,
        positions,
    })
}

/// Name to position index in byte order. Duplicate names keep the first position.
fn build_field_positions(
    device: DeviceKind,
    packet: PacketKind,
    fields: &BTreeMap<usize, FieldDef>,
) -> HashMap<String, usize> {
    let mut positions = HashMap::new();

    for (pos, field) in fields.iter() {
        if field.name == EMPTY_FIELD {
            continue;
        }

        if let Some(existing) = positions.get(&field.name) {
            tracing::error!(
                "{} {} defines field {} at positions {} and {}, ignoring the latter",
                device,
                packet,
                field.name,
                existing,
                pos
            );
            continue;
        }

        positions.insert(field.name.clone(), *pos);
    }

    positions
}

fn scaling_factor(device: DeviceKind, extra: &serde_json::Map<String, Value>, name: &str, default: f64) -> f64 {
    //both spellings are found in the wild
    let value = [format!("{name}_scaling_factor"), format!("{name}_scailing_factor")]
        .iter()
        .find_map(|key| extra.get(key));

    let Some(value) = value else {
        return default;
    };

    let factor = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match factor {
        Some(f) if f.is_finite() && f != 0.0 => f,
        _ => {
            tracing::warn!("{} has invalid {} scaling factor {}, using {}", device, name, value, default);
            default
        }
    }
}

fn parse_byte(value: &str) -> Option<u8> {
    let value = value.trim();
    if value.len() != 2 {
        return None;
    }
    u8::from_str_radix(value, 16).ok()
}
