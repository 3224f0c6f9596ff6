use std::collections::BTreeSet;
use std::fmt;

use super::frame::{Frame, PAYLOAD_LEN};
use super::schema::{DEVICE_ID, DeviceKind, DeviceSchema, PacketKind, PacketSchema, SchemaError, SchemaRegistry};

/// Acknowledgement pattern for a command. A received state frame matches when every
/// required byte holds one of its possible values; an empty value set accepts anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedStatePacket {
    required_bytes: BTreeSet<usize>,
    possible_values: [BTreeSet<u8>; PAYLOAD_LEN],
}

impl ExpectedStatePacket {
    fn new(header: u8) -> Self {
        let mut expected = Self {
            required_bytes: BTreeSet::new(),
            possible_values: Default::default(),
        };
        expected.require(0, [header]);
        expected
    }

    fn require(&mut self, pos: usize, values: impl IntoIterator<Item = u8>) {
        self.required_bytes.insert(pos);
        self.possible_values[pos].extend(values);
    }

    pub fn required_bytes(&self) -> &BTreeSet<usize> {
        &self.required_bytes
    }

    pub fn possible_values(&self, pos: usize) -> Option<&BTreeSet<u8>> {
        self.possible_values.get(pos)
    }

    pub fn matches(&self, frame: &Frame) -> bool {
        self.required_bytes.iter().all(|pos| {
            let allowed = &self.possible_values[*pos];
            match frame.byte(*pos) {
                Some(byte) => allowed.is_empty() || allowed.contains(&byte),
                None => false,
            }
        })
    }

    /// Derives the state frame confirming a command. `None` for commands without
    /// confirmation, e.g. elevator calls, or commands no device type claims.
    pub fn predict(registry: &SchemaRegistry, command: &Frame) -> Option<Self> {
        let Some(schema) = registry.by_command_header(command.header()) else {
            tracing::error!("No device type for command header {:02X} of {}", command.header(), command);
            return None;
        };

        match predict_with(schema, command) {
            Ok(expected) => expected,
            Err(e) => {
                tracing::error!("Error deriving expected state for {} command {}: {}", schema.kind, command, e);
                None
            }
        }
    }
}

impl fmt::Display for ExpectedStatePacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        //unconstrained positions as `__`, alternatives separated by `|`
        for pos in 0..PAYLOAD_LEN {
            if pos > 0 {
                f.write_str(" ")?;
            }
            let values = &self.possible_values[pos];
            if !self.required_bytes.contains(&pos) || values.is_empty() {
                f.write_str("__")?;
            } else {
                let alternatives = values.iter().map(|v| format!("{v:02X}")).collect::<Vec<_>>();
                f.write_str(&alternatives.join("|"))?;
            }
        }
        Ok(())
    }
}

fn predict_with(schema: &DeviceSchema, command: &Frame) -> Result<Option<ExpectedStatePacket>, SchemaError> {
    if schema.kind == DeviceKind::Ev {
        return Ok(None);
    }

    let cmd = &schema.command;
    let state = &schema.state;
    let mut expected = ExpectedStatePacket::new(state.header);

    if state.has_field(DEVICE_ID) {
        expected.require(state.position(DEVICE_ID)?, [cmd.read(command, DEVICE_ID)?]);
    }

    let state_power = state.position("power")?;

    match schema.kind {
        DeviceKind::Thermo => {
            let command_type = cmd.read(command, "commandType")?;
            let value = cmd.read(command, "value")?;

            if command_type == cmd.value("commandType", "power")? {
                if value == cmd.value("value", "off")? {
                    expected.require(state_power, [state.value("power", "off")?]);
                } else {
                    expected.require(
                        state_power,
                        [state.value("power", "idle")?, state.value("power", "heating")?],
                    );
                }
            } else if command_type == cmd.value("commandType", "change")? {
                expected.require(state.position("targetTemp")?, [value]);
            }
        }
        DeviceKind::Light | DeviceKind::LightBreaker | DeviceKind::Gas => {
            let symbol = if cmd.read(command, "power")? == cmd.value("power", "off")? {
                "off"
            } else {
                "on"
            };
            expected.require(state_power, [state.value("power", symbol)?]);
        }
        DeviceKind::Outlet => {
            let command_type = cmd.read(command, "commandType")?;
            let off = cmd.read(command, "power")? == cmd.value("power", "off")?;

            if command_type == cmd.value("commandType", "power")? {
                let symbols = if off { ["off", "off_with_eco"] } else { ["on", "on_with_eco"] };
                expected.require(state_power, values(state, symbols)?);
            } else if command_type == cmd.value("commandType", "ecomode")? {
                let symbols = if off { ["on", "off"] } else { ["on_with_eco", "off_with_eco"] };
                expected.require(state_power, values(state, symbols)?);
            } else if command_type == cmd.value("commandType", "setCutoff")? {
                expected.require(state.position("stateType")?, [state.value("stateType", "ecomode")?]);
                expected.require(state.position("data3")?, [cmd.read(command, "cutoffValue")?]);
            }
        }
        DeviceKind::Fan => {
            let command_type = cmd.read(command, "commandType")?;
            let value = cmd.read(command, "value")?;

            if command_type == cmd.value("commandType", "power")? {
                let symbol = if value == cmd.value("value", "off")? { "off" } else { "on" };
                expected.require(state_power, [state.value("power", symbol)?]);
            } else if command_type == cmd.value("commandType", "setSpeed")? {
                let field = cmd.field("value")?;
                let speed = field.values.symbol(value).ok_or_else(|| SchemaError::InvalidValue {
                    device: schema.kind,
                    packet: PacketKind::Command,
                    field: "value".to_string(),
                    value: format!("{value:02X}"),
                })?;
                expected.require(state.position("speed")?, [state.value("speed", speed)?]);
            }
        }
        DeviceKind::Ev => {}
    }

    Ok(Some(expected))
}

fn values(schema: &PacketSchema, symbols: [&str; 2]) -> Result<[u8; 2], SchemaError> {
    Ok([schema.value("power", symbols[0])?, schema.value("power", symbols[1])?])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn predict(command: &str) -> Option<ExpectedStatePacket> {
        let registry = SchemaRegistry::bundled().unwrap();
        ExpectedStatePacket::predict(&registry, &Frame::from_hex(command).unwrap())
    }

    fn matches(expected: &ExpectedStatePacket, state: &str) -> bool {
        expected.matches(&Frame::seal_hex(state).unwrap())
    }

    #[test]
    fn light_on_expects_power_on_for_same_device() {
        let expected = predict("3101010000000033").unwrap();

        assert_eq!(expected.required_bytes().iter().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(matches(&expected, "B0010100000000"));
        assert!(!matches(&expected, "B0000100000000"));
        assert!(!matches(&expected, "B0010200000000"));
    }

    #[test]
    fn thermostat_on_accepts_idle_or_heating() {
        let expected = predict("040104810000008A").unwrap();

        assert!(matches(&expected, "82810124200000"));
        assert!(matches(&expected, "82830124200000"));
        assert!(!matches(&expected, "82800124200000"));
        assert_eq!(expected.to_string(), "82 81|83 01 __ __ __ __");
    }

    #[test]
    fn thermostat_off_expects_off() {
        let expected = predict("0401040000000009").unwrap();

        assert!(matches(&expected, "82800124200000"));
        assert!(!matches(&expected, "82810124200000"));
    }

    #[test]
    fn thermostat_setpoint_expects_target_byte() {
        let expected = predict("040103240000002C").unwrap();

        assert!(matches(&expected, "82810122240000"));
        assert!(!matches(&expected, "82810124200000"));
    }

    #[test]
    fn fan_speed_maps_through_symbol() {
        let expected = predict("780102030000007E").unwrap();

        assert_eq!(expected.possible_values(3).unwrap().iter().copied().collect::<Vec<_>>(), vec![0x03]);
        assert!(matches(&expected, "F6040103000000"));
    }

    #[test]
    fn fan_power_off() {
        let expected = predict("780101000000007A").unwrap();
        assert!(matches(&expected, "F6000101000000"));
        assert!(!matches(&expected, "F6040101000000"));
    }

    #[test]
    fn outlet_power_accepts_eco_variants() {
        let expected = predict("7A0101010000007D").unwrap();

        assert_eq!(expected.possible_values(1).unwrap().iter().copied().collect::<Vec<_>>(), vec![0x01, 0x11]);
        assert!(matches(&expected, "F9010111000103"));
        assert!(matches(&expected, "F9110111000103"));
        assert!(!matches(&expected, "F9000111000103"));
    }

    #[test]
    fn outlet_eco_mode_on() {
        let expected = predict("7A0102010000007E").unwrap();

        assert!(matches(&expected, "F9110121000023"));
        assert!(matches(&expected, "F9100121000023"));
        assert!(!matches(&expected, "F9010121000023"));
    }

    #[test]
    fn outlet_cutoff_expects_cutoff_byte() {
        let expected = predict("7A010300800000FE").unwrap();

        assert!(matches(&expected, "F9010121000080"));
        assert!(!matches(&expected, "F9010111000080"));
        assert!(!matches(&expected, "F9010121000043"));
    }

    #[test]
    fn gas_close_expects_off() {
        let expected = predict("1101800000000092").unwrap();

        assert!(matches(&expected, "90808000000000"));
        assert!(!matches(&expected, "90488000000000"));
    }

    #[test]
    fn elevator_call_has_no_confirmation() {
        assert_eq!(predict("A0010101081500C0"), None);
    }

    #[test]
    fn unknown_command_header_has_no_confirmation() {
        assert_eq!(predict("5501010000000057"), None);
    }
}
