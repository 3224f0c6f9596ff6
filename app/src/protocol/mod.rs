mod expected;
mod frame;
mod schema;
mod state;

pub use expected::ExpectedStatePacket;
pub use frame::{Frame, FrameError, PAYLOAD_LEN, checksum, segment, verify};
pub use schema::{DEVICE_ID, DeviceKind, DeviceSchema, PacketSchema, SchemaError, SchemaRegistry};
pub use state::{DeviceState, OutletReading, Power, StateUpdate};
