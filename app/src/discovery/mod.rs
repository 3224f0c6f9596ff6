use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::protocol::{DEVICE_ID, Frame, SchemaRegistry};

pub const HISTORY_CAPACITY: usize = 300;

/// Most recent valid frames seen on the bus, oldest evicted first.
#[derive(Debug)]
pub struct FrameHistory {
    frames: VecDeque<Frame>,
    capacity: usize,
}

impl FrameHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, frame: Frame) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl Default for FrameHistory {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryEntry {
    #[serde(rename = "type")]
    pub domain: String,
    pub count: u32,
}

/// Device types present in the installation with their instance counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceInventory(BTreeMap<String, InventoryEntry>);

impl DeviceInventory {
    pub fn get(&self, device: &str) -> Option<&InventoryEntry> {
        self.0.get(device)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &InventoryEntry)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `None` when the file does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Option<Self>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Error reading inventory {}", path.display())),
        };

        let inventory = serde_json::from_str(&content)
            .with_context(|| format!("Error parsing inventory {}", path.display()))?;
        Ok(Some(inventory))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("Error writing inventory {}", path.display()))
    }
}

/// Counts device instances in observed frames. Types addressed by device id report the highest
/// id seen, types without one report 1 once seen. Every schema type is listed, unseen ones with 0.
pub fn discover<'a>(registry: &SchemaRegistry, frames: impl IntoIterator<Item = &'a Frame>) -> DeviceInventory {
    let by_header: HashMap<u8, &crate::protocol::DeviceSchema> =
        registry.iter().map(|schema| (schema.state.header, schema)).collect();

    let mut inventory: BTreeMap<String, InventoryEntry> = registry
        .iter()
        .map(|schema| {
            (
                schema.kind.to_string(),
                InventoryEntry {
                    domain: schema.domain.clone(),
                    count: 0,
                },
            )
        })
        .collect();

    let distinct: BTreeSet<&Frame> = frames.into_iter().collect();

    for frame in distinct {
        let Some(schema) = by_header.get(&frame.header()) else {
            continue;
        };
        let Some(entry) = inventory.get_mut(&schema.kind.to_string()) else {
            continue;
        };

        let count = if schema.state.has_field(DEVICE_ID) {
            match schema.state.read(frame, DEVICE_ID) {
                Ok(id) => u32::from(id),
                Err(e) => {
                    tracing::warn!("Error reading device id of {}: {}", frame, e);
                    continue;
                }
            }
        } else {
            1
        };

        entry.count = entry.count.max(count);
    }

    DeviceInventory(inventory)
}
