use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::command::{
    ClimateLimits, CommandQueue, CommandRequest, QueueItem, QueueOutcome, QueueSettings, ReceiveWindow, Transmission,
    TranslateError,
};
use crate::discovery::{self, DeviceInventory, FrameHistory};
use crate::link::{LinkEvent, LinkMonitor, LinkSettings};
use crate::protocol::{DeviceState, ExpectedStatePacket, Frame, SchemaRegistry, StateUpdate, segment};

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub queue: QueueSettings,
    pub link: LinkSettings,
    pub climate: ClimateLimits,
    pub send_on_idle: bool,
    pub idle_threshold: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            queue: QueueSettings::default(),
            link: LinkSettings::default(),
            climate: ClimateLimits::default(),
            send_on_idle: true,
            idle_threshold: Duration::from_millis(130),
        }
    }
}

/// Result of received bus data.
#[derive(Debug, Default, PartialEq)]
pub struct Received {
    pub states: Vec<DeviceState>,
    pub link: Option<LinkEvent>,
}

/// Result of one queue and watchdog tick.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Tick {
    pub link: Vec<LinkEvent>,
    pub transmission: Option<Transmission>,
}

/// Owns all bus-side state: command queue, receive window, frame history and link state.
/// Every mutation goes through `receive`, `submit` and `tick`.
pub struct WallpadEngine {
    registry: Arc<SchemaRegistry>,
    settings: EngineSettings,
    queue: CommandQueue,
    window: ReceiveWindow,
    history: FrameHistory,
    link: LinkMonitor,
}

impl WallpadEngine {
    pub fn new(registry: Arc<SchemaRegistry>, settings: EngineSettings, now: Instant) -> Self {
        Self {
            registry,
            queue: CommandQueue::new(settings.queue),
            window: ReceiveWindow::default(),
            history: FrameHistory::default(),
            link: LinkMonitor::new(settings.link, now),
            settings,
        }
    }

    pub fn receive(&mut self, data: &[u8], now: Instant) -> Received {
        let frames = segment(data);
        if frames.is_empty() {
            return Received::default();
        }

        let link = self.link.record_receive(now);
        let mut states = vec![];

        for frame in frames {
            tracing::trace!("Received frame {}", frame);
            self.window.insert(frame);
            self.history.push(frame);

            if let Some(state) = DeviceState::decode(&self.registry, &frame) {
                tracing::debug!("Decoded {} from {}", state, frame);
                states.push(state);
            }
        }

        Received { states, link }
    }

    /// Translates and queues a command. Rejected commands never reach the queue.
    pub fn submit(&mut self, request: &CommandRequest) -> Result<Frame, TranslateError> {
        let frame = request.translate(&self.registry, &self.settings.climate)?;
        let expected = ExpectedStatePacket::predict(&self.registry, &frame);

        match &expected {
            Some(expected) => tracing::debug!("Queueing {} expecting {}", frame, expected),
            None => tracing::debug!("Queueing {} without confirmation", frame),
        }

        self.queue.push(QueueItem::new(frame, expected));
        infrastructure::meter::set("wallpad_queue_length", self.queue.len() as f64, &[]);

        Ok(frame)
    }

    pub fn tick(&mut self, now: Instant) -> Tick {
        let idle = self.link.idle_for(now);
        let link = self.link.tick(now);

        if !link.is_empty() {
            infrastructure::meter::set(
                "wallpad_link_missed_intervals",
                self.link.missed_intervals() as f64,
                &[],
            );
        }

        let gate_open = !self.settings.send_on_idle || idle > self.settings.idle_threshold;
        let transmission = if gate_open { self.queue.tick(&mut self.window) } else { None };

        if let Some(outcome) = transmission.as_ref().and_then(|t| t.outcome.as_ref()) {
            log_outcome(outcome);
            infrastructure::meter::increment("wallpad_commands", &[("outcome", outcome.label())]);
            infrastructure::meter::set("wallpad_queue_length", self.queue.len() as f64, &[]);
        }

        Tick { link, transmission }
    }

    pub fn discover(&self) -> DeviceInventory {
        discovery::discover(&self.registry, self.history.iter())
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_available(&self) -> bool {
        self.link.is_available()
    }

    pub fn reboot_interval(&self) -> Duration {
        self.settings.link.reboot_interval
    }
}

fn log_outcome(outcome: &QueueOutcome) {
    match outcome {
        QueueOutcome::Confirmed { command, attempts } => {
            tracing::info!("Command {} confirmed after {} transmissions", command, attempts)
        }
        QueueOutcome::Exhausted { command, attempts } => {
            tracing::warn!("Command {} not confirmed after {} transmissions, dropping", command, attempts)
        }
        QueueOutcome::Unconfirmed { command, attempts } => {
            tracing::debug!("Command {} sent {} times without confirmation", command, attempts)
        }
    }
}

/// Flattens decoded states into attribute updates.
pub fn state_updates(states: &[DeviceState]) -> Vec<StateUpdate> {
    states.iter().flat_map(DeviceState::updates).collect()
}
