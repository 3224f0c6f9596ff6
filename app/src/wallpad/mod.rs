mod engine;

pub use engine::{EngineSettings, WallpadEngine, state_updates};

use std::path::PathBuf;
use std::time::Duration;

use infrastructure::EventEmitter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::adapter::SupervisorNotifier;
use crate::command::{CommandClient, CommandRequest};
use crate::discovery::DeviceInventory;
use crate::link::{ElfinRecovery, LinkEvent};
use crate::protocol::{Frame, StateUpdate};

/// Outbound side of the serial bus.
pub trait BusPort {
    fn transmit(&self, frame: &Frame) -> anyhow::Result<()>;
}

/// What the home-automation platform gets to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    State(StateUpdate),
    Availability(bool),
}

#[derive(Debug, Clone)]
pub struct WallpadOptions {
    pub tick_interval: Duration,
    pub discovery_window: Duration,
    pub inventory_path: Option<PathBuf>,
}

impl Default for WallpadOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(50),
            discovery_window: Duration::from_secs(20),
            inventory_path: None,
        }
    }
}

pub struct WallpadRunner<B: BusPort> {
    engine: WallpadEngine,
    bus: B,
    options: WallpadOptions,
    bus_rx: mpsc::Receiver<Vec<u8>>,
    cmd_rx: mpsc::Receiver<CommandRequest>,
    events: EventEmitter<PlatformEvent>,
    inventory: Option<DeviceInventory>,
    recovery: Option<ElfinRecovery>,
    notifier: Option<SupervisorNotifier>,
    recovery_task: Option<JoinHandle<()>>,
}

/// Feeds raw bytes received from the bus peer into the runner.
#[derive(Clone)]
pub struct BusFeed {
    tx: mpsc::Sender<Vec<u8>>,
}

impl BusFeed {
    pub fn new(tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self { tx }
    }

    pub async fn push(&self, data: Vec<u8>) -> anyhow::Result<()> {
        self.tx
            .send(data)
            .await
            .map_err(|_| anyhow::anyhow!("Wallpad runner stopped, bus data dropped"))
    }
}

impl<B: BusPort> WallpadRunner<B> {
    pub fn new(
        engine: WallpadEngine,
        bus: B,
        events: EventEmitter<PlatformEvent>,
        options: WallpadOptions,
    ) -> (Self, CommandClient, BusFeed) {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (bus_tx, bus_rx) = mpsc::channel(256);

        let inventory = options.inventory_path.as_deref().and_then(|path| {
            match DeviceInventory::load(path) {
                Ok(Some(inventory)) if !inventory.is_empty() => {
                    tracing::info!("Using device inventory from {}, skipping discovery", path.display());
                    Some(inventory)
                }
                Ok(_) => {
                    tracing::info!("No device inventory at {}, discovery will run", path.display());
                    None
                }
                Err(e) => {
                    tracing::warn!("Error loading device inventory, discovery will run: {:?}", e);
                    None
                }
            }
        });

        let runner = Self {
            engine,
            bus,
            options,
            bus_rx,
            cmd_rx,
            events,
            inventory,
            recovery: None,
            notifier: None,
            recovery_task: None,
        };

        (runner, CommandClient::new(cmd_tx), BusFeed::new(bus_tx))
    }

    pub fn with_recovery(mut self, recovery: Option<ElfinRecovery>) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn with_notifier(mut self, notifier: Option<SupervisorNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn inventory(&self) -> Option<&DeviceInventory> {
        self.inventory.as_ref()
    }

    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.options.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let discovery = tokio::time::sleep(self.options.discovery_window);
        tokio::pin!(discovery);
        let mut discovery_pending = self.inventory.is_none();
        let mut commands_open = true;

        loop {
            tokio::select! {
                data = self.bus_rx.recv() => {
                    let Some(data) = data else {
                        tracing::error!("Bus data channel closed; stopping wallpad runner");
                        break;
                    };
                    self.handle_bus_data(&data);
                }
                cmd = self.cmd_rx.recv(), if commands_open => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => {
                            tracing::warn!("Command channel closed, no more platform commands");
                            commands_open = false;
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.handle_tick();
                }
                _ = &mut discovery, if discovery_pending => {
                    discovery_pending = false;
                    self.run_discovery();
                }
            }
        }
    }

    fn handle_bus_data(&mut self, data: &[u8]) {
        let received = self.engine.receive(data, Instant::now());

        if received.link == Some(LinkEvent::Online) {
            tracing::info!("Wallpad bus is online");
            self.events.send(PlatformEvent::Availability(true));
        }

        for update in state_updates(&received.states) {
            self.events.send(PlatformEvent::State(update));
        }
    }

    #[tracing::instrument(skip_all, fields(command = %cmd))]
    fn handle_command(&mut self, cmd: CommandRequest) {
        if let Err(e) = self.engine.submit(&cmd) {
            tracing::error!("Rejecting command {}: {}", cmd, e);
            infrastructure::meter::increment("wallpad_commands", &[("outcome", "rejected")]);
        }
    }

    fn handle_tick(&mut self) {
        let tick = self.engine.tick(Instant::now());

        for event in tick.link {
            self.handle_link_event(event);
        }

        if let Some(transmission) = tick.transmission {
            infrastructure::meter::increment("wallpad_transmissions", &[]);
            if let Err(e) = self.bus.transmit(&transmission.frame) {
                tracing::warn!("Could not transmit {}: {}", transmission.frame, e);
            }
        }
    }

    fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Silent { missed } => {
                tracing::warn!(
                    "No bus traffic for {:?} ({} intervals in a row)",
                    self.engine.reboot_interval(),
                    missed
                );
            }
            LinkEvent::Offline => {
                tracing::warn!("Wallpad bus is unavailable");
                self.events.send(PlatformEvent::Availability(false));
            }
            LinkEvent::Online => {
                self.events.send(PlatformEvent::Availability(true));
            }
            LinkEvent::Alert { missed } => {
                tracing::error!("Serial adapter unresponsive for {} intervals, alerting operator", missed);
                self.spawn_alert();
            }
            LinkEvent::Restart { missed } => {
                tracing::warn!("Restarting serial adapter, attempt {}", missed);
                self.spawn_restart();
            }
        }
    }

    fn spawn_restart(&mut self) {
        let Some(recovery) = self.recovery.clone() else {
            tracing::warn!("Auto reboot enabled but no management console configured");
            return;
        };

        if self.recovery_task.as_ref().is_some_and(|task| !task.is_finished()) {
            tracing::debug!("Serial adapter restart still in progress");
            return;
        }

        self.recovery_task = Some(tokio::spawn(async move {
            if let Err(e) = recovery.restart().await {
                tracing::error!("Error restarting serial adapter: {:?}", e);
            }
            tokio::time::sleep(recovery.settle_time()).await;
        }));
    }

    fn spawn_alert(&self) {
        let Some(notifier) = self.notifier.clone() else {
            tracing::warn!("Operator notification enabled but no notifier configured");
            return;
        };

        tokio::spawn(async move {
            let message = format!(
                "[{}] The serial adapter stopped responding. Check the adapter and restart the bridge. \
                 Ignore this message if the bridge is working again.",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
            );
            if let Err(e) = notifier.notify("Wallpad bridge: serial adapter needs attention", &message).await {
                tracing::error!("Error sending operator notification: {:?}", e);
            }
        });
    }

    fn run_discovery(&mut self) {
        let inventory = self.engine.discover();

        for (name, entry) in inventory.iter() {
            tracing::info!("Discovered {} {} device(s) of type {}", entry.count, name, entry.domain);
        }

        if let Some(path) = &self.options.inventory_path {
            match inventory.save(path) {
                Ok(()) => tracing::info!("Device inventory written to {}", path.display()),
                Err(e) => tracing::error!("Error writing device inventory: {:?}", e),
            }
        }

        self.inventory = Some(inventory);
    }
}
