use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::Context;
use futures::StreamExt;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

use crate::adapter::platform::parse_command_line;
use crate::command::CommandClient;
use crate::protocol::Frame;
use crate::wallpad::{BusFeed, BusPort};

const MAX_PLATFORM_LINE: usize = 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct BusSettings {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_platform_token")]
    pub platform_token: String,
}

fn default_listen() -> String {
    "0.0.0.0:1883".to_string()
}

fn default_platform_token() -> String {
    "iam_ha".to_string()
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            platform_token: default_platform_token(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum Peer {
    #[display("bus")]
    Bus,
    #[display("platform")]
    Platform,
}

struct Connection {
    id: u64,
    tx: mpsc::Sender<Vec<u8>>,
}

/// Currently connected peers. At most one connection per peer, a newer one replaces the older.
#[derive(Clone, Default)]
pub struct PeerRegistry {
    peers: Arc<RwLock<HashMap<Peer, Connection>>>,
    next_id: Arc<AtomicU64>,
}

impl PeerRegistry {
    pub fn is_connected(&self, peer: Peer) -> bool {
        self.peers.read().unwrap_or_else(PoisonError::into_inner).contains_key(&peer)
    }

    /// Queues data for the peer's socket without waiting.
    pub fn send(&self, peer: Peer, data: Vec<u8>) -> anyhow::Result<()> {
        let peers = self.peers.read().unwrap_or_else(PoisonError::into_inner);
        let connection = peers
            .get(&peer)
            .with_context(|| format!("No {} peer connected", peer))?;

        connection
            .tx
            .try_send(data)
            .map_err(|e| anyhow::anyhow!("Error queueing data for {} peer: {}", peer, e))
    }

    fn register(&self, peer: Peer) -> (u64, mpsc::Receiver<Vec<u8>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(64);

        let replaced = self
            .peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer, Connection { id, tx });

        if replaced.is_some() {
            tracing::warn!("New {} connection replaces the previous one", peer);
        }

        (id, rx)
    }

    fn unregister(&self, peer: Peer, id: u64) {
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        if peers.get(&peer).is_some_and(|c| c.id == id) {
            peers.remove(&peer);
            tracing::info!("{} peer disconnected", peer);
        }
    }
}

impl BusPort for PeerRegistry {
    fn transmit(&self, frame: &Frame) -> anyhow::Result<()> {
        tracing::trace!("Sending {} to bus", frame);
        self.send(Peer::Bus, frame.as_bytes().to_vec())
    }
}

/// Accepts the bus adapter and platform connections and routes their traffic.
pub struct SessionManager {
    listener: TcpListener,
    context: Arc<SessionContext>,
}

struct SessionContext {
    token: String,
    peers: PeerRegistry,
    bus_feed: BusFeed,
    commands: CommandClient,
}

impl SessionManager {
    pub async fn bind(
        settings: &BusSettings,
        peers: PeerRegistry,
        bus_feed: BusFeed,
        commands: CommandClient,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(&settings.listen)
            .await
            .with_context(|| format!("Error binding bus listener to {}", settings.listen))?;

        tracing::info!("Listening for bus and platform connections on {}", settings.listen);

        Ok(Self {
            listener,
            context: Arc::new(SessionContext {
                token: settings.platform_token.clone(),
                peers,
                bus_feed,
                commands,
            }),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    tracing::info!("New connection from {}", addr);
                    let context = self.context.clone();
                    tokio::spawn(async move {
                        if let Err(e) = context.handle_connection(stream).await {
                            tracing::error!("Error handling connection from {}: {:?}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Error accepting connection: {}", e);
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }
}

impl SessionContext {
    async fn handle_connection(&self, stream: TcpStream) -> anyhow::Result<()> {
        let (mut reader, writer) = stream.into_split();

        let mut buf = [0u8; 1024];
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }

        let first = &buf[..n];
        let peer = if first.trim_ascii() == self.token.as_bytes() {
            Peer::Platform
        } else {
            Peer::Bus
        };

        tracing::info!("Connection identified as {} peer", peer);
        let (id, outbound) = self.peers.register(peer);

        let result = match peer {
            Peer::Bus => {
                self.bus_feed.push(first.to_vec()).await?;
                self.serve_bus(reader, writer, outbound).await
            }
            Peer::Platform => self.serve_platform(reader, writer, outbound).await,
        };

        self.peers.unregister(peer, id);
        result
    }

    async fn serve_bus(
        &self,
        mut reader: OwnedReadHalf,
        mut writer: OwnedWriteHalf,
        mut outbound: mpsc::Receiver<Vec<u8>>,
    ) -> anyhow::Result<()> {
        let mut buf = [0u8; 1024];

        loop {
            tokio::select! {
                n = reader.read(&mut buf) => {
                    let n = n?;
                    if n == 0 {
                        tracing::warn!("Bus connection closed");
                        return Ok(());
                    }
                    self.bus_feed.push(buf[..n].to_vec()).await?;
                }
                data = outbound.recv() => {
                    let Some(data) = data else {
                        return Ok(());
                    };
                    writer.write_all(&data).await?;
                    writer.flush().await?;
                }
            }
        }
    }

    async fn serve_platform(
        &self,
        reader: OwnedReadHalf,
        mut writer: OwnedWriteHalf,
        mut outbound: mpsc::Receiver<Vec<u8>>,
    ) -> anyhow::Result<()> {
        let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_PLATFORM_LINE));
        // FramedRead yields a single None after a decode error before resuming
        let mut recovering = false;

        loop {
            tokio::select! {
                line = lines.next() => {
                    let line = match line {
                        Some(Ok(line)) => line,
                        Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                            tracing::warn!("Discarding platform line longer than {} bytes", MAX_PLATFORM_LINE);
                            recovering = true;
                            continue;
                        }
                        Some(Err(LinesCodecError::Io(e))) => {
                            return Err(e).context("Error reading platform command");
                        }
                        None if recovering => {
                            recovering = false;
                            continue;
                        }
                        None => {
                            tracing::warn!("Platform connection closed");
                            return Ok(());
                        }
                    };
                    recovering = false;

                    match parse_command_line(&line) {
                        Some(request) => {
                            if let Err(e) = self.commands.submit(request).await {
                                tracing::error!("Dropping platform command {:?}: {:?}", line, e);
                            }
                        }
                        None => tracing::warn!("Ignoring malformed platform command {:?}", line),
                    }
                }
                data = outbound.recv() => {
                    let Some(data) = data else {
                        return Ok(());
                    };
                    writer.write_all(&data).await?;
                    writer.flush().await?;
                }
            }
        }
    }
}
