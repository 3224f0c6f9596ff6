mod queue;
mod translate;

pub use queue::{CommandQueue, QueueItem, QueueOutcome, QueueSettings, ReceiveWindow, Transmission};
pub use translate::{ClimateLimits, CommandRequest, TranslateError};

use tokio::sync::mpsc;

/// Handle for submitting platform commands to the wallpad runner.
#[derive(Clone)]
pub struct CommandClient {
    tx: mpsc::Sender<CommandRequest>,
}

impl CommandClient {
    pub fn new(tx: mpsc::Sender<CommandRequest>) -> Self {
        Self { tx }
    }

    pub async fn submit(&self, request: CommandRequest) -> anyhow::Result<()> {
        tracing::debug!("Submitting command {}", request);

        self.tx
            .send_timeout(request, tokio::time::Duration::from_secs(5))
            .await
            .map_err(|e| anyhow::anyhow!("Command channel closed or full: {}", e))
    }
}
