use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

/// Restarts the serial-to-TCP adapter through its telnet management console.
#[derive(Debug, Clone)]
pub struct ElfinRecovery {
    address: String,
    username: String,
    password: String,
    timeout: Duration,
}

impl ElfinRecovery {
    pub fn new(address: String, username: String, password: String, timeout: Duration) -> Self {
        Self {
            address,
            username,
            password,
            timeout,
        }
    }

    pub fn settle_time(&self) -> Duration {
        self.timeout
    }

    #[tracing::instrument(skip(self), fields(address = %self.address))]
    pub async fn restart(&self) -> anyhow::Result<()> {
        tokio::time::timeout(self.timeout, async {
            let stream = TcpStream::connect(&self.address)
                .await
                .with_context(|| format!("Error connecting to management console at {}", self.address))?;
            self.login_and_restart(stream).await
        })
        .await
        .context("Timeout restarting serial adapter")?
    }

    async fn login_and_restart<S: AsyncRead + AsyncWrite + Unpin>(&self, stream: S) -> anyhow::Result<()> {
        let mut console = TelnetConsole::new(stream);

        console.read_until(b"login: ").await?;
        console.write_line(&self.username).await?;
        console.read_until(b"password: ").await?;
        console.write_line(&self.password).await?;
        console.write_line("Restart").await?;
        console.close().await?;

        tracing::info!("Restart command sent to serial adapter");
        Ok(())
    }
}

/// Minimal telnet client refusing every option the server proposes.
struct TelnetConsole<S> {
    stream: S,
    text: Vec<u8>,
    pending: Vec<u8>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> TelnetConsole<S> {
    fn new(stream: S) -> Self {
        Self {
            stream,
            text: vec![],
            pending: vec![],
        }
    }

    async fn read_until(&mut self, prompt: &[u8]) -> anyhow::Result<()> {
        let mut buf = [0u8; 512];

        loop {
            if let Some(pos) = find(&self.text, prompt) {
                self.text.drain(..pos + prompt.len());
                return Ok(());
            }

            let n = self.stream.read(&mut buf).await?;
            if n == 0 {
                anyhow::bail!(
                    "Console closed while waiting for {:?}",
                    String::from_utf8_lossy(prompt)
                );
            }

            self.pending.extend_from_slice(&buf[..n]);
            let replies = filter_negotiation(&mut self.pending, &mut self.text);
            if !replies.is_empty() {
                self.stream.write_all(&replies).await?;
            }
        }
    }

    async fn write_line(&mut self, line: &str) -> anyhow::Result<()> {
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\n").await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Moves plain text from `input` to `text` and answers option requests with refusals.
/// An incomplete command sequence at the end stays in `input` for the next read.
fn filter_negotiation(input: &mut Vec<u8>, text: &mut Vec<u8>) -> Vec<u8> {
    let mut replies = vec![];
    let mut i = 0;

    while i < input.len() {
        if input[i] != IAC {
            text.push(input[i]);
            i += 1;
            continue;
        }

        let Some(&command) = input.get(i + 1) else {
            break;
        };

        match command {
            IAC => {
                text.push(IAC);
                i += 2;
            }
            DO | DONT | WILL | WONT => {
                let Some(&option) = input.get(i + 2) else {
                    break;
                };
                match command {
                    DO => replies.extend_from_slice(&[IAC, WONT, option]),
                    WILL => replies.extend_from_slice(&[IAC, DONT, option]),
                    _ => {}
                }
                i += 3;
            }
            SB => {
                let end = input[i + 2..].windows(2).position(|w| w == [IAC, SE]);
                match end {
                    Some(offset) => i += 2 + offset + 2,
                    None => break,
                }
            }
            _ => i += 2,
        }
    }

    input.drain(..i);
    replies
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn negotiation_is_refused_and_stripped() {
        let mut input = vec![IAC, DO, 1, b'l', b'o', IAC, WILL, 3, b'g', IAC, IAC];
        let mut text = vec![];

        let replies = filter_negotiation(&mut input, &mut text);

        assert_eq!(replies, vec![IAC, WONT, 1, IAC, DONT, 3]);
        assert_eq!(text, vec![b'l', b'o', b'g', IAC]);
        assert!(input.is_empty());
    }

    #[test]
    fn incomplete_sequence_waits_for_more_input() {
        let mut input = vec![b'a', IAC, DO];
        let mut text = vec![];

        let replies = filter_negotiation(&mut input, &mut text);

        assert!(replies.is_empty());
        assert_eq!(text, vec![b'a']);
        assert_eq!(input, vec![IAC, DO]);

        input.extend_from_slice(&[24, b'b']);
        let replies = filter_negotiation(&mut input, &mut text);

        assert_eq!(replies, vec![IAC, WONT, 24]);
        assert_eq!(text, vec![b'a', b'b']);
    }

    #[test]
    fn subnegotiation_is_skipped() {
        let mut input = vec![IAC, SB, 24, 1, IAC, SE, b'x'];
        let mut text = vec![];

        filter_negotiation(&mut input, &mut text);

        assert_eq!(text, vec![b'x']);
    }

    #[tokio::test]
    async fn logs_in_and_sends_restart() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let console = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(&[IAC, DO, 1]).await.unwrap();
            socket.write_all(b"EW11 login: ").await.unwrap();

            let mut received = Vec::new();
            let mut buf = [0u8; 64];
            while !received.ends_with(b"admin\n") {
                let n = socket.read(&mut buf).await.unwrap();
                received.extend_from_slice(&buf[..n]);
            }
            socket.write_all(b"password: ").await.unwrap();
            socket.read_to_end(&mut received).await.unwrap();
            received
        });

        let recovery = ElfinRecovery::new(
            address,
            "admin".to_string(),
            "secret".to_string(),
            Duration::from_secs(5),
        );
        recovery.restart().await.unwrap();

        let received = console.await.unwrap();
        let mut expected = vec![IAC, WONT, 1];
        expected.extend_from_slice(b"admin\nsecret\nRestart\n");
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn silent_console_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let _console = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let recovery = ElfinRecovery::new(
            address,
            "admin".to_string(),
            "secret".to_string(),
            Duration::from_millis(100),
        );

        assert!(recovery.restart().await.is_err());
    }
}
