//! Plain-text control channel on the telnet port.
//!
//! Commands are CR-terminated text with no envelope and no correlation id.
//! After each write the channel waits briefly for the next line from the
//! device and returns it as the reply; if nothing arrives in time the write is
//! assumed accepted and `"OK"` is returned. This is best effort: replies are
//! matched purely by arrival order, so on a busy channel an unsolicited line
//! can be returned as the reply to an unrelated write.
//!
//! Power announcements (`PWON`, `PWSTANDBY`) are recognised on every line,
//! solicited or not, and raised as [`HeosEvent::PowerStateChanged`].

use crate::codec::FrameDecoder;
use crate::config::{HeosConfig, MIN_TIMER};
use crate::error::{HeosError, Result};
use crate::subscription::HeosEvent;
use crate::types::PowerState;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Reply assumed when the device stays silent after a write
pub const OPTIMISTIC_ACK: &str = "OK";

const REPLY_CAPACITY: usize = 32;

struct TelnetLink {
    address: String,
    writer: OwnedWriteHalf,
    reader: JoinHandle<()>,
}

struct TelnetInner {
    address: RwLock<String>,
    port: u16,
    connect_timeout: Duration,
    ack_delay: Duration,
    link: Mutex<Option<TelnetLink>>,
    replies: broadcast::Sender<String>,
    events: broadcast::Sender<HeosEvent>,
}

/// Client for the telnet control channel
#[derive(Clone)]
pub struct TelnetClient {
    inner: Arc<TelnetInner>,
}

impl TelnetClient {
    pub(crate) fn new(
        address: String,
        config: &HeosConfig,
        events: broadcast::Sender<HeosEvent>,
    ) -> Self {
        let (replies, _) = broadcast::channel(REPLY_CAPACITY);
        Self {
            inner: Arc::new(TelnetInner {
                address: RwLock::new(address),
                port: config.telnet_port,
                connect_timeout: config.telnet_connect_timeout,
                ack_delay: config.telnet_ack_delay.max(MIN_TIMER),
                link: Mutex::new(None),
                replies,
                events,
            }),
        }
    }

    /// Current device address
    pub fn address(&self) -> String {
        self.inner
            .address
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Change the device address; an open socket to the old address is
    /// replaced on the next write
    pub fn set_address(&self, address: impl Into<String>) {
        *self
            .inner
            .address
            .write()
            .unwrap_or_else(PoisonError::into_inner) = address.into();
    }

    /// Open the channel if it is not already open
    pub async fn connect(&self) -> Result<()> {
        let mut link = self.inner.link.lock().await;
        self.ensure_open(&mut link).await.map(|_| ())
    }

    /// Close the channel
    pub async fn disconnect(&self) -> Result<()> {
        let link = self.inner.link.lock().await.take();
        if let Some(mut link) = link {
            tracing::info!("Closing telnet channel to {}", link.address);
            if let Err(e) = link.writer.shutdown().await {
                tracing::debug!("Telnet shutdown failed: {}", e);
            }
            link.reader.abort();
        }
        Ok(())
    }

    /// Whether a socket is currently open
    pub async fn is_connected(&self) -> bool {
        self.inner
            .link
            .lock()
            .await
            .as_ref()
            .is_some_and(|l| !l.reader.is_finished())
    }

    /// Write one command and return the next line the device sends, or
    /// [`OPTIMISTIC_ACK`] if it stays silent for the acknowledgement delay.
    ///
    /// Writes are serialized; the channel is opened on demand.
    pub async fn write_command(&self, command: &str) -> Result<String> {
        let mut link = self.inner.link.lock().await;
        let writer = self.ensure_open(&mut link).await?;

        // Subscribe before writing so a fast reply is not missed
        let mut replies = self.inner.replies.subscribe();
        tracing::debug!("Telnet sending: {}", command);
        let line = format!("{}\r", command);
        let written = writer.write_all(line.as_bytes()).await;
        if let Err(e) = written {
            tracing::warn!("Telnet write failed: {}", e);
            if let Some(old) = link.take() {
                old.reader.abort();
            }
            return Err(e.into());
        }

        match timeout(self.inner.ack_delay, replies.recv()).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => Err(HeosError::ChannelError(e.to_string())),
            Err(_) => Ok(OPTIMISTIC_ACK.to_string()),
        }
    }

    /// Switch the device on
    pub async fn power_on(&self) -> Result<String> {
        self.set_power(PowerState::On).await
    }

    /// Put the device into standby
    pub async fn power_standby(&self) -> Result<String> {
        self.set_power(PowerState::Standby).await
    }

    pub async fn set_power(&self, state: PowerState) -> Result<String> {
        self.write_command(state.token()).await
    }

    /// Ask for the power state; `None` when the device did not answer with a
    /// power token in time
    pub async fn query_power(&self) -> Result<Option<PowerState>> {
        let reply = self.write_command("PW?").await?;
        Ok(PowerState::from_token(&reply))
    }

    /// Select an input source by its telnet name, e.g. `CD`, `TV`, `NET`
    pub async fn select_input(&self, source: &str) -> Result<String> {
        self.write_command(&format!("SI{}", source)).await
    }

    async fn ensure_open<'a>(
        &self,
        link: &'a mut Option<TelnetLink>,
    ) -> Result<&'a mut OwnedWriteHalf> {
        let address = self.address();
        let stale = match link.as_ref() {
            Some(l) => l.reader.is_finished() || l.address != address,
            None => true,
        };
        if stale {
            if let Some(old) = link.take() {
                old.reader.abort();
            }
            *link = Some(self.open(address).await?);
        }

        link.as_mut()
            .map(|l| &mut l.writer)
            .ok_or(HeosError::NotConnected)
    }

    async fn open(&self, address: String) -> Result<TelnetLink> {
        let port = self.inner.port;
        tracing::info!("Opening telnet channel to {}:{}", address, port);

        let stream = timeout(
            self.inner.connect_timeout,
            TcpStream::connect((address.as_str(), port)),
        )
        .await
        .map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::TimedOut, "telnet connect timed out")
        })??;

        let (read_half, writer) = stream.into_split();
        let reader = tokio::spawn(read_loop(
            read_half,
            self.inner.replies.clone(),
            self.inner.events.clone(),
        ));

        Ok(TelnetLink {
            address,
            writer,
            reader,
        })
    }
}

impl Drop for TelnetInner {
    fn drop(&mut self) {
        if let Some(link) = self.link.get_mut().take() {
            link.reader.abort();
        }
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    replies: broadcast::Sender<String>,
    events: broadcast::Sender<HeosEvent>,
) {
    let mut decoder = FrameDecoder::cr();
    let mut buf = vec![0u8; 1024];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::info!("Telnet channel closed by device");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                tracing::warn!("Telnet read error: {}", e);
                break;
            }
        };

        for frame in decoder.feed(&buf[..n]) {
            let line = frame.trim();
            if line.is_empty() {
                continue;
            }
            tracing::debug!("Telnet received: {}", line);
            if let Some(state) = PowerState::from_token(line) {
                let _ = events.send(HeosEvent::PowerStateChanged(state));
            }
            let _ = replies.send(line.to_string());
        }
    }
}
