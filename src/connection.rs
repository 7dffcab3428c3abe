//! Connection lifecycle for the primary protocol channel.
//!
//! One socket per client, driven through four states. Every transition runs as
//! its own spawned task and publishes a shared outcome, so overlapping
//! `connect`/`disconnect`/`reconnect` calls join the transition already in
//! progress instead of opening a second socket. A transition finishes even if
//! the caller that started it stops waiting.

use crate::config::HeosConfig;
use crate::demux::Demux;
use crate::dispatcher::Dispatcher;
use crate::error::{HeosError, Result};
use crate::protocol::{commands, Reply, Request};
use crate::subscription::HeosEvent;
use crate::types::ConnectionState;
use crate::watchdog;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Outcome of a lifecycle transition, shared by everyone who joined it
type Outcome = Shared<BoxFuture<'static, Result<()>>>;

fn spawn_outcome<F>(transition: F) -> Outcome
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    let handle = tokio::spawn(transition);
    async move {
        handle.await.unwrap_or_else(|e| {
            Err(HeosError::ChannelError(format!("Transition task failed: {}", e)))
        })
    }
    .boxed()
    .shared()
}

enum Lifecycle {
    Disconnected,
    Connecting(Outcome),
    Connected,
    Disconnecting(Outcome),
}

impl Lifecycle {
    fn state(&self) -> ConnectionState {
        match self {
            Self::Disconnected => ConnectionState::Disconnected,
            Self::Connecting(_) => ConnectionState::Connecting,
            Self::Connected => ConnectionState::Connected,
            Self::Disconnecting(_) => ConnectionState::Disconnecting,
        }
    }
}

/// Tasks owning one open socket
struct Link {
    generation: u64,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

struct Session {
    lifecycle: Lifecycle,
    link: Option<Link>,
    generation: u64,
    reconnecting: Option<Outcome>,
    watchdog: Option<JoinHandle<()>>,
}

enum Step {
    Join(Outcome),
    WaitThenRetry(Outcome),
}

/// Owns the socket and the lifecycle state machine
pub(crate) struct ConnectionManager {
    config: HeosConfig,
    address: RwLock<String>,
    session: Mutex<Session>,
    dispatcher: Arc<Dispatcher>,
    events: broadcast::Sender<HeosEvent>,
}

impl ConnectionManager {
    pub fn new(address: String, config: HeosConfig, events: broadcast::Sender<HeosEvent>) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(config.command_timeout));
        Self {
            config,
            address: RwLock::new(address),
            session: Mutex::new(Session {
                lifecycle: Lifecycle::Disconnected,
                link: None,
                generation: 0,
                reconnecting: None,
                watchdog: None,
            }),
            dispatcher,
            events,
        }
    }

    pub fn config(&self) -> &HeosConfig {
        &self.config
    }

    pub fn events(&self) -> &broadcast::Sender<HeosEvent> {
        &self.events
    }

    pub fn address(&self) -> String {
        self.address
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Takes effect on the next connect
    pub fn set_address(&self, address: String) {
        tracing::info!("Device address changed to {}", address);
        *self.address.write().unwrap_or_else(PoisonError::into_inner) = address;
    }

    pub async fn state(&self) -> ConnectionState {
        self.session.lock().await.lifecycle.state()
    }

    pub async fn submit(&self, request: Request) -> Result<Reply> {
        self.dispatcher.submit(request).await
    }

    /// Open the connection; joins an attempt already in progress
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        loop {
            let step = {
                let mut session = self.session.lock().await;
                match &session.lifecycle {
                    Lifecycle::Connected => return Ok(()),
                    Lifecycle::Connecting(outcome) => Step::Join(outcome.clone()),
                    Lifecycle::Disconnecting(outcome) => Step::WaitThenRetry(outcome.clone()),
                    Lifecycle::Disconnected => {
                        let outcome = spawn_outcome(self.clone().open());
                        self.transition(&mut session, Lifecycle::Connecting(outcome.clone()));
                        Step::Join(outcome)
                    }
                }
            };

            match step {
                Step::Join(outcome) => return outcome.await,
                Step::WaitThenRetry(outcome) => {
                    let _ = outcome.await;
                }
            }
        }
    }

    /// Close the connection at the caller's request and stop the watchdog
    pub async fn disconnect(self: &Arc<Self>) -> Result<()> {
        // Let a running reconnect settle first, or it would reopen the socket
        loop {
            let reconnecting = {
                let mut session = self.session.lock().await;
                Self::stop_watchdog(&mut session);
                session.reconnecting.clone()
            };
            match reconnecting {
                Some(outcome) => {
                    let _ = outcome.await;
                }
                None => break,
            }
        }

        let result = self.teardown().await;
        // A connect joined while we waited may already own a new watchdog
        let mut session = self.session.lock().await;
        if matches!(session.lifecycle, Lifecycle::Disconnected) {
            Self::stop_watchdog(&mut session);
        }
        result
    }

    /// Disconnect then connect again; concurrent calls share one attempt
    pub async fn reconnect(self: &Arc<Self>) -> Result<()> {
        let outcome = {
            let mut session = self.session.lock().await;
            match &session.reconnecting {
                Some(outcome) => outcome.clone(),
                None => {
                    let outcome = spawn_outcome(self.clone().cycle());
                    session.reconnecting = Some(outcome.clone());
                    outcome
                }
            }
        };
        outcome.await
    }

    /// Whether the watchdog may probe right now
    pub async fn ready_for_probe(&self) -> bool {
        let session = self.session.lock().await;
        session.reconnecting.is_none()
            && matches!(session.lifecycle, Lifecycle::Connected | Lifecycle::Disconnected)
    }

    /// Cheap liveness command
    pub async fn probe(&self) -> Result<()> {
        self.dispatcher
            .submit(Request::new(commands::HEART_BEAT))
            .await
            .map(|_| ())
    }

    /// Disconnect without touching the watchdog
    async fn teardown(self: &Arc<Self>) -> Result<()> {
        loop {
            let step = {
                let mut session = self.session.lock().await;
                match &session.lifecycle {
                    Lifecycle::Disconnected => return Ok(()),
                    Lifecycle::Disconnecting(outcome) => Step::Join(outcome.clone()),
                    Lifecycle::Connecting(outcome) => Step::WaitThenRetry(outcome.clone()),
                    Lifecycle::Connected => {
                        let outcome = spawn_outcome(self.clone().close());
                        self.transition(&mut session, Lifecycle::Disconnecting(outcome.clone()));
                        Step::Join(outcome)
                    }
                }
            };

            match step {
                Step::Join(outcome) => return outcome.await,
                Step::WaitThenRetry(outcome) => {
                    let _ = outcome.await;
                }
            }
        }
    }

    async fn cycle(self: Arc<Self>) -> Result<()> {
        tracing::info!("Reconnecting to {}", self.address());
        let _ = self.events.send(HeosEvent::Reconnecting);

        if let Err(e) = self.teardown().await {
            tracing::debug!("Ignoring disconnect error during reconnect: {}", e);
        }
        let result = self.connect().await;

        self.session.lock().await.reconnecting = None;
        match &result {
            Ok(()) => {
                tracing::info!("Reconnected to {}", self.address());
                let _ = self.events.send(HeosEvent::Reconnected);
            }
            Err(e) => {
                tracing::warn!("Reconnect to {} failed: {}", self.address(), e);
                let _ = self.events.send(HeosEvent::ReconnectError(e.clone()));
            }
        }
        result
    }

    async fn open(self: Arc<Self>) -> Result<()> {
        let address = self.address();
        let port = self.config.port;
        tracing::info!("Connecting to {}:{}", address, port);

        let stream = match timeout(
            self.config.connect_timeout,
            TcpStream::connect((address.as_str(), port)),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return self.fail_connect(e.into()).await,
            Err(_) => {
                let e = std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out");
                return self.fail_connect(e.into()).await;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Could not disable Nagle: {}", e);
        }

        let (read_half, write_half) = stream.into_split();
        let (sink, lines) = mpsc::unbounded_channel();
        let generation = {
            let mut session = self.session.lock().await;
            session.generation += 1;
            let generation = session.generation;
            let demux = Demux::new(self.dispatcher.clone(), self.events.clone());
            session.link = Some(Link {
                generation,
                writer: tokio::spawn(write_loop(write_half, lines)),
                reader: tokio::spawn(read_loop(
                    Arc::downgrade(&self),
                    generation,
                    read_half,
                    demux,
                )),
            });
            self.dispatcher.attach(sink).await;
            generation
        };

        let handshake = Request::new(commands::REGISTER_FOR_CHANGE_EVENTS).param("enable", "on");
        if let Err(e) = self.dispatcher.submit(handshake).await {
            tracing::warn!("Handshake with {} failed: {}", address, e);
            self.close_link().await;
            return self.fail_connect(e).await;
        }

        let mut session = self.session.lock().await;
        if session.link.as_ref().map(|l| l.generation) != Some(generation) {
            self.transition(&mut session, Lifecycle::Disconnected);
            return Err(HeosError::ConnectionClosed);
        }
        self.transition(&mut session, Lifecycle::Connected);
        self.ensure_watchdog(&mut session);
        tracing::info!("Connected to {}:{}", address, port);
        Ok(())
    }

    async fn fail_connect(&self, error: HeosError) -> Result<()> {
        tracing::warn!("Connect to {} failed: {}", self.address(), error);
        let mut session = self.session.lock().await;
        self.transition(&mut session, Lifecycle::Disconnected);
        Err(error)
    }

    async fn close(self: Arc<Self>) -> Result<()> {
        tracing::info!("Disconnecting from {}", self.address());
        self.close_link().await;

        let mut session = self.session.lock().await;
        self.transition(&mut session, Lifecycle::Disconnected);
        tracing::info!("Disconnected from {}", self.address());
        Ok(())
    }

    /// Half-close the socket and wait for the device to hang up
    async fn close_link(&self) {
        let link = self.session.lock().await.link.take();
        // Dropping the sink ends the writer, which shuts down the write half
        self.dispatcher.detach().await;

        let Some(link) = link else {
            return;
        };
        let reader = link.reader.abort_handle();
        if timeout(self.config.close_timeout, link.reader).await.is_err() {
            tracing::warn!(
                "No close confirmation after {:?}, dropping socket",
                self.config.close_timeout
            );
            reader.abort();
        }
        link.writer.abort();
    }

    /// Called by the reader task when its socket goes away
    async fn on_link_closed(&self, generation: u64, error: Option<std::io::Error>) {
        let mut session = self.session.lock().await;
        if session.link.as_ref().map(|l| l.generation) != Some(generation) {
            return;
        }
        if let Some(link) = session.link.take() {
            link.writer.abort();
        }

        match error {
            Some(e) => tracing::warn!("Connection to {} lost: {}", self.address(), e),
            None => tracing::info!("Connection closed by {}", self.address()),
        }
        self.dispatcher.detach().await;

        // While connecting, the failed handshake finishes the attempt
        if matches!(session.lifecycle, Lifecycle::Connected) {
            self.transition(&mut session, Lifecycle::Disconnected);
        }
    }

    fn transition(&self, session: &mut Session, next: Lifecycle) {
        session.lifecycle = next;
        let state = session.lifecycle.state();
        tracing::debug!("Connection state: {}", state);
        let _ = self.events.send(HeosEvent::StateChanged(state));
    }

    fn ensure_watchdog(self: &Arc<Self>, session: &mut Session) {
        if session.watchdog.as_ref().is_some_and(|w| !w.is_finished()) {
            return;
        }
        session.watchdog = Some(watchdog::spawn(
            Arc::downgrade(self),
            self.config.watchdog_interval,
        ));
    }

    fn stop_watchdog(session: &mut Session) {
        if let Some(watchdog) = session.watchdog.take() {
            tracing::debug!("Stopping watchdog");
            watchdog.abort();
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let session = self.session.get_mut();
        if let Some(watchdog) = session.watchdog.take() {
            watchdog.abort();
        }
        if let Some(link) = session.link.take() {
            link.reader.abort();
            link.writer.abort();
        }
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, mut lines: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = lines.recv().await {
        tracing::debug!("Sending: {}", line.trim_end());
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            tracing::error!("Failed to send message: {}", e);
            break;
        }
    }
    if let Err(e) = writer.shutdown().await {
        tracing::debug!("Socket shutdown failed: {}", e);
    }
}

async fn read_loop(
    manager: Weak<ConnectionManager>,
    generation: u64,
    mut reader: OwnedReadHalf,
    mut demux: Demux,
) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let error = loop {
        match reader.read(&mut buf).await {
            Ok(0) => break None,
            Ok(n) => demux.feed(&buf[..n]).await,
            Err(e) => break Some(e),
        }
    };

    if let Some(manager) = manager.upgrade() {
        manager.on_link_closed(generation, error).await;
    }
}
