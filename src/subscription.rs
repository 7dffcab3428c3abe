use crate::error::{HeosError, Result};
use crate::protocol::DeviceEvent;
use crate::types::{ConnectionState, PowerState};
use tokio::sync::broadcast;

/// Notification raised by a client
#[derive(Debug, Clone)]
pub enum HeosEvent {
    /// Connection lifecycle moved to a new state
    StateChanged(ConnectionState),

    /// A reconnect attempt is starting
    Reconnecting,

    /// A reconnect attempt succeeded
    Reconnected,

    /// A reconnect attempt failed
    ReconnectError(HeosError),

    /// Unsolicited event pushed by the device
    Device(DeviceEvent),

    /// Power state announced on the telnet channel
    PowerStateChanged(PowerState),
}

fn recv_error(e: broadcast::error::RecvError) -> HeosError {
    match e {
        broadcast::error::RecvError::Closed => HeosError::ConnectionClosed,
        broadcast::error::RecvError::Lagged(n) => {
            HeosError::ChannelError(format!("Lagged by {} messages", n))
        }
    }
}

/// Receiver for client notifications
pub struct EventReceiver {
    rx: broadcast::Receiver<HeosEvent>,
}

impl EventReceiver {
    pub(crate) fn new(rx: broadcast::Receiver<HeosEvent>) -> Self {
        Self { rx }
    }

    /// Receive the next notification
    ///
    /// Returns `ConnectionClosed` once the client has been dropped.
    pub async fn recv(&mut self) -> Result<HeosEvent> {
        self.rx.recv().await.map_err(recv_error)
    }

    /// Try to receive a notification without blocking
    ///
    /// Returns `None` if no notification is available.
    pub fn try_recv(&mut self) -> Result<Option<HeosEvent>> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(HeosError::ConnectionClosed),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                Err(HeosError::ChannelError(format!("Lagged by {} messages", n)))
            }
        }
    }
}

/// Receiver for device events carrying one specific name
pub struct DeviceEventReceiver {
    rx: broadcast::Receiver<HeosEvent>,
    name: String,
}

impl DeviceEventReceiver {
    pub(crate) fn new(rx: broadcast::Receiver<HeosEvent>, name: impl Into<String>) -> Self {
        Self {
            rx,
            name: name.into(),
        }
    }

    /// Event name this receiver yields
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Receive the next matching device event, skipping everything else
    pub async fn recv(&mut self) -> Result<DeviceEvent> {
        loop {
            match self.rx.recv().await.map_err(recv_error)? {
                HeosEvent::Device(event) if event.name == self.name => return Ok(event),
                _ => continue,
            }
        }
    }
}
