//! Serializes command/response exchanges over the shared connection.
//!
//! Exactly one command is written and awaiting its answer at any time, and
//! everything else waits in submission order. Each written command is tagged
//! with a `SEQUENCE` number that the device echoes back, so a late answer to a
//! command that already timed out is recognised and dropped instead of being
//! handed to the next command of the same name. Answers that carry no
//! sequence number must at least agree with every request parameter they
//! echo. Each in-flight command races a timer; whichever of response and
//! timer loses is ignored.

use crate::config::MIN_TIMER;
use crate::error::{HeosError, Result};
use crate::protocol::{Message, ParsedMessage, Reply, Request, SEQUENCE};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

/// Outgoing line sink, drained by the socket writer task
pub(crate) type Sink = mpsc::UnboundedSender<String>;

struct PendingCommand {
    request: Request,
    reply: oneshot::Sender<Result<Reply>>,
}

struct InFlight {
    id: u64,
    request: Request,
    reply: oneshot::Sender<Result<Reply>>,
    timer: JoinHandle<()>,
}

impl InFlight {
    fn answered_by(&self, command: &str, message: &Message) -> bool {
        if self.request.command() != command {
            return false;
        }
        if let Some(sequence) = message.get(SEQUENCE) {
            return sequence.parse::<u64>().ok() == Some(self.id);
        }
        self.request
            .params()
            .iter()
            .all(|(key, value)| message.get(key).map_or(true, |echoed| echoed == value))
    }

    fn settle(self, result: Result<Reply>) {
        self.timer.abort();
        // Caller may have stopped waiting
        let _ = self.reply.send(result);
    }
}

#[derive(Default)]
struct DispatchState {
    sink: Option<Sink>,
    queue: VecDeque<PendingCommand>,
    in_flight: Option<InFlight>,
    next_id: u64,
}

/// FIFO command queue with a single in-flight slot
pub(crate) struct Dispatcher {
    state: Mutex<DispatchState>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: Mutex::new(DispatchState::default()),
            timeout: timeout.max(MIN_TIMER),
        }
    }

    /// Queue a command and wait for its outcome
    pub async fn submit(self: &Arc<Self>, request: Request) -> Result<Reply> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock().await;
            state.queue.push_back(PendingCommand { request, reply: tx });
            self.pump(&mut state);
        }

        rx.await.map_err(|_| HeosError::ConnectionClosed)?
    }

    /// Attach the writer for a freshly opened socket
    pub async fn attach(self: &Arc<Self>, sink: Sink) {
        let mut state = self.state.lock().await;
        state.sink = Some(sink);
        self.pump(&mut state);
    }

    /// Drop the writer; the in-flight command is rejected as closed and
    /// anything still queued fails as not connected.
    pub async fn detach(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        state.sink = None;
        if let Some(in_flight) = state.in_flight.take() {
            tracing::debug!("Rejecting in-flight {} on close", in_flight.request.command());
            in_flight.settle(Err(HeosError::ConnectionClosed));
        }
        self.pump(&mut state);
    }

    /// Route a classified response to the in-flight command.
    ///
    /// Returns `false` when nothing was waiting for it (a stale answer to a
    /// command that already timed out, or an answer to another command).
    pub async fn complete(self: &Arc<Self>, message: ParsedMessage) -> bool {
        let mut state = self.state.lock().await;

        let matches = match (&state.in_flight, message.command()) {
            (Some(in_flight), Some(command)) => in_flight.answered_by(command, message.message()),
            _ => false,
        };
        if !matches {
            tracing::debug!(
                "Discarding response with no pending command: {:?} {:?}",
                message.command(),
                message.message().get(SEQUENCE)
            );
            return false;
        }

        let result = match message {
            ParsedMessage::Response(reply) => Ok(reply),
            ParsedMessage::Failure { error, .. } => Err(error),
            ParsedMessage::Event(_) => return false,
        };
        if let Some(in_flight) = state.in_flight.take() {
            in_flight.settle(result);
        }
        self.pump(&mut state);
        true
    }

    /// Queued plus in-flight commands
    #[cfg(test)]
    pub async fn outstanding(&self) -> usize {
        let state = self.state.lock().await;
        state.queue.len() + usize::from(state.in_flight.is_some())
    }

    async fn expire(self: &Arc<Self>, id: u64) {
        let mut state = self.state.lock().await;
        if state.in_flight.as_ref().map(|f| f.id) != Some(id) {
            return;
        }
        if let Some(in_flight) = state.in_flight.take() {
            tracing::warn!(
                "Command {} timed out after {:?}",
                in_flight.request.command(),
                self.timeout
            );
            in_flight.settle(Err(HeosError::Timeout));
        }
        self.pump(&mut state);
    }

    /// Write queued commands until one is in flight or the queue is empty
    fn pump(self: &Arc<Self>, state: &mut DispatchState) {
        while state.in_flight.is_none() {
            let Some(pending) = state.queue.pop_front() else {
                break;
            };
            if pending.reply.is_closed() {
                continue;
            }

            let id = state.next_id;
            let line = pending.request.clone().param(SEQUENCE, id).to_wire();
            let sent = state
                .sink
                .as_ref()
                .is_some_and(|sink| sink.send(line).is_ok());
            if !sent {
                let _ = pending.reply.send(Err(HeosError::NotConnected));
                continue;
            }

            state.next_id += 1;
            tracing::debug!("In flight: {} ({})", pending.request.command(), id);
            state.in_flight = Some(InFlight {
                id,
                request: pending.request,
                reply: pending.reply,
                timer: self.start_timer(id),
            });
        }
    }

    fn start_timer(self: &Arc<Self>, id: u64) -> JoinHandle<()> {
        let dispatcher: Weak<Self> = Arc::downgrade(self);
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(dispatcher) = dispatcher.upgrade() {
                dispatcher.expire(id).await;
            }
        })
    }
}
